use actix_web::{
    dev::{ServiceFactory, ServiceRequest},
    http::StatusCode,
    App, HttpRequest, ResponseError,
};
use derive_more::{Display, Error};
use runtime_injector::Injector;

/// An [`Injector`] was requested from an application that never had one
/// attached to it.
///
/// This is a configuration error. Call [`attach_injector`] while building
/// your [`App`] to fix it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Display, Error)]
#[display(
    fmt = "no injector is attached to this application, call `attach_injector` during startup"
)]
pub struct InjectorNotAttached;

impl ResponseError for InjectorNotAttached {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Attaches an [`Injector`] to an application. Every request handled by the
/// application can then resolve services from it through [`Injected`],
/// [`SyncInjected`], or a [`RequestScope`].
///
/// The injector is stored in the application's `app_data`, so it should be
/// attached once per [`App`] inside the `HttpServer` factory. Cloning the
/// injector is cheap, and all clones share the same providers.
///
/// ```
/// use actix_web::App;
/// use runtime_injector_actix::{attach_injector, constant, Injector};
///
/// let mut builder = Injector::builder();
/// builder.provide(constant(4i32));
///
/// let injector = builder.build();
/// let _app = attach_injector(App::new(), injector);
/// ```
///
/// [`Injected`]: crate::Injected
/// [`SyncInjected`]: crate::SyncInjected
/// [`RequestScope`]: crate::RequestScope
pub fn attach_injector<T>(app: App<T>, injector: Injector) -> App<T>
where
    T: ServiceFactory<
        ServiceRequest,
        Config = (),
        Error = actix_web::Error,
        InitError = (),
    >,
{
    tracing::debug!("attaching injector to application");
    app.app_data(injector)
}

/// Gets the [`Injector`] attached to the application handling this request.
pub fn get_injector_instance(
    request: &HttpRequest,
) -> Result<&Injector, InjectorNotAttached> {
    request.app_data().ok_or(InjectorNotAttached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use runtime_injector::{IntoSingleton, Svc};

    #[derive(Default)]
    struct Counter;

    #[test]
    fn attached_injector_can_be_retrieved() {
        let mut builder = Injector::builder();
        builder.provide(Counter::default.singleton());
        let injector = builder.build();

        let request = TestRequest::default()
            .app_data(injector.clone())
            .to_http_request();
        let attached = get_injector_instance(&request).unwrap();

        // Both handles share the same providers, so the singleton matches
        let expected: Svc<Counter> = injector.get().unwrap();
        let actual: Svc<Counter> = attached.get().unwrap();
        assert!(Svc::ptr_eq(&expected, &actual));
    }

    #[test]
    fn retrieval_fails_before_attach() {
        let request = TestRequest::default().to_http_request();
        match get_injector_instance(&request) {
            Err(InjectorNotAttached) => {}
            Ok(_) => panic!("no injector should be attached"),
        }
    }

    #[test]
    fn not_attached_is_internal_server_error() {
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            InjectorNotAttached.status_code()
        );
    }
}
