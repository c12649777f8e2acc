use crate::get_injector_instance;
use actix_web::{
    dev::Payload, error::ErrorInternalServerError, web, FromRequest,
    HttpRequest,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use runtime_injector::{InjectError, Request};
use std::{any::type_name, fmt::Display, ops::Deref};

/// An injected request. Any request to the [`Injector`] can be injected by
/// wrapping it in this type and providing it as a parameter to your request
/// handler. The injector must be attached to the application with
/// [`attach_injector`].
///
/// The request is resolved inline while the handler's arguments are being
/// extracted. If constructing the service blocks, use [`SyncInjected`]
/// instead.
///
/// ## Example
///
/// ```no_run
/// use actix_web::{get, App, HttpResponse, HttpServer, Responder};
/// use runtime_injector_actix::{
///     attach_injector, constant, define_module, Injected, Injector, Svc,
/// };
///
/// #[actix_web::main]
/// async fn main() -> std::io::Result<()> {
///     let mut builder = Injector::builder();
///     builder.add_module(define_module! {
///         services = [constant(4i32)],
///     });
///
///     let injector = builder.build();
///     HttpServer::new(move || {
///         attach_injector(App::new(), injector.clone()).service(index)
///     })
///     .bind(("127.0.0.1", 8080))?
///     .run()
///     .await
/// }
///
/// #[get("/")]
/// async fn index(my_service: Injected<Svc<i32>>) -> impl Responder {
///     HttpResponse::Ok().body(format!("injected value is {}", *my_service))
/// }
/// ```
///
/// [`Injector`]: runtime_injector::Injector
/// [`attach_injector`]: crate::attach_injector
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Injected<R>(R)
where
    R: Request;

impl<R> Injected<R>
where
    R: Request,
{
    /// Converts an [`Injected<R>`] to its inner value.
    pub fn into_inner(value: Injected<R>) -> R {
        value.0
    }
}

impl<R> Deref for Injected<R>
where
    R: Request,
{
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R> Display for Injected<R>
where
    R: Request + Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<R> FromRequest for Injected<R>
where
    R: Request,
{
    type Error = actix_web::Error;
    type Future = Ready<actix_web::Result<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let injector = match get_injector_instance(req) {
            Ok(injector) => injector,
            Err(error) => {
                tracing::warn!(%error, "cannot inject {}", type_name::<R>());
                return ready(Err(error.into()));
            }
        };

        ready(
            injector
                .get()
                .map(Injected)
                .map_err(injection_failed::<R>),
        )
    }
}

/// An injected request that is resolved on actix-web's blocking thread pool.
///
/// This behaves the same as [`Injected<R>`], but is intended for services
/// whose providers perform blocking work while they are being constructed
/// (reading files, opening synchronous connections, etc.). The request is
/// moved to a thread where blocking is acceptable and the handler resumes
/// once the service is available.
///
/// ```no_run
/// use actix_web::{get, HttpResponse, Responder};
/// use runtime_injector_actix::{Svc, SyncInjected};
///
/// struct Config {
///     name: String,
/// }
///
/// #[get("/config")]
/// async fn config(config: SyncInjected<Svc<Config>>) -> impl Responder {
///     HttpResponse::Ok().body(config.name.clone())
/// }
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct SyncInjected<R>(R)
where
    R: Request;

impl<R> SyncInjected<R>
where
    R: Request,
{
    /// Converts a [`SyncInjected<R>`] to its inner value.
    pub fn into_inner(value: SyncInjected<R>) -> R {
        value.0
    }
}

impl<R> Deref for SyncInjected<R>
where
    R: Request,
{
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R> FromRequest for SyncInjected<R>
where
    R: Request + Send + 'static,
{
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, actix_web::Result<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let injector = match get_injector_instance(req) {
            Ok(injector) => injector.clone(),
            Err(error) => {
                tracing::warn!(%error, "cannot inject {}", type_name::<R>());
                return Box::pin(ready(Err(error.into())));
            }
        };

        Box::pin(async move {
            let result = web::block(move || injector.get::<R>())
                .await
                .map_err(|error| {
                    tracing::warn!(
                        %error,
                        "blocking injection of {} did not complete",
                        type_name::<R>()
                    );
                    ErrorInternalServerError(error)
                })?;

            result.map(SyncInjected).map_err(injection_failed::<R>)
        })
    }
}

fn injection_failed<R>(error: InjectError) -> actix_web::Error {
    tracing::warn!(%error, "failed to inject {}", type_name::<R>());
    ErrorInternalServerError(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach_injector;
    use actix_web::{
        http::StatusCode,
        test::{self, TestRequest},
        App, HttpResponse,
    };
    use runtime_injector::{
        interface, Injector, IntoSingleton, IntoTransient, Service, Svc,
        TypedProvider,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Logger: Service {
        fn name(&self) -> &'static str;
    }

    interface! {
        dyn Logger = [ConsoleLogger]
    }

    #[derive(Default)]
    struct ConsoleLogger;

    impl Logger for ConsoleLogger {
        fn name(&self) -> &'static str {
            "console"
        }
    }

    fn logger_injector() -> Injector {
        let mut builder = Injector::builder();
        builder.provide(
            ConsoleLogger::default.singleton().with_interface::<dyn Logger>(),
        );
        builder.build()
    }

    #[actix_web::test]
    async fn injected_matches_direct_resolution() {
        let injector = logger_injector();
        let request = TestRequest::default()
            .app_data(injector.clone())
            .to_http_request();

        let injected: Injected<Svc<dyn Logger>> =
            Injected::extract(&request).await.unwrap();
        let direct: Svc<dyn Logger> = injector.get().unwrap();

        assert_eq!("console", injected.name());
        assert!(Svc::ptr_eq(&direct, &Injected::into_inner(injected)));
    }

    #[actix_web::test]
    async fn sync_injected_matches_direct_resolution() {
        let injector = logger_injector();
        let request = TestRequest::default()
            .app_data(injector.clone())
            .to_http_request();

        let injected: SyncInjected<Svc<dyn Logger>> =
            SyncInjected::extract(&request).await.unwrap();
        let direct: Svc<dyn Logger> = injector.get().unwrap();

        assert!(Svc::ptr_eq(&direct, &SyncInjected::into_inner(injected)));
    }

    #[actix_web::test]
    async fn injection_fails_without_attached_injector() {
        let request = TestRequest::default().to_http_request();

        match Injected::<Svc<dyn Logger>>::extract(&request).await {
            Err(error) => assert_eq!(
                StatusCode::INTERNAL_SERVER_ERROR,
                error.as_response_error().status_code()
            ),
            Ok(_) => panic!("no injector should be attached"),
        }

        let injected =
            SyncInjected::<Svc<dyn Logger>>::extract(&request).await;
        assert!(injected.is_err());
    }

    #[actix_web::test]
    async fn injection_fails_without_provider() {
        let injector = Injector::builder().build();
        let request = TestRequest::default().app_data(injector).to_http_request();

        let injected = Injected::<Svc<dyn Logger>>::extract(&request).await;
        assert!(injected.is_err());

        let optional: Injected<Option<Svc<dyn Logger>>> =
            Injected::extract(&request).await.unwrap();
        assert!(optional.is_none());
    }

    #[actix_web::test]
    async fn route_receives_injected_service() {
        async fn index(logger: Injected<Svc<dyn Logger>>) -> HttpResponse {
            HttpResponse::Ok().body(logger.name())
        }

        let app = test::init_service(
            attach_injector(App::new(), logger_injector())
                .route("/", web::get().to(index)),
        )
        .await;

        let request = TestRequest::get().uri("/").to_request();
        let body = test::call_and_read_body(&app, request).await;
        assert_eq!(&body[..], b"console");
    }

    #[actix_web::test]
    async fn transient_services_are_created_per_extraction() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        struct Connection;

        let mut builder = Injector::builder();
        builder.provide(
            (|| {
                CREATED.fetch_add(1, Ordering::SeqCst);
                Connection
            })
            .transient(),
        );

        let request = TestRequest::default()
            .app_data(builder.build())
            .to_http_request();
        let _first: Injected<Svc<Connection>> =
            Injected::extract(&request).await.unwrap();
        let _second: Injected<Svc<Connection>> =
            Injected::extract(&request).await.unwrap();

        assert_eq!(2, CREATED.load(Ordering::SeqCst));
    }
}
