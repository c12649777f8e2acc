use crate::{
    InjectorNotAttached, RequestScope, RequestScopeFactory, RequestScopeOptions,
};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    HttpMessage,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use runtime_injector::Injector;

/// Creates an [`InjectorMiddleware`] that gives each request its own
/// [`RequestScope`].
///
/// ```
/// use actix_web::App;
/// use runtime_injector_actix::{
///     attach_injector, request_scope, Injector, RequestScopeOptions,
/// };
///
/// let _app = attach_injector(App::new(), Injector::builder().build())
///     .wrap(request_scope(RequestScopeOptions {
///         enable_cleanup: true,
///     }));
/// ```
#[must_use]
pub fn request_scope(options: RequestScopeOptions) -> InjectorMiddleware {
    InjectorMiddleware::new(RequestScopeFactory::new(options))
}

/// Middleware which opens a [`RequestScope`] before each request is handled
/// and disposes it once the response is ready.
///
/// The scope is disposed exactly once per request, whether the handler
/// succeeds, fails, or its response future is dropped early. The injector
/// must be attached to the application with [`attach_injector`], otherwise
/// every request fails with [`InjectorNotAttached`].
///
/// [`attach_injector`]: crate::attach_injector
#[derive(Clone, Copy, Debug, Default)]
pub struct InjectorMiddleware {
    factory: RequestScopeFactory,
}

impl InjectorMiddleware {
    /// Creates a new middleware which uses the given factory to create its
    /// scopes.
    #[must_use]
    pub fn new(factory: RequestScopeFactory) -> Self {
        InjectorMiddleware { factory }
    }
}

impl<S, B> Transform<S, ServiceRequest> for InjectorMiddleware
where
    S: Service<
        ServiceRequest,
        Response = ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Transform = InjectorMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InjectorMiddlewareService {
            service,
            factory: self.factory,
        }))
    }
}

/// The service created by [`InjectorMiddleware`].
pub struct InjectorMiddlewareService<S> {
    service: S,
    factory: RequestScopeFactory,
}

impl<S, B> Service<ServiceRequest> for InjectorMiddlewareService<S>
where
    S: Service<
        ServiceRequest,
        Response = ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let injector = match req.app_data::<Injector>() {
            Some(injector) => injector.clone(),
            None => {
                tracing::warn!(
                    path = req.path(),
                    "cannot open request scope: {}",
                    InjectorNotAttached
                );
                return Box::pin(ready(Err(InjectorNotAttached.into())));
            }
        };

        let scope = self.factory.create_scope(injector);
        req.extensions_mut().insert(scope.clone());

        let guard = ScopeGuard(scope);
        let response = self.service.call(req);
        Box::pin(async move {
            // Dropped on every exit path, including cancellation
            let _guard = guard;
            response.await
        })
    }
}

struct ScopeGuard(RequestScope);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}
