use actix_web::{
    dev::Payload, http::StatusCode, FromRequest, HttpRequest, ResponseError,
};
use derive_more::{Display, Error};
use futures_util::future::{ready, Ready};
use runtime_injector::{InjectError, Injector, Request};
use serde::Deserialize;
use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    fmt::{Debug, Formatter},
    ops::Deref,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

type ScopeCache = HashMap<TypeId, Box<dyn Any + Send + Sync>>;
type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Configures how request scopes are disposed.
///
/// ```
/// use runtime_injector_actix::RequestScopeOptions;
///
/// let options: RequestScopeOptions =
///     serde_json::from_str(r#"{ "enable_cleanup": true }"#).unwrap();
/// assert!(options.enable_cleanup);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash, Deserialize)]
#[serde(default)]
pub struct RequestScopeOptions {
    /// Whether callbacks registered with [`RequestScope::on_dispose`] are
    /// run when the scope is disposed. If this is disabled, the callbacks are
    /// dropped without being called.
    pub enable_cleanup: bool,
}

/// An error that occurred while resolving a service through a
/// [`RequestScope`].
#[derive(Debug, Display, Error)]
pub enum RequestScopeError {
    /// No scope is active for the request. This usually means the
    /// application is not wrapped in an [`InjectorMiddleware`].
    ///
    /// [`InjectorMiddleware`]: crate::InjectorMiddleware
    #[display(
        fmt = "no request scope is active, wrap the application in an `InjectorMiddleware`"
    )]
    NotActive,

    /// The scope has already been disposed.
    #[display(fmt = "the request scope has already been disposed")]
    Disposed,

    /// The injector failed to resolve the request.
    #[display(fmt = "{}", _0)]
    Inject(#[error(source)] InjectError),
}

impl From<InjectError> for RequestScopeError {
    fn from(error: InjectError) -> Self {
        RequestScopeError::Inject(error)
    }
}

impl ResponseError for RequestScopeError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Creates [`RequestScope`]s. One factory is shared by every request that
/// passes through an [`InjectorMiddleware`].
///
/// [`InjectorMiddleware`]: crate::InjectorMiddleware
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct RequestScopeFactory {
    options: RequestScopeOptions,
}

impl RequestScopeFactory {
    /// Creates a new factory for scopes configured with the given options.
    #[must_use]
    pub fn new(options: RequestScopeOptions) -> Self {
        RequestScopeFactory { options }
    }

    /// The options given to each scope created by this factory.
    #[must_use]
    pub fn options(&self) -> RequestScopeOptions {
        self.options
    }

    /// Creates a new scope which resolves its services from the given
    /// injector. The scope must be disposed by calling
    /// [`RequestScope::dispose`] once the request is complete.
    #[must_use]
    pub fn create_scope(&self, injector: Injector) -> RequestScope {
        tracing::trace!("creating request scope");
        RequestScope {
            inner: Arc::new(ScopeInner {
                injector,
                options: self.options,
                disposed: AtomicBool::new(false),
                cache: Mutex::default(),
                on_dispose: Mutex::default(),
            }),
        }
    }
}

/// A lifetime boundary for services within a single request.
///
/// Each type requested through a scope is resolved from the injector at
/// most once. Later requests for the same type return a clone of the first
/// result, so a service registered as transient in the injector is shared by
/// everything in the request but is recreated for the next request.
///
/// Cloning a scope returns another handle to the same scope.
///
/// ```
/// use runtime_injector_actix::{
///     Injector, IntoTransient, RequestScopeFactory, RequestScopeOptions, Svc,
/// };
///
/// #[derive(Default)]
/// struct Transaction;
///
/// let mut builder = Injector::builder();
/// builder.provide(Transaction::default.transient());
/// let injector = builder.build();
///
/// let factory = RequestScopeFactory::new(RequestScopeOptions::default());
/// let scope = factory.create_scope(injector);
/// let first: Svc<Transaction> = scope.get().unwrap();
/// let second: Svc<Transaction> = scope.get().unwrap();
/// assert!(Svc::ptr_eq(&first, &second));
///
/// assert!(scope.dispose());
/// assert!(scope.get::<Svc<Transaction>>().is_err());
/// ```
#[derive(Clone)]
pub struct RequestScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    injector: Injector,
    options: RequestScopeOptions,
    disposed: AtomicBool,
    cache: Mutex<ScopeCache>,
    on_dispose: Mutex<Vec<DisposeCallback>>,
}

impl RequestScope {
    /// Resolves a request within this scope. The first call for each type
    /// asks the injector, and later calls return a clone of that value.
    pub fn get<R>(&self) -> Result<R, RequestScopeError>
    where
        R: Request + Clone + Send + Sync + 'static,
    {
        let key = TypeId::of::<R>();
        {
            let cache = self.lock_cache();
            if self.is_disposed() {
                return Err(RequestScopeError::Disposed);
            }

            if let Some(cached) = cache.get(&key) {
                if let Some(cached) = cached.downcast_ref::<R>() {
                    return Ok(cached.clone());
                }
            }
        }

        // Resolve without holding the cache lock
        let resolved: R = self.inner.injector.get()?;

        let mut cache = self.lock_cache();
        if self.is_disposed() {
            return Err(RequestScopeError::Disposed);
        }

        // Another resolution for the same type may have finished first
        if let Some(cached) = cache.get(&key) {
            if let Some(cached) = cached.downcast_ref::<R>() {
                return Ok(cached.clone());
            }
        }

        tracing::trace!("caching {} in request scope", type_name::<R>());
        cache.insert(key, Box::new(resolved.clone()));
        Ok(resolved)
    }

    /// The injector this scope resolves services from.
    #[must_use]
    pub fn injector(&self) -> &Injector {
        &self.inner.injector
    }

    /// The options this scope was created with.
    #[must_use]
    pub fn options(&self) -> RequestScopeOptions {
        self.inner.options
    }

    /// Registers a callback to run when this scope is disposed. Callbacks
    /// run in the reverse order they were registered, and only if
    /// [`RequestScopeOptions::enable_cleanup`] is set.
    ///
    /// If the scope has already been disposed, the callback is handled
    /// immediately. A panicking callback is logged and does not stop the
    /// remaining callbacks from running.
    pub fn on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self
            .inner
            .on_dispose
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_disposed() {
            drop(callbacks);
            if self.inner.options.enable_cleanup {
                run_callback(callback);
            }
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Whether this scope has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Disposes this scope, releasing every service it cached and handling
    /// its dispose callbacks. Returns `true` the first time the scope is
    /// disposed and `false` on every call afterwards.
    pub fn dispose(&self) -> bool {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let released = {
            let mut cache = self.lock_cache();
            std::mem::take(&mut *cache)
        };
        let callbacks = {
            let mut callbacks = self
                .inner
                .on_dispose
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *callbacks)
        };

        tracing::trace!(
            services = released.len(),
            callbacks = callbacks.len(),
            cleanup = self.inner.options.enable_cleanup,
            "disposing request scope"
        );

        if self.inner.options.enable_cleanup {
            for callback in callbacks.into_iter().rev() {
                run_callback(callback);
            }
        }

        drop(released);
        true
    }

    fn lock_cache(&self) -> MutexGuard<'_, ScopeCache> {
        self.inner.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_callback<F>(callback: F)
where
    F: FnOnce(),
{
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!("request scope dispose callback panicked");
    }
}

impl Debug for RequestScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("options", &self.inner.options)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl FromRequest for RequestScope {
    type Error = RequestScopeError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(current_scope(req))
    }
}

fn current_scope(req: &HttpRequest) -> Result<RequestScope, RequestScopeError> {
    req.extensions()
        .get::<RequestScope>()
        .cloned()
        .ok_or(RequestScopeError::NotActive)
}

/// A request resolved through the current [`RequestScope`]. Every
/// `RequestScoped<R>` in the same request receives the same value, while
/// different requests receive different values.
///
/// The application must be wrapped in an [`InjectorMiddleware`].
///
/// ```no_run
/// use actix_web::{web, App, HttpResponse};
/// use runtime_injector_actix::{
///     attach_injector, request_scope, Injector, IntoTransient,
///     RequestScopeOptions, RequestScoped, Svc,
/// };
///
/// #[derive(Default)]
/// struct UnitOfWork;
///
/// async fn index(work: RequestScoped<Svc<UnitOfWork>>) -> HttpResponse {
///     HttpResponse::Ok().finish()
/// }
///
/// let mut builder = Injector::builder();
/// builder.provide(UnitOfWork::default.transient());
///
/// let _app = attach_injector(App::new(), builder.build())
///     .wrap(request_scope(RequestScopeOptions::default()))
///     .route("/", web::get().to(index));
/// ```
///
/// [`InjectorMiddleware`]: crate::InjectorMiddleware
#[derive(Clone, Debug)]
pub struct RequestScoped<R>(R);

impl<R> RequestScoped<R> {
    /// Converts a [`RequestScoped<R>`] to its inner value.
    pub fn into_inner(value: RequestScoped<R>) -> R {
        value.0
    }
}

impl<R> Deref for RequestScoped<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R> FromRequest for RequestScoped<R>
where
    R: Request + Clone + Send + Sync + 'static,
{
    type Error = RequestScopeError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = current_scope(req)
            .and_then(|scope| scope.get())
            .map(RequestScoped)
            .map_err(|error| {
                tracing::warn!(
                    %error,
                    "failed to inject {} from request scope",
                    type_name::<R>()
                );
                error
            });

        ready(result)
    }
}
