use crate::{get_injector_instance_task, InjectorNotAttached, TaskState};
use apalis_core::{
    task::{data::Data, Task},
    task_fn::FromRequest,
};
use derive_more::{Display, Error};
use runtime_injector::{InjectError, Request};
use std::{any::type_name, fmt::Display, ops::Deref};
use tokio::task::JoinError;

/// An error that occurred while injecting a service into a task.
#[derive(Debug, Display, Error)]
pub enum TaskInjectError {
    /// The worker has no [`TaskState`]. Register one with the worker's
    /// `data` method.
    #[display(fmt = "the worker has no `TaskState`, register one as worker data")]
    MissingState,

    /// The [`TaskState`] has no injector attached to it.
    #[display(fmt = "{}", _0)]
    NotAttached(#[error(source)] InjectorNotAttached),

    /// The injector failed to resolve the request.
    #[display(fmt = "{}", _0)]
    Inject(#[error(source)] InjectError),

    /// The blocking thread resolving the request panicked or was cancelled.
    #[display(fmt = "blocking injection did not complete: {}", _0)]
    Blocking(#[error(source)] JoinError),
}

impl From<InjectorNotAttached> for TaskInjectError {
    fn from(error: InjectorNotAttached) -> Self {
        TaskInjectError::NotAttached(error)
    }
}

impl From<InjectError> for TaskInjectError {
    fn from(error: InjectError) -> Self {
        TaskInjectError::Inject(error)
    }
}

/// An injected request for a task. Any request to the [`Injector`] can be
/// injected by wrapping it in this type and adding it as a parameter to
/// your task function.
///
/// The worker must have a [`TaskState`] registered as data, and an injector
/// attached to that state with [`attach_injector_task`].
///
/// ```ignore
/// use runtime_injector_apalis::{InjectedTask, Svc};
///
/// struct Mailer;
///
/// async fn send_welcome(user_id: u32, mailer: InjectedTask<Svc<Mailer>>) {
///     // ...
/// }
///
/// let state = TaskState::new();
/// attach_injector_task(&state, injector);
/// let worker = WorkerBuilder::new("mailer")
///     .backend(backend)
///     .data(state)
///     .build(send_welcome);
/// ```
///
/// [`Injector`]: runtime_injector::Injector
/// [`attach_injector_task`]: crate::attach_injector_task
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct InjectedTask<R>(R)
where
    R: Request;

impl<R> InjectedTask<R>
where
    R: Request,
{
    /// Converts an [`InjectedTask<R>`] to its inner value.
    pub fn into_inner(value: InjectedTask<R>) -> R {
        value.0
    }
}

impl<R> Deref for InjectedTask<R>
where
    R: Request,
{
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R> Display for InjectedTask<R>
where
    R: Request + Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<R, Args, Ctx, IdType> FromRequest<Task<Args, Ctx, IdType>>
    for InjectedTask<R>
where
    R: Request + Send,
    Task<Args, Ctx, IdType>: Sync,
    Data<TaskState>: FromRequest<Task<Args, Ctx, IdType>>,
{
    type Error = TaskInjectError;

    async fn from_request(
        task: &Task<Args, Ctx, IdType>,
    ) -> Result<Self, Self::Error> {
        let state = task_state(task).await?;
        inject_from_state(&state).map(InjectedTask)
    }
}

/// An injected request for a task that is resolved on tokio's blocking
/// thread pool.
///
/// This behaves the same as [`InjectedTask<R>`], but is intended for
/// services whose providers perform blocking work while they are being
/// constructed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct SyncInjectedTask<R>(R)
where
    R: Request;

impl<R> SyncInjectedTask<R>
where
    R: Request,
{
    /// Converts a [`SyncInjectedTask<R>`] to its inner value.
    pub fn into_inner(value: SyncInjectedTask<R>) -> R {
        value.0
    }
}

impl<R> Deref for SyncInjectedTask<R>
where
    R: Request,
{
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R, Args, Ctx, IdType> FromRequest<Task<Args, Ctx, IdType>>
    for SyncInjectedTask<R>
where
    R: Request + Send + 'static,
    Task<Args, Ctx, IdType>: Sync,
    Data<TaskState>: FromRequest<Task<Args, Ctx, IdType>>,
{
    type Error = TaskInjectError;

    async fn from_request(
        task: &Task<Args, Ctx, IdType>,
    ) -> Result<Self, Self::Error> {
        let state = task_state(task).await?;
        inject_blocking(&state).await.map(SyncInjectedTask)
    }
}

async fn task_state<Args, Ctx, IdType>(
    task: &Task<Args, Ctx, IdType>,
) -> Result<TaskState, TaskInjectError>
where
    Data<TaskState>: FromRequest<Task<Args, Ctx, IdType>>,
{
    match Data::<TaskState>::from_request(task).await {
        Ok(state) => Ok((*state).clone()),
        Err(_) => {
            tracing::warn!("no task state registered with the worker");
            Err(TaskInjectError::MissingState)
        }
    }
}

pub(crate) fn inject_from_state<R>(
    state: &TaskState,
) -> Result<R, TaskInjectError>
where
    R: Request,
{
    let injector = get_injector_instance_task(state).map_err(|error| {
        tracing::warn!(%error, "cannot inject {}", type_name::<R>());
        error
    })?;

    injector.get().map_err(|error| {
        tracing::warn!(%error, "failed to inject {}", type_name::<R>());
        TaskInjectError::from(error)
    })
}

pub(crate) async fn inject_blocking<R>(
    state: &TaskState,
) -> Result<R, TaskInjectError>
where
    R: Request + Send + 'static,
{
    let injector = get_injector_instance_task(state).map_err(|error| {
        tracing::warn!(%error, "cannot inject {}", type_name::<R>());
        error
    })?;

    let result = tokio::task::spawn_blocking(move || injector.get::<R>())
        .await
        .map_err(|error| {
            tracing::warn!(
                %error,
                "blocking injection of {} did not complete",
                type_name::<R>()
            );
            TaskInjectError::Blocking(error)
        })?;

    result.map_err(|error| {
        tracing::warn!(%error, "failed to inject {}", type_name::<R>());
        TaskInjectError::from(error)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach_injector_task;
    use runtime_injector::{
        interface, Injector, IntoSingleton, IntoTransient, Service, Svc,
        TypedProvider,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Mailer: Service {
        fn sender(&self) -> &'static str;
    }

    interface! {
        dyn Mailer = [SmtpMailer]
    }

    #[derive(Default)]
    struct SmtpMailer;

    impl Mailer for SmtpMailer {
        fn sender(&self) -> &'static str {
            "smtp"
        }
    }

    fn mailer_state() -> (TaskState, Injector) {
        let mut builder = Injector::builder();
        builder.provide(
            SmtpMailer::default.singleton().with_interface::<dyn Mailer>(),
        );
        let injector = builder.build();

        let state = TaskState::new();
        attach_injector_task(&state, injector.clone());
        (state, injector)
    }

    fn task_with(state: TaskState) -> Task<u32, ()> {
        let mut task = Task::new(7);
        task.parts.data.insert(state);
        task
    }

    #[test]
    fn injection_matches_direct_resolution() {
        let (state, injector) = mailer_state();

        let injected: Svc<dyn Mailer> = inject_from_state(&state).unwrap();
        let direct: Svc<dyn Mailer> = injector.get().unwrap();

        assert_eq!("smtp", injected.sender());
        assert!(Svc::ptr_eq(&direct, &injected));
    }

    #[tokio::test]
    async fn blocking_injection_matches_direct_resolution() {
        let (state, injector) = mailer_state();

        let injected: Svc<dyn Mailer> = inject_blocking(&state).await.unwrap();
        let direct: Svc<dyn Mailer> = injector.get().unwrap();

        assert!(Svc::ptr_eq(&direct, &injected));
    }

    #[tokio::test]
    async fn task_receives_injected_service() {
        let (state, injector) = mailer_state();
        let task = task_with(state);

        let injected = InjectedTask::<Svc<dyn Mailer>>::from_request(&task)
            .await
            .unwrap();
        let direct: Svc<dyn Mailer> = injector.get().unwrap();

        assert_eq!("smtp", injected.sender());
        assert!(Svc::ptr_eq(&direct, &InjectedTask::into_inner(injected)));
    }

    #[tokio::test]
    async fn task_receives_sync_injected_service() {
        let (state, injector) = mailer_state();
        let task = task_with(state);

        let injected =
            SyncInjectedTask::<Svc<dyn Mailer>>::from_request(&task)
                .await
                .unwrap();
        let direct: Svc<dyn Mailer> = injector.get().unwrap();

        assert!(Svc::ptr_eq(&direct, &SyncInjectedTask::into_inner(injected)));
    }

    #[tokio::test]
    async fn injection_fails_without_task_state() {
        let task: Task<u32, ()> = Task::new(7);

        match InjectedTask::<Svc<dyn Mailer>>::from_request(&task).await {
            Err(TaskInjectError::MissingState) => {}
            Err(error) => panic!("unexpected error: {}", error),
            Ok(_) => panic!("resolved a service without task state"),
        }

        match SyncInjectedTask::<Svc<dyn Mailer>>::from_request(&task).await {
            Err(TaskInjectError::MissingState) => {}
            Err(error) => panic!("unexpected error: {}", error),
            Ok(_) => panic!("resolved a service without task state"),
        }
    }

    #[tokio::test]
    async fn extraction_fails_when_state_has_no_injector() {
        let task = task_with(TaskState::new());

        match InjectedTask::<Svc<dyn Mailer>>::from_request(&task).await {
            Err(TaskInjectError::NotAttached(_)) => {}
            Err(error) => panic!("unexpected error: {}", error),
            Ok(_) => panic!("no injector should be attached"),
        }
    }

    #[tokio::test]
    async fn injection_fails_before_attach() {
        let state = TaskState::new();

        match inject_from_state::<Svc<dyn Mailer>>(&state) {
            Err(TaskInjectError::NotAttached(_)) => {}
            Err(error) => panic!("unexpected error: {}", error),
            Ok(_) => panic!("no injector should be attached"),
        }

        match inject_blocking::<Svc<dyn Mailer>>(&state).await {
            Err(TaskInjectError::NotAttached(_)) => {}
            Err(error) => panic!("unexpected error: {}", error),
            Ok(_) => panic!("no injector should be attached"),
        }
    }

    #[test]
    fn injection_fails_without_provider() {
        let state = TaskState::new();
        attach_injector_task(&state, Injector::builder().build());

        match inject_from_state::<Svc<dyn Mailer>>(&state) {
            Err(TaskInjectError::Inject(_)) => {}
            Err(error) => panic!("unexpected error: {}", error),
            Ok(_) => panic!("resolved a service with no provider"),
        }

        let optional: Option<Svc<dyn Mailer>> =
            inject_from_state(&state).unwrap();
        assert!(optional.is_none());
    }

    #[tokio::test]
    async fn blocking_injection_runs_provider_off_the_runtime() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        struct Report;

        let mut builder = Injector::builder();
        builder.provide(
            (|| {
                std::thread::sleep(std::time::Duration::from_millis(5));
                CREATED.fetch_add(1, Ordering::SeqCst);
                Report
            })
            .transient(),
        );

        let state = TaskState::new();
        attach_injector_task(&state, builder.build());

        let _first: Svc<Report> = inject_blocking(&state).await.unwrap();
        let _second: Svc<Report> = inject_blocking(&state).await.unwrap();
        assert_eq!(2, CREATED.load(Ordering::SeqCst));
    }
}
