use apalis_core::task::extensions::Extensions;
use derive_more::{Display, Error};
use runtime_injector::Injector;
use std::{
    fmt::{Debug, Formatter},
    sync::{Arc, PoisonError, RwLock},
};

/// An [`Injector`] was requested from a [`TaskState`] that never had one
/// attached to it.
///
/// This is a configuration error. Call [`attach_injector_task`] before the
/// worker starts processing tasks.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Display, Error)]
#[display(
    fmt = "no injector is attached to the task state, call `attach_injector_task` during startup"
)]
pub struct InjectorNotAttached;

/// State shared by every task processed by a worker.
///
/// Register the state with the worker as data so tasks can extract it, then
/// store values in it at any point before they are needed. Cloning the state
/// returns another handle to the same values.
///
/// ```
/// use runtime_injector_apalis::TaskState;
///
/// let state = TaskState::new();
/// let handle = state.clone();
/// state.insert(String::from("shared"));
/// assert_eq!(Some(String::from("shared")), handle.get::<String>());
/// ```
#[derive(Clone, Default)]
pub struct TaskState {
    values: Arc<RwLock<Extensions>>,
}

impl TaskState {
    /// Creates a new, empty state.
    #[must_use]
    pub fn new() -> Self {
        TaskState::default()
    }

    /// Stores a value in the state, returning the value of the same type it
    /// replaced, if any.
    pub fn insert<T>(&self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value)
    }

    /// Gets a clone of the value of the given type.
    #[must_use]
    pub fn get<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .cloned()
    }

    /// Whether a value of the given type is stored.
    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .is_some()
    }
}

impl Debug for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskState")
            .field("injector", &self.contains::<Injector>())
            .finish_non_exhaustive()
    }
}

/// Attaches an [`Injector`] to a worker's [`TaskState`]. Attaching another
/// injector replaces the previous one.
///
/// ```
/// use runtime_injector_apalis::{
///     attach_injector_task, get_injector_instance_task, Injector, TaskState,
/// };
///
/// let state = TaskState::new();
/// assert!(get_injector_instance_task(&state).is_err());
///
/// attach_injector_task(&state, Injector::builder().build());
/// assert!(get_injector_instance_task(&state).is_ok());
/// ```
pub fn attach_injector_task(state: &TaskState, injector: Injector) {
    tracing::debug!("attaching injector to task state");
    if state.insert(injector).is_some() {
        tracing::debug!("replaced previously attached injector");
    }
}

/// Gets the [`Injector`] attached to a worker's [`TaskState`].
pub fn get_injector_instance_task(
    state: &TaskState,
) -> Result<Injector, InjectorNotAttached> {
    state.get().ok_or(InjectorNotAttached)
}
