//! Utility library for injecting dependencies into apalis task functions.
//!
//! Register a [`TaskState`] with your worker as data and attach an
//! [`Injector`] to it with [`attach_injector_task`]. Task functions can then
//! request services with [`InjectedTask<R>`] or [`SyncInjectedTask<R>`].
//!
//! ```
//! use runtime_injector_apalis::{
//!     attach_injector_task, get_injector_instance_task, Injector,
//!     IntoSingleton, Svc, TaskState,
//! };
//!
//! #[derive(Default)]
//! struct Mailer;
//!
//! let mut builder = Injector::builder();
//! builder.provide(Mailer::default.singleton());
//!
//! // The state is shared with the worker, so the injector can be attached
//! // after the worker is configured, as long as it happens before tasks run.
//! let state = TaskState::new();
//! attach_injector_task(&state, builder.build());
//!
//! let injector = get_injector_instance_task(&state).unwrap();
//! let _mailer: Svc<Mailer> = injector.get().unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value
)]

pub use runtime_injector::*;

mod injected;
mod state;

pub use injected::*;
pub use state::*;
