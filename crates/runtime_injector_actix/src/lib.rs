//! Utility library for injecting dependencies into actix-web applications.
//!
//! Attach an [`Injector`] to your [`App`](actix_web::App) with
//! [`attach_injector`], then request services in your handlers with
//! [`Injected<R>`] or [`SyncInjected<R>`]. Services that should live for the
//! duration of a single request can be requested with [`RequestScoped<R>`]
//! once the application is wrapped with [`request_scope`].
//!
//! ```no_run
//! use actix_web::{get, App, HttpResponse, HttpServer, Responder};
//! use runtime_injector_actix::{
//!     attach_injector, request_scope, Injected, Injector, IntoSingleton,
//!     IntoTransient, RequestScopeOptions, RequestScoped, Svc,
//! };
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! #[derive(Default)]
//! struct RequestId;
//!
//! #[get("/")]
//! async fn index(
//!     _greeter: Injected<Svc<Greeter>>,
//!     _id: RequestScoped<Svc<RequestId>>,
//! ) -> impl Responder {
//!     HttpResponse::Ok().body("hello")
//! }
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut builder = Injector::builder();
//!     builder.provide(Greeter::default.singleton());
//!     builder.provide(RequestId::default.transient());
//!
//!     let injector = builder.build();
//!     HttpServer::new(move || {
//!         attach_injector(App::new(), injector.clone())
//!             .wrap(request_scope(RequestScopeOptions::default()))
//!             .service(index)
//!     })
//!     .bind(("127.0.0.1", 8080))?
//!     .run()
//!     .await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value
)]

pub use runtime_injector::*;

mod attach;
mod injected;
mod middleware;
mod scope;

pub use attach::*;
pub use injected::*;
pub use middleware::*;
pub use scope::*;
