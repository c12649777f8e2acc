//! Spawns a web server that listens on localhost. A password must be sent to
//! access the index page via the query string. Try connecting to
//! <http://localhost:8080/> without any query strings, then connect with the
//! query string `?code=my_secret_password`.
//!
//! The authenticator is a singleton injected into the handler. Each request
//! also gets its own audit log from the request scope, which is flushed when
//! the request finishes.

use actix_web::{
    get, web::Query, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use runtime_injector_actix::{
    attach_injector, define_module, request_scope, Injected, Injector,
    IntoSingleton, IntoTransient, RequestScope, RequestScopeOptions,
    RequestScoped, Svc,
};
use serde::Deserialize;
use std::sync::Mutex;

#[derive(Default)]
pub struct QueryRequestAuthenticator;

impl QueryRequestAuthenticator {
    fn is_allowed(&self, request: &HttpRequest) -> bool {
        #[derive(Deserialize)]
        struct QueryData {
            code: String,
        }

        let query = match Query::<QueryData>::from_query(request.query_string())
        {
            Ok(query) => query,
            Err(_) => return false,
        };

        query.code == "my_secret_password"
    }
}

#[derive(Default)]
pub struct AuditLog(Mutex<Vec<String>>);

impl AuditLog {
    fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn flush(&self) {
        for entry in self.0.lock().unwrap().drain(..) {
            println!("audit: {}", entry);
        }
    }
}

fn configure_services() -> Injector {
    let module = define_module! {
        services = [
            QueryRequestAuthenticator::default.singleton(),
            AuditLog::default.transient(),
        ]
    };

    let mut builder = Injector::builder();
    builder.add_module(module);
    builder.build()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let injector = configure_services();
    let options = RequestScopeOptions {
        enable_cleanup: true,
    };

    HttpServer::new(move || {
        attach_injector(App::new(), injector.clone())
            .wrap(request_scope(options))
            .service(index)
    })
    .bind(("127.0.0.1", 8080))?
    .run()
    .await
}

#[get("/")]
async fn index(
    request: HttpRequest,
    auth: Injected<Svc<QueryRequestAuthenticator>>,
    audit: RequestScoped<Svc<AuditLog>>,
    scope: RequestScope,
) -> impl Responder {
    let log = RequestScoped::into_inner(audit);
    let flushed = log.clone();
    scope.on_dispose(move || flushed.flush());

    if auth.is_allowed(&request) {
        log.record("password accepted");
        HttpResponse::Ok().body("You got the password right!")
    } else {
        log.record("password rejected");
        HttpResponse::Forbidden().body("Incorrect password")
    }
}
