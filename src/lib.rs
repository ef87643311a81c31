//! # strand
//!
//! A per-request [`Context`] that carries arbitrary state through an ordered
//! chain of handlers, plus middleware adapters for plugging rate limiting
//! into that chain.
//!
//! ## The model
//!
//! - A [`Chain`] is a fixed list of handlers. Each is `Fn(&mut Context)`.
//! - The context holds a cursor. [`Context::next`] runs the handler under it,
//!   inline. A handler that does not call `next` ends the request there.
//! - Out-of-band state (the request, the response sink, the [`App`]) lives in
//!   an untyped [`Store`] and is read back with a type check.
//! - [`Context::status`] writes the status line, then lets the app's
//!   [`ErrorHandler`] react before the handler writes a body.
//!
//! What strand leaves to others: routing, TLS, templates and the rate-limit
//! algorithm itself. The last one plugs in through
//! [`QuotaCheck`](middleware::limiter::QuotaCheck).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use strand::{App, Context, ErrorLog, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strand::Error> {
//!     let app = App::builder()
//!         .handler(require_user)
//!         .handler(hello)
//!         .on_error(ErrorLog)
//!         .build()?;
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! fn require_user(ctx: &mut Context) {
//!     if ctx.get("x-user").is_empty() {
//!         ctx.send_status(StatusCode::UNAUTHORIZED);
//!         return;
//!     }
//!     ctx.next();
//! }
//!
//! fn hello(ctx: &mut Context) {
//!     let user = ctx.get("x-user").to_owned();
//!     let _ = ctx.json(&serde_json::json!({ "hello": user }));
//! }
//! ```

mod app;
mod context;
mod error;
mod handler;
mod request;
mod response;
mod server;
mod store;

pub mod middleware;

pub use app::{App, AppBuilder, ErrorHandler, ErrorLog};
pub use context::{APP, ChainState, Context, REQUEST, RESPONSE};
pub use error::Error;
pub use handler::{Chain, Handler};
pub use request::Request;
pub use response::{Discard, Recorder, ResponseSink, ResponseWriter};
pub use server::{DEFAULT_BODY_LIMIT, Server, serve_with_shutdown};
pub use store::{SharedStore, Store};
