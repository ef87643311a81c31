//! Middleware adapters.
//!
//! Middleware here is just a [`Handler`] that does its work and then either
//! calls [`Context::next`] or answers the request itself. This module adds:
//!
//! - [`from_http`]: embeds any [`HttpMiddleware`] (code written against the
//!   plain request/response pair) in a chain.
//! - [`StatusResponses`]: per-status JSON bodies for rejections.
//! - [`limiter`]: authorization and rate-limit gates.

use std::collections::HashMap;
use std::mem;

use http::StatusCode;
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use crate::context::{Context, REQUEST, RESPONSE};
use crate::handler::Handler;
use crate::request::Request;
use crate::response::{Discard, ResponseSink};

pub mod limiter;

/// Middleware expressed against the transport-level request and response.
///
/// Implementations either answer through `res` and return, or hand control
/// on by calling `next` with the (possibly modified or wrapped) pair. When
/// `next` returns, the rest of the chain has run.
pub trait HttpMiddleware: Send + Sync + 'static {
    fn handle(
        &self,
        req: &mut Request,
        res: &mut ResponseSink,
        next: &mut dyn FnMut(&mut Request, &mut ResponseSink),
    );
}

/// Converts an [`HttpMiddleware`] into a chain [`Handler`].
///
/// The request and response are lifted out of the context for the duration
/// of the call. If the middleware continues, they are put back (including
/// any replacement it made) before the next handler runs, and lifted out
/// again afterwards. On every path they end up back in the store. If a
/// downstream handler leaves a value of another type under the request key,
/// the middleware keeps the request it handed on.
///
/// If either is missing or mistyped, the handler answers `500` and the chain
/// stops.
pub fn from_http<M: HttpMiddleware>(middleware: M) -> impl Handler {
    move |ctx: &mut Context| {
        let Some(mut req) = ctx.store_mut().take::<Request>(REQUEST) else {
            error!("http middleware: request not found in context");
            ctx.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        };
        let Some(mut res) = ctx.store_mut().take::<ResponseSink>(RESPONSE) else {
            error!("http middleware: response not found in context");
            ctx.set(REQUEST, req);
            ctx.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        };

        middleware.handle(&mut req, &mut res, &mut |req: &mut Request, res: &mut ResponseSink| {
            ctx.set(REQUEST, req.clone());
            ctx.set(RESPONSE, mem::replace(res, Box::new(Discard)));
            ctx.next();
            match ctx.store_mut().take::<Request>(REQUEST) {
                Some(r) => *req = r,
                None => warn!("request replaced downstream with a value of another type"),
            }
            match ctx.store_mut().take::<ResponseSink>(RESPONSE) {
                Some(w) => *res = w,
                None => warn!("response replaced downstream with a value of another type"),
            }
        });

        ctx.bind(req, res);
    }
}

// ── StatusResponses ───────────────────────────────────────────────────────────

/// Custom JSON bodies keyed by status code.
///
/// Codes without an entry get `{"error": <code>, "message": "An error occurred"}`.
///
/// ```rust
/// use http::StatusCode;
/// use serde_json::json;
/// use strand::middleware::StatusResponses;
///
/// let responses = StatusResponses::new()
///     .with(StatusCode::TOO_MANY_REQUESTS, json!({ "error": "slow down" }));
///
/// assert_eq!(responses.body(StatusCode::TOO_MANY_REQUESTS)["error"], "slow down");
/// assert_eq!(responses.body(StatusCode::UNAUTHORIZED)["error"], 401);
/// ```
#[derive(Clone, Debug, Default)]
pub struct StatusResponses {
    bodies: HashMap<StatusCode, Map<String, Value>>,
}

impl StatusResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the body for `code`. Non-object values are wrapped as `{"message": value}`.
    pub fn with(mut self, code: StatusCode, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            other => Map::from_iter([("message".to_owned(), other)]),
        };
        self.bodies.insert(code, body);
        self
    }

    /// The body to send for `code`.
    pub fn body(&self, code: StatusCode) -> Map<String, Value> {
        match self.bodies.get(&code) {
            Some(body) => body.clone(),
            None => default_body(code),
        }
    }

    /// Answers the request with `code` and its body. Does not call `next`.
    pub fn send(&self, ctx: &mut Context, code: StatusCode) {
        let body = self.body(code);
        if let Err(e) = ctx.status(code).json(&body) {
            error!(status = code.as_u16(), "failed to write rejection body: {e}");
        }
    }
}

impl FromIterator<(StatusCode, Value)> for StatusResponses {
    fn from_iter<I: IntoIterator<Item = (StatusCode, Value)>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |acc, (code, body)| acc.with(code, body))
    }
}

fn default_body(code: StatusCode) -> Map<String, Value> {
    match json!({ "error": code.as_u16(), "message": "An error occurred" }) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
