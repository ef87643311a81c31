//! Per-request context and chain driver.
//!
//! # How the chain advances
//!
//! A context owns a [`Chain`] and a cursor into it. [`Context::next`] runs
//! the handler under the cursor *inline*, after moving the cursor past it:
//!
//! ```text
//! run() → next() → auth(ctx) ──ctx.next()──→ limit(ctx) ──ctx.next()──→ handler(ctx)
//!                       ↑ returns ←──────────────  ↑ returns ←─────────────────┘
//! ```
//!
//! Code after `ctx.next()` in a handler runs once everything downstream has
//! returned, which is how a middleware post-processes. A handler that simply
//! returns without calling `next` short-circuits: nothing after it runs.
//!
//! # Out-of-band state
//!
//! The transport installs three values in the context's [`Store`]:
//!
//! | Key | Type |
//! |---|---|
//! | [`REQUEST`] | [`Request`] |
//! | [`RESPONSE`] | [`ResponseSink`] |
//! | [`APP`] | `Arc<App>` |
//!
//! Accessors read them back with a type check. A missing or mistyped value is
//! [`Error::NotFound`], except where a safe default exists: header and query
//! lookups return `""` and [`Context::response`] hands out a [`Discard`] sink.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::StatusCode;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::app::App;
use crate::error::Error;
use crate::handler::Chain;
use crate::request::Request;
use crate::response::{Discard, ResponseSink, ResponseWriter};
use crate::store::{SharedStore, Store};

/// Store key of the inbound [`Request`].
pub const REQUEST: &str = "request";
/// Store key of the outbound [`ResponseSink`].
pub const RESPONSE: &str = "response";
/// Store key of the `Arc<App>` used for error dispatch.
pub const APP: &str = "app";

/// Where a context is in its traversal of the chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainState {
    /// No handler has run yet.
    Pending,
    /// At least one handler has started and the chain has not returned.
    Advancing,
    /// Every handler was invoked and none of them rejected the request.
    Exhausted,
    /// A handler answered without calling `next`: either handlers were left
    /// uninvoked, or the final handler wrote an error status and returned.
    ShortCircuited,
}

/// Per-request state container and chain driver.
pub struct Context {
    handlers: Chain,
    cursor: usize,
    store: Store,
    finished: bool,
    // Calls to `next`, including no-op calls past the end.
    next_calls: usize,
    status_writes: usize,
    error_writes: usize,
    rejected_at_end: bool,
    dispatching: bool,
    discard: Discard,
}

impl Context {
    /// A context that will run the application's chain.
    ///
    /// The app handle is installed under [`APP`]. The transport still has to
    /// install [`REQUEST`] and [`RESPONSE`] before calling [`run`](Self::run).
    pub fn new(app: Arc<App>) -> Self {
        let handlers = app.chain().clone();
        Self::with_chain(app, handlers)
    }

    /// A context that will run `handlers` instead of the application's chain.
    pub fn with_chain(app: Arc<App>, handlers: Chain) -> Self {
        let mut store = Store::new();
        store.set(APP, app);
        Self {
            handlers,
            cursor: 0,
            store,
            finished: false,
            next_calls: 0,
            status_writes: 0,
            error_writes: 0,
            rejected_at_end: false,
            dispatching: false,
            discard: Discard,
        }
    }

    /// Installs the request and response handles.
    pub fn bind(&mut self, request: Request, response: ResponseSink) {
        self.store.set(REQUEST, request);
        self.store.set(RESPONSE, response);
    }

    // ── Chain driver ──────────────────────────────────────────────────────────

    /// Invokes the next handler in the chain, if any.
    ///
    /// The cursor moves before the handler runs, so a handler calling `next`
    /// reaches the one after it. Once the chain is exhausted, or once
    /// [`run`](Self::run) has returned, this is a no-op.
    pub fn next(&mut self) {
        if self.finished {
            trace!(cursor = self.cursor, "next() after the chain finished");
            return;
        }
        self.next_calls += 1;
        let index = self.cursor;
        let Some(handler) = self.handlers.get(index) else {
            return;
        };
        self.cursor += 1;

        let (calls, errors) = (self.next_calls, self.error_writes);
        handler(self);

        // The final handler has nothing to advance to, so only an error
        // status written without calling `next` marks it as a rejection.
        let last = index + 1 == self.handlers.len();
        if last && self.next_calls == calls && self.error_writes > errors {
            self.rejected_at_end = true;
        }
    }

    /// Runs the chain from the top and marks the context finished.
    ///
    /// This is the transport's entry point. Returns the terminal state.
    pub fn run(&mut self) -> ChainState {
        self.next();
        self.finished = true;
        let state = self.state();
        trace!(?state, invoked = self.cursor, len = self.handlers.len(), "chain returned");
        state
    }

    pub fn state(&self) -> ChainState {
        match (self.finished, self.cursor) {
            (true, c) if c >= self.handlers.len() && !self.rejected_at_end => ChainState::Exhausted,
            (true, _) => ChainState::ShortCircuited,
            (false, 0) => ChainState::Pending,
            (false, _) => ChainState::Advancing,
        }
    }

    /// Number of handlers invoked so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// How many times [`status`](Self::status) was called. More than one
    /// means the request was answered twice.
    pub fn status_writes(&self) -> usize {
        self.status_writes
    }

    // ── Store access ──────────────────────────────────────────────────────────

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Shorthand for `store_mut().set(key, value)`.
    pub fn set<T: std::any::Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.store.set(key, value);
    }

    pub fn request(&self) -> Result<&Request, Error> {
        self.store.get::<Request>(REQUEST).ok_or(Error::NotFound("request"))
    }

    pub fn request_mut(&mut self) -> Result<&mut Request, Error> {
        self.store.get_mut::<Request>(REQUEST).ok_or(Error::NotFound("request"))
    }

    pub fn app(&self) -> Result<&Arc<App>, Error> {
        self.store.get::<Arc<App>>(APP).ok_or(Error::NotFound("app"))
    }

    /// The application-wide store, shared by every request.
    pub fn app_store(&self) -> Result<&SharedStore, Error> {
        Ok(self.app()?.store())
    }

    /// The installed response sink, or a [`Discard`] sink when there is none.
    ///
    /// Never fails: output written through a misconfigured context is lost
    /// rather than crashing the handler.
    pub fn response(&mut self) -> &mut dyn ResponseWriter {
        match self.store.get_mut::<ResponseSink>(RESPONSE) {
            Some(sink) => sink.as_mut(),
            None => &mut self.discard,
        }
    }

    // ── Request helpers ───────────────────────────────────────────────────────

    /// Request header value, or `""` if there is no request or no such header.
    pub fn get(&self, name: &str) -> &str {
        self.request().ok().and_then(|r| r.header(name)).unwrap_or("")
    }

    /// Query parameter, or `""` if there is no request or no such parameter.
    pub fn query(&self, key: &str) -> String {
        self.request().ok().and_then(|r| r.query(key)).unwrap_or_default()
    }

    /// Decodes the first JSON value of the request body into `T`.
    ///
    /// Anything after that value is ignored.
    pub fn body_parser<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let request = self.request()?;
        let mut de = serde_json::Deserializer::from_slice(request.body());
        Ok(T::deserialize(&mut de)?)
    }

    /// Client IP: first valid `X-Forwarded-For` entry, else the peer address.
    ///
    /// Returns `""` when neither is available and fails only if there is no
    /// request in the context.
    pub fn remote_ip(&self) -> Result<String, Error> {
        let request = self.request()?;
        Ok(request.remote_ip().map(|ip| ip.to_string()).unwrap_or_default())
    }

    /// Credentials from an `Authorization: Basic` header.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let value = self.get(AUTHORIZATION.as_str());
        let (scheme, encoded) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_owned(), password.to_owned()))
    }

    // ── Response helpers ──────────────────────────────────────────────────────

    /// Writes the status line, then hands the context to the app's error handler.
    ///
    /// Returns `self` so a body can follow: `ctx.status(code).json(&body)`.
    ///
    /// A `status` call made from inside the error handler only writes the
    /// header; it is not dispatched again.
    pub fn status(&mut self, code: StatusCode) -> &mut Self {
        self.response().write_header(code);
        if self.dispatching {
            warn!(status = code.as_u16(), "status written from the error handler, not dispatched");
            return self;
        }

        self.status_writes += 1;
        if code.is_client_error() || code.is_server_error() {
            self.error_writes += 1;
        }
        if self.status_writes > 1 {
            warn!(status = code.as_u16(), writes = self.status_writes, "response status written more than once");
        }

        match self.app().map(Arc::clone) {
            Ok(app) => {
                self.dispatching = true;
                app.handle_error(code, self);
                self.dispatching = false;
            }
            Err(e) => warn!(status = code.as_u16(), "skipping error dispatch: {e}"),
        }
        self
    }

    /// Serializes `data` as the JSON response body.
    pub fn json<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<(), Error> {
        let body = serde_json::to_vec(data)?;
        let response = self.response();
        response.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.write(&body)?;
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), Error> {
        self.response().write(s.as_bytes())?;
        Ok(())
    }

    /// `status(code)` followed by a plain-text body.
    pub fn send_string(&mut self, code: StatusCode, s: &str) -> Result<(), Error> {
        self.status(code);
        let response = self.response();
        response.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response.write(s.as_bytes())?;
        Ok(())
    }

    /// `status(code)` with no body of its own.
    pub fn send_status(&mut self, code: StatusCode) {
        self.status(code);
    }
}
