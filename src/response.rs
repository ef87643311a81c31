//! Outbound response sinks.
//!
//! Handlers never build a response value and return it. They write into a
//! [`ResponseWriter`] installed in the context: status first, then headers,
//! then body bytes. Two sinks ship with the crate:
//!
//! - [`Recorder`] buffers everything and turns it into an `http::Response`
//!   once the chain returns. The server uses it; so do tests.
//! - [`Discard`] swallows everything. The context hands it out when no sink
//!   is installed so handlers never need to branch on "is there a response?".

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

/// The write side of an HTTP exchange.
pub trait ResponseWriter: Send {
    /// Snapshot of the headers set so far.
    fn headers(&self) -> HeaderMap;

    /// Sets (replaces) a response header.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Writes the status line. Only the first call takes effect.
    fn write_header(&mut self, status: StatusCode);

    /// Appends body bytes, implying `200 OK` if no status was written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Owned, type-erased sink as stored under [`RESPONSE`](crate::RESPONSE).
pub type ResponseSink = Box<dyn ResponseWriter>;

// ── Discard ───────────────────────────────────────────────────────────────────

/// A sink that accepts and drops everything.
///
/// Writes report the full length as written so callers see success.
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl ResponseWriter for Discard {
    fn headers(&self) -> HeaderMap { HeaderMap::new() }
    fn set_header(&mut self, _: HeaderName, _: HeaderValue) {}
    fn write_header(&mut self, _: StatusCode) {}
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { Ok(buf.len()) }
}

// ── Recorder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Recorded {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// A buffering sink shared between the transport and the chain.
///
/// Clones share the same buffer: the server keeps one clone, installs another
/// in the context, and reads the result back after the chain has returned.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxes a clone of this recorder for installation in a context.
    pub fn sink(&self) -> ResponseSink {
        Box::new(self.clone())
    }

    /// The status written so far, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    pub fn body(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let inner = self.lock();
        inner.headers.get(name)?.to_str().ok().map(str::to_owned)
    }

    /// Builds the final response. Status defaults to `200 OK`.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let recorded = std::mem::take(&mut *self.lock());
        let mut response = http::Response::new(Full::new(Bytes::from(recorded.body)));
        *response.status_mut() = recorded.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = recorded.headers;
        response
    }

    // A panicking handler must not make the response unreadable.
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseWriter for Recorder {
    fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.insert(name, value);
    }

    fn write_header(&mut self, status: StatusCode) {
        let mut inner = self.lock();
        match inner.status {
            Some(prev) => tracing::warn!(%prev, ignored = %status, "superfluous write_header"),
            None => inner.status = Some(status),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        inner.status.get_or_insert(StatusCode::OK);
        inner.body.extend_from_slice(buf);
        Ok(buf.len())
    }
}
