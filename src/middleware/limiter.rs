//! Rate-limit gates built on an external quota checker.
//!
//! strand does not count requests. It asks a [`QuotaCheck`] ("has this key
//! used up its allowance?") and turns the answer into control flow:
//!
//! | Outcome | Response | Chain |
//! |---|---|---|
//! | no `Authorization` header | 401 | stops |
//! | quota reached | 429 | stops |
//! | checker failed | 500 | stops |
//! | otherwise | none | `next()` |
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use serde_json::json;
//! use strand::App;
//! use strand::middleware::StatusResponses;
//! use strand::middleware::limiter::{self, Quota, QuotaCheck, BoxError};
//!
//! struct Unlimited;
//!
//! impl QuotaCheck for Unlimited {
//!     fn check(&self, _key: &str, _req: &strand::Request) -> Result<Quota, BoxError> {
//!         Ok(Quota { limit: u64::MAX, remaining: u64::MAX, reached: false })
//!     }
//! }
//!
//! let responses = StatusResponses::new()
//!     .with(StatusCode::TOO_MANY_REQUESTS, json!({ "error": "slow down" }));
//!
//! let app = App::builder()
//!     .handler(limiter::with_authorization(Unlimited, responses))
//!     .on_error(strand::ErrorLog)
//!     .build();
//! ```

use std::sync::Arc;

use http::StatusCode;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tracing::{debug, error};

use crate::context::Context;
use crate::handler::Handler;
use crate::middleware::{HttpMiddleware, StatusResponses};
use crate::request::Request;
use crate::response::ResponseSink;

/// Error type of quota checkers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// State of one key's allowance after a check.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    /// True once the key has exceeded its allowance.
    pub reached: bool,
}

/// "Has this key exceeded its allowed rate?"
///
/// Implementations own their counters and synchronization; a check may block.
pub trait QuotaCheck: Send + Sync + 'static {
    fn check(&self, key: &str, req: &Request) -> Result<Quota, BoxError>;
}

impl<Q: QuotaCheck + ?Sized> QuotaCheck for Arc<Q> {
    fn check(&self, key: &str, req: &Request) -> Result<Quota, BoxError> {
        (**self).check(key, req)
    }
}

/// Requires an `Authorization` header and rate-limits by its value.
///
/// Rejections are answered with `responses` and never call `next`.
pub fn with_authorization<Q: QuotaCheck>(quota: Q, responses: StatusResponses) -> impl Handler {
    move |ctx: &mut Context| {
        let token = ctx.get(AUTHORIZATION.as_str()).to_owned();
        if token.is_empty() {
            debug!("rejecting request without authorization header");
            responses.send(ctx, StatusCode::UNAUTHORIZED);
            return;
        }
        if let Err(code) = limit_by_token(&quota, &token, ctx) {
            responses.send(ctx, code);
            return;
        }
        ctx.next();
    }
}

fn limit_by_token(quota: &impl QuotaCheck, key: &str, ctx: &Context) -> Result<(), StatusCode> {
    let request = ctx.request().map_err(|e| {
        error!("quota check skipped: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let state = quota.check(key, request).map_err(|e| {
        error!("quota check failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if state.reached {
        debug!(limit = state.limit, "rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(())
}

// ── RateLimit ─────────────────────────────────────────────────────────────────

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Transport-level rate limiter keyed by client IP.
///
/// Reports the allowance in `X-RateLimit-Limit` / `X-RateLimit-Remaining`
/// and answers `429` in plain text once it is spent. Embed it in a chain
/// with [`from_http`](crate::middleware::from_http).
pub struct RateLimit<Q> {
    quota: Q,
}

impl<Q: QuotaCheck> RateLimit<Q> {
    pub fn new(quota: Q) -> Self {
        Self { quota }
    }
}

impl<Q: QuotaCheck> HttpMiddleware for RateLimit<Q> {
    fn handle(
        &self,
        req: &mut Request,
        res: &mut ResponseSink,
        next: &mut dyn FnMut(&mut Request, &mut ResponseSink),
    ) {
        let key = req.remote_ip().map(|ip| ip.to_string()).unwrap_or_default();
        let state = match self.quota.check(&key, req) {
            Ok(state) => state,
            Err(e) => {
                error!(%key, "quota check failed: {e}");
                reject(res, StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
                return;
            }
        };

        res.set_header(LIMIT_HEADER, HeaderValue::from(state.limit));
        res.set_header(REMAINING_HEADER, HeaderValue::from(state.remaining));

        if state.reached {
            debug!(%key, "rate limit exceeded");
            reject(res, StatusCode::TOO_MANY_REQUESTS, "Limit exceeded");
            return;
        }
        next(req, res);
    }
}

fn reject(res: &mut ResponseSink, code: StatusCode, body: &str) {
    res.set_header(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res.write_header(code);
    if let Err(e) = res.write(body.as_bytes()) {
        error!("failed to write rejection: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use serde_json::{Value, json};

    use crate::app::{App, ErrorLog};
    use crate::context::ChainState;
    use crate::handler::Chain;
    use crate::middleware::from_http;
    use crate::response::Recorder;

    /// Allows `limit` checks per key.
    struct Counter {
        limit: u64,
        used: Mutex<HashMap<String, u64>>,
    }

    impl Counter {
        fn new(limit: u64) -> Arc<Self> {
            Arc::new(Self { limit, used: Mutex::new(HashMap::new()) })
        }
    }

    impl QuotaCheck for Counter {
        fn check(&self, key: &str, _: &Request) -> Result<Quota, BoxError> {
            let mut used = self.used.lock().unwrap();
            let n = used.entry(key.to_owned()).or_default();
            *n += 1;
            Ok(Quota {
                limit: self.limit,
                remaining: self.limit.saturating_sub(*n),
                reached: *n > self.limit,
            })
        }
    }

    struct Broken;

    impl QuotaCheck for Broken {
        fn check(&self, _: &str, _: &Request) -> Result<Quota, BoxError> {
            Err("store unreachable".into())
        }
    }

    fn counting_tail(hits: Arc<AtomicUsize>) -> impl Handler {
        move |ctx: &mut Context| {
            hits.fetch_add(1, Ordering::SeqCst);
            let _ = ctx.write_string("ok");
        }
    }

    fn run(chain: Chain, headers: &[(&'static str, &str)]) -> (Context, Recorder) {
        let app = Arc::new(App::builder().on_error(ErrorLog).build().unwrap());
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, value.parse().unwrap());
        }
        let req = Request::new(Method::GET, "/".parse().unwrap(), map, Bytes::new())
            .with_remote_addr("192.168.1.5:443".parse().unwrap());
        let rec = Recorder::new();
        let mut ctx = Context::with_chain(app, chain);
        ctx.bind(req, rec.sink());
        ctx.run();
        (ctx, rec)
    }

    fn body(rec: &Recorder) -> Value {
        serde_json::from_slice(&rec.body()).unwrap()
    }

    #[test]
    fn missing_header_is_unauthorized_and_halts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new()
            .with(with_authorization(Counter::new(5), StatusResponses::new()))
            .with(counting_tail(Arc::clone(&hits)));

        let (ctx, rec) = run(chain, &[]);
        assert_eq!(ctx.state(), ChainState::ShortCircuited);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(rec.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(body(&rec), json!({ "error": 401, "message": "An error occurred" }));
        assert_eq!(ctx.status_writes(), 1);
    }

    #[test]
    fn gate_as_the_last_handler_still_reports_the_rejection() {
        let gate = Chain::new().with(with_authorization(Counter::new(5), StatusResponses::new()));

        let (ctx, rec) = run(gate.clone(), &[]);
        assert_eq!(rec.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(ctx.state(), ChainState::ShortCircuited);

        // admitted with nothing after it: the chain simply ran out
        let (ctx, rec) = run(gate, &[("authorization", "token-a")]);
        assert_eq!(rec.status(), None);
        assert_eq!(ctx.state(), ChainState::Exhausted);
    }

    #[test]
    fn missing_header_uses_custom_payload() {
        let responses = StatusResponses::new()
            .with(StatusCode::UNAUTHORIZED, json!({ "error": "token required" }));
        let (_, rec) = run(Chain::new().with(with_authorization(Counter::new(5), responses)), &[]);
        assert_eq!(body(&rec), json!({ "error": "token required" }));
    }

    #[test]
    fn under_quota_calls_next_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new()
            .with(with_authorization(Counter::new(5), StatusResponses::new()))
            .with(counting_tail(Arc::clone(&hits)));

        let (ctx, rec) = run(chain, &[("authorization", "token-a")]);
        assert_eq!(ctx.state(), ChainState::Exhausted);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(rec.body(), b"ok");
        assert_eq!(ctx.status_writes(), 0);
    }

    #[test]
    fn quota_reached_is_too_many_requests() {
        let counter = Counter::new(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let custom = StatusResponses::new()
            .with(StatusCode::TOO_MANY_REQUESTS, json!({ "error": "slow down", "retry": 60 }));
        let chain = Chain::new()
            .with(with_authorization(Arc::clone(&counter), custom))
            .with(counting_tail(Arc::clone(&hits)));

        run(chain.clone(), &[("authorization", "token-a")]);
        let (_, rec) = run(chain.clone(), &[("authorization", "token-a")]);
        assert_eq!(rec.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(body(&rec), json!({ "error": "slow down", "retry": 60 }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // quotas are per token
        let (_, rec) = run(chain, &[("authorization", "token-b")]);
        assert_eq!(rec.body(), b"ok");
    }

    #[test]
    fn quota_reached_without_custom_payload_uses_default() {
        let chain = Chain::new().with(with_authorization(Counter::new(0), StatusResponses::new()));
        let (_, rec) = run(chain, &[("authorization", "t")]);
        assert_eq!(body(&rec), json!({ "error": 429, "message": "An error occurred" }));
    }

    #[test]
    fn checker_failure_is_internal_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new()
            .with(with_authorization(Broken, StatusResponses::new()))
            .with(counting_tail(Arc::clone(&hits)));

        let (_, rec) = run(chain, &[("authorization", "t")]);
        assert_eq!(rec.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(body(&rec)["error"], 500);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ip_rate_limit_through_the_bridge() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new()
            .with(from_http(RateLimit::new(Counter::new(1))))
            .with(counting_tail(Arc::clone(&hits)));

        let (_, rec) = run(chain.clone(), &[]);
        assert_eq!(rec.body(), b"ok");
        assert_eq!(rec.header("x-ratelimit-limit").as_deref(), Some("1"));
        assert_eq!(rec.header("x-ratelimit-remaining").as_deref(), Some("0"));

        let (ctx, rec) = run(chain, &[]);
        assert_eq!(ctx.state(), ChainState::ShortCircuited);
        assert_eq!(rec.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(rec.body(), b"Limit exceeded");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ip_rate_limit_keys_on_forwarded_for() {
        let counter = Counter::new(10);
        let chain = Chain::new().with(from_http(RateLimit::new(Arc::clone(&counter))));
        run(chain, &[("x-forwarded-for", "10.0.0.1, 10.0.0.2")]);
        assert!(counter.used.lock().unwrap().contains_key("10.0.0.1"));
    }

    #[test]
    fn ip_rate_limit_checker_failure() {
        let chain = Chain::new().with(from_http(RateLimit::new(Broken)));
        let (_, rec) = run(chain, &[]);
        assert_eq!(rec.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(rec.header("x-ratelimit-limit"), None);
    }
}
