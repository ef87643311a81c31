//! Minimal strand demo: token auth, IP rate limiting and a JSON endpoint.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i -H 'authorization: secret' 'http://localhost:3000/?name=ada'
//!   curl -i -H 'authorization: secret' -d '{"name":"bob"}' http://localhost:3000/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use strand::middleware::limiter::{self, BoxError, Quota, QuotaCheck, RateLimit};
use strand::middleware::{StatusResponses, from_http};
use strand::{App, Context, Request, Server};

#[tokio::main]
async fn main() -> Result<(), strand::Error> {
    tracing_subscriber::fmt::init();

    let per_token = Arc::new(FixedWindow::new(10, Duration::from_secs(60)));
    let per_ip = Arc::new(FixedWindow::new(100, Duration::from_secs(60)));

    let responses = StatusResponses::new()
        .with(StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized", "message": "send an authorization header" }))
        .with(StatusCode::TOO_MANY_REQUESTS, json!({ "error": "rate_limited", "message": "try again in a minute" }));

    let app = App::builder()
        .handler(from_http(RateLimit::new(per_ip)))
        .handler(limiter::with_authorization(per_token, responses))
        .handler(greet)
        .on_error(render_error)
        .build()?;

    Server::bind("0.0.0.0:3000").serve(app).await
}

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

fn greet(ctx: &mut Context) {
    let name = match ctx.body_parser::<Greeting>() {
        Ok(g) => g.name,
        Err(_) => ctx.query("name"),
    };
    let ip = ctx.remote_ip().unwrap_or_default();
    if let Err(e) = ctx.json(&json!({ "hello": name, "from": ip })) {
        tracing::error!("failed to write greeting: {e}");
    }
}

// Bodies for JSON rejections are written by the caller; only log here.
fn render_error(code: StatusCode, ctx: &mut Context) {
    let ip = ctx.remote_ip().unwrap_or_default();
    tracing::info!(status = code.as_u16(), %ip, "rejected");
}

/// Fixed-window counter: `limit` requests per key per `window`.
struct FixedWindow {
    limit: u64,
    window: Duration,
    counters: Mutex<HashMap<String, (u64, Instant)>>,
}

impl FixedWindow {
    fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window, counters: Mutex::new(HashMap::new()) }
    }
}

impl QuotaCheck for FixedWindow {
    fn check(&self, key: &str, _: &Request) -> Result<Quota, BoxError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().map_err(|_| "rate limiter state poisoned")?;
        let (count, started) = counters.entry(key.to_owned()).or_insert((0, now));
        if now.duration_since(*started) >= self.window {
            *count = 0;
            *started = now;
        }
        *count += 1;
        Ok(Quota {
            limit: self.limit,
            remaining: self.limit.saturating_sub(*count),
            reached: *count > self.limit,
        })
    }
}
