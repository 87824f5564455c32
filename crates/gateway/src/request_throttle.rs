//! Per-IP fixed-window rate limits for the API and the status socket.
//!
//! Limits come from `server.rate_limits`. Each route class has its own
//! window per client address.

use std::{
    net::{IpAddr, SocketAddr},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use {
    axum::{
        extract::{ConnectInfo, State},
        http::{HeaderMap, HeaderValue, Method, StatusCode, header},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    dashmap::{DashMap, mapref::entry::Entry},
    rollcall_config::RateLimitsConfig,
    serde_json::json,
    tracing::debug,
};

use crate::server::AppState;

/// Sweep expired windows once per this many checks.
const SWEEP_INTERVAL: u64 = 512;

/// Headers a reverse proxy uses to pass the client address, most trusted first.
const FORWARDED_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RouteClass {
    AdminLogin,
    Register,
    Api,
    Ws,
}

impl RouteClass {
    /// `None` for routes that are never limited (static files, `/health`).
    fn of(method: &Method, path: &str) -> Option<Self> {
        match (method, path) {
            (&Method::POST, "/api/adminLogin") => Some(Self::AdminLogin),
            (&Method::POST, "/api/register") => Some(Self::Register),
            (_, "/ws") => Some(Self::Ws),
            (_, p) if p.starts_with("/api/") => Some(Self::Api),
            _ => None,
        }
    }
}

/// Per-class request budgets sharing one window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleLimits {
    pub window: Duration,
    pub admin_login: usize,
    pub register: usize,
    pub api: usize,
    pub ws: usize,
}

impl ThrottleLimits {
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs.max(1)),
            admin_login: config.admin_login,
            register: config.register,
            api: config.api,
            ws: config.ws,
        }
    }

    fn budget(&self, class: RouteClass) -> usize {
        match class {
            RouteClass::AdminLogin => self.admin_login,
            RouteClass::Register => self.register,
            RouteClass::Api => self.api,
            RouteClass::Ws => self.ws,
        }
    }
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self::from_config(&RateLimitsConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    used: usize,
}

impl Window {
    fn open(now: Instant) -> Self {
        Self {
            opened_at: now,
            used: 1,
        }
    }

    /// Count one request. `Err` carries the time until the window reopens.
    fn admit(&mut self, now: Instant, budget: usize, length: Duration) -> Result<(), Duration> {
        let age = now.duration_since(self.opened_at);
        if age >= length {
            *self = Self::open(now);
            Ok(())
        } else if self.used < budget {
            self.used += 1;
            Ok(())
        } else {
            Err(length - age)
        }
    }
}

pub struct RequestThrottle {
    limits: ThrottleLimits,
    windows: DashMap<(IpAddr, RouteClass), Window>,
    checks: AtomicU64,
}

impl RequestThrottle {
    #[must_use]
    pub fn new(limits: ThrottleLimits) -> Self {
        Self {
            limits,
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    fn check(&self, ip: IpAddr, class: RouteClass, now: Instant) -> Result<(), Duration> {
        let budget = self.limits.budget(class);
        let length = self.limits.window;
        if budget == 0 {
            return Err(length);
        }

        let verdict = match self.windows.entry((ip, class)) {
            Entry::Occupied(mut window) => window.get_mut().admit(now, budget, length),
            Entry::Vacant(slot) => {
                slot.insert(Window::open(now));
                Ok(())
            },
        };

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.windows
                .retain(|_, w| now.duration_since(w.opened_at) < length);
        }
        verdict
    }
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(ThrottleLimits::default())
    }
}

/// Middleware: answer `429` with `Retry-After` once a client exhausts the
/// budget of the route class it is calling.
pub async fn throttle_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let Some(class) = RouteClass::of(request.method(), path) else {
        return next.run(request).await;
    };

    let gw = &state.gateway;
    let ip = resolve_client_ip(request.headers(), addr, gw.settings.behind_proxy);
    match gw.request_throttle.check(ip, class, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            debug!(ip = %ip, ?class, path, "request throttled");
            too_many_requests(class, retry_after)
        },
    }
}

fn too_many_requests(class: RouteClass, retry_after: Duration) -> Response {
    let secs = retry_after.as_secs().max(1);
    let mut response = if class == RouteClass::Ws {
        (
            StatusCode::TOO_MANY_REQUESTS,
            format!("too many requests, retry after {secs}s"),
        )
            .into_response()
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too many requests, please try again later",
                "retryAfterSeconds": secs,
            })),
        )
            .into_response()
    };
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}

/// The peer address, or the proxy-supplied client address when
/// `behind_proxy` is set.
pub fn resolve_client_ip(headers: &HeaderMap, peer: SocketAddr, behind_proxy: bool) -> IpAddr {
    if !behind_proxy {
        return peer.ip();
    }
    FORWARDED_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok())
        .find_map(|value| value.split(',').find_map(parse_ip))
        .unwrap_or_else(|| peer.ip())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|a| a.ip()))
}
