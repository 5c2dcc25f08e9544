use super::*;

use axum::http::HeaderMap;
use std::time::{Duration, Instant};

use crate::context::lock;

const RATE_WINDOW: Duration = Duration::from_secs(1);
const MAX_TRACKED_CLIENTS: usize = 4096;
const STALE_CLIENT_AFTER: Duration = Duration::from_secs(10);

/// Token check and per-client request budget applied to every route.
#[derive(Clone)]
pub(super) struct ApiSecurity {
    pub required_token: Option<String>,
    pub rate_limit_per_sec: u32,
    pub buckets: Arc<Mutex<HashMap<String, RateBucket>>>,
}

pub(super) struct RateBucket {
    window_start: Instant,
    count: u32,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Credentials the caller sent, as a bearer token and/or an `x-api-key`.
fn presented_tokens<'a>(headers: &'a HeaderMap) -> impl Iterator<Item = &'a str> + 'a {
    let bearer = header(headers, "authorization").map(|auth| {
        auth.strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .unwrap_or(auth)
            .trim()
    });
    bearer.into_iter().chain(header(headers, "x-api-key"))
}

/// Rate-limit key: the first forwarded client address, else one shared
/// bucket for direct local callers.
fn client_key(headers: &HeaderMap) -> String {
    header(headers, "x-forwarded-for")
        .or_else(|| header(headers, "x-real-ip"))
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("local")
        .to_string()
}

fn rejection(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(Response::error(message))).into_response()
}

impl ApiSecurity {
    pub(super) fn from_config(config: &BridgeConfig) -> Self {
        if config.api_token.is_none() {
            warn!("[Switchboard API] No SWITCHBOARD_API_TOKEN set; accepting unauthenticated requests");
        }
        Self {
            required_token: config.api_token.clone(),
            rate_limit_per_sec: config.rate_limit_per_sec.max(1),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match self.required_token.as_deref() {
            None => true,
            Some(expected) => presented_tokens(headers).any(|token| token == expected),
        }
    }

    /// Counts one request against `client`'s budget for the current window.
    fn admit(&self, client: String, now: Instant) -> bool {
        let mut buckets = lock(&self.buckets);
        if buckets.len() > MAX_TRACKED_CLIENTS {
            buckets.retain(|_, b| now.duration_since(b.window_start) < STALE_CLIENT_AFTER);
        }
        let bucket = buckets.entry(client).or_insert(RateBucket {
            window_start: now,
            count: 0,
        });
        if now.duration_since(bucket.window_start) >= RATE_WINDOW {
            bucket.window_start = now;
            bucket.count = 0;
        }
        bucket.count = bucket.count.saturating_add(1);
        bucket.count <= self.rate_limit_per_sec
    }
}

pub(super) async fn api_guard(
    State(security): State<ApiSecurity>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    if !security.authorized(req.headers()) {
        return rejection(
            StatusCode::UNAUTHORIZED,
            "Unauthorized: send Authorization: Bearer <SWITCHBOARD_API_TOKEN> or x-api-key",
        );
    }
    if !security.admit(client_key(req.headers()), Instant::now()) {
        debug!("[Switchboard API] Rate limit hit");
        return rejection(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use tower::util::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    fn guarded_app(token: Option<&str>, rate_limit_per_sec: u32) -> Router {
        let config = BridgeConfig {
            api_token: token.map(str::to_string),
            rate_limit_per_sec,
            ..Default::default()
        };
        Router::new()
            .route("/", get(ok_handler))
            .layer(middleware::from_fn_with_state(
                ApiSecurity::from_config(&config),
                api_guard,
            ))
    }

    fn request(headers: &[(&str, &str)]) -> HttpRequest<axum::body::Body> {
        let mut builder = HttpRequest::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(axum::body::Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn rejects_when_token_missing_or_invalid() {
        let app = guarded_app(Some("secret"), 100);

        let res = app.clone().oneshot(request(&[])).await.expect("response");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res_bad = app
            .oneshot(request(&[("authorization", "Bearer nope")]))
            .await
            .expect("response");
        assert_eq!(res_bad.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_api_key_header() {
        let app = guarded_app(Some("secret"), 100);
        let res = app
            .oneshot(request(&[("x-api-key", "secret")]))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn allows_valid_token_and_applies_rate_limit() {
        let app = guarded_app(Some("secret"), 1);
        let headers = [("authorization", "Bearer secret"), ("x-real-ip", "127.0.0.1")];

        let res_ok = app.clone().oneshot(request(&headers)).await.expect("response");
        assert_eq!(res_ok.status(), StatusCode::OK);

        let res_limited = app.oneshot(request(&headers)).await.expect("response");
        assert_eq!(res_limited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn forwarded_client_uses_first_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.7, 172.16.0.1".parse().expect("header"));
        assert_eq!(client_key(&headers), "10.0.0.7");
        assert_eq!(client_key(&HeaderMap::new()), "local");
    }

    #[test]
    fn budget_resets_after_the_window() {
        let security = ApiSecurity::from_config(&BridgeConfig {
            rate_limit_per_sec: 2,
            ..Default::default()
        });
        let start = Instant::now();
        assert!(security.admit("a".into(), start));
        assert!(security.admit("a".into(), start));
        assert!(!security.admit("a".into(), start));
        assert!(security.admit("b".into(), start));
        assert!(security.admit("a".into(), start + RATE_WINDOW));
    }

    #[tokio::test]
    async fn open_when_no_token_configured() {
        let app = guarded_app(None, 100);
        let res = app.oneshot(request(&[])).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);
    }
}
