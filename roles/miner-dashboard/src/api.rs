use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Body,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    collections::HashMap,
    convert::Infallible,
    path::Path,
    sync::Arc,
};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, error, info};

use miner_stats::{
    fetch::FetchError, history::DEFAULT_WINDOW_HOURS, resolve_pool_url, unix_timestamp,
    HttpFetcher, MinerReading,
};

use crate::DashboardState;

pub async fn run_http_server(
    address: String,
    state: Arc<DashboardState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(&address).await?;
    info!("🌐 Miner dashboard listening on http://{}", address);
    serve(listener, state).await
}

/// Accept connections on an already bound listener until it fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<DashboardState>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, state).await }
            });

            if let Err(err) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}

pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<DashboardState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let params = QueryParams::parse(req.uri().query());

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => empty(StatusCode::OK),
        (&Method::GET, "/proxy") => proxy_miner(&state, &params).await,
        (&Method::GET, "/pool-api") => proxy_pool(&state, &params).await,
        (&Method::GET, "/history/miner") => miner_history(&state, &params).await,
        (&Method::GET, "/history/all") => all_miners_history(&state, &params).await,
        (&Method::GET, "/history/total") => total_history(&state, &params).await,
        (&Method::GET, "/db/stats") => store_statistics(&state).await,
        (&Method::POST, "/save") => save_reading(&state, req.into_body()).await,
        (&Method::GET, path) => serve_static(&state.static_dir, path).await,
        _ => empty(StatusCode::NOT_FOUND),
    };

    Ok(with_common_headers(response))
}

/// Decoded query string. Parameters with empty values count as absent.
struct QueryParams(HashMap<String, String>);

impl QueryParams {
    fn parse(query: Option<&str>) -> Self {
        let pairs = url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
            .into_owned()
            .collect();
        Self(pairs)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn window_hours(&self) -> Result<u64, Response<Full<Bytes>>> {
        match self.get("hours") {
            None => Ok(DEFAULT_WINDOW_HOURS),
            Some(hours) => hours
                .parse()
                .map_err(|_| json_error(StatusCode::BAD_REQUEST, "Invalid 'hours' parameter")),
        }
    }
}

fn with_common_headers(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    response
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_ok<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(StatusCode::OK, "application/json", Bytes::from(body)),
        Err(e) => {
            error!("Error serializing response: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed")
        }
    }
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = json!({ "error": message }).to_string();
    respond(status, "application/json", Bytes::from(body))
}

async fn proxy_miner(state: &DashboardState, params: &QueryParams) -> Response<Full<Bytes>> {
    let Some(target) = params.get("url") else {
        return json_error(StatusCode::BAD_REQUEST, "Missing 'url' parameter");
    };

    let fetcher = state.fetcher.clone();
    let result = state
        .cache
        .fetch_with_cache(target, move |url| async move {
            fetcher.fetch_status(&url).await
        })
        .await;

    match result {
        Ok(cached) => {
            let mut response = json_ok(&cached.reading);
            let cache_status = if cached.from_cache { "HIT" } else { "MISS" };
            response
                .headers_mut()
                .insert("x-cache", HeaderValue::from_static(cache_status));
            response
        }
        Err(e) => {
            error!("Proxy error for {}: {}", target, e);
            let body = match e.status_code() {
                Some(code) => json!({ "error": format!("HTTP {}", code), "code": code }),
                None => json!({ "error": e.to_string() }),
            };
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                Bytes::from(body.to_string()),
            )
        }
    }
}

async fn proxy_pool(state: &DashboardState, params: &QueryParams) -> Response<Full<Bytes>> {
    let Some(wallet) = params.get("wallet") else {
        return json_error(StatusCode::BAD_REQUEST, "Missing wallet parameter");
    };
    let pool = params.get("pool").unwrap_or(state.default_pool.as_str());
    let pool_url = resolve_pool_url(wallet, Some(pool));

    relay_pool_stats(&state.fetcher, &pool_url).await
}

/// Pass a pool API answer through. Upstream error statuses are kept.
async fn relay_pool_stats(fetcher: &HttpFetcher, pool_url: &str) -> Response<Full<Bytes>> {
    info!("Fetching pool data from: {}", pool_url);

    match fetcher.fetch_pool_stats(pool_url).await {
        Ok(body) => respond(StatusCode::OK, "application/json", body),
        Err(FetchError::Status { code, reason }) => {
            error!("Pool API HTTP error: {} - {}", code, reason);
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY);
            json_error(status, &format!("Pool API error: {}", reason))
        }
        Err(e) => {
            error!("Pool API error: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn miner_history(state: &DashboardState, params: &QueryParams) -> Response<Full<Bytes>> {
    let Some(device_id) = params.get("ip") else {
        return json_error(StatusCode::BAD_REQUEST, "Missing 'ip' parameter");
    };
    let hours = match params.window_hours() {
        Ok(hours) => hours,
        Err(response) => return response,
    };

    match state.history.miner_history(device_id, hours).await {
        Ok(points) => json_ok(&points),
        Err(e) => {
            error!("Error querying history for {}: {}", device_id, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn all_miners_history(
    state: &DashboardState,
    params: &QueryParams,
) -> Response<Full<Bytes>> {
    let hours = match params.window_hours() {
        Ok(hours) => hours,
        Err(response) => return response,
    };

    match state.history.all_miners_history(hours).await {
        Ok(miners) => json_ok(&miners),
        Err(e) => {
            error!("Error querying history for all miners: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn total_history(state: &DashboardState, params: &QueryParams) -> Response<Full<Bytes>> {
    let hours = match params.window_hours() {
        Ok(hours) => hours,
        Err(response) => return response,
    };

    match state.history.total_stats_history(hours).await {
        Ok(points) => json_ok(&points),
        Err(e) => {
            error!("Error querying fleet totals: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn store_statistics(state: &DashboardState) -> Response<Full<Bytes>> {
    match state.store.statistics().await {
        Ok(stats) => json_ok(&stats),
        Err(e) => {
            error!("Error reading store statistics: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Body posted by the dashboard after each poll of a miner.
#[derive(Debug, Deserialize)]
struct SaveRequest {
    ip: Option<String>,
    name: Option<String>,
    #[serde(default)]
    data: MinerReading,
}

async fn save_reading<B>(state: &DashboardState, body: B) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("Error reading save request body: {}", e);
            return json_error(StatusCode::BAD_REQUEST, "Unreadable request body");
        }
    };

    let request: SaveRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejecting malformed save request: {}", e);
            return json_error(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {}", e));
        }
    };

    let Some(device_id) = request.ip.as_deref().filter(|ip| !ip.is_empty()) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing 'ip' field");
    };

    match state
        .store
        .append_reading(
            device_id,
            request.name.as_deref(),
            &request.data,
            unix_timestamp(),
        )
        .await
    {
        Ok(()) => json_ok(&json!({ "success": true })),
        Err(e) => {
            error!("Error saving reading for {}: {}", device_id, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Serve a dashboard asset from `root`. `/` maps to `index.html`; paths
/// escaping the root and missing files are 404.
async fn serve_static(root: &Path, request_path: &str) -> Response<Full<Bytes>> {
    let request = match Request::get(request_path).body(()) {
        Ok(request) => request,
        Err(_) => return empty(StatusCode::NOT_FOUND),
    };

    let response = match ServeDir::new(root).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let (parts, body) = response.into_parts();
    match body.collect().await {
        Ok(collected) => Response::from_parts(parts, Full::new(collected.to_bytes())),
        Err(e) => {
            error!("Error reading static file {}: {}", request_path, e);
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miner_stats::SqliteStorage;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const STATUS_PAGE: &str = "<html><body>\
        <p>Hash rate</p><span class=\"val\">52.5 KH/s</span>\
        <p>Accepted shares</p><span class=\"val\">17</span>\
        </body></html>";

    async fn state(temp_dir: &TempDir) -> Arc<DashboardState> {
        state_with_ttl(temp_dir, Duration::from_secs(60)).await
    }

    async fn state_with_ttl(temp_dir: &TempDir, cache_ttl: Duration) -> Arc<DashboardState> {
        let store = Arc::new(
            SqliteStorage::new(temp_dir.path().join("history.db"))
                .await
                .unwrap(),
        );
        let fetcher = HttpFetcher::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        let static_dir = temp_dir.path().join("static");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<h1>dashboard</h1>").unwrap();
        Arc::new(DashboardState::new(
            store,
            fetcher,
            cache_ttl,
            "public-pool.io:40557".to_string(),
            static_dir,
        ))
    }

    async fn call(
        state: &Arc<DashboardState>,
        method: Method,
        uri: &str,
        body: &str,
    ) -> Response<Full<Bytes>> {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();
        handle_request(req, state.clone()).await.unwrap()
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Serve one raw HTTP response on a local port; returns the base URL.
    async fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let response = call(&state, Method::OPTIONS, "/anything", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, OPTIONS"
        );
    }

    #[tokio::test]
    async fn test_proxy_requires_url() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let response = call(&state, Method::GET, "/proxy", "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_proxy_miss_then_hit() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let miner = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n{}",
            STATUS_PAGE
        ))
        .await;
        let encoded: String = url::form_urlencoded::byte_serialize(miner.as_bytes()).collect();
        let uri = format!("/proxy?url={}", encoded);

        let first = call(&state, Method::GET, &uri, "").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-cache"], "MISS");
        assert_eq!(
            first.headers()[header::CACHE_CONTROL],
            "no-store, no-cache, must-revalidate"
        );
        let reading = body_json(first).await;
        assert_eq!(reading["hashrate"], 52_500.0);
        assert_eq!(reading["acceptedShares"], 17);

        // The mock is gone; a hit must not touch the network
        let second = call(&state, Method::GET, &uri, "").await;
        assert_eq!(second.headers()["x-cache"], "HIT");
        assert_eq!(body_json(second).await, reading);
    }

    #[tokio::test]
    async fn test_proxy_reports_upstream_status() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let miner = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        )
        .await;
        let uri = format!("/proxy?url={}", miner);

        let response = call(&state, Method::GET, &uri, "").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "HTTP 503");
        assert_eq!(body["code"], 503);
    }

    #[tokio::test]
    async fn test_proxy_serves_stale_reading_when_miner_stops_answering() {
        let temp_dir = TempDir::new().unwrap();
        // Zero TTL: every request goes upstream
        let state = state_with_ttl(&temp_dir, Duration::ZERO).await;

        let miner = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n{}",
            STATUS_PAGE
        ))
        .await;
        let uri = format!("/proxy?url={}", miner);

        let first = call(&state, Method::GET, &uri, "").await;
        assert_eq!(first.headers()["x-cache"], "MISS");
        let reading = body_json(first).await;

        // The mock accepted its only connection; the port now refuses
        let stale = call(&state, Method::GET, &uri, "").await;
        assert_eq!(stale.status(), StatusCode::OK);
        assert_eq!(stale.headers()["x-cache"], "HIT");
        assert_eq!(body_json(stale).await, reading);
    }

    #[tokio::test]
    async fn test_proxy_connection_error_body() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let response = call(&state, Method::GET, "/proxy?url=http://127.0.0.1:1/", "").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("connection failed"));
        assert!(body.get("code").is_none());
    }

    #[tokio::test]
    async fn test_pool_error_status_is_passed_through() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let pool = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        )
        .await;

        let response = relay_pool_stats(&state.fetcher, &format!("{}api/client/abc", pool)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Pool API error: Not Found" })
        );
    }

    #[tokio::test]
    async fn test_pool_body_is_relayed() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let pool = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{\"bestDifficulty\":12.5}"
                .to_string(),
        )
        .await;

        let response = relay_pool_stats(&state.fetcher, &format!("{}api/client/abc", pool)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "bestDifficulty": 12.5 }));
    }

    #[tokio::test]
    async fn test_pool_api_requires_wallet() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let response = call(&state, Method::GET, "/pool-api?pool=public-pool.io", "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Missing wallet parameter" })
        );
    }

    #[tokio::test]
    async fn test_save_then_query_history() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let payload = json!({
            "ip": "10.0.0.5",
            "name": "bench",
            "data": { "status": "online", "hashrate": 48000.0, "acceptedShares": 3 }
        });
        let response = call(&state, Method::POST, "/save", &payload.to_string()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "success": true }));

        let response = call(&state, Method::GET, "/history/miner?ip=10.0.0.5&hours=1", "").await;
        let history = body_json(response).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["status"], "online");
        assert_eq!(history[0]["hashrate"], 48000.0);
        assert_eq!(history[0]["temperature"], serde_json::Value::Null);

        let response = call(&state, Method::GET, "/history/all", "").await;
        let all = body_json(response).await;
        assert_eq!(all["10.0.0.5"]["name"], "bench");

        let response = call(&state, Method::GET, "/history/total", "").await;
        let totals = body_json(response).await;
        assert_eq!(totals[0]["total_hashrate"], 48000.0);
        assert_eq!(totals[0]["active_miners"], 1);

        let response = call(&state, Method::GET, "/db/stats", "").await;
        let stats = body_json(response).await;
        assert_eq!(stats["total_records"], 1);
        assert_eq!(stats["total_miners"], 1);
    }

    #[tokio::test]
    async fn test_save_rejects_bad_requests() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let response = call(&state, Method::POST, "/save", r#"{"data":{}}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = call(&state, Method::POST, "/save", "not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_null_status_is_offline() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let payload = r#"{"ip":"10.0.0.5","data":{"status":null,"hashrate":1.0}}"#;
        let response = call(&state, Method::POST, "/save", payload).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(&state, Method::GET, "/history/miner?ip=10.0.0.5", "").await;
        let history = body_json(response).await;
        assert_eq!(history[0]["status"], "offline");
        assert_eq!(history[0]["hashrate"], 1.0);
    }

    #[tokio::test]
    async fn test_history_hours_must_be_numeric() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let response = call(&state, Method::GET, "/history/total?hours=day", "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = call(&state, Method::GET, "/history/miner?hours=1", "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_static_files() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir).await;

        let response = call(&state, Method::GET, "/", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<h1>dashboard</h1>");

        let response = call(&state, Method::GET, "/../history.db", "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = call(&state, Method::GET, "/missing.js", "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = call(&state, Method::DELETE, "/", "").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_query_params_decode() {
        let params = QueryParams::parse(Some("url=http%3A%2F%2F10.0.0.5%2F&hours="));
        assert_eq!(params.get("url"), Some("http://10.0.0.5/"));
        assert_eq!(params.get("hours"), None);
        assert_eq!(params.window_hours().ok(), Some(DEFAULT_WINDOW_HOURS));
    }
}
