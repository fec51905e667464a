use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{Query, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tower::ServiceExt;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};

use atticfan_common::{
    Clock, DeviceSimulator, Interception, Interceptor, MockRequest, MockResponse, RequestMethod,
    SimulatorAction, SimulatorOptions, SystemClock, TickOutcome,
};

use crate::settings::SimulatorSettings;

const TICK_PERIOD: Duration = Duration::from_secs(1);
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    simulator: Arc<Mutex<DeviceSimulator>>,
    interceptor: Arc<Interceptor>,
    clock: Arc<dyn Clock>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    upstream: Option<Upstream>,
    web_root: Arc<PathBuf>,
}

#[derive(Clone)]
struct Upstream {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl AppState {
    pub fn new(settings: &SimulatorSettings, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let options = SimulatorOptions {
            history_rows: settings.history_rows,
            ..SimulatorOptions::default()
        };
        let simulator = DeviceSimulator::new(options, clock.now_ms())
            .context("failed to initialise device simulator")?;

        let upstream = match &settings.device_url {
            Some(url) => Some(Upstream::new(url, settings.upstream_timeout)?),
            None => None,
        };

        Ok(Self {
            simulator: Arc::new(Mutex::new(simulator)),
            interceptor: Arc::new(Interceptor::default()),
            clock,
            ticker: Arc::new(Mutex::new(None)),
            upstream,
            web_root: Arc::new(settings.web_root.clone()),
        })
    }

    async fn stop_ticker(&self) {
        if let Some(task) = self.ticker.lock().await.take() {
            task.abort();
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = SimulatorSettings::from_env();
    let app_state = AppState::new(&settings, Arc::new(SystemClock))?;

    match &settings.device_url {
        Some(url) => info!("forwarding unsimulated requests to {url}"),
        None => info!(
            "no device configured, serving unsimulated requests from {}",
            settings.web_root.display()
        ),
    }

    let app = build_router(app_state.clone());
    let listener = TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind simulator server at {}", settings.bind_addr))?;

    info!("attic fan simulator listening on http://{}", settings.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.stop_ticker().await;
    info!("simulator stopped");
    Ok(())
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}

async fn handle_request(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            warn!("failed to read request body for {}: {err}", parts.uri);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mock = mock_request(&parts, &body);
    let interception = {
        let mut simulator = state.simulator.lock().await;
        let interception = state
            .interceptor
            .intercept(&mut simulator, &mock, state.clock.now_ms());
        // Ticker swaps stay under the simulator lock so they land in generation order.
        if let Interception::Handled(handled) = &interception {
            execute_simulator_actions(&state, &handled.actions).await;
        }
        interception
    };

    match interception {
        Interception::Handled(handled) => {
            debug!("simulated {} {}", parts.method, parts.uri);
            into_http_response(handled.response)
        }
        Interception::PassThrough => {
            debug!("passing through {} {}", parts.method, parts.uri);
            pass_through(&state, parts, body).await
        }
    }
}

fn mock_request(parts: &Parts, body: &Bytes) -> MockRequest {
    let query = match parts.uri.query() {
        None => Vec::new(),
        Some(raw) => Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map(|Query(pairs)| pairs)
            // Keep an unparsable query visible so exact-path routes do not match.
            .unwrap_or_else(|_| vec![(raw.to_string(), String::new())]),
    };

    MockRequest {
        method: RequestMethod::parse(parts.method.as_str()),
        path: parts.uri.path().to_string(),
        query,
        body: body.to_vec(),
    }
}

fn into_http_response(response: MockResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, response.body).into_response();
    match response.content_type {
        Some(content_type) => {
            http.headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        None => {
            http.headers_mut().remove(header::CONTENT_TYPE);
        }
    }
    http
}

async fn execute_simulator_actions(state: &AppState, actions: &[SimulatorAction]) {
    for action in actions {
        match *action {
            SimulatorAction::StartTicker { generation } => start_ticker(state, generation).await,
        }
    }
}

/// Replaces the running tick loop with one bound to `generation`.
async fn start_ticker(state: &AppState, generation: u64) {
    let task = tokio::spawn(run_ticker(state.clone(), generation));
    let previous = state.ticker.lock().await.replace(task);
    if let Some(previous) = previous {
        previous.abort();
    }
}

async fn run_ticker(state: AppState, generation: u64) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    // The first tick of a tokio interval completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let outcome = {
            let mut simulator = state.simulator.lock().await;
            simulator.tick(state.clock.now_ms(), generation)
        };

        match outcome {
            TickOutcome::Pending | TickOutcome::Running => {}
            TickOutcome::Completed => {
                debug!("ticker {generation} finished its run");
                break;
            }
            TickOutcome::Stale => {
                debug!("ticker {generation} superseded");
                break;
            }
        }
    }
}

async fn pass_through(state: &AppState, parts: Parts, body: Bytes) -> Response {
    match &state.upstream {
        Some(upstream) => upstream.forward(parts, body).await,
        None => serve_static(&state.web_root, Request::from_parts(parts, Body::from(body))).await,
    }
}

async fn serve_static(web_root: &Path, request: Request) -> Response {
    match ServeDir::new(web_root).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

impl Upstream {
    fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build upstream http client")?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    async fn forward(&self, parts: Parts, body: Bytes) -> Response {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", |value| value.as_str());
        let url = format!("{}{path_and_query}", self.base_url);

        let mut headers = parts.headers;
        headers.remove(header::HOST);

        let result = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await;

        let upstream = match result {
            Ok(upstream) => upstream,
            Err(err) => {
                warn!("upstream request to {url} failed: {err}");
                return (StatusCode::BAD_GATEWAY, err.to_string()).into_response();
            }
        };

        let status = upstream.status();
        let headers = forwardable_headers(upstream.headers());
        match upstream.bytes().await {
            Ok(bytes) => {
                let mut response = (status, bytes).into_response();
                response.headers_mut().extend(headers);
                response
            }
            Err(err) => {
                warn!("failed to read upstream response from {url}: {err}");
                (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
            }
        }
    }
}

fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in [
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::CONTENT_LENGTH,
    ] {
        forwarded.remove(name);
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use atticfan_common::ManualClock;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    const T0: i64 = 1_717_243_200_000;

    fn test_state(history_rows: usize) -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let settings = SimulatorSettings {
            web_root: PathBuf::from("/nonexistent/atticfan-web"),
            history_rows,
            ..SimulatorSettings::default()
        };
        let state = AppState::new(&settings, clock.clone()).unwrap();
        (state, clock)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: &str,
    ) -> (StatusCode, HeaderMap, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn status_json(app: &Router) -> Value {
        let (status, _, body) = send(app, "GET", "/status", "").await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_str(&body).unwrap()
    }

    fn start_timed(delay: u64, duration: u64, post_action: &str) -> String {
        json!({
            "action": "start_timed",
            "delay": delay,
            "duration": duration,
            "postAction": post_action
        })
        .to_string()
    }

    #[tokio::test]
    async fn fan_on_is_reflected_in_status() {
        let (state, _) = test_state(96);
        let app = build_router(state);

        let (status, headers, body) = send(&app, "GET", "/fan?state=on", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert!(headers.get(header::CONTENT_TYPE).is_none());

        let status = status_json(&app).await;
        assert_eq!(status["fanOn"], json!(true));
        assert_eq!(status["fanMode"], json!("MANUAL"));
    }

    #[tokio::test]
    async fn status_is_served_as_json() {
        let (state, _) = test_state(96);
        let app = build_router(state);

        let (status, headers, body) = send(&app, "GET", "/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");

        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["firmwareVersion"], json!("v0.0.0-demo"));
        assert_eq!(body["atticTemp"], json!(95.0));
        assert_eq!(body["outdoorTemp"], json!(92.0));
        assert_eq!(body["timerActive"], json!(false));
    }

    #[tokio::test]
    async fn malformed_config_returns_bad_request() {
        let (state, _) = test_state(96);
        let app = build_router(state);

        let (status, _, body) = send(&app, "POST", "/config", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid JSON");

        let (_, _, body) = send(&app, "GET", "/config", "").await;
        let config: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(config["fanOnTemp"], json!(95.0));
    }

    #[tokio::test]
    async fn config_post_merges_keys() {
        let (state, _) = test_state(96);
        let app = build_router(state);

        let (status, _, body) = send(&app, "POST", "/config", r#"{"fanHysteresis": 3}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Configuration saved. Changes will apply on the next cycle.");

        let (_, _, body) = send(&app, "GET", "/config", "").await;
        let config: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(config["fanHysteresis"], json!(3));
        assert_eq!(config["fanOnTemp"], json!(95.0));
    }

    #[tokio::test]
    async fn history_can_be_header_only() {
        let (state, _) = test_state(0);
        let app = build_router(state);

        let (status, headers, body) = send(&app, "GET", "/history.csv", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
        assert_eq!(body.lines().count(), 1);
    }

    #[tokio::test]
    async fn unsimulated_requests_fall_through_to_static_files() {
        let (state, _) = test_state(96);
        let app = build_router(state);

        for uri in ["/weather", "/system_info", "/fan?state=turbo", "/status?cache=no"] {
            let (status, _, _) = send(&app, "GET", uri, "").await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }

        let status = status_json(&app).await;
        assert_eq!(status["fanMode"], json!("AUTO"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_run_completes_and_reverts_to_auto() {
        let (state, clock) = test_state(96);
        let app = build_router(state);

        let (status, _, body) = send(&app, "POST", "/fan", &start_timed(0, 1, "go_auto")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let status = status_json(&app).await;
        assert_eq!(status["fanOn"], json!(true));
        assert_eq!(status["timerActive"], json!(true));
        assert_eq!(status["timerRemainingSec"], json!(60));

        clock.advance(60_000);
        tokio::time::sleep(TICK_PERIOD + Duration::from_millis(100)).await;

        let status = status_json(&app).await;
        assert_eq!(status["fanOn"], json!(false));
        assert_eq!(status["fanMode"], json!("AUTO"));
        assert_eq!(status["timerActive"], json!(false));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_run_turns_fan_on_at_start() {
        let (state, clock) = test_state(96);
        let app = build_router(state);

        send(&app, "POST", "/fan", &start_timed(1, 5, "stay_manual")).await;
        tokio::time::sleep(TICK_PERIOD * 2).await;

        let status = status_json(&app).await;
        assert_eq!(status["fanOn"], json!(false));
        assert_eq!(status["timerMode"], json!("delay"));

        clock.advance(60_000);
        tokio::time::sleep(TICK_PERIOD + Duration::from_millis(100)).await;

        let status = status_json(&app).await;
        assert_eq!(status["fanOn"], json!(true));
        assert_eq!(status["fanMode"], json!("MANUAL"));
        assert_eq!(status["timerMode"], json!("run"));
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_run_replaces_the_ticker() {
        let (state, clock) = test_state(96);
        let app = build_router(state.clone());

        send(&app, "POST", "/fan", &start_timed(0, 1, "go_auto")).await;
        let first = state.simulator.lock().await.state().timer.unwrap();

        send(&app, "POST", "/fan", &start_timed(0, 10, "stay_manual")).await;
        let second = state.simulator.lock().await.state().timer.unwrap();
        assert_ne!(first.generation, second.generation);

        // Past the first run's end: only the replacement run may act.
        clock.advance(61_000);
        tokio::time::sleep(TICK_PERIOD * 3).await;

        let status = status_json(&app).await;
        assert_eq!(status["fanOn"], json!(true));
        assert_eq!(status["fanMode"], json!("MANUAL"));
        assert_eq!(status["timerActive"], json!(true));
        assert_eq!(status["timerRemainingSec"], json!(539));

        let ticker = state.ticker.lock().await;
        assert!(ticker.as_ref().is_some_and(|task| !task.is_finished()));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_leave_the_current_run_ticking() {
        let (state, clock) = test_state(96);
        let app = build_router(state.clone());

        let long_run = start_timed(0, 10, "stay_manual");
        let short_run = start_timed(0, 1, "go_auto");
        tokio::join!(
            send(&app, "POST", "/fan", &long_run),
            send(&app, "POST", "/fan", &short_run),
        );

        clock.advance(600_000);
        tokio::time::sleep(TICK_PERIOD + Duration::from_millis(100)).await;

        assert_eq!(state.simulator.lock().await.state().timer, None);
        let ticker = state.ticker.lock().await;
        assert!(ticker.as_ref().is_some_and(|task| task.is_finished()));
    }

    async fn echo(request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await.unwrap();
        let status = if parts.uri.path() == "/missing" {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        };
        let echoed = format!(
            "{} {} {}",
            parts.method,
            parts.uri,
            String::from_utf8_lossy(&body)
        );
        (status, [(header::CONTENT_TYPE, "text/x-echo")], echoed).into_response()
    }

    async fn spawn_device() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().fallback(echo))
                .await
                .unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn unsimulated_requests_reach_the_device_unchanged() {
        let clock = Arc::new(ManualClock::new(T0));
        let settings = SimulatorSettings {
            device_url: Some(spawn_device().await),
            ..SimulatorSettings::default()
        };
        let app = build_router(AppState::new(&settings, clock).unwrap());

        let cases = [
            ("GET", "/weather?x=1", "", "GET /weather?x=1 "),
            ("POST", "/restart", "abc", "POST /restart abc"),
            ("GET", "/status?nocache=1", "", "GET /status?nocache=1 "),
        ];
        for (method, uri, body, expected) in cases {
            let (status, headers, echoed) = send(&app, method, uri, body).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(headers[header::CONTENT_TYPE], "text/x-echo");
            assert_eq!(echoed, expected);
        }

        let (status, _, echoed) = send(&app, "GET", "/missing", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(echoed, "GET /missing ");

        // Simulated routes never reach the device.
        let (status, headers, _) = send(&app, "GET", "/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn unreachable_device_is_a_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let clock = Arc::new(ManualClock::new(T0));
        let settings = SimulatorSettings {
            device_url: Some(format!("http://{addr}")),
            ..SimulatorSettings::default()
        };
        let app = build_router(AppState::new(&settings, clock).unwrap());

        let (status, _, _) = send(&app, "GET", "/weather", "").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unknown_fan_action_is_rejected() {
        let (state, _) = test_state(96);
        let app = build_router(state);

        let (status, _, body) = send(&app, "POST", "/fan", r#"{"action": "boost"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Unknown action");
    }
}
