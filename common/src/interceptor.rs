//! Request interception for the simulated device.
//!
//! Incoming requests are checked against an ordered route table. Query
//! commands are listed first, then exact paths, then the generic `/fan`
//! POST. The first match answers from the [`DeviceSimulator`]. Anything
//! unmatched is handed back as [`Interception::PassThrough`] so the caller can
//! forward it untouched.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    endpoints::{
        ACTION_START_TIMED, CONTENT_TYPE_CSV, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, PATH_CONFIG,
        PATH_FAN, PATH_HISTORY, PATH_INDOOR_SENSORS, PATH_STATUS, QUERY_STATE, STATE_AUTO,
        STATE_OFF, STATE_ON, STATE_PING,
    },
    error::SimulatorError,
    simulator::{DeviceSimulator, SimulatorAction},
    types::PostAction,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Other(String),
}

impl RequestMethod {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub method: RequestMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: RequestMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: RequestMethod::Post,
            path: path.into(),
            query: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: String,
}

impl MockResponse {
    pub fn empty() -> Self {
        Self {
            status: 200,
            content_type: None,
            body: String::new(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some(CONTENT_TYPE_TEXT),
            body: body.into(),
        }
    }

    pub fn json(body: String) -> Self {
        Self {
            status: 200,
            content_type: Some(CONTENT_TYPE_JSON),
            body,
        }
    }

    pub fn csv(body: String) -> Self {
        Self {
            status: 200,
            content_type: Some(CONTENT_TYPE_CSV),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub response: MockResponse,
    pub actions: Vec<SimulatorAction>,
}

impl From<MockResponse> for Handled {
    fn from(response: MockResponse) -> Self {
        Self {
            response,
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    Handled(Handled),
    PassThrough,
}

type Handler = fn(&mut DeviceSimulator, &MockRequest, i64) -> Result<Handled, SimulatorError>;

#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// Exact path plus one query parameter with an exact value.
    Query {
        path: &'static str,
        key: &'static str,
        value: &'static str,
    },
    /// Exact path with no query string.
    Exact(&'static str),
    /// Exact path, any query string.
    Path(&'static str),
}

impl Matcher {
    fn matches(&self, request: &MockRequest) -> bool {
        match *self {
            Self::Query { path, key, value } => {
                request.path == path && request.query_value(key) == Some(value)
            }
            Self::Exact(path) => request.path == path && request.query.is_empty(),
            Self::Path(path) => request.path == path,
        }
    }
}

struct Route {
    method: RequestMethod,
    matcher: Matcher,
    handler: Handler,
}

impl Route {
    fn matches(&self, request: &MockRequest) -> bool {
        self.method == request.method && self.matcher.matches(request)
    }
}

const fn query(key: &'static str, value: &'static str) -> Matcher {
    Matcher::Query {
        path: PATH_FAN,
        key,
        value,
    }
}

fn device_routes() -> Vec<Route> {
    vec![
        Route {
            method: RequestMethod::Get,
            matcher: query(QUERY_STATE, STATE_PING),
            handler: handle_ping,
        },
        Route {
            method: RequestMethod::Get,
            matcher: query(QUERY_STATE, STATE_ON),
            handler: handle_fan_on,
        },
        Route {
            method: RequestMethod::Get,
            matcher: query(QUERY_STATE, STATE_OFF),
            handler: handle_fan_off,
        },
        Route {
            method: RequestMethod::Get,
            matcher: query(QUERY_STATE, STATE_AUTO),
            handler: handle_fan_auto,
        },
        Route {
            method: RequestMethod::Get,
            matcher: Matcher::Exact(PATH_STATUS),
            handler: handle_status,
        },
        Route {
            method: RequestMethod::Get,
            matcher: Matcher::Exact(PATH_INDOOR_SENSORS),
            handler: handle_indoor_sensors,
        },
        Route {
            method: RequestMethod::Get,
            matcher: Matcher::Exact(PATH_CONFIG),
            handler: handle_get_config,
        },
        Route {
            method: RequestMethod::Post,
            matcher: Matcher::Exact(PATH_CONFIG),
            handler: handle_set_config,
        },
        Route {
            method: RequestMethod::Get,
            matcher: Matcher::Exact(PATH_HISTORY),
            handler: handle_history,
        },
        Route {
            method: RequestMethod::Post,
            matcher: Matcher::Path(PATH_FAN),
            handler: handle_fan_command,
        },
    ]
}

pub struct Interceptor {
    routes: Vec<Route>,
}

impl Default for Interceptor {
    fn default() -> Self {
        Self {
            routes: device_routes(),
        }
    }
}

impl Interceptor {
    pub fn intercept(
        &self,
        simulator: &mut DeviceSimulator,
        request: &MockRequest,
        now_ms: i64,
    ) -> Interception {
        let Some(route) = self.routes.iter().find(|route| route.matches(request)) else {
            debug!("no simulated route for {:?} {}", request.method, request.path);
            return Interception::PassThrough;
        };

        match (route.handler)(simulator, request, now_ms) {
            Ok(handled) => Interception::Handled(handled),
            Err(SimulatorError::BadRequest(message)) => {
                debug!("rejected {} request: {message}", request.path);
                Interception::Handled(MockResponse::text(400, message).into())
            }
            Err(err) => {
                warn!("simulated {} failed, forwarding instead: {err}", request.path);
                Interception::PassThrough
            }
        }
    }
}

fn handle_ping(
    _: &mut DeviceSimulator,
    _: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    Ok(MockResponse::empty().into())
}

fn handle_fan_on(
    simulator: &mut DeviceSimulator,
    _: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    simulator.set_fan(true);
    Ok(MockResponse::empty().into())
}

fn handle_fan_off(
    simulator: &mut DeviceSimulator,
    _: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    simulator.set_fan(false);
    Ok(MockResponse::empty().into())
}

fn handle_fan_auto(
    simulator: &mut DeviceSimulator,
    _: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    simulator.set_auto();
    Ok(MockResponse::empty().into())
}

fn handle_status(
    simulator: &mut DeviceSimulator,
    _: &MockRequest,
    now_ms: i64,
) -> Result<Handled, SimulatorError> {
    let body = serde_json::to_string(&simulator.status(now_ms))?;
    Ok(MockResponse::json(body).into())
}

fn handle_indoor_sensors(
    simulator: &mut DeviceSimulator,
    _: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    let body = serde_json::to_string(simulator.indoor_sensors())?;
    Ok(MockResponse::json(body).into())
}

fn handle_get_config(
    simulator: &mut DeviceSimulator,
    _: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    let body = serde_json::to_string(simulator.config())?;
    Ok(MockResponse::json(body).into())
}

fn handle_set_config(
    simulator: &mut DeviceSimulator,
    request: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    let update = simulator.update_config(&request.body)?;
    Ok(MockResponse::text(200, update.message()).into())
}

fn handle_history(
    simulator: &mut DeviceSimulator,
    _: &MockRequest,
    _: i64,
) -> Result<Handled, SimulatorError> {
    Ok(MockResponse::csv(simulator.history_csv().to_string()).into())
}

#[derive(Debug, Deserialize)]
struct FanCommand {
    #[serde(default)]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient_minutes")]
    delay: u64,
    #[serde(default, deserialize_with = "lenient_minutes")]
    duration: u64,
    #[serde(default, rename = "postAction")]
    post_action: Option<String>,
}

fn handle_fan_command(
    simulator: &mut DeviceSimulator,
    request: &MockRequest,
    now_ms: i64,
) -> Result<Handled, SimulatorError> {
    let command: FanCommand = serde_json::from_slice(&request.body)
        .map_err(|_| SimulatorError::bad_request("Invalid JSON"))?;

    if command.action.as_deref() != Some(ACTION_START_TIMED) {
        return Err(SimulatorError::bad_request("Unknown action"));
    }

    let post_action = command
        .post_action
        .as_deref()
        .map_or(PostAction::StayManual, PostAction::from_name);
    let actions = simulator.start_timed(now_ms, command.delay, command.duration, post_action);

    Ok(Handled {
        response: MockResponse::empty(),
        actions,
    })
}

/// Accepts whole minutes as a JSON number or a numeric string. Anything
/// negative or unparsable counts as zero.
fn lenient_minutes<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(minutes_from_value(&value))
}

fn minutes_from_value(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|minutes| minutes.is_finite() && *minutes > 0.0)
                    .map(|minutes| minutes.trunc() as u64)
            })
            .unwrap_or(0),
        Value::String(text) => {
            let digits: String = text
                .trim()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().unwrap_or(0)
        }
        _ => 0,
    }
}
