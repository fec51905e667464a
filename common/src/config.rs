use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::SimulatorError;

/// Factory defaults for the device tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub fan_on_temp: f32,
    pub fan_delta_temp: f32,
    pub fan_hysteresis: f32,
    pub pre_cool_trigger_temp: f32,
    pub pre_cool_temp_offset: f32,
    pub pre_cooling_enabled: bool,
    pub onboard_led_enabled: bool,
    pub daily_restart_enabled: bool,
    pub mqtt_enabled: bool,
    pub mqtt_discovery_enabled: bool,
    pub test_mode_enabled: bool,
    pub indoor_sensors_enabled: bool,
    pub restart_hour: u8,
    pub restart_minute: u8,
    pub history_log_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fan_on_temp: 95.0,
            fan_delta_temp: 2.0,
            fan_hysteresis: 2.0,
            pre_cool_trigger_temp: 78.0,
            pre_cool_temp_offset: 2.0,
            pre_cooling_enabled: false,
            onboard_led_enabled: true,
            daily_restart_enabled: false,
            mqtt_enabled: false,
            mqtt_discovery_enabled: false,
            test_mode_enabled: false,
            indoor_sensors_enabled: true,
            restart_hour: 3,
            restart_minute: 0,
            history_log_interval_ms: 300_000,
        }
    }
}

pub const KEY_TEST_MODE_ENABLED: &str = "testModeEnabled";
pub const KEY_INDOOR_SENSORS_ENABLED: &str = "indoorSensorsEnabled";

struct NumericBound {
    key: &'static str,
    min: f64,
    max: f64,
}

const NUMERIC_BOUNDS: [NumericBound; 8] = [
    NumericBound { key: "fanOnTemp", min: 50.0, max: 150.0 },
    NumericBound { key: "preCoolTriggerTemp", min: 50.0, max: 150.0 },
    NumericBound { key: "fanDeltaTemp", min: 0.0, max: 50.0 },
    NumericBound { key: "fanHysteresis", min: 0.0, max: 50.0 },
    NumericBound { key: "preCoolTempOffset", min: 0.0, max: 50.0 },
    NumericBound { key: "historyLogIntervalMs", min: 60_000.0, max: 86_400_000.0 },
    NumericBound { key: "restartHour", min: 0.0, max: 23.0 },
    NumericBound { key: "restartMinute", min: 0.0, max: 59.0 },
];

pub const CONFIG_SAVED: &str = "Configuration saved. Changes will apply on the next cycle.";
pub const CONFIG_SAVED_RESTART: &str =
    "Configuration saved. A restart is required to apply Test Mode changes.";

/// Result of a successful config merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub restart_required: bool,
}

impl ConfigUpdate {
    pub fn message(&self) -> &'static str {
        if self.restart_required {
            CONFIG_SAVED_RESTART
        } else {
            CONFIG_SAVED
        }
    }
}

/// Stored tunables: a flat key-value mapping seeded from [`DeviceConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStore {
    values: Map<String, Value>,
    defaults: Map<String, Value>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(&DeviceConfig::default())
    }
}

impl ConfigStore {
    /// Seeds the store from `initial`. Seed values outside the device's
    /// accepted ranges fall back to factory defaults, as on a settings load.
    pub fn new(initial: &DeviceConfig) -> Self {
        let mut store = Self {
            values: to_map(initial),
            defaults: to_map(&DeviceConfig::default()),
        };
        store.sanitize();
        store
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn flag(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Shallow-merges a JSON object body into the stored mapping.
    ///
    /// A missing or malformed body leaves the stored mapping untouched.
    pub fn merge_json(&mut self, body: &[u8]) -> Result<ConfigUpdate, SimulatorError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(SimulatorError::bad_request("Bad Request"));
        }
        let Ok(Value::Object(patch)) = serde_json::from_slice::<Value>(body) else {
            return Err(SimulatorError::bad_request("Invalid JSON"));
        };
        Ok(self.merge(patch))
    }

    /// Stores every provided key as given. Range checks only apply when
    /// the store is seeded.
    pub fn merge(&mut self, patch: Map<String, Value>) -> ConfigUpdate {
        let test_mode_before = self.flag(KEY_TEST_MODE_ENABLED);
        for (key, value) in patch {
            self.values.insert(key, value);
        }
        ConfigUpdate {
            restart_required: test_mode_before != self.flag(KEY_TEST_MODE_ENABLED),
        }
    }

    /// Resets out-of-range numeric tunables to their defaults. Returns the
    /// keys that were corrected.
    fn sanitize(&mut self) -> Vec<String> {
        let mut corrected = Vec::new();
        for bound in &NUMERIC_BOUNDS {
            let Some(value) = self.values.get(bound.key) else {
                continue;
            };
            let valid = value
                .as_f64()
                .is_some_and(|v| v.is_finite() && (bound.min..=bound.max).contains(&v));
            if valid {
                continue;
            }
            let Some(default) = self.defaults.get(bound.key).cloned() else {
                continue;
            };
            warn!(
                "invalid '{}' (val: {value}) in config, reset to default ({default})",
                bound.key
            );
            self.values.insert(bound.key.to_string(), default);
            corrected.push(bound.key.to_string());
        }
        corrected
    }
}

fn to_map(config: &DeviceConfig) -> Map<String, Value> {
    match serde_json::to_value(config) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn defaults_are_camel_case_keys() {
        let store = ConfigStore::default();
        assert_eq!(store.values().get("fanOnTemp"), Some(&json!(95.0)));
        assert_eq!(store.values().get("restartHour"), Some(&json!(3)));
        assert!(store.flag("onboardLedEnabled"));
        assert!(!store.flag(KEY_TEST_MODE_ENABLED));
    }

    #[test]
    fn merge_is_shallow_and_idempotent() {
        let mut store = ConfigStore::default();
        let body = br#"{"fanOnTemp": 100, "customKey": "kept"}"#;

        store.merge_json(body).unwrap();
        let once = store.clone();
        store.merge_json(body).unwrap();

        assert_eq!(store, once);
        assert_eq!(store.values().get("fanOnTemp"), Some(&json!(100)));
        assert_eq!(store.values().get("customKey"), Some(&json!("kept")));
        assert_eq!(store.values().get("fanHysteresis"), Some(&json!(2.0)));
    }

    #[test]
    fn malformed_body_leaves_config_unchanged() {
        let mut store = ConfigStore::default();
        let before = store.clone();

        let err = store.merge_json(b"not json").unwrap_err();
        assert!(matches!(err, SimulatorError::BadRequest(ref m) if m == "Invalid JSON"));

        let err = store.merge_json(b"[1, 2]").unwrap_err();
        assert!(matches!(err, SimulatorError::BadRequest(ref m) if m == "Invalid JSON"));

        let err = store.merge_json(b"").unwrap_err();
        assert!(matches!(err, SimulatorError::BadRequest(ref m) if m == "Bad Request"));

        assert_eq!(store, before);
    }

    #[test]
    fn posted_values_are_stored_as_given() {
        let mut store = ConfigStore::default();
        let update = store
            .merge_json(br#"{"restartHour": 25, "fanOnTemp": 160, "restartMinute": "soon"}"#)
            .unwrap();

        assert!(!update.restart_required);
        assert_eq!(store.values().get("restartHour"), Some(&json!(25)));
        assert_eq!(store.values().get("fanOnTemp"), Some(&json!(160)));
        assert_eq!(store.values().get("restartMinute"), Some(&json!("soon")));
    }

    #[test]
    fn out_of_range_seed_falls_back_to_defaults() {
        let seed = DeviceConfig {
            fan_on_temp: 400.0,
            restart_hour: 30,
            fan_hysteresis: 4.0,
            ..DeviceConfig::default()
        };
        let mut store = ConfigStore::new(&seed);

        assert_eq!(store.values().get("fanOnTemp"), Some(&json!(95.0)));
        assert_eq!(store.values().get("restartHour"), Some(&json!(3)));
        assert_eq!(store.values().get("fanHysteresis"), Some(&json!(4.0)));
        assert!(store.sanitize().is_empty());
    }

    #[test]
    fn toggling_test_mode_requires_restart() {
        let mut store = ConfigStore::default();

        let update = store.merge_json(br#"{"testModeEnabled": true}"#).unwrap();
        assert!(update.restart_required);
        assert_eq!(update.message(), CONFIG_SAVED_RESTART);

        let update = store.merge_json(br#"{"testModeEnabled": true}"#).unwrap();
        assert!(!update.restart_required);
        assert_eq!(update.message(), CONFIG_SAVED);
    }
}
