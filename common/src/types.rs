use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FanMode {
    #[default]
    Auto,
    Manual,
}

impl FanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }
}

/// What the fan does once a timed run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAction {
    #[default]
    StayManual,
    #[serde(alias = "revert_to_auto")]
    GoAuto,
}

impl PostAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StayManual => "stay_manual",
            Self::GoAuto => "go_auto",
        }
    }

    /// Maps a request's `postAction` string. Anything other than an
    /// auto-revert name keeps the fan in manual mode.
    pub fn from_name(name: &str) -> Self {
        match name {
            "go_auto" | "revert_to_auto" => Self::GoAuto,
            _ => Self::StayManual,
        }
    }

    pub fn completion_mode(self) -> FanMode {
        match self {
            Self::StayManual => FanMode::Manual,
            Self::GoAuto => FanMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Pending,
    Running,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "delay",
            Self::Running => "run",
        }
    }
}

/// Fixed attic and outdoor readings reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub attic_temp_f: f32,
    pub attic_humidity: f32,
    pub outdoor_temp_f: f32,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            attic_temp_f: 95.0,
            attic_humidity: 40.0,
            outdoor_temp_f: 92.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: &'static str,
    #[serde(rename = "atticTemp")]
    pub attic_temp: f32,
    #[serde(rename = "atticHumidity")]
    pub attic_humidity: f32,
    #[serde(rename = "outdoorTemp")]
    pub outdoor_temp: f32,
    #[serde(rename = "fanOn")]
    pub fan_on: bool,
    #[serde(rename = "fanMode")]
    pub fan_mode: FanMode,
    #[serde(rename = "fanSubMode", skip_serializing_if = "Option::is_none")]
    pub fan_sub_mode: Option<&'static str>,
    #[serde(rename = "timerActive")]
    pub timer_active: bool,
    #[serde(rename = "timerMode", skip_serializing_if = "Option::is_none")]
    pub timer_mode: Option<&'static str>,
    #[serde(rename = "timerRemainingSec")]
    pub timer_remaining_sec: u64,
    #[serde(rename = "testModeEnabled")]
    pub test_mode_enabled: bool,
    #[serde(rename = "indoorSensorsEnabled")]
    pub indoor_sensors_enabled: bool,
    #[serde(rename = "indoorSensorCount")]
    pub indoor_sensor_count: usize,
    #[serde(rename = "avgIndoorTemp")]
    pub avg_indoor_temp: String,
    #[serde(rename = "avgIndoorHumidity")]
    pub avg_indoor_humidity: String,
}

/// One remote indoor sensor as the device reports it. Readings are
/// pre-formatted strings, matching the device payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndoorSensor {
    #[serde(rename = "sensorId")]
    pub sensor_id: &'static str,
    pub name: &'static str,
    pub temperature: String,
    pub humidity: String,
    #[serde(rename = "ipAddress")]
    pub ip_address: &'static str,
    #[serde(rename = "secondsSinceUpdate")]
    pub seconds_since_update: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndoorSensorsReport {
    pub sensors: Vec<IndoorSensor>,
    pub count: usize,
    #[serde(rename = "averageTemperature")]
    pub average_temperature: String,
    #[serde(rename = "averageHumidity")]
    pub average_humidity: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct IndoorSample {
    sensor_id: &'static str,
    name: &'static str,
    temperature_f: f32,
    humidity: f32,
    ip_address: &'static str,
    seconds_since_update: u32,
}

const INDOOR_SAMPLES: [IndoorSample; 3] = [
    IndoorSample {
        sensor_id: "living_room_01",
        name: "Living Room",
        temperature_f: 72.5,
        humidity: 45.1,
        ip_address: "192.168.1.150",
        seconds_since_update: 25,
    },
    IndoorSample {
        sensor_id: "bedroom_01",
        name: "Master Bedroom",
        temperature_f: 70.2,
        humidity: 48.9,
        ip_address: "192.168.1.151",
        seconds_since_update: 45,
    },
    IndoorSample {
        sensor_id: "office_01",
        name: "Office",
        temperature_f: 73.8,
        humidity: 42.0,
        ip_address: "192.168.1.152",
        seconds_since_update: 310,
    },
];

impl IndoorSensorsReport {
    pub fn simulated() -> Self {
        let sensors: Vec<IndoorSensor> = INDOOR_SAMPLES
            .iter()
            .map(|sample| IndoorSensor {
                sensor_id: sample.sensor_id,
                name: sample.name,
                temperature: format!("{:.1}", sample.temperature_f),
                humidity: format!("{:.1}", sample.humidity),
                ip_address: sample.ip_address,
                seconds_since_update: sample.seconds_since_update,
            })
            .collect();

        let count = INDOOR_SAMPLES.len();
        let divisor = count.max(1) as f32;
        let avg_temp = INDOOR_SAMPLES.iter().map(|s| s.temperature_f).sum::<f32>() / divisor;
        let avg_humidity = INDOOR_SAMPLES.iter().map(|s| s.humidity).sum::<f32>() / divisor;

        Self {
            sensors,
            count,
            average_temperature: format!("{avg_temp:.1}"),
            average_humidity: format!("{avg_humidity:.1}"),
        }
    }
}
