pub const PATH_FAN: &str = "/fan";
pub const PATH_STATUS: &str = "/status";
pub const PATH_INDOOR_SENSORS: &str = "/indoor_sensors";
pub const PATH_CONFIG: &str = "/config";
pub const PATH_HISTORY: &str = "/history.csv";

pub const QUERY_STATE: &str = "state";
pub const STATE_PING: &str = "ping";
pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_AUTO: &str = "auto";

pub const ACTION_START_TIMED: &str = "start_timed";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_CSV: &str = "text/csv";

pub const FIRMWARE_VERSION: &str = "v0.0.0-demo";
