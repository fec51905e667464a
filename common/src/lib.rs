pub mod clock;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod history;
pub mod interceptor;
pub mod simulator;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigStore, ConfigUpdate, DeviceConfig};
pub use error::SimulatorError;
pub use interceptor::{Handled, Interception, Interceptor, MockRequest, MockResponse, RequestMethod};
pub use simulator::{
    DeviceSimulator, DeviceState, SimulatorAction, SimulatorOptions, TickOutcome, TimedRun,
};
pub use types::{DeviceStatus, FanMode, IndoorSensorsReport, PostAction, SensorSnapshot, TimerPhase};
