use serde_json::{Map, Value};
use tracing::info;

use crate::{
    config::{
        ConfigStore, ConfigUpdate, DeviceConfig, KEY_INDOOR_SENSORS_ENABLED, KEY_TEST_MODE_ENABLED,
    },
    endpoints::FIRMWARE_VERSION,
    error::SimulatorError,
    history::{render_history_csv, DEFAULT_HISTORY_ROWS},
    types::{
        DeviceStatus, FanMode, IndoorSensorsReport, PostAction, SensorSnapshot, TimerPhase,
    },
};

const MS_PER_MINUTE: i64 = 60_000;

/// Side effects the host must carry out after a simulator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorAction {
    StartTicker { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Pending,
    Running,
    Completed,
    /// The tick belongs to a replaced or finished run and changed nothing.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedRun {
    pub start_ms: i64,
    pub end_ms: i64,
    pub post_action: PostAction,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    pub fan_on: bool,
    pub fan_mode: FanMode,
    pub timer: Option<TimedRun>,
}

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    pub config: DeviceConfig,
    pub sensors: SensorSnapshot,
    pub history_rows: usize,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            config: DeviceConfig::default(),
            sensors: SensorSnapshot::default(),
            history_rows: DEFAULT_HISTORY_ROWS,
        }
    }
}

/// The whole simulated device: relay, mode, timed run, tunables and the
/// fixed sensor data served alongside them.
#[derive(Debug, Clone)]
pub struct DeviceSimulator {
    state: DeviceState,
    config: ConfigStore,
    sensors: SensorSnapshot,
    indoor: IndoorSensorsReport,
    history_csv: String,
    next_generation: u64,
}

impl DeviceSimulator {
    pub fn new(options: SimulatorOptions, now_ms: i64) -> Result<Self, SimulatorError> {
        let history_csv = render_history_csv(now_ms, options.history_rows, &options.sensors)?;
        Ok(Self {
            state: DeviceState::default(),
            config: ConfigStore::new(&options.config),
            sensors: options.sensors,
            indoor: IndoorSensorsReport::simulated(),
            history_csv,
            next_generation: 0,
        })
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn config(&self) -> &Map<String, Value> {
        self.config.values()
    }

    pub fn indoor_sensors(&self) -> &IndoorSensorsReport {
        &self.indoor
    }

    pub fn history_csv(&self) -> &str {
        &self.history_csv
    }

    pub fn status(&self, now_ms: i64) -> DeviceStatus {
        let phase = self.timer_phase(now_ms);
        let in_run = phase == TimerPhase::Running;
        let timer_active = phase != TimerPhase::Idle;
        let fan_on = in_run || self.state.fan_on;

        let fan_sub_mode = match self.state.fan_mode {
            FanMode::Auto => None,
            FanMode::Manual if timer_active => Some("TIMED"),
            FanMode::Manual if fan_on => Some("ON"),
            FanMode::Manual => Some("OFF"),
        };

        DeviceStatus {
            firmware_version: FIRMWARE_VERSION,
            attic_temp: self.sensors.attic_temp_f,
            attic_humidity: self.sensors.attic_humidity,
            outdoor_temp: self.sensors.outdoor_temp_f,
            fan_on,
            fan_mode: self.state.fan_mode,
            fan_sub_mode,
            timer_active,
            timer_mode: timer_active.then(|| phase.as_str()),
            timer_remaining_sec: self.timer_remaining_sec(now_ms),
            test_mode_enabled: self.config.flag(KEY_TEST_MODE_ENABLED),
            indoor_sensors_enabled: self.config.flag(KEY_INDOOR_SENSORS_ENABLED),
            indoor_sensor_count: self.indoor.count,
            avg_indoor_temp: self.indoor.average_temperature.clone(),
            avg_indoor_humidity: self.indoor.average_humidity.clone(),
        }
    }

    pub fn timer_phase(&self, now_ms: i64) -> TimerPhase {
        match self.state.timer {
            Some(run) if now_ms < run.start_ms && run.end_ms > 0 => TimerPhase::Pending,
            Some(run) if now_ms >= run.start_ms && now_ms < run.end_ms => TimerPhase::Running,
            _ => TimerPhase::Idle,
        }
    }

    pub fn timer_remaining_sec(&self, now_ms: i64) -> u64 {
        let end_ms = self.state.timer.map_or(0, |run| run.end_ms);
        u64::try_from((end_ms - now_ms).div_euclid(1_000)).unwrap_or(0)
    }

    pub fn set_fan(&mut self, on: bool) {
        self.cancel_timer();
        self.state.fan_on = on;
        self.state.fan_mode = FanMode::Manual;
    }

    pub fn set_auto(&mut self) {
        self.cancel_timer();
        self.state.fan_mode = FanMode::Auto;
    }

    pub fn update_config(&mut self, body: &[u8]) -> Result<ConfigUpdate, SimulatorError> {
        self.config.merge_json(body)
    }

    /// Starts a timed run, discarding any run already pending or running.
    pub fn start_timed(
        &mut self,
        now_ms: i64,
        delay_minutes: u64,
        duration_minutes: u64,
        post_action: PostAction,
    ) -> Vec<SimulatorAction> {
        let delay_ms = minutes_to_ms(delay_minutes);
        let duration_ms = minutes_to_ms(duration_minutes);

        self.next_generation = self.next_generation.wrapping_add(1);
        let start_ms = now_ms.saturating_add(delay_ms);
        let run = TimedRun {
            start_ms,
            end_ms: start_ms.saturating_add(duration_ms),
            post_action,
            generation: self.next_generation,
        };

        self.state.timer = Some(run);
        self.state.fan_mode = FanMode::Manual;
        if delay_ms == 0 {
            self.state.fan_on = true;
        }

        info!(
            "timed run started: delay={delay_minutes}min duration={duration_minutes}min post_action={}",
            post_action.as_str()
        );
        vec![SimulatorAction::StartTicker {
            generation: run.generation,
        }]
    }

    /// Advances the run identified by `generation` to `now_ms`.
    pub fn tick(&mut self, now_ms: i64, generation: u64) -> TickOutcome {
        let Some(run) = self.state.timer else {
            return TickOutcome::Stale;
        };
        if run.generation != generation {
            return TickOutcome::Stale;
        }

        if now_ms >= run.end_ms {
            self.state.timer = None;
            self.state.fan_on = false;
            self.state.fan_mode = run.post_action.completion_mode();
            info!(
                "timed run completed, fan mode now {}",
                self.state.fan_mode.as_str()
            );
            return TickOutcome::Completed;
        }

        if now_ms >= run.start_ms {
            self.state.fan_on = true;
            self.state.fan_mode = FanMode::Manual;
            return TickOutcome::Running;
        }

        TickOutcome::Pending
    }

    fn cancel_timer(&mut self) {
        if self.state.timer.take().is_some() {
            info!("timed run cancelled by manual command");
        }
    }
}

fn minutes_to_ms(minutes: u64) -> i64 {
    i64::try_from(minutes)
        .unwrap_or(i64::MAX)
        .saturating_mul(MS_PER_MINUTE)
}
