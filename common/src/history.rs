use chrono::{DateTime, Local, TimeZone};

use crate::{error::SimulatorError, types::SensorSnapshot};

pub const HISTORY_HEADER: [&str; 5] = [
    "timestamp",
    "attic_temp",
    "outdoor_temp",
    "humidity",
    "fan_on",
];
pub const HISTORY_SPACING_MS: i64 = 15 * 60 * 1_000;
pub const DEFAULT_HISTORY_ROWS: usize = 96;
/// One year of entries.
pub const MAX_HISTORY_ROWS: usize = 365 * DEFAULT_HISTORY_ROWS;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders a history log of `rows` entries spaced 15 minutes apart, the last
/// one stamped at `end_ms`. Zero rows yields a header-only log.
pub fn render_history_csv(
    end_ms: i64,
    rows: usize,
    sensors: &SensorSnapshot,
) -> Result<String, SimulatorError> {
    render_history_csv_in(&Local, end_ms, rows, sensors)
}

pub fn render_history_csv_in<Tz>(
    tz: &Tz,
    end_ms: i64,
    rows: usize,
    sensors: &SensorSnapshot,
) -> Result<String, SimulatorError>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(HISTORY_HEADER)?;

    let attic = sensors.attic_temp_f.to_string();
    let outdoor = sensors.outdoor_temp_f.to_string();
    let humidity = sensors.attic_humidity.to_string();

    for index in 0..rows {
        let Some(stamp) = i64::try_from(rows - 1 - index)
            .ok()
            .and_then(|steps| steps.checked_mul(HISTORY_SPACING_MS))
            .and_then(|offset| end_ms.checked_sub(offset))
            .and_then(DateTime::from_timestamp_millis)
        else {
            continue;
        };
        let stamp = stamp.with_timezone(tz).format(TIMESTAMP_FORMAT).to_string();
        writer.write_record([
            stamp.as_str(),
            attic.as_str(),
            outdoor.as_str(),
            humidity.as_str(),
            "0",
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| SimulatorError::Csv(err.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
