//! Reading entity state out of a snapshot and turning user actions into command payloads.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::warn;
use serde_json::{Map, Value};

use super::definitions::{get_extra_battery_sensor_definitions, EXTRA_BATTERY_PREFIXES};
use super::structs::{
    BinarySensorDef, ButtonDef, ExtraBatterySensor, NumberDef, SelectDef, SensorDef, StateInterpreter, SwitchDef,
};
use crate::commands::{build_command, CommandFormat};
use crate::error::EcoFlowError;
use crate::models::Snapshot;

fn lookup<'a>(snapshot: &'a Snapshot, key: &str) -> Option<&'a Value> {
    match snapshot.get(key) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value),
    }
}

/// Loose truthiness used by switches and binary sensors: numbers must equal 1,
/// strings must be `1`, `true` or `on`.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v.trunc() == 1.0).unwrap_or(false),
        Value::String(s) => matches!(s.to_lowercase().as_str(), "1" | "true" | "on"),
        Value::Array(list) => !list.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn single_param(key: &str, value: Value) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert(key.to_string(), value);
    params
}

/// Flat key first; a dotted key not present flat is looked up as `parent` -> `rest`.
fn lookup_nested<'a>(snapshot: &'a Snapshot, key: &str) -> Option<&'a Value> {
    if let Some(value) = lookup(snapshot, key) {
        return Some(value);
    }
    let (parent, rest) = key.split_once('.')?;
    match snapshot.get(parent) {
        Some(Value::Object(map)) => match map.get(rest) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        },
        _ => None,
    }
}

fn all_zero_list(value: &Value) -> bool {
    match value {
        Value::Array(list) => list.iter().all(|v| v.as_f64() == Some(0.0)),
        _ => false,
    }
}

/// Raw value of a sensor. A missing value or an all-zero list is replaced by the
/// `fallback_key` value when one is declared, even when that one is missing too.
pub fn sensor_value<'a>(def: &SensorDef, snapshot: &'a Snapshot) -> Option<&'a Value> {
    let value = lookup_nested(snapshot, def.state_key);
    if let Some(fallback) = def.fallback_key {
        if value.map(all_zero_list).unwrap_or(true) {
            return lookup_nested(snapshot, fallback);
        }
    }
    value
}

/* epoch values above this are milliseconds */
const EPOCH_MS_THRESHOLD: f64 = 946_684_800_000.0;

fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.trim().replace(' ', "T");
    if let Ok(ts) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M") {
        return Some(ts.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc());
    }
    None
}

/// Convert a raw timestamp value: ISO strings (naive ones are UTC) or epoch
/// seconds/milliseconds. `0` means unset.
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            if raw == "0" {
                return None;
            }
            let parsed = parse_timestamp_str(raw);
            if parsed.is_none() {
                warn!("Failed to parse timestamp '{raw}'");
            }
            parsed
        }
        Value::Number(n) => {
            let mut secs = n.as_f64()?;
            if secs == 0.0 {
                return None;
            }
            if secs > EPOCH_MS_THRESHOLD {
                secs /= 1000.0;
            }
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
            DateTime::<Utc>::from_timestamp(whole as i64, nanos)
        }
        _ => None,
    }
}

/// Timestamp sensors only, everything else gives `None`.
pub fn sensor_timestamp(def: &SensorDef, snapshot: &Snapshot) -> Option<DateTime<Utc>> {
    if !def.is_timestamp() {
        return None;
    }
    timestamp_from_value(sensor_value(def, snapshot)?)
}

/// State as published to a host: timestamp sensors as RFC 3339, others raw.
pub fn sensor_state(def: &SensorDef, snapshot: &Snapshot) -> Option<Value> {
    if def.is_timestamp() {
        return sensor_timestamp(def, snapshot).map(|ts| Value::from(ts.to_rfc3339()));
    }
    sensor_value(def, snapshot).cloned()
}

/// Extra battery prefixes that have at least one key in the snapshot, sorted.
pub fn detect_extra_batteries(snapshot: &Snapshot) -> Vec<&'static str> {
    let mut found: Vec<&'static str> = EXTRA_BATTERY_PREFIXES
        .iter()
        .copied()
        .filter(|prefix| snapshot.keys().any(|key| key.starts_with(prefix)))
        .collect();
    found.sort_unstable();
    found.dedup();
    found
}

/// First digit run of the prefix, 1 when it has none.
pub fn battery_number(prefix: &str) -> u32 {
    let digits: String = prefix
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(1)
}

/// Binary sensors for every extra battery found in the snapshot.
pub fn extra_battery_sensors(snapshot: &Snapshot) -> Vec<ExtraBatterySensor> {
    let mut sensors = Vec::new();
    for prefix in detect_extra_batteries(snapshot) {
        let n = battery_number(prefix);
        for def in get_extra_battery_sensor_definitions() {
            sensors.push(ExtraBatterySensor {
                key: format!("extra_battery_{}_{}", n, def.key),
                name: format!("Extra Battery {} {}", n, def.name),
                prefix,
                battery_number: n,
                check_key: format!("{}{}", prefix, def.check_suffix),
                def,
            });
        }
    }
    sensors
}

/// Sensors without a condition report whether the battery is connected.
pub fn extra_battery_is_on(sensor: &ExtraBatterySensor, snapshot: &Snapshot) -> bool {
    let value = lookup(snapshot, &sensor.check_key);
    match &sensor.def.condition {
        Some(condition) => condition.evaluate(value),
        None => value.is_some(),
    }
}

pub fn extra_battery_icon(sensor: &ExtraBatterySensor, snapshot: &Snapshot) -> &'static str {
    if extra_battery_is_on(sensor, snapshot) {
        return sensor.def.icon_on;
    }
    sensor.def.icon_off
}

pub fn binary_sensor_is_on(def: &BinarySensorDef, snapshot: &Snapshot) -> Option<bool> {
    if let Some((source, condition)) = &def.derived {
        return Some(condition.evaluate(lookup(snapshot, source)));
    }

    let value = lookup(snapshot, def.state_key)?;
    match value {
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Some(truthy(value)),
        _ => None,
    }
}

pub fn switch_is_on(def: &SwitchDef, snapshot: &Snapshot) -> Option<bool> {
    let value = lookup(snapshot, def.state_key)?;

    let on = match def.state_interpreter {
        StateInterpreter::FlowInfo => numbers_equal(value, &Value::from(2)),
        StateInterpreter::Int01 => truthy(value),
        StateInterpreter::Bool => {
            if def.has_custom_values() {
                numbers_equal(value, &def.value_on)
            } else {
                truthy(value)
            }
        }
    };

    if def.inverted {
        return Some(!on);
    }
    Some(on)
}

/// Payload switching `def` on or off. Inverted switches send the opposite value.
pub fn switch_command(def: &SwitchDef, format: CommandFormat, device_sn: &str, on: bool) -> Result<Value, EcoFlowError> {
    let value = if on != def.inverted {
        def.value_on.clone()
    } else {
        def.value_off.clone()
    };
    build_command(format, device_sn, single_param(def.param_key, value), &def.command_args)
}

pub fn number_value(def: &NumberDef, snapshot: &Snapshot) -> Option<f64> {
    let raw = match lookup(snapshot, def.state_key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    match def.value_to_ui {
        Some(to_ui) => Some(to_ui(raw)),
        None => Some(raw),
    }
}

/// The integer sent to the device for a user value: clamped, mapped, truncated.
pub fn number_api_value(def: &NumberDef, value: f64) -> i64 {
    let clamped = value.max(def.min_value).min(def.max_value);
    let api_value = match def.value_from_ui {
        Some(from_ui) => from_ui(clamped),
        None => clamped,
    };
    api_value.trunc() as i64
}

pub fn number_command(def: &NumberDef, format: CommandFormat, device_sn: &str, value: f64) -> Result<Value, EcoFlowError> {
    let int_value = number_api_value(def, value);

    let param = match &def.nested_params {
        Some(nested) => {
            let mut wrapper = Map::new();
            for (key, fixed) in nested {
                let v = match fixed {
                    Some(fixed) => fixed.clone(),
                    None => Value::from(int_value),
                };
                wrapper.insert(key.to_string(), v);
            }
            Value::Object(wrapper)
        }
        None => Value::from(int_value),
    };

    build_command(format, device_sn, single_param(def.param_key, param), &def.command_args)
}

/// Option currently active according to the snapshot.
///
/// Scalar options are found through their API value. Flag-set options match when every
/// flag equals `{state_key}.{flag}`; a missing flag reads as `false`. Local selects
/// read `local_value` instead of the snapshot.
pub fn select_current_option(def: &SelectDef, snapshot: &Snapshot, local_value: Option<&Value>) -> Option<&'static str> {
    if def.is_local {
        let current = local_value?;
        return def
            .options
            .iter()
            .find(|(_, v)| numbers_equal(v, current))
            .map(|(name, _)| *name);
    }

    if def.options.iter().any(|(_, v)| v.is_object()) {
        return flag_option(def, snapshot);
    }

    let raw = lookup(snapshot, def.state_key?)?;
    if !(raw.is_number() || raw.is_string()) {
        return None;
    }
    def.options
        .iter()
        .find(|(_, v)| !v.is_object() && numbers_equal(v, raw))
        .map(|(name, _)| *name)
}

fn flag_option(def: &SelectDef, snapshot: &Snapshot) -> Option<&'static str> {
    for (name, option) in &def.options {
        let flags = match option.as_object() {
            Some(flags) => flags,
            None => continue,
        };
        let all_match = flags.iter().all(|(flag, expected)| {
            let key = match def.state_key {
                Some(prefix) => format!("{prefix}.{flag}"),
                None => flag.clone(),
            };
            let actual = lookup(snapshot, &key).cloned().unwrap_or(Value::Bool(false));
            &actual == expected
        });
        if all_match {
            return Some(*name);
        }
    }
    None
}

/// What choosing an option amounts to
#[derive(Debug, Clone, PartialEq)]
pub enum SelectAction {
    Command(Value),
    SetUpdateInterval(u64),
}

pub fn select_option(def: &SelectDef, format: CommandFormat, device_sn: &str, option: &str) -> Result<SelectAction, EcoFlowError> {
    let value = def.option_value(option).ok_or_else(|| EcoFlowError::InvalidOption {
        entity: def.key.to_string(),
        option: option.to_string(),
    })?;

    if def.is_local {
        let seconds = value.as_u64().ok_or_else(|| EcoFlowError::InvalidOption {
            entity: def.key.to_string(),
            option: option.to_string(),
        })?;
        return Ok(SelectAction::SetUpdateInterval(seconds));
    }

    let payload = build_command(format, device_sn, single_param(def.param_key, value.clone()), &def.command_args)?;
    Ok(SelectAction::Command(payload))
}

pub fn button_command(def: &ButtonDef, format: CommandFormat, device_sn: &str) -> Result<Value, EcoFlowError> {
    build_command(format, device_sn, single_param(def.param_key, def.param_value.clone()), &def.command_args)
}
