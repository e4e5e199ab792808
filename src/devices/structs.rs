use serde_json::Value;

use crate::commands::{CommandArgs, CommandFormat};

#[derive(Debug, Clone, PartialEq)]
pub struct SensorDef {
    pub key: &'static str,
    pub name: &'static str,
    /// Field in the device snapshot
    pub state_key: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub icon: Option<&'static str>,
    pub diagnostic: bool,
    /// Read instead when `state_key` is missing, null or an all-zero list
    pub fallback_key: Option<&'static str>,
}

impl SensorDef {
    pub fn new(key: &'static str, name: &'static str, state_key: &'static str) -> Self {
        SensorDef {
            key,
            name,
            state_key,
            unit: None,
            device_class: None,
            state_class: None,
            icon: None,
            diagnostic: false,
            fallback_key: None,
        }
    }

    pub fn measurement(mut self, unit: &'static str, device_class: &'static str) -> Self {
        self.unit = Some(unit);
        self.device_class = Some(device_class);
        self.state_class = Some("measurement");
        self
    }

    pub fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn diagnostic(mut self) -> Self {
        self.diagnostic = true;
        self
    }

    pub fn fallback(mut self, key: &'static str) -> Self {
        self.fallback_key = Some(key);
        self
    }

    /// Value is a point in time, read as UTC
    pub fn timestamp(mut self) -> Self {
        self.device_class = Some("timestamp");
        self.state_class = None;
        self
    }

    pub fn is_timestamp(&self) -> bool {
        self.device_class == Some("timestamp")
    }
}

/// How a derived binary sensor turns its source field into on/off
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeriveCondition {
    GreaterThan(f64),
    AtLeast(f64),
    LessThan(f64),
}

impl DeriveCondition {
    /// A missing or non-numeric source is always off
    pub fn evaluate(&self, value: Option<&Value>) -> bool {
        let v = match value.and_then(Value::as_f64) {
            Some(v) => v,
            None => return false,
        };
        match self {
            DeriveCondition::GreaterThan(threshold) => v > *threshold,
            DeriveCondition::AtLeast(threshold) => v >= *threshold,
            DeriveCondition::LessThan(threshold) => v < *threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinarySensorDef {
    pub key: &'static str,
    pub name: &'static str,
    pub state_key: &'static str,
    pub device_class: Option<&'static str>,
    pub icon_on: Option<&'static str>,
    pub icon_off: Option<&'static str>,
    /// `(source field, condition)` for sensors computed from another value
    pub derived: Option<(&'static str, DeriveCondition)>,
}

impl BinarySensorDef {
    pub fn new(key: &'static str, name: &'static str, state_key: &'static str) -> Self {
        BinarySensorDef {
            key,
            name,
            state_key,
            device_class: None,
            icon_on: None,
            icon_off: None,
            derived: None,
        }
    }

    pub fn derived_from(mut self, source: &'static str, condition: DeriveCondition) -> Self {
        self.derived = Some((source, condition));
        self
    }

    /// Derived from its own `state_key`
    pub fn derived(self, condition: DeriveCondition) -> Self {
        let source = self.state_key;
        self.derived_from(source, condition)
    }

    pub fn device_class(mut self, device_class: &'static str) -> Self {
        self.device_class = Some(device_class);
        self
    }

    pub fn icons(mut self, on: &'static str, off: &'static str) -> Self {
        self.icon_on = Some(on);
        self.icon_off = Some(off);
        self
    }
}

/// Binary sensor generated for every extra battery found in the snapshot.
///
/// Reads `{prefix}{check_suffix}`; without a condition it is on whenever that field exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraBatterySensorDef {
    pub key: &'static str,
    pub name: &'static str,
    pub device_class: &'static str,
    pub icon_on: &'static str,
    pub icon_off: &'static str,
    pub check_suffix: &'static str,
    pub condition: Option<DeriveCondition>,
}

/// One extra battery binary sensor bound to a detected battery prefix
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraBatterySensor {
    pub key: String,
    pub name: String,
    pub prefix: &'static str,
    pub battery_number: u32,
    pub check_key: String,
    pub def: ExtraBatterySensorDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateInterpreter {
    /// bool, or custom `value_on`/`value_off`
    #[default]
    Bool,
    /// 0 = off, 1 = on
    Int01,
    /// Delta Pro 3 `flowInfo*` keys: 2 = on
    FlowInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchDef {
    pub key: &'static str,
    pub name: &'static str,
    pub state_key: &'static str,
    pub param_key: &'static str,
    pub command_args: CommandArgs,
    pub value_on: Value,
    pub value_off: Value,
    pub icon_on: Option<&'static str>,
    pub icon_off: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub inverted: bool,
    pub state_interpreter: StateInterpreter,
}

impl SwitchDef {
    pub fn new(key: &'static str, name: &'static str, state_key: &'static str, param_key: &'static str) -> Self {
        SwitchDef {
            key,
            name,
            state_key,
            param_key,
            command_args: CommandArgs::none(),
            value_on: Value::Bool(true),
            value_off: Value::Bool(false),
            icon_on: None,
            icon_off: None,
            device_class: None,
            inverted: false,
            state_interpreter: StateInterpreter::Bool,
        }
    }

    pub fn args(mut self, args: CommandArgs) -> Self {
        self.command_args = args;
        self
    }

    pub fn values(mut self, on: i64, off: i64) -> Self {
        self.value_on = Value::from(on);
        self.value_off = Value::from(off);
        self
    }

    pub fn interpreter(mut self, interpreter: StateInterpreter) -> Self {
        self.state_interpreter = interpreter;
        self
    }

    pub fn icons(mut self, on: &'static str, off: &'static str) -> Self {
        self.icon_on = Some(on);
        self.icon_off = Some(off);
        self
    }

    pub fn device_class(mut self, device_class: &'static str) -> Self {
        self.device_class = Some(device_class);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    /// true unless the on/off values are the plain `true`/`false` or `1`/`0`
    pub fn has_custom_values(&self) -> bool {
        let plain_on = self.value_on == Value::Bool(true) || self.value_on == Value::from(1);
        let plain_off = self.value_off == Value::Bool(false) || self.value_off == Value::from(0);
        !(plain_on && plain_off)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberMode {
    #[default]
    Slider,
    Box,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberDef {
    pub key: &'static str,
    pub name: &'static str,
    pub state_key: &'static str,
    pub param_key: &'static str,
    pub command_args: CommandArgs,
    pub min_value: f64,
    pub max_value: f64,
    pub step: f64,
    pub unit: Option<&'static str>,
    pub icon: Option<&'static str>,
    pub mode: NumberMode,
    /// Wrapper object for the value; `None` entries are replaced by the value
    pub nested_params: Option<Vec<(&'static str, Option<Value>)>>,
    pub value_to_ui: Option<fn(f64) -> f64>,
    pub value_from_ui: Option<fn(f64) -> f64>,
}

impl NumberDef {
    pub fn new(key: &'static str, name: &'static str, state_key: &'static str, param_key: &'static str) -> Self {
        NumberDef {
            key,
            name,
            state_key,
            param_key,
            command_args: CommandArgs::none(),
            min_value: 0.0,
            max_value: 100.0,
            step: 1.0,
            unit: None,
            icon: None,
            mode: NumberMode::Slider,
            nested_params: None,
            value_to_ui: None,
            value_from_ui: None,
        }
    }

    pub fn range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min_value = min;
        self.max_value = max;
        self.step = step;
        self
    }

    pub fn args(mut self, args: CommandArgs) -> Self {
        self.command_args = args;
        self
    }

    pub fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn mode(mut self, mode: NumberMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn nested(mut self, nested: Vec<(&'static str, Option<Value>)>) -> Self {
        self.nested_params = Some(nested);
        self
    }

    pub fn scaled(mut self, to_ui: fn(f64) -> f64, from_ui: fn(f64) -> f64) -> Self {
        self.value_to_ui = Some(to_ui);
        self.value_from_ui = Some(from_ui);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectDef {
    pub key: &'static str,
    pub name: &'static str,
    pub param_key: &'static str,
    /// Display name -> API value. Object values are flag sets.
    pub options: Vec<(&'static str, Value)>,
    /// `None` for settings that only live in the coordinator
    pub state_key: Option<&'static str>,
    pub command_args: CommandArgs,
    pub icon: Option<&'static str>,
    pub is_local: bool,
}

impl SelectDef {
    pub fn new(key: &'static str, name: &'static str, param_key: &'static str, options: Vec<(&'static str, Value)>) -> Self {
        SelectDef {
            key,
            name,
            param_key,
            options,
            state_key: None,
            command_args: CommandArgs::none(),
            icon: None,
            is_local: false,
        }
    }

    pub fn state(mut self, state_key: &'static str) -> Self {
        self.state_key = Some(state_key);
        self
    }

    pub fn args(mut self, args: CommandArgs) -> Self {
        self.command_args = args;
        self
    }

    pub fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn local(mut self) -> Self {
        self.is_local = true;
        self
    }

    pub fn option_names(&self) -> Vec<&'static str> {
        self.options.iter().map(|(name, _)| *name).collect()
    }

    pub fn option_value(&self, option: &str) -> Option<&Value> {
        self.options.iter().find(|(name, _)| *name == option).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ButtonDef {
    pub key: &'static str,
    pub name: &'static str,
    pub param_key: &'static str,
    pub command_args: CommandArgs,
    pub param_value: Value,
    pub icon: Option<&'static str>,
}

impl ButtonDef {
    pub fn new(key: &'static str, name: &'static str, param_key: &'static str) -> Self {
        ButtonDef {
            key,
            name,
            param_key,
            command_args: CommandArgs::none(),
            param_value: Value::from(1),
            icon: None,
        }
    }

    pub fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }
}

/// Everything known about one device type: how to command it and which entities it has.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub device_type: &'static str,
    pub display_name: &'static str,
    pub command_format: CommandFormat,
    pub sensors: Vec<SensorDef>,
    pub binary_sensors: Vec<BinarySensorDef>,
    pub switches: Vec<SwitchDef>,
    pub numbers: Vec<NumberDef>,
    pub selects: Vec<SelectDef>,
    pub buttons: Vec<ButtonDef>,
}

impl DeviceProfile {
    pub fn new(device_type: &'static str, display_name: &'static str, command_format: CommandFormat) -> Self {
        DeviceProfile {
            device_type,
            display_name,
            command_format,
            sensors: Vec::new(),
            binary_sensors: Vec::new(),
            switches: Vec::new(),
            numbers: Vec::new(),
            selects: Vec::new(),
            buttons: Vec::new(),
        }
    }

    /// Every entity key of the profile, in declaration order
    pub fn entity_keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = Vec::new();
        keys.extend(self.sensors.iter().map(|d| d.key));
        keys.extend(self.binary_sensors.iter().map(|d| d.key));
        keys.extend(self.switches.iter().map(|d| d.key));
        keys.extend(self.numbers.iter().map(|d| d.key));
        keys.extend(self.selects.iter().map(|d| d.key));
        keys.extend(self.buttons.iter().map(|d| d.key));
        keys
    }
}
