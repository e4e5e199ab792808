use lazy_static::lazy_static;
use std::collections::BTreeMap;

pub mod actions;
pub mod definitions;
pub mod structs;

pub use structs::{
    BinarySensorDef, ButtonDef, DeriveCondition, DeviceProfile, ExtraBatterySensor, ExtraBatterySensorDef, NumberDef,
    NumberMode, SelectDef, SensorDef, StateInterpreter, SwitchDef,
};

lazy_static! {
    /* built once, read-only afterwards; ordered by registration */
    static ref PROFILES: Vec<DeviceProfile> = vec![
        definitions::get_delta_pro_3_profile(),
        definitions::get_delta_pro_profile(),
        definitions::get_delta_2_profile(),
        definitions::get_stream_ultra_x_profile(),
        definitions::get_smart_plug_profile(),
    ];
}

pub fn get_profile(device_type: &str) -> Option<&'static DeviceProfile> {
    PROFILES.iter().find(|p| p.device_type == device_type)
}

/// `(device_type, display_name)` for every supported device
pub fn get_device_types() -> Vec<(&'static str, &'static str)> {
    PROFILES.iter().map(|p| (p.device_type, p.display_name)).collect()
}

pub fn all_profiles() -> BTreeMap<&'static str, &'static DeviceProfile> {
    PROFILES.iter().map(|p| (p.device_type, p)).collect()
}

/// Profile display name, or the raw type tag for unknown devices
pub fn display_name(device_type: &str) -> String {
    match get_profile(device_type) {
        Some(profile) => profile.display_name.to_string(),
        None => device_type.to_string(),
    }
}
