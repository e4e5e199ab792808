use serde_json::{json, Value};

use super::structs::{
    BinarySensorDef, ButtonDef, DeriveCondition, DeviceProfile, ExtraBatterySensorDef, NumberDef, NumberMode,
    SelectDef, SensorDef, StateInterpreter, SwitchDef,
};
use crate::commands::{CommandArgs, CommandFormat};

pub const SMART_PLUG_CMD_SWITCH: &str = "WN511_SOCKET_SET_PLUG_SWITCH_MESSAGE";
pub const SMART_PLUG_CMD_BRIGHTNESS: &str = "WN511_SOCKET_SET_BRIGHTNESS_PACK";

fn standby_options() -> Vec<(&'static str, Value)> {
    vec![
        ("Never", json!(0)),
        ("30 min", json!(30)),
        ("1 hour", json!(60)),
        ("2 hours", json!(120)),
        ("4 hours", json!(240)),
        ("6 hours", json!(360)),
    ]
}

fn energy_strategy_flags(self_powered: bool, tou: bool) -> Value {
    json!({
        "operateSelfPoweredOpen": self_powered,
        "operateTouModeOpen": tou,
        "operateScheduledOpen": false,
        "operateIntelligentScheduleModeOpen": false,
    })
}

pub fn get_delta_pro_3_profile() -> DeviceProfile {
    let mut profile = DeviceProfile::new("delta_pro_3", "Delta Pro 3", CommandFormat::ProV2);

    profile.sensors = vec![
        SensorDef::new("bms_batt_soc", "Battery Level", "bmsBattSoc").measurement("%", "battery"),
        SensorDef::new("bms_batt_soh", "Battery Health", "bmsBattSoh").measurement("%", "battery").icon("mdi:battery-heart"),
        SensorDef::new("cms_batt_soc", "System Battery Level", "cmsBattSoc").measurement("%", "battery"),
        SensorDef::new("bms_chg_rem_time", "Charge Remaining Time", "bmsChgRemTime").measurement("min", "duration"),
        SensorDef::new("bms_dsg_rem_time", "Discharge Remaining Time", "bmsDsgRemTime").measurement("min", "duration"),
        SensorDef::new("pow_in_sum_w", "Total Input Power", "powInSumW").measurement("W", "power"),
        SensorDef::new("pow_out_sum_w", "Total Output Power", "powOutSumW").measurement("W", "power"),
        SensorDef::new("pow_get_ac_in", "AC Input Power", "powGetAcIn").measurement("W", "power"),
        SensorDef::new("pow_get_pv_h", "Solar HV Input Power", "powGetPvH").measurement("W", "power").icon("mdi:solar-power"),
        SensorDef::new("bms_max_cell_temp", "Max Cell Temperature", "bmsMaxCellTemp").measurement("°C", "temperature"),
        SensorDef::new("bms_err_code", "BMS Error Code", "bmsErrCode").diagnostic(),
    ];

    profile.binary_sensors = vec![
        BinarySensorDef::new("ac_in_connected", "AC Input Connected", "acInConnected")
            .derived_from("powGetAcIn", DeriveCondition::GreaterThan(0.0))
            .icons("mdi:power-plug", "mdi:power-plug-off"),
        BinarySensorDef::new("solar_connected", "Solar Connected", "solarConnected")
            .derived_from("powGetPvH", DeriveCondition::GreaterThan(0.0))
            .icons("mdi:solar-power", "mdi:solar-power-variant-outline"),
        BinarySensorDef::new("is_charging", "Is Charging", "isCharging")
            .derived_from("powInSumW", DeriveCondition::GreaterThan(10.0))
            .device_class("battery_charging")
            .icons("mdi:battery-charging", "mdi:battery"),
        BinarySensorDef::new("is_discharging", "Is Discharging", "isDischarging")
            .derived_from("powOutSumW", DeriveCondition::GreaterThan(10.0))
            .icons("mdi:battery-arrow-down", "mdi:battery"),
        BinarySensorDef::new("ac_out_enabled", "AC Output Enabled", "acOutState")
            .device_class("power")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        BinarySensorDef::new("dc_out_enabled", "DC Output Enabled", "dcOutState")
            .device_class("power")
            .icons("mdi:current-dc", "mdi:power-off"),
        BinarySensorDef::new("battery_low", "Battery Low", "batteryLow")
            .derived_from("bmsBattSoc", DeriveCondition::LessThan(20.0))
            .device_class("battery")
            .icons("mdi:battery-alert", "mdi:battery"),
        BinarySensorDef::new("battery_full", "Battery Full", "batteryFull")
            .derived_from("bmsBattSoc", DeriveCondition::AtLeast(100.0))
            .icons("mdi:battery", "mdi:battery-outline"),
        BinarySensorDef::new("over_temp", "Over Temperature", "overTemp")
            .derived_from("bmsMaxCellTemp", DeriveCondition::GreaterThan(45.0))
            .device_class("heat")
            .icons("mdi:thermometer-alert", "mdi:thermometer"),
    ];

    profile.switches = vec![
        SwitchDef::new("ac_hv_out", "AC HV Output", "flowInfoAcHvOut", "cfgHvAcOutOpen")
            .interpreter(StateInterpreter::FlowInfo)
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        SwitchDef::new("ac_lv_out", "AC LV Output", "flowInfoAcLvOut", "cfgLvAcOutOpen")
            .interpreter(StateInterpreter::FlowInfo)
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        SwitchDef::new("dc_12v_out", "12V DC Output", "flowInfo12v", "cfgDc12vOutOpen")
            .interpreter(StateInterpreter::FlowInfo)
            .icons("mdi:current-dc", "mdi:power-off"),
        SwitchDef::new("x_boost", "X-Boost", "xboostEn", "cfgXboostEn")
            .icons("mdi:lightning-bolt", "mdi:lightning-bolt-outline"),
        SwitchDef::new("beeper", "Beeper", "enBeep", "cfgBeepEn")
            .icons("mdi:volume-high", "mdi:volume-off"),
        SwitchDef::new("ac_energy_saving", "AC Energy Saving", "acEnergySavingOpen", "cfgAcEnergySavingOpen")
            .icons("mdi:leaf", "mdi:leaf-off"),
        SwitchDef::new("generator_auto_start", "Generator Auto Start", "cmsOilSelfStart", "cfgCmsOilSelfStart")
            .icons("mdi:engine", "mdi:engine-off"),
        SwitchDef::new("gfci", "GFCI", "llcGFCIFlag", "cfgLlcGFCIFlag")
            .icons("mdi:shield-check", "mdi:shield-off"),
        SwitchDef::new("generator_pv_hybrid", "Generator PV Hybrid Mode", "generatorPvHybridModeOpen", "cfgGeneratorPvHybridModeOpen")
            .icons("mdi:solar-power", "mdi:solar-power-variant-outline"),
        SwitchDef::new("generator_care_mode", "Generator Care Mode", "generatorCareModeOpen", "cfgGeneratorCareModeOpen")
            .icons("mdi:heart", "mdi:heart-outline"),
    ];

    profile.numbers = vec![
        NumberDef::new("max_charge_level", "Max Charge Level", "cmsMaxChgSoc", "cfgMaxChgSoc")
            .range(50.0, 100.0, 1.0)
            .unit("%")
            .icon("mdi:battery-charging-100"),
        NumberDef::new("min_discharge_level", "Min Discharge Level", "cmsMinDsgSoc", "cfgMinDsgSoc")
            .range(0.0, 30.0, 1.0)
            .unit("%")
            .icon("mdi:battery-low"),
        NumberDef::new("ac_charge_power", "AC Charging Power", "plugInInfoAcInChgPowMax", "cfgPlugInInfoAcInChgPowMax")
            .range(400.0, 2900.0, 100.0)
            .unit("W")
            .icon("mdi:flash")
            .mode(NumberMode::Box),
        NumberDef::new("backup_reserve_level", "Backup Reserve Level", "energyBackupStartSoc", "cfgEnergyBackup")
            .range(5.0, 100.0, 1.0)
            .unit("%")
            .icon("mdi:battery-heart")
            .nested(vec![("energyBackupEn", Some(json!(true))), ("energyBackupStartSoc", None)]),
    ];

    profile.selects = vec![
        SelectDef::new("ac_standby_time", "AC Standby Time", "cfgAcStandbyTime", standby_options())
            .state("acStandbyTime")
            .icon("mdi:timer"),
        SelectDef::new("dc_standby_time", "DC Standby Time", "cfgDcStandbyTime", standby_options())
            .state("dcStandbyTime")
            .icon("mdi:timer"),
        SelectDef::new(
            "battery_charge_mode",
            "Battery Charge Mode",
            "cfgMultiBpChgDsgMode",
            vec![
                ("Default", json!(0)),
                ("Auto (by voltage)", json!(1)),
                ("Main priority charge, Extra priority discharge", json!(2)),
            ],
        )
        .state("multiBpChgDsgMode")
        .icon("mdi:battery-sync"),
        SelectDef::new(
            "ac_output_frequency",
            "AC Output Frequency",
            "cfgAcOutFreq",
            vec![("50 Hz", json!(50)), ("60 Hz", json!(60))],
        )
        .state("acOutFreq")
        .icon("mdi:sine-wave"),
        SelectDef::new(
            "energy_strategy_mode",
            "Energy Strategy Mode",
            "cfgEnergyStrategyOperateMode",
            vec![
                ("Off", energy_strategy_flags(false, false)),
                ("Self-Powered", energy_strategy_flags(true, false)),
                ("TOU", energy_strategy_flags(false, true)),
            ],
        )
        .state("energyStrategyOperateMode")
        .icon("mdi:strategy"),
    ];

    return profile;
}

pub fn get_delta_pro_profile() -> DeviceProfile {
    let mut profile = DeviceProfile::new("delta_pro", "Delta Pro", CommandFormat::ProV1);

    profile.sensors = vec![
        SensorDef::new("bms_soc", "Battery Level", "bmsMaster.soc").measurement("%", "battery"),
        SensorDef::new("bms_soh", "Battery Health", "bmsMaster.soh").measurement("%", "battery").icon("mdi:battery-heart"),
        SensorDef::new("bms_temp", "Battery Temperature", "bmsMaster.temp").measurement("°C", "temperature"),
        SensorDef::new("bms_vol", "Battery Voltage", "bmsMaster.vol").measurement("mV", "voltage"),
        SensorDef::new("bms_input_watts", "Battery Input Power", "bmsMaster.inputWatts")
            .measurement("W", "power")
            .icon("mdi:battery-charging"),
        SensorDef::new("bms_output_watts", "Battery Output Power", "bmsMaster.outputWatts")
            .measurement("W", "power")
            .icon("mdi:battery-arrow-down"),
        SensorDef::new("bms_remain_time", "Battery Remaining Time", "bmsMaster.remainTime").measurement("min", "duration"),
        SensorDef::new("bms_err_code", "BMS Error Code", "bmsMaster.errCode").diagnostic(),
    ];

    profile.binary_sensors = vec![
        BinarySensorDef::new("is_charging", "Is Charging", "isCharging")
            .derived_from("bmsMaster.inputWatts", DeriveCondition::GreaterThan(10.0))
            .device_class("battery_charging")
            .icons("mdi:battery-charging", "mdi:battery"),
        BinarySensorDef::new("ac_out_enabled", "AC Output Enabled", "inv.cfgAcEnabled")
            .device_class("power")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
    ];

    profile.switches = vec![
        SwitchDef::new("ac_output", "AC Output", "inv.cfgAcEnabled", "enabled")
            .args(CommandArgs::pro_v1(32, 66))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .device_class("outlet")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        SwitchDef::new("x_boost", "X-Boost", "inv.cfgAcXboost", "xboost")
            .args(CommandArgs::pro_v1(32, 66))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .icons("mdi:lightning-bolt", "mdi:lightning-bolt-outline"),
        SwitchDef::new("car_charger", "Car Charger", "mppt.carState", "enabled")
            .args(CommandArgs::pro_v1(32, 81))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .icons("mdi:car", "mdi:car-off"),
        SwitchDef::new("beeper", "Beeper", "pd.beepState", "enabled")
            .args(CommandArgs::pro_v1(32, 38))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .icons("mdi:volume-high", "mdi:volume-off"),
        SwitchDef::new("bypass_ac_auto_start", "Bypass AC Auto Start", "inv.acPassbyAutoEn", "enabled")
            .args(CommandArgs::pro_v1(32, 84))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .icons("mdi:power-plug", "mdi:power-plug-off"),
    ];

    profile.numbers = vec![
        NumberDef::new("max_charge_level", "Max Charge Level", "ems.maxChargeSoc", "maxChgSoc")
            .args(CommandArgs::pro_v1(32, 49))
            .range(50.0, 100.0, 1.0)
            .unit("%")
            .icon("mdi:battery-charging-100"),
        NumberDef::new("min_discharge_level", "Min Discharge Level", "ems.minDisChargeSoc", "minDsgSoc")
            .args(CommandArgs::pro_v1(32, 51))
            .range(0.0, 30.0, 1.0)
            .unit("%")
            .icon("mdi:battery-low"),
        NumberDef::new("ac_charge_power", "AC Charging Power", "inv.cfgSlowChgWatts", "slowChgPower")
            .args(CommandArgs::pro_v1(32, 69))
            .range(200.0, 2900.0, 100.0)
            .unit("W")
            .icon("mdi:flash")
            .mode(NumberMode::Box),
    ];

    profile.selects = vec![
        SelectDef::new(
            "pv_charging_type",
            "PV Charging Type",
            "chgType",
            vec![("Auto", json!(0)), ("MPPT", json!(1)), ("Adapter", json!(2))],
        )
        .state("mppt.cfgChgType")
        .args(CommandArgs::pro_v1(32, 82))
        .icon("mdi:solar-power"),
        SelectDef::new(
            "ac_output_frequency",
            "AC Output Frequency",
            "cfgAcOutFreq",
            vec![("50 Hz", json!(1)), ("60 Hz", json!(2))],
        )
        .state("inv.cfgAcOutFreq")
        .args(CommandArgs::pro_v1(32, 66))
        .icon("mdi:sine-wave"),
    ];

    return profile;
}

pub fn get_delta_2_profile() -> DeviceProfile {
    let mut profile = DeviceProfile::new("delta_2", "Delta 2", CommandFormat::DeltaV2);

    profile.sensors = vec![
        SensorDef::new("bms_soc", "Battery Level", "bms_bmsStatus.soc").measurement("%", "battery"),
        SensorDef::new("bms_soh", "Battery Health", "bms_bmsStatus.soh").measurement("%", "battery").icon("mdi:battery-heart"),
        SensorDef::new("bms_voltage", "Battery Voltage", "bms_bmsStatus.vol").measurement("mV", "voltage"),
        SensorDef::new("bms_temp", "Battery Temperature", "bms_bmsStatus.temp").measurement("°C", "temperature"),
        SensorDef::new("bms_cycles", "Battery Cycles", "bms_bmsStatus.cycles").icon("mdi:battery-sync"),
        SensorDef::new("input_power", "Total Input Power", "pd.wattsInSum").measurement("W", "power"),
        SensorDef::new("output_power", "Total Output Power", "pd.wattsOutSum").measurement("W", "power"),
    ];

    profile.binary_sensors = vec![
        BinarySensorDef::new("is_charging", "Is Charging", "isCharging")
            .derived_from("pd.wattsInSum", DeriveCondition::GreaterThan(10.0))
            .device_class("battery_charging")
            .icons("mdi:battery-charging", "mdi:battery"),
        BinarySensorDef::new("ac_out_enabled", "AC Output Enabled", "inv.cfgAcEnabled")
            .device_class("power")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
    ];

    profile.switches = vec![
        SwitchDef::new("ac_output", "AC Output", "inv.cfgAcEnabled", "enabled")
            .args(CommandArgs::delta_v2(5, "acOutCfg"))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .device_class("outlet")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        SwitchDef::new("x_boost", "X-Boost", "inv.cfgAcXboost", "xboost")
            .args(CommandArgs::delta_v2(5, "acOutCfg"))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .icons("mdi:lightning-bolt", "mdi:lightning-bolt-outline"),
        SwitchDef::new("dc_output", "DC Output", "pd.dcOutState", "enabled")
            .args(CommandArgs::delta_v2(1, "dcOutCfg"))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .icons("mdi:current-dc", "mdi:power-off"),
        SwitchDef::new("car_charger", "Car Charger", "mppt.carState", "enabled")
            .args(CommandArgs::delta_v2(5, "mpptCar"))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .icons("mdi:car", "mdi:car-off"),
        // the device exposes "quiet mode"; 1 = silent
        SwitchDef::new("beeper", "Beeper", "pd.beepMode", "enabled")
            .args(CommandArgs::delta_v2(5, "quietMode"))
            .values(1, 0)
            .interpreter(StateInterpreter::Int01)
            .inverted()
            .icons("mdi:volume-high", "mdi:volume-off"),
    ];

    profile.numbers = vec![
        NumberDef::new("max_charge_level", "Max Charge Level", "bms_emsStatus.maxChargeSoc", "maxChgSoc")
            .args(CommandArgs::delta_v2(2, "upsConfig"))
            .range(50.0, 100.0, 1.0)
            .unit("%")
            .icon("mdi:battery-charging-100"),
        NumberDef::new("min_discharge_level", "Min Discharge Level", "bms_emsStatus.minDsgSoc", "minDsgSoc")
            .args(CommandArgs::delta_v2(2, "dsgCfg"))
            .range(0.0, 30.0, 1.0)
            .unit("%")
            .icon("mdi:battery-low"),
    ];

    profile.selects = vec![
        SelectDef::new(
            "ac_output_frequency",
            "AC Output Frequency",
            "out_freq",
            vec![("50 Hz", json!(1)), ("60 Hz", json!(2))],
        )
        .state("inv.cfgAcOutFreq")
        .args(CommandArgs::delta_v2(5, "acOutCfg"))
        .icon("mdi:sine-wave"),
        SelectDef::new(
            "solar_priority",
            "Solar Charging Priority",
            "pvChangeSet",
            vec![("Off", json!(0)), ("On", json!(1))],
        )
        .state("pd.pvChgPrioSet")
        .args(CommandArgs::delta_v2(1, "pvChangePrio"))
        .icon("mdi:solar-power"),
    ];

    return profile;
}

pub fn get_stream_ultra_x_profile() -> DeviceProfile {
    let mut profile = DeviceProfile::new("stream_ultra_x", "Stream Ultra X", CommandFormat::ProV2);

    profile.sensors = vec![
        SensorDef::new("battery_level", "Battery Level", "cmsBattSoc").measurement("%", "battery").icon("mdi:battery"),
        SensorDef::new("backup_reserve_level", "Backup Reserve Level", "backupReverseSoc")
            .measurement("%", "battery")
            .icon("mdi:battery-heart"),
        SensorDef::new("max_charge_level", "Max Charge Level", "cmsMaxChgSoc")
            .measurement("%", "battery")
            .icon("mdi:battery-charging-100"),
        SensorDef::new("min_discharge_level", "Min Discharge Level", "cmsMinDsgSoc")
            .measurement("%", "battery")
            .icon("mdi:battery-low"),
        SensorDef::new("solar_power", "Solar Input Power", "powGetPvSum").measurement("W", "power").icon("mdi:solar-power"),
        SensorDef::new("system_load_power", "System Load Power", "powGetSysLoad")
            .measurement("W", "power")
            .icon("mdi:home-lightning-bolt"),
        SensorDef::new("grid_power", "Grid Power", "powGetSysGrid").measurement("W", "power").icon("mdi:transmission-tower"),
        SensorDef::new("grid_connection_power", "Grid Connection Power", "gridConnectionPower")
            .measurement("W", "power")
            .icon("mdi:transmission-tower"),
        SensorDef::new("battery_power", "Battery Power", "powGetBpCms").measurement("W", "power").icon("mdi:battery-sync"),
        SensorDef::new("last_update", "Last Update", "quota_cloud_ts").timestamp().icon("mdi:clock-outline"),
    ];

    profile.binary_sensors = vec![
        BinarySensorDef::new("ac1_switch", "AC1 Switch", "relay2Onoff")
            .device_class("power")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        BinarySensorDef::new("ac2_switch", "AC2 Switch", "relay3Onoff")
            .device_class("power")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        BinarySensorDef::new("self_powered_mode", "Self-Powered Mode", "energyStrategyOperateMode.operateSelfPoweredOpen")
            .icons("mdi:home-battery", "mdi:home-battery-outline"),
        BinarySensorDef::new("ai_mode", "AI Mode", "energyStrategyOperateMode.operateIntelligentScheduleModeOpen")
            .icons("mdi:robot", "mdi:robot-outline"),
        BinarySensorDef::new("battery_charging", "Battery Charging", "powGetBpCms")
            .derived(DeriveCondition::GreaterThan(10.0))
            .device_class("battery_charging")
            .icons("mdi:battery-charging", "mdi:battery"),
        BinarySensorDef::new("battery_discharging", "Battery Discharging", "powGetBpCms")
            .derived(DeriveCondition::LessThan(-10.0))
            .icons("mdi:battery-arrow-down", "mdi:battery"),
        BinarySensorDef::new("solar_generating", "Solar Generating", "powGetPvSum")
            .derived(DeriveCondition::GreaterThan(10.0))
            .icons("mdi:solar-power", "mdi:solar-power-variant-outline"),
        BinarySensorDef::new("grid_feed_in", "Grid Feed-in", "gridConnectionPower")
            .derived(DeriveCondition::LessThan(-10.0))
            .icons("mdi:transmission-tower-export", "mdi:transmission-tower"),
        BinarySensorDef::new("grid_consuming", "Grid Consuming", "gridConnectionPower")
            .derived(DeriveCondition::GreaterThan(10.0))
            .icons("mdi:transmission-tower-import", "mdi:transmission-tower"),
    ];

    profile.switches = vec![
        SwitchDef::new("ac1_output", "AC1 Output", "relay2Onoff", "cfgRelay2Onoff")
            .device_class("outlet")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        SwitchDef::new("ac2_output", "AC2 Output", "relay3Onoff", "cfgRelay3Onoff")
            .device_class("outlet")
            .icons("mdi:power-socket", "mdi:power-socket-off"),
        SwitchDef::new("feed_in_control", "Feed-in Control", "feedGridMode", "cfgFeedGridMode")
            .values(2, 1)
            .icons("mdi:transmission-tower-export", "mdi:transmission-tower-off"),
    ];

    profile.numbers = vec![
        NumberDef::new("backup_reserve_level", "Backup Reserve Level", "backupReverseSoc", "cfgBackupReverseSoc")
            .range(3.0, 95.0, 1.0)
            .unit("%")
            .icon("mdi:battery-heart"),
        NumberDef::new("max_charge_level", "Max Charge Level", "cmsMaxChgSoc", "cfgMaxChgSoc")
            .range(50.0, 100.0, 1.0)
            .unit("%")
            .icon("mdi:battery-charging-100"),
        NumberDef::new("min_discharge_level", "Min Discharge Level", "cmsMinDsgSoc", "cfgMinDsgSoc")
            .range(0.0, 30.0, 1.0)
            .unit("%")
            .icon("mdi:battery-low"),
    ];

    profile.selects = vec![SelectDef::new(
        "operating_mode",
        "Operating Mode",
        "cfgEnergyStrategyOperateMode",
        vec![
            ("Self-Powered", json!({"operateSelfPoweredOpen": true})),
            ("AI Mode", json!({"operateIntelligentScheduleModeOpen": true})),
        ],
    )
    .state("energyStrategyOperateMode")
    .icon("mdi:cog")];

    profile.buttons = vec![ButtonDef::new("power_off", "Power Off", "cfgPowerOff").icon("mdi:power")];

    return profile;
}

fn brightness_to_percent(raw: f64) -> f64 {
    (raw / 1023.0 * 100.0).round()
}

fn brightness_from_percent(percent: f64) -> f64 {
    (percent / 100.0 * 1023.0).round()
}

pub fn get_smart_plug_profile() -> DeviceProfile {
    let mut profile = DeviceProfile::new("smart_plug", "Smart Plug S401", CommandFormat::SmartPlug);

    profile.sensors = vec![
        SensorDef::new("power", "Power", "2_1.watts").measurement("W", "power"),
        SensorDef::new("voltage", "Voltage", "2_1.volt").measurement("V", "voltage"),
        SensorDef::new("current", "Current", "2_1.current").measurement("A", "current"),
        SensorDef::new("temperature", "Temperature", "2_1.temp").measurement("°C", "temperature"),
        SensorDef::new("frequency", "Frequency", "2_1.freq").measurement("Hz", "frequency"),
        SensorDef::new("max_current", "Maximum Current", "2_1.maxCur").measurement("A", "current").icon("mdi:current-ac"),
        SensorDef::new("overload_protection_threshold", "Overload Protection Threshold", "2_1.maxWatts")
            .measurement("W", "power")
            .icon("mdi:shield-alert"),
        SensorDef::new("error_code", "Error Code", "2_1.errCode").icon("mdi:alert-circle").diagnostic(),
        SensorDef::new("warning_code", "Warning Code", "2_1.warnCode").icon("mdi:alert").diagnostic(),
        SensorDef::new("last_update", "Last Update", "2_1.updateTime")
            .timestamp()
            .icon("mdi:clock-outline")
            .diagnostic(),
    ];

    profile.switches = vec![SwitchDef::new("outlet", "Outlet", "2_1.switchSta", "plugSwitch")
        .args(CommandArgs::smart_plug(SMART_PLUG_CMD_SWITCH))
        .values(1, 0)
        .device_class("outlet")
        .icons("mdi:power-plug", "mdi:power-plug-off")];

    profile.numbers = vec![NumberDef::new("led_brightness", "LED Brightness", "2_1.brightness", "brightness")
        .args(CommandArgs::smart_plug(SMART_PLUG_CMD_BRIGHTNESS))
        .range(0.0, 100.0, 1.0)
        .unit("%")
        .icon("mdi:brightness-6")
        .scaled(brightness_to_percent, brightness_from_percent)];

    return profile;
}

/// Key prefixes under which devices report additional battery packs
pub const EXTRA_BATTERY_PREFIXES: [&str; 9] = [
    "slave1",
    "slave2",
    "slave3",
    "bms2",
    "bms3",
    "eb1",
    "eb2",
    "extraBms",
    "slaveBattery",
];

pub fn get_extra_battery_sensor_definitions() -> Vec<ExtraBatterySensorDef> {
    return vec![
        ExtraBatterySensorDef {
            key: "connected",
            name: "Connected",
            device_class: "connectivity",
            icon_on: "mdi:battery-plus",
            icon_off: "mdi:battery-off",
            check_suffix: "Soc",
            condition: None,
        },
        ExtraBatterySensorDef {
            key: "battery_low",
            name: "Battery Low",
            device_class: "battery",
            icon_on: "mdi:battery-alert",
            icon_off: "mdi:battery",
            check_suffix: "Soc",
            condition: Some(DeriveCondition::LessThan(20.0)),
        },
        ExtraBatterySensorDef {
            key: "battery_full",
            name: "Battery Full",
            device_class: "battery",
            icon_on: "mdi:battery-check",
            icon_off: "mdi:battery",
            check_suffix: "Soc",
            condition: Some(DeriveCondition::AtLeast(100.0)),
        },
        ExtraBatterySensorDef {
            key: "over_temp",
            name: "Over Temperature",
            device_class: "heat",
            icon_on: "mdi:thermometer-alert",
            icon_off: "mdi:thermometer",
            check_suffix: "Temp",
            condition: Some(DeriveCondition::GreaterThan(45.0)),
        },
    ];
}

/// Selectable poll intervals in seconds
pub const UPDATE_INTERVAL_OPTIONS: [u64; 5] = [5, 10, 15, 30, 60];

/// Local-only select attached to every device; changes the coordinator poll interval
pub fn update_interval_select() -> SelectDef {
    SelectDef::new(
        "update_interval",
        "Update Interval",
        "",
        vec![
            ("5 seconds (Fast)", json!(5)),
            ("10 seconds", json!(10)),
            ("15 seconds (Recommended)", json!(15)),
            ("30 seconds", json!(30)),
            ("60 seconds (Slow)", json!(60)),
        ],
    )
    .icon("mdi:update")
    .local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness_mapping() {
        assert_eq!(brightness_to_percent(1023.0), 100.0);
        assert_eq!(brightness_to_percent(0.0), 0.0);
        assert_eq!(brightness_to_percent(512.0), 50.0);
        assert_eq!(brightness_from_percent(100.0), 1023.0);
        assert_eq!(brightness_from_percent(50.0), 512.0);
    }

    #[test]
    fn test_update_interval_select_matches_options() {
        let select = update_interval_select();
        assert!(select.is_local);
        let values: Vec<u64> = select.options.iter().filter_map(|(_, v)| v.as_u64()).collect();
        assert_eq!(values, UPDATE_INTERVAL_OPTIONS.to_vec());
    }

    #[test]
    fn test_delta_pro_entities_carry_pro_v1_args() {
        let profile = get_delta_pro_profile();
        for switch in &profile.switches {
            assert!(switch.command_args.cmd_set.is_some(), "{}", switch.key);
            assert!(switch.command_args.cmd_id.is_some(), "{}", switch.key);
        }
        for select in &profile.selects {
            assert_eq!(select.command_args.cmd_set, Some(32));
        }
    }

    #[test]
    fn test_delta_2_entities_carry_module_type() {
        let profile = get_delta_2_profile();
        for switch in &profile.switches {
            assert!(switch.command_args.module_type.is_some(), "{}", switch.key);
            assert!(switch.command_args.operate_type.is_some(), "{}", switch.key);
        }
    }

    #[test]
    fn test_extra_battery_definitions() {
        let defs = get_extra_battery_sensor_definitions();
        let keys: Vec<&str> = defs.iter().map(|d| d.key).collect();
        assert_eq!(keys, vec!["connected", "battery_low", "battery_full", "over_temp"]);
        assert!(defs[0].condition.is_none());
        assert_eq!(defs[3].check_suffix, "Temp");
        assert_eq!(EXTRA_BATTERY_PREFIXES.len(), 9);
    }

    #[test]
    fn test_last_update_sensors_are_timestamps() {
        for profile in [get_stream_ultra_x_profile(), get_smart_plug_profile()] {
            let sensor = profile.sensors.iter().find(|s| s.key == "last_update").unwrap();
            assert!(sensor.is_timestamp(), "{}", profile.device_type);
        }
    }
}
