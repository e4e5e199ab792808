//! Command payload builders, one per device firmware dialect.
//!
//! | Format       | Devices                        | Payload                                                       |
//! |--------------|--------------------------------|---------------------------------------------------------------|
//! | `ProV2`      | Delta Pro 3, Stream Ultra X    | `{sn, cmdId:17, cmdFunc:254, dirDest:1, dirSrc:1, dest:2, needAck:true, params}` |
//! | `ProV1`      | Delta Pro                      | `{sn, params:{cmdSet, id, ...params}}`                        |
//! | `DeltaV2`    | Delta 2                        | `{id, version:"1.0", sn, moduleType, operateType, params}`    |
//! | `SmartPlug`  | Smart Plug S401                | `{sn, cmdCode, params}`                                       |

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::EcoFlowError;
use crate::get_unix_ts_ms;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandFormat {
    ProV2,
    ProV1,
    DeltaV2,
    SmartPlug,
}

impl CommandFormat {
    pub const ALL: [CommandFormat; 4] = [
        CommandFormat::ProV2,
        CommandFormat::ProV1,
        CommandFormat::DeltaV2,
        CommandFormat::SmartPlug,
    ];

    pub fn from_str(s: &str) -> Result<Self, EcoFlowError> {
        match s {
            "pro_v2" => Ok(CommandFormat::ProV2),
            "pro_v1" => Ok(CommandFormat::ProV1),
            "delta_v2" => Ok(CommandFormat::DeltaV2),
            "smart_plug" => Ok(CommandFormat::SmartPlug),
            other => Err(EcoFlowError::UnknownCommandFormat(other.to_string())),
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            CommandFormat::ProV2 => "pro_v2".to_string(),
            CommandFormat::ProV1 => "pro_v1".to_string(),
            CommandFormat::DeltaV2 => "delta_v2".to_string(),
            CommandFormat::SmartPlug => "smart_plug".to_string(),
        }
    }
}

/// Dialect-identifying arguments. Which ones are required depends on the format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandArgs {
    pub cmd_set: Option<i64>,
    pub cmd_id: Option<i64>,
    pub module_type: Option<i64>,
    pub operate_type: Option<String>,
    pub cmd_code: Option<String>,
}

impl CommandArgs {
    pub fn none() -> Self {
        CommandArgs::default()
    }

    pub fn pro_v1(cmd_set: i64, cmd_id: i64) -> Self {
        CommandArgs {
            cmd_set: Some(cmd_set),
            cmd_id: Some(cmd_id),
            ..Default::default()
        }
    }

    pub fn delta_v2(module_type: i64, operate_type: &str) -> Self {
        CommandArgs {
            module_type: Some(module_type),
            operate_type: Some(operate_type.to_string()),
            ..Default::default()
        }
    }

    pub fn smart_plug(cmd_code: &str) -> Self {
        CommandArgs {
            cmd_code: Some(cmd_code.to_string()),
            ..Default::default()
        }
    }

    fn require_cmd_set(&self) -> Result<i64, EcoFlowError> {
        self.cmd_set.ok_or(EcoFlowError::MissingArgument("cmd_set"))
    }

    fn require_cmd_id(&self) -> Result<i64, EcoFlowError> {
        self.cmd_id.ok_or(EcoFlowError::MissingArgument("cmd_id"))
    }

    fn require_module_type(&self) -> Result<i64, EcoFlowError> {
        self.module_type.ok_or(EcoFlowError::MissingArgument("module_type"))
    }

    fn require_operate_type(&self) -> Result<&str, EcoFlowError> {
        self.operate_type.as_deref().ok_or(EcoFlowError::MissingArgument("operate_type"))
    }

    fn require_cmd_code(&self) -> Result<&str, EcoFlowError> {
        self.cmd_code.as_deref().ok_or(EcoFlowError::MissingArgument("cmd_code"))
    }
}

/// Build a complete payload for `format`. `params` is passed through untouched.
pub fn build_command(
    format: CommandFormat,
    device_sn: &str,
    params: Map<String, Value>,
    args: &CommandArgs,
) -> Result<Value, EcoFlowError> {
    match format {
        CommandFormat::ProV2 => Ok(build_pro_v2(device_sn, params)),
        CommandFormat::ProV1 => build_pro_v1(device_sn, params, args),
        CommandFormat::DeltaV2 => build_delta_v2(device_sn, params, args),
        CommandFormat::SmartPlug => build_smart_plug(device_sn, params, args),
    }
}

/// Same as [`build_command`] with the format given by name, e.g. `"pro_v2"`.
pub fn build_command_by_name(
    format: &str,
    device_sn: &str,
    params: Map<String, Value>,
    args: &CommandArgs,
) -> Result<Value, EcoFlowError> {
    build_command(CommandFormat::from_str(format)?, device_sn, params, args)
}

fn build_pro_v2(device_sn: &str, params: Map<String, Value>) -> Value {
    json!({
        "sn": device_sn,
        "cmdId": 17,
        "cmdFunc": 254,
        "dirDest": 1,
        "dirSrc": 1,
        "dest": 2,
        "needAck": true,
        "params": params,
    })
}

fn build_pro_v1(device_sn: &str, params: Map<String, Value>, args: &CommandArgs) -> Result<Value, EcoFlowError> {
    let cmd_set = args.require_cmd_set()?;
    let cmd_id = args.require_cmd_id()?;

    /* caller makes sure params do not carry cmdSet or id themselves */
    let mut inner = Map::new();
    inner.insert("cmdSet".to_string(), json!(cmd_set));
    inner.insert("id".to_string(), json!(cmd_id));
    inner.extend(params);

    Ok(json!({
        "sn": device_sn,
        "params": inner,
    }))
}

fn build_delta_v2(device_sn: &str, params: Map<String, Value>, args: &CommandArgs) -> Result<Value, EcoFlowError> {
    let module_type = args.require_module_type()?;
    let operate_type = args.require_operate_type()?;

    Ok(json!({
        "id": get_unix_ts_ms(),
        "version": "1.0",
        "sn": device_sn,
        "moduleType": module_type,
        "operateType": operate_type,
        "params": params,
    }))
}

fn build_smart_plug(device_sn: &str, params: Map<String, Value>, args: &CommandArgs) -> Result<Value, EcoFlowError> {
    let cmd_code = args.require_cmd_code()?;

    Ok(json!({
        "sn": device_sn,
        "cmdCode": cmd_code,
        "params": params,
    }))
}
