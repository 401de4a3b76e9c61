//! Command bodies and response inspection for the Kasa protocol
//!
//! Every command is a two-level JSON object: a module key (`system`,
//! `emeter`, ...) wrapping an operation key. Responses mirror the same shape
//! and nest an `err_code` field, zero on success.

use serde_json::{json, Value};

use crate::core::{DeviceState, Error, Result, SysInfo};

/// `get_sysinfo` request body
pub fn info() -> Value {
    json!({"system": {"get_sysinfo": {}}})
}

/// `set_relay_state` request body
pub fn set_relay(state: DeviceState) -> Value {
    json!({"system": {"set_relay_state": {"state": state.relay_state()}}})
}

/// `set_led_off` request body; `on` refers to the LED being lit
pub fn set_led(on: bool) -> Value {
    json!({"system": {"set_led_off": {"off": if on { 0 } else { 1 }}}})
}

/// `reboot` request body with a delay in seconds
pub fn reboot(delay: u32) -> Value {
    json!({"system": {"reboot": {"delay": delay}}})
}

/// `get_realtime` energy meter request body (metering plugs only)
pub fn emeter() -> Value {
    json!({"emeter": {"get_realtime": {}}})
}

/// `cnCloud get_info` request body
pub fn cloud_info() -> Value {
    json!({"cnCloud": {"get_info": {}}})
}

/// `get_scaninfo` wifi scan request body
pub fn wifi_scan() -> Value {
    json!({"netif": {"get_scaninfo": {"refresh": 1}}})
}

/// Checks every nested `err_code` in a response, surfacing the first failure
///
/// The error message from `err_msg`, when the device provides one, is carried
/// along in the returned error.
pub fn check_err_code(response: &Value) -> Result<()> {
    let Some(modules) = response.as_object() else {
        return Err(Error::protocol("response is not a JSON object"));
    };
    for (module, ops) in modules {
        let Some(ops) = ops.as_object() else { continue };
        for (op, body) in ops {
            let Some(code) = body.get("err_code").and_then(Value::as_i64) else {
                continue;
            };
            if code != 0 {
                let msg = body
                    .get("err_msg")
                    .and_then(Value::as_str)
                    .unwrap_or("no message");
                return Err(Error::protocol(format!(
                    "{}.{} failed with err_code {}: {}",
                    module, op, code, msg
                )));
            }
        }
    }
    Ok(())
}

/// Extracts a typed [`SysInfo`] from a `get_sysinfo` response
pub fn parse_sysinfo(response: &Value) -> Result<SysInfo> {
    check_err_code(response)?;
    let body = response
        .pointer("/system/get_sysinfo")
        .ok_or_else(|| Error::protocol("response is missing system.get_sysinfo"))?;
    serde_json::from_value(body.clone())
        .map_err(|e| Error::protocol(format!("malformed sysinfo body: {}", e)))
}
