use chrono::Utc;
use log::debug;

use crate::value::{NativeFunction, Value};

/// Seconds since the Unix epoch, with sub‑second precision.
fn clock(_args: &[Value]) -> Result<Value, String> {
    let now = Utc::now();
    let seconds = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;

    debug!("clock() -> {}", seconds);

    Ok(Value::Number(seconds))
}

/// Functions installed in the global frame of every interpreter.
pub fn builtins() -> Vec<NativeFunction> {
    vec![NativeFunction {
        name: "clock",
        arity: 0,
        func: clock,
    }]
}
