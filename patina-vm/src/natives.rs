// patina-vm - Built-in native functions
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Native functions and their calling contract.
//!
//! A native receives the heap (so it can allocate results) and its
//! arguments, which sit contiguously on the value stack; it reads but does
//! not own them. The VM checks arity before the call, replaces the callee
//! and arguments with the returned value on success, and surfaces an `Err`
//! as a runtime error carrying the native's message.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::heap::Heap;
use crate::value::Value;

/// The native-function ABI.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

/// `time()` - seconds since the Unix epoch, as a float.
pub fn native_time(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("time: {}", e))?;
    Ok(Value::from_float(elapsed.as_secs_f64()))
}

/// `str(x)` - render an int, float, or bool as a string.
pub fn native_str(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let arg = args[0];
    let text = if arg.is_int() {
        arg.as_int().to_string()
    } else if arg.is_float() {
        format!("{:.8}", arg.as_float())
    } else if arg.is_bool() {
        if arg.as_bool() { "true" } else { "false" }.to_string()
    } else {
        return Err("str() expects a number or a bool.".to_string());
    };
    Ok(Value::from_obj(heap.intern_owned(text)))
}

/// `int(x)` - truncate a number to an int.
pub fn native_int(_heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    let arg = args[0];
    if arg.is_int() {
        return Ok(arg);
    }
    if arg.is_float() {
        return Ok(Value::from_int(arg.as_float() as i32));
    }
    Err("int() expects a number.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_renders_ints_floats_and_bools() {
        let mut heap = Heap::new();
        let int = native_str(&mut heap, &[Value::from_int(-7)]).unwrap();
        assert_eq!(heap.string(int.as_obj()), "-7");
        let float = native_str(&mut heap, &[Value::from_float(1.5)]).unwrap();
        assert_eq!(heap.string(float.as_obj()), "1.50000000");
        let truth = native_str(&mut heap, &[Value::TRUE]).unwrap();
        assert_eq!(heap.string(truth.as_obj()), "true");
        assert!(native_str(&mut heap, &[Value::NONE]).is_err());
    }

    #[test]
    fn int_truncates_floats() {
        let mut heap = Heap::new();
        assert_eq!(
            native_int(&mut heap, &[Value::from_float(3.9)]).unwrap(),
            Value::from_int(3)
        );
        assert_eq!(
            native_int(&mut heap, &[Value::from_int(4)]).unwrap(),
            Value::from_int(4)
        );
        assert!(native_int(&mut heap, &[Value::TRUE]).is_err());
    }

    #[test]
    fn time_reports_the_epoch_clock() {
        let mut heap = Heap::new();
        let now = native_time(&mut heap, &[]).unwrap();
        assert!(now.is_float());
        assert!(now.as_float() > 0.0);
    }
}
