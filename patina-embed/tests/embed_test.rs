// patina-embed - Engine integration tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Tests for the embedding API.

use patina_embed::{Engine, EngineError, ScriptValue, Value};

#[test]
fn eval_returns_captured_output() {
    let mut engine = Engine::new();
    let output = engine.eval("print 'hello from patina';").unwrap();
    assert_eq!(output, "hello from patina\n");
}

#[test]
fn definitions_persist_between_evals() {
    let mut engine = Engine::new();
    engine.eval("var x = 40;").unwrap();
    engine.eval("func add2(n) { return n + 2; }").unwrap();
    let output = engine.eval("print add2(x);").unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn globals_convert_to_rust_values() {
    let mut engine = Engine::new();
    engine
        .eval(
            "var n = none;\n\
             var flag = true;\n\
             var count = 7;\n\
             var ratio = 2.5;\n\
             var name = 'patina';\n\
             var items = [1, 2];",
        )
        .unwrap();

    assert_eq!(engine.global("n"), Some(ScriptValue::None));
    assert_eq!(engine.global("flag"), Some(ScriptValue::Bool(true)));
    assert_eq!(engine.global("count"), Some(ScriptValue::Int(7)));
    assert_eq!(engine.global("ratio"), Some(ScriptValue::Float(2.5)));
    assert_eq!(
        engine.global("name"),
        Some(ScriptValue::Str("patina".to_string()))
    );
    assert_eq!(
        engine.global("items"),
        Some(ScriptValue::Other("[1, 2]".to_string()))
    );
    assert_eq!(engine.global("missing"), None);
}

#[test]
fn errors_map_to_engine_error_kinds() {
    let mut engine = Engine::new();
    assert_eq!(engine.eval("print 1 +;"), Err(EngineError::Compile));
    assert_eq!(engine.eval("print missing;"), Err(EngineError::Runtime));
    // The engine stays usable after both failure kinds.
    assert_eq!(engine.eval("print 'ok';").unwrap(), "ok\n");
}

#[test]
fn registered_natives_are_callable_from_scripts() {
    let mut engine = Engine::new();
    engine.register_native("triple", 1, |_heap, args| {
        if !args[0].is_int() {
            return Err("triple() expects an int.".to_string());
        }
        Ok(Value::from_int(args[0].as_int() * 3))
    });

    assert_eq!(engine.eval("print triple(14);").unwrap(), "42\n");
    assert_eq!(engine.eval("triple('x');"), Err(EngineError::Runtime));
    assert_eq!(engine.eval("triple(1, 2);"), Err(EngineError::Runtime));
}

#[test]
fn natives_can_allocate_results() {
    let mut engine = Engine::new();
    engine.register_native("greeting", 0, |heap, _args| {
        Ok(Value::from_obj(heap.intern("hi there")))
    });
    assert_eq!(engine.eval("print greeting() + '!';").unwrap(), "hi there!\n");
}

#[test]
fn collect_garbage_is_safe_between_evals() {
    let mut engine = Engine::new();
    engine
        .eval("var keep = 'alive'; { var junk = 'dropped' + ' data'; }")
        .unwrap();
    engine.collect_garbage();
    assert_eq!(engine.eval("print keep;").unwrap(), "alive\n");
}

#[test]
fn builtin_natives_are_available() {
    let mut engine = Engine::new();
    assert_eq!(engine.eval("print str(5) + str(5);").unwrap(), "55\n");
    assert_eq!(engine.eval("print int(9.9);").unwrap(), "9\n");
    assert_eq!(engine.eval("print time() > 0.0;").unwrap(), "true\n");
}
