// patina-vm - Function call tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Function declarations, calls, returns, recursion, and natives.

mod common;

use common::run_source;
use patina_vm::InterpretResult;

macro_rules! assert_output {
    ($source:expr, $expected:expr) => {
        let (result, output) = run_source($source);
        assert_eq!(
            result,
            InterpretResult::Ok,
            "Failed to run {:?}; got {:?}",
            $source,
            result
        );
        assert_eq!(output, $expected, "Output of {:?} did not match", $source);
    };
}

macro_rules! assert_runtime_error {
    ($source:expr) => {
        let (result, _) = run_source($source);
        assert_eq!(
            result,
            InterpretResult::RuntimeError,
            "Expected runtime error for {:?}",
            $source
        );
    };
}

#[test]
fn call_with_no_arguments() {
    assert_output!("func hello() { print 'hi'; } hello();", "hi\n");
}

#[test]
fn call_with_arguments() {
    assert_output!("func add(a, b) { return a + b; } print add(1, 2);", "3\n");
    assert_output!(
        "func pick(a, b, c) { return b; } print pick(1, 2, 3);",
        "2\n"
    );
}

#[test]
fn return_without_value_yields_none() {
    assert_output!("func f() { return; } print f();", "none\n");
    assert_output!("func f() {} print f();", "none\n");
}

#[test]
fn returns_unwind_early() {
    assert_output!(
        "func f(x) { if (x) return 'early'; print 'late'; } print f(true);",
        "early\n"
    );
}

#[test]
fn recursion() {
    assert_output!(
        "func fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);",
        "55\n"
    );
    assert_output!(
        "func fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } print fact(6);",
        "720\n"
    );
}

#[test]
fn functions_are_first_class() {
    assert_output!(
        "func twice(f, x) { return f(f(x)); } func inc(n) { return n + 1; } print twice(inc, 5);",
        "7\n"
    );
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    assert_runtime_error!("func down() { down(); } down();");
}

#[test]
fn arity_is_enforced() {
    assert_runtime_error!("func f(a) { return a; } f();");
    assert_runtime_error!("func f(a) { return a; } f(1, 2);");
    assert_runtime_error!("func f() {} f(1);");
}

#[test]
fn str_native() {
    assert_output!("print str(42) + '!';", "42!\n");
    assert_output!("print str(true);", "true\n");
    assert_output!("print str(1.5);", "1.50000000\n");
    assert_runtime_error!("str(none);");
    assert_runtime_error!("str('already');");
}

#[test]
fn int_native() {
    assert_output!("print int(3.9);", "3\n");
    assert_output!("print int(-3.9);", "-3\n");
    assert_output!("print int(5);", "5\n");
    assert_runtime_error!("int('nope');");
}

#[test]
fn time_native_returns_a_float() {
    assert_output!("var t = time(); print t > 0.0;", "true\n");
    assert_runtime_error!("time(1);");
}

#[test]
fn native_result_replaces_callee_and_arguments() {
    assert_output!("print 1 + int(1.0) + 1;", "3\n");
}
