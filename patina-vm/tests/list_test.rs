// patina-vm - List tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! List literals, indexing, negative indices, and element assignment.

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
fn literals_preserve_order() {
    assert_output!("print [1, 2, 3];", "[1, 2, 3]\n");
    assert_output!("print [];", "[]\n");
    assert_output!("print [1, 'two', none, true];", "[1, two, none, true]\n");
    assert_output!("print [1 + 1, 2 * 2];", "[2, 4]\n");
    assert_output!("print [1, 2, 3,];", "[1, 2, 3]\n");
}

#[test]
fn nested_lists() {
    assert_output!("print [[1, 2], [3]];", "[[1, 2], [3]]\n");
    assert_output!("var xs = [[1, 2], [3, 4]]; print xs[1][0];", "3\n");
}

#[test]
fn indexing() {
    assert_output!("var xs = [10, 20, 30]; print xs[0];", "10\n");
    assert_output!("var xs = [10, 20, 30]; print xs[2];", "30\n");
    assert_output!("var xs = [10, 20, 30]; print xs[1 + 1];", "30\n");
}

#[test]
fn negative_indices_wrap() {
    assert_output!("var xs = [10, 20, 30]; print xs[-1];", "30\n");
    assert_output!("var xs = [10, 20, 30]; print xs[-3];", "10\n");
}

#[test]
fn element_assignment() {
    assert_output!("var xs = [10, 20, 30]; xs[0] = 99; print xs[0];", "99\n");
    assert_output!("var xs = [10, 20, 30]; xs[-1] = 5; print xs;", "[10, 20, 5]\n");
    // The assignment is an expression producing the stored value.
    assert_output!("var xs = [1]; print xs[0] = 42;", "42\n");
}

#[test]
fn spec_scenario_index_and_store() {
    assert_output!(
        "var xs = [10, 20, 30]; print xs[-1]; xs[0] = 99; print xs[0];",
        "30\n99\n"
    );
}

#[test]
fn out_of_range_indices_are_rejected_before_wrapping() {
    assert_runtime_error!("var xs = [1, 2, 3]; print xs[3];");
    assert_runtime_error!("var xs = [1, 2, 3]; print xs[-4];");
    assert_runtime_error!("var xs = [1, 2, 3]; print xs[-100];");
    assert_runtime_error!("var xs = []; print xs[0];");
    assert_runtime_error!("var xs = [1, 2, 3]; xs[3] = 0;");
    assert_runtime_error!("var xs = [1, 2, 3]; xs[-4] = 0;");
}

#[test]
fn index_kind_errors() {
    assert_runtime_error!("var xs = [1]; print xs['0'];");
    assert_runtime_error!("var xs = [1]; print xs[0.0];");
    assert_runtime_error!("print 1[0];");
    assert_runtime_error!("var xs = [1]; xs[0.5] = 1;");
    assert_runtime_error!("var notlist = 1; notlist[0] = 2;");
}

#[test]
fn string_index_range_errors() {
    assert_runtime_error!("print 'abc'[3];");
    assert_runtime_error!("print 'abc'[-4];");
    assert_runtime_error!("print ''[0];");
}

#[test]
fn lists_compare_by_identity() {
    assert_output!("var a = [1]; var b = [1]; print a == b;", "false\n");
    assert_output!("var a = [1]; var b = a; print a == b;", "true\n");
}

#[test]
fn lists_hold_closures_and_instances() {
    assert_output!(
        "class A { func tag() { return 'a'; } }\n\
         func f() { return 'f'; }\n\
         var xs = [A(), f];\n\
         print xs[0].tag();\n\
         print xs[1]();",
        "a\nf\n"
    );
}

#[test]
fn large_list_literal() {
    // Growth doubles from the initial capacity; push far past it.
    let mut source = String::from("var xs = [");
    for i in 0..100 {
        source.push_str(&format!("{},", i));
    }
    source.push_str("]; print xs[99]; print xs[-100];");
    assert_output!(&source, "99\n0\n");
}
