// patina-vm - Class tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Classes, instances, fields, methods, initializers, inheritance, and
//! bound methods.

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
fn instantiation_and_fields() {
    assert_output!(
        "class Point {} var p = Point(); p.x = 1; p.y = 2; print p.x + p.y;",
        "3\n"
    );
}

#[test]
fn methods_and_this() {
    assert_output!(
        "class Greeter { func greet() { print 'hello'; } } Greeter().greet();",
        "hello\n"
    );
    assert_output!(
        "class Box { func set(v) { this.value = v; return this; } func get() { return this.value; } }\n\
         print Box().set(7).get();",
        "7\n"
    );
}

#[test]
fn initializer_runs_on_instantiation() {
    assert_output!(
        "class Point { func __init__(x, y) { this.x = x; this.y = y; } }\n\
         var p = Point(3, 4);\n\
         print p.x;\n\
         print p.y;",
        "3\n4\n"
    );
}

#[test]
fn initializer_returns_the_instance() {
    assert_output!(
        "class A { func __init__() { this.tag = 'made'; } }\n\
         print A().tag;",
        "made\n"
    );
}

#[test]
fn initializer_arity_is_enforced() {
    assert_runtime_error!("class A { func __init__(x) {} } A();");
    assert_runtime_error!("class A {} A(1);");
}

#[test]
fn inheritance_copies_methods() {
    assert_output!(
        "class A { func greet() { print 'A'; } }\n\
         class B(A) {}\n\
         B().greet();",
        "A\n"
    );
}

#[test]
fn subclass_overrides_and_super_dispatches() {
    assert_output!(
        "class A { func greet() { print 'A'; } }\n\
         class B(A) { func greet() { super.greet(); print 'B'; } }\n\
         B().greet();",
        "A\nB\n"
    );
}

#[test]
fn super_initializer_call() {
    assert_output!(
        "class A { func __init__(x) { this.x = x; } }\n\
         class B(A) { func __init__() { super.__init__(10); this.y = 20; } }\n\
         var b = B();\n\
         print b.x;\n\
         print b.y;",
        "10\n20\n"
    );
}

#[test]
fn super_method_as_a_value() {
    assert_output!(
        "class A { func name() { return 'A'; } }\n\
         class B(A) { func name() { return 'B'; } func parent() { var m = super.name; return m(); } }\n\
         print B().parent();",
        "A\n"
    );
}

#[test]
fn bound_methods_remember_their_receiver() {
    assert_output!(
        "class Counter {\n\
           func __init__() { this.n = 0; }\n\
           func bump() { this.n = this.n + 1; return this.n; }\n\
         }\n\
         var c = Counter();\n\
         var bump = c.bump;\n\
         bump();\n\
         bump();\n\
         print c.n;",
        "2\n"
    );
}

#[test]
fn fields_shadow_methods_on_invoke() {
    assert_output!(
        "class A { func m() { return 'method'; } }\n\
         func replacement() { return 'field'; }\n\
         var a = A();\n\
         a.m = replacement;\n\
         print a.m();",
        "field\n"
    );
}

#[test]
fn methods_close_over_their_class_scope() {
    assert_output!(
        "func build() {\n\
           class Local { func tag() { return 'built'; } }\n\
           return Local;\n\
         }\n\
         var cls = build();\n\
         print cls().tag();",
        "built\n"
    );
}

#[test]
fn inherited_state_through_superclass_initializer() {
    assert_output!(
        "class Shape { func __init__(name) { this.name = name; } func describe() { return this.name; } }\n\
         class Circle(Shape) { func __init__() { super.__init__('circle'); } }\n\
         print Circle().describe();",
        "circle\n"
    );
}

#[test]
fn property_errors() {
    assert_runtime_error!("class A {} print A().missing;");
    assert_runtime_error!("print 1.field;");
    assert_runtime_error!("var x = 'str'; x.field = 1;");
    assert_runtime_error!("class A {} A().m();");
}

#[test]
fn superclass_must_be_a_class() {
    assert_runtime_error!("var NotAClass = 1; class B(NotAClass) {}");
}

#[test]
fn calling_non_callables_fails() {
    assert_runtime_error!("var x = 1; x();");
    assert_runtime_error!("'text'();");
    assert_runtime_error!("none();");
}
