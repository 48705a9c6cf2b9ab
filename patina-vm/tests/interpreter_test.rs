// patina-vm - Interpreter integration tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! End-to-end tests for expressions, statements, and control flow.

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

#[test]
fn arithmetic_and_precedence() {
    assert_output!("print 2 + 3 * 4;", "14\n");
    assert_output!("print (2 + 3) * 4;", "20\n");
    assert_output!("print 10 - 4 - 3;", "3\n");
    assert_output!("print -5 + 2;", "-3\n");
    assert_output!("print 2 + 3 * 4 - 6 / 2;", "11.000000\n");
}

#[test]
fn exponent_is_left_associative() {
    assert_output!("print 2 ** 3 ** 2;", "64\n");
    assert_output!("print 2 ** (3 ** 2);", "512\n");
    assert_output!("print 2 ** 10;", "1024\n");
    assert_output!("print 2.0 ** 0.5 * 0.0 + 1.0;", "1.000000\n");
}

#[test]
fn int_and_float_are_distinct() {
    assert_output!("print 7 / 2;", "3.500000\n");
    assert_output!("print 7 %% 2;", "3\n");
    assert_output!("print 7 % 2;", "1\n");
    assert_output!("print 7.5 % 2;", "1.500000\n");
    assert_output!("print 1 + 2.5;", "3.500000\n");
    assert_output!("print 2 * 3;", "6\n");
    assert_output!("print 2.0 * 3;", "6.000000\n");
}

#[test]
fn equality_is_kind_sensitive() {
    assert_output!("print 1 == 1;", "true\n");
    assert_output!("print 1 == 1.0;", "false\n");
    assert_output!("print 1 != 1.0;", "true\n");
    assert_output!("print none == none;", "true\n");
    assert_output!("print none == false;", "false\n");
    assert_output!("print 'ab' == 'ab';", "true\n");
    assert_output!("print 'ab' == 'cd';", "false\n");
}

#[test]
fn comparisons() {
    assert_output!("print 1 < 2;", "true\n");
    assert_output!("print 2 <= 2;", "true\n");
    assert_output!("print 3 > 4;", "false\n");
    assert_output!("print 4 >= 4.0;", "true\n");
    assert_output!("print 1.5 < 2;", "true\n");
}

#[test]
fn bitwise_operators() {
    assert_output!("print 6 & 3;", "2\n");
    assert_output!("print 6 | 3;", "7\n");
    assert_output!("print 6 ^ 3;", "5\n");
    assert_output!("print 1 << 4;", "16\n");
    assert_output!("print 16 >> 2;", "4\n");
    assert_output!("print ~0;", "-1\n");
}

#[test]
fn logical_operators_short_circuit() {
    assert_output!("print true and 1;", "1\n");
    assert_output!("print false and 1;", "false\n");
    assert_output!("print false or 2;", "2\n");
    assert_output!("print 1 or 2;", "1\n");
    assert_output!("print none or 'fallback';", "fallback\n");
    assert_output!("print true && false;", "false\n");
    assert_output!("print false || true;", "true\n");
}

#[test]
fn truthiness() {
    assert_output!("print !none;", "true\n");
    assert_output!("print !false;", "true\n");
    assert_output!("print !0;", "false\n");
    assert_output!("print !'';", "false\n");
    assert_output!("if (0) print 'zero is truthy';", "zero is truthy\n");
}

#[test]
fn ternary_operator() {
    assert_output!("print true ? 'yes' : 'no';", "yes\n");
    assert_output!("print false ? 'yes' : 'no';", "no\n");
    assert_output!("print 1 < 2 ? 1 + 1 : 2 + 2;", "2\n");
}

#[test]
fn string_concatenation_and_repetition() {
    assert_output!("print 'ab' + 'cd';", "abcd\n");
    assert_output!("print 'ab' * 3;", "ababab\n");
    assert_output!("print 3 * 'ab';", "ababab\n");
    assert_output!("print 'ab' * 0;", "\n");
    assert_output!("print '' + '';", "\n");
}

#[test]
fn triple_quoted_strings_span_lines() {
    assert_output!("print '''one\ntwo''';", "one\ntwo\n");
    assert_output!("print \"\"\"a\"b\"\"\";", "a\"b\n");
}

#[test]
fn string_indexing() {
    assert_output!("print 'hello'[0];", "h\n");
    assert_output!("print 'hello'[4];", "o\n");
    assert_output!("print 'hello'[-1];", "o\n");
    assert_output!("print 'hello'[-5];", "h\n");
}

#[test]
fn global_variables() {
    assert_output!("var x = 1; print x;", "1\n");
    assert_output!("var x; print x;", "none\n");
    assert_output!("var x = 1; x = 2; print x;", "2\n");
    assert_output!("var x = 1; var y = x + 1; print y;", "2\n");
}

#[test]
fn local_variables_and_scopes() {
    assert_output!("{ var x = 1; print x; }", "1\n");
    assert_output!("var x = 'global'; { var x = 'local'; print x; } print x;", "local\nglobal\n");
    assert_output!("{ var a = 1; { var b = a + 1; print b; } }", "2\n");
    assert_output!("var x = 1; { x = 2; } print x;", "2\n");
}

#[test]
fn if_and_else() {
    assert_output!("if (true) print 'then';", "then\n");
    assert_output!("if (false) print 'then'; else print 'else';", "else\n");
    assert_output!("if (1 > 2) print 'a'; else if (2 > 1) print 'b'; else print 'c';", "b\n");
}

#[test]
fn while_loops() {
    assert_output!(
        "var i = 0; while (i < 3) { print i; i = i + 1; }",
        "0\n1\n2\n"
    );
    assert_output!("while (false) print 'never';", "");
}

#[test]
fn for_loops() {
    assert_output!(
        "for (var i = 0; i < 3; i = i + 1) print i;",
        "0\n1\n2\n"
    );
    assert_output!(
        "var i = 0; for (; i < 2; i = i + 1) print i;",
        "0\n1\n"
    );
    assert_output!(
        "for (var i = 0; i < 6; i = i + 2) { print i; }",
        "0\n2\n4\n"
    );
    // Condition-less loop still terminates through its body.
    assert_output!(
        "for (var i = 0; i < 1;) { print 'once'; i = 1; }",
        "once\n"
    );
}

#[test]
fn assignment_is_an_expression() {
    assert_output!("var x; var y; x = y = 3; print x; print y;", "3\n3\n");
}

#[test]
fn print_value_forms() {
    assert_output!("print none;", "none\n");
    assert_output!("print true;", "true\n");
    assert_output!("print 1.0;", "1.000000\n");
    assert_output!("print [1, 'two', none];", "[1, two, none]\n");
    assert_output!("func f() { return 1; } print f;", "<func f>\n");
    assert_output!("class A {} print A;", "A\n");
    assert_output!("class A {} print A();", "<A instance>\n");
    assert_output!("print str;", "<native func>\n");
}

#[test]
fn comments_are_skipped() {
    assert_output!("// nothing\nprint 1; // trailing\n/* block /* nested */ */ print 2;", "1\n2\n");
}

#[test]
fn shebang_line_is_skipped() {
    assert_output!("#!/usr/bin/env patina\nprint 'ran';", "ran\n");
}

#[test]
fn negative_zero_and_float_formatting() {
    assert_output!("print 0.5;", "0.500000\n");
    assert_output!("print .5;", "0.500000\n");
    assert_output!("print 10 %% 4;", "2\n");
}

#[test]
fn vm_survives_errors_between_interpret_calls() {
    let mut vm = patina_vm::VM::new();
    let (result, _) = common::run_source_with_vm("var x = 1;", &mut vm);
    assert_eq!(result, InterpretResult::Ok);

    let (result, _) = common::run_source_with_vm("print undefined_name;", &mut vm);
    assert_eq!(result, InterpretResult::RuntimeError);

    // Globals survive the failed call.
    let (result, output) = common::run_source_with_vm("print x;", &mut vm);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "1\n");
}
