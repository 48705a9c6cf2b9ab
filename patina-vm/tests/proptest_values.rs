// patina-vm - Property-based tests for values and interning
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Equality laws for both value representations, interning identity, and
//! compiler robustness on arbitrary input.

use proptest::prelude::*;

use patina_vm::compiler::compile;
use patina_vm::heap::{hash_string, Heap};
use patina_vm::value::Value;

proptest! {
    #[test]
    fn int_values_round_trip(i in any::<i32>()) {
        let value = Value::from_int(i);
        prop_assert!(value.is_int());
        prop_assert!(!value.is_float());
        prop_assert!(!value.is_obj());
        prop_assert!(!value.is_bool());
        prop_assert!(!value.is_none());
        prop_assert_eq!(value.as_int(), i);
    }

    #[test]
    fn float_values_round_trip(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
        let value = Value::from_float(f);
        prop_assert!(value.is_float());
        prop_assert!(!value.is_int());
        prop_assert_eq!(value.as_float(), f);
    }

    #[test]
    fn equality_is_kind_sensitive(i in any::<i32>()) {
        let int = Value::from_int(i);
        let float = Value::from_float(i as f64);
        prop_assert_ne!(int, float);
        prop_assert_eq!(int, Value::from_int(i));
    }

    #[test]
    fn equal_ints_compare_equal_and_unequal_do_not(a in any::<i32>(), b in any::<i32>()) {
        prop_assert_eq!(
            Value::from_int(a) == Value::from_int(b),
            a == b
        );
    }

    #[test]
    fn interning_is_canonical(s in ".{0,40}", t in ".{0,40}") {
        let mut heap = Heap::new();
        let first = heap.intern(&s);
        let second = heap.intern(&s);
        let other = heap.intern(&t);

        prop_assert_eq!(first, second);
        prop_assert_eq!(heap.string(first), s.as_str());
        prop_assert_eq!(first == other, s == t);
    }

    #[test]
    fn intern_owned_matches_intern(s in ".{0,40}") {
        let mut heap = Heap::new();
        let borrowed = heap.intern(&s);
        let owned = heap.intern_owned(s.clone());
        prop_assert_eq!(borrowed, owned);
    }

    #[test]
    fn string_hash_is_deterministic(s in ".{0,64}") {
        prop_assert_eq!(hash_string(&s), hash_string(&s));
    }

    #[test]
    fn compiler_never_panics_on_arbitrary_input(source in ".{0,120}") {
        let mut heap = Heap::new();
        // Success or a list of errors, never a crash.
        let _ = compile(&source, &mut heap);
    }

    #[test]
    fn compiler_never_panics_on_operator_soup(
        source in "[-+*/%&|^<>=!~?:;.,(){}\\[\\]a-z0-9'\" \n]{0,120}"
    ) {
        let mut heap = Heap::new();
        let _ = compile(&source, &mut heap);
    }
}
