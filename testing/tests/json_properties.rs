//! Property tests for structural equality and default expansion.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use cfn_resource_core::json::{deep_equals, expand_defaults, params_equal};
use cfn_resource_testing::properties::arb_json;
use proptest::prelude::*;
use serde_json::{Value, json};

proptest! {
    #[test]
    fn deep_equals_is_reflexive(tree in arb_json()) {
        prop_assert!(deep_equals(&tree, &tree));
    }

    #[test]
    fn deep_equals_is_symmetric(a in arb_json(), b in arb_json()) {
        prop_assert_eq!(deep_equals(&a, &b), deep_equals(&b, &a));
    }

    #[test]
    fn an_extra_key_breaks_equality(tree in arb_json()) {
        let mut extended = json!({ "Inner": tree.clone() });
        let original = extended.clone();
        extended
            .as_object_mut()
            .unwrap()
            .insert("Extra_Key".to_owned(), Value::Null);
        prop_assert!(!deep_equals(&original, &extended));
        prop_assert!(!params_equal(Some(&original), Some(&extended)));
    }

    #[test]
    fn trees_without_markers_expand_to_themselves(tree in arb_json()) {
        let expanded = expand_defaults(&tree).unwrap();
        prop_assert!(deep_equals(&expanded, &tree));
    }
}

#[test]
fn integer_and_float_spellings_are_equal() {
    assert!(deep_equals(&json!({ "A": [1, 2.0] }), &json!({ "A": [1.0, 2] })));
    assert!(!deep_equals(&json!([1, 2]), &json!([2, 1])));
}
