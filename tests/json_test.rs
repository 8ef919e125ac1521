//! Integration tests for the JSON codec

use dfi::error_stack;
use dfi::json::{self, NativeValue};
use dfi::types::memory;
use dfi::{DfiError, DynType};
use quickcheck_macros::quickcheck;
use serde_json::json;

#[repr(C)]
struct Person {
    name: *mut libc::c_char,
    age: u8,
    scores: Sequence,
}

#[repr(C)]
struct Sequence {
    cap: u32,
    len: u32,
    buf: *mut f64,
}

#[test]
fn test_deserialize_hello_as_text() {
    let ty = DynType::parse("t", None, None).unwrap();
    let value = json::deserialize(&ty, r#""hello""#).unwrap();
    let text = unsafe { memory::text(value.as_ptr()) }.unwrap();
    assert_eq!(text.to_str().unwrap(), "hello");
}

#[test]
fn test_deserialize_hello_as_complex_fails() {
    error_stack::clear();
    let ty = DynType::parse("{DD a b}", None, None).unwrap();
    let error = json::deserialize(&ty, r#""hello""#).unwrap_err();
    assert!(matches!(error, DfiError::ShapeMismatch { .. }));
    error_stack::clear();
}

#[test]
fn test_native_layout_matches_repr_c() {
    let ty = DynType::parse("{tb[D name age scores}", None, None).unwrap();
    assert_eq!(ty.size(), std::mem::size_of::<Person>());
    let value = json::deserialize(&ty, r#"{"name":"Ada","age":36,"scores":[1.5,2.5]}"#).unwrap();
    let person = unsafe { &*(value.as_ptr() as *const Person) };
    assert_eq!(person.age, 36);
    assert_eq!(person.scores.len, 2);
    assert_eq!(person.scores.cap, 2);
    assert_eq!(unsafe { *person.scores.buf.add(1) }, 2.5);
    assert_eq!(
        unsafe { std::ffi::CStr::from_ptr(person.name) }.to_str().unwrap(),
        "Ada"
    );
}

#[test]
fn test_nested_round_trip() {
    let ty = DynType::parse(
        "Tpoint={DD x y};{lpoint;*lpoint;[lpoint;#A=0;#B=1;E origin next path mode}",
        None,
        None,
    )
    .unwrap();
    let input = json!({
        "origin": {"x": 1.0, "y": 2.0},
        "next": null,
        "path": [{"x": 0.5, "y": -0.5}],
        "mode": "B"
    });
    let value = json::deserialize_value(&ty, &input).unwrap();
    assert_eq!(value.to_value().unwrap(), input);
}

#[test]
fn test_invalid_json_text() {
    error_stack::clear();
    let ty = DynType::parse("I", None, None).unwrap();
    assert!(matches!(json::deserialize(&ty, "{").unwrap_err(), DfiError::Json(_)));
    error_stack::clear();
}

#[test]
fn test_wrong_element_releases_partial_value() {
    error_stack::clear();
    let ty = DynType::parse("[t", None, None).unwrap();
    let error = json::deserialize(&ty, r#"["a", "b", 3]"#).unwrap_err();
    assert!(error.to_string().starts_with("Expected string"));
    error_stack::clear();
}

#[test]
fn test_native_value_ownership_transfer() {
    let ty = DynType::parse("{It id label}", None, None).unwrap();
    let value = json::deserialize(&ty, r#"{"id":1,"label":"x"}"#).unwrap();
    let raw = value.into_raw();
    let back = unsafe { NativeValue::from_raw(&ty, raw) }.unwrap();
    assert_eq!(back.to_json().unwrap(), r#"{"id":1,"label":"x"}"#);
}

#[quickcheck]
fn prop_integers_round_trip(a: i64, b: u32, c: i16, d: bool) -> bool {
    let ty = DynType::parse("{JiSZ a b c d}", None, None).unwrap();
    let input = json!({"a": a, "b": b, "c": c, "d": d});
    let value = json::deserialize_value(&ty, &input).unwrap();
    value.to_value().unwrap() == input
}

#[quickcheck]
fn prop_strings_round_trip(words: Vec<String>) -> bool {
    let words: Vec<String> = words.into_iter().filter(|w| !w.contains('\0')).collect();
    let ty = DynType::parse("[t", None, None).unwrap();
    let input = json!(words);
    let value = json::deserialize_value(&ty, &input).unwrap();
    value.to_value().unwrap() == input
}

#[quickcheck]
fn prop_doubles_round_trip(x: f64) -> bool {
    if !x.is_finite() {
        return true;
    }
    let ty = DynType::parse("D", None, None).unwrap();
    let value = json::deserialize_value(&ty, &json!(x)).unwrap();
    value.to_value().unwrap().as_f64() == Some(x)
}

#[repr(C)]
struct Node {
    next: *mut Node,
    value: i32,
}

#[test]
fn test_linked_list_through_typedef() {
    let ty = DynType::parse("Tnode={Lnode;I next value};lnode;", None, None).unwrap();
    assert_eq!(ty.size(), std::mem::size_of::<Node>());
    assert_eq!(ty.to_string(), "Tnode={Lnode;I next value};lnode;");

    let text = r#"{"next":{"next":{"next":null,"value":3},"value":2},"value":1}"#;
    let value = json::deserialize(&ty, text).unwrap();
    let mut values = Vec::new();
    let mut node = value.as_ptr() as *const Node;
    while !node.is_null() {
        unsafe {
            values.push((*node).value);
            node = (*node).next;
        }
    }
    assert_eq!(values, vec![1, 2, 3]);
    assert_eq!(value.to_json().unwrap(), text);
}
