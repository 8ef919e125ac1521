//! Integration tests for message and interface descriptor files

use dfi::descriptor::{InterfaceDescriptor, MessageDescriptor, Version};
use dfi::error_stack;
use dfi::json;
use dfi::DfiError;
use std::fs;
use tempfile::TempDir;

const MISSING_VERSION: &str = "\
:header
type=message
name=poi
:message
{DD lat lon}
";

const TWO_STRUCTS: &str = "\
:header
type=message
name=poi
version=1.2.0
:annotations
classname=org.example.PointOfInterest
:types
location={DD lat lon}
label={tb text priority}
:message
{llocation;llabel;J where what timestamp}
";

const LINKED_LIST: &str = "\
:header
type=message
name=list
version=1.0.0
:types
node={Lnode;I next value}
:message
{lnode;I head length}
";

#[test]
fn test_missing_version_fails() {
    error_stack::clear();
    let error = MessageDescriptor::parse(MISSING_VERSION).unwrap_err();
    assert!(matches!(error.root_cause(), DfiError::MissingVersion));
    let messages = error_stack::drain();
    assert!(messages.iter().any(|m| m == "missing version in header section"));
}

#[test]
fn test_message_with_two_structs() {
    let message = MessageDescriptor::parse(TWO_STRUCTS).unwrap();
    assert_eq!(message.version(), &Version::new(1, 2, 0));
    assert_eq!(message.info().types().len(), 2);

    let ty = message.message_type();
    let offsets: Vec<usize> = ty.fields().iter().map(|f| f.offset).collect();
    // location: 16 bytes, label: {char*; uint8_t} padded to 16, then int64
    assert_eq!(offsets, vec![0, 16, 32]);
    assert_eq!(ty.size(), 40);
    assert_eq!(ty.alignment(), 8);
    assert_eq!(ty.fields()[1].ty.fields()[1].offset, 8);
}

#[test]
fn test_parse_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("poi.descriptor");
    fs::write(&path, TWO_STRUCTS).unwrap();
    let message = MessageDescriptor::parse_reader(fs::File::open(&path).unwrap()).unwrap();
    assert_eq!(message.name(), "poi");
}

#[test]
fn test_invalid_version_names_header() {
    error_stack::clear();
    let text = TWO_STRUCTS.replace("version=1.2.0", "version=1.x");
    let error = MessageDescriptor::parse(&text).unwrap_err();
    assert!(error.to_string().starts_with("Error parsing header section: Invalid version '1.x'"));
    error_stack::clear();
}

#[test]
fn test_type_referencing_later_type_fails() {
    error_stack::clear();
    let text = TWO_STRUCTS.replace("location={DD lat lon}", "location={llabel; l}");
    let error = MessageDescriptor::parse(&text).unwrap_err();
    assert!(matches!(error.root_cause(), DfiError::UnknownType { .. }));
    error_stack::clear();
}

#[test]
fn test_interface_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calculator.descriptor");
    fs::write(
        &path,
        "\
:header
type=interface
name=calculator
version=1.0.0
:methods
add(DD)D=add(#am=handle;PDD#am=pre;*D)N
sqrt(D)D=sqrt(#am=handle;PD#am=pre;*D)N
",
    )
    .unwrap();
    let interface = InterfaceDescriptor::parse_reader(fs::File::open(&path).unwrap()).unwrap();
    let ids: Vec<&str> = interface.methods().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["add(DD)D", "sqrt(D)D"]);
    assert_eq!(interface.method("sqrt(D)D").unwrap().index, 1);

    let summary = interface.summary_json();
    assert_eq!(summary["version"], "version<1.0.0>");
    assert_eq!(summary["methods"].as_array().unwrap().len(), 2);
}

#[test]
fn test_self_referencing_type_section() {
    let message = MessageDescriptor::parse(LINKED_LIST).unwrap();
    let node = message.info().type_named("node").unwrap();
    assert_eq!(node.size(), 16);
    assert_eq!(node.fields()[0].ty.element_type().unwrap().fields().len(), 2);

    let text = r#"{"head":{"next":{"next":{"next":null,"value":3},"value":2},"value":1},"length":3}"#;
    let value = json::deserialize(message.message_type(), text).unwrap();
    assert_eq!(value.to_json().unwrap(), text);
    drop(value);

    // The message keeps the node type alive after the table is gone
    let message_type = message.message_type().clone();
    drop(message);
    let value = json::deserialize(&message_type, text).unwrap();
    assert_eq!(value.to_json().unwrap(), text);
}

#[test]
fn test_type_containing_itself_by_value_fails() {
    error_stack::clear();
    let text = LINKED_LIST.replace("node={Lnode;I next value}", "node={lnode;I next value}");
    let error = MessageDescriptor::parse(&text).unwrap_err();
    assert!(error.to_string().contains("cannot contain itself by value"));
    error_stack::clear();
}

#[test]
fn test_dotted_type_names() {
    let text = LINKED_LIST
        .replace("node={Lnode;", "list.node={Llist.node;")
        .replace("{lnode;", "{llist.node;");
    let message = MessageDescriptor::parse(&text).unwrap();
    assert!(message.info().type_named("list.node").is_some());
    assert_eq!(message.message_type().fields()[0].ty.size(), 16);
}
