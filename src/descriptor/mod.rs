//! Message and interface descriptor files
//!
//! A descriptor file is a sequence of `:section` blocks:
//!
//! ```text
//! :header
//! type=interface
//! name=calculator
//! version=1.0.0
//! :annotations
//! classname=org.example.Calculator
//! :types
//! StatsResult={DDD[D average min max input}
//! :methods
//! add(DD)D=add(#am=handle;PDD#am=pre;*D)N
//! ```
//!
//! `:header` comes first, `:annotations` and `:types` are optional, and the
//! file ends with `:message` or `:methods`.

pub mod interface;
pub mod message;
pub mod version;

pub use interface::{InterfaceDescriptor, Method};
pub use message::MessageDescriptor;
pub use version::Version;

use crate::common::{
    eat_char, eat_line_end, parse_name, parse_name_also_accept, parse_name_value_section, Cursor, Expected,
};
use crate::error::{fail, DfiError, DfiResult};
use crate::types::{parse_declaration_cursor, DynType, TypeTable, TYPE_NAME_EXTRA};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::Arc;

pub const HEADER_SECTION: &str = "header";
pub const ANNOTATIONS_SECTION: &str = "annotations";
pub const TYPES_SECTION: &str = "types";

/// Which kind of descriptor a file declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Message,
    Interface,
}

impl DescriptorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DescriptorKind::Message => "message",
            DescriptorKind::Interface => "interface",
        }
    }
}

/// Header, annotations and named types shared by both descriptor kinds
#[derive(Debug, Clone)]
pub struct DescriptorInfo {
    name: String,
    version: Version,
    header: IndexMap<String, String>,
    annotations: IndexMap<String, String>,
    types: TypeTable,
}

impl DescriptorInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }

    pub fn header_entries(&self) -> &IndexMap<String, String> {
        &self.header
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn annotations(&self) -> &IndexMap<String, String> {
        &self.annotations
    }

    /// Named types in declaration order
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn type_named(&self, name: &str) -> Option<&DynType> {
        self.types.get(name).map(Arc::as_ref)
    }

    fn summary(&self, kind: DescriptorKind) -> Value {
        let types: serde_json::Map<String, Value> = self
            .types
            .iter()
            .map(|(name, ty)| (name.clone(), Value::String(ty.to_string())))
            .collect();
        json!({
            "kind": kind.as_str(),
            "name": self.name,
            "version": self.version.to_json_literal(),
            "header": self.header,
            "annotations": self.annotations,
            "types": types,
        })
    }
}

/// Read `:name` followed by a line end
fn parse_section_name(cursor: &mut Cursor<'_>) -> DfiResult<String> {
    eat_char(cursor, Expected::Char(':'))?;
    let name = parse_name(cursor)?;
    eat_line_end(cursor)?;
    Ok(name)
}

fn collect_unique(
    entries: Vec<(String, String)>,
    what: &'static str,
) -> DfiResult<IndexMap<String, String>> {
    let mut map = IndexMap::with_capacity(entries.len());
    for (key, value) in entries {
        if map.contains_key(&key) {
            return fail(DfiError::Duplicate { what, name: key });
        }
        map.insert(key, value);
    }
    Ok(map)
}

fn parse_header(cursor: &mut Cursor<'_>, kind: DescriptorKind) -> DfiResult<(String, Version, IndexMap<String, String>)> {
    let header = collect_unique(parse_name_value_section(cursor)?, "header entry")?;
    if let Some(declared) = header.get("type") {
        if declared != kind.as_str() {
            return fail(DfiError::semantic(format!(
                "Expected descriptor type '{}', got '{}'",
                kind.as_str(),
                declared
            )));
        }
    }
    let name = match header.get("name") {
        Some(name) if !name.is_empty() => name.clone(),
        _ => return fail(DfiError::MissingName),
    };
    let version = match header.get("version") {
        Some(version) => version.parse()?,
        None => return fail(DfiError::MissingVersion),
    };
    Ok((name, version, header))
}

/// Parse `name=type` lines until the next section or end of input.
/// Each type may reference the ones declared before it, and itself through
/// pointers and sequences.
fn parse_types(cursor: &mut Cursor<'_>) -> DfiResult<TypeTable> {
    let mut types = TypeTable::new();
    while let Some(ch) = cursor.peek() {
        if ch == ':' {
            break;
        }
        let name = parse_name_also_accept(cursor, TYPE_NAME_EXTRA)?;
        if types.contains_key(&name) {
            return fail(DfiError::Duplicate { what: "type", name });
        }
        eat_char(cursor, Expected::Char('='))?;
        let ty = parse_declaration_cursor(cursor, &name, Some(&types))?;
        eat_line_end(cursor)?;
        tracing::trace!(name = %name, size = ty.size(), "registered descriptor type");
        types.insert(name, ty);
    }
    Ok(types)
}

/// Parse every section before the final one and return the final
/// section's name, leaving the cursor at its first line
pub(crate) fn parse_info(cursor: &mut Cursor<'_>, kind: DescriptorKind) -> DfiResult<(DescriptorInfo, String)> {
    let first = parse_section_name(cursor).map_err(|e| DfiError::in_section(HEADER_SECTION, e))?;
    if first != HEADER_SECTION {
        return fail(DfiError::semantic(format!(
            "Expected ':{}' as first section, got ':{}'",
            HEADER_SECTION, first
        )));
    }
    let (name, version, header) =
        parse_header(cursor, kind).map_err(|e| DfiError::in_section(HEADER_SECTION, e))?;

    let mut annotations = IndexMap::new();
    let mut types = TypeTable::new();
    let mut section = next_section(cursor, kind)?;
    if section == ANNOTATIONS_SECTION {
        annotations = parse_name_value_section(cursor)
            .and_then(|entries| collect_unique(entries, "annotation"))
            .map_err(|e| DfiError::in_section(ANNOTATIONS_SECTION, e))?;
        section = next_section(cursor, kind)?;
    }
    if section == TYPES_SECTION {
        types = parse_types(cursor).map_err(|e| DfiError::in_section(TYPES_SECTION, e))?;
        section = next_section(cursor, kind)?;
    }

    Ok((
        DescriptorInfo {
            name,
            version,
            header,
            annotations,
            types,
        },
        section,
    ))
}

fn next_section(cursor: &mut Cursor<'_>, kind: DescriptorKind) -> DfiResult<String> {
    if cursor.is_eof() {
        return fail(DfiError::semantic(format!(
            "Missing ':{}' section",
            final_section(kind)
        )));
    }
    parse_section_name(cursor)
}

pub(crate) fn final_section(kind: DescriptorKind) -> &'static str {
    match kind {
        DescriptorKind::Message => message::MESSAGE_SECTION,
        DescriptorKind::Interface => interface::METHODS_SECTION,
    }
}

/// Reject anything other than the expected final section
pub(crate) fn expect_final_section(section: &str, kind: DescriptorKind) -> DfiResult<()> {
    let expected = final_section(kind);
    if section == expected {
        Ok(())
    } else {
        fail(DfiError::semantic(format!(
            "Unexpected section ':{}', expected ':{}'",
            section, expected
        )))
    }
}
