//! Dynamic type descriptors
//!
//! A [`DynType`] is one node of the type graph produced by parsing a type
//! descriptor such as `{IID a b c}`. Each node carries the size, alignment
//! and (for complex types) field offsets a C compiler would compute for the
//! equivalent declaration, so native memory can be read and written through
//! it directly.
//!
//! Children are owned by their parent. By-value references (`lName;`) and
//! typed-pointer references (`LName;`) share a completed named type through
//! an [`Arc`]. A declaration may also refer to itself from inside its own
//! body (a linked-list node pointing at the next node); such references are
//! non-owning and resolve once the declaration completes.

pub mod layout;
pub mod memory;
mod parse;

pub(crate) use parse::{parse_declaration_cursor, parse_type_cursor, TYPE_NAME_EXTRA};

use crate::error::DfiResult;
use indexmap::IndexMap;
use layout::{sequence_layout, struct_layout, POINTER_ALIGN, POINTER_SIZE};
use std::fmt;
use std::io::Read;
use std::os::raw::c_int;
use std::sync::{Arc, OnceLock, Weak};

/// Named types available for `l`/`L` references, in declaration order
pub type TypeTable = IndexMap<String, Arc<DynType>>;

/// Primitive types with a fixed descriptor letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    /// Native `int`, used for status returns
    NativeInt,
    /// Untyped `void*`
    Pointer,
    Void,
}

impl SimpleType {
    pub fn from_code(code: char) -> Option<Self> {
        let simple = match code {
            'Z' => SimpleType::Bool,
            'B' => SimpleType::Int8,
            'b' => SimpleType::UInt8,
            'S' => SimpleType::Int16,
            's' => SimpleType::UInt16,
            'I' => SimpleType::Int32,
            'i' => SimpleType::UInt32,
            'J' => SimpleType::Int64,
            'j' => SimpleType::UInt64,
            'F' => SimpleType::Float,
            'D' => SimpleType::Double,
            'N' => SimpleType::NativeInt,
            'P' => SimpleType::Pointer,
            'V' => SimpleType::Void,
            _ => return None,
        };
        Some(simple)
    }

    pub fn code(self) -> char {
        match self {
            SimpleType::Bool => 'Z',
            SimpleType::Int8 => 'B',
            SimpleType::UInt8 => 'b',
            SimpleType::Int16 => 'S',
            SimpleType::UInt16 => 's',
            SimpleType::Int32 => 'I',
            SimpleType::UInt32 => 'i',
            SimpleType::Int64 => 'J',
            SimpleType::UInt64 => 'j',
            SimpleType::Float => 'F',
            SimpleType::Double => 'D',
            SimpleType::NativeInt => 'N',
            SimpleType::Pointer => 'P',
            SimpleType::Void => 'V',
        }
    }

    /// C spelling, used in messages
    pub fn c_name(self) -> &'static str {
        match self {
            SimpleType::Bool => "bool",
            SimpleType::Int8 => "int8_t",
            SimpleType::UInt8 => "uint8_t",
            SimpleType::Int16 => "int16_t",
            SimpleType::UInt16 => "uint16_t",
            SimpleType::Int32 => "int32_t",
            SimpleType::UInt32 => "uint32_t",
            SimpleType::Int64 => "int64_t",
            SimpleType::UInt64 => "uint64_t",
            SimpleType::Float => "float",
            SimpleType::Double => "double",
            SimpleType::NativeInt => "int",
            SimpleType::Pointer => "void*",
            SimpleType::Void => "void",
        }
    }

    pub fn size(self) -> usize {
        match self {
            SimpleType::Void => 0,
            SimpleType::Bool | SimpleType::Int8 | SimpleType::UInt8 => 1,
            SimpleType::Int16 | SimpleType::UInt16 => 2,
            SimpleType::Int32 | SimpleType::UInt32 | SimpleType::Float => 4,
            SimpleType::Int64 | SimpleType::UInt64 | SimpleType::Double => 8,
            SimpleType::NativeInt => std::mem::size_of::<c_int>(),
            SimpleType::Pointer => POINTER_SIZE,
        }
    }

    pub fn alignment(self) -> usize {
        match self {
            SimpleType::Void => 1,
            SimpleType::Int64 | SimpleType::UInt64 => std::mem::align_of::<u64>(),
            SimpleType::Double => std::mem::align_of::<f64>(),
            SimpleType::NativeInt => std::mem::align_of::<c_int>(),
            SimpleType::Pointer => POINTER_ALIGN,
            other => other.size(),
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            SimpleType::Float | SimpleType::Double | SimpleType::Pointer | SimpleType::Void
        )
    }
}

/// `#key=value;` annotation attached to a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

/// Named field of a complex type
#[derive(Debug, Clone)]
pub struct ComplexField {
    pub name: String,
    pub ty: DynType,
    /// Byte offset from the start of the struct
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumConstant {
    pub name: String,
    pub value: i32,
}

/// Reference to a named type
#[derive(Debug)]
pub struct TypeRef {
    pub name: String,
    target: RefTarget,
}

#[derive(Debug)]
pub(crate) enum RefTarget {
    /// A completed declaration
    Shared(Arc<DynType>),
    /// The declaration this reference sits inside, filled when it completes
    Enclosing(Arc<OnceLock<Weak<DynType>>>),
}

impl TypeRef {
    pub(crate) fn new(name: String, target: RefTarget) -> Self {
        Self { name, target }
    }

    /// The named type, or `None` while its declaration is still being parsed
    pub fn target(&self) -> Option<&DynType> {
        match &self.target {
            RefTarget::Shared(target) => Some(target.as_ref()),
            RefTarget::Enclosing(slot) => {
                let weak = slot.get()?;
                if weak.strong_count() == 0 {
                    return None;
                }
                // SAFETY: an enclosing reference is only reachable through the
                // declaration it names (clones become shared references), so
                // that declaration outlives this borrow.
                Some(unsafe { &*weak.as_ptr() })
            }
        }
    }

    /// Refers to a declaration that has not completed yet
    pub fn is_pending(&self) -> bool {
        matches!(&self.target, RefTarget::Enclosing(slot) if slot.get().is_none())
    }

    /// Refers to the declaration that contains it
    pub fn is_recursive(&self) -> bool {
        matches!(self.target, RefTarget::Enclosing(_))
    }
}

impl Clone for TypeRef {
    fn clone(&self) -> Self {
        // A copy is not owned by the declaration it names, so it holds it
        // strongly.
        let target = match &self.target {
            RefTarget::Shared(target) => RefTarget::Shared(Arc::clone(target)),
            RefTarget::Enclosing(slot) => match slot.get().and_then(Weak::upgrade) {
                Some(target) => RefTarget::Shared(target),
                None => RefTarget::Enclosing(Arc::clone(slot)),
            },
        };
        Self {
            name: self.name.clone(),
            target,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Simple(SimpleType),
    /// `char*` owning a NUL-terminated string
    Text,
    Complex(Vec<ComplexField>),
    /// `{uint32_t cap; uint32_t len; T *buf;}`
    Sequence(Box<DynType>),
    /// Pointer to an owned value of the element type
    TypedPointer(Box<DynType>),
    /// `int32_t` with named constants
    Enum(Vec<EnumConstant>),
    /// Named type used by value
    Reference(TypeRef),
}

/// One node of the type graph
#[derive(Debug, Clone)]
pub struct DynType {
    name: Option<String>,
    kind: TypeKind,
    meta: Vec<MetaEntry>,
    nested: Vec<Arc<DynType>>,
    size: usize,
    alignment: usize,
}

impl DynType {
    /// Build a node, deriving size and alignment from its kind
    pub(crate) fn new(
        name: Option<String>,
        kind: TypeKind,
        meta: Vec<MetaEntry>,
        nested: Vec<Arc<DynType>>,
    ) -> Self {
        let (size, alignment) = match &kind {
            TypeKind::Simple(simple) => (simple.size(), simple.alignment()),
            TypeKind::Text | TypeKind::TypedPointer(_) => (POINTER_SIZE, POINTER_ALIGN),
            TypeKind::Complex(fields) => {
                let layout = struct_layout(fields.iter().map(|f| (f.ty.size(), f.ty.alignment())));
                (layout.size, layout.alignment)
            }
            TypeKind::Sequence(_) => {
                let layout = sequence_layout();
                (layout.size, layout.alignment)
            }
            TypeKind::Enum(_) => (4, 4),
            // Pending references are sized through `size()` once resolved
            TypeKind::Reference(reference) => reference
                .target()
                .map_or((0, 1), |target| (target.size(), target.alignment())),
        };
        Self {
            name,
            kind,
            meta,
            nested,
            size,
            alignment,
        }
    }

    /// Build a complex type, computing each field's offset
    pub(crate) fn complex(
        name: Option<String>,
        fields: Vec<(String, DynType)>,
        meta: Vec<MetaEntry>,
    ) -> Self {
        let layout = struct_layout(fields.iter().map(|(_, ty)| (ty.size(), ty.alignment())));
        let fields = fields
            .into_iter()
            .zip(layout.offsets)
            .map(|((name, ty), offset)| ComplexField { name, ty, offset })
            .collect();
        Self::new(name, TypeKind::Complex(fields), meta, Vec::new())
    }

    /// Simple type node without metadata
    pub fn simple(simple: SimpleType) -> Self {
        Self::new(None, TypeKind::Simple(simple), Vec::new(), Vec::new())
    }

    /// Parse a complete type descriptor
    pub fn parse(descriptor: &str, name: Option<&str>, refs: Option<&TypeTable>) -> DfiResult<Self> {
        parse::parse_type(descriptor, name, refs)
    }

    /// Parse a type descriptor from a stream
    pub fn parse_reader<R: Read>(
        mut reader: R,
        name: Option<&str>,
        refs: Option<&TypeTable>,
    ) -> DfiResult<Self> {
        let mut descriptor = String::new();
        reader
            .read_to_string(&mut descriptor)
            .map_err(|e| crate::error::DfiError::from(e).recorded())?;
        Self::parse(descriptor.trim_end_matches('\n'), name, refs)
    }

    pub(crate) fn set_nested(&mut self, nested: Vec<Arc<DynType>>) {
        self.nested = nested;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// `sizeof` the native value
    pub fn size(&self) -> usize {
        self.resolved().size
    }

    /// `alignof` the native value
    pub fn alignment(&self) -> usize {
        self.resolved().alignment
    }

    /// Descriptor letter that introduces this type
    pub fn descriptor_code(&self) -> char {
        match &self.kind {
            TypeKind::Simple(simple) => simple.code(),
            TypeKind::Text => 't',
            TypeKind::Complex(_) => '{',
            TypeKind::Sequence(_) => '[',
            TypeKind::TypedPointer(_) => '*',
            TypeKind::Enum(_) => 'E',
            TypeKind::Reference(_) => 'l',
        }
    }

    /// Value of the first metadata entry with `key`
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    pub fn meta_entries(&self) -> &[MetaEntry] {
        &self.meta
    }

    /// Typedefs (`Tname=...;`) declared inside this type
    pub fn nested_types(&self) -> &[Arc<DynType>] {
        &self.nested
    }

    /// Follow by-value references to the underlying type
    pub fn resolved(&self) -> &DynType {
        let mut current = self;
        while let TypeKind::Reference(reference) = &current.kind {
            match reference.target() {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    pub fn is_void(&self) -> bool {
        matches!(self.resolved().kind, TypeKind::Simple(SimpleType::Void))
    }

    pub fn as_simple(&self) -> Option<SimpleType> {
        match self.resolved().kind {
            TypeKind::Simple(simple) => Some(simple),
            _ => None,
        }
    }

    /// Fields of a complex type; empty for every other kind
    pub fn fields(&self) -> &[ComplexField] {
        match &self.resolved().kind {
            TypeKind::Complex(fields) => fields,
            _ => &[],
        }
    }

    pub fn field(&self, index: usize) -> Option<&ComplexField> {
        self.fields().get(index)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|field| field.name == name)
    }

    /// Element type of a sequence or typed pointer
    pub fn element_type(&self) -> Option<&DynType> {
        match &self.resolved().kind {
            TypeKind::Sequence(element) | TypeKind::TypedPointer(element) => Some(element),
            _ => None,
        }
    }

    pub fn enum_constants(&self) -> &[EnumConstant] {
        match &self.resolved().kind {
            TypeKind::Enum(constants) => constants,
            _ => &[],
        }
    }

    pub fn enum_name(&self, value: i32) -> Option<&str> {
        self.enum_constants()
            .iter()
            .find(|constant| constant.value == value)
            .map(|constant| constant.name.as_str())
    }

    pub fn enum_value(&self, name: &str) -> Option<i32> {
        self.enum_constants()
            .iter()
            .find(|constant| constant.name == name)
            .map(|constant| constant.value)
    }

    /// Short human-readable description for error messages
    pub fn describe(&self) -> String {
        let what = match &self.resolved().kind {
            TypeKind::Simple(simple) => simple.c_name(),
            TypeKind::Text => "text",
            TypeKind::Complex(_) => "complex type",
            TypeKind::Sequence(_) => "sequence",
            TypeKind::TypedPointer(_) => "typed pointer",
            TypeKind::Enum(_) => "enum",
            TypeKind::Reference(_) => "reference",
        };
        format!("{} '{}'", what, self)
    }

    /// Multi-line layout dump: one line per node with size/alignment/offset
    pub fn layout_tree(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, None, None, 0);
        out
    }

    fn write_tree(&self, out: &mut String, field: Option<&str>, offset: Option<usize>, depth: usize) {
        use std::fmt::Write;
        let indent = "  ".repeat(depth);
        let label = field.or(self.name()).unwrap_or("<anonymous>");
        let _ = write!(out, "{}{}: {} size={} align={}", indent, label, self, self.size(), self.alignment());
        if let Some(offset) = offset {
            let _ = write!(out, " offset={}", offset);
        }
        out.push('\n');
        match &self.kind {
            TypeKind::Complex(fields) => {
                for f in fields {
                    f.ty.write_tree(out, Some(&f.name), Some(f.offset), depth + 1);
                }
            }
            TypeKind::Sequence(element) | TypeKind::TypedPointer(element) => {
                element.write_tree(out, Some("element"), None, depth + 1);
            }
            _ => {}
        }
    }
}

impl fmt::Display for DynType {
    /// Renders the type back into descriptor text
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nested in &self.nested {
            write!(f, "T{}={};", nested.name().unwrap_or_default(), nested)?;
        }
        for entry in &self.meta {
            write!(f, "#{}={};", entry.key, entry.value)?;
        }
        match &self.kind {
            TypeKind::Simple(simple) => write!(f, "{}", simple.code()),
            TypeKind::Text => write!(f, "t"),
            TypeKind::Complex(fields) => {
                write!(f, "{{")?;
                for field in fields {
                    write!(f, "{}", field.ty)?;
                }
                for field in fields {
                    write!(f, " {}", field.name)?;
                }
                write!(f, "}}")
            }
            TypeKind::Sequence(element) => write!(f, "[{}", element),
            TypeKind::TypedPointer(element) => match &element.kind {
                TypeKind::Reference(reference)
                    if element.meta.is_empty() && element.nested.is_empty() =>
                {
                    write!(f, "L{};", reference.name)
                }
                _ => write!(f, "*{}", element),
            },
            TypeKind::Enum(constants) => {
                for constant in constants {
                    write!(f, "#{}={};", constant.name, constant.value)?;
                }
                write!(f, "E")
            }
            TypeKind::Reference(reference) => write!(f, "l{};", reference.name),
        }
    }
}
