//! Recursive-descent parser for type descriptors

use super::{DynType, EnumConstant, MetaEntry, RefTarget, TypeKind, TypeRef, TypeTable};
use crate::common::{
    describe_char, eat_char, parse_name, parse_name_also_accept, Cursor, Expected,
};
use crate::error::{fail, DfiError, DfiResult};
use crate::position::Position;
use crate::types::SimpleType;
use std::sync::{Arc, OnceLock};

/// Characters accepted in metadata values besides name characters
const META_VALUE_EXTRA: &str = "-.";

/// Characters accepted in declared and referenced type names besides name
/// characters
pub(crate) const TYPE_NAME_EXTRA: &str = ".";

pub(crate) fn parse_type(
    descriptor: &str,
    name: Option<&str>,
    refs: Option<&TypeTable>,
) -> DfiResult<DynType> {
    let mut cursor = Cursor::new(descriptor);
    let ty = parse_type_cursor(&mut cursor, name, refs)?;
    eat_char(&mut cursor, Expected::Eof)?;
    tracing::trace!(descriptor, size = ty.size(), "parsed type");
    Ok(ty)
}

/// Parse one type from the cursor, leaving trailing input unconsumed
pub(crate) fn parse_type_cursor(
    cursor: &mut Cursor<'_>,
    name: Option<&str>,
    refs: Option<&TypeTable>,
) -> DfiResult<DynType> {
    TypeParser::new(cursor, refs).parse_any(name.map(str::to_string))
}

/// Parse the body of the named declaration `name`; the body may refer to
/// `name` through pointers and sequences
pub(crate) fn parse_declaration_cursor(
    cursor: &mut Cursor<'_>,
    name: &str,
    refs: Option<&TypeTable>,
) -> DfiResult<Arc<DynType>> {
    TypeParser::new(cursor, refs).parse_declaration(name.to_string())
}

type PendingSlot = Arc<OnceLock<std::sync::Weak<DynType>>>;

struct TypeParser<'c, 'a, 'r> {
    cursor: &'c mut Cursor<'a>,
    refs: Option<&'r TypeTable>,
    /// Typedefs visible at each nesting level, innermost last
    scopes: Vec<Vec<Arc<DynType>>>,
    /// Declarations whose body is being parsed, innermost last
    pending: Vec<(String, PendingSlot)>,
}

impl<'c, 'a, 'r> TypeParser<'c, 'a, 'r> {
    fn new(cursor: &'c mut Cursor<'a>, refs: Option<&'r TypeTable>) -> Self {
        Self {
            cursor,
            refs,
            scopes: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Parse a named type whose body may reference itself
    fn parse_declaration(&mut self, name: String) -> DfiResult<Arc<DynType>> {
        let slot = PendingSlot::default();
        self.pending.push((name.clone(), Arc::clone(&slot)));
        let result = self.parse_any(Some(name.clone()));
        self.pending.pop();
        let ty = result?;
        Self::reject_by_value_pending(&ty)?;

        let ty = Arc::new(ty);
        // The slot is fresh, so this is its only write.
        let _ = slot.set(Arc::downgrade(&ty));
        Ok(ty)
    }

    /// A type cannot hold a declaration that is still being parsed by value;
    /// its size would be infinite
    fn reject_by_value_pending(ty: &DynType) -> DfiResult<()> {
        match ty.kind() {
            TypeKind::Reference(reference) if reference.is_pending() => fail(DfiError::semantic(format!(
                "Type '{}' cannot contain itself by value",
                reference.name
            ))),
            _ => Ok(()),
        }
    }

    fn parse_any(&mut self, name: Option<String>) -> DfiResult<DynType> {
        self.scopes.push(Vec::new());
        let result = self.parse_annotated(name);
        let nested = self.scopes.pop().unwrap_or_default();
        result.map(|mut ty| {
            ty.set_nested(nested);
            ty
        })
    }

    /// Collect `T` typedefs and `#` metadata, then parse the type proper
    fn parse_annotated(&mut self, name: Option<String>) -> DfiResult<DynType> {
        let mut meta = Vec::new();
        loop {
            let position = self.cursor.position();
            match self.cursor.next_char() {
                Some('T') => self.parse_typedef()?,
                Some('#') => meta.push(self.parse_meta_entry()?),
                Some(code) => return self.parse_kind(code, position, name, meta),
                None => {
                    return fail(DfiError::UnexpectedEof {
                        context: "type descriptor".to_string(),
                        position,
                    })
                }
            }
        }
    }

    fn parse_kind(
        &mut self,
        code: char,
        position: Position,
        name: Option<String>,
        meta: Vec<MetaEntry>,
    ) -> DfiResult<DynType> {
        match code {
            '{' => self.parse_complex(name, meta),
            '[' => {
                let element = self.parse_any(None)?;
                // closing bracket is optional
                self.cursor.consume_if(']');
                Ok(DynType::new(name, TypeKind::Sequence(Box::new(element)), meta, Vec::new()))
            }
            '*' => {
                let element = self.parse_any(None)?;
                Ok(DynType::new(name, TypeKind::TypedPointer(Box::new(element)), meta, Vec::new()))
            }
            't' => Ok(DynType::new(name, TypeKind::Text, meta, Vec::new())),
            'E' => Ok(Self::build_enum(name, meta)),
            'l' => {
                let reference = self.parse_reference()?;
                Ok(DynType::new(name, TypeKind::Reference(reference), meta, Vec::new()))
            }
            'L' => {
                let reference = self.parse_reference()?;
                let target = DynType::new(None, TypeKind::Reference(reference), Vec::new(), Vec::new());
                Ok(DynType::new(name, TypeKind::TypedPointer(Box::new(target)), meta, Vec::new()))
            }
            other => match SimpleType::from_code(other) {
                Some(simple) => Ok(DynType::new(name, TypeKind::Simple(simple), meta, Vec::new())),
                None => fail(DfiError::UnknownTypeCode {
                    code: other,
                    position,
                }),
            },
        }
    }

    /// `{` field-types ` ` names `}`; the opening brace is already consumed
    fn parse_complex(&mut self, name: Option<String>, meta: Vec<MetaEntry>) -> DfiResult<DynType> {
        let mut types = Vec::new();
        loop {
            match self.cursor.peek() {
                Some(' ') | Some('}') => break,
                Some(_) => types.push(self.parse_any(None)?),
                None => {
                    return fail(DfiError::UnexpectedEof {
                        context: "complex type, expected '}'".to_string(),
                        position: self.cursor.position(),
                    })
                }
            }
        }

        let mut fields = Vec::with_capacity(types.len());
        for ty in types {
            let position = self.cursor.position();
            if !self.cursor.consume_if(' ') {
                return fail(DfiError::UnexpectedToken {
                    expected: format!("' ' before name of field {}", fields.len()),
                    found: describe_char(self.cursor.peek()),
                    position,
                });
            }
            let field_name = parse_name(self.cursor)?;
            Self::reject_by_value_pending(&ty)?;
            fields.push((field_name, ty));
        }
        eat_char(self.cursor, Expected::Char('}'))?;
        Ok(DynType::complex(name, fields, meta))
    }

    /// `T` name `=` type `;`
    fn parse_typedef(&mut self) -> DfiResult<()> {
        let name = parse_name_also_accept(self.cursor, TYPE_NAME_EXTRA)?;
        eat_char(self.cursor, Expected::Char('='))?;
        let ty = self.parse_declaration(name.clone())?;
        eat_char(self.cursor, Expected::Char(';'))?;

        let scope = match self.scopes.last_mut() {
            Some(scope) => scope,
            None => return fail(DfiError::semantic("typedef outside of a type scope")),
        };
        if scope.iter().any(|existing| existing.name() == Some(name.as_str())) {
            return fail(DfiError::Duplicate {
                what: "typedef",
                name,
            });
        }
        scope.push(ty);
        Ok(())
    }

    /// `#` key `=` value `;`
    fn parse_meta_entry(&mut self) -> DfiResult<MetaEntry> {
        let key = parse_name(self.cursor)?;
        eat_char(self.cursor, Expected::Char('='))?;
        let value = parse_name_also_accept(self.cursor, META_VALUE_EXTRA)?;
        eat_char(self.cursor, Expected::Char(';'))?;
        Ok(MetaEntry { key, value })
    }

    /// name `;` after `l`/`L`
    fn parse_reference(&mut self) -> DfiResult<TypeRef> {
        let name = parse_name_also_accept(self.cursor, TYPE_NAME_EXTRA)?;
        eat_char(self.cursor, Expected::Char(';'))?;
        match self.lookup(&name) {
            Some(target) => Ok(TypeRef::new(name, target)),
            None => fail(DfiError::UnknownType { name }),
        }
    }

    /// Completed typedefs (innermost scope first), then declarations still
    /// being parsed, then the caller's table
    fn lookup(&self, name: &str) -> Option<RefTarget> {
        let completed = self
            .scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|ty| ty.name() == Some(name))
            .cloned();
        if let Some(target) = completed {
            return Some(RefTarget::Shared(target));
        }
        if let Some((_, slot)) = self.pending.iter().rev().find(|(pending, _)| pending == name) {
            return Some(RefTarget::Enclosing(Arc::clone(slot)));
        }
        self.refs
            .and_then(|refs| refs.get(name).cloned())
            .map(RefTarget::Shared)
    }

    /// Integer-valued metadata entries become the enum's constants
    fn build_enum(name: Option<String>, meta: Vec<MetaEntry>) -> DynType {
        let mut constants = Vec::new();
        let mut remaining = Vec::new();
        for entry in meta {
            match entry.value.parse::<i32>() {
                Ok(value) => constants.push(EnumConstant {
                    name: entry.key,
                    value,
                }),
                Err(_) => remaining.push(entry),
            }
        }
        DynType::new(name, TypeKind::Enum(constants), remaining, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_stack;
    use crate::types::layout::POINTER_SIZE;

    fn parse(descriptor: &str) -> DynType {
        DynType::parse(descriptor, None, None).unwrap()
    }

    #[test]
    fn test_simple() {
        let ty = parse("D");
        assert_eq!(ty.as_simple(), Some(SimpleType::Double));
        assert_eq!(ty.size(), 8);
    }

    #[test]
    fn test_complex_layout() {
        let ty = parse("{IID val1 val2 val3}");
        let offsets: Vec<usize> = ty.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(ty.size(), 16);
        assert_eq!(ty.alignment(), 8);
    }

    #[test]
    fn test_empty_complex() {
        let ty = parse("{}");
        assert!(ty.fields().is_empty());
        assert_eq!(ty.size(), 0);
    }

    #[test]
    fn test_nested_complex() {
        let ty = parse("{B{ZJ x y}S a inner b}");
        assert_eq!(ty.fields()[1].offset, 8);
        assert_eq!(ty.fields()[1].ty.size(), 16);
        assert_eq!(ty.fields()[2].offset, 24);
        assert_eq!(ty.size(), 32);
    }

    #[test]
    fn test_sequence_with_and_without_bracket() {
        let open = parse("{[DI values count}");
        let closed = parse("{[D]I values count}");
        assert_eq!(open.size(), closed.size());
        assert_eq!(open.fields()[1].offset, 8 + POINTER_SIZE);
        assert_eq!(open.fields()[0].ty.element_type().unwrap().size(), 8);
        assert_eq!(closed.to_string(), "{[DI values count}");
    }

    #[test]
    fn test_typed_pointer_and_text() {
        let ty = parse("{*Dt value name}");
        assert_eq!(ty.size(), 2 * POINTER_SIZE);
        assert_eq!(ty.fields()[1].ty.descriptor_code(), 't');
    }

    #[test]
    fn test_enum_constants() {
        let ty = parse("#RED=0;#GREEN=1;#BLUE=-1;E");
        assert_eq!(ty.size(), 4);
        assert_eq!(ty.enum_value("BLUE"), Some(-1));
        assert_eq!(ty.enum_name(1), Some("GREEN"));
        assert!(ty.meta_entries().is_empty());
    }

    #[test]
    fn test_meta_is_retained() {
        let ty = parse("#const=true;#unknown_key=x;t");
        assert_eq!(ty.meta("const"), Some("true"));
        assert_eq!(ty.meta("unknown_key"), Some("x"));
        assert_eq!(ty.to_string(), "#const=true;#unknown_key=x;t");
    }

    #[test]
    fn test_typedef_and_references() {
        let ty = parse("Tpoint={DD x y};{lpoint;Lpoint; origin next}");
        assert_eq!(ty.nested_types().len(), 1);
        assert_eq!(ty.fields()[0].ty.size(), 16);
        assert_eq!(ty.fields()[1].offset, 16);
        assert_eq!(ty.fields()[1].ty.element_type().unwrap().resolved().fields().len(), 2);
        assert_eq!(ty.to_string(), "Tpoint={DD x y};{lpoint;Lpoint; origin next}");
    }

    #[test]
    fn test_recursive_typedef() {
        let ty = parse("Tnode={Lnode;[lnode; next children};lnode;");
        let node = ty.resolved();
        assert_eq!(node.size(), POINTER_SIZE + 8 + POINTER_SIZE);
        let next = node.fields()[0].ty.element_type().unwrap();
        assert!(matches!(next.kind(), TypeKind::Reference(reference) if reference.is_recursive()));
        assert_eq!(next.size(), node.size());
        assert_eq!(node.fields()[1].ty.element_type().unwrap().fields().len(), 2);

        // A copy of an inner type keeps resolving on its own
        let copy = node.fields()[0].ty.clone();
        drop(ty);
        assert_eq!(copy.element_type().unwrap().fields().len(), 2);
    }

    #[test]
    fn test_self_containment_by_value_rejected() {
        error_stack::clear();
        assert!(DynType::parse("Tnode={lnode;I next value};lnode;", None, None).is_err());
        assert!(DynType::parse("Tnode={{lnode; inner}I wrapped value};lnode;", None, None).is_err());
        assert!(DynType::parse("Tnode=lnode;;I", None, None).is_err());
        error_stack::clear();
    }

    #[test]
    fn test_reference_from_table() {
        let mut refs = TypeTable::new();
        refs.insert("pair".to_string(), Arc::new(parse("{II a b}")));
        let ty = DynType::parse("[lpair;", None, Some(&refs)).unwrap();
        assert_eq!(ty.element_type().unwrap().size(), 8);
    }

    #[test]
    fn test_unknown_reference() {
        error_stack::clear();
        let error = DynType::parse("{lmissing; a}", None, None).unwrap_err();
        assert_eq!(error.to_string(), "unknown type missing");
        assert_eq!(error_stack::pop().as_deref(), Some("unknown type missing"));
    }

    #[test]
    fn test_unknown_code() {
        error_stack::clear();
        let error = DynType::parse("{IX a b}", None, None).unwrap_err();
        match error {
            DfiError::UnknownTypeCode { code, position } => {
                assert_eq!(code, 'X');
                assert_eq!(position.offset, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        error_stack::clear();
    }

    #[test]
    fn test_unterminated_complex() {
        error_stack::clear();
        assert!(matches!(
            DynType::parse("{II", None, None),
            Err(DfiError::UnexpectedEof { .. })
        ));
        assert!(DynType::parse("{II a b", None, None).is_err());
        assert!(DynType::parse("{II a}", None, None).is_err());
        error_stack::clear();
    }

    #[test]
    fn test_trailing_input_rejected() {
        error_stack::clear();
        assert!(DynType::parse("II", None, None).is_err());
        error_stack::clear();
    }

    #[test]
    fn test_duplicate_typedef() {
        error_stack::clear();
        assert!(matches!(
            DynType::parse("Ta=I;Ta=D;la;", None, None),
            Err(DfiError::Duplicate { .. })
        ));
        error_stack::clear();
    }
}
