//! Function descriptors
//!
//! A function descriptor such as `add(#am=handle;PDD#am=pre;*D)N` names a
//! native function, its argument types and its return type. The `am`
//! metadata key on an argument selects how the argument is passed; see
//! [`ArgumentMeta`].

pub mod call;

pub use call::CallPlan;

use crate::common::{eat_char, parse_name, Cursor, Expected};
use crate::error::{fail, DfiError, DfiResult};
use crate::types::{self, DynType, SimpleType, TypeKind, TypeTable};
use std::fmt;
use std::os::raw::{c_int, c_void};

/// Metadata key selecting the calling convention of an argument
pub const ARGUMENT_META_KEY: &str = "am";

/// How an argument is passed to the native function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentMeta {
    /// Passed by value; the caller supplies a pointer to the value
    Standard,
    /// Opaque service handle (`P`), passed by value
    Handle,
    /// The caller supplies a pointer to its own storage, which is passed as is
    ByReference,
    /// Engine-allocated output buffer passed as the last argument; the
    /// function returns a status and writes its real result through it
    PreAllocatedOutput,
    /// Pointer-to-pointer output the callee allocates into
    Output,
}

impl ArgumentMeta {
    pub fn from_meta(value: Option<&str>) -> DfiResult<Self> {
        match value {
            None | Some("std") => Ok(ArgumentMeta::Standard),
            Some("handle") => Ok(ArgumentMeta::Handle),
            Some("ref") => Ok(ArgumentMeta::ByReference),
            Some("pre") => Ok(ArgumentMeta::PreAllocatedOutput),
            Some("out") => Ok(ArgumentMeta::Output),
            Some(other) => fail(DfiError::semantic(format!(
                "Unknown argument meta '{}'",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArgumentMeta::Standard => "std",
            ArgumentMeta::Handle => "handle",
            ArgumentMeta::ByReference => "ref",
            ArgumentMeta::PreAllocatedOutput => "pre",
            ArgumentMeta::Output => "out",
        }
    }

    /// Whether the caller provides a value for this argument when invoking
    pub fn is_caller_supplied(self) -> bool {
        self != ArgumentMeta::PreAllocatedOutput
    }

    pub fn is_output(self) -> bool {
        matches!(self, ArgumentMeta::PreAllocatedOutput | ArgumentMeta::Output)
    }
}

impl fmt::Display for ArgumentMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared argument
#[derive(Debug, Clone)]
pub struct Argument {
    pub index: usize,
    pub name: String,
    pub ty: DynType,
    pub meta: ArgumentMeta,
}

/// Parsed function descriptor
#[derive(Debug, Clone)]
pub struct DynFunction {
    name: String,
    arguments: Vec<Argument>,
    return_type: DynType,
}

impl DynFunction {
    /// Parse a complete function descriptor
    pub fn parse(descriptor: &str, refs: Option<&TypeTable>) -> DfiResult<Self> {
        let mut cursor = Cursor::new(descriptor);
        let function = Self::parse_cursor(&mut cursor, refs)?;
        eat_char(&mut cursor, Expected::Eof)?;
        Ok(function)
    }

    /// Parse a function descriptor from the cursor, leaving trailing input
    pub(crate) fn parse_cursor(cursor: &mut Cursor<'_>, refs: Option<&TypeTable>) -> DfiResult<Self> {
        let name = parse_name(cursor)?;
        eat_char(cursor, Expected::Char('('))?;

        let mut arguments = Vec::new();
        loop {
            match cursor.peek() {
                Some(')') => break,
                Some(_) => {
                    let index = arguments.len();
                    let ty = types::parse_type_cursor(cursor, None, refs)?;
                    let meta = ArgumentMeta::from_meta(ty.meta(ARGUMENT_META_KEY))?;
                    arguments.push(Argument {
                        index,
                        name: format!("arg{}", index),
                        ty,
                        meta,
                    });
                }
                None => {
                    return fail(DfiError::UnexpectedEof {
                        context: format!("arguments of function '{}'", name),
                        position: cursor.position(),
                    })
                }
            }
        }
        eat_char(cursor, Expected::Char(')'))?;
        let return_type = types::parse_type_cursor(cursor, None, refs)?;

        let function = Self {
            name,
            arguments,
            return_type,
        };
        function.validate()?;
        tracing::debug!(
            function = %function.name,
            arguments = function.arguments.len(),
            "parsed function descriptor"
        );
        Ok(function)
    }

    fn validate(&self) -> DfiResult<()> {
        let last = self.arguments.len().saturating_sub(1);
        for argument in &self.arguments {
            let invalid = |reason: &str| {
                fail(DfiError::semantic(format!(
                    "Invalid argument {} of function '{}': {}",
                    argument.index, self.name, reason
                )))
            };
            let ty = argument.ty.resolved();
            match argument.meta {
                ArgumentMeta::Standard | ArgumentMeta::ByReference => {
                    if ty.is_void() {
                        return invalid("void is not a valid argument type");
                    }
                }
                ArgumentMeta::Handle => {
                    if ty.as_simple() != Some(SimpleType::Pointer) {
                        return invalid("handle argument must be of type 'P'");
                    }
                }
                ArgumentMeta::PreAllocatedOutput => {
                    if !matches!(ty.kind(), TypeKind::TypedPointer(_)) {
                        return invalid("pre-allocated output must be a typed pointer");
                    }
                    if argument.index != last {
                        return invalid("pre-allocated output must be the last argument");
                    }
                    if self.return_type.as_simple() != Some(SimpleType::NativeInt) {
                        return invalid("pre-allocated output requires return type 'N'");
                    }
                }
                ArgumentMeta::Output => {
                    let pointee = match ty.kind() {
                        TypeKind::TypedPointer(element) => element.resolved(),
                        _ => return invalid("output argument must be a typed pointer"),
                    };
                    if !matches!(pointee.kind(), TypeKind::TypedPointer(_) | TypeKind::Text) {
                        return invalid("output argument must point to a typed pointer or text");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    /// `None` for indices past the last argument
    pub fn argument(&self, index: usize) -> Option<&Argument> {
        self.arguments.get(index)
    }

    pub fn argument_type(&self, index: usize) -> Option<&DynType> {
        self.argument(index).map(|argument| &argument.ty)
    }

    pub fn argument_meta(&self, index: usize) -> Option<ArgumentMeta> {
        self.argument(index).map(|argument| argument.meta)
    }

    pub fn return_type(&self) -> &DynType {
        &self.return_type
    }

    /// The pre-allocated output argument, if any
    pub fn pre_allocated_output(&self) -> Option<&Argument> {
        self.arguments
            .iter()
            .find(|argument| argument.meta == ArgumentMeta::PreAllocatedOutput)
    }

    /// Number of pointers a caller passes to [`CallPlan::invoke`]
    pub fn caller_supplied_count(&self) -> usize {
        self.arguments
            .iter()
            .filter(|argument| argument.meta.is_caller_supplied())
            .count()
    }

    /// Whether the native return value is an `int` status
    pub fn returns_status(&self) -> bool {
        self.return_type.as_simple() == Some(SimpleType::NativeInt)
    }

    /// Build the native call interface for this signature
    pub fn prepare(&self) -> DfiResult<CallPlan<'_>> {
        CallPlan::prepare(self)
    }

    /// Prepare and invoke in one step; see [`CallPlan::invoke`]
    ///
    /// # Safety
    /// `function` must be a native function with exactly this signature and
    /// every pointer must satisfy the conventions documented on
    /// [`CallPlan::invoke`].
    pub unsafe fn call(
        &self,
        function: *const c_void,
        return_value: *mut c_void,
        args: &[*mut c_void],
    ) -> DfiResult<c_int> {
        self.prepare()?.invoke(function, return_value, args)
    }
}

impl fmt::Display for DynFunction {
    /// Renders the function back into descriptor text
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for argument in &self.arguments {
            write!(f, "{}", argument.ty)?;
        }
        write!(f, "){}", self.return_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_stack;

    #[test]
    fn test_parse_simple_function() {
        let function = DynFunction::parse("example(III)I", None).unwrap();
        assert_eq!(function.name(), "example");
        assert_eq!(function.argument_count(), 3);
        assert_eq!(function.argument_type(2).unwrap().size(), 4);
        assert!(function.argument_type(3).is_none());
        assert!(function.argument_meta(10).is_none());
        assert_eq!(function.return_type().as_simple(), Some(SimpleType::Int32));
    }

    #[test]
    fn test_parse_zero_arguments() {
        let function = DynFunction::parse("noop()V", None).unwrap();
        assert_eq!(function.argument_count(), 0);
        assert!(function.return_type().is_void());
        assert!(function.argument(0).is_none());
    }

    #[test]
    fn test_argument_meta() {
        let function = DynFunction::parse("add(#am=handle;PDD#am=pre;*D)N", None).unwrap();
        let metas: Vec<ArgumentMeta> = function.arguments().iter().map(|a| a.meta).collect();
        assert_eq!(
            metas,
            vec![
                ArgumentMeta::Handle,
                ArgumentMeta::Standard,
                ArgumentMeta::Standard,
                ArgumentMeta::PreAllocatedOutput
            ]
        );
        assert_eq!(function.caller_supplied_count(), 3);
        assert_eq!(function.pre_allocated_output().unwrap().index, 3);
        assert!(function.returns_status());
        assert_eq!(function.to_string(), "add(#am=handle;PDD#am=pre;*D)N");
    }

    #[test]
    fn test_output_argument() {
        let function = DynFunction::parse("name(#am=handle;P#am=out;*t)N", None).unwrap();
        assert_eq!(function.argument_meta(1), Some(ArgumentMeta::Output));
    }

    #[test]
    fn test_invalid_meta_combinations() {
        error_stack::clear();
        assert!(DynFunction::parse("f(#am=pre;*DI)N", None).is_err());
        assert!(DynFunction::parse("f(#am=pre;*D)I", None).is_err());
        assert!(DynFunction::parse("f(#am=pre;D)N", None).is_err());
        assert!(DynFunction::parse("f(#am=handle;I)V", None).is_err());
        assert!(DynFunction::parse("f(#am=out;*D)N", None).is_err());
        assert!(DynFunction::parse("f(#am=bogus;I)V", None).is_err());
        assert!(DynFunction::parse("f(V)V", None).is_err());
        error_stack::clear();
    }

    #[test]
    fn test_syntax_errors() {
        error_stack::clear();
        assert!(DynFunction::parse("f(II", None).is_err());
        assert!(DynFunction::parse("f II)I", None).is_err());
        assert!(DynFunction::parse("(I)I", None).is_err());
        assert!(DynFunction::parse("f(I)", None).is_err());
        assert!(DynFunction::parse("f(I)IX", None).is_err());
        error_stack::clear();
    }

    #[test]
    fn test_references_in_signature() {
        let mut refs = TypeTable::new();
        refs.insert(
            "point".to_string(),
            std::sync::Arc::new(DynType::parse("{DD x y}", Some("point"), None).unwrap()),
        );
        let function = DynFunction::parse("move(lpoint;D)lpoint;", Some(&refs)).unwrap();
        assert_eq!(function.argument_type(0).unwrap().size(), 16);
        assert_eq!(function.return_type().size(), 16);
    }
}
