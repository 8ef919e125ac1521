//! Native call plans
//!
//! A [`CallPlan`] turns a [`DynFunction`] signature into a libffi call
//! interface and invokes native function pointers through it. Arguments are
//! handed over as pointers to caller-owned values, so the plan works for any
//! arity and any combination of argument types.

use super::{ArgumentMeta, DynFunction};
use crate::error::{fail, DfiError, DfiResult};
use crate::types::{memory, DynType, SimpleType, TypeKind};
use libffi::low;
use libffi::middle::Type;
use libffi::raw;
use std::os::raw::{c_int, c_void};
use std::ptr;

/// How each declared argument becomes a native argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Caller pointer to the value is passed to libffi directly
    Value,
    /// Caller pointer is itself the native argument
    Pointer,
    /// Engine-allocated buffer for the pointee of `*T`
    PreAllocated,
}

/// Prepared call interface for one function signature
pub struct CallPlan<'f> {
    function: &'f DynFunction,
    cif: Box<low::ffi_cif>,
    slots: Vec<Slot>,
    // The cif points into these; they must outlive it.
    _return_type: Type,
    _argument_types: Vec<Type>,
    raw_argument_types: Vec<*mut low::ffi_type>,
}

impl std::fmt::Debug for CallPlan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPlan")
            .field("function", &self.function.name())
            .field("slots", &self.slots)
            .finish()
    }
}

/// Map a type to the libffi type used when it is passed by value
fn ffi_type(ty: &DynType) -> Result<Type, String> {
    let ty = ty.resolved();
    match ty.kind() {
        TypeKind::Simple(simple) => Ok(match simple {
            SimpleType::Bool | SimpleType::UInt8 => Type::u8(),
            SimpleType::Int8 => Type::i8(),
            SimpleType::Int16 => Type::i16(),
            SimpleType::UInt16 => Type::u16(),
            SimpleType::Int32 => Type::i32(),
            SimpleType::UInt32 => Type::u32(),
            SimpleType::Int64 => Type::i64(),
            SimpleType::UInt64 => Type::u64(),
            SimpleType::Float => Type::f32(),
            SimpleType::Double => Type::f64(),
            SimpleType::NativeInt => Type::c_int(),
            SimpleType::Pointer => Type::pointer(),
            SimpleType::Void => Type::void(),
        }),
        TypeKind::Text | TypeKind::TypedPointer(_) => Ok(Type::pointer()),
        TypeKind::Enum(_) => Ok(Type::i32()),
        TypeKind::Sequence(_) => Ok(Type::structure([Type::u32(), Type::u32(), Type::pointer()])),
        TypeKind::Complex(fields) => {
            if fields.is_empty() {
                return Err("empty struct cannot be passed by value".to_string());
            }
            let members = fields
                .iter()
                .map(|field| ffi_type(&field.ty))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Type::structure(members))
        }
        TypeKind::Reference(reference) => match reference.target() {
            Some(target) => ffi_type(target),
            None => Err(format!("unresolved reference to '{}'", reference.name)),
        },
    }
}

impl<'f> CallPlan<'f> {
    pub(crate) fn prepare(function: &'f DynFunction) -> DfiResult<Self> {
        let return_type = ffi_type(function.return_type()).or_else(|reason| {
            fail(DfiError::call_preparation(
                format!("return type of '{}'", function.name()),
                reason,
            ))
        })?;

        let mut slots = Vec::with_capacity(function.argument_count());
        let mut argument_types = Vec::with_capacity(function.argument_count());
        for argument in function.arguments() {
            let (slot, ty) = match argument.meta {
                ArgumentMeta::Standard | ArgumentMeta::Handle | ArgumentMeta::Output => {
                    let ty = ffi_type(&argument.ty).or_else(|reason| {
                        fail(DfiError::call_preparation(
                            format!("argument type {} of '{}'", argument.index, function.name()),
                            reason,
                        ))
                    })?;
                    (Slot::Value, ty)
                }
                ArgumentMeta::ByReference => (Slot::Pointer, Type::pointer()),
                ArgumentMeta::PreAllocatedOutput => (Slot::PreAllocated, Type::pointer()),
            };
            slots.push(slot);
            argument_types.push(ty);
        }

        let mut raw_argument_types: Vec<*mut low::ffi_type> =
            argument_types.iter().map(Type::as_raw_ptr).collect();
        // SAFETY: an all-zero cif is the documented state before ffi_prep_cif.
        let mut cif: Box<low::ffi_cif> = Box::new(unsafe { std::mem::zeroed() });
        let prepared = unsafe {
            low::prep_cif(
                cif.as_mut(),
                low::ffi_abi_FFI_DEFAULT_ABI,
                raw_argument_types.len(),
                return_type.as_raw_ptr(),
                raw_argument_types.as_mut_ptr(),
            )
        };
        if let Err(error) = prepared {
            return fail(DfiError::call_preparation(
                format!("call interface of '{}'", function.name()),
                format!("{:?}", error),
            ));
        }

        tracing::debug!(
            function = function.name(),
            arguments = slots.len(),
            "prepared call interface"
        );
        Ok(Self {
            function,
            cif,
            slots,
            _return_type: return_type,
            _argument_types: argument_types,
            raw_argument_types,
        })
    }

    pub fn function(&self) -> &DynFunction {
        self.function
    }

    /// Number of native arguments, including a pre-allocated output
    pub fn native_argument_count(&self) -> usize {
        self.raw_argument_types.len()
    }

    /// Call `function` through this plan.
    ///
    /// `args` holds one pointer per argument that is not a pre-allocated
    /// output, in declaration order:
    /// * by-value, handle and output arguments: a pointer to the value;
    /// * by-reference arguments: the storage pointer handed to the callee.
    ///
    /// `return_value` may be null. Otherwise it receives the return value,
    /// the native `int` for `N` returns, or for functions with a
    /// pre-allocated output the output value after a zero status. The
    /// result is the native status for `N` returns and 0 otherwise.
    ///
    /// # Safety
    /// `function` must have exactly the described signature, every pointer
    /// in `args` must reference a valid value of its argument type, and
    /// `return_value` must be null or large enough for the value written.
    pub unsafe fn invoke(
        &self,
        function: *const c_void,
        return_value: *mut c_void,
        args: &[*mut c_void],
    ) -> DfiResult<c_int> {
        let expected = self.function.caller_supplied_count();
        if args.len() != expected {
            return fail(DfiError::ArgumentCount {
                function: self.function.name().to_string(),
                expected,
                found: args.len(),
            });
        }
        if function.is_null() {
            return fail(DfiError::semantic(format!(
                "Null function pointer for '{}'",
                self.function.name()
            )));
        }

        // Pointer-valued native arguments need storage that lives across the call.
        let mut pointers: Vec<*mut c_void> = vec![ptr::null_mut(); self.slots.len()];
        let mut pre_allocated: Option<(&DynType, *mut c_void)> = None;
        let mut supplied = args.iter();
        for (index, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Value => {
                    supplied.next();
                }
                Slot::Pointer => pointers[index] = supplied.next().copied().unwrap_or(ptr::null_mut()),
                Slot::PreAllocated => {
                    let pointee = match self.function.arguments()[index].ty.resolved().element_type() {
                        Some(pointee) => pointee,
                        None => return fail(DfiError::semantic("pre-allocated output without pointee")),
                    };
                    let buffer = memory::alloc(pointee)?.as_ptr();
                    pointers[index] = buffer;
                    pre_allocated = Some((pointee, buffer));
                }
            }
        }

        let mut supplied = args.iter();
        let mut values: Vec<*mut c_void> = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Value => values.push(supplied.next().copied().unwrap_or(ptr::null_mut())),
                Slot::Pointer => {
                    supplied.next();
                    values.push(&mut pointers[index] as *mut *mut c_void as *mut c_void);
                }
                Slot::PreAllocated => {
                    values.push(&mut pointers[index] as *mut *mut c_void as *mut c_void)
                }
            }
        }

        let return_type = self.function.return_type().resolved();
        // libffi widens small integral returns to a full register.
        let words = return_type.size().max(std::mem::size_of::<u64>()).div_ceil(8);
        let mut returned = vec![0u64; words];

        tracing::trace!(function = self.function.name(), "invoking native function");
        let code: unsafe extern "C" fn() = std::mem::transmute(function);
        raw::ffi_call(
            self.cif.as_ref() as *const low::ffi_cif as *mut low::ffi_cif,
            Some(code),
            returned.as_mut_ptr() as *mut c_void,
            values.as_mut_ptr(),
        );

        let returned = returned.as_ptr() as *const c_void;
        if self.function.returns_status() {
            let status = *(returned as *const usize) as c_int;
            match pre_allocated {
                Some((pointee, buffer)) => {
                    if status == 0 && !return_value.is_null() {
                        ptr::copy_nonoverlapping(buffer as *const u8, return_value as *mut u8, pointee.size());
                        // Ownership of the contents moved to `return_value`.
                        libc::free(buffer);
                    } else {
                        memory::free(pointee, buffer);
                    }
                }
                None => {
                    if !return_value.is_null() {
                        *(return_value as *mut c_int) = status;
                    }
                }
            }
            return Ok(status);
        }

        if !return_value.is_null() && !return_type.is_void() {
            copy_return(return_type, returned, return_value);
        }
        Ok(0)
    }
}

/// Copy a libffi return buffer into the caller's storage, narrowing
/// widened integral values
unsafe fn copy_return(ty: &DynType, returned: *const c_void, destination: *mut c_void) {
    let size = ty.size();
    let widened = matches!(ty.kind(), TypeKind::Enum(_))
        || ty.as_simple().is_some_and(|simple| simple.is_integer() || simple == SimpleType::Bool);
    if widened && size < std::mem::size_of::<usize>() {
        let register = *(returned as *const usize);
        match size {
            1 => *(destination as *mut u8) = register as u8,
            2 => *(destination as *mut u16) = register as u16,
            4 => *(destination as *mut u32) = register as u32,
            _ => ptr::copy_nonoverlapping(returned as *const u8, destination as *mut u8, size),
        }
    } else {
        ptr::copy_nonoverlapping(returned as *const u8, destination as *mut u8, size);
    }
}
