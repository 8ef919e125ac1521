//! JSON codec for native values
//!
//! Walks a [`DynType`] and the native memory it describes together,
//! converting between C values and `serde_json` values.

pub mod rpc;

use crate::error::{fail, DfiError, DfiResult};
use crate::types::memory;
use crate::types::{DynType, SimpleType, TypeKind, TypeRef};
use serde_json::{Map, Number, Value};
use std::os::raw::{c_int, c_void};
use std::ptr::{self, NonNull};

const SNIPPET_LENGTH: usize = 40;

/// Native value owned by Rust; deep-freed on drop
pub struct NativeValue<'t> {
    ty: &'t DynType,
    ptr: NonNull<c_void>,
}

impl<'t> NativeValue<'t> {
    /// Allocate a zeroed value of `ty`
    pub fn alloc(ty: &'t DynType) -> DfiResult<Self> {
        Ok(Self {
            ty,
            ptr: memory::alloc(ty)?,
        })
    }

    /// Take ownership of a value allocated by this crate (or C `malloc`)
    ///
    /// # Safety
    /// `ptr` must be a valid, uniquely owned value of `ty`.
    pub unsafe fn from_raw(ty: &'t DynType, ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ty, ptr })
    }

    /// Release ownership; the caller must eventually [`memory::free`] it
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub fn ty(&self) -> &'t DynType {
        self.ty
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    pub fn to_value(&self) -> DfiResult<Value> {
        unsafe { serialize_value(self.ty, self.as_ptr()) }
    }

    pub fn to_json(&self) -> DfiResult<String> {
        unsafe { serialize(self.ty, self.as_ptr()) }
    }
}

impl Drop for NativeValue<'_> {
    fn drop(&mut self) {
        unsafe { memory::free(self.ty, self.ptr.as_ptr()) }
    }
}

impl std::fmt::Debug for NativeValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeValue")
            .field("ty", &self.ty.to_string())
            .field("ptr", &self.ptr)
            .finish()
    }
}

/// Serialize the value at `ptr` to compact JSON text
///
/// # Safety
/// `ptr` must point to a valid value of `ty`.
pub unsafe fn serialize(ty: &DynType, ptr: *const c_void) -> DfiResult<String> {
    let value = serialize_value(ty, ptr)?;
    serde_json::to_string(&value).map_err(|e| DfiError::from(e).recorded())
}

/// Like [`serialize`] but indented
///
/// # Safety
/// `ptr` must point to a valid value of `ty`.
pub unsafe fn serialize_pretty(ty: &DynType, ptr: *const c_void) -> DfiResult<String> {
    let value = serialize_value(ty, ptr)?;
    serde_json::to_string_pretty(&value).map_err(|e| DfiError::from(e).recorded())
}

/// # Safety
/// `ptr` must point to a valid value of `ty`.
pub unsafe fn serialize_value(ty: &DynType, ptr: *const c_void) -> DfiResult<Value> {
    match ty.kind() {
        TypeKind::Simple(simple) => serialize_simple(*simple, ptr),
        TypeKind::Text => Ok(match memory::text(ptr) {
            Some(text) => Value::String(text.to_string_lossy().into_owned()),
            None => Value::Null,
        }),
        TypeKind::Complex(fields) => {
            let mut object = Map::with_capacity(fields.len());
            for field in fields {
                let field_ptr = (ptr as *const u8).add(field.offset) as *const c_void;
                object.insert(field.name.clone(), serialize_value(&field.ty, field_ptr)?);
            }
            Ok(Value::Object(object))
        }
        TypeKind::Sequence(element) => {
            let len = memory::sequence_len(ptr) as usize;
            let buf = memory::sequence_buf(ptr) as *const u8;
            if buf.is_null() && len > 0 {
                return fail(DfiError::semantic("Sequence with a length but no buffer"));
            }
            let mut items = Vec::with_capacity(len);
            for index in 0..len {
                items.push(serialize_value(element, buf.add(index * element.size()) as *const c_void)?);
            }
            Ok(Value::Array(items))
        }
        TypeKind::TypedPointer(element) => {
            let pointee = *(ptr as *const *const c_void);
            if pointee.is_null() {
                Ok(Value::Null)
            } else {
                serialize_value(element, pointee)
            }
        }
        TypeKind::Enum(_) => {
            let value = *(ptr as *const i32);
            match ty.enum_name(value) {
                Some(name) => Ok(Value::String(name.to_string())),
                None => fail(DfiError::semantic(format!(
                    "Value {} is not a constant of {}",
                    value,
                    ty.describe()
                ))),
            }
        }
        TypeKind::Reference(reference) => serialize_value(resolve(reference)?, ptr),
    }
}

unsafe fn serialize_simple(simple: SimpleType, ptr: *const c_void) -> DfiResult<Value> {
    Ok(match simple {
        SimpleType::Bool => Value::Bool(*(ptr as *const u8) != 0),
        SimpleType::Int8 => Value::from(*(ptr as *const i8)),
        SimpleType::UInt8 => Value::from(*(ptr as *const u8)),
        SimpleType::Int16 => Value::from(*(ptr as *const i16)),
        SimpleType::UInt16 => Value::from(*(ptr as *const u16)),
        SimpleType::Int32 => Value::from(*(ptr as *const i32)),
        SimpleType::UInt32 => Value::from(*(ptr as *const u32)),
        SimpleType::Int64 => Value::from(*(ptr as *const i64)),
        SimpleType::UInt64 => Value::from(*(ptr as *const u64)),
        SimpleType::NativeInt => Value::from(*(ptr as *const c_int)),
        SimpleType::Float => {
            // Shortest f32 text, so 0.1f32 is written as 0.1
            let value = *(ptr as *const f32);
            float_value(value.to_string().parse().unwrap_or(value as f64))?
        }
        SimpleType::Double => float_value(*(ptr as *const f64))?,
        SimpleType::Pointer | SimpleType::Void => {
            return fail(DfiError::unsupported(format!(
                "JSON serialization of {}",
                simple.c_name()
            )))
        }
    })
}

fn float_value(value: f64) -> DfiResult<Value> {
    match Number::from_f64(value) {
        Some(number) => Ok(Value::Number(number)),
        None => fail(DfiError::unsupported(format!(
            "JSON serialization of non-finite value {}",
            value
        ))),
    }
}

/// Parse `text` and build a native value of `ty`
pub fn deserialize<'t>(ty: &'t DynType, text: &str) -> DfiResult<NativeValue<'t>> {
    let value: Value = serde_json::from_str(text).map_err(|e| DfiError::from(e).recorded())?;
    deserialize_value(ty, &value)
}

/// Build a native value of `ty` from a parsed JSON value
pub fn deserialize_value<'t>(ty: &'t DynType, value: &Value) -> DfiResult<NativeValue<'t>> {
    let mut native = NativeValue::alloc(ty)?;
    // On failure the partially built value is released by `native`'s drop.
    unsafe { write_value(ty, native.as_mut_ptr(), value)? };
    tracing::trace!(ty = %ty, "deserialized JSON value");
    Ok(native)
}

/// Write a JSON value into existing storage. Whatever the storage owned
/// before is released first; on failure the storage is released and zeroed.
///
/// # Safety
/// `ptr` must point to zeroed or otherwise valid storage for `ty`.
pub unsafe fn deserialize_into(ty: &DynType, ptr: *mut c_void, value: &Value) -> DfiResult<()> {
    // Owned pointers come back null, so `write_value` starts from empty slots.
    memory::free_contents(ty, ptr);
    if let Err(error) = write_value(ty, ptr, value) {
        memory::free_contents(ty, ptr);
        ptr::write_bytes(ptr as *mut u8, 0, ty.size());
        return Err(error);
    }
    Ok(())
}

fn resolve(reference: &TypeRef) -> DfiResult<&DynType> {
    match reference.target() {
        Some(target) => Ok(target),
        None => fail(DfiError::semantic(format!("Unresolved reference to '{}'", reference.name))),
    }
}

fn snippet(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= SNIPPET_LENGTH {
        text
    } else {
        let mut cut: String = text.chars().take(SNIPPET_LENGTH).collect();
        cut.push_str("...");
        cut
    }
}

fn mismatch<T>(expected: impl Into<String>, value: &Value) -> DfiResult<T> {
    fail(DfiError::shape_mismatch(expected, snippet(value)))
}

// Invariant: every intermediate state is valid for deep free.
unsafe fn write_value(ty: &DynType, ptr: *mut c_void, value: &Value) -> DfiResult<()> {
    match ty.kind() {
        TypeKind::Simple(simple) => write_simple(*simple, ptr, value),
        TypeKind::Text => match value {
            Value::Null => Ok(()),
            Value::String(text) => memory::set_text(ptr, text),
            other => mismatch("string", other),
        },
        TypeKind::Complex(fields) => {
            let object = match value {
                Value::Object(object) => object,
                other => return mismatch(format!("object for {}", ty.describe()), other),
            };
            for field in fields {
                let field_value = match object.get(&field.name) {
                    Some(field_value) => field_value,
                    None => return mismatch(format!("object with field '{}'", field.name), value),
                };
                write_value(&field.ty, (ptr as *mut u8).add(field.offset) as *mut c_void, field_value)?;
            }
            Ok(())
        }
        TypeKind::Sequence(element) => {
            let items = match value {
                Value::Array(items) => items,
                other => return mismatch(format!("array for {}", ty.describe()), other),
            };
            let len = match u32::try_from(items.len()) {
                Ok(len) => len,
                Err(_) => return fail(DfiError::semantic("Sequence too long")),
            };
            memory::sequence_alloc(ty, ptr, len)?;
            // Zeroed elements are valid, so the full length is owned from here.
            memory::set_sequence_len(ptr, len);
            let buf = memory::sequence_buf(ptr) as *mut u8;
            for (index, item) in items.iter().enumerate() {
                write_value(element, buf.add(index * element.size()) as *mut c_void, item)?;
            }
            Ok(())
        }
        TypeKind::TypedPointer(element) => {
            if value.is_null() {
                return Ok(());
            }
            let pointee = memory::alloc(element)?.as_ptr();
            *(ptr as *mut *mut c_void) = pointee;
            write_value(element, pointee, value)
        }
        TypeKind::Enum(_) => {
            let constant = match value.as_str().and_then(|name| ty.enum_value(name)) {
                Some(constant) => constant,
                None => return mismatch(format!("constant of {}", ty.describe()), value),
            };
            *(ptr as *mut i32) = constant;
            Ok(())
        }
        TypeKind::Reference(reference) => write_value(resolve(reference)?, ptr, value),
    }
}

fn integer(value: &Value) -> Option<i128> {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
}

unsafe fn write_simple(simple: SimpleType, ptr: *mut c_void, value: &Value) -> DfiResult<()> {
    macro_rules! write_integer {
        ($t:ty) => {{
            match integer(value).and_then(|n| <$t>::try_from(n).ok()) {
                Some(n) => *(ptr as *mut $t) = n,
                None => return mismatch(format!("integer in range of {}", simple.c_name()), value),
            }
        }};
    }

    match simple {
        SimpleType::Bool => match value.as_bool() {
            Some(flag) => *(ptr as *mut u8) = flag as u8,
            None => return mismatch("bool", value),
        },
        SimpleType::Int8 => write_integer!(i8),
        SimpleType::UInt8 => write_integer!(u8),
        SimpleType::Int16 => write_integer!(i16),
        SimpleType::UInt16 => write_integer!(u16),
        SimpleType::Int32 => write_integer!(i32),
        SimpleType::UInt32 => write_integer!(u32),
        SimpleType::Int64 => write_integer!(i64),
        SimpleType::UInt64 => write_integer!(u64),
        SimpleType::NativeInt => write_integer!(c_int),
        SimpleType::Float => match value.as_f64() {
            Some(number) => *(ptr as *mut f32) = number as f32,
            None => return mismatch("number", value),
        },
        SimpleType::Double => match value.as_f64() {
            Some(number) => *(ptr as *mut f64) = number,
            None => return mismatch("number", value),
        },
        SimpleType::Pointer | SimpleType::Void => {
            return fail(DfiError::unsupported(format!(
                "JSON deserialization of {}",
                simple.c_name()
            )))
        }
    }
    Ok(())
}
