//! Native memory for values described by a [`DynType`]
//!
//! Values live in C heap memory (`calloc`/`free`) so they can be handed to
//! and received from native code. Allocation is always zeroed; a zeroed
//! value is valid for every type and can be deep-freed safely.

use super::{DynType, TypeKind};
use crate::error::{fail, DfiError, DfiResult};
use crate::types::layout::sequence_layout;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr::{self, NonNull};

/// Allocate zeroed memory for one value of `ty`
pub fn alloc(ty: &DynType) -> DfiResult<NonNull<c_void>> {
    alloc_bytes(ty.size())
}

pub(crate) fn alloc_bytes(size: usize) -> DfiResult<NonNull<c_void>> {
    // calloc(0) may legally return NULL
    let ptr = unsafe { libc::calloc(1, size.max(1)) };
    match NonNull::new(ptr) {
        Some(ptr) => Ok(ptr),
        None => fail(DfiError::OutOfMemory { size }),
    }
}

/// Release `ptr` and everything it owns.
///
/// # Safety
/// `ptr` must be null or a value of `ty` allocated with [`alloc`] whose
/// owned pointers were produced by this module (or C `malloc`).
pub unsafe fn free(ty: &DynType, ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    free_contents(ty, ptr);
    libc::free(ptr);
}

/// Release the allocations owned by the value at `ptr` without freeing
/// `ptr` itself; owned pointers are reset to null.
///
/// # Safety
/// `ptr` must point to a valid value of `ty`.
pub unsafe fn free_contents(ty: &DynType, ptr: *mut c_void) {
    match ty.kind() {
        TypeKind::Simple(_) | TypeKind::Enum(_) => {}
        TypeKind::Text => {
            let slot = ptr as *mut *mut c_char;
            libc::free(*slot as *mut c_void);
            *slot = ptr::null_mut();
        }
        TypeKind::Complex(fields) => {
            for field in fields {
                free_contents(&field.ty, field_ptr_unchecked(ptr, field.offset));
            }
        }
        TypeKind::Sequence(element) => {
            let buf = sequence_buf(ptr);
            if !buf.is_null() {
                for index in 0..sequence_len(ptr) as usize {
                    free_contents(element, (buf as *mut u8).add(index * element.size()) as *mut c_void);
                }
                libc::free(buf);
            }
            set_sequence_buf(ptr, ptr::null_mut());
            set_sequence_cap(ptr, 0);
            set_sequence_len(ptr, 0);
        }
        TypeKind::TypedPointer(element) => {
            let slot = ptr as *mut *mut c_void;
            free(element, *slot);
            *slot = ptr::null_mut();
        }
        TypeKind::Reference(reference) => {
            if let Some(target) = reference.target() {
                free_contents(target, ptr);
            }
        }
    }
}

unsafe fn field_ptr_unchecked(base: *mut c_void, offset: usize) -> *mut c_void {
    (base as *mut u8).add(offset) as *mut c_void
}

/// Address of field `index` of the complex value at `base`
///
/// # Safety
/// `base` must point to a value of `ty`.
pub unsafe fn field_ptr(ty: &DynType, base: *mut c_void, index: usize) -> Option<*mut c_void> {
    ty.field(index)
        .map(|field| field_ptr_unchecked(base, field.offset))
}

fn sequence_offsets() -> (usize, usize, usize) {
    let layout = sequence_layout();
    (layout.offsets[0], layout.offsets[1], layout.offsets[2])
}

/// # Safety
/// `seq` must point to a sequence record.
pub unsafe fn sequence_cap(seq: *const c_void) -> u32 {
    *((seq as *const u8).add(sequence_offsets().0) as *const u32)
}

/// # Safety
/// `seq` must point to a sequence record.
pub unsafe fn sequence_len(seq: *const c_void) -> u32 {
    *((seq as *const u8).add(sequence_offsets().1) as *const u32)
}

/// # Safety
/// `seq` must point to a sequence record.
pub unsafe fn sequence_buf(seq: *const c_void) -> *mut c_void {
    *((seq as *const u8).add(sequence_offsets().2) as *const *mut c_void)
}

unsafe fn set_sequence_cap(seq: *mut c_void, cap: u32) {
    *((seq as *mut u8).add(sequence_offsets().0) as *mut u32) = cap;
}

unsafe fn set_sequence_buf(seq: *mut c_void, buf: *mut c_void) {
    *((seq as *mut u8).add(sequence_offsets().2) as *mut *mut c_void) = buf;
}

/// Set the length of a sequence
///
/// # Safety
/// `seq` must point to a sequence record.
pub unsafe fn set_sequence_len(seq: *mut c_void, len: u32) {
    *((seq as *mut u8).add(sequence_offsets().1) as *mut u32) = len;
}

fn sequence_element(ty: &DynType) -> DfiResult<&DynType> {
    match ty.resolved().kind() {
        TypeKind::Sequence(element) => Ok(element),
        _ => fail(DfiError::semantic(format!(
            "Expected a sequence type, got {}",
            ty.describe()
        ))),
    }
}

/// Allocate a zeroed buffer for `cap` elements; length becomes 0.
/// Any existing buffer is released first.
///
/// # Safety
/// `seq` must point to a valid sequence value of `ty`.
pub unsafe fn sequence_alloc(ty: &DynType, seq: *mut c_void, cap: u32) -> DfiResult<()> {
    let element = sequence_element(ty)?;
    free_contents(ty.resolved(), seq);
    if cap > 0 {
        let size = element.size().max(1);
        let buf = libc::calloc(cap as usize, size);
        if buf.is_null() {
            return fail(DfiError::OutOfMemory {
                size: cap as usize * size,
            });
        }
        set_sequence_buf(seq, buf);
    }
    set_sequence_cap(seq, cap);
    set_sequence_len(seq, 0);
    Ok(())
}

/// Grow the buffer to at least `cap` elements, keeping existing elements
/// and zeroing the new slots
///
/// # Safety
/// `seq` must point to a valid sequence value of `ty`.
pub unsafe fn sequence_reserve(ty: &DynType, seq: *mut c_void, cap: u32) -> DfiResult<()> {
    let element = sequence_element(ty)?;
    let old_cap = sequence_cap(seq);
    if cap <= old_cap {
        return Ok(());
    }
    let size = element.size().max(1);
    let buf = libc::realloc(sequence_buf(seq), cap as usize * size);
    if buf.is_null() {
        return fail(DfiError::OutOfMemory {
            size: cap as usize * size,
        });
    }
    ptr::write_bytes(
        (buf as *mut u8).add(old_cap as usize * size),
        0,
        (cap - old_cap) as usize * size,
    );
    set_sequence_buf(seq, buf);
    set_sequence_cap(seq, cap);
    Ok(())
}

/// Address of element `index` (must be below the capacity)
///
/// # Safety
/// `seq` must point to a valid sequence value of `ty`.
pub unsafe fn sequence_element_ptr(ty: &DynType, seq: *mut c_void, index: u32) -> Option<*mut c_void> {
    let element = match ty.resolved().kind() {
        TypeKind::Sequence(element) => element,
        _ => return None,
    };
    if index >= sequence_cap(seq) {
        return None;
    }
    Some((sequence_buf(seq) as *mut u8).add(index as usize * element.size()) as *mut c_void)
}

/// Replace the string in a text slot with a copy of `value`
///
/// # Safety
/// `slot` must point to a `char*` that is null or owned by the value.
pub unsafe fn set_text(slot: *mut c_void, value: &str) -> DfiResult<()> {
    let copy = match CString::new(value) {
        Ok(copy) => copy,
        Err(_) => {
            return fail(DfiError::semantic(
                "Text value contains an interior NUL byte",
            ))
        }
    };
    let dup = libc::strdup(copy.as_ptr());
    if dup.is_null() {
        return fail(DfiError::OutOfMemory {
            size: value.len() + 1,
        });
    }
    let slot = slot as *mut *mut c_char;
    libc::free(*slot as *mut c_void);
    *slot = dup;
    Ok(())
}

/// Borrow the string in a text slot
///
/// # Safety
/// `slot` must point to a `char*` that is null or NUL-terminated.
pub unsafe fn text<'a>(slot: *const c_void) -> Option<&'a CStr> {
    let ptr = *(slot as *const *const c_char);
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr))
    }
}
