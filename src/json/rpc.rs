//! JSON-RPC codec for remote service calls
//!
//! Requests look like `{"m": "add(DD)D", "a": [1.0, 2.0]}`. Replies carry
//! either the output value, `{"r": 3.0}`, or a non-zero native status,
//! `{"e": 1}`.
//!
//! The client side works with the argument pointers a proxy receives: one
//! pointer per declared argument, each pointing at the argument's value.
//! The server side invokes a service struct laid out as
//! `{void *handle; fn0; fn1; ...}` with one function pointer per method in
//! declaration order.

use super::{deserialize_into, deserialize_value, serialize_value, NativeValue};
use crate::descriptor::InterfaceDescriptor;
use crate::error::{fail, DfiError, DfiResult};
use crate::function::{ArgumentMeta, DynFunction};
use serde_json::{Map, Value};
use std::os::raw::{c_int, c_void};
use std::ptr;

pub const METHOD_KEY: &str = "m";
pub const ARGUMENTS_KEY: &str = "a";
pub const RESULT_KEY: &str = "r";
pub const STATUS_KEY: &str = "e";

fn reply(key: &str, value: Value) -> String {
    let mut object = Map::new();
    object.insert(key.to_string(), value);
    Value::Object(object).to_string()
}

fn check_argument_count(function: &DynFunction, args: &[*mut c_void]) -> DfiResult<()> {
    if args.len() != function.argument_count() {
        return fail(DfiError::ArgumentCount {
            function: function.name().to_string(),
            expected: function.argument_count(),
            found: args.len(),
        });
    }
    Ok(())
}

/// Serialize the standard and by-reference arguments into a request
///
/// # Safety
/// `args` must hold one pointer per declared argument, each pointing at a
/// valid value of the argument's type.
pub unsafe fn prepare_invoke_request(
    function: &DynFunction,
    id: &str,
    args: &[*mut c_void],
) -> DfiResult<String> {
    check_argument_count(function, args)?;
    let mut values = Vec::new();
    for (argument, &arg) in function.arguments().iter().zip(args) {
        if matches!(argument.meta, ArgumentMeta::Standard | ArgumentMeta::ByReference) {
            values.push(serialize_value(&argument.ty, arg)?);
        }
    }
    let mut request = Map::new();
    request.insert(METHOD_KEY.to_string(), Value::from(id));
    request.insert(ARGUMENTS_KEY.to_string(), Value::Array(values));
    tracing::trace!(method = id, "prepared invoke request");
    Ok(Value::Object(request).to_string())
}

/// Decode a reply into the output argument and return the remote status
///
/// # Safety
/// `args` must follow the layout of [`prepare_invoke_request`]; the value
/// behind an output argument must be a valid pointer to writable storage.
pub unsafe fn handle_reply(function: &DynFunction, reply: &str, args: &[*mut c_void]) -> DfiResult<c_int> {
    check_argument_count(function, args)?;
    let reply: Value = serde_json::from_str(reply).map_err(|e| DfiError::from(e).recorded())?;

    if let Some(status) = reply.get(STATUS_KEY) {
        return match status.as_i64().and_then(|s| c_int::try_from(s).ok()) {
            Some(status) => Ok(status),
            None => fail(DfiError::shape_mismatch("integer status", status.to_string())),
        };
    }

    let result = match reply.get(RESULT_KEY) {
        Some(result) => result,
        None => return fail(DfiError::shape_mismatch("reply with 'r' or 'e'", reply.to_string())),
    };
    let output = function
        .arguments()
        .iter()
        .zip(args)
        .find(|(argument, _)| argument.meta.is_output());
    if let Some((argument, &arg)) = output {
        // Both output kinds point at `T*`; the pointee of the declared type
        // is what the reply describes.
        let target = *(arg as *const *mut c_void);
        let pointee = match argument.ty.resolved().element_type() {
            Some(pointee) => pointee,
            None => return fail(DfiError::semantic("output argument without pointee")),
        };
        if target.is_null() {
            return fail(DfiError::semantic(format!(
                "Null output storage for argument {} of '{}'",
                argument.index,
                function.name()
            )));
        }
        deserialize_into(pointee, target, result)?;
    }
    Ok(0)
}

/// Invoke the method named in `request` on `service` and build the reply
///
/// # Safety
/// `service` must point to a service struct whose handle and function
/// pointers match `interface`.
pub unsafe fn call(interface: &InterfaceDescriptor, service: *const c_void, request: &str) -> DfiResult<String> {
    let request: Value = serde_json::from_str(request).map_err(|e| DfiError::from(e).recorded())?;
    let id = match request.get(METHOD_KEY).and_then(Value::as_str) {
        Some(id) => id,
        None => return fail(DfiError::shape_mismatch("request with method id", request.to_string())),
    };
    let method = match interface.method(id) {
        Some(method) => method,
        None => {
            return fail(DfiError::semantic(format!(
                "Unknown method '{}' for interface '{}'",
                id,
                interface.name()
            )))
        }
    };
    let function = &method.function;
    let empty = Vec::new();
    let values = match request.get(ARGUMENTS_KEY) {
        Some(Value::Array(values)) => values,
        None => &empty,
        Some(other) => return fail(DfiError::shape_mismatch("argument array", other.to_string())),
    };

    let table = service as *const *mut c_void;
    let mut handle: *mut c_void = *table;
    let code = *table.add(1 + method.index) as *const c_void;

    // Owned argument storage; dropped (deep-freed) after the reply is built.
    let mut inputs: Vec<NativeValue<'_>> = Vec::new();
    let mut output: Option<NativeValue<'_>> = None;
    let mut output_slot: *mut c_void = ptr::null_mut();
    let mut supplied = values.iter();
    for argument in function.arguments() {
        match argument.meta {
            ArgumentMeta::Standard | ArgumentMeta::ByReference => {
                let value = match supplied.next() {
                    Some(value) => value,
                    None => {
                        return fail(DfiError::ArgumentCount {
                            function: function.name().to_string(),
                            expected: function
                                .arguments()
                                .iter()
                                .filter(|a| matches!(a.meta, ArgumentMeta::Standard | ArgumentMeta::ByReference))
                                .count(),
                            found: values.len(),
                        })
                    }
                };
                inputs.push(deserialize_value(&argument.ty, value)?);
            }
            ArgumentMeta::PreAllocatedOutput | ArgumentMeta::Output => {
                let pointee = match argument.ty.resolved().element_type() {
                    Some(pointee) => pointee,
                    None => return fail(DfiError::semantic("output argument without pointee")),
                };
                let mut storage = NativeValue::alloc(pointee)?;
                output_slot = storage.as_mut_ptr();
                output = Some(storage);
            }
            ArgumentMeta::Handle => {}
        }
    }
    if supplied.next().is_some() {
        return fail(DfiError::semantic(format!(
            "Too many arguments for '{}'",
            function.name()
        )));
    }

    let mut inputs_iter = inputs.iter_mut();
    let mut args: Vec<*mut c_void> = Vec::with_capacity(function.argument_count());
    for argument in function.arguments() {
        match argument.meta {
            ArgumentMeta::Handle => args.push(&mut handle as *mut *mut c_void as *mut c_void),
            ArgumentMeta::Standard | ArgumentMeta::ByReference => {
                if let Some(input) = inputs_iter.next() {
                    args.push(input.as_mut_ptr());
                }
            }
            ArgumentMeta::Output => args.push(&mut output_slot as *mut *mut c_void as *mut c_void),
            ArgumentMeta::PreAllocatedOutput => {}
        }
    }

    let mut returned: Option<NativeValue<'_>> = None;
    let return_value = match output.as_mut() {
        Some(storage) if function.pre_allocated_output().is_some() => storage.as_mut_ptr(),
        _ if !function.return_type().is_void() && !function.returns_status() => {
            let mut storage = NativeValue::alloc(function.return_type())?;
            let ptr = storage.as_mut_ptr();
            returned = Some(storage);
            ptr
        }
        _ => ptr::null_mut(),
    };

    tracing::debug!(method = id, "dispatching remote call");
    let status = function.prepare()?.invoke(code, return_value, &args)?;
    if status != 0 {
        return Ok(reply(STATUS_KEY, Value::from(status)));
    }

    let result = match (&output, &returned) {
        (Some(storage), _) => storage.to_value()?,
        (None, Some(storage)) => storage.to_value()?,
        (None, None) => Value::Null,
    };
    Ok(reply(RESULT_KEY, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_request_skips_handle_and_output() {
        let function = DynFunction::parse("add(#am=handle;PDD#am=pre;*D)N", None).unwrap();
        let mut handle: *mut c_void = ptr::null_mut();
        let (mut a, mut b) = (1.5f64, 2.0f64);
        let mut out = 0.0f64;
        let mut out_ptr = &mut out as *mut f64;
        let args = [
            &mut handle as *mut *mut c_void as *mut c_void,
            &mut a as *mut f64 as *mut c_void,
            &mut b as *mut f64 as *mut c_void,
            &mut out_ptr as *mut *mut f64 as *mut c_void,
        ];
        let request = unsafe { prepare_invoke_request(&function, "add(DD)D", &args) }.unwrap();
        assert_eq!(request, r#"{"m":"add(DD)D","a":[1.5,2.0]}"#);

        let status = unsafe { handle_reply(&function, r#"{"r":3.5}"#, &args) }.unwrap();
        assert_eq!(status, 0);
        assert_eq!(out, 3.5);

        let status = unsafe { handle_reply(&function, r#"{"e":4}"#, &args) }.unwrap();
        assert_eq!(status, 4);
    }

    #[test]
    fn test_handle_reply_text_output() {
        let function = DynFunction::parse("name(#am=handle;P#am=out;*t)N", None).unwrap();
        let mut handle: *mut c_void = ptr::null_mut();
        let mut text: *mut std::os::raw::c_char = ptr::null_mut();
        let mut slot = &mut text as *mut *mut std::os::raw::c_char;
        let args = [
            &mut handle as *mut *mut c_void as *mut c_void,
            &mut slot as *mut _ as *mut c_void,
        ];
        unsafe {
            handle_reply(&function, r#"{"r":"calc"}"#, &args).unwrap();
            assert_eq!(std::ffi::CStr::from_ptr(text).to_str().unwrap(), "calc");
            libc::free(text as *mut c_void);
        }
    }
}
