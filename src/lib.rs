//! Dynamic Function Interface engine
//!
//! This crate parses compact descriptors of C types and function
//! signatures, computes their native memory layout, converts native values
//! to and from JSON, and calls native functions of any signature through
//! libffi. Message and interface descriptor files and a JSON-RPC codec are
//! built on top of these.

pub mod error;
pub mod error_stack;
pub mod position;
pub mod common;
pub mod types;
pub mod function;
pub mod descriptor;
pub mod json;
pub mod config;
pub mod cli;

// Re-export core types for convenience
pub use descriptor::{InterfaceDescriptor, MessageDescriptor, Method, Version};
pub use error::{DfiError, DfiResult};
pub use function::{ArgumentMeta, CallPlan, DynFunction};
pub use json::NativeValue;
pub use position::Position;
pub use types::{DynType, SimpleType, TypeKind, TypeTable};
