//! Representations built on top of the collector's capability table.

pub mod cstruct;
mod error;
pub mod knowhow_attribute;
pub mod p6int;
pub mod p6str;
pub mod vm_array;
pub mod vm_string;

pub use error::*;

use gvm_gc::ReprId;

pub const VM_STRING_ID: ReprId = 0;
pub const P6INT_ID: ReprId = 1;
pub const P6STR_ID: ReprId = 2;
pub const VM_ARRAY_ID: ReprId = 3;
pub const KNOWHOW_ATTRIBUTE_ID: ReprId = 4;
pub const CSTRUCT_ID: ReprId = 5;

#[cfg(test)]
pub(crate) fn test_context() -> gvm_gc::ThreadContext {
	gvm_core::init();
	let config = gvm_gc::GcConfig::default().with_nursery_size(64 * 1024);
	gvm_gc::ThreadContext::new(gvm_gc::Instance::new(config).unwrap()).unwrap()
}
