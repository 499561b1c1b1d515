use crate::{ReprError, VM_STRING_ID};
use gvm_gc::{GcRef, Object, ReprOps, ThreadContext, OBJECT_SIZE};
use std::mem::size_of;
use std::ptr::{null_mut, slice_from_raw_parts_mut};
use std::slice::from_raw_parts;

/// An immutable string. The characters live outside the heap and are released when the string dies.
#[repr(C)]
pub struct VMStringBody {
	data: *mut u8,
	len: usize,
}

pub static VM_STRING: ReprOps = ReprOps {
	size: Some(|_| OBJECT_SIZE + size_of::<VMStringBody>()),
	gc_free: Some(gc_free),
	..ReprOps::new("VMString", VM_STRING_ID)
};

unsafe fn gc_free(obj: *mut Object) {
	let body = body(GcRef::from_ptr(obj.cast()));
	if !body.data.is_null() {
		drop(Box::from_raw(slice_from_raw_parts_mut(body.data, body.len) as *mut str));
		body.data = null_mut();
		body.len = 0;
	}
}

unsafe fn body<'a>(obj: GcRef) -> &'a mut VMStringBody {
	&mut *Object::body(obj).cast::<VMStringBody>()
}

pub fn type_object_for(tc: &mut ThreadContext, how: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_type(&VM_STRING, how)?)
}

/// Allocates a string of type `st` holding a copy of `text`.
///
/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn new(tc: &mut ThreadContext, st: GcRef, text: &str) -> Result<GcRef, ReprError> {
	let obj = tc.allocate_object(st)?;
	let chars: Box<str> = text.into();
	let body = body(obj);
	body.len = chars.len();
	body.data = Box::into_raw(chars) as *mut u8;
	Ok(obj)
}

/// # Safety
/// `obj` must be a live string, and the result must not outlive it.
pub unsafe fn as_str<'a>(obj: GcRef) -> &'a str {
	let body = body(obj);
	if body.data.is_null() {
		return "";
	}
	std::str::from_utf8_unchecked(from_raw_parts(body.data, body.len))
}
