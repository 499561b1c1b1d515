use crate::{ReprError, P6INT_ID};
use gvm_gc::{GcRef, Object, ReprOps, ThreadContext, OBJECT_SIZE};
use std::mem::size_of;

/// A boxed native integer. Holds no references, so the collector only needs its size.
#[repr(C)]
pub struct P6intBody {
	pub value: i64,
}

pub static P6INT: ReprOps = ReprOps {
	size: Some(|_| OBJECT_SIZE + size_of::<P6intBody>()),
	..ReprOps::new("P6int", P6INT_ID)
};

pub fn type_object_for(tc: &mut ThreadContext, how: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_type(&P6INT, how)?)
}

/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn allocate(tc: &mut ThreadContext, st: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_object(st)?)
}

/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn boxed(tc: &mut ThreadContext, st: GcRef, value: i64) -> Result<GcRef, ReprError> {
	let obj = allocate(tc, st)?;
	set_int(obj, value);
	Ok(obj)
}

/// # Safety
/// `obj` must be a live instance of this representation.
pub unsafe fn get_int(obj: GcRef) -> i64 {
	(*Object::body(obj).cast::<P6intBody>()).value
}

/// # Safety
/// `obj` must be a live instance of this representation.
pub unsafe fn set_int(obj: GcRef, value: i64) {
	(*Object::body(obj).cast::<P6intBody>()).value = value;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_context;

	#[test]
	fn value_survives_promotion() {
		let mut tc = test_context();
		let what = type_object_for(&mut tc, GcRef::NULL).unwrap();
		let boxed = unsafe { boxed(&mut tc, Object::st(what), -42).unwrap() };
		let id = tc.push_temp(boxed);

		tc.run_gc();
		let stats = tc.run_gc();
		assert_eq!(stats.promoted, 1);
		unsafe {
			assert!(tc.temp(id).is_second_gen());
			assert_eq!(get_int(tc.temp(id)), -42);
		}
		tc.pop_temps(1);
	}
}
