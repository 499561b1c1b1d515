use crate::{ReprError, P6STR_ID};
use gvm_gc::{GcRef, Object, ReprOps, STable, ThreadContext, Worklist, OBJECT_SIZE};
use std::mem::size_of;

/// A box around one string reference.
#[repr(C)]
pub struct P6strBody {
	pub value: GcRef,
}

pub static P6STR: ReprOps = ReprOps {
	size: Some(|_| OBJECT_SIZE + size_of::<P6strBody>()),
	gc_mark: Some(gc_mark),
	..ReprOps::new("P6str", P6STR_ID)
};

unsafe fn gc_mark(_: &STable, body: *mut u8, worklist: &mut Worklist) {
	worklist.add(&mut (*body.cast::<P6strBody>()).value);
}

pub fn type_object_for(tc: &mut ThreadContext, how: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_type(&P6STR, how)?)
}

/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn allocate(tc: &mut ThreadContext, st: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_object(st)?)
}

/// # Safety
/// `obj` must be a live instance of this representation.
pub unsafe fn get_str(obj: GcRef) -> GcRef {
	(*Object::body(obj).cast::<P6strBody>()).value
}

/// # Safety
/// `obj` must be a live instance of this representation and `value` a live string or null.
pub unsafe fn set_str(tc: &mut ThreadContext, obj: GcRef, value: GcRef) {
	let body = Object::body(obj).cast::<P6strBody>();
	tc.assign_ref(obj, &mut (*body).value, value);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{test_context, vm_string};

	#[test]
	fn boxed_string_follows_its_box() {
		let mut tc = test_context();
		let str_type = vm_string::type_object_for(&mut tc, GcRef::NULL).unwrap();
		let str_id = tc.push_temp(str_type);
		let box_type = type_object_for(&mut tc, GcRef::NULL).unwrap();

		unsafe {
			let boxed = allocate(&mut tc, Object::st(box_type)).unwrap();
			let box_id = tc.push_temp(boxed);
			let str_st = Object::st(tc.temp(str_id));
			let text = vm_string::new(&mut tc, str_st, "boxed").unwrap();
			let boxed = tc.temp(box_id);
			set_str(&mut tc, boxed, text);

			let stats = tc.run_gc();
			// Box, string, and the STable plus type object of both.
			assert_eq!(stats.copied, 6);

			let text = get_str(tc.temp(box_id));
			assert!(tc.nursery().in_tospace(text));
			assert_eq!(vm_string::as_str(text), "boxed");
		}
		tc.pop_temps(2);
	}

	#[test]
	fn old_box_remembers_young_string() {
		let mut tc = test_context();
		let str_type = vm_string::type_object_for(&mut tc, GcRef::NULL).unwrap();
		let str_id = tc.push_temp(str_type);
		let box_type = type_object_for(&mut tc, GcRef::NULL).unwrap();

		unsafe {
			let boxed = allocate(&mut tc, Object::st(box_type)).unwrap();
			let box_id = tc.push_temp(boxed);
			tc.run_gc();
			tc.run_gc();
			assert!(tc.temp(box_id).is_second_gen());

			let str_st = Object::st(tc.temp(str_id));
			let text = vm_string::new(&mut tc, str_st, "young").unwrap();
			let boxed = tc.temp(box_id);
			set_str(&mut tc, boxed, text);
			assert!(tc.gen2_roots().contains(tc.temp(box_id)));

			let stats = tc.run_gc();
			assert_eq!(stats.copied, 1);
			assert_eq!(vm_string::as_str(get_str(tc.temp(box_id))), "young");
		}
		tc.pop_temps(2);
	}
}
