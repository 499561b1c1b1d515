use crate::{ReprError, KNOWHOW_ATTRIBUTE_ID};
use gvm_gc::{GcRef, Object, ReprOps, STable, ThreadContext, Worklist, OBJECT_SIZE};
use std::mem::size_of;

/// An attribute as declared by the bootstrap meta-object.
#[repr(C)]
pub struct KnowHOWAttributeBody {
	pub name: GcRef,
	pub ty: GcRef,
	pub box_target: i64,
}

pub static KNOWHOW_ATTRIBUTE: ReprOps = ReprOps {
	size: Some(|_| OBJECT_SIZE + size_of::<KnowHOWAttributeBody>()),
	gc_mark: Some(gc_mark),
	..ReprOps::new("KnowHOWAttributeREPR", KNOWHOW_ATTRIBUTE_ID)
};

unsafe fn gc_mark(_: &STable, body: *mut u8, worklist: &mut Worklist) {
	let body = &mut *body.cast::<KnowHOWAttributeBody>();
	worklist.add(&mut body.name);
	worklist.add(&mut body.ty);
}

pub fn type_object_for(tc: &mut ThreadContext, how: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_type(&KNOWHOW_ATTRIBUTE, how)?)
}

/// Allocates an attribute named `name` of type `ty`.
///
/// # Safety
/// `st` must be a live STable of this representation, `name` and `ty` live or null.
pub unsafe fn new(
	tc: &mut ThreadContext,
	st: GcRef,
	name: GcRef,
	ty: GcRef,
	box_target: bool,
) -> Result<GcRef, ReprError> {
	let name_id = tc.push_temp(name);
	let ty_id = tc.push_temp(ty);
	let attr = tc.allocate_object(st);
	let (name, ty) = (tc.temp(name_id), tc.temp(ty_id));
	tc.pop_temps(2);

	let attr = attr?;
	let body = body(attr);
	tc.assign_ref(attr, &mut body.name, name);
	tc.assign_ref(attr, &mut body.ty, ty);
	body.box_target = box_target as i64;
	Ok(attr)
}

/// # Safety
/// `obj` must be a live instance of this representation.
pub unsafe fn body<'a>(obj: GcRef) -> &'a mut KnowHOWAttributeBody {
	&mut *Object::body(obj).cast::<KnowHOWAttributeBody>()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{p6int, test_context, vm_string};

	#[test]
	fn name_and_type_are_rewritten() {
		let mut tc = test_context();
		let attr_type = type_object_for(&mut tc, GcRef::NULL).unwrap();
		let attr_id = tc.push_temp(attr_type);
		let str_type = vm_string::type_object_for(&mut tc, GcRef::NULL).unwrap();
		let int_type = p6int::type_object_for(&mut tc, GcRef::NULL).unwrap();
		let int_id = tc.push_temp(int_type);

		unsafe {
			let name = vm_string::new(&mut tc, Object::st(str_type), "$!count").unwrap();
			let (attr_st, int_type) = (Object::st(tc.temp(attr_id)), tc.temp(int_id));
			let attr = new(&mut tc, attr_st, name, int_type, true).unwrap();
			let id = tc.push_temp(attr);

			tc.run_gc();
			let attr = body(tc.temp(id));
			assert_eq!(vm_string::as_str(attr.name), "$!count");
			assert_eq!(attr.ty, tc.temp(int_id));
			assert_eq!(attr.box_target, 1);
			assert!(tc.nursery().in_tospace(attr.name));
		}
		tc.pop_temps(3);
	}
}
