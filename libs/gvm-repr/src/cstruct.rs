use crate::{p6int, vm_array, vm_string, ReprError, CSTRUCT_ID, P6INT_ID, VM_STRING_ID};
use gvm_gc::{GcRef, Object, ReprOps, STable, ThreadContext, Worklist, OBJECT_SIZE};
use std::mem::size_of;
use std::ptr::null_mut;

const NAME: &str = "CStruct";

/// A view onto native memory laid out as a C struct.
///
/// `cobj` points at the struct itself, `blob` keeps whatever owns that memory alive. Members that are structs
/// themselves share the blob of their parent.
#[repr(C)]
pub struct CStructBody {
	pub cobj: *mut u8,
	pub blob: GcRef,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemberSpec {
	pub ty: GcRef,
	pub offset: usize,
}

/// The composed layout of a struct type, members sorted by name.
#[derive(Debug)]
pub struct CStructSpec {
	pub size: usize,
	pub align: usize,
	pub member_names: Vec<GcRef>,
	pub members: Vec<MemberSpec>,
}

pub static CSTRUCT: ReprOps = ReprOps {
	size: Some(|_| OBJECT_SIZE + size_of::<CStructBody>()),
	gc_mark: Some(gc_mark),
	gc_mark_repr_data: Some(gc_mark_repr_data),
	gc_free_repr_data: Some(gc_free_repr_data),
	..ReprOps::new(NAME, CSTRUCT_ID)
};

unsafe fn gc_mark(_: &STable, body: *mut u8, worklist: &mut Worklist) {
	let body = &mut *body.cast::<CStructBody>();
	if !body.blob.is_null() {
		worklist.add(&mut body.blob);
	}
}

unsafe fn gc_mark_repr_data(st: &mut STable, worklist: &mut Worklist) {
	let Some(spec) = st.repr_data.cast::<CStructSpec>().as_mut() else {
		return;
	};
	for (name, member) in spec.member_names.iter_mut().zip(spec.members.iter_mut()) {
		worklist.add(name);
		worklist.add(&mut member.ty);
	}
}

unsafe fn gc_free_repr_data(st: &mut STable) {
	if !st.repr_data.is_null() {
		drop(Box::from_raw(st.repr_data.cast::<CStructSpec>()));
		st.repr_data = null_mut();
	}
}

/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn spec<'a>(st: GcRef) -> Option<&'a CStructSpec> {
	STable::from_ref(st).repr_data.cast::<CStructSpec>().as_ref()
}

/// # Safety
/// `obj` must be a live instance of this representation.
pub unsafe fn body<'a>(obj: GcRef) -> &'a mut CStructBody {
	&mut *Object::body(obj).cast::<CStructBody>()
}

pub fn type_object_for(tc: &mut ThreadContext, how: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_type(&CSTRUCT, how)?)
}

/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn allocate(tc: &mut ThreadContext, st: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_object(st)?)
}

/// Resets a fresh instance. Only composed types can be instantiated.
///
/// # Safety
/// `obj` must be a live instance of this representation.
pub unsafe fn initialize(obj: GcRef) -> Result<(), ReprError> {
	if spec(Object::st(obj)).is_none() {
		return Err(ReprError::Uncomposed);
	}
	let body = body(obj);
	body.cobj = null_mut();
	body.blob = GcRef::NULL;
	Ok(())
}

/// Native size and alignment of a member of type `ty`. Anything that isn't an integer or a composed struct is
/// stored as a pointer.
unsafe fn member_layout(ty: GcRef) -> (usize, usize) {
	if ty.is_null() {
		return (size_of::<usize>(), size_of::<usize>());
	}
	let st = Object::st(ty);
	match STable::from_ref(st).repr.id {
		P6INT_ID => (size_of::<i64>(), size_of::<i64>()),
		CSTRUCT_ID => match spec(st) {
			Some(spec) => (spec.size, spec.align),
			None => (size_of::<usize>(), size_of::<usize>()),
		},
		_ => (size_of::<usize>(), size_of::<usize>()),
	}
}

/// Lays out the members listed in `info`, an object array alternating member types and member name strings.
///
/// Members keep their declaration order in memory, the table is sorted by name for lookups. The STable is usually old
/// by the time it is composed, so every name and type it now holds goes through the write barrier.
///
/// # Safety
/// `st` must be a live STable of this representation and `info` a live object array.
pub unsafe fn compose(tc: &mut ThreadContext, st: GcRef, info: GcRef) -> Result<(), ReprError> {
	let count = vm_array::elems(info);
	if count < 2 {
		return Err(ReprError::EmptyStruct);
	}
	if count % 2 != 0 {
		return Err(ReprError::UnpairedMembers);
	}

	let member_count = count / 2;
	let mut member_names: Vec<GcRef> = Vec::with_capacity(member_count);
	let mut members: Vec<MemberSpec> = Vec::with_capacity(member_count);
	let (mut size, mut align) = (0usize, 0usize);

	for i in 0..member_count {
		let ty = member_at(info, 2 * i)?;
		let name = member_at(info, 2 * i + 1)?;
		if name.is_null() || Object::stable(name).repr.id != VM_STRING_ID {
			return Err(ReprError::WrongKind {
				repr: NAME,
				op: "compose",
				expected: "str",
			});
		}
		let (member_size, member_align) = member_layout(ty);
		let padding = if size % member_align != 0 {
			member_align - size % member_align
		} else {
			0
		};
		align = align.max(member_align);
		size += padding;

		let text = vm_string::as_str(name);
		let pos = member_names
			.iter()
			.position(|other| vm_string::as_str(*other) > text)
			.unwrap_or(member_names.len());
		member_names.insert(pos, name);
		members.insert(pos, MemberSpec { ty, offset: size });

		size += member_size;
	}

	let spec = Box::new(CStructSpec {
		size: size.div_ceil(align) * align,
		align,
		member_names,
		members,
	});
	let stable = STable::from_ref_mut(st);
	gc_free_repr_data(stable);
	stable.repr_data = Box::into_raw(spec).cast();
	stable.compose();

	let spec = &*stable.repr_data.cast::<CStructSpec>();
	for (name, member) in spec.member_names.iter().zip(&spec.members) {
		tc.write_barrier(st, *name);
		tc.write_barrier(st, member.ty);
	}
	Ok(())
}

unsafe fn member_at(info: GcRef, index: usize) -> Result<GcRef, ReprError> {
	match vm_array::at_pos(info, index as i64)? {
		vm_array::Register::Obj(obj) => Ok(obj),
		_ => Err(ReprError::WrongKind {
			repr: NAME,
			op: "compose",
			expected: "object",
		}),
	}
}

/// The index of member `name` in the sorted member table.
///
/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn hint_for(st: GcRef, name: &str) -> Option<usize> {
	let spec = spec(st)?;
	spec.member_names
		.binary_search_by(|member| vm_string::as_str(*member).cmp(name))
		.ok()
}

unsafe fn member<'a>(st: GcRef, name: &str) -> Result<&'a MemberSpec, ReprError> {
	let spec = spec(st).ok_or(ReprError::Uncomposed)?;
	match hint_for(st, name) {
		Some(hint) => Ok(&spec.members[hint]),
		None => Err(ReprError::UnknownAttribute { name: name.to_string() }),
	}
}

/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn member_offset(st: GcRef, name: &str) -> Result<usize, ReprError> {
	Ok(member(st, name)?.offset)
}

/// Points `obj` at native memory owned by `blob`.
///
/// # Safety
/// `obj` must be a live instance of this representation, `blob` live or null, and `cobj` must stay valid for as
/// long as `blob` lives.
pub unsafe fn bind_cobj(tc: &mut ThreadContext, obj: GcRef, cobj: *mut u8, blob: GcRef) {
	let body = body(obj);
	body.cobj = cobj;
	tc.assign_ref(obj, &mut body.blob, blob);
}

unsafe fn int_slot(obj: GcRef, name: &str, op: &'static str) -> Result<*mut i64, ReprError> {
	let member = member(Object::st(obj), name)?;
	if member.ty.is_null() || Object::stable(member.ty).repr.id != P6INT_ID {
		return Err(ReprError::WrongKind {
			repr: NAME,
			op,
			expected: "int",
		});
	}
	Ok(body(obj).cobj.add(member.offset).cast::<i64>())
}

/// # Safety
/// `obj` must be a live instance bound to native memory.
pub unsafe fn get_int(obj: GcRef, name: &str) -> Result<i64, ReprError> {
	Ok(int_slot(obj, name, "get_attribute")?.read_unaligned())
}

/// # Safety
/// `obj` must be a live instance bound to native memory.
pub unsafe fn set_int(obj: GcRef, name: &str, value: i64) -> Result<(), ReprError> {
	int_slot(obj, name, "bind_attribute")?.write_unaligned(value);
	Ok(())
}

/// Wraps the nested struct member `name` in a new instance that shares this struct's memory and blob.
///
/// # Safety
/// `obj` must be a live instance bound to native memory.
pub unsafe fn get_struct(tc: &mut ThreadContext, obj: GcRef, name: &str) -> Result<GcRef, ReprError> {
	let member = *member(Object::st(obj), name)?;
	if member.ty.is_null() || Object::stable(member.ty).repr.id != CSTRUCT_ID {
		return Err(ReprError::WrongKind {
			repr: NAME,
			op: "get_attribute",
			expected: "struct",
		});
	}

	let obj_id = tc.push_temp(obj);
	let ty_id = tc.push_temp(member.ty);
	let nested = allocate(tc, Object::st(member.ty));
	let (obj, ty) = (tc.temp(obj_id), tc.temp(ty_id));
	tc.pop_temps(2);
	let nested = nested?;
	debug_assert_eq!(Object::st(nested), Object::st(ty));

	initialize(nested)?;
	let parent = body(obj);
	bind_cobj(tc, nested, parent.cobj.add(member.offset), parent.blob);
	Ok(nested)
}

/// Unboxes a `P6int` member type's value, for callers holding a boxed integer.
///
/// # Safety
/// `obj` must be a live instance bound to native memory, `boxed` a live `P6int`.
pub unsafe fn set_int_from_box(obj: GcRef, name: &str, boxed: GcRef) -> Result<(), ReprError> {
	set_int(obj, name, p6int::get_int(boxed))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_context;
	use crate::vm_array::{Register, SlotType};

	struct Types {
		strings: GcRef,
		ints: GcRef,
		info: GcRef,
	}

	fn types(tc: &mut ThreadContext) -> Types {
		let strings = vm_string::type_object_for(tc, GcRef::NULL).unwrap();
		let ints = p6int::type_object_for(tc, GcRef::NULL).unwrap();
		let info = vm_array::type_object_for(tc, GcRef::NULL, SlotType::Obj).unwrap();
		Types { strings, ints, info }
	}

	/// Builds a member list from `(type, name)` pairs. Nothing may collect while the result is unrooted.
	unsafe fn member_list(tc: &mut ThreadContext, types: &Types, members: &[(GcRef, &str)]) -> GcRef {
		let info = vm_array::allocate(tc, Object::st(types.info)).unwrap();
		for (ty, name) in members {
			let name = vm_string::new(tc, Object::st(types.strings), name).unwrap();
			vm_array::push(tc, info, Register::Obj(*ty)).unwrap();
			vm_array::push(tc, info, Register::Obj(name)).unwrap();
		}
		info
	}

	#[test]
	fn members_are_sorted_and_padded() {
		let mut tc = test_context();
		let types = types(&mut tc);
		let inner = type_object_for(&mut tc, GcRef::NULL).unwrap();
		let outer = type_object_for(&mut tc, GcRef::NULL).unwrap();

		unsafe {
			let info = member_list(&mut tc, &types, &[(types.ints, "x"), (types.ints, "y")]);
			compose(&mut tc, Object::st(inner), info).unwrap();
			let inner_spec = spec(Object::st(inner)).unwrap();
			assert_eq!((inner_spec.size, inner_spec.align), (16, 8));

			let info = member_list(
				&mut tc,
				&types,
				&[(types.ints, "zeta"), (inner, "alpha"), (types.strings, "mid")],
			);
			compose(&mut tc, Object::st(outer), info).unwrap();

			let st = Object::st(outer);
			let names: Vec<&str> = spec(st)
				.unwrap()
				.member_names
				.iter()
				.map(|name| vm_string::as_str(*name))
				.collect();
			assert_eq!(names, ["alpha", "mid", "zeta"]);
			assert_eq!(member_offset(st, "zeta").unwrap(), 0);
			assert_eq!(member_offset(st, "alpha").unwrap(), 8);
			assert_eq!(member_offset(st, "mid").unwrap(), 24);
			assert_eq!(spec(st).unwrap().size, 32);
			assert_eq!(hint_for(st, "mid"), Some(1));
			assert_eq!(hint_for(st, "nope"), None);
			assert_eq!(
				member_offset(st, "nope"),
				Err(ReprError::UnknownAttribute {
					name: "nope".to_string()
				})
			);
		}
	}

	#[test]
	fn compose_rejects_bad_member_lists() {
		let mut tc = test_context();
		let types = types(&mut tc);
		let what = type_object_for(&mut tc, GcRef::NULL).unwrap();
		unsafe {
			let empty = member_list(&mut tc, &types, &[]);
			assert_eq!(compose(&mut tc, Object::st(what), empty), Err(ReprError::EmptyStruct));

			let odd = member_list(&mut tc, &types, &[(types.ints, "a")]);
			vm_array::push(&mut tc, odd, Register::Obj(types.ints)).unwrap();
			assert_eq!(compose(&mut tc, Object::st(what), odd), Err(ReprError::UnpairedMembers));

			let not_a_string = member_list(&mut tc, &types, &[]);
			let boxed = p6int::boxed(&mut tc, Object::st(types.ints), 5).unwrap();
			vm_array::push(&mut tc, not_a_string, Register::Obj(types.ints)).unwrap();
			vm_array::push(&mut tc, not_a_string, Register::Obj(boxed)).unwrap();
			let name_error = ReprError::WrongKind {
				repr: "CStruct",
				op: "compose",
				expected: "str",
			};
			assert_eq!(compose(&mut tc, Object::st(what), not_a_string), Err(name_error.clone()));

			let null_name = member_list(&mut tc, &types, &[]);
			vm_array::push(&mut tc, null_name, Register::Obj(types.ints)).unwrap();
			vm_array::push(&mut tc, null_name, Register::Obj(GcRef::NULL)).unwrap();
			assert_eq!(compose(&mut tc, Object::st(what), null_name), Err(name_error));
			assert!(spec(Object::st(what)).is_none());

			let obj = allocate(&mut tc, Object::st(what)).unwrap();
			assert_eq!(initialize(obj), Err(ReprError::Uncomposed));
		}
	}

	#[test]
	fn reads_and_writes_native_memory() {
		let mut tc = test_context();
		let types = types(&mut tc);
		let inner = type_object_for(&mut tc, GcRef::NULL).unwrap();
		let outer = type_object_for(&mut tc, GcRef::NULL).unwrap();
		let mut memory = [0i64; 4];

		unsafe {
			let info = member_list(&mut tc, &types, &[(types.ints, "x"), (types.ints, "y")]);
			compose(&mut tc, Object::st(inner), info).unwrap();
			let info = member_list(&mut tc, &types, &[(types.ints, "count"), (inner, "point")]);
			compose(&mut tc, Object::st(outer), info).unwrap();

			let blob = p6int::boxed(&mut tc, Object::st(types.ints), 0).unwrap();
			let obj = allocate(&mut tc, Object::st(outer)).unwrap();
			initialize(obj).unwrap();
			bind_cobj(&mut tc, obj, memory.as_mut_ptr().cast(), blob);

			set_int(obj, "count", 3).unwrap();
			let point = get_struct(&mut tc, obj, "point").unwrap();
			assert_eq!(body(point).blob, blob);
			set_int(point, "y", 9).unwrap();
			let seven = p6int::boxed(&mut tc, Object::st(types.ints), 7).unwrap();
			set_int_from_box(point, "x", seven).unwrap();

			assert!(matches!(
				get_int(obj, "point"),
				Err(ReprError::WrongKind { expected: "int", .. })
			));
			assert!(matches!(
				get_struct(&mut tc, obj, "count"),
				Err(ReprError::WrongKind { expected: "struct", .. })
			));
			assert_eq!(get_int(obj, "count").unwrap(), 3);
		}
		assert_eq!(memory, [3, 7, 9, 0]);
	}
}
