use gvm_gc::{GcConfig, GcRef, Instance, Object, ThreadContext};
use gvm_repr::vm_array::{Register, SlotType};
use gvm_repr::{cstruct, p6int, vm_array, vm_string, P6INT_ID};

fn context() -> ThreadContext {
	gvm_core::init();
	let config = GcConfig::default().with_nursery_size(64 * 1024);
	ThreadContext::new(Instance::new(config).unwrap()).unwrap()
}

unsafe fn push_str(tc: &mut ThreadContext, str_id: usize, array_id: usize, text: &str) {
	let str_st = Object::st(tc.temp(str_id));
	let text = vm_string::new(tc, str_st, text).unwrap();
	let array = tc.temp(array_id);
	vm_array::push(tc, array, Register::Str(text)).unwrap();
}

unsafe fn str_at(array: GcRef, index: i64) -> &'static str {
	match vm_array::at_pos(array, index).unwrap() {
		Register::Str(text) => vm_string::as_str(text),
		other => panic!("expected a string, got {other:?}"),
	}
}

#[test]
fn old_array_keeps_young_strings_alive() {
	let mut tc = context();
	let str_type = vm_string::type_object_for(&mut tc, GcRef::NULL).unwrap();
	let str_id = tc.push_temp(str_type);
	let array_type = vm_array::type_object_for(&mut tc, GcRef::NULL, SlotType::Str).unwrap();

	unsafe {
		let array = vm_array::allocate(&mut tc, Object::st(array_type)).unwrap();
		let array_id = tc.push_temp(array);
		for word in ["one", "two", "three"] {
			push_str(&mut tc, str_id, array_id, word);
		}

		tc.run_gc();
		let stats = tc.run_gc();
		// The array, three strings, and two types.
		assert_eq!(stats.promoted, 8);
		assert!(tc.temp(array_id).is_second_gen());

		push_str(&mut tc, str_id, array_id, "four");
		assert!(tc.gen2_roots().contains(tc.temp(array_id)));

		let stats = tc.run_gc();
		assert_eq!(stats.copied, 1);
		assert_eq!(stats.remembered, 1);
		let array = tc.temp(array_id);
		assert_eq!(str_at(array, -1), "four");
		assert_eq!(str_at(array, 0), "one");

		// Once the young string is gone the array no longer needs remembering.
		vm_array::pop(array).unwrap();
		let stats = tc.run_gc();
		assert_eq!(stats.remembered, 0);
		assert_eq!(stats.sweep.finalized, 1);
		assert!(!tc.gen2_roots().contains(tc.temp(array_id)));
	}
	tc.pop_temps(2);
}

#[test]
fn dead_array_and_its_strings_are_finalized() {
	let mut tc = context();
	let str_type = vm_string::type_object_for(&mut tc, GcRef::NULL).unwrap();
	let str_id = tc.push_temp(str_type);
	let array_type = vm_array::type_object_for(&mut tc, GcRef::NULL, SlotType::Str).unwrap();
	tc.push_temp(array_type);

	unsafe {
		let array = vm_array::allocate(&mut tc, Object::st(array_type)).unwrap();
		let array_id = tc.push_temp(array);
		for i in 0..5 {
			push_str(&mut tc, str_id, array_id, &format!("word {i}"));
		}
		tc.pop_temps(1);
	}

	let stats = tc.run_gc();
	assert_eq!(stats.sweep.finalized, 6);
	assert_eq!(stats.sweep.stables_freed, 0);
	// Only the two types are left.
	assert_eq!(stats.copied, 4);
	tc.pop_temps(2);
}

#[test]
fn struct_member_table_is_traced() {
	let mut tc = context();
	let strings = vm_string::type_object_for(&mut tc, GcRef::NULL).unwrap();
	let ints = p6int::type_object_for(&mut tc, GcRef::NULL).unwrap();
	let arrays = vm_array::type_object_for(&mut tc, GcRef::NULL, SlotType::Obj).unwrap();
	let what = cstruct::type_object_for(&mut tc, GcRef::NULL).unwrap();

	unsafe {
		let info = vm_array::allocate(&mut tc, Object::st(arrays)).unwrap();
		for name in ["b", "a"] {
			let name = vm_string::new(&mut tc, Object::st(strings), name).unwrap();
			vm_array::push(&mut tc, info, Register::Obj(ints)).unwrap();
			vm_array::push(&mut tc, info, Register::Obj(name)).unwrap();
		}
		cstruct::compose(&mut tc, Object::st(what), info).unwrap();
	}
	let struct_id = tc.push_temp(what);

	// The member names are only reachable through the representation data.
	let stats = tc.run_gc();
	assert_eq!(stats.sweep.finalized, 1);
	assert_eq!(stats.sweep.stables_freed, 1);

	unsafe {
		let st = Object::st(tc.temp(struct_id));
		let spec = cstruct::spec(st).unwrap();
		let names: Vec<&str> = spec.member_names.iter().map(|name| vm_string::as_str(*name)).collect();
		assert_eq!(names, ["a", "b"]);
		for (name, member) in spec.member_names.iter().zip(&spec.members) {
			assert!(tc.nursery().in_tospace(*name));
			assert!(tc.nursery().in_tospace(member.ty));
			assert_eq!(Object::stable(member.ty).repr.id, P6INT_ID);
		}
		assert_eq!(cstruct::member_offset(st, "a").unwrap(), 8);
		assert_eq!(cstruct::member_offset(st, "b").unwrap(), 0);
	}

	// Dropping the struct type releases its member table along with the names.
	tc.pop_temps(1);
	let stats = tc.run_gc();
	assert_eq!(stats.sweep.finalized, 2);
	assert_eq!(stats.sweep.stables_freed, 3);
}

#[test]
fn old_struct_type_remembers_its_member_table() {
	let mut tc = context();
	let what = cstruct::type_object_for(&mut tc, GcRef::NULL).unwrap();
	let struct_id = tc.push_temp(what);
	let ints = p6int::type_object_for(&mut tc, GcRef::NULL).unwrap();
	let int_id = tc.push_temp(ints);
	tc.run_gc();
	tc.run_gc();

	unsafe {
		let st = Object::st(tc.temp(struct_id));
		assert!(st.is_second_gen());

		let strings = vm_string::type_object_for(&mut tc, GcRef::NULL).unwrap();
		let arrays = vm_array::type_object_for(&mut tc, GcRef::NULL, SlotType::Obj).unwrap();
		let info = vm_array::allocate(&mut tc, Object::st(arrays)).unwrap();
		for name in ["b", "a"] {
			let name = vm_string::new(&mut tc, Object::st(strings), name).unwrap();
			let ints = tc.temp(int_id);
			vm_array::push(&mut tc, info, Register::Obj(ints)).unwrap();
			vm_array::push(&mut tc, info, Register::Obj(name)).unwrap();
		}
		cstruct::compose(&mut tc, st, info).unwrap();
		assert!(tc.gen2_roots().contains(st));
	}

	// The young names are only reachable from the old STable.
	let stats = tc.run_gc();
	assert_eq!(stats.sweep.finalized, 1);
	assert_eq!(stats.remembered, 1);
	unsafe {
		let st = Object::st(tc.temp(struct_id));
		let spec = cstruct::spec(st).unwrap();
		let names: Vec<&str> = spec.member_names.iter().map(|name| vm_string::as_str(*name)).collect();
		assert_eq!(names, ["a", "b"]);
		for name in &spec.member_names {
			assert!(tc.nursery().in_tospace(*name));
		}
	}

	let stats = tc.run_gc();
	assert_eq!(stats.remembered, 0);
	unsafe {
		let st = Object::st(tc.temp(struct_id));
		let spec = cstruct::spec(st).unwrap();
		for (name, expected) in spec.member_names.iter().zip(["a", "b"]) {
			assert!(name.is_second_gen());
			assert_eq!(vm_string::as_str(*name), expected);
		}
		assert_eq!(cstruct::member_offset(st, "a").unwrap(), 8);
	}
	tc.pop_temps(2);
}
