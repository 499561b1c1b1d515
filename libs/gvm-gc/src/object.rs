use crate::{
	align_size, fatal, Collectable, CollectableFlags, CollectableKind, GcFatal, GcPhase, GcRef,
	ReprOps,
};
use std::mem::size_of;
use std::ptr::{null_mut, slice_from_raw_parts_mut};
use std::slice::{from_raw_parts, from_raw_parts_mut};

pub const ALIGNMENT: usize = 8;

/// Size of an object header, which is also the complete size of a type object.
pub const OBJECT_SIZE: usize = align_size(size_of::<Object>(), ALIGNMENT);
pub const STABLE_SIZE: usize = align_size(size_of::<STable>(), ALIGNMENT);

// HEADER
// ST
// BODY <- Object::body
// BODY
#[repr(C)]
pub struct Object {
	pub header: Collectable,
	pub st: GcRef,
}

impl Object {
	pub fn new(flags: CollectableFlags, st: GcRef) -> Object {
		Object {
			header: Collectable::new(flags),
			st,
		}
	}

	/// # Safety
	/// `obj` must point at an instance or type object.
	pub unsafe fn body(obj: GcRef) -> *mut u8 {
		obj.cast::<u8>().add(OBJECT_SIZE)
	}

	/// # Safety
	/// `obj` must point at an instance or type object.
	pub unsafe fn st(obj: GcRef) -> GcRef {
		(*obj.cast::<Object>()).st
	}

	/// # Safety
	/// `obj` must point at an instance or type object whose STable is still readable.
	pub unsafe fn stable<'a>(obj: GcRef) -> &'a STable {
		STable::from_ref(Self::st(obj))
	}
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSpec {
	pub class_handle: GcRef,
	pub attr_name: GcRef,
	pub fetch_method: GcRef,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoolificationMode {
	CallMethod,
	UnboxInt,
	UnboxStr,
	NotTypeObject,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoolificationSpec {
	pub mode: BoolificationMode,
	pub method: GcRef,
}

/// Shared per-type metadata.
///
/// The STable is byte-copied when it survives a collection, so everything it owns outside the heap is held through
/// raw pointers and only released once through [`STable::release`].
#[repr(C)]
pub struct STable {
	pub header: Collectable,
	pub repr: &'static ReprOps,
	/// Representation private data, only the representation knows its layout.
	pub repr_data: *mut u8,
	/// Cached instance size including the object header.
	pub size: usize,
	pub how: GcRef,
	pub what: GcRef,
	pub who: GcRef,
	pub method_cache: GcRef,
	vtable: *mut GcRef,
	vtable_length: usize,
	type_check_cache: *mut GcRef,
	type_check_cache_length: usize,
	container_spec: *mut ContainerSpec,
	boolification_spec: *mut BoolificationSpec,
}

impl STable {
	pub fn new(flags: CollectableFlags, repr: &'static ReprOps, how: GcRef) -> STable {
		STable {
			header: Collectable::new(flags),
			repr,
			repr_data: null_mut(),
			size: OBJECT_SIZE,
			how,
			what: GcRef::NULL,
			who: GcRef::NULL,
			method_cache: GcRef::NULL,
			vtable: null_mut(),
			vtable_length: 0,
			type_check_cache: null_mut(),
			type_check_cache_length: 0,
			container_spec: null_mut(),
			boolification_spec: null_mut(),
		}
	}

	/// # Safety
	/// `st` must point at a readable STable.
	pub unsafe fn from_ref<'a>(st: GcRef) -> &'a STable {
		debug_assert!(!st.is_null(), "Object without an STable");
		&*st.cast::<STable>()
	}

	/// # Safety
	/// `st` must point at a readable STable that nothing else borrows.
	pub unsafe fn from_ref_mut<'a>(st: GcRef) -> &'a mut STable {
		debug_assert!(!st.is_null(), "Object without an STable");
		&mut *st.cast::<STable>()
	}

	/// Recomputes the cached instance size, needed whenever the representation data changes.
	pub fn compose(&mut self) {
		self.size = self.repr.instance_size(self);
	}

	pub fn vtable(&self) -> &[GcRef] {
		unsafe { raw_slice(self.vtable, self.vtable_length) }
	}

	pub fn vtable_mut(&mut self) -> &mut [GcRef] {
		unsafe { raw_slice_mut(self.vtable, self.vtable_length) }
	}

	/// Replaces the vtable. Storing young references into an old STable needs a write barrier.
	pub fn set_vtable(&mut self, entries: Vec<GcRef>) {
		unsafe {
			free_slice(self.vtable, self.vtable_length);
		}
		(self.vtable, self.vtable_length) = into_raw_slice(entries);
	}

	pub fn type_check_cache(&self) -> &[GcRef] {
		unsafe { raw_slice(self.type_check_cache, self.type_check_cache_length) }
	}

	pub fn type_check_cache_mut(&mut self) -> &mut [GcRef] {
		unsafe { raw_slice_mut(self.type_check_cache, self.type_check_cache_length) }
	}

	pub fn set_type_check_cache(&mut self, entries: Vec<GcRef>) {
		unsafe {
			free_slice(self.type_check_cache, self.type_check_cache_length);
		}
		(self.type_check_cache, self.type_check_cache_length) = into_raw_slice(entries);
	}

	pub fn container_spec(&self) -> Option<&ContainerSpec> {
		unsafe { self.container_spec.as_ref() }
	}

	pub fn container_spec_mut(&mut self) -> Option<&mut ContainerSpec> {
		unsafe { self.container_spec.as_mut() }
	}

	pub fn set_container_spec(&mut self, spec: Option<ContainerSpec>) {
		unsafe {
			free_box(self.container_spec);
		}
		self.container_spec = spec.map_or(null_mut(), |spec| Box::into_raw(Box::new(spec)));
	}

	pub fn boolification_spec(&self) -> Option<&BoolificationSpec> {
		unsafe { self.boolification_spec.as_ref() }
	}

	pub fn boolification_spec_mut(&mut self) -> Option<&mut BoolificationSpec> {
		unsafe { self.boolification_spec.as_mut() }
	}

	pub fn set_boolification_spec(&mut self, spec: Option<BoolificationSpec>) {
		unsafe {
			free_box(self.boolification_spec);
		}
		self.boolification_spec = spec.map_or(null_mut(), |spec| Box::into_raw(Box::new(spec)));
	}

	/// Visits every reference slot the STable holds directly.
	/// References held by the representation data are reached through `gc_mark_repr_data` instead.
	pub fn visit_slots(&mut self, mut visitor: impl FnMut(*mut GcRef)) {
		visitor(&mut self.how);
		visitor(&mut self.what);
		visitor(&mut self.method_cache);
		for slot in self.vtable_mut() {
			visitor(slot);
		}
		for slot in self.type_check_cache_mut() {
			visitor(slot);
		}
		if let Some(spec) = self.container_spec_mut() {
			visitor(&mut spec.class_handle);
			visitor(&mut spec.attr_name);
			visitor(&mut spec.fetch_method);
		}
		if let Some(spec) = self.boolification_spec_mut() {
			visitor(&mut spec.method);
		}
		visitor(&mut self.who);
	}

	/// Releases everything the STable owns outside of the heap, including the representation data.
	///
	/// # Safety
	/// Must be called at most once per logical STable, copies share the same allocations.
	pub unsafe fn release(&mut self) {
		if let Some(free_repr_data) = self.repr.gc_free_repr_data {
			free_repr_data(self);
		}
		self.repr_data = null_mut();

		free_slice(self.vtable, self.vtable_length);
		self.vtable = null_mut();
		self.vtable_length = 0;

		free_slice(self.type_check_cache, self.type_check_cache_length);
		self.type_check_cache = null_mut();
		self.type_check_cache_length = 0;

		free_box(self.container_spec);
		self.container_spec = null_mut();
		free_box(self.boolification_spec);
		self.boolification_spec = null_mut();
	}
}

fn into_raw_slice(entries: Vec<GcRef>) -> (*mut GcRef, usize) {
	if entries.is_empty() {
		return (null_mut(), 0);
	}

	let length = entries.len();
	let raw = Box::into_raw(entries.into_boxed_slice());
	(raw as *mut GcRef, length)
}

unsafe fn raw_slice<'a>(ptr: *mut GcRef, length: usize) -> &'a [GcRef] {
	if ptr.is_null() {
		&[]
	} else {
		from_raw_parts(ptr, length)
	}
}

unsafe fn raw_slice_mut<'a>(ptr: *mut GcRef, length: usize) -> &'a mut [GcRef] {
	if ptr.is_null() {
		&mut []
	} else {
		from_raw_parts_mut(ptr, length)
	}
}

unsafe fn free_slice(ptr: *mut GcRef, length: usize) {
	if !ptr.is_null() {
		drop(Box::from_raw(slice_from_raw_parts_mut(ptr, length)));
	}
}

unsafe fn free_box<T>(ptr: *mut T) {
	if !ptr.is_null() {
		drop(Box::from_raw(ptr));
	}
}

/// Classifies a collectable by its flags.
///
/// # Safety
/// `item` must point at a collectable header.
pub unsafe fn collectable_kind(item: GcRef, phase: GcPhase) -> CollectableKind {
	let flags = item.flags();
	match flags.kind() {
		Some(kind) => kind,
		None => fatal(GcFatal::CorruptFlags {
			flags: flags.bits(),
			phase,
		}),
	}
}

/// The number of bytes a collectable occupies. Copying and sweeping both step by exactly this amount.
///
/// # Safety
/// `item` must point at a collectable header, and for instances its STable must be readable.
pub unsafe fn collectable_size(item: GcRef, phase: GcPhase) -> usize {
	match collectable_kind(item, phase) {
		CollectableKind::Instance => Object::stable(item).size,
		CollectableKind::TypeObject => OBJECT_SIZE,
		CollectableKind::STable => STABLE_SIZE,
		CollectableKind::SerializationContext => fatal(GcFatal::UnsupportedKind { phase }),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	static EMPTY_REPR: ReprOps = ReprOps::new("Empty", 0);

	#[test]
	fn sizes_are_aligned() {
		assert_eq!(OBJECT_SIZE % ALIGNMENT, 0);
		assert_eq!(STABLE_SIZE % ALIGNMENT, 0);
		assert!(STABLE_SIZE > OBJECT_SIZE);
	}

	#[test]
	fn visits_every_stable_slot() {
		let mut st = STable::new(CollectableFlags::STABLE, &EMPTY_REPR, GcRef::NULL);
		st.set_vtable(vec![GcRef::NULL; 4]);
		st.set_type_check_cache(vec![GcRef::NULL; 2]);
		st.set_container_spec(Some(ContainerSpec {
			class_handle: GcRef::NULL,
			attr_name: GcRef::NULL,
			fetch_method: GcRef::NULL,
		}));
		st.set_boolification_spec(Some(BoolificationSpec {
			mode: BoolificationMode::CallMethod,
			method: GcRef::NULL,
		}));

		let mut count = 0;
		st.visit_slots(|_| count += 1);
		// how, what, method cache, who + 4 vtable + 2 type checks + 3 container + 1 boolification
		assert_eq!(count, 14);

		unsafe { st.release() };
		let mut count = 0;
		st.visit_slots(|_| count += 1);
		assert_eq!(count, 4);
		assert!(st.container_spec().is_none());
		assert!(st.vtable().is_empty());
	}

	#[test]
	fn replacing_vtable_keeps_length() {
		let mut st = STable::new(CollectableFlags::STABLE, &EMPTY_REPR, GcRef::NULL);
		st.set_vtable(vec![GcRef::NULL; 3]);
		assert_eq!(st.vtable().len(), 3);
		st.set_vtable(vec![]);
		assert!(st.vtable().is_empty());
		unsafe { st.release() };
	}

	#[test]
	fn compose_uses_repr_size() {
		static SIZED: ReprOps = ReprOps {
			size: Some(|_| OBJECT_SIZE + 12),
			..ReprOps::new("Sized", 1)
		};
		let mut st = STable::new(CollectableFlags::STABLE, &SIZED, GcRef::NULL);
		assert_eq!(st.size, OBJECT_SIZE);
		st.compose();
		assert_eq!(st.size, OBJECT_SIZE + 16);
	}
}
