use crate::{ReprError, VM_ARRAY_ID};
use gvm_gc::{AllocationError, GcRef, Object, ReprOps, STable, ThreadContext, Worklist, OBJECT_SIZE};
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, realloc, Layout};
use std::mem::size_of;
use std::ptr::{copy, null_mut, write_bytes};
use tracing::trace;

const NAME: &str = "VMArray";

/// What every slot of an array holds.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SlotType {
	#[default]
	Obj,
	Str,
	I64,
	I32,
	I16,
	I8,
	N64,
	N32,
}

impl SlotType {
	pub fn elem_size(self) -> usize {
		match self {
			SlotType::Obj | SlotType::Str => size_of::<GcRef>(),
			SlotType::I64 | SlotType::N64 => 8,
			SlotType::I32 | SlotType::N32 => 4,
			SlotType::I16 => 2,
			SlotType::I8 => 1,
		}
	}

	/// Whether the collector has to visit the slots.
	pub fn is_ref(self) -> bool {
		matches!(self, SlotType::Obj | SlotType::Str)
	}

	fn register(self) -> &'static str {
		match self {
			SlotType::Obj => "object",
			SlotType::Str => "str",
			SlotType::I64 | SlotType::I32 | SlotType::I16 | SlotType::I8 => "int",
			SlotType::N64 | SlotType::N32 => "num",
		}
	}

	fn zero(self) -> Register {
		match self {
			SlotType::Obj => Register::Obj(GcRef::NULL),
			SlotType::Str => Register::Str(GcRef::NULL),
			SlotType::I64 | SlotType::I32 | SlotType::I16 | SlotType::I8 => Register::Int(0),
			SlotType::N64 | SlotType::N32 => Register::Num(0.0),
		}
	}
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Register {
	Obj(GcRef),
	Str(GcRef),
	Int(i64),
	Num(f64),
}

#[derive(Copy, Clone, Debug)]
struct ArrayReprData {
	slot_type: SlotType,
	elem_size: usize,
}

impl Default for ArrayReprData {
	fn default() -> Self {
		ArrayReprData {
			slot_type: SlotType::Obj,
			elem_size: SlotType::Obj.elem_size(),
		}
	}
}

/// A growable array. Live elements are `slots[start..start + elems]`, the buffer holds `ssize` elements.
#[repr(C)]
pub struct VMArrayBody {
	pub elems: usize,
	pub start: usize,
	pub ssize: usize,
	pub slots: *mut u8,
}

pub static VM_ARRAY: ReprOps = ReprOps {
	size: Some(|_| OBJECT_SIZE + size_of::<VMArrayBody>()),
	gc_mark: Some(gc_mark),
	gc_free: Some(gc_free),
	gc_free_repr_data: Some(gc_free_repr_data),
	..ReprOps::new(NAME, VM_ARRAY_ID)
};

unsafe fn repr_data(st: &STable) -> ArrayReprData {
	if st.repr_data.is_null() {
		ArrayReprData::default()
	} else {
		*st.repr_data.cast::<ArrayReprData>()
	}
}

unsafe fn gc_mark(st: &STable, body: *mut u8, worklist: &mut Worklist) {
	if !repr_data(st).slot_type.is_ref() {
		return;
	}

	let body = &*body.cast::<VMArrayBody>();
	let slots = body.slots.cast::<GcRef>();
	for i in 0..body.elems {
		worklist.add(slots.add(body.start + i));
	}
}

unsafe fn gc_free(obj: *mut Object) {
	let obj = GcRef::from_ptr(obj.cast());
	let data = repr_data(Object::stable(obj));
	let body = body(obj);
	if !body.slots.is_null() {
		dealloc(body.slots, slots_layout(body.ssize, data.elem_size));
		body.slots = null_mut();
	}
}

unsafe fn gc_free_repr_data(st: &mut STable) {
	if !st.repr_data.is_null() {
		drop(Box::from_raw(st.repr_data.cast::<ArrayReprData>()));
	}
}

fn slots_layout(ssize: usize, elem_size: usize) -> Layout {
	// Only ever called for sizes that were allocated successfully before.
	unsafe { Layout::from_size_align_unchecked(ssize * elem_size, 8) }
}

fn checked_layout(ssize: usize, elem_size: usize) -> Result<Layout, ReprError> {
	let size = ssize
		.checked_mul(elem_size)
		.ok_or(AllocationError::ObjectTooBig { size: usize::MAX })?;
	Ok(Layout::from_size_align(size, 8).map_err(|_| AllocationError::ObjectTooBig { size })?)
}

/// # Safety
/// `obj` must be a live array.
pub unsafe fn body<'a>(obj: GcRef) -> &'a mut VMArrayBody {
	&mut *Object::body(obj).cast::<VMArrayBody>()
}

/// Creates an array type whose slots hold `slot_type`.
pub fn type_object_for(tc: &mut ThreadContext, how: GcRef, slot_type: SlotType) -> Result<GcRef, ReprError> {
	let what = tc.allocate_type(&VM_ARRAY, how)?;
	let data = Box::new(ArrayReprData {
		slot_type,
		elem_size: slot_type.elem_size(),
	});
	unsafe {
		let st = STable::from_ref_mut(Object::st(what));
		st.repr_data = Box::into_raw(data).cast();
		st.compose();
	}
	Ok(what)
}

/// # Safety
/// `st` must be a live STable of this representation.
pub unsafe fn allocate(tc: &mut ThreadContext, st: GcRef) -> Result<GcRef, ReprError> {
	Ok(tc.allocate_object(st)?)
}

/// # Safety
/// `obj` must be a live array.
pub unsafe fn slot_type(obj: GcRef) -> SlotType {
	repr_data(Object::stable(obj)).slot_type
}

unsafe fn read_slot(slots: *mut u8, slot_type: SlotType, index: usize) -> Register {
	match slot_type {
		SlotType::Obj => Register::Obj(*slots.cast::<GcRef>().add(index)),
		SlotType::Str => Register::Str(*slots.cast::<GcRef>().add(index)),
		SlotType::I64 => Register::Int(*slots.cast::<i64>().add(index)),
		SlotType::I32 => Register::Int(*slots.cast::<i32>().add(index) as i64),
		SlotType::I16 => Register::Int(*slots.cast::<i16>().add(index) as i64),
		SlotType::I8 => Register::Int(*slots.cast::<i8>().add(index) as i64),
		SlotType::N64 => Register::Num(*slots.cast::<f64>().add(index)),
		SlotType::N32 => Register::Num(*slots.cast::<f32>().add(index) as f64),
	}
}

/// Stores a value whose kind has already been checked. References go through the write barrier of `root`.
unsafe fn write_slot(
	tc: &mut ThreadContext,
	root: GcRef,
	slots: *mut u8,
	slot_type: SlotType,
	index: usize,
	value: Register,
) {
	match (slot_type, value) {
		(SlotType::Obj, Register::Obj(value)) | (SlotType::Str, Register::Str(value)) => {
			tc.assign_ref(root, slots.cast::<GcRef>().add(index), value)
		}
		(SlotType::I64, Register::Int(value)) => *slots.cast::<i64>().add(index) = value,
		(SlotType::I32, Register::Int(value)) => *slots.cast::<i32>().add(index) = value as i32,
		(SlotType::I16, Register::Int(value)) => *slots.cast::<i16>().add(index) = value as i16,
		(SlotType::I8, Register::Int(value)) => *slots.cast::<i8>().add(index) = value as i8,
		(SlotType::N64, Register::Num(value)) => *slots.cast::<f64>().add(index) = value,
		(SlotType::N32, Register::Num(value)) => *slots.cast::<f32>().add(index) = value as f32,
		_ => unreachable!("slot kind checked before the write"),
	}
}

fn check_kind(slot_type: SlotType, value: Register, op: &'static str) -> Result<(), ReprError> {
	let matches = matches!(
		(slot_type, value),
		(SlotType::Obj, Register::Obj(_))
			| (SlotType::Str, Register::Str(_))
			| (SlotType::I64 | SlotType::I32 | SlotType::I16 | SlotType::I8, Register::Int(_))
			| (SlotType::N64 | SlotType::N32, Register::Num(_))
	);
	if matches {
		Ok(())
	} else {
		Err(ReprError::WrongKind {
			repr: NAME,
			op,
			expected: slot_type.register(),
		})
	}
}

/// Resizes to `n` elements. Newly exposed slots always read as null or zero.
unsafe fn set_size(body: &mut VMArrayBody, n: usize, data: ArrayReprData) -> Result<(), ReprError> {
	let elem_size = data.elem_size;
	if n < body.elems {
		body.elems = n;
		return Ok(());
	}

	// Reuse the space freed by shifting before growing the buffer.
	if body.start > 0 && n + body.start > body.ssize {
		copy(body.slots.add(body.start * elem_size), body.slots, body.elems * elem_size);
		body.start = 0;
	}

	if n > body.ssize {
		let ssize = if body.ssize < 8192 {
			(body.ssize * 2).max(n).max(8)
		} else {
			(n + 0x1000) & !0xfff
		};
		let layout = checked_layout(ssize, elem_size)?;
		let slots = if body.slots.is_null() {
			alloc_zeroed(layout)
		} else {
			realloc(body.slots, slots_layout(body.ssize, elem_size), layout.size())
		};
		if slots.is_null() {
			handle_alloc_error(layout);
		}
		trace!(target: "gc", "Grew {} slots from {} to {}", NAME, body.ssize, ssize);
		body.slots = slots;
		body.ssize = ssize;
	}

	let exposed = body.start + body.elems;
	write_bytes(body.slots.add(exposed * elem_size), 0, (n - body.elems) * elem_size);
	body.elems = n;
	Ok(())
}

fn resolve_index(index: i64, elems: usize) -> Result<usize, ReprError> {
	let resolved = if index < 0 { index + elems as i64 } else { index };
	if resolved < 0 {
		return Err(ReprError::IndexOutOfBounds { repr: NAME, index });
	}
	Ok(resolved as usize)
}

/// Reads an element. Negative indices count from the end, reading past the end yields a null or zero value.
///
/// # Safety
/// `obj` must be a live array.
pub unsafe fn at_pos(obj: GcRef, index: i64) -> Result<Register, ReprError> {
	let data = repr_data(Object::stable(obj));
	let body = body(obj);
	let index = resolve_index(index, body.elems)?;
	if index >= body.elems {
		return Ok(data.slot_type.zero());
	}
	Ok(read_slot(body.slots, data.slot_type, body.start + index))
}

/// Writes an element, growing the array when `index` is past the end.
///
/// # Safety
/// `obj` must be a live array, a reference `value` must be live or null.
pub unsafe fn bind_pos(tc: &mut ThreadContext, obj: GcRef, index: i64, value: Register) -> Result<(), ReprError> {
	let data = repr_data(Object::stable(obj));
	check_kind(data.slot_type, value, "bind_pos")?;

	let body = body(obj);
	let index = resolve_index(index, body.elems)?;
	if index >= body.elems {
		set_size(body, index + 1, data)?;
	}
	write_slot(tc, obj, body.slots, data.slot_type, body.start + index, value);
	Ok(())
}

/// # Safety
/// `obj` must be a live array.
pub unsafe fn elems(obj: GcRef) -> usize {
	body(obj).elems
}

/// # Safety
/// `obj` must be a live array.
pub unsafe fn set_elems(obj: GcRef, count: i64) -> Result<(), ReprError> {
	if count < 0 {
		return Err(ReprError::NegativeSize { repr: NAME });
	}
	let data = repr_data(Object::stable(obj));
	set_size(body(obj), count as usize, data)
}

/// Whether `index` names a live element holding something other than null. Native slots always exist.
///
/// # Safety
/// `obj` must be a live array.
pub unsafe fn exists_pos(obj: GcRef, index: i64) -> bool {
	let body = body(obj);
	let index = if index < 0 { index + body.elems as i64 } else { index };
	if index < 0 || index as usize >= body.elems {
		return false;
	}
	match at_pos(obj, index) {
		Ok(Register::Obj(value) | Register::Str(value)) => !value.is_null(),
		Ok(_) => true,
		Err(_) => false,
	}
}

/// # Safety
/// `obj` must be a live array, a reference `value` must be live or null.
pub unsafe fn push(tc: &mut ThreadContext, obj: GcRef, value: Register) -> Result<(), ReprError> {
	let elems = body(obj).elems as i64;
	bind_pos(tc, obj, elems, value)
}

/// # Safety
/// `obj` must be a live array.
pub unsafe fn pop(obj: GcRef) -> Result<Register, ReprError> {
	let data = repr_data(Object::stable(obj));
	let body = body(obj);
	if body.elems == 0 {
		return Err(ReprError::Empty { repr: NAME, op: "pop" });
	}
	body.elems -= 1;
	Ok(read_slot(body.slots, data.slot_type, body.start + body.elems))
}

/// # Safety
/// `obj` must be a live array.
pub unsafe fn shift(obj: GcRef) -> Result<Register, ReprError> {
	let data = repr_data(Object::stable(obj));
	let body = body(obj);
	if body.elems == 0 {
		return Err(ReprError::Empty { repr: NAME, op: "shift" });
	}
	let value = read_slot(body.slots, data.slot_type, body.start);
	body.start += 1;
	body.elems -= 1;
	Ok(value)
}

/// # Safety
/// `obj` must be a live array, a reference `value` must be live or null.
pub unsafe fn unshift(tc: &mut ThreadContext, obj: GcRef, value: Register) -> Result<(), ReprError> {
	let data = repr_data(Object::stable(obj));
	check_kind(data.slot_type, value, "unshift")?;
	let elem_size = data.elem_size;
	let body = body(obj);

	// Make room at the front in batches of eight.
	if body.start < 1 {
		let elems = body.elems;
		set_size(body, elems + 8, data)?;
		copy(body.slots, body.slots.add(8 * elem_size), elems * elem_size);
		write_bytes(body.slots, 0, 8 * elem_size);
		body.start = 8;
		body.elems = elems;
	}

	body.start -= 1;
	body.elems += 1;
	write_slot(tc, obj, body.slots, data.slot_type, body.start, value);
	Ok(())
}
