use crate::{align_size, Object, STable, Worklist, ALIGNMENT, OBJECT_SIZE};

pub type ReprId = u32;

/// Total instance size in bytes, header included.
pub type SizeFn = fn(st: &STable) -> usize;
/// Adds every reference slot inside `body` to the worklist.
pub type MarkFn = unsafe fn(st: &STable, body: *mut u8, worklist: &mut Worklist);
/// Adds the references owned by the representation data shared by all instances of a type.
pub type MarkReprDataFn = unsafe fn(st: &mut STable, worklist: &mut Worklist);
/// Releases the non-heap resources of a dead instance.
pub type FreeFn = unsafe fn(obj: *mut Object);
/// Releases the representation data of a type.
pub type FreeReprDataFn = unsafe fn(st: &mut STable);

/// The capability table a representation hands to the collector.
///
/// Every callback is optional; a missing one means no work is needed. Callbacks run in the middle of a collection and
/// must not allocate, block or start another collection.
pub struct ReprOps {
	pub name: &'static str,
	pub id: ReprId,
	pub size: Option<SizeFn>,
	pub gc_mark: Option<MarkFn>,
	pub gc_mark_repr_data: Option<MarkReprDataFn>,
	pub gc_free: Option<FreeFn>,
	pub gc_free_repr_data: Option<FreeReprDataFn>,
}

impl ReprOps {
	pub const fn new(name: &'static str, id: ReprId) -> ReprOps {
		ReprOps {
			name,
			id,
			size: None,
			gc_mark: None,
			gc_mark_repr_data: None,
			gc_free: None,
			gc_free_repr_data: None,
		}
	}

	/// The aligned size an instance of `st` occupies. Representations without a `size` callback have an empty body.
	pub fn instance_size(&self, st: &STable) -> usize {
		let size = match self.size {
			Some(size) => size(st),
			None => OBJECT_SIZE,
		};
		debug_assert!(size >= OBJECT_SIZE, "{} reported a size smaller than the object header", self.name);
		align_size(size, ALIGNMENT)
	}
}
