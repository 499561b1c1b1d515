use bitflags::bitflags;
use std::fmt::{Debug, Formatter};
use std::ptr::null_mut;

bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
	pub struct CollectableFlags: u32 {
		/// An ordinary object instance.
		const INSTANCE = 1 << 0;
		/// A type object, header and STable reference only.
		const TYPE_OBJECT = 1 << 1;
		/// A type descriptor.
		const STABLE = 1 << 2;
		/// A serialization context.
		const SC = 1 << 3;
		/// Survived one nursery collection already; the next survival promotes it.
		const NURSERY_SEEN = 1 << 4;
		/// Lives in the second generation and is never moved by the nursery collector.
		const SECOND_GEN = 1 << 5;

		const KIND = Self::INSTANCE.bits() | Self::TYPE_OBJECT.bits() | Self::STABLE.bits() | Self::SC.bits();
		const STATE = Self::NURSERY_SEEN.bits() | Self::SECOND_GEN.bits();
	}
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CollectableKind {
	Instance,
	TypeObject,
	STable,
	SerializationContext,
}

impl CollectableFlags {
	/// Classifies a header. Exactly one kind bit and no unknown bits may be set.
	pub fn kind(self) -> Option<CollectableKind> {
		if self.bits() & !Self::all().bits() != 0 {
			return None;
		}

		let kind = self.intersection(Self::KIND);
		if kind == Self::INSTANCE {
			Some(CollectableKind::Instance)
		} else if kind == Self::TYPE_OBJECT {
			Some(CollectableKind::TypeObject)
		} else if kind == Self::STABLE {
			Some(CollectableKind::STable)
		} else if kind == Self::SC {
			Some(CollectableKind::SerializationContext)
		} else {
			None
		}
	}
}

/// The common prefix of everything the collector manages.
#[repr(C)]
pub struct Collectable {
	pub flags: CollectableFlags,
	/// The forwarding pointer is used in garbage collection to point old object references to their new location.
	/// It is only ever set on the abandoned original.
	pub forwarder: GcRef,
	/// Owning serialization context.
	pub sc: GcRef,
}

impl Collectable {
	pub fn new(flags: CollectableFlags) -> Collectable {
		Collectable {
			flags,
			forwarder: GcRef::NULL,
			sc: GcRef::NULL,
		}
	}
}

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct GcRef(*mut Collectable);

impl GcRef {
	pub const NULL: GcRef = GcRef(null_mut());

	pub const fn from_ptr(ptr: *mut Collectable) -> GcRef {
		GcRef(ptr)
	}

	pub fn as_ptr(self) -> *mut Collectable {
		self.0
	}

	pub fn cast<T>(self) -> *mut T {
		self.0.cast()
	}

	pub fn addr(self) -> usize {
		self.0 as usize
	}

	pub fn is_null(self) -> bool {
		self.0.is_null()
	}

	/// # Safety
	/// The reference must be non-null and point at a live collectable.
	pub unsafe fn header<'a>(self) -> &'a Collectable {
		&*self.0
	}

	/// # Safety
	/// The reference must be non-null and point at a live collectable, and nothing else may hold a borrow of it.
	pub unsafe fn header_mut<'a>(self) -> &'a mut Collectable {
		&mut *self.0
	}

	/// # Safety
	/// See [`GcRef::header`].
	pub unsafe fn flags(self) -> CollectableFlags {
		(*self.0).flags
	}

	/// Null references are never considered old.
	///
	/// # Safety
	/// See [`GcRef::header`].
	pub unsafe fn is_second_gen(self) -> bool {
		!self.is_null() && self.flags().contains(CollectableFlags::SECOND_GEN)
	}
}

unsafe impl Send for GcRef {}

unsafe impl Sync for GcRef {}

impl Default for GcRef {
	fn default() -> Self {
		GcRef::NULL
	}
}

impl Debug for GcRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}", self.0)
	}
}
