use crate::{
	add_frames_to_worklist, add_gen2_roots_to_worklist, add_permanents_to_worklist, add_temps_to_worklist,
	collectable_kind, collectable_size, fatal, references_young, AllocationError, CollectableFlags, CollectableKind,
	Gen2Allocator, GcFatal, GcPhase, GcRef, Object, RootSet, STable, SweepStatistics, Worklist, ALIGNMENT,
};
use gvm_core::is_aligned;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::{addr_of_mut, copy_nonoverlapping};
use tracing::{debug, trace};

/// The two semi-spaces of one thread.
///
/// New objects are bump allocated into tospace. A collection swaps the roles, evacuates the survivors of the old
/// tospace into the new one, and leaves everything else behind for the sweep.
pub struct Nursery {
	fromspace: *mut u8,
	tospace: *mut u8,
	alloc: *mut u8,
	limit: *mut u8,
	size: usize,
	layout: Layout,
}

unsafe impl Send for Nursery {}

impl Nursery {
	pub fn new(size: usize) -> Result<Nursery, AllocationError> {
		let layout =
			Layout::from_size_align(size, ALIGNMENT).map_err(|_| AllocationError::ObjectTooBig { size })?;
		let fromspace = Self::space(layout);
		let tospace = Self::space(layout);

		Ok(Nursery {
			fromspace,
			tospace,
			alloc: tospace,
			limit: unsafe { tospace.add(size) },
			size,
			layout,
		})
	}

	fn space(layout: Layout) -> *mut u8 {
		let space = unsafe { alloc_zeroed(layout) };
		if space.is_null() {
			handle_alloc_error(layout);
		}
		space
	}

	/// Bumps `size` bytes out of tospace. The memory is zeroed.
	pub fn try_bump(&mut self, size: usize) -> Option<GcRef> {
		debug_assert_eq!(size % ALIGNMENT, 0);
		debug_assert!(is_aligned(self.alloc, ALIGNMENT));
		if (self.limit as usize) - (self.alloc as usize) < size {
			return None;
		}

		let item = self.alloc;
		self.alloc = unsafe { self.alloc.add(size) };
		Some(GcRef::from_ptr(item.cast()))
	}

	pub fn in_tospace(&self, obj: GcRef) -> bool {
		let ptr = obj.cast::<u8>();
		ptr >= self.tospace && ptr < self.limit
	}

	pub fn in_fromspace(&self, obj: GcRef) -> bool {
		let ptr = obj.cast::<u8>();
		ptr >= self.fromspace && ptr < unsafe { self.fromspace.add(self.size) }
	}

	/// The current bump pointer. Everything below it in tospace is a collectable.
	pub fn high_water(&self) -> *mut u8 {
		self.alloc
	}

	pub fn used(&self) -> usize {
		self.alloc as usize - self.tospace as usize
	}

	pub fn size(&self) -> usize {
		self.size
	}

	pub fn fromspace(&self) -> *mut u8 {
		self.fromspace
	}

	pub fn tospace(&self) -> *mut u8 {
		self.tospace
	}

	fn swap(&mut self) {
		std::mem::swap(&mut self.fromspace, &mut self.tospace);
		self.alloc = self.tospace;
		self.limit = unsafe { self.tospace.add(self.size) };
	}
}

impl Drop for Nursery {
	fn drop(&mut self) {
		unsafe {
			dealloc(self.fromspace, self.layout);
			dealloc(self.tospace, self.layout);
		}
	}
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GCStatistics {
	/// Survivors copied into tospace.
	pub copied: usize,
	pub copied_bytes: usize,
	/// Survivors moved into the second generation.
	pub promoted: usize,
	pub promoted_bytes: usize,
	/// The most slots the worklist held at once.
	pub peak_worklist: usize,
	/// Old objects still remembered after the collection.
	pub remembered: usize,
	pub sweep: SweepStatistics,
}

/// Queues every reference slot `item` holds: its serialization context, then its children by kind.
///
/// # Safety
/// `item` must be a readable collectable, and for instances and type objects the STable it points at must be
/// readable too.
pub unsafe fn mark_collectable(item: GcRef, worklist: &mut Worklist) {
	worklist.add(addr_of_mut!((*item.as_ptr()).sc));

	match collectable_kind(item, GcPhase::Copy) {
		CollectableKind::Instance => {
			worklist.add(addr_of_mut!((*item.cast::<Object>()).st));
			let st = Object::stable(item);
			if let Some(mark) = st.repr.gc_mark {
				mark(st, Object::body(item), worklist);
			}
		}
		CollectableKind::TypeObject => {
			worklist.add(addr_of_mut!((*item.cast::<Object>()).st));
		}
		CollectableKind::STable => {
			let st = STable::from_ref_mut(item);
			st.visit_slots(|slot| worklist.add(slot));
			if let Some(mark_repr_data) = st.repr.gc_mark_repr_data {
				mark_repr_data(st, worklist);
			}
		}
		CollectableKind::SerializationContext => fatal(GcFatal::UnsupportedKind {
			phase: GcPhase::Copy,
		}),
	}
}

struct Collection<'a> {
	nursery: &'a mut Nursery,
	gen2: &'a mut Gen2Allocator,
	worklist: Worklist,
	promoted: Vec<GcRef>,
	stats: GCStatistics,
}

impl<'a> Collection<'a> {
	/// Drains the worklist completely, evacuating everything reachable from it.
	unsafe fn process(&mut self) {
		while let Some(slot) = self.worklist.get() {
			let item = *slot;
			if item.is_null() {
				continue;
			}

			// Old objects, copies made this cycle and other threads' objects all live outside fromspace. Checking the
			// address first means a foreign header is never read.
			if !self.nursery.in_fromspace(item) || item.is_second_gen() {
				continue;
			}

			let forwarder = item.header().forwarder;
			if !forwarder.is_null() {
				*slot = forwarder;
				continue;
			}

			let size = collectable_size(item, GcPhase::Copy);
			let copy = if item.flags().contains(CollectableFlags::NURSERY_SEEN) {
				self.promote(item, size)
			} else {
				self.evacuate(item, size)
			};

			item.header_mut().forwarder = copy;
			*slot = copy;
			mark_collectable(copy, &mut self.worklist);
		}
	}

	unsafe fn promote(&mut self, item: GcRef, size: usize) -> GcRef {
		let copy = match self.gen2.allocate(size) {
			Ok(copy) => copy,
			Err(source) => fatal(GcFatal::Promotion { size, source }),
		};
		copy_nonoverlapping(item.cast::<u8>(), copy.cast::<u8>(), size);

		let flags = &mut copy.header_mut().flags;
		flags.remove(CollectableFlags::NURSERY_SEEN);
		flags.insert(CollectableFlags::SECOND_GEN);

		trace!(target: "gc", "Promoted {:?} to {:?} ({} bytes)", item, copy, size);
		self.promoted.push(copy);
		self.stats.promoted += 1;
		self.stats.promoted_bytes += size;
		copy
	}

	unsafe fn evacuate(&mut self, item: GcRef, size: usize) -> GcRef {
		let copy = match self.nursery.try_bump(size) {
			Some(copy) => copy,
			None => fatal(GcFatal::TospaceOverflow { size }),
		};
		copy_nonoverlapping(item.cast::<u8>(), copy.cast::<u8>(), size);
		copy.header_mut().flags.insert(CollectableFlags::NURSERY_SEEN);

		trace!(target: "gc", "Copied {:?} to {:?} ({} bytes)", item, copy, size);
		self.stats.copied += 1;
		self.stats.copied_bytes += size;
		copy
	}
}

/// Runs one nursery collection.
///
/// Afterwards every root and every reference reachable from them points at tospace or the second generation. The
/// old tospace becomes fromspace and still holds the dead objects; [`crate::free_uncopied`] has to run over it
/// before the next collection.
///
/// # Safety
/// Every non-null root must reference a readable collectable, and the roots must be the only references into this
/// nursery that outlive the collection.
pub unsafe fn collect(nursery: &mut Nursery, gen2: &mut Gen2Allocator, roots: RootSet<'_>) -> GCStatistics {
	nursery.swap();

	let mut collection = Collection {
		nursery,
		gen2,
		worklist: Worklist::new(),
		promoted: vec![],
		stats: GCStatistics::default(),
	};

	// Each batch is drained before the next one is queued, this keeps the worklist small.
	debug!(target: "gc", "Marking {} permanent roots", roots.permanents.len());
	add_permanents_to_worklist(&mut collection.worklist, roots.permanents);
	collection.process();

	debug!(target: "gc", "Marking {} temporary roots", roots.temps.len());
	add_temps_to_worklist(&mut collection.worklist, roots.temps);
	collection.process();

	debug!(target: "gc", "Marking {} gen2 roots", roots.gen2.len());
	add_gen2_roots_to_worklist(&mut collection.worklist, roots.gen2);
	collection.process();

	debug!(target: "gc", "Marking {} frames", roots.frames.len());
	add_frames_to_worklist(&mut collection.worklist, roots.frames);
	collection.process();

	let Collection {
		worklist,
		promoted,
		mut stats,
		..
	} = collection;
	stats.peak_worklist = worklist.peak();
	drop(worklist);

	// Promotion can leave an old object pointing at a child that only got copied.
	for obj in promoted {
		if references_young(obj) {
			roots.gen2.add(obj);
		}
	}
	roots.gen2.retain(|obj| references_young(obj));
	stats.remembered = roots.gen2.len();

	debug!(
		target: "gc",
		"Copied {} ({} bytes), promoted {} ({} bytes), peak worklist {}",
		stats.copied, stats.copied_bytes, stats.promoted, stats.promoted_bytes, stats.peak_worklist
	);
	stats
}
