use crate::{
	align_size, collectable_kind, AllocationError, CollectableKind, GcPhase, GcRef, Object, STable,
	ALIGNMENT,
};
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use tracing::{debug, trace};

struct Page {
	start: *mut u8,
	alloc: *mut u8,
	limit: *mut u8,
	layout: Layout,
}

impl Page {
	fn new(item_size: usize, items: usize) -> Result<Page, AllocationError> {
		let size = item_size * items;
		let layout = Layout::from_size_align(size, ALIGNMENT)
			.map_err(|_| AllocationError::ObjectTooBig { size })?;
		let start = unsafe { alloc_zeroed(layout) };
		if start.is_null() {
			handle_alloc_error(layout);
		}

		Ok(Page {
			start,
			alloc: start,
			limit: unsafe { start.add(size) },
			layout,
		})
	}

	fn bump(&mut self, item_size: usize) -> Option<*mut u8> {
		if (self.limit as usize) - (self.alloc as usize) < item_size {
			return None;
		}

		let item = self.alloc;
		self.alloc = unsafe { self.alloc.add(item_size) };
		Some(item)
	}

	fn contains(&self, ptr: *const u8) -> bool {
		ptr >= self.start as *const u8 && ptr < self.alloc as *const u8
	}
}

/// A bin holds pages of equally sized items.
struct SizeClass {
	item_size: usize,
	pages: Vec<Page>,
}

struct Overflow {
	ptr: *mut u8,
	layout: Layout,
}

/// Allocator for the second generation.
///
/// The nursery collector only needs [`Gen2Allocator::allocate`]. Memory handed out here is never moved and never
/// freed before the allocator itself is dropped.
pub struct Gen2Allocator {
	bins: Vec<SizeClass>,
	overflows: Vec<Overflow>,
	page_items: usize,
	allocated_bytes: usize,
	objects: usize,
}

unsafe impl Send for Gen2Allocator {}

impl Gen2Allocator {
	/// Items up to `max_bin_size` bytes are bump allocated in pages of `page_items` items, anything bigger gets its
	/// own block.
	pub fn new(page_items: usize, max_bin_size: usize) -> Gen2Allocator {
		let bins = (1..=max_bin_size / ALIGNMENT)
			.map(|i| SizeClass {
				item_size: i * ALIGNMENT,
				pages: vec![],
			})
			.collect();

		Gen2Allocator {
			bins,
			overflows: vec![],
			page_items: page_items.max(1),
			allocated_bytes: 0,
			objects: 0,
		}
	}

	/// Returns zeroed, aligned memory for at least `size` bytes.
	pub fn allocate(&mut self, size: usize) -> Result<GcRef, AllocationError> {
		if size == 0 {
			return Err(AllocationError::ObjectTooSmall { size });
		}

		let size = align_size(size, ALIGNMENT);
		let bin = size / ALIGNMENT - 1;
		let ptr = if bin < self.bins.len() {
			let page_items = self.page_items;
			let class = &mut self.bins[bin];
			match class.pages.last_mut().and_then(|page| page.bump(size)) {
				Some(item) => item,
				None => {
					trace!(target: "gc", "New gen2 page for {} byte items", size);
					let mut page = Page::new(size, page_items)?;
					let item = page.start;
					page.alloc = unsafe { page.start.add(size) };
					class.pages.push(page);
					item
				}
			}
		} else {
			let layout = Layout::from_size_align(size, ALIGNMENT)
				.map_err(|_| AllocationError::ObjectTooBig { size })?;
			let ptr = unsafe { alloc_zeroed(layout) };
			if ptr.is_null() {
				handle_alloc_error(layout);
			}
			self.overflows.push(Overflow { ptr, layout });
			ptr
		};

		self.allocated_bytes += size;
		self.objects += 1;
		Ok(GcRef::from_ptr(ptr.cast()))
	}

	pub fn contains(&self, ptr: GcRef) -> bool {
		let ptr = ptr.cast::<u8>() as *const u8;
		self.bins
			.iter()
			.flat_map(|class| class.pages.iter())
			.any(|page| page.contains(ptr))
			|| self
				.overflows
				.iter()
				.any(|overflow| overflow.ptr as *const u8 == ptr)
	}

	/// Bytes handed out so far, rounded to the allocation granularity.
	pub fn allocated_bytes(&self) -> usize {
		self.allocated_bytes
	}

	pub fn objects(&self) -> usize {
		self.objects
	}

	/// Visits every item handed out so far. Items whose header was never written are skipped.
	pub fn walk(&self, mut visitor: impl FnMut(GcRef)) {
		for class in &self.bins {
			for page in &class.pages {
				let mut current = page.start;
				while current < page.alloc {
					let item = GcRef::from_ptr(current.cast());
					if unsafe { !item.flags().is_empty() } {
						visitor(item);
					}
					current = unsafe { current.add(class.item_size) };
				}
			}
		}
		for overflow in &self.overflows {
			let item = GcRef::from_ptr(overflow.ptr.cast());
			if unsafe { !item.flags().is_empty() } {
				visitor(item);
			}
		}
	}
}

impl Drop for Gen2Allocator {
	fn drop(&mut self) {
		if !std::thread::panicking() {
			debug!(target: "gc", "Tearing down gen2 with {} objects", self.objects);

			// Instances first, their finalizers may still need their STable.
			self.walk(|item| unsafe {
				if collectable_kind(item, GcPhase::Free) == CollectableKind::Instance {
					if let Some(free) = Object::stable(item).repr.gc_free {
						free(item.cast::<Object>());
					}
				}
			});
			self.walk(|item| unsafe {
				if collectable_kind(item, GcPhase::Free) == CollectableKind::STable {
					STable::from_ref_mut(item).release();
				}
			});
		}

		for class in &self.bins {
			for page in &class.pages {
				unsafe {
					dealloc(page.start, page.layout);
				}
			}
		}
		for overflow in &self.overflows {
			unsafe {
				dealloc(overflow.ptr, overflow.layout);
			}
		}
	}
}
