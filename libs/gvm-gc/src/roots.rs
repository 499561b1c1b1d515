use crate::{mark_collectable, GcRef, Worklist};
use ahash::HashSet;
use tracing::trace;

pub type RootId = usize;

/// One activation record of the interpreter. Only its reference registers matter to the collector.
#[derive(Debug, Default)]
pub struct Frame {
	/// Working registers.
	pub work: Vec<GcRef>,
	/// Lexical variables.
	pub lexicals: Vec<GcRef>,
}

impl Frame {
	pub fn new(work: usize, lexicals: usize) -> Frame {
		Frame {
			work: vec![GcRef::NULL; work],
			lexicals: vec![GcRef::NULL; lexicals],
		}
	}
}

/// Old objects that may point into the nursery.
#[derive(Default)]
pub struct Gen2Roots {
	roots: Vec<GcRef>,
	seen: HashSet<GcRef>,
}

impl Gen2Roots {
	pub fn new() -> Gen2Roots {
		Gen2Roots::default()
	}

	/// Remembers an old object. Adding the same object twice is a no-op.
	pub fn add(&mut self, obj: GcRef) {
		if self.seen.insert(obj) {
			self.roots.push(obj);
		}
	}

	pub fn contains(&self, obj: GcRef) -> bool {
		self.seen.contains(&obj)
	}

	pub fn len(&self) -> usize {
		self.roots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.roots.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = GcRef> + '_ {
		self.roots.iter().copied()
	}

	pub fn retain(&mut self, mut keep: impl FnMut(GcRef) -> bool) {
		let seen = &mut self.seen;
		self.roots.retain(|obj| {
			let keep = keep(*obj);
			if !keep {
				seen.remove(obj);
			}
			keep
		});
	}
}

/// Every root source of one thread's collection.
pub struct RootSet<'a> {
	/// Instance wide roots, shared by all threads.
	pub permanents: &'a mut [GcRef],
	/// Short lived roots kept across allocations.
	pub temps: &'a mut [GcRef],
	pub gen2: &'a mut Gen2Roots,
	/// The call stack, innermost frame last.
	pub frames: &'a mut [Frame],
}

pub fn add_permanents_to_worklist(worklist: &mut Worklist, permanents: &mut [GcRef]) {
	for slot in permanents {
		worklist.add(slot);
	}
}

pub fn add_temps_to_worklist(worklist: &mut Worklist, temps: &mut [GcRef]) {
	for slot in temps {
		worklist.add(slot);
	}
}

/// Old objects are never copied, only the references they hold are.
///
/// # Safety
/// Every remembered object must still be a live second generation collectable.
pub unsafe fn add_gen2_roots_to_worklist(worklist: &mut Worklist, gen2: &Gen2Roots) {
	for obj in gen2.iter() {
		mark_collectable(obj, worklist);
	}
}

/// Visits the current frame first, then its callers.
pub fn add_frames_to_worklist(worklist: &mut Worklist, frames: &mut [Frame]) {
	for frame in frames.iter_mut().rev() {
		for slot in &mut frame.work {
			worklist.add(slot);
		}
		for slot in &mut frame.lexicals {
			worklist.add(slot);
		}
	}
}

/// Whether any reference held directly by `obj` points at a young object.
///
/// # Safety
/// `obj` and everything it references must be live.
pub unsafe fn references_young(obj: GcRef) -> bool {
	let mut children = Worklist::new();
	mark_collectable(obj, &mut children);
	while let Some(slot) = children.get() {
		let child = *slot;
		if !child.is_null() && !child.is_second_gen() {
			trace!(target: "gc", "{:?} still references young {:?}", obj, child);
			return true;
		}
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Collectable;

	fn fake(addr: usize) -> GcRef {
		GcRef::from_ptr(addr as *mut Collectable)
	}

	#[test]
	fn gen2_roots_deduplicate() {
		let mut roots = Gen2Roots::new();
		roots.add(fake(0x100));
		roots.add(fake(0x200));
		roots.add(fake(0x100));
		assert_eq!(roots.len(), 2);
		assert!(roots.contains(fake(0x200)));

		roots.retain(|obj| obj != fake(0x100));
		assert_eq!(roots.len(), 1);
		assert!(!roots.contains(fake(0x100)));

		// Dropped entries can be remembered again.
		roots.add(fake(0x100));
		assert_eq!(roots.iter().collect::<Vec<_>>(), vec![fake(0x200), fake(0x100)]);
	}

	#[test]
	fn innermost_frame_is_visited_first() {
		let mut frames = vec![Frame::new(1, 0), Frame::new(2, 1)];
		frames[0].work[0] = fake(0x10);
		frames[1].work[0] = fake(0x20);
		frames[1].work[1] = fake(0x30);
		frames[1].lexicals[0] = fake(0x40);

		let mut worklist = Worklist::new();
		add_frames_to_worklist(&mut worklist, &mut frames);
		assert_eq!(worklist.len(), 4);

		// The worklist pops in reverse, so the caller's register comes out first.
		let order: Vec<GcRef> = std::iter::from_fn(|| worklist.get())
			.map(|slot| unsafe { *slot })
			.collect();
		assert_eq!(order, vec![fake(0x10), fake(0x40), fake(0x30), fake(0x20)]);
	}
}
