use crate::GcRef;

const WORKLIST_START_SIZE: usize = 128;

/// Addresses of slots that hold (possibly null) references and still need to be visited.
///
/// The worklist stores slots rather than objects because the collector has to rewrite the slot once the referent has
/// moved.
pub struct Worklist {
	items: Vec<*mut GcRef>,
	peak: usize,
	added: usize,
}

impl Worklist {
	pub fn new() -> Worklist {
		Worklist {
			items: Vec::with_capacity(WORKLIST_START_SIZE),
			peak: 0,
			added: 0,
		}
	}

	/// Queues a slot. The slot itself must stay valid until it has been drained, its contents may be null.
	pub fn add(&mut self, slot: *mut GcRef) {
		debug_assert!(!slot.is_null(), "Tried to add a null slot to the worklist");
		self.items.push(slot);
		self.added += 1;
		self.peak = self.peak.max(self.items.len());
	}

	pub fn get(&mut self) -> Option<*mut GcRef> {
		self.items.pop()
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// The largest number of pending slots seen at once.
	pub fn peak(&self) -> usize {
		self.peak
	}

	/// Total number of slots ever added.
	pub fn added(&self) -> usize {
		self.added
	}
}

impl Default for Worklist {
	fn default() -> Self {
		Worklist::new()
	}
}
