use crate::{
	align_size, collect, free_uncopied, AllocationError, Collectable, CollectableFlags, ConfigError, Frame, GCStatistics,
	Gen2Allocator, Gen2Roots, GcConfig, GcRef, Nursery, Object, ReprOps, RootId, RootSet, STable, ALIGNMENT,
	OBJECT_SIZE, STABLE_SIZE,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by every thread of one VM.
pub struct Instance {
	config: GcConfig,
	gen2: Mutex<Gen2Allocator>,
	permanents: Mutex<Vec<GcRef>>,
}

impl Instance {
	pub fn new(config: GcConfig) -> Result<Arc<Instance>, ConfigError> {
		config.validate()?;
		Ok(Arc::new(Instance {
			config,
			gen2: Mutex::new(Gen2Allocator::new(config.gen2_page_items, config.gen2_max_bin_size)),
			permanents: Mutex::new(vec![]),
		}))
	}

	pub fn config(&self) -> &GcConfig {
		&self.config
	}

	/// Roots `obj` for the lifetime of the instance, or until [`Instance::remove_permanent`].
	pub fn add_permanent(&self, obj: GcRef) -> RootId {
		let mut permanents = self.permanents.lock();
		permanents.push(obj);
		permanents.len() - 1
	}

	/// The current location of a permanent root. Collections move young roots, so never cache the result across an
	/// allocation.
	pub fn permanent(&self, id: RootId) -> GcRef {
		self.permanents.lock()[id]
	}

	pub fn remove_permanent(&self, id: RootId) {
		self.permanents.lock()[id] = GcRef::NULL;
	}

	pub fn gen2_objects(&self) -> usize {
		self.gen2.lock().objects()
	}

	pub fn gen2_allocated_bytes(&self) -> usize {
		self.gen2.lock().allocated_bytes()
	}

	pub fn in_gen2(&self, obj: GcRef) -> bool {
		self.gen2.lock().contains(obj)
	}
}

/// Per thread allocation and collection state.
///
/// A thread context may be moved to another thread but never shared.
pub struct ThreadContext {
	instance: Arc<Instance>,
	nursery: Nursery,
	temps: Vec<GcRef>,
	gen2_roots: Gen2Roots,
	frames: Vec<Frame>,
	cycles: usize,
}

impl ThreadContext {
	pub fn new(instance: Arc<Instance>) -> Result<ThreadContext, AllocationError> {
		let nursery = Nursery::new(instance.config.nursery_size)?;
		Ok(ThreadContext {
			instance,
			nursery,
			temps: vec![],
			gen2_roots: Gen2Roots::new(),
			frames: vec![],
			cycles: 0,
		})
	}

	pub fn instance(&self) -> &Arc<Instance> {
		&self.instance
	}

	pub fn nursery(&self) -> &Nursery {
		&self.nursery
	}

	/// Number of collections this thread has run.
	pub fn cycles(&self) -> usize {
		self.cycles
	}

	/// Allocates `size` zeroed bytes and writes a fresh header with `flags` at the start.
	///
	/// Runs a collection when the nursery is full, so every reference the caller still needs must be rooted. Objects
	/// that don't fit even an empty nursery go straight to the second generation.
	pub fn allocate(&mut self, size: usize, flags: CollectableFlags) -> Result<GcRef, AllocationError> {
		if size < std::mem::size_of::<Collectable>() {
			return Err(AllocationError::ObjectTooSmall { size });
		}
		let size = align_size(size, ALIGNMENT);

		let item = match self.nursery.try_bump(size) {
			Some(item) => item,
			None if size > self.nursery.size() => return self.allocate_gen2(size, flags),
			None => {
				self.run_gc();
				match self.nursery.try_bump(size) {
					Some(item) => item,
					None => return self.allocate_gen2(size, flags),
				}
			}
		};

		unsafe {
			item.cast::<Collectable>().write(Collectable::new(flags));
		}
		Ok(item)
	}

	fn allocate_gen2(&mut self, size: usize, flags: CollectableFlags) -> Result<GcRef, AllocationError> {
		debug!(target: "gc", "Allocating {} bytes directly in gen2", size);
		let item = self.instance.gen2.lock().allocate(size)?;
		unsafe {
			item.cast::<Collectable>()
				.write(Collectable::new(flags | CollectableFlags::SECOND_GEN));
		}
		Ok(item)
	}

	/// Allocates while keeping `root` alive and up to date, returning the new item and the root's new location.
	fn allocate_rooted(
		&mut self,
		size: usize,
		flags: CollectableFlags,
		root: GcRef,
	) -> Result<(GcRef, GcRef), AllocationError> {
		let id = self.push_temp(root);
		let item = self.allocate(size, flags);
		let root = self.temp(id);
		self.pop_temps(1);
		Ok((item?, root))
	}

	pub fn allocate_stable(&mut self, repr: &'static ReprOps, how: GcRef) -> Result<GcRef, AllocationError> {
		let (st, how) = self.allocate_rooted(STABLE_SIZE, CollectableFlags::STABLE, how)?;
		unsafe {
			let flags = st.flags();
			st.cast::<STable>().write(STable::new(flags, repr, how));
			self.write_barrier(st, how);
		}
		Ok(st)
	}

	pub fn allocate_type_object(&mut self, st: GcRef) -> Result<GcRef, AllocationError> {
		let (obj, st) = self.allocate_rooted(OBJECT_SIZE, CollectableFlags::TYPE_OBJECT, st)?;
		unsafe {
			let flags = obj.flags();
			obj.cast::<Object>().write(Object::new(flags, st));
			self.write_barrier(obj, st);
		}
		Ok(obj)
	}

	/// Allocates an instance of `st`, sized by the STable's composed size. The body is zeroed.
	pub fn allocate_object(&mut self, st: GcRef) -> Result<GcRef, AllocationError> {
		let size = unsafe { STable::from_ref(st).size };
		let (obj, st) = self.allocate_rooted(size, CollectableFlags::INSTANCE, st)?;
		unsafe {
			let flags = obj.flags();
			obj.cast::<Object>().write(Object::new(flags, st));
			self.write_barrier(obj, st);
		}
		Ok(obj)
	}

	/// Creates a new type: an STable for `repr` plus its type object. Returns the type object.
	pub fn allocate_type(&mut self, repr: &'static ReprOps, how: GcRef) -> Result<GcRef, AllocationError> {
		let st = self.allocate_stable(repr, how)?;
		let (what, st) = {
			let id = self.push_temp(st);
			let what = self.allocate_type_object(st);
			let st = self.temp(id);
			self.pop_temps(1);
			(what?, st)
		};

		unsafe {
			let stable = STable::from_ref_mut(st);
			stable.compose();
			self.assign_ref(st, &mut stable.what, what);
		}
		Ok(what)
	}

	pub fn push_temp(&mut self, obj: GcRef) -> RootId {
		self.temps.push(obj);
		self.temps.len() - 1
	}

	pub fn temp(&self, id: RootId) -> GcRef {
		self.temps[id]
	}

	pub fn set_temp(&mut self, id: RootId, obj: GcRef) {
		self.temps[id] = obj;
	}

	pub fn pop_temps(&mut self, count: usize) {
		let len = self.temps.len().saturating_sub(count);
		self.temps.truncate(len);
	}

	pub fn temps(&self) -> usize {
		self.temps.len()
	}

	pub fn push_frame(&mut self, frame: Frame) {
		self.frames.push(frame);
	}

	pub fn pop_frame(&mut self) -> Option<Frame> {
		self.frames.pop()
	}

	pub fn frame(&self) -> Option<&Frame> {
		self.frames.last()
	}

	pub fn frame_mut(&mut self) -> Option<&mut Frame> {
		self.frames.last_mut()
	}

	pub fn gen2_roots(&self) -> &Gen2Roots {
		&self.gen2_roots
	}

	/// Must be called whenever `referent` is stored into `owner`.
	///
	/// # Safety
	/// Both references must be null or point at live collectables.
	pub unsafe fn write_barrier(&mut self, owner: GcRef, referent: GcRef) {
		if owner.is_second_gen() && !referent.is_null() && !referent.is_second_gen() {
			self.gen2_roots.add(owner);
		}
	}

	/// Stores `value` into a reference slot of `owner`, running the write barrier.
	///
	/// # Safety
	/// `slot` must be a reference slot inside `owner`, or owned by it, and both must be live.
	pub unsafe fn assign_ref(&mut self, owner: GcRef, slot: *mut GcRef, value: GcRef) {
		self.write_barrier(owner, value);
		*slot = value;
	}

	/// Collects this thread's nursery and finalizes what didn't survive.
	pub fn run_gc(&mut self) -> GCStatistics {
		let instance = self.instance.clone();
		let mut gen2 = instance.gen2.lock();
		let mut permanents = instance.permanents.lock();

		let limit = self.nursery.high_water();
		debug!(target: "gc", "Starting nursery collection {} with {} bytes in use", self.cycles, self.nursery.used());

		let mut stats = unsafe {
			collect(
				&mut self.nursery,
				&mut gen2,
				RootSet {
					permanents: &mut permanents,
					temps: &mut self.temps,
					gen2: &mut self.gen2_roots,
					frames: &mut self.frames,
				},
			)
		};
		stats.sweep = unsafe { free_uncopied(self.nursery.fromspace(), limit, self.nursery.size()) };
		self.cycles += 1;
		stats
	}
}

impl Drop for ThreadContext {
	fn drop(&mut self) {
		if std::thread::panicking() {
			return;
		}

		// Two cycles move anything still reachable from shared roots into gen2 and finalize the rest.
		self.temps.clear();
		self.frames.clear();
		self.run_gc();
		let stats = self.run_gc();
		info!(
			target: "gc",
			"Thread finished after {} collections, {} objects finalized in the last one",
			self.cycles, stats.sweep.finalized
		);
	}
}
