use crate::{collectable_kind, collectable_size, fatal, CollectableKind, GcFatal, GcPhase, GcRef, Object, STable};
use std::ptr::write_bytes;
use tracing::{debug, trace};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepStatistics {
	/// Collectables stepped over, dead or alive.
	pub walked: usize,
	/// Bytes stepped over. Always equals the high-water mark of the swept space.
	pub walked_bytes: usize,
	/// Collectables that were not copied.
	pub dead: usize,
	/// Dead instances whose `gc_free` ran.
	pub finalized: usize,
	/// Dead STables released after the walk.
	pub stables_freed: usize,
}

/// Finalizes everything in the abandoned space that was not copied, then zeroes the whole space.
///
/// Copied originals are recognized by their forwarder. The walk steps by the exact size of every collectable, dead
/// or alive, so a sizing mismatch would misread the next header.
///
/// # Safety
/// `fromspace..limit` must be densely packed collectables that the last collection left behind, and `size` must be
/// the full length of the space.
pub unsafe fn free_uncopied(fromspace: *mut u8, limit: *mut u8, size: usize) -> SweepStatistics {
	let mut stats = SweepStatistics::default();
	// Instances later in the space may still need to read their STable's size.
	let mut dead_stables = vec![];

	let mut scan = fromspace;
	while scan < limit {
		let item = GcRef::from_ptr(scan.cast());
		let item_size = collectable_size(item, GcPhase::Free);
		let dead = item.header().forwarder.is_null();

		stats.walked += 1;
		stats.walked_bytes += item_size;
		if dead {
			stats.dead += 1;
		}

		match collectable_kind(item, GcPhase::Free) {
			CollectableKind::Instance => {
				if dead {
					let st = Object::stable(item);
					if let Some(free) = st.repr.gc_free {
						trace!(target: "gc", "Finalizing dead {} at {:?}", st.repr.name, item);
						free(item.cast::<Object>());
						stats.finalized += 1;
					}
				}
			}
			// Type objects own nothing, their representation data lives on the STable.
			CollectableKind::TypeObject => {}
			CollectableKind::STable => {
				if dead {
					dead_stables.push(item);
				}
			}
			CollectableKind::SerializationContext => {
				fatal(GcFatal::UnsupportedKind {
					phase: GcPhase::Free,
				})
			}
		}

		scan = scan.add(item_size);
	}

	for st in dead_stables {
		STable::from_ref_mut(st).release();
		stats.stables_freed += 1;
	}

	write_bytes(fromspace, 0, size);
	debug!(
		target: "gc",
		"Swept {} collectables ({} bytes), {} dead, {} finalized",
		stats.walked, stats.walked_bytes, stats.dead, stats.finalized
	);
	stats
}
