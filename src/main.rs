use eyre::{ensure, WrapErr};
use gvm_gc::{GcConfig, GcRef, Instance, Object, ThreadContext};
use gvm_repr::vm_array::{self, Register, SlotType};
use gvm_repr::{p6int, vm_string};
use tracing::info;

const ROUNDS: usize = 200_000;
/// Boxes kept alive at the end of the ring, everything older is garbage.
const KEEP: usize = 64;

fn main() -> eyre::Result<()> {
	gvm_core::init();
	let config = GcConfig::from_env().wrap_err("Invalid collector configuration")?;
	let instance = Instance::new(config)?;
	let mut tc = ThreadContext::new(instance.clone())?;
	info!(
		"Nursery of {} bytes, gen2 pages of {} items",
		config.nursery_size, config.gen2_page_items
	);

	let int_type = p6int::type_object_for(&mut tc, GcRef::NULL)?;
	let int_id = tc.push_temp(int_type);
	let str_type = vm_string::type_object_for(&mut tc, GcRef::NULL)?;
	let str_id = tc.push_temp(str_type);
	let array_type = vm_array::type_object_for(&mut tc, GcRef::NULL, SlotType::Obj)?;
	let ring = unsafe { vm_array::allocate(&mut tc, Object::st(array_type))? };
	let ring_id = tc.push_temp(ring);

	for round in 0..ROUNDS {
		unsafe {
			let int_st = Object::st(tc.temp(int_id));
			let boxed = p6int::boxed(&mut tc, int_st, round as i64)?;
			let ring = tc.temp(ring_id);
			vm_array::push(&mut tc, ring, Register::Obj(boxed))?;
			if vm_array::elems(ring) > KEEP {
				vm_array::shift(ring)?;
			}

			let str_st = Object::st(tc.temp(str_id));
			vm_string::new(&mut tc, str_st, &format!("round {round}"))?;
		}
	}

	let ring = tc.temp(ring_id);
	for (i, expected) in (ROUNDS - KEEP..ROUNDS).enumerate() {
		let value = match unsafe { vm_array::at_pos(ring, i as i64)? } {
			Register::Obj(boxed) => unsafe { p6int::get_int(boxed) },
			other => eyre::bail!("Ring slot {i} holds {other:?}"),
		};
		ensure!(value == expected as i64, "Ring slot {i} holds {value}, expected {expected}");
	}

	let stats = tc.run_gc();
	info!(
		"{} collections, last one copied {} and promoted {}, {} remembered",
		tc.cycles(),
		stats.copied,
		stats.promoted,
		stats.remembered
	);

	tc.pop_temps(3);
	drop(tc);
	info!(
		"{} objects ({} bytes) left in gen2",
		instance.gen2_objects(),
		instance.gen2_allocated_bytes()
	);
	Ok(())
}
