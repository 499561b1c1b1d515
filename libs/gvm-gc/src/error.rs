use std::fmt::{Display, Formatter};
use thiserror::Error;
use tracing::error;

/// Which part of a collection detected a heap inconsistency.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GcPhase {
	Copy,
	Free,
}

impl Display for GcPhase {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			GcPhase::Copy => f.write_str("copy"),
			GcPhase::Free => f.write_str("free"),
		}
	}
}

/// Heap integrity violations. None of these are recoverable.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum GcFatal {
	#[error("can't handle serialization contexts in the GC yet (during {phase})")]
	UnsupportedKind { phase: GcPhase },
	#[error("impossible collectable flags {flags:#x} encountered during {phase}")]
	CorruptFlags { flags: u32, phase: GcPhase },
	#[error("tospace has no room for a {size} byte survivor")]
	TospaceOverflow { size: usize },
	#[error("could not promote {size} bytes into the second generation: {source}")]
	Promotion {
		size: usize,
		source: AllocationError,
	},
}

/// Aborts the collection. There is no local recovery from a corrupted heap.
#[cold]
#[inline(never)]
pub fn fatal(err: GcFatal) -> ! {
	error!(target: "gc", "Internal error: {err}");
	panic!("Internal error: {err}")
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AllocationError {
	#[error("Object of {size} bytes is too big to be allocated")]
	ObjectTooBig { size: usize },
	#[error("Object of {size} bytes is smaller than its header")]
	ObjectTooSmall { size: usize },
}
