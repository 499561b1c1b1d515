pub const fn align_size(bytes: usize, byte_alignment: usize) -> usize {
	let remainder = bytes % byte_alignment;
	if remainder == 0 {
		bytes // Already aligned
	} else {
		bytes + byte_alignment - remainder
	}
}

pub fn is_aligned(ptr: *const u8, byte_alignment: usize) -> bool {
	(ptr as usize) % byte_alignment == 0
}
