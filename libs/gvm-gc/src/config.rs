use crate::{ALIGNMENT, STABLE_SIZE};
use thiserror::Error;

pub const NURSERY_SIZE_ENV: &str = "GVM_NURSERY_SIZE";
pub const GEN2_PAGE_ITEMS_ENV: &str = "GVM_GEN2_PAGE_ITEMS";

const DEFAULT_NURSERY_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_GEN2_PAGE_ITEMS: usize = 256;
const DEFAULT_GEN2_MAX_BIN_SIZE: usize = 256;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ConfigError {
	#[error("nursery size {size} must be a non-zero multiple of {ALIGNMENT}")]
	UnalignedNursery { size: usize },
	#[error("nursery of {size} bytes can't even hold one type descriptor")]
	NurseryTooSmall { size: usize },
	#[error("gen2 pages need at least one item")]
	EmptyGen2Page,
	#[error("gen2 size class limit {size} must be a multiple of {ALIGNMENT}")]
	UnalignedBinSize { size: usize },
	#[error("{var} is not a valid size: {value:?}")]
	InvalidEnv { var: &'static str, value: String },
}

/// Sizing of both generations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GcConfig {
	/// Size of each of the two nursery semi-spaces.
	pub nursery_size: usize,
	/// Items per gen2 page.
	pub gen2_page_items: usize,
	/// Largest item that still goes into a gen2 size class.
	pub gen2_max_bin_size: usize,
}

impl Default for GcConfig {
	fn default() -> Self {
		GcConfig {
			nursery_size: DEFAULT_NURSERY_SIZE,
			gen2_page_items: DEFAULT_GEN2_PAGE_ITEMS,
			gen2_max_bin_size: DEFAULT_GEN2_MAX_BIN_SIZE,
		}
	}
}

impl GcConfig {
	pub fn with_nursery_size(mut self, size: usize) -> Self {
		self.nursery_size = size;
		self
	}

	pub fn with_gen2_page_items(mut self, items: usize) -> Self {
		self.gen2_page_items = items;
		self
	}

	pub fn with_gen2_max_bin_size(mut self, size: usize) -> Self {
		self.gen2_max_bin_size = size;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.nursery_size == 0 || self.nursery_size % ALIGNMENT != 0 {
			return Err(ConfigError::UnalignedNursery {
				size: self.nursery_size,
			});
		}
		if self.nursery_size < STABLE_SIZE {
			return Err(ConfigError::NurseryTooSmall {
				size: self.nursery_size,
			});
		}
		if self.gen2_page_items == 0 {
			return Err(ConfigError::EmptyGen2Page);
		}
		if self.gen2_max_bin_size % ALIGNMENT != 0 {
			return Err(ConfigError::UnalignedBinSize {
				size: self.gen2_max_bin_size,
			});
		}
		Ok(())
	}

	/// The defaults, overridden by `GVM_NURSERY_SIZE` and `GVM_GEN2_PAGE_ITEMS` when set.
	pub fn from_env() -> Result<Self, ConfigError> {
		let mut config = GcConfig::default();
		if let Some(size) = read_env(NURSERY_SIZE_ENV)? {
			config.nursery_size = size;
		}
		if let Some(items) = read_env(GEN2_PAGE_ITEMS_ENV)? {
			config.gen2_page_items = items;
		}
		config.validate()?;
		Ok(config)
	}
}

fn read_env(var: &'static str) -> Result<Option<usize>, ConfigError> {
	match std::env::var(var) {
		Ok(value) => parse_size(&value)
			.map(Some)
			.ok_or(ConfigError::InvalidEnv { var, value }),
		Err(_) => Ok(None),
	}
}

/// Parses a byte count with an optional `k`/`m` suffix.
fn parse_size(value: &str) -> Option<usize> {
	let value = value.trim();
	let (digits, scale) = match value.chars().last()? {
		'k' | 'K' => (&value[..value.len() - 1], 1024),
		'm' | 'M' => (&value[..value.len() - 1], 1024 * 1024),
		_ => (value, 1),
	};
	digits.parse::<usize>().ok()?.checked_mul(scale)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_is_valid() {
		assert_eq!(GcConfig::default().validate(), Ok(()));
	}

	#[test]
	fn rejects_bad_sizes() {
		let config = GcConfig::default();
		assert_eq!(
			config.with_nursery_size(1001).validate(),
			Err(ConfigError::UnalignedNursery { size: 1001 })
		);
		assert_eq!(
			config.with_nursery_size(0).validate(),
			Err(ConfigError::UnalignedNursery { size: 0 })
		);
		assert_eq!(
			config.with_nursery_size(ALIGNMENT).validate(),
			Err(ConfigError::NurseryTooSmall { size: ALIGNMENT })
		);
		assert_eq!(
			config.with_gen2_page_items(0).validate(),
			Err(ConfigError::EmptyGen2Page)
		);
		assert_eq!(
			config.with_gen2_max_bin_size(100).validate(),
			Err(ConfigError::UnalignedBinSize { size: 100 })
		);
	}

	#[test]
	fn parses_suffixed_sizes() {
		assert_eq!(parse_size("4096"), Some(4096));
		assert_eq!(parse_size("64k"), Some(64 * 1024));
		assert_eq!(parse_size(" 2M "), Some(2 * 1024 * 1024));
		assert_eq!(parse_size("lots"), None);
		assert_eq!(parse_size(""), None);
	}
}
