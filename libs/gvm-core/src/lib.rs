mod utils;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
pub use utils::*;

/// Environment variable overriding the level of the `gc` tracing target.
pub const GC_LOG_ENV: &str = "GVM_GC_LOG";

static START: Once = Once::new();

/// Installs the global tracing subscriber. Safe to call more than once; only the first call does anything.
pub fn init() {
	START.call_once(|| {
		let gc_level = std::env::var(GC_LOG_ENV)
			.ok()
			.and_then(|value| value.parse::<Level>().ok())
			.unwrap_or(Level::INFO);

		let filter = filter::Targets::new()
			.with_default(Level::TRACE)
			.with_target("gc", gc_level);
		let layered = tracing_subscriber::registry()
			.with(tracing_subscriber::fmt::layer())
			.with(filter);

		// An embedder may already have installed its own subscriber.
		let _ = layered.try_init();
	});
}
