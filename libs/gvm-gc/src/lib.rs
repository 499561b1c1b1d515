mod config;
mod error;
mod gen2;
mod header;
mod nursery;
mod object;
mod repr;
mod roots;
mod sweep;
mod thread;
mod worklist;

pub use config::*;
pub use error::*;
pub use gen2::*;
pub use gvm_core::align_size;
pub use header::*;
pub use nursery::*;
pub use object::*;
pub use repr::*;
pub use roots::*;
pub use sweep::*;
pub use thread::*;
pub use worklist::*;
