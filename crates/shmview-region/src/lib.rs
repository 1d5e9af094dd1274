pub mod heap;
pub mod mmap;
mod raw;
pub mod traits;

pub use heap::HeapRegion;
pub use mmap::MmapRegion;
pub use raw::BoundsPolicy;
pub use traits::{Region, SharedRegion};
