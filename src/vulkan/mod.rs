//! Owning wrappers around the Vulkan objects the benchmarks use.
//!
//! Every resource borrows the [`Context`] that created it, so the borrow checker
//! enforces that buffers, fences, query pools and pipelines are destroyed before
//! the device and instance.

pub mod buffer;
pub mod context;
pub mod error;
pub mod fence;
pub mod pipeline;
pub mod query;

pub use buffer::{Buffer, HOST_MEMORY};
pub use context::Context;
pub use error::{Result, VulkanError};
pub use fence::Fence;
pub use pipeline::{load_shader, ComputePipeline};
pub use query::TimestampQueryPool;
