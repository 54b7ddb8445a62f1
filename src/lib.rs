//! Host-to-device copy bandwidth and push-constant device-address checks over a
//! thin owning wrapper around Vulkan.

pub mod benchmarks;
pub mod vulkan;
