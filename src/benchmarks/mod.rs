use crate::vulkan::{Context, Result};

pub mod copy_bandwidth;
pub mod device_address;

pub const MIB: u64 = 1024 * 1024;

pub const NUM_ITERATIONS: u32 = 32;
// Assumes the largest size fits in device memory.
pub const BUFFER_SIZES: &[u64] = &[
    MIB,        // 1MiB
    2 * MIB,    // 2MiB
    4 * MIB,    // 4MiB
    8 * MIB,    // 8MiB
    16 * MIB,   // 16MiB
    32 * MIB,   // 32MiB
    64 * MIB,   // 64MiB
    128 * MIB,  // 128MiB
    256 * MIB,  // 256MiB
    512 * MIB,  // 512MiB
    1024 * MIB, // 1GiB
];

/// Written to every byte of the copy source so the copy moves real data.
pub const FILL_BYTE: u8 = 0xff;

pub const SHADER_PATH: &str = "shaders/device_address.spv";
pub const SMOKE_BUFFER_SIZE: u64 = 4 * 32;
pub const SMOKE_FILL_BYTE: u8 = 0x80;

// Trait for implementing benchmarks
pub trait VulkanBenchmark {
    fn name(&self) -> &str;
    fn run(&self, context: &Context) -> Result<()>;
}
