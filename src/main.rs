use log::{error, info};

use vk_membench::benchmarks::{
    copy_bandwidth::CopyBandwidthBenchmark, device_address::DeviceAddressSmokeTest, VulkanBenchmark,
    BUFFER_SIZES, MIB, SHADER_PATH,
};
use vk_membench::vulkan::{Context, Result};

const VALIDATION_ENABLED: bool = cfg!(debug_assertions);

fn run() -> Result<()> {
    let context = Context::new(VALIDATION_ENABLED)?;

    for &buffer_size in BUFFER_SIZES {
        let benchmark = CopyBandwidthBenchmark::new(buffer_size);
        info!("running {} with {} MiB", benchmark.name(), buffer_size / MIB);
        benchmark.run(&context)?;
    }

    let smoke_test = DeviceAddressSmokeTest::new(SHADER_PATH);
    info!("running {}", smoke_test.name());
    smoke_test.run(&context)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        error!("{}", err);
        std::process::exit(1);
    }
}
