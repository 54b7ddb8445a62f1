use std::time::Duration;

use ash::vk;
use instant::Instant;
use log::{debug, info};

use super::{VulkanBenchmark, FILL_BYTE, MIB, NUM_ITERATIONS};
use crate::vulkan::query::{elapsed_ticks, ticks_to_seconds};
use crate::vulkan::{Buffer, Context, HOST_MEMORY, Result, TimestampQueryPool, VulkanError};

/// Times a host-visible to device-local buffer copy with GPU timestamps.
///
/// The copy is recorded once and resubmitted for every iteration, waiting on a fence
/// each time, so each sample still pays the CPU/GPU round trip.
pub struct CopyBandwidthBenchmark {
    buffer_size: u64,
    iterations: u32,
}

impl CopyBandwidthBenchmark {
    pub fn new(buffer_size: u64) -> Self {
        Self {
            buffer_size,
            iterations: NUM_ITERATIONS,
        }
    }

    pub fn with_iterations(buffer_size: u64, iterations: u32) -> Self {
        Self {
            buffer_size,
            iterations,
        }
    }

    pub fn measure(&self, context: &Context) -> Result<CopyBandwidth> {
        let period = context.timestamp_period();
        let valid_bits = context.timestamp_valid_bits();

        let mut src = context.create_buffer(self.buffer_size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        src.allocate(HOST_MEMORY)?;
        src.mmap()?.fill(FILL_BYTE);
        src.munmap();

        let mut dst = context.create_buffer(self.buffer_size, vk::BufferUsageFlags::TRANSFER_DST)?;
        dst.allocate(vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let queries = TimestampQueryPool::new(context, 2)?;
        let transfer_fence = context.create_fence()?;

        let command_buffer = context.allocate_command_buffer()?;
        record_copy(context, command_buffer, &src, &dst, &queries)?;

        let mut result = CopyBandwidth::new(self.buffer_size);
        for iteration in 0..self.iterations {
            let start = Instant::now();
            context.submit_and_wait(command_buffer, &transfer_fence)?;
            let round_trip = start.elapsed();
            transfer_fence.reset()?;

            let timestamps = queries.read()?;
            let ticks = elapsed_ticks(timestamps[0], timestamps[1], valid_bits);
            let seconds = ticks_to_seconds(ticks, period);
            debug!(
                "{} MiB iteration {}: {} ticks, {:.3} ms round trip",
                self.buffer_size / MIB,
                iteration,
                ticks,
                round_trip.as_secs_f64() * 1000.0
            );
            result.record(seconds, round_trip);
        }

        context.free_command_buffer(command_buffer);
        Ok(result)
    }
}

impl VulkanBenchmark for CopyBandwidthBenchmark {
    fn name(&self) -> &str {
        "host-to-device copy (compute queue)"
    }

    fn run(&self, context: &Context) -> Result<()> {
        let result = self.measure(context)?;
        result.print();
        Ok(())
    }
}

/// Records: reset both query slots, timestamp, full copy, timestamp once the copy
/// stage has finished.
fn record_copy(
    context: &Context,
    command_buffer: vk::CommandBuffer,
    src: &Buffer<'_>,
    dst: &Buffer<'_>,
    queries: &TimestampQueryPool<'_>,
) -> Result<()> {
    let device = context.device();
    let begin_info = vk::CommandBufferBeginInfo::default();
    // A single large copy; splitting it into smaller regions made no measurable
    // difference.
    let copy = vk::BufferCopy::default()
        .src_offset(0)
        .dst_offset(0)
        .size(src.size().min(dst.size()));
    unsafe {
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(VulkanError::CommandRecording)?;
        queries.cmd_reset(command_buffer);
        device.cmd_write_timestamp2(
            command_buffer,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            queries.handle(),
            0,
        );
        device.cmd_copy_buffer(command_buffer, src.handle(), dst.handle(), &[copy]);
        device.cmd_write_timestamp2(
            command_buffer,
            vk::PipelineStageFlags2::COPY,
            queries.handle(),
            1,
        );
        device
            .end_command_buffer(command_buffer)
            .map_err(VulkanError::CommandRecording)?;
    }
    Ok(())
}

/// Accumulated samples for one buffer size.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyBandwidth {
    pub buffer_size: u64,
    pub iterations: u32,
    pub total_bytes: u64,
    pub total_seconds: f64,
    pub host_round_trip: Duration,
}

impl CopyBandwidth {
    pub fn new(buffer_size: u64) -> Self {
        Self {
            buffer_size,
            iterations: 0,
            total_bytes: 0,
            total_seconds: 0.0,
            host_round_trip: Duration::ZERO,
        }
    }

    pub fn record(&mut self, gpu_seconds: f64, round_trip: Duration) {
        self.iterations += 1;
        self.total_bytes += self.buffer_size;
        self.total_seconds += gpu_seconds;
        self.host_round_trip += round_trip;
    }

    /// GPU-timed throughput. Infinite if the device reported no elapsed time.
    pub fn mib_per_sec(&self) -> f64 {
        self.total_bytes as f64 / self.total_seconds / MIB as f64
    }

    pub fn mean_round_trip(&self) -> Duration {
        if self.iterations == 0 {
            Duration::ZERO
        } else {
            self.host_round_trip / self.iterations
        }
    }

    pub fn report_line(&self) -> String {
        format!("{} MiB @ {:.2} MiB/sec", self.buffer_size / MIB, self.mib_per_sec())
    }

    fn print(&self) {
        println!("{}", self.report_line());
        info!(
            "{} MiB: {} iterations, {:.3} ms mean submit/wait round trip",
            self.buffer_size / MIB,
            self.iterations,
            self.mean_round_trip().as_secs_f64() * 1000.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmarks::BUFFER_SIZES;

    #[test]
    fn accumulates_bytes_and_seconds() {
        let mut result = CopyBandwidth::new(4 * MIB);
        for _ in 0..NUM_ITERATIONS {
            result.record(0.001, Duration::from_millis(2));
        }
        assert_eq!(result.iterations, 32);
        assert_eq!(result.total_bytes, 128 * MIB);
        assert!((result.total_seconds - 0.032).abs() < 1e-12);
        assert!((result.mib_per_sec() - 4000.0).abs() < 1e-6);
        assert_eq!(result.mean_round_trip(), Duration::from_millis(2));
    }

    #[test]
    fn report_line_names_size_and_rate() {
        let mut result = CopyBandwidth::new(16 * MIB);
        result.record(0.5, Duration::from_millis(1));
        assert_eq!(result.report_line(), "16 MiB @ 32.00 MiB/sec");
    }

    #[test]
    fn empty_result_has_no_round_trip() {
        let result = CopyBandwidth::new(MIB);
        assert_eq!(result.mean_round_trip(), Duration::ZERO);
        assert_eq!(result.total_bytes, 0);
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn copy_reports_nonzero_throughput() {
        let context = Context::new(false).unwrap();
        let result = CopyBandwidthBenchmark::new(8 * MIB).measure(&context).unwrap();
        assert_eq!(result.iterations, NUM_ITERATIONS);
        assert_eq!(result.total_bytes, 8 * MIB * u64::from(NUM_ITERATIONS));
        assert!(result.total_seconds > 0.0);
        assert!(result.mib_per_sec() > 0.0 && result.mib_per_sec().is_finite());
    }

    #[test]
    #[ignore = "requires a Vulkan device with at least 2 GiB of memory"]
    fn every_size_completes_independently() {
        let context = Context::new(false).unwrap();
        for &size in BUFFER_SIZES {
            let result = CopyBandwidthBenchmark::with_iterations(size, 2)
                .measure(&context)
                .unwrap();
            assert_eq!(result.total_bytes, 2 * size);
            assert!(result.total_seconds > 0.0, "{} MiB copy took no time", size / MIB);
        }
    }
}
