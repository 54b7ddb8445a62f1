use ash::vk;
use log::debug;

use super::context::Context;
use super::error::{Result, VulkanError};

/// A pool of timestamp query slots, destroyed with the wrapper.
pub struct TimestampQueryPool<'ctx> {
    context: &'ctx Context,
    handle: vk::QueryPool,
    count: u32,
}

impl<'ctx> TimestampQueryPool<'ctx> {
    pub fn new(context: &'ctx Context, count: u32) -> Result<Self> {
        if context.timestamp_valid_bits() == 0 {
            return Err(VulkanError::TimestampsUnsupported(context.compute_queue_family()));
        }
        let query_pool_ci = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        let handle = unsafe { context.device().create_query_pool(&query_pool_ci, None) }
            .map_err(VulkanError::QueryPoolCreation)?;
        debug!("created query pool {:?} ({} timestamps)", handle, count);
        Ok(Self {
            context,
            handle,
            count,
        })
    }

    pub fn handle(&self) -> vk::QueryPool {
        self.handle
    }

    /// Records a reset of every slot into `command_buffer`.
    pub fn cmd_reset(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.context
                .device()
                .cmd_reset_query_pool(command_buffer, self.handle, 0, self.count)
        };
    }

    /// Reads every slot as 64-bit values, blocking until all are available.
    pub fn read(&self) -> Result<Vec<u64>> {
        let mut timestamps = vec![0u64; self.count as usize];
        unsafe {
            self.context.device().get_query_pool_results(
                self.handle,
                0,
                &mut timestamps,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(VulkanError::QueryResults)?;
        Ok(timestamps)
    }
}

impl Drop for TimestampQueryPool<'_> {
    fn drop(&mut self) {
        unsafe { self.context.device().destroy_query_pool(self.handle, None) };
        debug!("destroyed query pool {:?}", self.handle);
    }
}

/// Ticks between two timestamps, honoring wraparound at `valid_bits`.
pub fn elapsed_ticks(start: u64, end: u64, valid_bits: u32) -> u64 {
    let mask = if valid_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << valid_bits) - 1
    };
    end.wrapping_sub(start) & mask
}

/// Converts a tick count to seconds given the device's nanoseconds-per-tick period.
pub fn ticks_to_seconds(ticks: u64, period_ns: f32) -> f64 {
    ticks as f64 * f64::from(period_ns) / 1e9
}
