use std::mem::size_of;
use std::path::{Path, PathBuf};

use ash::vk;
use log::info;

use super::{VulkanBenchmark, SMOKE_BUFFER_SIZE, SMOKE_FILL_BYTE};
use crate::vulkan::{load_shader, ComputePipeline, Context, HOST_MEMORY, Result, VulkanError};

/// Dispatches one workgroup of an external compute shader that receives a buffer's
/// device address as its only push constant, and shows the first byte of that
/// buffer before and after.
pub struct DeviceAddressSmokeTest {
    shader_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmokeTestOutcome {
    pub input: u8,
    pub output: u8,
}

impl SmokeTestOutcome {
    pub fn input_line(&self) -> String {
        format!(" in = {:#x}", self.input)
    }

    pub fn output_line(&self) -> String {
        format!("out = {:#x}", self.output)
    }
}

impl DeviceAddressSmokeTest {
    pub fn new(shader_path: impl AsRef<Path>) -> Self {
        Self {
            shader_path: shader_path.as_ref().to_path_buf(),
        }
    }

    pub fn measure(&self, context: &Context) -> Result<SmokeTestOutcome> {
        let code = load_shader(&self.shader_path)?;
        let pipeline = ComputePipeline::new(context, &code, size_of::<vk::DeviceAddress>() as u32)?;

        let mut buffer = context.create_buffer(
            SMOKE_BUFFER_SIZE,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        )?;
        buffer.allocate(HOST_MEMORY)?;
        let data = buffer.mmap()?;
        data.fill(SMOKE_FILL_BYTE);
        let input = data[0];
        let address = buffer.device_address();
        info!("dispatching with buffer at device address {:#x}", address);

        let command_buffer = context.allocate_command_buffer()?;
        record_dispatch(context, command_buffer, &pipeline, address)?;

        let fence = context.create_fence()?;
        context.submit_and_wait(command_buffer, &fence)?;
        fence.reset()?;
        context.free_command_buffer(command_buffer);

        let output = buffer.mapped().expect("smoke buffer stays mapped")[0];
        Ok(SmokeTestOutcome { input, output })
    }
}

impl VulkanBenchmark for DeviceAddressSmokeTest {
    fn name(&self) -> &str {
        "push-constant device address"
    }

    fn run(&self, context: &Context) -> Result<()> {
        let outcome = self.measure(context)?;
        println!("{}", outcome.input_line());
        println!("{}", outcome.output_line());
        Ok(())
    }
}

fn record_dispatch(
    context: &Context,
    command_buffer: vk::CommandBuffer,
    pipeline: &ComputePipeline<'_>,
    address: vk::DeviceAddress,
) -> Result<()> {
    let device = context.device();
    let begin_info = vk::CommandBufferBeginInfo::default();
    // Shader writes must reach the host domain before the mapping is read again.
    let host_barrier = vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
        .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::HOST)
        .dst_access_mask(vk::AccessFlags2::HOST_READ);
    let dependency = vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&host_barrier));
    unsafe {
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(VulkanError::CommandRecording)?;
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline.handle());
        device.cmd_push_constants(
            command_buffer,
            pipeline.layout(),
            vk::ShaderStageFlags::COMPUTE,
            0,
            &address.to_ne_bytes(),
        );
        device.cmd_dispatch(command_buffer, 1, 1, 1);
        device.cmd_pipeline_barrier2(command_buffer, &dependency);
        device
            .end_command_buffer(command_buffer)
            .map_err(VulkanError::CommandRecording)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_lines_are_hex() {
        let outcome = SmokeTestOutcome {
            input: 0x80,
            output: 0x81,
        };
        assert_eq!(outcome.input_line(), " in = 0x80");
        assert_eq!(outcome.output_line(), "out = 0x81");
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn device_address_buffer_has_an_address() {
        let context = Context::new(false).unwrap();
        let mut buffer = context
            .create_buffer(
                SMOKE_BUFFER_SIZE,
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            )
            .unwrap();
        buffer.allocate(HOST_MEMORY).unwrap();
        assert_ne!(buffer.device_address(), 0);
    }

    #[test]
    #[ignore = "requires a Vulkan device and shaders/device_address.spv"]
    fn shipped_shader_increments_first_byte() {
        let context = Context::new(false).unwrap();
        let outcome = DeviceAddressSmokeTest::new(crate::benchmarks::SHADER_PATH)
            .measure(&context)
            .unwrap();
        assert_eq!(outcome.input, SMOKE_FILL_BYTE);
        assert_eq!(outcome.output, SMOKE_FILL_BYTE.wrapping_add(1));
    }
}
