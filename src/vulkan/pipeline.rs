use std::fs::File;
use std::path::Path;

use ash::vk;
use log::debug;

use super::context::Context;
use super::error::{Result, VulkanError};

/// Reads a SPIR-V binary from disk. The contents are handed to the driver as-is.
pub fn load_shader(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut shader_file = File::open(path)?;
    if shader_file.metadata()?.len() == 0 {
        return Err(VulkanError::EmptyShader(path.display().to_string()));
    }
    let code = ash::util::read_spv(&mut shader_file)?;
    debug!("loaded {} ({} bytes)", path.display(), code.len() * 4);
    Ok(code)
}

/// A compute pipeline whose layout carries a single push-constant range and no
/// descriptor sets.
pub struct ComputePipeline<'ctx> {
    context: &'ctx Context,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl<'ctx> ComputePipeline<'ctx> {
    pub fn new(context: &'ctx Context, code: &[u32], push_constant_size: u32) -> Result<Self> {
        let device = context.device();

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(push_constant_size)];
        let pipeline_layout_ci =
            vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&pipeline_layout_ci, None) }
            .map_err(VulkanError::PipelineLayoutCreation)?;

        let shader_ci = vk::ShaderModuleCreateInfo::default().code(code);
        let shader = match unsafe { device.create_shader_module(&shader_ci, None) } {
            Ok(shader) => shader,
            Err(err) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::ShaderModuleCreation(err));
            }
        };

        let stage_ci = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader)
            .name(c"main");
        let compute_pipeline_ci = vk::ComputePipelineCreateInfo::default()
            .stage(stage_ci)
            .layout(layout);
        let created = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[compute_pipeline_ci], None)
        };
        unsafe { device.destroy_shader_module(shader, None) };

        let pipeline = match created {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::PipelineCreation(err));
            }
        };
        debug!("created compute pipeline {:?}", pipeline);

        Ok(Self {
            context,
            layout,
            pipeline,
        })
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for ComputePipeline<'_> {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
        debug!("destroyed compute pipeline {:?}", self.pipeline);
    }
}
