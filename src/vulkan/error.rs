use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VulkanError>;

/// Failures raised by the Vulkan wrapper. None of them are recoverable; callers
/// propagate them to `main`, which reports and exits.
#[derive(Debug, Error)]
pub enum VulkanError {
    #[error("unable to load vulkan entry points: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("unable to create vulkan instance: {0}")]
    InstanceCreation(vk::Result),

    #[error("unable to find physical device (found {0}, expected exactly one)")]
    PhysicalDeviceCount(usize),

    #[error("unable to enumerate physical devices: {0}")]
    PhysicalDeviceEnumeration(vk::Result),

    #[error("unable to find compute-capable queue")]
    NoComputeQueue,

    #[error("unable to create device: {0}")]
    DeviceCreation(vk::Result),

    #[error("unable to create command pool: {0}")]
    CommandPoolCreation(vk::Result),

    #[error("unable to find memory type with flags {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),

    #[error("unable to create buffer: {0}")]
    BufferCreation(vk::Result),

    #[error("unable to allocate buffer memory: {0}")]
    MemoryAllocation(vk::Result),

    #[error("unable to bind buffer memory: {0}")]
    MemoryBinding(vk::Result),

    #[error("unable to map memory: {0}")]
    MemoryMapping(vk::Result),

    #[error("unable to create fence: {0}")]
    FenceCreation(vk::Result),

    #[error("unable to wait for fence: {0}")]
    FenceWait(vk::Result),

    #[error("unable to reset fence: {0}")]
    FenceReset(vk::Result),

    #[error("unable to query fence status: {0}")]
    FenceStatus(vk::Result),

    #[error("unable to create query pool: {0}")]
    QueryPoolCreation(vk::Result),

    #[error("unable to read query results: {0}")]
    QueryResults(vk::Result),

    #[error("queue family {0} does not support timestamps")]
    TimestampsUnsupported(u32),

    #[error("unable to allocate command buffer: {0}")]
    CommandBufferAllocation(vk::Result),

    #[error("unable to record command buffer: {0}")]
    CommandRecording(vk::Result),

    #[error("unable to submit to queue: {0}")]
    QueueSubmit(vk::Result),

    #[error("unable to read compute shader binary: {0}")]
    ShaderRead(#[from] std::io::Error),

    #[error("compute shader binary {0} is empty")]
    EmptyShader(String),

    #[error("unable to create shader module: {0}")]
    ShaderModuleCreation(vk::Result),

    #[error("unable to create pipeline layout: {0}")]
    PipelineLayoutCreation(vk::Result),

    #[error("unable to create compute pipeline: {0}")]
    PipelineCreation(vk::Result),
}
