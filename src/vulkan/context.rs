use std::ffi::{c_char, CStr};

use ash::vk;
use log::{debug, info, warn};

use super::buffer::Buffer;
use super::error::{Result, VulkanError};
use super::fence::Fence;

pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// The queue family the benchmark runs on must expose exactly these capabilities.
pub const COMPUTE_QUEUE_FLAGS: vk::QueueFlags =
    vk::QueueFlags::from_raw(vk::QueueFlags::COMPUTE.as_raw() | vk::QueueFlags::TRANSFER.as_raw());

/// Owns the instance, the single physical device, the logical device, its compute
/// queue and a command pool for that queue's family.
///
/// Every [`Buffer`] and [`Fence`] borrows the context it was created from, so the
/// context always outlives them.
pub struct Context {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    compute_queue: vk::Queue,
    compute_queue_family: u32,
    compute_command_pool: vk::CommandPool,
    timestamp_valid_bits: u32,
}

impl Context {
    pub fn new(validation_enabled: bool) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };
        let instance = create_instance(&entry, validation_enabled)?;
        match DeviceParts::create(&instance) {
            Ok(parts) => Ok(Self {
                _entry: entry,
                instance,
                physical_device: parts.physical_device,
                device: parts.device,
                compute_queue: parts.compute_queue,
                compute_queue_family: parts.compute_queue_family,
                compute_command_pool: parts.compute_command_pool,
                timestamp_valid_bits: parts.timestamp_valid_bits,
            }),
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                Err(err)
            }
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }

    /// Number of meaningful bits in timestamps written on the compute queue.
    pub fn timestamp_valid_bits(&self) -> u32 {
        self.timestamp_valid_bits
    }

    /// Nanoseconds per timestamp tick.
    pub fn timestamp_period(&self) -> f32 {
        let properties = unsafe { self.instance.get_physical_device_properties(self.physical_device) };
        properties.limits.timestamp_period
    }

    /// Index of the first memory type whose property flags equal `flags` exactly.
    pub fn find_memory_type(&self, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        let properties = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };
        select_memory_type(&properties, flags)
    }

    /// Creates an unbound buffer handle; memory is attached later by [`Buffer::allocate`].
    pub fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Buffer<'_>> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { self.device.create_buffer(&buffer_ci, None) }
            .map_err(VulkanError::BufferCreation)?;
        debug!("created buffer {:?} ({} bytes, usage {:?})", handle, size, usage);
        Ok(Buffer::new(self, handle, size))
    }

    pub fn create_fence(&self) -> Result<Fence<'_>> {
        self.create_fence_with_flags(vk::FenceCreateFlags::empty())
    }

    pub fn create_fence_with_flags(&self, flags: vk::FenceCreateFlags) -> Result<Fence<'_>> {
        let fence_ci = vk::FenceCreateInfo::default().flags(flags);
        let handle = unsafe { self.device.create_fence(&fence_ci, None) }
            .map_err(VulkanError::FenceCreation)?;
        debug!("created fence {:?} ({:?})", handle, flags);
        Ok(Fence::new(self, handle))
    }

    pub fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let command_buffer_ai = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.compute_command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { self.device.allocate_command_buffers(&command_buffer_ai) }
            .map_err(VulkanError::CommandBufferAllocation)?;
        command_buffers
            .into_iter()
            .next()
            .ok_or(VulkanError::CommandBufferAllocation(vk::Result::ERROR_UNKNOWN))
    }

    /// Returns a command buffer to the pool. It must not be pending execution.
    pub fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(self.compute_command_pool, &[command_buffer])
        };
    }

    /// Submits `command_buffer` and blocks until `fence` signals.
    ///
    /// If the wait fails the submission may still be pending, so the device is
    /// drained before the error is returned and the caller drops the resources it
    /// references.
    pub fn submit_and_wait(&self, command_buffer: vk::CommandBuffer, fence: &Fence<'_>) -> Result<()> {
        self.submit(command_buffer, fence)?;
        fence.wait().map_err(|err| {
            if let Err(idle_err) = unsafe { self.device.device_wait_idle() } {
                warn!("device did not go idle after failed fence wait: {}", idle_err);
            }
            err
        })
    }

    /// Submits one recorded command buffer to the compute queue, signaling `fence`
    /// when the device has finished executing it.
    pub fn submit(&self, command_buffer: vk::CommandBuffer, fence: &Fence<'_>) -> Result<()> {
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(self.compute_queue, &[submit_info], fence.handle())
        }
        .map_err(VulkanError::QueueSubmit)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                warn!("device did not go idle before teardown: {}", err);
            }
            self.device
                .destroy_command_pool(self.compute_command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        debug!("destroyed vulkan context");
    }
}

fn create_instance(entry: &ash::Entry, validation_enabled: bool) -> Result<ash::Instance> {
    let validation_enabled = validation_enabled && {
        let available = validation_layer_available(entry);
        if !available {
            warn!(
                "{} requested but not installed, continuing without validation",
                VALIDATION_LAYER_NAME.to_string_lossy()
            );
        }
        available
    };

    let application_info = vk::ApplicationInfo::default().api_version(vk::API_VERSION_1_3);
    let layer_names: Vec<*const c_char> = if validation_enabled {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        Vec::new()
    };
    let instance_ci = vk::InstanceCreateInfo::default()
        .application_info(&application_info)
        .enabled_layer_names(&layer_names);
    let instance = unsafe { entry.create_instance(&instance_ci, None) }
        .map_err(VulkanError::InstanceCreation)?;
    debug!("created vulkan instance (validation: {})", validation_enabled);
    Ok(instance)
}

fn validation_layer_available(entry: &ash::Entry) -> bool {
    match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().map_or(false, |name| name == VALIDATION_LAYER_NAME)),
        Err(err) => {
            warn!("unable to enumerate instance layers: {}", err);
            false
        }
    }
}

/// Handles created by device setup, handed to [`Context`] once all of them exist.
struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    compute_queue: vk::Queue,
    compute_queue_family: u32,
    compute_command_pool: vk::CommandPool,
    timestamp_valid_bits: u32,
}

impl DeviceParts {
    fn create(instance: &ash::Instance) -> Result<Self> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(VulkanError::PhysicalDeviceEnumeration)?;
        let physical_device = select_physical_device(&physical_devices)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        info!(
            "using device {:?}",
            properties
                .device_name_as_c_str()
                .unwrap_or(c"<unnamed>")
        );

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let compute_queue_family =
            select_compute_queue_family(&queue_families).ok_or(VulkanError::NoComputeQueue)?;
        let timestamp_valid_bits = queue_families[compute_queue_family as usize].timestamp_valid_bits;
        info!(
            "using queue family {} ({} timestamp bits)",
            compute_queue_family, timestamp_valid_bits
        );

        let queue_priorities = [1.0];
        let queue_cis = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(compute_queue_family)
            .queue_priorities(&queue_priorities)];
        let mut device_12_features = vk::PhysicalDeviceVulkan12Features::default()
            .host_query_reset(true)
            .buffer_device_address(true);
        let mut device_13_features =
            vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_cis)
            .push_next(&mut device_12_features)
            .push_next(&mut device_13_features);
        let device = unsafe { instance.create_device(physical_device, &device_ci, None) }
            .map_err(VulkanError::DeviceCreation)?;
        debug!("created logical device");

        let compute_queue = unsafe { device.get_device_queue(compute_queue_family, 0) };

        let command_pool_ci =
            vk::CommandPoolCreateInfo::default().queue_family_index(compute_queue_family);
        let compute_command_pool = match unsafe { device.create_command_pool(&command_pool_ci, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(VulkanError::CommandPoolCreation(err));
            }
        };
        debug!("created command pool {:?}", compute_command_pool);

        Ok(Self {
            physical_device,
            device,
            compute_queue,
            compute_queue_family,
            compute_command_pool,
            timestamp_valid_bits,
        })
    }
}

/// Only a single physical device is supported; zero or several is an error.
pub fn select_physical_device(devices: &[vk::PhysicalDevice]) -> Result<vk::PhysicalDevice> {
    match devices {
        [device] => Ok(*device),
        _ => Err(VulkanError::PhysicalDeviceCount(devices.len())),
    }
}

/// First queue family whose flags are exactly compute + transfer. A family that also
/// advertises graphics or sparse binding does not qualify.
pub fn select_compute_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| family.queue_flags == COMPUTE_QUEUE_FLAGS)
        .map(|index| index as u32)
}

/// First memory type whose property flags equal `flags` bit for bit. Supersets do
/// not match.
pub fn select_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    properties
        .memory_types
        .iter()
        .take(properties.memory_type_count as usize)
        .position(|memory_type| memory_type.property_flags == flags)
        .map(|index| index as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::HOST_MEMORY as HOST;
    use ash::vk::Handle;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        for (slot, flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        properties.memory_type_count = types.len() as u32;
        properties
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            timestamp_valid_bits: 64,
            ..Default::default()
        }
    }

    #[test]
    fn memory_type_requires_exact_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
        ]);
        assert_eq!(select_memory_type(&properties, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(1));
        assert_eq!(select_memory_type(&properties, HOST), Some(2));
    }

    #[test]
    fn memory_type_never_matches_superset() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST]);
        assert_eq!(select_memory_type(&properties, HOST), None);
        assert_eq!(select_memory_type(&properties, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
    }

    #[test]
    fn memory_type_returns_first_match() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(select_memory_type(&properties, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
    }

    #[test]
    fn memory_type_ignores_slots_past_count() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_types[3].property_flags = HOST;
        assert_eq!(select_memory_type(&properties, HOST), None);
    }

    #[test]
    fn queue_family_requires_exact_compute_transfer() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(select_compute_queue_family(&families), Some(3));
    }

    #[test]
    fn queue_family_missing() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert_eq!(select_compute_queue_family(&families), None);
        assert_eq!(select_compute_queue_family(&[]), None);
    }

    #[test]
    fn physical_device_must_be_unique() {
        let first = vk::PhysicalDevice::from_raw(1);
        let second = vk::PhysicalDevice::from_raw(2);
        assert_eq!(select_physical_device(&[first]).unwrap(), first);
        assert!(matches!(
            select_physical_device(&[]),
            Err(VulkanError::PhysicalDeviceCount(0))
        ));
        assert!(matches!(
            select_physical_device(&[first, second]),
            Err(VulkanError::PhysicalDeviceCount(2))
        ));
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn created_buffer_reports_requested_size() {
        let context = Context::new(false).unwrap();
        for size in [1, 4096, 1024 * 1024 + 3] {
            let buffer = context
                .create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC)
                .unwrap();
            assert_eq!(buffer.size(), size);
            assert!(buffer.allocation().is_none());
        }
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn context_reports_timestamp_period() {
        let context = Context::new(false).unwrap();
        assert!(context.timestamp_period() > 0.0);
    }
}
