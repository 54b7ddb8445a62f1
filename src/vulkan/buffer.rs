use std::ptr::NonNull;

use ash::vk;
use log::{debug, warn};

use super::context::Context;
use super::error::{Result, VulkanError};

/// Host-visible, host-coherent memory: mappable, with writes visible without flushes.
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A device buffer and, once [`allocate`](Buffer::allocate) has run, the memory bound
/// to it. Both are released when the buffer is dropped.
pub struct Buffer<'ctx> {
    context: &'ctx Context,
    handle: vk::Buffer,
    size: vk::DeviceSize,
    state: MemoryState,
}

impl<'ctx> Buffer<'ctx> {
    pub(super) fn new(context: &'ctx Context, handle: vk::Buffer, size: vk::DeviceSize) -> Self {
        Self {
            context,
            handle,
            size,
            state: MemoryState::default(),
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn allocation(&self) -> Option<vk::DeviceMemory> {
        self.state.allocation
    }

    pub fn is_mapped(&self) -> bool {
        self.state.mapping.is_some()
    }

    /// Allocates `size()` bytes from the memory type whose flags equal `memory_flags`
    /// and binds them at offset 0. Memory is always allocated with the device-address
    /// flag so the buffer can later be addressed from shaders.
    ///
    /// Panics if the buffer already has memory.
    pub fn allocate(&mut self, memory_flags: vk::MemoryPropertyFlags) -> Result<vk::DeviceMemory> {
        self.state.expect_unallocated();

        let memory_type = self
            .context
            .find_memory_type(memory_flags)
            .ok_or(VulkanError::NoMemoryType(memory_flags))?;

        let device = self.context.device();
        let requirements = unsafe { device.get_buffer_memory_requirements(self.handle) };
        if requirements.size > self.size || requirements.memory_type_bits & (1 << memory_type) == 0 {
            warn!(
                "buffer {:?} wants {} bytes from types {:#b}, allocating {} bytes from type {}",
                self.handle, requirements.size, requirements.memory_type_bits, self.size, memory_type
            );
        }

        let mut alloc_flags_info =
            vk::MemoryAllocateFlagsInfo::default().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let alloc_ci = vk::MemoryAllocateInfo::default()
            .allocation_size(self.size)
            .memory_type_index(memory_type)
            .push_next(&mut alloc_flags_info);
        let memory = unsafe { device.allocate_memory(&alloc_ci, None) }
            .map_err(VulkanError::MemoryAllocation)?;
        self.state.allocation = Some(memory);
        debug!(
            "allocated {} bytes of {:?} memory (type {}) for buffer {:?}",
            self.size, memory_flags, memory_type, self.handle
        );

        unsafe { device.bind_buffer_memory(self.handle, memory, 0) }
            .map_err(VulkanError::MemoryBinding)?;

        Ok(memory)
    }

    /// Maps the whole buffer into host memory.
    ///
    /// Panics if the buffer has no memory or is already mapped.
    pub fn mmap(&mut self) -> Result<&mut [u8]> {
        let memory = self.state.expect_mappable();
        let ptr = unsafe {
            self.context
                .device()
                .map_memory(memory, 0, self.size, vk::MemoryMapFlags::empty())
        }
        .map_err(VulkanError::MemoryMapping)?;
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or(VulkanError::MemoryMapping(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        self.state.mapping = Some(ptr);
        // The mapping covers exactly `size` bytes and lives until `munmap` or drop,
        // both of which need `&mut self`.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) })
    }

    /// The current host mapping, if any. Device writes become visible here once the
    /// fence guarding them has signaled.
    pub fn mapped(&self) -> Option<&[u8]> {
        self.state
            .mapping
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) })
    }

    /// Panics if the buffer is not mapped.
    pub fn munmap(&mut self) {
        let memory = self.state.expect_mapped();
        unsafe { self.context.device().unmap_memory(memory) };
        self.state.mapping = None;
    }

    /// Address of the buffer for use from shaders. The buffer must have memory bound
    /// and have been created with `SHADER_DEVICE_ADDRESS` usage.
    pub fn device_address(&self) -> vk::DeviceAddress {
        assert!(
            self.state.allocation.is_some(),
            "device address requires bound memory"
        );
        let address_info = vk::BufferDeviceAddressInfo::default().buffer(self.handle);
        unsafe { self.context.device().get_buffer_device_address(&address_info) }
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            // Freeing mapped memory implicitly unmaps it.
            if let Some(memory) = self.state.allocation.take() {
                device.free_memory(memory, None);
            }
            device.destroy_buffer(self.handle, None);
        }
        debug!("destroyed buffer {:?}", self.handle);
    }
}

/// Allocation and mapping bookkeeping. Misuse is a caller bug and panics.
#[derive(Debug, Default)]
struct MemoryState {
    allocation: Option<vk::DeviceMemory>,
    mapping: Option<NonNull<u8>>,
}

impl MemoryState {
    fn expect_unallocated(&self) {
        assert!(self.allocation.is_none(), "buffer memory is already allocated");
    }

    fn expect_mappable(&self) -> vk::DeviceMemory {
        let memory = self.allocation.expect("mmap requires allocated buffer memory");
        assert!(self.mapping.is_none(), "buffer is already mapped");
        memory
    }

    fn expect_mapped(&self) -> vk::DeviceMemory {
        assert!(self.mapping.is_some(), "buffer is not mapped");
        // A mapping cannot exist without an allocation.
        self.allocation.expect("mapped buffer has no allocation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn allocated() -> MemoryState {
        MemoryState {
            allocation: Some(vk::DeviceMemory::from_raw(0x10)),
            mapping: None,
        }
    }

    #[test]
    fn fresh_state_is_unallocated_and_unmapped() {
        let state = MemoryState::default();
        state.expect_unallocated();
        assert!(state.mapping.is_none());
    }

    #[test]
    #[should_panic(expected = "already allocated")]
    fn allocate_twice_is_rejected() {
        allocated().expect_unallocated();
    }

    #[test]
    #[should_panic(expected = "requires allocated buffer memory")]
    fn map_without_allocation_is_rejected() {
        MemoryState::default().expect_mappable();
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn map_twice_is_rejected() {
        let mut state = allocated();
        state.mapping = Some(NonNull::dangling());
        state.expect_mappable();
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn unmap_while_unmapped_is_rejected() {
        allocated().expect_mapped();
    }

    #[test]
    fn mappable_state_yields_its_memory() {
        let state = allocated();
        assert_eq!(state.expect_mappable(), vk::DeviceMemory::from_raw(0x10));
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn mapped_buffer_reads_back_sentinel_everywhere() {
        let context = Context::new(false).unwrap();
        let mut buffer = context
            .create_buffer(64 * 1024 + 7, vk::BufferUsageFlags::TRANSFER_SRC)
            .unwrap();
        buffer.allocate(HOST_MEMORY).unwrap();
        let data = buffer.mmap().unwrap();
        assert_eq!(data.len(), 64 * 1024 + 7);
        data.fill(0xff);
        assert!(buffer.mapped().unwrap().iter().all(|&byte| byte == 0xff));
        buffer.munmap();
        assert!(!buffer.is_mapped());
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    #[should_panic(expected = "already allocated")]
    fn device_buffer_rejects_second_allocation() {
        let context = Context::new(false).unwrap();
        let mut buffer = context
            .create_buffer(4096, vk::BufferUsageFlags::TRANSFER_DST)
            .unwrap();
        buffer.allocate(vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        let _ = buffer.allocate(vk::MemoryPropertyFlags::DEVICE_LOCAL);
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    #[should_panic(expected = "already mapped")]
    fn device_buffer_rejects_second_mapping() {
        let context = Context::new(false).unwrap();
        let mut buffer = context
            .create_buffer(4096, vk::BufferUsageFlags::TRANSFER_SRC)
            .unwrap();
        buffer.allocate(HOST_MEMORY).unwrap();
        buffer.mmap().unwrap();
        let _ = buffer.mmap();
    }
}
