//!
//! # Ash backend for `gpu-reclaim`
//!
//! Memory pages are `vk::DeviceMemory` objects.
//! View heaps are descriptor pools holding single variable-count descriptor set.
//! Completion fence runs over a timeline semaphore.
//!
//! # Usage example
//!
//! ```ignore
//! use {
//!     ash::vk,
//!     gpu_reclaim::{Config, PageUsage, ReclaimContext},
//!     gpu_reclaim_ash::{device_properties, AshMemoryDevice, AshTimeline},
//! };
//!
//! fn record(instance: &ash::Instance, physical_device: vk::PhysicalDevice, device: &ash::Device) -> eyre::Result<()> {
//!     let props = unsafe { device_properties(instance, physical_device) }
//!         .ok_or_else(|| eyre::eyre!("No suitable memory types"))?;
//!     let timeline = unsafe { AshTimeline::new(device.clone()) }?;
//!
//!     let context = ReclaimContext::<gpu_reclaim_ash::AshViewHeap, _, _>::new(Config::i_am_potato(), &props, timeline)?;
//!     let mut arena = context.arena(PageUsage::Upload);
//!
//!     let scratch = unsafe { arena.allocate(AshMemoryDevice::wrap(device), context.fence(), 256, 16) }?;
//!     unsafe { scratch.write_bytes(AshMemoryDevice::wrap(device), &[0; 256]) }?;
//!
//!     // Submit work that signals `value` on `context.fence().timeline().semaphore()`.
//!     let value = context.fence().signal(0);
//!     arena.discard_all(value);
//!     Ok(())
//! }
//! ```
//!

use {
    ash::{vk, Device, Instance},
    gpu_reclaim_types::{
        DeviceLost, DeviceMapError, DeviceProperties, MappedMemoryRange, MemoryDevice,
        MemoryPropertyFlags, MemoryType, OutOfMemory, TimelineDevice, ViewHeapDevice, ViewKind,
    },
    std::{convert::TryFrom as _, ptr::NonNull, time::Duration},
    tinyvec::TinyVec,
};

#[repr(transparent)]
pub struct AshMemoryDevice {
    device: Device,
}

impl AshMemoryDevice {
    pub fn wrap(device: &Device) -> &Self {
        unsafe {
            // Safe because `Self` is `repr(transparent)`
            // with only field being `Device`.
            &*(device as *const Device as *const Self)
        }
    }
}

fn out_of_memory(err: vk::Result) -> OutOfMemory {
    match err {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => OutOfMemory::OutOfDeviceMemory,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => OutOfMemory::OutOfHostMemory,
        err => panic!("Unexpected Vulkan error: `{}`", err),
    }
}

impl MemoryDevice<vk::DeviceMemory> for AshMemoryDevice {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn allocate_memory(
        &self,
        size: u64,
        memory_type: u32,
    ) -> Result<vk::DeviceMemory, OutOfMemory> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type);

        match self.device.allocate_memory(&info, None) {
            Ok(memory) => Ok(memory),
            Err(vk::Result::ERROR_TOO_MANY_OBJECTS) => panic!("Too many objects"),
            Err(err) => Err(out_of_memory(err)),
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn deallocate_memory(&self, memory: vk::DeviceMemory) {
        self.device.free_memory(memory, None);
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn map_memory(
        &self,
        memory: &mut vk::DeviceMemory,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DeviceMapError> {
        match self
            .device
            .map_memory(*memory, offset, size, vk::MemoryMapFlags::empty())
        {
            Ok(ptr) => NonNull::new(ptr as *mut u8).ok_or(DeviceMapError::MapFailed),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(DeviceMapError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => Err(DeviceMapError::OutOfHostMemory),
            Err(vk::Result::ERROR_MEMORY_MAP_FAILED) => Err(DeviceMapError::MapFailed),
            Err(err) => panic!("Unexpected Vulkan error: `{}`", err),
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn unmap_memory(&self, memory: &mut vk::DeviceMemory) {
        self.device.unmap_memory(*memory);
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn flush_memory_ranges(
        &self,
        ranges: &[MappedMemoryRange<'_, vk::DeviceMemory>],
    ) -> Result<(), OutOfMemory> {
        self.device
            .flush_mapped_memory_ranges(
                &ranges
                    .iter()
                    .map(|range| {
                        vk::MappedMemoryRange::default()
                            .memory(*range.memory)
                            .offset(range.offset)
                            .size(range.size)
                    })
                    .collect::<TinyVec<[_; 4]>>(),
            )
            .map_err(out_of_memory)
    }
}

/// Descriptor set layout used for heaps of one view kind.
///
/// Layout must have single binding 0 of `ty` created with
/// `VARIABLE_DESCRIPTOR_COUNT` flag and large enough maximal count.
#[derive(Clone, Copy)]
pub struct ViewLayout {
    pub layout: vk::DescriptorSetLayout,
    pub ty: vk::DescriptorType,
    pub pool_flags: vk::DescriptorPoolCreateFlags,
}

/// Descriptor type commonly used for views of `kind`.
pub fn default_descriptor_type(kind: ViewKind) -> vk::DescriptorType {
    match kind {
        ViewKind::Resource => vk::DescriptorType::SAMPLED_IMAGE,
        ViewKind::Sampler => vk::DescriptorType::SAMPLER,
        ViewKind::ColorTarget | ViewKind::DepthTarget => vk::DescriptorType::INPUT_ATTACHMENT,
    }
}

/// View heap made of descriptor pool and the only set allocated from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AshViewHeap {
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

/// Creates view heaps with layouts configured per view kind.
pub struct AshViewHeapDevice {
    device: Device,
    layouts: [ViewLayout; 4],
}

impl AshViewHeapDevice {
    /// `layouts` are indexed in order of `ViewKind::ALL`.
    pub fn new(device: Device, layouts: [ViewLayout; 4]) -> Self {
        AshViewHeapDevice { device, layouts }
    }

    fn layout(&self, kind: ViewKind) -> &ViewLayout {
        &self.layouts[kind as usize]
    }
}

impl ViewHeapDevice<AshViewHeap> for AshViewHeapDevice {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn create_view_heap(
        &self,
        kind: ViewKind,
        capacity: u32,
    ) -> Result<AshViewHeap, OutOfMemory> {
        let layout = self.layout(kind);

        let sizes = [vk::DescriptorPoolSize {
            ty: layout.ty,
            descriptor_count: capacity,
        }];
        let pool = self
            .device
            .create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .flags(layout.pool_flags)
                    .max_sets(1)
                    .pool_sizes(&sizes),
                None,
            )
            .map_err(out_of_memory)?;

        let counts = [capacity];
        let layouts = [layout.layout];
        let mut variable_count =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);

        let sets = self.device.allocate_descriptor_sets(
            &vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts)
                .push_next(&mut variable_count),
        );

        match sets {
            Ok(sets) => Ok(AshViewHeap { pool, set: sets[0] }),
            Err(err) => {
                self.device.destroy_descriptor_pool(pool, None);
                match err {
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                        Err(OutOfMemory::OutOfDeviceMemory)
                    }
                    err => Err(out_of_memory(err)),
                }
            }
        }
    }

    unsafe fn reset_view_heap(&self, _heap: &mut AshViewHeap) {
        // Stale descriptors are overwritten before use.
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn copy_views(&self, src: &AshViewHeap, dst: &mut AshViewHeap, start: u32, count: u32) {
        let copy = vk::CopyDescriptorSet::default()
            .src_set(src.set)
            .src_binding(0)
            .src_array_element(start)
            .dst_set(dst.set)
            .dst_binding(0)
            .dst_array_element(start)
            .descriptor_count(count);

        self.device.update_descriptor_sets(&[], &[copy]);
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    unsafe fn destroy_view_heap(&self, heap: AshViewHeap) {
        self.device.destroy_descriptor_pool(heap.pool, None);
    }
}

/// Timeline semaphore the device signals as it finishes submissions.
pub struct AshTimeline {
    device: Device,
    semaphore: vk::Semaphore,
}

impl AshTimeline {
    /// Creates timeline semaphore with zero initial value.
    ///
    /// # Safety
    ///
    /// `timelineSemaphore` feature must be enabled on `device`.
    pub unsafe fn new(device: Device) -> Result<Self, OutOfMemory> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);

        let semaphore = device
            .create_semaphore(
                &vk::SemaphoreCreateInfo::default().push_next(&mut type_info),
                None,
            )
            .map_err(out_of_memory)?;

        Ok(AshTimeline { device, semaphore })
    }

    /// Returns semaphore submissions must signal with fence values.
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for AshTimeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) }
    }
}

fn device_lost(err: vk::Result) -> DeviceLost {
    match err {
        vk::Result::ERROR_DEVICE_LOST => DeviceLost,
        err => panic!("Unexpected Vulkan error: `{}`", err),
    }
}

impl TimelineDevice for AshTimeline {
    fn completed_value(&self) -> Result<u64, DeviceLost> {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }.map_err(device_lost)
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceLost> {
        let timeout = timeout.map_or(u64::MAX, |timeout| {
            u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
        });

        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        match unsafe { self.device.wait_semaphores(&info, timeout) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(device_lost(err)),
        }
    }
}

/// Returns `DeviceProperties` for specified `PhysicalDevice`.
/// Upload pages prefer host-coherent memory, device pages use device-local memory.
///
/// Returns `None` if the device has no suitable memory types.
///
/// # Safety
///
/// `physical_device` must be queried from `instance` and support Vulkan 1.1.
pub unsafe fn device_properties(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<DeviceProperties> {
    let mut maintenance3 = vk::PhysicalDeviceMaintenance3Properties::default();
    let mut properties = vk::PhysicalDeviceProperties2::default().push_next(&mut maintenance3);
    instance.get_physical_device_properties2(physical_device, &mut properties);
    let limits = properties.properties.limits;
    let max_memory_allocation_size = maintenance3.max_memory_allocation_size;

    let memory_properties = instance.get_physical_device_memory_properties(physical_device);
    let memory_types: Vec<_> = memory_properties.memory_types
        [..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .map(|(index, memory_type)| MemoryType {
            index: index as u32,
            props: memory_properties_from_ash(memory_type.property_flags),
        })
        .collect();

    let find = |required: MemoryPropertyFlags| {
        memory_types
            .iter()
            .copied()
            .find(|memory_type| memory_type.props.contains(required))
    };

    let upload_memory_type = find(
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
    )
    .or_else(|| find(MemoryPropertyFlags::HOST_VISIBLE))?;
    let device_memory_type = find(MemoryPropertyFlags::DEVICE_LOCAL)?;

    Some(DeviceProperties {
        upload_memory_type,
        device_memory_type,
        max_memory_allocation_count: limits.max_memory_allocation_count,
        max_memory_allocation_size,
        non_coherent_atom_size: limits.non_coherent_atom_size,
    })
}

pub fn memory_properties_from_ash(props: vk::MemoryPropertyFlags) -> MemoryPropertyFlags {
    let mut result = MemoryPropertyFlags::empty();
    if props.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        result |= MemoryPropertyFlags::DEVICE_LOCAL;
    }
    if props.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        result |= MemoryPropertyFlags::HOST_VISIBLE;
    }
    if props.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
        result |= MemoryPropertyFlags::HOST_COHERENT;
    }
    if props.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
        result |= MemoryPropertyFlags::HOST_CACHED;
    }
    result
}
