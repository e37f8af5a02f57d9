use {
    crate::types::{MemoryType, ViewKind},
    core::{
        fmt::{self, Display},
        ptr::NonNull,
        time::Duration,
    },
};

/// Enumeration of possible errors when allocating a page or creating a heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutOfMemory {
    /// Device memory exhausted.
    OutOfDeviceMemory,

    /// Host memory exhausted.
    OutOfHostMemory,
}

impl Display for OutOfMemory {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutOfMemory::OutOfDeviceMemory => fmt.write_str("Device memory exhausted"),
            OutOfMemory::OutOfHostMemory => fmt.write_str("Host memory exhausted"),
        }
    }
}

impl std::error::Error for OutOfMemory {}

/// Enumeration of possible errors when mapping a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceMapError {
    OutOfDeviceMemory,
    OutOfHostMemory,
    MapFailed,
}

impl Display for DeviceMapError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMapError::OutOfDeviceMemory => fmt.write_str("Device memory exhausted"),
            DeviceMapError::OutOfHostMemory => fmt.write_str("Host memory exhausted"),
            DeviceMapError::MapFailed => fmt.write_str("Failed to map memory object"),
        }
    }
}

impl std::error::Error for DeviceMapError {}

/// The device stopped executing work and will never report further progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceLost;

impl Display for DeviceLost {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("Device lost")
    }
}

impl std::error::Error for DeviceLost {}

#[derive(Debug)]
pub struct MappedMemoryRange<'a, M> {
    pub memory: &'a M,
    pub offset: u64,
    pub size: u64,
}

/// Properties of the device that pools will allocate from.
#[derive(Clone, Copy, Debug)]
pub struct DeviceProperties {
    /// Host-visible memory type used for upload pages.
    pub upload_memory_type: MemoryType,

    /// Device-local memory type used for pages the host never touches.
    pub device_memory_type: MemoryType,

    /// Maximum number of valid memory allocations that can exist simultaneously within the device.
    pub max_memory_allocation_count: u32,

    /// Maximum size for single allocation supported by the device.
    pub max_memory_allocation_size: u64,

    /// Atom size for host mappable non-coherent memory.
    pub non_coherent_atom_size: u64,
}

/// Abstract device that allocates memory pages.
pub trait MemoryDevice<M> {
    /// Allocate new memory object from device.
    /// This function may be expensive and even limit maximum number of memory
    /// objects allocated.
    /// Which is the reason pages are recycled instead of freed.
    ///
    /// # Safety
    ///
    /// `memory_type` must be valid index for memory type associated with this device.
    unsafe fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<M, OutOfMemory>;

    /// Deallocate memory object.
    /// All clones of specified memory handle become invalid.
    ///
    /// # Safety
    ///
    /// Memory object must have been allocated from this device
    /// and no pending device work may reference it.
    unsafe fn deallocate_memory(&self, memory: M);

    /// Map region of device memory to host memory space.
    ///
    /// # Safety
    ///
    /// * Memory object must have been allocated from this device.
    /// * Memory object must not be already mapped.
    /// * Memory must be allocated from type with `HOST_VISIBLE` property.
    /// * `offset + size` must not be larger than memory object size.
    unsafe fn map_memory(
        &self,
        memory: &mut M,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DeviceMapError>;

    /// Unmap previously mapped memory region.
    ///
    /// # Safety
    ///
    /// * Memory object must have been allocated from this device.
    /// * Memory object must be mapped
    unsafe fn unmap_memory(&self, memory: &mut M);

    /// Flushes ranges of memory mapped regions.
    ///
    /// # Safety
    ///
    /// * Memory objects must have been allocated from this device.
    /// * `offset` and `size` in each element of `ranges` must specify
    ///   subregion of currently mapped memory region
    /// * if `memory` in some element of `ranges` does not contain `HOST_COHERENT` property
    ///   then `offset` and `size` of that element must be multiple of `non_coherent_atom_size`.
    unsafe fn flush_memory_ranges(
        &self,
        ranges: &[MappedMemoryRange<'_, M>],
    ) -> Result<(), OutOfMemory>;
}

/// Abstract device that creates fixed-capacity tables of view slots.
pub trait ViewHeapDevice<H> {
    /// Creates heap with room for `capacity` views of specified kind.
    ///
    /// # Safety
    ///
    /// `capacity` must be non-zero.
    unsafe fn create_view_heap(&self, kind: ViewKind, capacity: u32) -> Result<H, OutOfMemory>;

    /// Invalidates every view written into the heap so it can be reused.
    ///
    /// # Safety
    ///
    /// Heap must have been created by this device
    /// and no pending device work may reference it.
    unsafe fn reset_view_heap(&self, heap: &mut H);

    /// Copies `count` views starting at slot `start` from `src` into the same slots of `dst`.
    ///
    /// # Safety
    ///
    /// * Both heaps must have been created by this device with the same kind.
    /// * `start + count` must not exceed capacity of either heap.
    unsafe fn copy_views(&self, src: &H, dst: &mut H, start: u32, count: u32);

    /// Destroys heap.
    ///
    /// # Safety
    ///
    /// Heap must have been created by this device
    /// and no pending device work may reference it.
    unsafe fn destroy_view_heap(&self, heap: H);
}

/// Device side of a completion fence.
///
/// The device advances the timeline as it finishes submitted work.
/// Values reported by one timeline never decrease.
pub trait TimelineDevice {
    /// Returns highest value the device has finished.
    fn completed_value(&self) -> Result<u64, DeviceLost>;

    /// Blocks until the device finishes `value` or `timeout` elapses.
    /// `None` waits without a deadline.
    ///
    /// Returns `false` if the wait timed out.
    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceLost>;
}

impl<T> TimelineDevice for &T
where
    T: TimelineDevice + ?Sized,
{
    fn completed_value(&self) -> Result<u64, DeviceLost> {
        (**self).completed_value()
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceLost> {
        (**self).wait_value(value, timeout)
    }
}

impl<T> TimelineDevice for std::sync::Arc<T>
where
    T: TimelineDevice + ?Sized,
{
    fn completed_value(&self) -> Result<u64, DeviceLost> {
        (**self).completed_value()
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceLost> {
        (**self).wait_value(value, timeout)
    }
}
