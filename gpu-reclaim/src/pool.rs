use {
    crate::{
        align_up,
        error::{AllocationError, FenceError},
        fence::CompletionFence,
    },
    core::{
        hash::Hash,
        ptr::NonNull,
        sync::atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    gpu_reclaim_types::{
        DeviceProperties, MemoryDevice, MemoryPropertyFlags, MemoryType, TimelineDevice,
        ViewHeapDevice, ViewKind,
    },
    parking_lot::Mutex,
    std::collections::{HashMap, VecDeque},
};

/// Snapshot of pool occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Resources ready for reuse.
    pub available: usize,

    /// Resources waiting for the device to finish with them.
    pub retired: usize,

    /// Resources created by the pool over its lifetime.
    pub created: usize,
}

#[derive(Debug)]
struct Queues<R> {
    retired: VecDeque<(u64, R)>,
    available: VecDeque<R>,
}

impl<R> Queues<R> {
    fn new() -> Self {
        Queues {
            retired: VecDeque::new(),
            available: VecDeque::new(),
        }
    }
}

enum Taken<R> {
    Ready(R),
    /// Nothing available, oldest retired entry waits for this value.
    Pending(u64),
    Empty,
}

/// Per-kind queues of retired and available resources shared by all pools.
#[derive(Debug)]
struct Recycler<K, R> {
    kinds: Mutex<HashMap<K, Queues<R>>>,
    created: AtomicUsize,
}

impl<K, R> Recycler<K, R>
where
    K: Copy + Eq + Hash,
{
    fn new() -> Self {
        Recycler {
            kinds: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Moves completed entries to available and pops one.
    /// Stops at the first retired entry that is not completed.
    fn take(&self, kind: K, completed: u64) -> Taken<R> {
        let mut kinds = self.kinds.lock();
        let queues = match kinds.get_mut(&kind) {
            Some(queues) => queues,
            None => return Taken::Empty,
        };

        while queues
            .retired
            .front()
            .map_or(false, |(value, _)| *value <= completed)
        {
            if let Some((_, resource)) = queues.retired.pop_front() {
                queues.available.push_back(resource);
            }
        }

        match queues.available.pop_front() {
            Some(resource) => Taken::Ready(resource),
            None => match queues.retired.front() {
                Some((value, _)) => Taken::Pending(*value),
                None => Taken::Empty,
            },
        }
    }

    /// Takes reusable resource consulting device only if cached completion is not enough.
    fn reclaim<T>(&self, kind: K, fence: &CompletionFence<T>) -> Result<Option<R>, FenceError>
    where
        T: TimelineDevice,
    {
        match self.take(kind, fence.last_completed()) {
            Taken::Ready(resource) => Ok(Some(resource)),
            Taken::Pending(value) if fence.is_completed(value)? => {
                match self.take(kind, fence.last_completed()) {
                    Taken::Ready(resource) => Ok(Some(resource)),
                    Taken::Pending(_) | Taken::Empty => Ok(None),
                }
            }
            Taken::Pending(_) | Taken::Empty => Ok(None),
        }
    }

    fn retire(&self, kind: K, value: u64, resource: R) {
        self.kinds
            .lock()
            .entry(kind)
            .or_insert_with(Queues::new)
            .retired
            .push_back((value, resource));
    }

    fn note_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> PoolStats {
        let kinds = self.kinds.lock();
        kinds.values().fold(
            PoolStats {
                created: self.created.load(Ordering::Relaxed),
                ..PoolStats::default()
            },
            |mut stats, queues| {
                stats.available += queues.available.len();
                stats.retired += queues.retired.len();
                stats
            },
        )
    }

    /// Removes every resource from the pool.
    /// Panics if some retired resource is still in use by the device.
    fn drain(&self, completed: u64) -> Vec<R> {
        let mut kinds = self.kinds.lock();
        let mut drained = Vec::new();
        for queues in kinds.values_mut() {
            drained.extend(queues.available.drain(..));
            for (value, resource) in queues.retired.drain(..) {
                assert!(
                    value <= completed,
                    "Pool cleanup while device still uses resource retired at {}",
                    value
                );
                drained.push(resource);
            }
        }
        drained
    }
}

/// Device view heap owned by a pool.
#[derive(Debug)]
pub struct ViewHeap<H> {
    raw: H,
    kind: ViewKind,
    capacity: u32,
}

impl<H> ViewHeap<H> {
    /// Returns reference to the device heap.
    pub fn raw(&self) -> &H {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut H {
        &mut self.raw
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Pool of view heaps keyed by kind and capacity.
#[derive(Debug)]
pub struct ViewHeapPool<H> {
    heaps: Recycler<(ViewKind, u32), ViewHeap<H>>,
}

impl<H> Default for ViewHeapPool<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ViewHeapPool<H> {
    pub fn new() -> Self {
        ViewHeapPool {
            heaps: Recycler::new(),
        }
    }

    /// Returns heap of `kind` with `capacity` slots.
    /// Reuses retired heap if the device finished with it, otherwise creates new one.
    ///
    /// # Safety
    ///
    /// * `device` must be the one all heaps of this pool were created with.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn acquire<T>(
        &self,
        device: &impl ViewHeapDevice<H>,
        fence: &CompletionFence<T>,
        kind: ViewKind,
        capacity: u32,
    ) -> Result<ViewHeap<H>, AllocationError>
    where
        T: TimelineDevice,
    {
        assert_ne!(capacity, 0, "View heap must have at least one slot");

        if let Some(mut heap) = self.heaps.reclaim((kind, capacity), fence)? {
            device.reset_view_heap(&mut heap.raw);
            return Ok(heap);
        }

        let raw = device.create_view_heap(kind, capacity)?;
        self.heaps.note_created();

        #[cfg(feature = "tracing")]
        tracing::debug!("Created {:?} view heap with {} slots", kind, capacity);

        Ok(ViewHeap {
            raw,
            kind,
            capacity,
        })
    }

    /// Returns heap to the pool.
    /// It will not be handed out again until the fence reaches `value`.
    pub fn retire(&self, heap: ViewHeap<H>, value: u64) {
        self.heaps.retire((heap.kind, heap.capacity), value, heap);
    }

    pub fn stats(&self) -> PoolStats {
        self.heaps.stats()
    }

    /// Destroys all heaps in the pool.
    ///
    /// # Safety
    ///
    /// * `device` must be the one all heaps of this pool were created with.
    ///
    /// # Panics
    ///
    /// If a retired heap is still in use by the device.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn cleanup<T>(
        &self,
        device: &impl ViewHeapDevice<H>,
        fence: &CompletionFence<T>,
    ) -> Result<(), FenceError>
    where
        T: TimelineDevice,
    {
        let completed = fence.completed_value()?;
        for heap in self.heaps.drain(completed) {
            device.destroy_view_heap(heap.raw);
        }
        Ok(())
    }
}

/// Which memory a page is allocated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PageUsage {
    /// Host-visible memory, persistently mapped.
    Upload,

    /// Device-local memory never touched by the host.
    Device,
}

/// Memory page owned by a pool.
#[derive(Debug)]
pub struct Page<M> {
    memory: M,
    size: u64,
    usage: PageUsage,
    ptr: Option<NonNull<u8>>,
    atom_mask: u64,
    oversized: bool,
}

unsafe impl<M> Sync for Page<M> where M: Sync {}
unsafe impl<M> Send for Page<M> where M: Send {}

impl<M> Page<M> {
    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> PageUsage {
        self.usage
    }

    /// Returns pointer to the mapped page, if it is host-visible.
    pub fn ptr(&self) -> Option<NonNull<u8>> {
        self.ptr
    }

    /// Returns mask for flush ranges or zero if memory is coherent.
    pub(crate) fn atom_mask(&self) -> u64 {
        self.atom_mask
    }

    pub fn is_oversized(&self) -> bool {
        self.oversized
    }
}

/// Pool of memory pages.
///
/// Standard pages have fixed size and are recycled.
/// Oversized pages are created for single large request and destroyed once
/// the device finishes with them.
#[derive(Debug)]
pub struct PagePool<M> {
    page_size: u64,
    upload_memory_type: MemoryType,
    device_memory_type: MemoryType,
    max_memory_allocation_size: u64,
    non_coherent_atom_mask: u64,
    allocations_remains: AtomicU32,
    pages: Recycler<PageUsage, Page<M>>,
    oversized: Mutex<VecDeque<(u64, Page<M>)>>,
}

impl<M> PagePool<M> {
    pub fn new(props: &DeviceProperties, page_size: u64) -> Self {
        assert!(
            props.non_coherent_atom_size.is_power_of_two(),
            "`non_coherent_atom_size` must be power of two"
        );
        assert!(
            page_size != 0 && page_size % props.non_coherent_atom_size == 0,
            "Page size must be non-zero multiple of `non_coherent_atom_size`"
        );
        assert!(
            page_size <= props.max_memory_allocation_size,
            "Page size exceeds `max_memory_allocation_size`"
        );
        assert!(
            props
                .upload_memory_type
                .props
                .contains(MemoryPropertyFlags::HOST_VISIBLE),
            "Upload memory type must be host-visible"
        );

        PagePool {
            page_size,
            upload_memory_type: props.upload_memory_type,
            device_memory_type: props.device_memory_type,
            max_memory_allocation_size: props.max_memory_allocation_size,
            non_coherent_atom_mask: props.non_coherent_atom_size - 1,
            allocations_remains: AtomicU32::new(props.max_memory_allocation_count),
            pages: Recycler::new(),
            oversized: Mutex::new(VecDeque::new()),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn stats(&self) -> PoolStats {
        self.pages.stats()
    }

    /// Returns number of oversized pages waiting for destruction.
    pub fn oversized_pending(&self) -> usize {
        self.oversized.lock().len()
    }

    /// Returns standard page with requested usage.
    ///
    /// # Safety
    ///
    /// * `device` must be the one all pages of this pool were allocated from.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn acquire<T>(
        &self,
        device: &impl MemoryDevice<M>,
        fence: &CompletionFence<T>,
        usage: PageUsage,
    ) -> Result<Page<M>, AllocationError>
    where
        T: TimelineDevice,
    {
        self.destroy_completed_oversized(device, fence.last_completed());

        if let Some(page) = self.pages.reclaim(usage, fence)? {
            return Ok(page);
        }

        let page = self.create_page(device, usage, self.page_size, false)?;
        self.pages.note_created();
        Ok(page)
    }

    /// Returns one-off page for a request larger than standard page size.
    ///
    /// # Safety
    ///
    /// * `device` must be the one all pages of this pool were allocated from.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn acquire_oversized<T>(
        &self,
        device: &impl MemoryDevice<M>,
        fence: &CompletionFence<T>,
        usage: PageUsage,
        size: u64,
    ) -> Result<Page<M>, AllocationError>
    where
        T: TimelineDevice,
    {
        self.destroy_completed_oversized(device, fence.last_completed());

        let size = align_up(size, self.non_coherent_atom_mask)
            .ok_or(AllocationError::OutOfDeviceMemory)?;

        if size > self.max_memory_allocation_size {
            return Err(AllocationError::OutOfDeviceMemory);
        }

        self.create_page(device, usage, size, true)
    }

    /// Returns page to the pool.
    /// It will not be reused or destroyed until the fence reaches `value`.
    pub fn retire(&self, page: Page<M>, value: u64) {
        if page.oversized {
            self.oversized.lock().push_back((value, page));
        } else {
            self.pages.retire(page.usage, value, page);
        }
    }

    /// Destroys all pages in the pool.
    ///
    /// # Safety
    ///
    /// * `device` must be the one all pages of this pool were allocated from.
    ///
    /// # Panics
    ///
    /// If a retired page is still in use by the device.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn cleanup<T>(
        &self,
        device: &impl MemoryDevice<M>,
        fence: &CompletionFence<T>,
    ) -> Result<(), FenceError>
    where
        T: TimelineDevice,
    {
        let completed = fence.completed_value()?;

        let oversized: Vec<_> = self.oversized.lock().drain(..).collect();
        for (value, page) in oversized {
            assert!(
                value <= completed,
                "Pool cleanup while device still uses page retired at {}",
                value
            );
            self.destroy_page(device, page);
        }

        for page in self.pages.drain(completed) {
            self.destroy_page(device, page);
        }
        Ok(())
    }

    unsafe fn create_page(
        &self,
        device: &impl MemoryDevice<M>,
        usage: PageUsage,
        size: u64,
        oversized: bool,
    ) -> Result<Page<M>, AllocationError> {
        if self
            .allocations_remains
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::error!("Memory object count limit reached");

            return Err(AllocationError::TooManyObjects);
        }

        let memory_type = match usage {
            PageUsage::Upload => self.upload_memory_type,
            PageUsage::Device => self.device_memory_type,
        };

        let mut memory = match device.allocate_memory(size, memory_type.index) {
            Ok(memory) => memory,
            Err(err) => {
                self.allocations_remains.fetch_add(1, Ordering::AcqRel);

                #[cfg(feature = "tracing")]
                tracing::error!("Failed to allocate {} byte page: {}", size, err);

                return Err(err.into());
            }
        };

        let ptr = match usage {
            PageUsage::Upload => match device.map_memory(&mut memory, 0, size) {
                Ok(ptr) => Some(ptr),
                Err(err) => {
                    device.deallocate_memory(memory);
                    self.allocations_remains.fetch_add(1, Ordering::AcqRel);

                    #[cfg(feature = "tracing")]
                    tracing::error!("Failed to map upload page: {}", err);

                    return Err(err.into());
                }
            },
            PageUsage::Device => None,
        };

        let atom_mask = if memory_type.props.contains(MemoryPropertyFlags::HOST_COHERENT) {
            0
        } else {
            self.non_coherent_atom_mask
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Allocated {} byte {:?} page from memory type {}",
            size,
            usage,
            memory_type.index
        );

        Ok(Page {
            memory,
            size,
            usage,
            ptr,
            atom_mask,
            oversized,
        })
    }

    unsafe fn destroy_completed_oversized(&self, device: &impl MemoryDevice<M>, completed: u64) {
        let completed_pages: Vec<_> = {
            let mut oversized = self.oversized.lock();
            let mut pages = Vec::new();
            while oversized
                .front()
                .map_or(false, |(value, _)| *value <= completed)
            {
                if let Some((_, page)) = oversized.pop_front() {
                    pages.push(page);
                }
            }
            pages
        };

        for page in completed_pages {
            self.destroy_page(device, page);
        }
    }

    unsafe fn destroy_page(&self, device: &impl MemoryDevice<M>, mut page: Page<M>) {
        if page.ptr.is_some() {
            device.unmap_memory(&mut page.memory);
        }
        device.deallocate_memory(page.memory);
        self.allocations_remains.fetch_add(1, Ordering::AcqRel);
    }
}
