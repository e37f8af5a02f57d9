use {
    gpu_reclaim_types::{
        DeviceLost, DeviceMapError, DeviceProperties, MappedMemoryRange, MemoryDevice,
        MemoryPropertyFlags, MemoryType, OutOfMemory, TimelineDevice, ViewHeapDevice, ViewKind,
    },
    parking_lot::{Condvar, Mutex},
    slab::Slab,
    std::{
        cell::UnsafeCell,
        convert::TryFrom as _,
        ptr::NonNull,
        sync::{
            atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
            mpsc, Arc,
        },
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

struct MemoryMapping {
    content: Box<[UnsafeCell<u8>]>,
}

struct MockMemory {
    memory_type: u32,
    size: u64,
    mapped: Option<MemoryMapping>,
}

struct MockHeap {
    kind: ViewKind,
    views: Box<[u64]>,
    resets: u32,
}

/// Counters of device calls made by pools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MockCounters {
    pub allocations: u64,
    pub deallocations: u64,
    pub flushes: u64,
    pub heaps_created: u64,
    pub heaps_destroyed: u64,
    pub heap_resets: u64,
    pub view_copies: u64,
}

#[derive(Default)]
struct AtomicCounters {
    allocations: AtomicU64,
    deallocations: AtomicU64,
    flushes: AtomicU64,
    heaps_created: AtomicU64,
    heaps_destroyed: AtomicU64,
    heap_resets: AtomicU64,
    view_copies: AtomicU64,
}

/// Host-memory stand-in for a device with memory pages and view heaps.
///
/// Safe to share between threads.
/// Mapped pages are backed by host memory so written bytes can be inspected.
pub struct MockDevice {
    props: DeviceProperties,
    allocations_remains: AtomicU32,
    allocations: Mutex<Slab<MockMemory>>,
    heaps: Mutex<Slab<MockHeap>>,
    failures: AtomicU32,
    counters: AtomicCounters,
}

impl Default for MockDevice {
    fn default() -> Self {
        MockDevice::new(MockDevice::coherent_properties())
    }
}

impl MockDevice {
    pub fn new(props: DeviceProperties) -> Self {
        MockDevice {
            allocations_remains: AtomicU32::new(props.max_memory_allocation_count),
            props,
            allocations: Mutex::new(Slab::new()),
            heaps: Mutex::new(Slab::new()),
            failures: AtomicU32::new(0),
            counters: AtomicCounters::default(),
        }
    }

    /// Properties with host-coherent upload memory.
    pub fn coherent_properties() -> DeviceProperties {
        DeviceProperties {
            upload_memory_type: MemoryType {
                index: 1,
                props: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
            },
            device_memory_type: MemoryType {
                index: 0,
                props: MemoryPropertyFlags::DEVICE_LOCAL,
            },
            max_memory_allocation_count: 4096,
            max_memory_allocation_size: 1 << 30,
            non_coherent_atom_size: 64,
        }
    }

    /// Properties with upload memory that must be flushed.
    pub fn non_coherent_properties() -> DeviceProperties {
        DeviceProperties {
            upload_memory_type: MemoryType {
                index: 1,
                props: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED,
            },
            ..MockDevice::coherent_properties()
        }
    }

    pub fn props(&self) -> DeviceProperties {
        self.props
    }

    /// Makes next `count` page allocations and heap creations fail with out of device memory.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::Release);
    }

    pub fn counters(&self) -> MockCounters {
        let c = &self.counters;
        MockCounters {
            allocations: c.allocations.load(Ordering::Acquire),
            deallocations: c.deallocations.load(Ordering::Acquire),
            flushes: c.flushes.load(Ordering::Acquire),
            heaps_created: c.heaps_created.load(Ordering::Acquire),
            heaps_destroyed: c.heaps_destroyed.load(Ordering::Acquire),
            heap_resets: c.heap_resets.load(Ordering::Acquire),
            view_copies: c.view_copies.load(Ordering::Acquire),
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn live_heaps(&self) -> usize {
        self.heaps.lock().len()
    }

    /// Reads bytes written to mapped page.
    pub fn read_mapped(&self, memory: usize, offset: u64, len: usize) -> Vec<u8> {
        let allocations = self.allocations.lock();
        let memory = allocations.get(memory).expect("Non-existing memory object");
        let mapped = memory.mapped.as_ref().expect("Not mapped");
        mapped.content[offset as usize..][..len]
            .iter()
            // Nothing writes concurrently while tests inspect pages.
            .map(|byte| unsafe { *byte.get() })
            .collect()
    }

    /// Writes view description into heap slot.
    pub fn write_view(&self, heap: usize, slot: u32, view: u64) {
        let mut heaps = self.heaps.lock();
        let heap = heaps.get_mut(heap).expect("Non-existing view heap");
        heap.views[slot as usize] = view;
    }

    pub fn read_view(&self, heap: usize, slot: u32) -> u64 {
        let heaps = self.heaps.lock();
        let heap = heaps.get(heap).expect("Non-existing view heap");
        heap.views[slot as usize]
    }

    /// Returns how many times heap was reset for reuse.
    pub fn heap_resets(&self, heap: usize) -> u32 {
        let heaps = self.heaps.lock();
        heaps.get(heap).expect("Non-existing view heap").resets
    }

    fn injected_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_ok()
    }

    fn memory_type_props(&self, memory_type: u32) -> MemoryPropertyFlags {
        if memory_type == self.props.upload_memory_type.index {
            self.props.upload_memory_type.props
        } else if memory_type == self.props.device_memory_type.index {
            self.props.device_memory_type.props
        } else {
            panic!("Unknown memory type {}", memory_type)
        }
    }
}

impl MemoryDevice<usize> for MockDevice {
    #[tracing::instrument(skip(self))]
    unsafe fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<usize, OutOfMemory> {
        assert!(
            size <= self.props.max_memory_allocation_size,
            "Allocation size exceeds limit"
        );
        self.memory_type_props(memory_type);

        if self.injected_failure() {
            tracing::warn!("Injected allocation failure");
            return Err(OutOfMemory::OutOfDeviceMemory);
        }

        self.allocations_remains
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .expect("Pool should not try to allocate too many objects");

        tracing::info!("Memory object allocated");
        self.counters.allocations.fetch_add(1, Ordering::AcqRel);

        Ok(self.allocations.lock().insert(MockMemory {
            memory_type,
            size,
            mapped: None,
        }))
    }

    #[tracing::instrument(skip(self))]
    unsafe fn deallocate_memory(&self, memory: usize) {
        let memory = self.allocations.lock().remove(memory);
        assert!(memory.mapped.is_none(), "Deallocating mapped memory");

        self.allocations_remains.fetch_add(1, Ordering::AcqRel);
        tracing::info!("Memory object deallocated");
        self.counters.deallocations.fetch_add(1, Ordering::AcqRel);
    }

    #[tracing::instrument(skip(self))]
    unsafe fn map_memory(
        &self,
        memory: &mut usize,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DeviceMapError> {
        let mut allocations = self.allocations.lock();
        let memory = allocations
            .get_mut(*memory)
            .expect("Non-existing memory object");

        assert!(
            self.memory_type_props(memory.memory_type)
                .contains(MemoryPropertyFlags::HOST_VISIBLE),
            "Attempt to map non-host-visible memory"
        );
        assert!(memory.mapped.is_none(), "Already mapped");
        assert_eq!(offset, 0, "Pages are mapped whole");
        assert_eq!(size, memory.size, "Pages are mapped whole");

        let size_usize = usize::try_from(size).map_err(|_| DeviceMapError::OutOfHostMemory)?;
        let mapping = memory.mapped.get_or_insert(MemoryMapping {
            content: (0..size_usize).map(|_| UnsafeCell::new(0)).collect(),
        });

        tracing::info!("Memory object mapped");
        Ok(NonNull::new_unchecked(mapping.content.as_ptr() as *mut u8))
    }

    unsafe fn unmap_memory(&self, memory: &mut usize) {
        let mut allocations = self.allocations.lock();
        let memory = allocations
            .get_mut(*memory)
            .expect("Non-existing memory object");
        assert!(memory.mapped.take().is_some(), "Was not mapped");
    }

    unsafe fn flush_memory_ranges(
        &self,
        ranges: &[MappedMemoryRange<'_, usize>],
    ) -> Result<(), OutOfMemory> {
        let allocations = self.allocations.lock();
        for range in ranges {
            let memory = allocations
                .get(*range.memory)
                .expect("Non-existing memory object");

            assert!(memory.mapped.is_some(), "Not mapped");

            if self
                .memory_type_props(memory.memory_type)
                .contains(MemoryPropertyFlags::HOST_COHERENT)
            {
                tracing::warn!("Flushing host-coherent memory");
            }

            assert!(
                range.offset <= memory.size && range.size <= memory.size - range.offset,
                "Range is out of mapped region"
            );
            assert_eq!(
                range.offset % self.props.non_coherent_atom_size,
                0,
                "`offset` must be a multiple of `non_coherent_atom_size`"
            );
            assert!(
                range.size % self.props.non_coherent_atom_size == 0
                    || range.offset + range.size == memory.size,
                "`size` must either be a multiple of `non_coherent_atom_size`, or `offset + size` must equal the size of memory"
            );

            self.counters.flushes.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl ViewHeapDevice<usize> for MockDevice {
    #[tracing::instrument(skip(self))]
    unsafe fn create_view_heap(&self, kind: ViewKind, capacity: u32) -> Result<usize, OutOfMemory> {
        assert_ne!(capacity, 0, "View heap must have at least one slot");

        if self.injected_failure() {
            tracing::warn!("Injected view heap failure");
            return Err(OutOfMemory::OutOfDeviceMemory);
        }

        tracing::info!("View heap created");
        self.counters.heaps_created.fetch_add(1, Ordering::AcqRel);

        Ok(self.heaps.lock().insert(MockHeap {
            kind,
            views: vec![0; capacity as usize].into_boxed_slice(),
            resets: 0,
        }))
    }

    unsafe fn reset_view_heap(&self, heap: &mut usize) {
        let mut heaps = self.heaps.lock();
        let heap = heaps.get_mut(*heap).expect("Non-existing view heap");
        heap.views.iter_mut().for_each(|view| *view = 0);
        heap.resets += 1;
        self.counters.heap_resets.fetch_add(1, Ordering::AcqRel);
    }

    unsafe fn copy_views(&self, src: &usize, dst: &mut usize, start: u32, count: u32) {
        let mut heaps = self.heaps.lock();
        let (start, end) = (start as usize, (start + count) as usize);

        let src = heaps.get(*src).expect("Non-existing view heap");
        let kind = src.kind;
        let views = src.views[start..end].to_vec();

        let dst = heaps.get_mut(*dst).expect("Non-existing view heap");
        assert_eq!(dst.kind, kind, "Copying views between heaps of different kinds");
        dst.views[start..end].copy_from_slice(&views);

        self.counters.view_copies.fetch_add(1, Ordering::AcqRel);
    }

    #[tracing::instrument(skip(self))]
    unsafe fn destroy_view_heap(&self, heap: usize) {
        self.heaps.lock().remove(heap);
        tracing::info!("View heap destroyed");
        self.counters.heaps_destroyed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Timeline advanced by hand or by [`MockQueue`].
#[derive(Debug, Default)]
pub struct MockTimeline {
    completed: Mutex<u64>,
    progress: Condvar,
    lost: AtomicBool,
}

impl MockTimeline {
    pub fn new(initial: u64) -> Self {
        MockTimeline {
            completed: Mutex::new(initial),
            progress: Condvar::new(),
            lost: AtomicBool::new(false),
        }
    }

    /// Marks all work up to `value` as finished.
    pub fn advance_to(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
            self.progress.notify_all();
        }
    }

    /// Makes every subsequent query fail with device lost.
    pub fn lose_device(&self) {
        let _completed = self.completed.lock();
        self.lost.store(true, Ordering::Release);
        self.progress.notify_all();
    }
}

impl TimelineDevice for MockTimeline {
    fn completed_value(&self) -> Result<u64, DeviceLost> {
        if self.lost.load(Ordering::Acquire) {
            return Err(DeviceLost);
        }
        Ok(*self.completed.lock())
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceLost> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut completed = self.completed.lock();
        loop {
            if self.lost.load(Ordering::Acquire) {
                return Err(DeviceLost);
            }
            if *completed >= value {
                return Ok(true);
            }
            match deadline {
                None => self.progress.wait(&mut completed),
                Some(deadline) => {
                    if self.progress.wait_until(&mut completed, deadline).timed_out() {
                        return Ok(*completed >= value);
                    }
                }
            }
        }
    }
}

/// Background thread that finishes submitted values in order after fixed latency.
pub struct MockQueue {
    sender: Mutex<Option<mpsc::Sender<u64>>>,
    worker: Option<JoinHandle<()>>,
}

impl MockQueue {
    pub fn spawn(timeline: Arc<MockTimeline>, latency: Duration) -> Self {
        let (sender, receiver) = mpsc::channel::<u64>();
        let worker = thread::spawn(move || {
            for value in receiver {
                thread::sleep(latency);
                tracing::trace!("Device finished {}", value);
                timeline.advance_to(value);
            }
        });

        MockQueue {
            sender: Mutex::new(Some(sender)),
            worker: Some(worker),
        }
    }

    /// Queues work that signals `value` once finished.
    pub fn submit(&self, value: u64) {
        if let Some(sender) = &*self.sender.lock() {
            // Worker exits only after sender is dropped.
            let _ = sender.send(value);
        }
    }
}

impl Drop for MockQueue {
    fn drop(&mut self) {
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
