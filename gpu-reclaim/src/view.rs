use {
    crate::{
        error::AllocationError,
        fence::CompletionFence,
        pool::{ViewHeap, ViewHeapPool},
        ring::RingDistributor,
        scope::Retire,
        slot_table::SlotTable,
    },
    core::{
        fmt,
        sync::atomic::{AtomicU32, Ordering},
    },
    gpu_reclaim_types::{TimelineDevice, ViewHeapDevice, ViewKind},
    std::sync::Arc,
};

/// Capacity covering `count` more slots and at least `step` more.
/// `u32::MAX` is reserved by slot tables.
fn grown_capacity(capacity: u32, count: u32, step: u32) -> Option<u32> {
    let needed = capacity.checked_add(count)?;
    let stepped = capacity.checked_add(step)?;
    Some(needed.max(stepped)).filter(|&grown| grown != u32::MAX)
}

static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(0);

/// Identifies view table a range belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(u32);

impl TableId {
    fn next() -> Self {
        TableId(NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Contiguous range of view slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewRange {
    pub start: u32,
    pub length: u32,
    pub table: TableId,
}

struct PersistentTable<H> {
    heap: ViewHeap<H>,
    slots: SlotTable<()>,
}

/// Long-lived view ranges freed individually in any order.
///
/// When the table is exhausted it grows into a larger heap.
/// Occupied ranges are copied to the same indices, so outstanding [`ViewRange`]s stay valid.
/// Replaced heaps are returned to the pool on [`retire_superseded`].
///
/// [`retire_superseded`]: #method.retire_superseded
pub struct ViewAllocator<H> {
    kind: ViewKind,
    id: TableId,
    growth: u32,
    pool: Arc<ViewHeapPool<H>>,
    table: Option<PersistentTable<H>>,
    superseded: Vec<ViewHeap<H>>,
}

impl<H> fmt::Debug for ViewAllocator<H> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ViewAllocator")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("slots", &self.table.as_ref().map(|table| &table.slots))
            .field("superseded", &self.superseded.len())
            .finish()
    }
}

impl<H> ViewAllocator<H> {
    /// Creates allocator whose table starts at `initial_capacity` slots
    /// and grows by at least as much.
    pub fn new(pool: Arc<ViewHeapPool<H>>, kind: ViewKind, initial_capacity: u32) -> Self {
        assert_ne!(initial_capacity, 0, "View table must have at least one slot");

        ViewAllocator {
            kind,
            id: TableId::next(),
            growth: initial_capacity,
            pool,
            table: None,
            superseded: Vec::new(),
        }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns current heap, if any range was requested yet.
    pub fn heap(&self) -> Option<&ViewHeap<H>> {
        self.table.as_ref().map(|table| &table.heap)
    }

    pub fn capacity(&self) -> u32 {
        self.table.as_ref().map_or(0, |table| table.slots.capacity())
    }

    pub fn occupied(&self) -> u32 {
        self.table.as_ref().map_or(0, |table| table.slots.occupied())
    }

    /// Returns number of replaced heaps not yet returned to the pool.
    pub fn superseded(&self) -> usize {
        self.superseded.len()
    }

    /// Allocates `count` contiguous view slots.
    ///
    /// # Safety
    ///
    /// * `device` must be the one pool heaps are created with.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn request<T>(
        &mut self,
        device: &impl ViewHeapDevice<H>,
        fence: &CompletionFence<T>,
        count: u32,
    ) -> Result<ViewRange, AllocationError>
    where
        T: TimelineDevice,
    {
        assert_ne!(count, 0, "Zero-length view range");

        let table = match &mut self.table {
            Some(table) => table,
            table => {
                let capacity = self.growth.max(count);
                let heap = self.pool.acquire(device, fence, self.kind, capacity)?;
                table.get_or_insert(PersistentTable {
                    heap,
                    slots: SlotTable::new(capacity),
                })
            }
        };

        let start = match table.slots.allocate(count) {
            Some(start) => start,
            None => {
                let capacity = table.slots.capacity();
                let new_capacity = grown_capacity(capacity, count, self.growth)
                    .ok_or(AllocationError::OutOfDeviceMemory)?;

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "Growing {:?} view table from {} to {} slots",
                    self.kind,
                    capacity,
                    new_capacity
                );

                let mut heap = self.pool.acquire(device, fence, self.kind, new_capacity)?;
                for (start, length) in table.slots.ranges() {
                    device.copy_views(table.heap.raw(), heap.raw_mut(), start, length);
                }
                table.slots.grow(new_capacity);
                self.superseded.push(std::mem::replace(&mut table.heap, heap));

                table
                    .slots
                    .allocate(count)
                    .expect("Grown table must have room for the request")
            }
        };

        Ok(ViewRange {
            start,
            length: count,
            table: self.id,
        })
    }

    /// Frees range previously returned by [`request`](#method.request).
    ///
    /// Device work recorded with the range may still be pending.
    /// It is up to caller to free ranges only after that work is complete.
    pub fn free(&mut self, range: ViewRange) {
        assert_eq!(
            range.table, self.id,
            "View range belongs to another table"
        );

        match &mut self.table {
            Some(table) => {
                debug_assert_eq!(table.slots.range_len(range.start), Some(range.length));
                table.slots.free(range.start);
            }
            None => panic!("View range freed before any was allocated"),
        }
    }

    /// Returns heaps replaced by growth to the pool.
    pub fn retire_superseded(&mut self, value: u64) {
        for heap in self.superseded.drain(..) {
            self.pool.retire(heap, value);
        }
    }

    /// Returns every heap to the pool.
    /// Any range still allocated becomes invalid.
    pub fn close(mut self, value: u64) {
        self.retire_superseded(value);
        if let Some(table) = self.table.take() {
            self.pool.retire(table.heap, value);
        }
    }
}

impl<H> Retire for ViewAllocator<H> {
    fn retire(&mut self, value: u64) {
        self.retire_superseded(value);
    }
}

struct TransientTable<H> {
    id: TableId,
    heap: ViewHeap<H>,
    ring: RingDistributor,
}

/// Per-submission view ranges for a single consumer.
///
/// Ranges are taken from a ring over the current heap and are never freed one by one.
/// Every heap touched since the last [`retire_everything_touched`] goes back to the pool
/// at once.
///
/// [`retire_everything_touched`]: #method.retire_everything_touched
pub struct TransientViews<H> {
    kind: ViewKind,
    capacity: u32,
    increment: u32,
    pool: Arc<ViewHeapPool<H>>,
    current: Option<TransientTable<H>>,
    retiring: Vec<ViewHeap<H>>,
}

impl<H> fmt::Debug for TransientViews<H> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("TransientViews")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("ring", &self.current.as_ref().map(|table| &table.ring))
            .field("retiring", &self.retiring.len())
            .finish()
    }
}

impl<H> TransientViews<H> {
    pub fn new(
        pool: Arc<ViewHeapPool<H>>,
        kind: ViewKind,
        initial_capacity: u32,
        increment: u32,
    ) -> Self {
        assert_ne!(initial_capacity, 0, "View table must have at least one slot");

        TransientViews {
            kind,
            capacity: initial_capacity,
            increment,
            pool,
            current: None,
            retiring: Vec::new(),
        }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Returns capacity of the heap used for next requests.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns heap the most recent ranges come from.
    pub fn heap(&self) -> Option<&ViewHeap<H>> {
        self.current.as_ref().map(|table| &table.heap)
    }

    /// Returns `true` if no heap was touched since the last retirement.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.retiring.is_empty()
    }

    /// Takes `count` slots from the current heap.
    /// Returns `None` if there is no current heap or it has no room.
    pub fn request(&mut self, count: u32) -> Option<ViewRange> {
        let table = self.current.as_mut()?;
        let range = table.ring.request_range(count)?;
        Some(ViewRange {
            start: range.start,
            length: range.length,
            table: table.id,
        })
    }

    /// Switches to a larger heap and takes `count` slots from it.
    /// Previous heap stays alive until retirement since recorded work may still use it.
    ///
    /// # Safety
    ///
    /// * `device` must be the one pool heaps are created with.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn grow_and_request<T>(
        &mut self,
        device: &impl ViewHeapDevice<H>,
        fence: &CompletionFence<T>,
        count: u32,
    ) -> Result<ViewRange, AllocationError>
    where
        T: TimelineDevice,
    {
        assert_ne!(count, 0, "Zero-length view range");

        let capacity = match &self.current {
            Some(_) => grown_capacity(self.capacity, count, self.increment)
                .ok_or(AllocationError::OutOfDeviceMemory)?,
            None => self.capacity.max(count),
        };

        let heap = self.pool.acquire(device, fence, self.kind, capacity)?;

        if let Some(previous) = self.current.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Transient {:?} views outgrew {} slots, switching to {}",
                self.kind,
                self.capacity,
                capacity
            );

            self.retiring.push(previous.heap);
        }

        self.capacity = capacity;
        let mut ring = RingDistributor::new(0, capacity);
        let range = ring
            .request_range(count)
            .expect("Fresh ring must have room for the request");

        let id = TableId::next();
        self.current = Some(TransientTable { id, heap, ring });

        Ok(ViewRange {
            start: range.start,
            length: range.length,
            table: id,
        })
    }

    /// Gives back the `count` most recent requests from the current heap.
    pub fn rollback(&mut self, count: usize) {
        match &mut self.current {
            Some(table) => table.ring.free_back_n(count),
            None => assert_eq!(count, 0, "Nothing to roll back"),
        }
    }

    /// Returns every heap touched since the previous call to the pool.
    pub fn retire_everything_touched(&mut self, value: u64) {
        for heap in self.retiring.drain(..) {
            self.pool.retire(heap, value);
        }
        if let Some(table) = self.current.take() {
            self.pool.retire(table.heap, value);
        }
    }
}

impl<H> Retire for TransientViews<H> {
    fn retire(&mut self, value: u64) {
        self.retire_everything_touched(value);
    }
}
