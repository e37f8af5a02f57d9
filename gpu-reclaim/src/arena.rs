use {
    crate::{
        align_down, align_up,
        error::{AllocationError, MapError},
        fence::CompletionFence,
        pool::{Page, PagePool, PageUsage},
        scope::Retire,
    },
    core::{fmt, ptr::NonNull},
    gpu_reclaim_types::{MappedMemoryRange, MemoryDevice, TimelineDevice},
    std::sync::Arc,
};

/// Sub-range of an arena page valid until the arena is retired.
#[derive(Clone, Debug)]
pub struct ScratchAllocation<M> {
    memory: M,
    offset: u64,
    size: u64,
    ptr: Option<NonNull<u8>>,
    atom_mask: u64,
}

unsafe impl<M> Sync for ScratchAllocation<M> where M: Sync {}
unsafe impl<M> Send for ScratchAllocation<M> where M: Send {}

impl<M> ScratchAllocation<M> {
    fn new(page: &Page<M>, offset: u64, size: u64) -> Self
    where
        M: Clone,
    {
        ScratchAllocation {
            memory: page.memory().clone(),
            offset,
            size,
            ptr: page
                .ptr()
                // Offset is within page, so the pointer stays within mapped region.
                .map(|ptr| unsafe { NonNull::new_unchecked(ptr.as_ptr().add(offset as usize)) }),
            atom_mask: page.atom_mask(),
        }
    }

    /// Returns page memory object this allocation lives in.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Returns offset in bytes from the start of the page.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns host pointer to the allocation if page is host-visible.
    pub fn ptr(&self) -> Option<NonNull<u8>> {
        self.ptr
    }

    /// Copies `data` to the start of the allocation and flushes it when memory is not coherent.
    ///
    /// # Safety
    ///
    /// * `device` must be the one page was allocated from.
    /// * No pending device work may read the allocation.
    pub unsafe fn write_bytes(
        &self,
        device: &impl MemoryDevice<M>,
        data: &[u8],
    ) -> Result<(), MapError> {
        assert!(
            data.len() as u64 <= self.size,
            "Writing {} bytes into {} byte allocation",
            data.len(),
            self.size
        );

        let ptr = self.ptr.ok_or(MapError::NonHostVisible)?;
        core::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());

        if self.atom_mask != 0 && !data.is_empty() {
            let start = align_down(self.offset, self.atom_mask);
            let end = align_up(self.offset + data.len() as u64, self.atom_mask)
                .ok_or(MapError::OutOfDeviceMemory)?;

            device.flush_memory_ranges(&[MappedMemoryRange {
                memory: &self.memory,
                offset: start,
                size: end - start,
            }])?;
        }
        Ok(())
    }
}

/// Bump allocator over pages taken from a [`PagePool`].
///
/// Everything allocated since the last [`discard_all`] stays valid until then,
/// after which all pages go back to the pool tagged with the fence value.
///
/// [`discard_all`]: #method.discard_all
pub struct ArenaAllocator<M> {
    pool: Arc<PagePool<M>>,
    usage: PageUsage,
    current: Option<Page<M>>,
    offset: u64,
    retiring: Vec<Page<M>>,
    oversized: Vec<Page<M>>,
}

impl<M> fmt::Debug for ArenaAllocator<M> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ArenaAllocator")
            .field("usage", &self.usage)
            .field("has_page", &self.current.is_some())
            .field("offset", &self.offset)
            .field("retiring", &self.retiring.len())
            .field("oversized", &self.oversized.len())
            .finish()
    }
}

impl<M> ArenaAllocator<M> {
    pub fn new(pool: Arc<PagePool<M>>, usage: PageUsage) -> Self {
        ArenaAllocator {
            pool,
            usage,
            current: None,
            offset: 0,
            retiring: Vec::new(),
            oversized: Vec::new(),
        }
    }

    pub fn usage(&self) -> PageUsage {
        self.usage
    }

    /// Returns `true` if arena holds no pages.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.retiring.is_empty() && self.oversized.is_empty()
    }

    /// Returns number of pages touched since last discard.
    pub fn pages_in_use(&self) -> usize {
        self.current.iter().count() + self.retiring.len() + self.oversized.len()
    }

    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// # Safety
    ///
    /// * `device` must be the one pool pages are allocated from.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, device, fence)))]
    pub unsafe fn allocate<T>(
        &mut self,
        device: &impl MemoryDevice<M>,
        fence: &CompletionFence<T>,
        size: u64,
        alignment: u64,
    ) -> Result<ScratchAllocation<M>, AllocationError>
    where
        M: Clone,
        T: TimelineDevice,
    {
        assert_ne!(size, 0, "Zero-sized scratch allocation");
        assert!(
            alignment.is_power_of_two(),
            "Alignment must be a power of two"
        );

        let align_mask = alignment - 1;
        let aligned_size = align_up(size, align_mask).ok_or(AllocationError::OutOfDeviceMemory)?;
        let page_size = self.pool.page_size();

        if aligned_size > page_size {
            let page = self
                .pool
                .acquire_oversized(device, fence, self.usage, aligned_size)?;
            let allocation = ScratchAllocation::new(&page, 0, aligned_size);
            self.oversized.push(page);
            return Ok(allocation);
        }

        let fits = |offset: u64| match align_up(offset, align_mask) {
            Some(start) => start <= page_size && aligned_size <= page_size - start,
            None => false,
        };

        let page = match &mut self.current {
            Some(page) if fits(self.offset) => page,
            current => {
                if let Some(full) = current.take() {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Arena page is full at offset {}", self.offset);

                    self.retiring.push(full);
                }
                let page = self.pool.acquire(device, fence, self.usage)?;
                self.offset = 0;
                current.get_or_insert(page)
            }
        };

        let offset = align_up(self.offset, align_mask).ok_or(AllocationError::OutOfDeviceMemory)?;
        self.offset = offset + aligned_size;

        Ok(ScratchAllocation::new(page, offset, aligned_size))
    }

    /// Returns every page touched since the last call to the pool.
    /// Pages become reusable once the fence reaches `value`.
    pub fn discard_all(&mut self, value: u64) {
        for page in self.retiring.drain(..) {
            self.pool.retire(page, value);
        }
        for page in self.oversized.drain(..) {
            self.pool.retire(page, value);
        }
        if let Some(page) = self.current.take() {
            self.pool.retire(page, value);
        }
        self.offset = 0;
    }
}

impl<M> Retire for ArenaAllocator<M> {
    fn retire(&mut self, value: u64) {
        self.discard_all(value);
    }
}

impl<M> Drop for ArenaAllocator<M> {
    fn drop(&mut self) {
        if !self.is_idle() {
            #[cfg(feature = "tracing")]
            tracing::error!(
                "Arena dropped with {} pages not retired. Their memory is leaked",
                self.pages_in_use()
            );
        }
    }
}
