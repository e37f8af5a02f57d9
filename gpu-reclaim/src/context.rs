use {
    crate::{
        arena::{ArenaAllocator, ScratchAllocation},
        config::Config,
        error::{AllocationError, FenceError},
        fence::CompletionFence,
        pool::{PagePool, PageUsage, ViewHeapPool},
        scope::Retire,
        view::{TransientViews, ViewAllocator, ViewRange},
    },
    core::fmt,
    gpu_reclaim_types::{DeviceProperties, MemoryDevice, TimelineDevice, ViewHeapDevice, ViewKind},
    std::sync::Arc,
};

/// Shared fence and pools for one device.
///
/// Cheap to clone, clones share everything.
/// Per-consumer allocators are created from it and return their resources to the shared pools.
pub struct ReclaimContext<H, M, T> {
    config: Config,
    fence: Arc<CompletionFence<T>>,
    view_heaps: Arc<ViewHeapPool<H>>,
    pages: Arc<PagePool<M>>,
}

impl<H, M, T> Clone for ReclaimContext<H, M, T> {
    fn clone(&self) -> Self {
        ReclaimContext {
            config: self.config,
            fence: self.fence.clone(),
            view_heaps: self.view_heaps.clone(),
            pages: self.pages.clone(),
        }
    }
}

impl<H, M, T> fmt::Debug for ReclaimContext<H, M, T>
where
    T: fmt::Debug,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ReclaimContext")
            .field("config", &self.config)
            .field("fence", &self.fence)
            .field("view_heaps", &self.view_heaps.stats())
            .field("pages", &self.pages.stats())
            .finish()
    }
}

impl<H, M, T> ReclaimContext<H, M, T>
where
    T: TimelineDevice,
{
    /// Creates context with fence over `timeline` and empty pools.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(timeline)))]
    pub fn new(config: Config, props: &DeviceProperties, timeline: T) -> Result<Self, FenceError> {
        #[cfg(feature = "tracing")]
        tracing::info!("{:#?}", config);

        Ok(ReclaimContext {
            fence: Arc::new(CompletionFence::new(timeline, config.streams)?),
            view_heaps: Arc::new(ViewHeapPool::new()),
            pages: Arc::new(PagePool::new(props, config.page_size)),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fence(&self) -> &Arc<CompletionFence<T>> {
        &self.fence
    }

    pub fn view_heaps(&self) -> &Arc<ViewHeapPool<H>> {
        &self.view_heaps
    }

    pub fn pages(&self) -> &Arc<PagePool<M>> {
        &self.pages
    }

    pub fn arena(&self, usage: PageUsage) -> ArenaAllocator<M> {
        ArenaAllocator::new(self.pages.clone(), usage)
    }

    pub fn view_allocator(&self, kind: ViewKind) -> ViewAllocator<H> {
        ViewAllocator::new(
            self.view_heaps.clone(),
            kind,
            self.config.view_table_capacity,
        )
    }

    pub fn transient_views(&self, kind: ViewKind) -> TransientViews<H> {
        TransientViews::new(
            self.view_heaps.clone(),
            kind,
            self.config.transient_view_capacity,
            self.config.transient_growth_increment,
        )
    }

    /// Creates bundle of transient allocators for one recording consumer.
    pub fn pass_resources(&self) -> PassResources<H, M> {
        PassResources {
            upload: self.arena(PageUsage::Upload),
            device: self.arena(PageUsage::Device),
            views: ViewKind::ALL
                .iter()
                .map(|&kind| self.transient_views(kind))
                .collect(),
        }
    }

    /// Destroys every pooled resource.
    ///
    /// # Safety
    ///
    /// * Devices must be the ones all pooled resources were created with.
    /// * Every allocator created from this context must already be retired.
    ///
    /// # Panics
    ///
    /// If a retired resource is still in use by the device.
    pub unsafe fn cleanup(
        &self,
        memory_device: &impl MemoryDevice<M>,
        view_device: &impl ViewHeapDevice<H>,
    ) -> Result<(), FenceError> {
        self.pages.cleanup(memory_device, &*self.fence)?;
        self.view_heaps.cleanup(view_device, &*self.fence)
    }
}

/// Transient resources used by one consumer while recording a submission.
pub struct PassResources<H, M> {
    upload: ArenaAllocator<M>,
    device: ArenaAllocator<M>,
    views: Vec<TransientViews<H>>,
}

impl<H, M> fmt::Debug for PassResources<H, M> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PassResources")
            .field("upload", &self.upload)
            .field("device", &self.device)
            .field("views", &self.views)
            .finish()
    }
}

impl<H, M> PassResources<H, M> {
    /// Allocates host-visible scratch memory.
    ///
    /// # Safety
    ///
    /// * `device` must be the one pool pages are allocated from.
    pub unsafe fn request_scratch<T>(
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
        self.upload.allocate(device, fence, size, alignment)
    }

    /// Allocates device-local scratch memory.
    ///
    /// # Safety
    ///
    /// * `device` must be the one pool pages are allocated from.
    pub unsafe fn request_device_scratch<T>(
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
        self.device.allocate(device, fence, size, alignment)
    }

    /// Allocates `count` contiguous transient view slots of `kind`.
    /// Switches to a larger heap once if the current one is full.
    ///
    /// # Safety
    ///
    /// * `device` must be the one pool heaps are created with.
    pub unsafe fn request_transient_view_range<T>(
        &mut self,
        device: &impl ViewHeapDevice<H>,
        fence: &CompletionFence<T>,
        kind: ViewKind,
        count: u32,
    ) -> Result<ViewRange, AllocationError>
    where
        T: TimelineDevice,
    {
        let views = self.views_mut(kind);
        match views.request(count) {
            Some(range) => Ok(range),
            None => views.grow_and_request(device, fence, count),
        }
    }

    pub fn views(&self, kind: ViewKind) -> &TransientViews<H> {
        &self.views[kind as usize]
    }

    pub fn views_mut(&mut self, kind: ViewKind) -> &mut TransientViews<H> {
        &mut self.views[kind as usize]
    }

    /// Returns `true` if nothing was touched since the last retirement.
    pub fn is_idle(&self) -> bool {
        self.upload.is_idle() && self.device.is_idle() && self.views.iter().all(|v| v.is_idle())
    }

    /// Returns every page and heap touched since the previous call to the pools.
    pub fn retire_everything_touched(&mut self, value: u64) {
        self.upload.discard_all(value);
        self.device.discard_all(value);
        for views in &mut self.views {
            views.retire_everything_touched(value);
        }
    }
}

impl<H, M> Retire for PassResources<H, M> {
    fn retire(&mut self, value: u64) {
        self.retire_everything_touched(value);
    }
}
