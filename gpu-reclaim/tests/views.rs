mod common;

use {
    gpu_reclaim::{
        AllocationError, Config, ReclaimContext, TransientViews, ViewAllocator, ViewHeapPool, ViewKind,
    },
    gpu_reclaim_mock::{MockDevice, MockTimeline},
    std::sync::Arc,
};

fn pool() -> Arc<ViewHeapPool<usize>> {
    Arc::new(ViewHeapPool::new())
}

#[test]
fn freed_ranges_are_reused_first_fit() {
    let device = MockDevice::default();
    let fence = common::fence();
    let mut views = ViewAllocator::new(pool(), ViewKind::Resource, 8);

    let a = unsafe { views.request(&device, &fence, 2) }.unwrap();
    let b = unsafe { views.request(&device, &fence, 2) }.unwrap();
    let c = unsafe { views.request(&device, &fence, 2) }.unwrap();
    assert_eq!((a.start, b.start, c.start), (0, 2, 4));
    assert_eq!(views.occupied(), 6);

    views.free(b);
    let d = unsafe { views.request(&device, &fence, 2) }.unwrap();
    assert_eq!(d.start, 2);
    assert_eq!(d.table, views.id());

    assert_eq!(views.capacity(), 8);
    assert_eq!(device.counters().heaps_created, 1);

    views.close(fence.signal(0));
}

#[test]
fn growth_keeps_ranges_and_contents() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = pool();
    let mut views = ViewAllocator::new(pool.clone(), ViewKind::Resource, 8);
    let id = views.id();

    let first = unsafe { views.request(&device, &fence, 3) }.unwrap();
    let second = unsafe { views.request(&device, &fence, 5) }.unwrap();
    assert_eq!((first.start, second.start), (0, 3));

    let old_heap = *views.heap().unwrap().raw();
    for slot in 0..8 {
        device.write_view(old_heap, slot, 100 + slot as u64);
    }

    views.free(first);
    let third = unsafe { views.request(&device, &fence, 4) }.unwrap();

    assert_eq!(views.capacity(), 16);
    assert_eq!(views.id(), id);
    assert_eq!(third.table, id);
    assert_eq!(third.start, 8);
    assert_eq!(views.superseded(), 1);

    let new_heap = *views.heap().unwrap().raw();
    assert_ne!(new_heap, old_heap);
    for slot in second.start..second.start + second.length {
        assert_eq!(device.read_view(new_heap, slot), 100 + slot as u64);
    }
    // Freed slots are not carried over.
    assert_eq!(device.read_view(new_heap, 0), 0);
    assert_eq!(device.counters().view_copies, 1);

    let value = fence.signal(0);
    views.retire_superseded(value);
    assert_eq!(views.superseded(), 0);
    assert_eq!(pool.stats().retired, 1);

    views.close(fence.signal(0));
    assert_eq!(pool.stats().retired, 2);
}

#[test]
fn growth_covers_large_requests() {
    let device = MockDevice::default();
    let fence = common::fence();
    let mut views = ViewAllocator::new(pool(), ViewKind::Sampler, 4);

    unsafe { views.request(&device, &fence, 4) }.unwrap();
    let range = unsafe { views.request(&device, &fence, 10) }.unwrap();
    assert_eq!(range.start, 4);
    assert_eq!(views.capacity(), 14);

    views.close(fence.signal(0));
}

#[test]
fn growth_past_slot_limit_fails() {
    let device = MockDevice::default();
    let fence = common::fence();
    let mut views = ViewAllocator::new(pool(), ViewKind::Resource, 4);

    let kept = unsafe { views.request(&device, &fence, 4) }.unwrap();
    assert_eq!(
        unsafe { views.request(&device, &fence, u32::MAX - 1) },
        Err(AllocationError::OutOfDeviceMemory)
    );
    assert_eq!(views.capacity(), 4);
    assert_eq!(views.superseded(), 0);
    assert_eq!(device.counters().heaps_created, 1);

    views.free(kept);
    views.close(fence.signal(0));
}

#[test]
#[should_panic]
fn freeing_foreign_range_panics() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = pool();
    let mut first = ViewAllocator::new(pool.clone(), ViewKind::Resource, 8);
    let mut second = ViewAllocator::new(pool, ViewKind::Resource, 8);

    let range = unsafe { first.request(&device, &fence, 1) }.unwrap();
    unsafe { second.request(&device, &fence, 1) }.unwrap();
    second.free(range);
}

#[test]
fn transient_views_grow_into_new_table() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = pool();
    let mut views = TransientViews::new(pool.clone(), ViewKind::Sampler, 8, 4);

    assert!(views.is_idle());
    assert_eq!(views.request(1), None);

    let first = unsafe { views.grow_and_request(&device, &fence, 3) }.unwrap();
    assert_eq!(first.start, 0);
    assert_eq!(views.capacity(), 8);

    let second = views.request(5).unwrap();
    assert_eq!((second.start, second.table), (3, first.table));
    assert_eq!(views.request(1), None);

    let third = unsafe { views.grow_and_request(&device, &fence, 1) }.unwrap();
    assert_eq!(views.capacity(), 12);
    assert_ne!(third.table, first.table);
    assert_eq!(third.start, 0);

    views.rollback(1);
    let whole = views.request(12).unwrap();
    assert_eq!((whole.start, whole.table), (0, third.table));

    let value = fence.signal(0);
    views.retire_everything_touched(value);
    assert!(views.is_idle());
    assert_eq!(pool.stats().retired, 2);
    assert_eq!(views.capacity(), 12);
}

#[test]
fn transient_growth_past_slot_limit_fails() {
    let device = MockDevice::default();
    let fence = common::fence();
    let mut views = TransientViews::new(pool(), ViewKind::Sampler, 8, 4);

    let first = unsafe { views.grow_and_request(&device, &fence, 3) }.unwrap();
    assert_eq!(
        unsafe { views.grow_and_request(&device, &fence, u32::MAX - 4) },
        Err(AllocationError::OutOfDeviceMemory)
    );
    assert_eq!(views.capacity(), 8);

    // Current table is still usable.
    let next = views.request(5).unwrap();
    assert_eq!((next.start, next.table), (3, first.table));

    views.retire_everything_touched(fence.signal(0));
}

#[test]
fn retired_transient_heap_is_reused_after_completion() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = pool();
    let mut views = TransientViews::new(pool.clone(), ViewKind::Resource, 16, 16);

    unsafe { views.grow_and_request(&device, &fence, 4) }.unwrap();
    let used = *views.heap().unwrap().raw();
    let value = fence.signal(0);
    views.retire_everything_touched(value);

    fence.timeline().advance_to(value);
    unsafe { views.grow_and_request(&device, &fence, 4) }.unwrap();
    assert_eq!(*views.heap().unwrap().raw(), used);
    assert_eq!(device.heap_resets(used), 1);

    views.retire_everything_touched(fence.signal(0));
}

#[test]
fn pass_resources_retry_once_on_exhaustion() {
    let device = MockDevice::default();
    let context = ReclaimContext::<usize, usize, _>::new(
        Config::i_am_potato(),
        &device.props(),
        MockTimeline::default(),
    )
    .unwrap();
    let fence = context.fence();
    let mut resources = context.pass_resources();

    let first = unsafe {
        resources.request_transient_view_range(&device, &**fence, ViewKind::Resource, 200)
    }
    .unwrap();
    assert_eq!(first.start, 0);

    let second = unsafe {
        resources.request_transient_view_range(&device, &**fence, ViewKind::Resource, 100)
    }
    .unwrap();
    assert_eq!(second.start, 0);
    assert_ne!(second.table, first.table);
    assert_eq!(resources.views(ViewKind::Resource).capacity(), 356);
    assert_eq!(resources.views(ViewKind::Sampler).capacity(), 256);

    resources.retire_everything_touched(fence.signal(0));
    assert!(resources.is_idle());
    assert!(format!("{:?}", context).starts_with("ReclaimContext"));
    assert_eq!(context.view_heaps().stats().retired, 2);
}
