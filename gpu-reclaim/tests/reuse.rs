mod common;

use {
    gpu_reclaim::{PagePool, PageUsage, PoolStats, ViewHeapPool, ViewKind},
    gpu_reclaim_mock::MockDevice,
};

#[test]
fn view_heap_is_not_reused_before_fence_completes() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = ViewHeapPool::new();

    let heap = unsafe { pool.acquire(&device, &fence, ViewKind::Resource, 64) }.unwrap();
    let retired = *heap.raw();
    common::signal_up_to(&fence, 10);
    pool.retire(heap, 10);

    fence.timeline().advance_to(9);
    let mut held = Vec::new();
    for _ in 0..5 {
        let heap = unsafe { pool.acquire(&device, &fence, ViewKind::Resource, 64) }.unwrap();
        assert_ne!(*heap.raw(), retired);
        held.push(heap);
    }
    assert_eq!(device.counters().heaps_created, 6);

    fence.timeline().advance_to(10);
    let heap = unsafe { pool.acquire(&device, &fence, ViewKind::Resource, 64) }.unwrap();
    assert_eq!(*heap.raw(), retired);
    assert_eq!(device.heap_resets(retired), 1);
    assert_eq!(device.counters().heaps_created, 6);
}

#[test]
fn view_heaps_are_keyed_by_kind_and_capacity() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = ViewHeapPool::new();

    let heap = unsafe { pool.acquire(&device, &fence, ViewKind::Resource, 64) }.unwrap();
    let value = fence.signal(0);
    pool.retire(heap, value);
    fence.timeline().advance_to(value);

    let sampler = unsafe { pool.acquire(&device, &fence, ViewKind::Sampler, 64) }.unwrap();
    let smaller = unsafe { pool.acquire(&device, &fence, ViewKind::Resource, 32) }.unwrap();
    assert_eq!(sampler.kind(), ViewKind::Sampler);
    assert_eq!(smaller.capacity(), 32);
    assert_eq!(device.counters().heaps_created, 3);

    assert_eq!(
        pool.stats(),
        PoolStats {
            available: 0,
            retired: 1,
            created: 3,
        }
    );
}

#[test]
fn reused_heaps_come_back_in_retirement_order() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = ViewHeapPool::new();

    let first = unsafe { pool.acquire(&device, &fence, ViewKind::Sampler, 8) }.unwrap();
    let second = unsafe { pool.acquire(&device, &fence, ViewKind::Sampler, 8) }.unwrap();
    let (first_raw, second_raw) = (*first.raw(), *second.raw());

    let a = fence.signal(0);
    pool.retire(first, a);
    let b = fence.signal(0);
    pool.retire(second, b);

    fence.timeline().advance_to(b);
    let heap = unsafe { pool.acquire(&device, &fence, ViewKind::Sampler, 8) }.unwrap();
    assert_eq!(*heap.raw(), first_raw);
    let heap = unsafe { pool.acquire(&device, &fence, ViewKind::Sampler, 8) }.unwrap();
    assert_eq!(*heap.raw(), second_raw);
}

#[test]
fn page_is_not_reused_before_fence_completes() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = PagePool::new(&device.props(), 1024);

    let page = unsafe { pool.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
    let retired = *page.memory();
    assert!(page.ptr().is_some());
    common::signal_up_to(&fence, 10);
    pool.retire(page, 10);

    fence.timeline().advance_to(9);
    let mut held = Vec::new();
    for _ in 0..5 {
        let page = unsafe { pool.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
        assert_ne!(*page.memory(), retired);
        held.push(page);
    }

    fence.timeline().advance_to(10);
    let page = unsafe { pool.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
    assert_eq!(*page.memory(), retired);
    assert_eq!(device.counters().allocations, 6);
}

#[test]
fn device_pages_are_not_mapped() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = PagePool::new(&device.props(), 1024);

    let page = unsafe { pool.acquire(&device, &fence, PageUsage::Device) }.unwrap();
    assert!(page.ptr().is_none());
    assert_eq!(page.size(), 1024);
    assert_eq!(page.usage(), PageUsage::Device);
}

#[test]
fn oversized_page_is_destroyed_after_completion() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pool = PagePool::new(&device.props(), 1024);

    let page =
        unsafe { pool.acquire_oversized(&device, &fence, PageUsage::Upload, 5000) }.unwrap();
    assert!(page.is_oversized());
    assert!(page.size() >= 5000);
    let oversized = *page.memory();

    let value = fence.signal(0);
    pool.retire(page, value);
    assert_eq!(pool.oversized_pending(), 1);

    // Still in use, so nothing is destroyed.
    let standard = unsafe { pool.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
    assert_ne!(*standard.memory(), oversized);
    assert_eq!(device.counters().deallocations, 0);

    fence.timeline().advance_to(value);
    fence.completed_value().unwrap();
    let another = unsafe { pool.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
    assert_eq!(pool.oversized_pending(), 0);
    assert_eq!(device.counters().deallocations, 1);
    assert_eq!(device.live_allocations(), 2);
    assert_eq!(pool.stats().created, 2);

    drop((standard, another));
}

#[test]
fn cleanup_destroys_everything() {
    let device = MockDevice::default();
    let fence = common::fence();
    let heaps = ViewHeapPool::new();
    let pages = PagePool::new(&device.props(), 1024);

    let heap = unsafe { heaps.acquire(&device, &fence, ViewKind::Resource, 16) }.unwrap();
    let page = unsafe { pages.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
    let oversized =
        unsafe { pages.acquire_oversized(&device, &fence, PageUsage::Device, 4096) }.unwrap();

    let value = fence.signal(0);
    heaps.retire(heap, value);
    pages.retire(page, value);
    pages.retire(oversized, value);
    fence.timeline().advance_to(value);

    unsafe {
        pages.cleanup(&device, &fence).unwrap();
        heaps.cleanup(&device, &fence).unwrap();
    }

    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.live_heaps(), 0);
    assert_eq!(pages.stats().available + pages.stats().retired, 0);
}

#[test]
#[should_panic]
fn cleanup_panics_while_device_uses_pages() {
    let device = MockDevice::default();
    let fence = common::fence();
    let pages = PagePool::new(&device.props(), 1024);

    let page = unsafe { pages.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
    let value = fence.signal(0);
    pages.retire(page, value);

    unsafe { pages.cleanup(&device, &fence) }.unwrap();
}
