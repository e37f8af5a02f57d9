mod common;

use {
    gpu_reclaim::{CompletionFence, PagePool, PageUsage, ViewHeapPool, ViewKind},
    gpu_reclaim_mock::{MockDevice, MockQueue, MockTimeline},
    std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    },
};

const THREADS: usize = 8;
const PER_THREAD: usize = 8;

#[test]
fn concurrent_acquires_hand_out_distinct_resources() {
    let device = MockDevice::default();
    let fence = common::fence();
    let heaps = ViewHeapPool::new();
    let pages = PagePool::new(&device.props(), 4096);

    // Seed both pools with reusable resources.
    let seeded = fence.signal(0);
    for _ in 0..16 {
        let heap = unsafe { heaps.acquire(&device, &fence, ViewKind::Resource, 32) }.unwrap();
        heaps.retire(heap, seeded);
        let page = unsafe { pages.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
        pages.retire(page, seeded);
    }
    fence.timeline().advance_to(seeded);

    let acquired: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    let mut held = Vec::new();
                    for _ in 0..PER_THREAD {
                        let heap =
                            unsafe { heaps.acquire(&device, &fence, ViewKind::Resource, 32) }
                                .unwrap();
                        let page =
                            unsafe { pages.acquire(&device, &fence, PageUsage::Upload) }.unwrap();
                        held.push((heap, page));
                    }
                    held
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });

    let heap_handles: HashSet<_> = acquired.iter().map(|(heap, _)| *heap.raw()).collect();
    let page_handles: HashSet<_> = acquired.iter().map(|(_, page)| *page.memory()).collect();
    assert_eq!(heap_handles.len(), THREADS * PER_THREAD);
    assert_eq!(page_handles.len(), THREADS * PER_THREAD);

    assert_eq!(heaps.stats().created, THREADS * PER_THREAD);
    assert_eq!(pages.stats().created, THREADS * PER_THREAD);

    let value = fence.signal(0);
    for (heap, page) in acquired {
        heaps.retire(heap, value);
        pages.retire(page, value);
    }
    assert_eq!(heaps.stats().retired, THREADS * PER_THREAD);
}

#[test]
fn listeners_fire_once_under_concurrent_completion() {
    const VALUES: u64 = 200;

    let fence = common::fence();
    common::signal_up_to(&fence, VALUES);
    let fired = Arc::new(AtomicUsize::new(0));

    thread::scope(|scope| {
        scope.spawn(|| {
            for value in 1..=VALUES {
                let fired = fired.clone();
                fence.on_completed(value, move |completed| {
                    assert!(completed >= value);
                    fired.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        scope.spawn(|| {
            for value in 1..=VALUES {
                fence.timeline().advance_to(value);
                fence.completed_value().unwrap();
            }
        });
    });

    fence.completed_value().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), VALUES as usize);
}

#[test]
fn recorders_on_separate_streams_with_async_device() {
    let device = MockDevice::default();
    let timeline = Arc::new(MockTimeline::default());
    let queue = MockQueue::spawn(timeline.clone(), Duration::from_micros(200));
    let fence = CompletionFence::new(timeline, 4).unwrap();
    let pages = Arc::new(PagePool::new(&device.props(), 2048));

    thread::scope(|scope| {
        for stream in 0..4 {
            let (device, fence, queue, pages) = (&device, &fence, &queue, pages.clone());
            scope.spawn(move || {
                let mut arena = gpu_reclaim::ArenaAllocator::new(pages, PageUsage::Upload);
                let mut values = Vec::new();
                for submission in 0..50u64 {
                    if values.len() >= 2 {
                        fence.wait_until(values[values.len() - 2], None).unwrap();
                    }
                    for _ in 0..4 {
                        let allocation = unsafe { arena.allocate(device, fence, 500, 4) }.unwrap();
                        unsafe { allocation.write_bytes(device, &submission.to_le_bytes()) }
                            .unwrap();
                    }
                    let value = fence.signal(stream);
                    queue.submit(value);
                    arena.discard_all(value);
                    values.push(value);
                }
            });
        }
    });

    let last = fence.last_signaled();
    assert_eq!(last, 200);
    fence.wait_until(last, None).unwrap();

    // Pages are shared across streams and recycled instead of growing without bound.
    assert!(pages.stats().created <= 64);

    unsafe { pages.cleanup(&device, &fence) }.unwrap();
    assert_eq!(device.live_allocations(), 0);
    drop(queue);
}
