use {
    gpu_reclaim::{CompletionFence, Config, ReclaimContext, RetireScope, ViewKind, WaitStatus},
    gpu_reclaim_mock::{MockDevice, MockQueue, MockTimeline},
    std::{collections::VecDeque, sync::Arc, thread, time::Duration},
    tracing_subscriber::layer::SubscriberExt as _,
};

const FRAMES: usize = 240;
const FRAMES_IN_FLIGHT: usize = 2;
const RECORDERS: usize = 3;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .pretty()
            .finish()
            .with(tracing_error::ErrorLayer::default()),
    )?;

    let device = MockDevice::default();
    let timeline = Arc::new(MockTimeline::default());
    let queue = MockQueue::spawn(timeline.clone(), Duration::from_millis(3));

    let config = Config {
        streams: RECORDERS,
        ..Config::i_am_potato()
    };
    let context = ReclaimContext::<usize, usize, _>::new(config, &device.props(), timeline)?;
    let fence: &CompletionFence<_> = context.fence();

    let mut recorders: Vec<_> = (0..RECORDERS).map(|_| context.pass_resources()).collect();
    let mut textures = context.view_allocator(ViewKind::Resource);
    let mut live_textures = VecDeque::new();
    let mut frame_values = Vec::with_capacity(FRAMES);

    for frame in 0..FRAMES {
        if frame >= FRAMES_IN_FLIGHT {
            let value = frame_values[frame - FRAMES_IN_FLIGHT];
            match fence.wait_until(value, Some(Duration::from_secs(1)))? {
                WaitStatus::Completed => {}
                WaitStatus::TimedOut => eyre::bail!("Frame {} is stuck on the device", frame),
            }
        }

        // Streaming textures come and go with persistent view ranges.
        if frame % 8 == 0 {
            let range = unsafe { textures.request(&device, fence, 1 + (frame % 5) as u32) }?;
            live_textures.push_back(range);
        }
        // Evicted long ago, no frame in flight references them.
        while live_textures.len() > 12 {
            if let Some(range) = live_textures.pop_front() {
                textures.free(range);
            }
        }

        let results: Vec<eyre::Result<u64>> = thread::scope(|scope| {
            let handles: Vec<_> = recorders
                .iter_mut()
                .enumerate()
                .map(|(stream, resources)| {
                    let device = &device;
                    let queue = &queue;
                    scope.spawn(move || -> eyre::Result<u64> {
                        let mut resources = RetireScope::new(resources, fence.last_signaled());

                        for draw in 0..16 {
                            let constants = unsafe {
                                resources.request_scratch(device, fence, 256 + draw * 64, 256)
                            }?;
                            unsafe { constants.write_bytes(device, &[frame as u8; 256]) }?;

                            unsafe {
                                resources.request_transient_view_range(
                                    device,
                                    fence,
                                    ViewKind::Resource,
                                    4,
                                )
                            }?;
                        }
                        unsafe {
                            resources.request_transient_view_range(device, fence, ViewKind::Sampler, 2)
                        }?;

                        let value = fence.signal(stream);
                        queue.submit(value);
                        resources.submitted(value);
                        Ok(value)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(eyre::eyre!("Recorder panicked")))
                })
                .collect()
        });

        let mut frame_value = 0;
        for result in results {
            frame_value = frame_value.max(result?);
        }
        frame_values.push(frame_value);

        // Superseded texture heaps may still be bound by this frame.
        textures.retire_superseded(frame_value);
    }

    if let Some(&last) = frame_values.last() {
        fence.wait_until(last, None)?;
    }

    for range in live_textures.drain(..) {
        textures.free(range);
    }
    textures.close(fence.last_signaled());

    tracing::warn!("Page pool: {:?}", context.pages().stats());
    tracing::warn!("View heap pool: {:?}", context.view_heaps().stats());
    tracing::warn!("Device calls: {:?}", device.counters());

    drop(recorders);
    unsafe { context.cleanup(&device, &device) }?;
    drop(queue);

    tracing::warn!(
        "Live device objects after cleanup: {} pages, {} heaps",
        device.live_allocations(),
        device.live_heaps()
    );

    Ok(())
}
