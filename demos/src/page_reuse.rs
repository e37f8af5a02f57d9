use {
    gpu_reclaim::{CompletionFence, Config, PageUsage, ReclaimContext},
    gpu_reclaim_mock::{MockDevice, MockTimeline},
    std::collections::VecDeque,
    tracing_subscriber::layer::SubscriberExt as _,
};

/// Submissions the device lags behind the host.
const LATENCY: usize = 3;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .pretty()
            .finish()
            .with(tracing_error::ErrorLayer::default()),
    )?;

    let device = MockDevice::new(MockDevice::non_coherent_properties());
    let context = ReclaimContext::<usize, usize, _>::new(
        Config::i_am_potato(),
        &device.props(),
        MockTimeline::default(),
    )?;
    let fence: &CompletionFence<_> = context.fence();

    let mut arena = context.arena(PageUsage::Upload);
    let mut in_flight = VecDeque::new();

    for submission in 0..100_000u64 {
        for _ in 0..64 {
            let allocation = unsafe { arena.allocate(&device, fence, 128, 16) }?;
            unsafe { allocation.write_bytes(&device, &submission.to_le_bytes()) }?;
        }

        let value = fence.signal(0);
        arena.discard_all(value);
        in_flight.push_back(value);

        if in_flight.len() > LATENCY {
            if let Some(done) = in_flight.pop_front() {
                fence.timeline().advance_to(done);
            }
        }
    }

    while let Some(done) = in_flight.pop_front() {
        fence.timeline().advance_to(done);
    }

    // Only pages referenced by submissions in flight at once are ever created.
    tracing::warn!(
        "Total memory object allocations: {}",
        device.counters().allocations
    );
    tracing::warn!("Page pool: {:?}", context.pages().stats());

    unsafe { context.cleanup(&device, &device) }?;

    Ok(())
}
