use {
    crate::error::FenceError,
    core::{
        fmt,
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    },
    gpu_reclaim_types::TimelineDevice,
    parking_lot::Mutex,
    std::mem,
};

/// Outcome of [`CompletionFence::wait_until`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    Completed,
    TimedOut,
}

type Listener = Box<dyn FnOnce(u64) + Send>;

/// Monotonic record of submitted and completed device work.
///
/// Every submission is tagged with a value from [`signal`].
/// Completed value is cached on the host and only ever taken from the device,
/// so it never runs ahead of the device and never decreases.
///
/// [`signal`]: #method.signal
pub struct CompletionFence<T> {
    timeline: T,
    next_value: AtomicU64,
    stream_values: Box<[AtomicU64]>,
    completed: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl<T> fmt::Debug for CompletionFence<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("CompletionFence")
            .field("timeline", &self.timeline)
            .field("last_signaled", &self.next_value.load(Ordering::Acquire))
            .field("last_completed", &self.completed.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> CompletionFence<T>
where
    T: TimelineDevice,
{
    /// Creates fence over device timeline with `streams` independent execution streams.
    ///
    /// Signaled values continue from the value the timeline already reached.
    pub fn new(timeline: T, streams: usize) -> Result<Self, FenceError> {
        assert_ne!(streams, 0, "Fence must track at least one stream");

        let initial = timeline.completed_value()?;

        Ok(CompletionFence {
            timeline,
            next_value: AtomicU64::new(initial),
            stream_values: (0..streams).map(|_| AtomicU64::new(initial)).collect(),
            completed: AtomicU64::new(initial),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn timeline(&self) -> &T {
        &self.timeline
    }

    pub fn streams(&self) -> usize {
        self.stream_values.len()
    }

    /// Allocates next value for work submitted on `stream`.
    /// The device must be told to advance the timeline to this value once the work finishes.
    pub fn signal(&self, stream: usize) -> u64 {
        let value = self.next_value.fetch_add(1, Ordering::AcqRel) + 1;
        self.stream_values[stream].store(value, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::trace!("Stream {} signals {}", stream, value);

        value
    }

    /// Returns value most recently signaled on `stream`.
    pub fn stream_value(&self, stream: usize) -> u64 {
        self.stream_values[stream].load(Ordering::Acquire)
    }

    /// Returns highest value handed out by [`signal`](#method.signal).
    pub fn last_signaled(&self) -> u64 {
        self.next_value.load(Ordering::Acquire)
    }

    /// Returns cached completed value without querying the device.
    pub fn last_completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Queries the device and returns up to date completed value.
    pub fn completed_value(&self) -> Result<u64, FenceError> {
        let reported = self.timeline.completed_value()?;
        Ok(self.advance(reported))
    }

    /// Checks whether work tagged with `value` is finished.
    /// Queries the device only if the cached value is not enough.
    pub fn is_completed(&self, value: u64) -> Result<bool, FenceError> {
        if value <= self.last_completed() {
            return Ok(true);
        }
        Ok(value <= self.completed_value()?)
    }

    /// Blocks until work tagged with `value` is finished or `timeout` elapses.
    pub fn wait_until(
        &self,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<WaitStatus, FenceError> {
        if self.is_completed(value)? {
            return Ok(WaitStatus::Completed);
        }

        debug_assert!(
            value <= self.last_signaled(),
            "Waiting for value {} that was never signaled",
            value
        );

        #[cfg(feature = "tracing")]
        tracing::debug!("Waiting for device to reach {}", value);

        if self.timeline.wait_value(value, timeout)? {
            let reported = self.timeline.completed_value()?;
            self.advance(reported.max(value));
            Ok(WaitStatus::Completed)
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Timed out waiting for device to reach {}", value);

            Ok(WaitStatus::TimedOut)
        }
    }

    /// Records completion reported by device callback.
    /// `value` must come from the device timeline.
    pub fn notify_completed(&self, value: u64) {
        self.advance(value);
    }

    /// Runs `listener` once `value` is completed.
    ///
    /// Runs immediately if it already is.
    /// Otherwise runs on whichever thread observes completion, outside of internal locks.
    pub fn on_completed(&self, value: u64, listener: impl FnOnce(u64) + Send + 'static) {
        let completed = self.last_completed();
        if value <= completed {
            listener(completed);
            return;
        }

        self.listeners.lock().push((value, Box::new(listener)));

        // Completion may have been observed between the check and the push.
        let completed = self.last_completed();
        if value <= completed {
            self.dispatch(completed);
        }
    }

    fn advance(&self, reported: u64) -> u64 {
        let previous = self.completed.fetch_max(reported, Ordering::AcqRel);
        if reported > previous {
            #[cfg(feature = "tracing")]
            tracing::trace!("Completed value advanced from {} to {}", previous, reported);

            self.dispatch(reported);
            reported
        } else {
            previous
        }
    }

    fn dispatch(&self, completed: u64) {
        let ready = {
            let mut listeners = self.listeners.lock();
            if listeners.is_empty() {
                return;
            }
            let (ready, pending): (Vec<_>, Vec<_>) = mem::take(&mut *listeners)
                .into_iter()
                .partition(|(value, _)| *value <= completed);
            *listeners = pending;
            ready
        };

        for (_, listener) in ready {
            listener(completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        gpu_reclaim_types::DeviceLost,
        std::sync::{
            atomic::{AtomicBool, AtomicUsize},
            Arc,
        },
    };

    #[derive(Debug, Default)]
    struct ManualTimeline {
        value: AtomicU64,
        lost: AtomicBool,
    }

    impl ManualTimeline {
        fn set(&self, value: u64) {
            self.value.store(value, Ordering::Release);
        }
    }

    impl TimelineDevice for ManualTimeline {
        fn completed_value(&self) -> Result<u64, DeviceLost> {
            if self.lost.load(Ordering::Acquire) {
                return Err(DeviceLost);
            }
            Ok(self.value.load(Ordering::Acquire))
        }

        fn wait_value(&self, value: u64, _timeout: Option<Duration>) -> Result<bool, DeviceLost> {
            Ok(self.completed_value()? >= value)
        }
    }

    #[test]
    fn debug_shows_signaled_and_completed_values() {
        let fence = CompletionFence::new(ManualTimeline::default(), 1).unwrap();
        fence.signal(0);
        fence.signal(0);
        fence.timeline().set(1);
        fence.completed_value().unwrap();

        let output = format!("{:?}", fence);
        assert!(output.starts_with("CompletionFence"));
        assert!(output.contains("last_signaled: 2"));
        assert!(output.contains("last_completed: 1"));
    }

    #[test]
    fn signals_are_strictly_increasing_across_streams() {
        let fence = CompletionFence::new(ManualTimeline::default(), 2).unwrap();
        let a = fence.signal(0);
        let b = fence.signal(1);
        let c = fence.signal(0);
        assert!(a < b && b < c);
        assert_eq!(fence.stream_value(0), c);
        assert_eq!(fence.stream_value(1), b);
        assert_eq!(fence.last_signaled(), c);
    }

    #[test]
    fn starts_from_timeline_value() {
        let timeline = ManualTimeline::default();
        timeline.set(41);
        let fence = CompletionFence::new(timeline, 1).unwrap();
        assert_eq!(fence.last_completed(), 41);
        assert_eq!(fence.signal(0), 42);
    }

    #[test]
    fn cached_value_is_lazy() {
        let fence = CompletionFence::new(ManualTimeline::default(), 1).unwrap();
        let value = fence.signal(0);
        fence.timeline().set(value);

        assert_eq!(fence.last_completed(), 0);
        assert!(fence.is_completed(value).unwrap());
        assert_eq!(fence.last_completed(), value);
    }

    #[test]
    fn completed_value_never_decreases() {
        let fence = CompletionFence::new(ManualTimeline::default(), 1).unwrap();
        fence.notify_completed(5);
        fence.timeline().set(3);
        assert_eq!(fence.completed_value().unwrap(), 5);
    }

    #[test]
    fn listeners_run_once_in_any_order_of_registration() {
        let fence = CompletionFence::new(ManualTimeline::default(), 1).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        for value in &[3, 1, 2] {
            let fired = fired.clone();
            fence.on_completed(*value, move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        fence.notify_completed(2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        fence.notify_completed(2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        fence.notify_completed(3);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn listener_for_completed_value_runs_immediately() {
        let fence = CompletionFence::new(ManualTimeline::default(), 1).unwrap();
        fence.notify_completed(7);

        let seen = Arc::new(AtomicU64::new(0));
        let seen_by_listener = seen.clone();
        fence.on_completed(4, move |completed| seen_by_listener.store(completed, Ordering::SeqCst));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn device_lost_is_reported() {
        let fence = CompletionFence::new(ManualTimeline::default(), 1).unwrap();
        let value = fence.signal(0);
        fence.timeline().lost.store(true, Ordering::Release);

        assert_eq!(fence.is_completed(value), Err(FenceError::DeviceLost));
        assert_eq!(fence.wait_until(value, None), Err(FenceError::DeviceLost));
    }
}
