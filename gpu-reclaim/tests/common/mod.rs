#![allow(dead_code)]

use {
    gpu_reclaim::{CompletionFence, DeviceProperties},
    gpu_reclaim_mock::{MockDevice, MockTimeline},
};

pub fn fence() -> CompletionFence<MockTimeline> {
    CompletionFence::new(MockTimeline::default(), 1).unwrap()
}

/// Signals until the fence hands out `value`.
pub fn signal_up_to(fence: &CompletionFence<MockTimeline>, value: u64) {
    while fence.last_signaled() < value {
        fence.signal(0);
    }
}

pub fn props_with_allocation_limit(count: u32) -> DeviceProperties {
    DeviceProperties {
        max_memory_allocation_count: count,
        ..MockDevice::coherent_properties()
    }
}
