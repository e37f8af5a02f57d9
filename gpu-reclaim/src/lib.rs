//!
//! Fence-synchronized recycling of view heaps and memory pages for Vulkan like APIs.
//!
//! The host records work far ahead of the device. Anything that recorded work
//! references can be reused only after the device reports completion of that work
//! through a [`CompletionFence`]. Pools in this crate keep every retired heap and page
//! until the fence proves it is no longer in use.
//!

mod arena;
mod config;
mod context;
mod error;
mod fence;
mod pool;
mod ring;
mod scope;
mod slot_table;
mod view;

pub use {
    self::{
        arena::*, config::*, context::*, error::*, fence::*, pool::*, ring::*, scope::*,
        slot_table::*, view::*,
    },
    gpu_reclaim_types::*,
};

/// Aligns `value` up to `align_mask`
/// Returns smallest integer not lesser than `value` aligned by `align_mask`.
/// Returns `None` on overflow.
pub(crate) fn align_up(value: u64, align_mask: u64) -> Option<u64> {
    Some(value.checked_add(align_mask)? & !align_mask)
}

/// Align `value` down to `align_mask`
/// Returns largest integer not bigger than `value` aligned by `align_mask`.
pub(crate) fn align_down(value: u64, align_mask: u64) -> u64 {
    value & !align_mask
}
