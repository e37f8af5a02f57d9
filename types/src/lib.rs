//!
//! Device abstraction shared by `gpu-reclaim` and its backends.
//!

mod device;
mod types;

pub use self::{device::*, types::*};
