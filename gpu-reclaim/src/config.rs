/// Configuration for [`ReclaimContext`]
///
/// [`ReclaimContext`]: struct.ReclaimContext.html
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Size in bytes of standard arena pages.
    /// Scratch requests larger than this are served by dedicated one-off pages.
    /// Must be a multiple of the device `non_coherent_atom_size`.
    pub page_size: u64,

    /// Initial number of slots in persistent view tables.
    /// Also used as the minimal growth step when a persistent table is exhausted.
    pub view_table_capacity: u32,

    /// Initial number of slots in per-submission view tables.
    pub transient_view_capacity: u32,

    /// Minimal number of slots added each time a per-submission view table grows.
    pub transient_growth_increment: u32,

    /// Number of logical execution streams tracked by the completion fence.
    pub streams: usize,
}

impl Config {
    /// Returns default configuration.
    /// This is not `Default` implementation to discourage usage outside of
    /// prototyping.
    /// Proper configuration should depend on hardware and frame workload.
    /// But those values can be used as starting point.
    pub fn i_am_prototyping() -> Self {
        Config {
            page_size: 2 * 1024 * 1024,
            view_table_capacity: 1024,
            transient_view_capacity: 1024,
            transient_growth_increment: 256,
            streams: 4,
        }
    }

    /// Returns default configuration for potato.
    pub fn i_am_potato() -> Self {
        Config {
            page_size: 64 * 1024,
            view_table_capacity: 256,
            transient_view_capacity: 256,
            transient_growth_increment: 64,
            streams: 1,
        }
    }
}
