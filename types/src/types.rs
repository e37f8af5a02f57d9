bitflags::bitflags! {
    /// Memory properties type.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct MemoryPropertyFlags: u8 {
        /// This flag is set for device-local memory types.
        /// Device-local memory is situated "close" to the GPU cores
        /// and allows for fast access.
        const DEVICE_LOCAL = 0x01;

        /// This flag is set for host-visible memory types.
        /// Host-visible memory can be mapped to the host memory range.
        const HOST_VISIBLE = 0x02;

        /// This flag is set for host-coherent memory types.
        /// Host-coherent memory does not requires manual invalidation for
        /// modifications on GPU to become visible on host;
        /// nor flush for modification on host to become visible on GPU.
        const HOST_COHERENT = 0x04;

        /// This flag is set for host-cached memory types.
        /// Host-cached memory uses cache in host memory for faster reads from host.
        const HOST_CACHED = 0x08;
    }
}

/// Memory type a page pool allocates from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryType {
    /// Index of the memory type on the device.
    pub index: u32,

    /// Property flags of the memory type.
    pub props: MemoryPropertyFlags,
}

/// Kind of view slots a heap holds.
/// Heaps of different kinds are never interchangeable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ViewKind {
    /// Buffer and texture views read or written by shaders.
    Resource,

    /// Sampler states.
    Sampler,

    /// Color attachment views.
    ColorTarget,

    /// Depth-stencil attachment views.
    DepthTarget,
}

impl ViewKind {
    /// All view kinds in declaration order.
    pub const ALL: [ViewKind; 4] = [
        ViewKind::Resource,
        ViewKind::Sampler,
        ViewKind::ColorTarget,
        ViewKind::DepthTarget,
    ];
}
