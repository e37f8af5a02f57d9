use {
    core::fmt::{self, Display},
    gpu_reclaim_types::{DeviceLost, DeviceMapError, OutOfMemory},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationError {
    OutOfDeviceMemory,
    OutOfHostMemory,
    TooManyObjects,
    MapFailed,
    DeviceLost,
}

impl From<OutOfMemory> for AllocationError {
    fn from(err: OutOfMemory) -> Self {
        match err {
            OutOfMemory::OutOfDeviceMemory => AllocationError::OutOfDeviceMemory,
            OutOfMemory::OutOfHostMemory => AllocationError::OutOfHostMemory,
        }
    }
}

impl From<DeviceMapError> for AllocationError {
    fn from(err: DeviceMapError) -> Self {
        match err {
            DeviceMapError::OutOfDeviceMemory => AllocationError::OutOfDeviceMemory,
            DeviceMapError::OutOfHostMemory => AllocationError::OutOfHostMemory,
            DeviceMapError::MapFailed => AllocationError::MapFailed,
        }
    }
}

impl From<FenceError> for AllocationError {
    fn from(err: FenceError) -> Self {
        match err {
            FenceError::DeviceLost => AllocationError::DeviceLost,
        }
    }
}

impl Display for AllocationError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationError::OutOfDeviceMemory => fmt.write_str("Device memory exhausted"),
            AllocationError::OutOfHostMemory => fmt.write_str("Host memory exhausted"),
            AllocationError::TooManyObjects => {
                fmt.write_str("Reached limit on memory objects count")
            }
            AllocationError::MapFailed => fmt.write_str("Failed to map memory page"),
            AllocationError::DeviceLost => {
                fmt.write_str("Device lost while checking for reusable resources")
            }
        }
    }
}

impl std::error::Error for AllocationError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FenceError {
    DeviceLost,
}

impl From<DeviceLost> for FenceError {
    fn from(DeviceLost: DeviceLost) -> Self {
        FenceError::DeviceLost
    }
}

impl Display for FenceError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FenceError::DeviceLost => fmt.write_str("Device lost"),
        }
    }
}

impl std::error::Error for FenceError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapError {
    NonHostVisible,
    OutOfDeviceMemory,
    OutOfHostMemory,
}

impl From<OutOfMemory> for MapError {
    fn from(err: OutOfMemory) -> Self {
        match err {
            OutOfMemory::OutOfDeviceMemory => MapError::OutOfDeviceMemory,
            OutOfMemory::OutOfHostMemory => MapError::OutOfHostMemory,
        }
    }
}

impl Display for MapError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::NonHostVisible => fmt.write_str("Impossible to write into non-host-visible page"),
            MapError::OutOfDeviceMemory => fmt.write_str("Device memory exhausted"),
            MapError::OutOfHostMemory => fmt.write_str("Host memory exhausted"),
        }
    }
}

impl std::error::Error for MapError {}
