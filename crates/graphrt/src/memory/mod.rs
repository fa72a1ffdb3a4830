//! Simulated address space shared by host and device allocations.
//!
//! Every allocation, host or device, lives in one runtime-owned virtual address space and is
//! addressed through a [`DevicePtr`]. The allocation kind decides which copy directions are
//! legal for a pointer.

mod buffer;
mod pool;

use std::fmt;
use std::mem::size_of;

pub use buffer::DeviceBuffer;
pub(crate) use pool::MemoryPool;

use crate::error::{RuntimeError, RuntimeResult};

/// Address inside the runtime's virtual address space. Address zero is the null pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub const fn from_addr(addr: u64) -> Self {
        DevicePtr(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Byte offset. Arithmetic on the null pointer stays null-relative and is rejected when
    /// the result is used.
    pub const fn offset(self, bytes: usize) -> Self {
        DevicePtr(self.0.wrapping_add(bytes as u64))
    }

    pub const fn element<T>(self, index: usize) -> Self {
        self.offset(index * size_of::<T>())
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// How an allocation was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    /// Ordinary host memory (`malloc`).
    Pageable,
    /// Page-locked host memory.
    Pinned,
    /// Device memory on the device current at allocation time.
    Device,
    /// Memory reachable from both host and device.
    Managed,
}

impl AllocationKind {
    pub fn memory_kind(self) -> MemoryKind {
        match self {
            AllocationKind::Pageable | AllocationKind::Pinned => MemoryKind::Host,
            AllocationKind::Device => MemoryKind::Device,
            AllocationKind::Managed => MemoryKind::Managed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Host,
    Device,
    Managed,
}

impl MemoryKind {
    fn host_accessible(self) -> bool {
        matches!(self, MemoryKind::Host | MemoryKind::Managed)
    }

    fn device_accessible(self) -> bool {
        matches!(self, MemoryKind::Device | MemoryKind::Managed)
    }
}

/// Requested copy direction.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemcpyKind {
    HostToHost = 0,
    HostToDevice = 1,
    DeviceToHost = 2,
    DeviceToDevice = 3,
    Default = 4,
}

/// Effective direction of a copy once [`MemcpyKind::Default`] has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl Direction {
    fn from_sides(src_on_device: bool, dst_on_device: bool) -> Self {
        match (src_on_device, dst_on_device) {
            (false, false) => Direction::HostToHost,
            (false, true) => Direction::HostToDevice,
            (true, false) => Direction::DeviceToHost,
            (true, true) => Direction::DeviceToDevice,
        }
    }
}

impl MemcpyKind {
    pub fn from_raw(raw: i32) -> RuntimeResult<Self> {
        match raw {
            0 => Ok(MemcpyKind::HostToHost),
            1 => Ok(MemcpyKind::HostToDevice),
            2 => Ok(MemcpyKind::DeviceToHost),
            3 => Ok(MemcpyKind::DeviceToDevice),
            4 => Ok(MemcpyKind::Default),
            other => Err(RuntimeError::invalid_direction(format!(
                "unknown memcpy kind {other}"
            ))),
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Direction class implied by this kind for the given memory, without checking legality.
    /// `Default` treats managed memory as device memory.
    pub fn direction(self, src: MemoryKind, dst: MemoryKind) -> Direction {
        match self {
            MemcpyKind::HostToHost => Direction::HostToHost,
            MemcpyKind::HostToDevice => Direction::HostToDevice,
            MemcpyKind::DeviceToHost => Direction::DeviceToHost,
            MemcpyKind::DeviceToDevice => Direction::DeviceToDevice,
            MemcpyKind::Default => {
                Direction::from_sides(src != MemoryKind::Host, dst != MemoryKind::Host)
            }
        }
    }

    /// Resolves the direction and rejects kinds that contradict the memory involved.
    pub fn resolve(self, src: MemoryKind, dst: MemoryKind) -> RuntimeResult<Direction> {
        let (src_ok, dst_ok) = match self {
            MemcpyKind::HostToHost => (src.host_accessible(), dst.host_accessible()),
            MemcpyKind::HostToDevice => (src.host_accessible(), dst.device_accessible()),
            MemcpyKind::DeviceToHost => (src.device_accessible(), dst.host_accessible()),
            MemcpyKind::DeviceToDevice => (src.device_accessible(), dst.device_accessible()),
            MemcpyKind::Default => (true, true),
        };
        if !(src_ok && dst_ok) {
            return Err(RuntimeError::invalid_direction(format!(
                "{self:?} does not match {src:?} source and {dst:?} destination"
            )));
        }
        Ok(self.direction(src, dst))
    }
}

/// Attributes of the allocation a pointer falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerAttributes {
    pub base: DevicePtr,
    pub len: usize,
    pub kind: AllocationKind,
    pub device: u32,
}

impl PointerAttributes {
    pub fn memory_kind(&self) -> MemoryKind {
        self.kind.memory_kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_kind_treats_managed_as_device() {
        let direction = MemcpyKind::Default.direction(MemoryKind::Managed, MemoryKind::Host);
        assert_eq!(direction, Direction::DeviceToHost);
        let direction = MemcpyKind::Default.direction(MemoryKind::Host, MemoryKind::Host);
        assert_eq!(direction, Direction::HostToHost);
    }

    #[test]
    fn explicit_kind_must_match_memory() {
        let err = MemcpyKind::HostToDevice
            .resolve(MemoryKind::Device, MemoryKind::Device)
            .unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidMemcpyDirection);
        let ok = MemcpyKind::DeviceToHost.resolve(MemoryKind::Managed, MemoryKind::Managed);
        assert_eq!(ok.unwrap(), Direction::DeviceToHost);
    }

    #[test]
    fn raw_kinds_outside_range_fail() {
        assert_eq!(MemcpyKind::from_raw(3).unwrap(), MemcpyKind::DeviceToDevice);
        let err = MemcpyKind::from_raw(-1).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidMemcpyDirection);
        assert!(MemcpyKind::from_raw(5).is_err());
    }
}
