use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytemuck::Pod;

use super::{AllocationKind, DevicePtr, PointerAttributes};
use crate::error::{RuntimeError, RuntimeResult};

const BASE_ADDRESS: u64 = 0x7f00_0000_0000;
const ALIGNMENT: u64 = 256;
// Unmapped gap between allocations so off-by-N pointers never alias a neighbour.
const GUARD_BYTES: u64 = 4096;

pub(crate) struct Allocation {
    base: u64,
    len: usize,
    kind: AllocationKind,
    device: u32,
    data: Mutex<Vec<u8>>,
}

impl Allocation {
    fn lock(&self) -> RuntimeResult<MutexGuard<'_, Vec<u8>>> {
        self.data
            .lock()
            .map_err(|_| RuntimeError::poisoned("allocation"))
    }

    fn attributes(&self) -> PointerAttributes {
        PointerAttributes {
            base: DevicePtr::from_addr(self.base),
            len: self.len,
            kind: self.kind,
            device: self.device,
        }
    }
}

struct PoolState {
    next_addr: u64,
    allocations: BTreeMap<u64, Arc<Allocation>>,
    device_usage: Vec<usize>,
}

/// Owner of every allocation in a runtime's address space.
pub(crate) struct MemoryPool {
    state: RwLock<PoolState>,
    device_capacity: usize,
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

impl MemoryPool {
    pub(crate) fn new(device_count: usize, device_capacity: usize) -> Self {
        Self {
            state: RwLock::new(PoolState {
                next_addr: BASE_ADDRESS,
                allocations: BTreeMap::new(),
                device_usage: vec![0; device_count],
            }),
            device_capacity,
        }
    }

    pub(crate) fn allocate(
        &self,
        len: usize,
        kind: AllocationKind,
        device: u32,
    ) -> RuntimeResult<DevicePtr> {
        if len == 0 {
            return Ok(DevicePtr::NULL);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| RuntimeError::out_of_memory(format!("{len} bytes")))?;
        data.resize(len, 0u8);

        let mut state = self
            .state
            .write()
            .map_err(|_| RuntimeError::poisoned("memory pool"))?;
        if kind == AllocationKind::Device {
            let used = state
                .device_usage
                .get(device as usize)
                .copied()
                .ok_or_else(|| RuntimeError::invalid_device(format!("device {device}")))?;
            if used.saturating_add(len) > self.device_capacity {
                return Err(RuntimeError::out_of_memory(format!(
                    "device {device}: {len} bytes requested, {} of {} in use",
                    used, self.device_capacity
                )));
            }
            state.device_usage[device as usize] = used + len;
        }

        let base = state.next_addr;
        state.next_addr = align_up(base + len as u64 + GUARD_BYTES, ALIGNMENT);
        state.allocations.insert(
            base,
            Arc::new(Allocation {
                base,
                len,
                kind,
                device,
                data: Mutex::new(data),
            }),
        );
        Ok(DevicePtr::from_addr(base))
    }

    pub(crate) fn free(&self, ptr: DevicePtr) -> RuntimeResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| RuntimeError::poisoned("memory pool"))?;
        let allocation = state.allocations.remove(&ptr.addr()).ok_or_else(|| {
            RuntimeError::invalid_value(format!("{ptr} is not the base of a live allocation"))
        })?;
        if allocation.kind == AllocationKind::Device {
            if let Some(used) = state.device_usage.get_mut(allocation.device as usize) {
                *used -= allocation.len;
            }
        }
        Ok(())
    }

    fn find(&self, ptr: DevicePtr) -> RuntimeResult<(Arc<Allocation>, usize)> {
        if ptr.is_null() {
            return Err(RuntimeError::invalid_value("null pointer"));
        }
        let state = self
            .state
            .read()
            .map_err(|_| RuntimeError::poisoned("memory pool"))?;
        let (_, allocation) = state
            .allocations
            .range(..=ptr.addr())
            .next_back()
            .ok_or_else(|| RuntimeError::invalid_value(format!("{ptr} is not allocated")))?;
        let offset = (ptr.addr() - allocation.base) as usize;
        if offset >= allocation.len {
            return Err(RuntimeError::invalid_value(format!("{ptr} is not allocated")));
        }
        Ok((Arc::clone(allocation), offset))
    }

    /// Resolves `[ptr, ptr + len)` to one allocation and the offset inside it.
    fn range(&self, ptr: DevicePtr, len: usize) -> RuntimeResult<(Arc<Allocation>, usize)> {
        let (allocation, offset) = self.find(ptr)?;
        if offset.checked_add(len).map_or(true, |end| end > allocation.len) {
            return Err(RuntimeError::invalid_value(format!(
                "{len} bytes at {ptr} overrun a {} byte allocation",
                allocation.len
            )));
        }
        Ok((allocation, offset))
    }

    pub(crate) fn attributes(&self, ptr: DevicePtr) -> RuntimeResult<PointerAttributes> {
        self.find(ptr).map(|(allocation, _)| allocation.attributes())
    }

    /// Validates that `len` bytes at `ptr` are addressable and returns the allocation's
    /// attributes.
    pub(crate) fn check_range(
        &self,
        ptr: DevicePtr,
        len: usize,
    ) -> RuntimeResult<PointerAttributes> {
        self.range(ptr, len)
            .map(|(allocation, _)| allocation.attributes())
    }

    pub(crate) fn read(&self, ptr: DevicePtr, len: usize) -> RuntimeResult<Vec<u8>> {
        let (allocation, offset) = self.range(ptr, len)?;
        let data = allocation.lock()?;
        Ok(data[offset..offset + len].to_vec())
    }

    pub(crate) fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> RuntimeResult<()> {
        let (allocation, offset) = self.range(ptr, bytes.len())?;
        let mut data = allocation.lock()?;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn copy(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> RuntimeResult<()> {
        let (dst_alloc, dst_offset) = self.range(dst, len)?;
        let (src_alloc, src_offset) = self.range(src, len)?;
        if Arc::ptr_eq(&dst_alloc, &src_alloc) {
            let mut data = dst_alloc.lock()?;
            data.copy_within(src_offset..src_offset + len, dst_offset);
            return Ok(());
        }
        // Lock in address order so two opposing copies cannot deadlock.
        if dst_alloc.base < src_alloc.base {
            let mut dst_data = dst_alloc.lock()?;
            let src_data = src_alloc.lock()?;
            dst_data[dst_offset..dst_offset + len]
                .copy_from_slice(&src_data[src_offset..src_offset + len]);
        } else {
            let src_data = src_alloc.lock()?;
            let mut dst_data = dst_alloc.lock()?;
            dst_data[dst_offset..dst_offset + len]
                .copy_from_slice(&src_data[src_offset..src_offset + len]);
        }
        Ok(())
    }

    /// Writes `count` repetitions of `pattern` starting at `ptr`.
    pub(crate) fn fill(&self, ptr: DevicePtr, pattern: &[u8], count: usize) -> RuntimeResult<()> {
        if pattern.is_empty() {
            return Ok(());
        }
        let len = pattern
            .len()
            .checked_mul(count)
            .ok_or_else(|| RuntimeError::invalid_value("memset size overflows"))?;
        let (allocation, offset) = self.range(ptr, len)?;
        let mut data = allocation.lock()?;
        for chunk in data[offset..offset + len].chunks_exact_mut(pattern.len()) {
            chunk.copy_from_slice(pattern);
        }
        Ok(())
    }

    pub(crate) fn read_pod<T: Pod>(&self, ptr: DevicePtr, count: usize) -> RuntimeResult<Vec<T>> {
        let len = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| RuntimeError::invalid_value(format!("{count} elements overflow a read")))?;
        let bytes = self.read(ptr, len)?;
        let mut out = vec![T::zeroed(); count];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
        Ok(out)
    }

    pub(crate) fn write_pod<T: Pod>(&self, ptr: DevicePtr, values: &[T]) -> RuntimeResult<()> {
        self.write(ptr, bytemuck::cast_slice(values))
    }

    pub(crate) fn live_allocations(&self) -> RuntimeResult<usize> {
        self.state
            .read()
            .map(|state| state.allocations.len())
            .map_err(|_| RuntimeError::poisoned("memory pool"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn out_of_range_access_is_rejected() {
        let pool = MemoryPool::new(1, 1 << 20);
        let ptr = pool.allocate(16, AllocationKind::Device, 0).unwrap();
        assert!(pool.read(ptr, 16).is_ok());
        let err = pool.read(ptr.offset(1), 16).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValue);
        let err = pool.read(ptr.offset(16), 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValue);
    }

    #[test]
    fn device_capacity_is_enforced() {
        let pool = MemoryPool::new(1, 64);
        let first = pool.allocate(48, AllocationKind::Device, 0).unwrap();
        let err = pool.allocate(32, AllocationKind::Device, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::OutOfMemory);
        pool.free(first).unwrap();
        assert!(pool.allocate(32, AllocationKind::Device, 0).is_ok());
        assert!(pool.allocate(4096, AllocationKind::Pinned, 0).is_ok());
    }

    #[test]
    fn overlapping_copy_within_one_allocation() {
        let pool = MemoryPool::new(1, 1 << 20);
        let ptr = pool.allocate(8, AllocationKind::Managed, 0).unwrap();
        pool.write(ptr, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        pool.copy(ptr.offset(2), ptr, 4).unwrap();
        assert_eq!(pool.read(ptr, 8).unwrap(), vec![1, 2, 1, 2, 3, 4, 7, 8]);
    }

    #[test]
    fn element_count_overflow_is_an_error() {
        let pool = MemoryPool::new(1, 1 << 20);
        let ptr = pool.allocate(16, AllocationKind::Device, 0).unwrap();
        let err = pool.read_pod::<u32>(ptr, usize::MAX / 2).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidValue);
        assert_eq!(pool.read_pod::<u32>(ptr, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn poisoned_pool_reports_instead_of_counting_zero() {
        let pool = Arc::new(MemoryPool::new(1, 1 << 20));
        pool.allocate(8, AllocationKind::Device, 0).unwrap();
        let held = Arc::clone(&pool);
        let _ = std::thread::spawn(move || {
            let _state = held.state.write().unwrap();
            panic!("poison the pool");
        })
        .join();
        let err = pool.live_allocations().unwrap_err();
        assert_eq!(err.code, ErrorCode::IllegalState);
    }

    #[test]
    fn free_requires_base_pointer() {
        let pool = MemoryPool::new(1, 1 << 20);
        let ptr = pool.allocate(8, AllocationKind::Pageable, 0).unwrap();
        assert_eq!(
            pool.free(ptr.offset(4)).unwrap_err().code,
            ErrorCode::InvalidValue
        );
        pool.free(ptr).unwrap();
        assert_eq!(pool.free(ptr).unwrap_err().code, ErrorCode::InvalidValue);
        assert_eq!(pool.live_allocations().unwrap(), 0);
    }
}
