use std::fmt;
use std::marker::PhantomData;
use std::mem;

use bytemuck::Pod;

use super::{AllocationKind, DevicePtr};
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::Runtime;

/// Typed allocation freed when dropped.
pub struct DeviceBuffer<T: Pod> {
    runtime: Runtime,
    ptr: DevicePtr,
    len: usize,
    kind: AllocationKind,
    _marker: PhantomData<T>,
}

impl<T: Pod> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<T: Pod> DeviceBuffer<T> {
    /// Zero-initialised buffer of `len` elements.
    pub fn new(runtime: &Runtime, kind: AllocationKind, len: usize) -> RuntimeResult<Self> {
        let bytes = len
            .checked_mul(mem::size_of::<T>())
            .ok_or_else(|| RuntimeError::out_of_memory(format!("{len} elements")))?;
        let ptr = runtime.alloc(kind, bytes)?;
        Ok(Self {
            runtime: runtime.clone(),
            ptr,
            len,
            kind,
            _marker: PhantomData,
        })
    }

    pub fn from_slice(runtime: &Runtime, kind: AllocationKind, values: &[T]) -> RuntimeResult<Self> {
        let buffer = Self::new(runtime, kind, values.len())?;
        buffer.write(values)?;
        Ok(buffer)
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * mem::size_of::<T>()
    }

    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    pub fn element_ptr(&self, index: usize) -> DevicePtr {
        self.ptr.element::<T>(index)
    }

    pub fn read(&self) -> RuntimeResult<Vec<T>> {
        if self.len == 0 {
            return Ok(Vec::new());
        }
        self.runtime.read(self.ptr, self.len)
    }

    pub fn write(&self, values: &[T]) -> RuntimeResult<()> {
        if values.len() > self.len {
            return Err(RuntimeError::invalid_value(format!(
                "{} elements do not fit a buffer of {}",
                values.len(),
                self.len
            )));
        }
        if values.is_empty() {
            return Ok(());
        }
        self.runtime.write(self.ptr, values)
    }
}

impl<T: Pod> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        let _ = self.runtime.free(self.ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;

    #[test]
    fn buffer_is_released_on_drop() {
        let rt = Runtime::with_config(RuntimeConfig::default());
        {
            let buffer = DeviceBuffer::from_slice(&rt, AllocationKind::Device, &[1u32, 2, 3])
                .expect("buffer");
            assert_eq!(buffer.read().expect("read"), vec![1, 2, 3]);
            assert_eq!(buffer.byte_len(), 12);
            assert_eq!(rt.memory().live_allocations().expect("count"), 1);
        }
        assert_eq!(rt.memory().live_allocations().expect("count"), 0);
    }
}
