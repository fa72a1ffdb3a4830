//! Process-wide kernel registry for name-based lookup.
//!
//! The builtin device library is registered on first access. Additional kernels can be
//! registered from any crate; the C surface resolves kernel nodes through this table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use super::builtin::{BitExtract, BitInsert, EmptyKernel, VectorAdd, VectorSquare};
use super::Kernel;
use crate::error::{RuntimeError, RuntimeResult};

struct KernelRegistry {
    kernels: RwLock<HashMap<String, Arc<dyn Kernel>>>,
}

impl KernelRegistry {
    fn with_builtins() -> Self {
        let builtins: [Arc<dyn Kernel>; 8] = [
            Arc::new(VectorAdd::<i32>::new()),
            Arc::new(VectorAdd::<f32>::new()),
            Arc::new(VectorSquare::<f32>::new()),
            Arc::new(BitExtract::<u32>::new()),
            Arc::new(BitExtract::<u64>::new()),
            Arc::new(BitInsert::<u32>::new()),
            Arc::new(BitInsert::<u64>::new()),
            Arc::new(EmptyKernel),
        ];
        let kernels = builtins
            .into_iter()
            .map(|kernel| (kernel.name().to_string(), kernel))
            .collect();
        Self {
            kernels: RwLock::new(kernels),
        }
    }

    fn register(&self, kernel: Arc<dyn Kernel>) -> RuntimeResult<()> {
        let mut kernels = self
            .kernels
            .write()
            .map_err(|_| RuntimeError::poisoned("kernel registry"))?;
        let name = kernel.name().to_string();
        if kernels.contains_key(&name) {
            return Err(RuntimeError::invalid_value(format!(
                "kernel {name} is already registered"
            )));
        }
        kernels.insert(name, kernel);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Kernel>> {
        self.kernels.read().ok()?.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .kernels
            .read()
            .map(|kernels| kernels.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

static GLOBAL_KERNELS: Lazy<KernelRegistry> = Lazy::new(KernelRegistry::with_builtins);

/// Register a kernel under its own name. Names are unique; a second registration fails with
/// `InvalidValue`.
pub fn register_kernel(kernel: Arc<dyn Kernel>) -> RuntimeResult<()> {
    GLOBAL_KERNELS.register(kernel)
}

pub fn kernel_by_name(name: &str) -> Option<Arc<dyn Kernel>> {
    GLOBAL_KERNELS.get(name)
}

/// Registered kernel names, sorted.
pub fn list_kernels() -> Vec<String> {
    GLOBAL_KERNELS.names()
}

pub fn has_kernel(name: &str) -> bool {
    GLOBAL_KERNELS.get(name).is_some()
}
