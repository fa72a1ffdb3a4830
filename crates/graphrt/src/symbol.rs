use std::collections::HashMap;

use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::DevicePtr;

/// Handle of a registered device symbol. The zero handle is the null symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SymbolHandle(u64);

impl SymbolHandle {
    pub const NULL: SymbolHandle = SymbolHandle(0);

    pub const fn from_raw(raw: u64) -> Self {
        SymbolHandle(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub address: DevicePtr,
    pub size: usize,
    pub constant: bool,
}

impl SymbolInfo {
    /// Address of `bytes` bytes starting `offset` bytes into the symbol.
    pub(crate) fn window(&self, bytes: usize, offset: usize) -> RuntimeResult<DevicePtr> {
        if bytes == 0 {
            return Err(RuntimeError::invalid_value(format!(
                "zero-byte copy on symbol {}",
                self.name
            )));
        }
        if bytes > self.size {
            return Err(RuntimeError::invalid_value(format!(
                "{bytes} bytes exceed the {} byte symbol {}",
                self.size, self.name
            )));
        }
        if offset.checked_add(bytes).map_or(true, |end| end > self.size) {
            return Err(RuntimeError::invalid_value(format!(
                "{bytes} bytes at offset {offset} overrun the {} byte symbol {}",
                self.size, self.name
            )));
        }
        Ok(self.address.offset(offset))
    }
}

#[derive(Default)]
pub(crate) struct SymbolTable {
    next: u64,
    entries: HashMap<SymbolHandle, SymbolInfo>,
    by_name: HashMap<String, SymbolHandle>,
}

impl SymbolTable {
    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub(crate) fn insert(&mut self, info: SymbolInfo) -> SymbolHandle {
        self.next += 1;
        let handle = SymbolHandle(self.next);
        self.by_name.insert(info.name.clone(), handle);
        self.entries.insert(handle, info);
        handle
    }

    pub(crate) fn get(&self, handle: SymbolHandle) -> RuntimeResult<&SymbolInfo> {
        if handle.is_null() {
            return Err(RuntimeError::invalid_symbol("null symbol"));
        }
        self.entries
            .get(&handle)
            .ok_or_else(|| RuntimeError::invalid_symbol(format!("unknown symbol {:#x}", handle.0)))
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<SymbolHandle> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn addresses(&self) -> Vec<DevicePtr> {
        self.entries.values().map(|info| info.address).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    fn info(size: usize) -> SymbolInfo {
        SymbolInfo {
            name: "table".to_string(),
            address: DevicePtr::from_addr(0x1000),
            size,
            constant: false,
        }
    }

    #[test]
    fn window_bounds() {
        let symbol = info(20);
        assert_eq!(symbol.window(8, 4).unwrap(), DevicePtr::from_addr(0x1004));
        assert_eq!(symbol.window(0, 0).unwrap_err().code, ErrorCode::InvalidValue);
        assert_eq!(symbol.window(21, 0).unwrap_err().code, ErrorCode::InvalidValue);
        assert_eq!(symbol.window(20, 1).unwrap_err().code, ErrorCode::InvalidValue);
    }

    #[test]
    fn null_and_unknown_handles_are_invalid_symbols() {
        let mut table = SymbolTable::default();
        let handle = table.insert(info(4));
        assert!(table.get(handle).is_ok());
        assert_eq!(
            table.get(SymbolHandle::NULL).unwrap_err().code,
            ErrorCode::InvalidSymbol
        );
        assert_eq!(
            table.get(SymbolHandle::from_raw(99)).unwrap_err().code,
            ErrorCode::InvalidSymbol
        );
    }
}
