// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::{
    ErrorCode,
    Fail,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// Read access to memory referenced by op mapping addresses.
///
/// Implementations must be sound for every `address` a caller passes, including addresses decoded from the wire.
/// An implementation that cannot check an address itself must push that obligation to its constructor.
pub trait DeviceMemory: Send + Sync {
    /// Copies `buf.len()` bytes starting at `address` into `buf`.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fail>;

    fn read_u64(&self, address: u64) -> Result<u64, Fail> {
        let mut raw: [u8; 8] = [0; 8];
        self.read(address, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Memory mapped into this process. Only null and wrapping ranges are rejected; any other address is dereferenced.
#[derive(Clone, Copy, Debug)]
pub struct HostMemory {
    _private: (),
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl HostMemory {
    /// # Safety
    ///
    /// Every address that reaches [DeviceMemory::read] through this value, with its length, must lie in memory that
    /// is mapped and readable in this process for the lifetime of the value. In practice the op mappings and step
    /// addresses handed to the owning dump manager must come from a party that owns the described tensors.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl DeviceMemory for HostMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), Fail> {
        if address == 0 {
            let cause: String = format!("null address (len={})", buf.len());
            error!("read(): {}", cause);
            return Err(Fail::new(ErrorCode::DumpFailed, &cause));
        }
        if address.checked_add(buf.len() as u64).is_none() {
            let cause: String = format!("address range overflows (address={:#x}, len={})", address, buf.len());
            error!("read(): {}", cause);
            return Err(Fail::new(ErrorCode::DumpFailed, &cause));
        }
        // SAFETY: the range is non-null and does not wrap, and it is mapped per the contract of [HostMemory::new]. The
        // tensor may be written concurrently by a running kernel, so the copy is a snapshot with no ordering guarantee;
        // it never writes to the source.
        unsafe {
            ::std::ptr::copy_nonoverlapping(address as usize as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
