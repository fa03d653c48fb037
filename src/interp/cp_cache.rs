//! Constant-pool cache entries.
//!
//! ```text
//!   +0   indices   cp index (bits 0..16) | bytecode_1 (byte 2) | bytecode_2 (byte 3)
//!   +8   f1        holder mirror, Method*, interface klass or adapter
//!   +16  f2        field offset, vtable index, Method* or appendix index
//!   +24  flags     see `shift`
//! ```
//!
//! An entry is resolved for a bytecode once that bytecode's byte in
//! `indices` equals it. Resolution stores `f1`, `f2` and `flags` first and
//! publishes the bytecode byte last with release semantics; generated code
//! loads the byte and then executes an acquire fence before it touches the
//! other fields. Racing resolvers write identical values, so the last
//! writer wins without tearing what a reader can observe.

use std::sync::atomic::Ordering;

use crate::interp::bytecodes::{Bytecode, TosState};
use crate::runtime::layout::cp_cache::{BASE, ENTRY_SIZE};
use crate::sim::memory::{Memory, MemoryError};

pub const INDICES: i32 = 0;
pub const F1: i32 = 8;
pub const F2: i32 = 16;
pub const FLAGS: i32 = 24;

/// Byte offsets of the resolved bytecodes within `indices`.
pub const BYTECODE_1: i32 = 2;
pub const BYTECODE_2: i32 = 3;

pub mod shift {
    pub const TOS_STATE: u32 = 28;
    pub const IS_FIELD_ENTRY: u32 = 26;
    pub const HAS_METHOD_TYPE: u32 = 25;
    pub const HAS_APPENDIX: u32 = 24;
    pub const IS_FORCED_VIRTUAL: u32 = 23;
    pub const IS_FINAL: u32 = 22;
    pub const IS_VOLATILE: u32 = 21;
    pub const IS_VFINAL: u32 = 20;
}

pub const TOS_STATE_MASK: u64 = 0xF;
pub const TOS_STATE_BITS: u32 = 4;
pub const PARAMETER_SIZE_MASK: u64 = 0xFF;
pub const FIELD_INDEX_MASK: u64 = 0xFFFF;
pub const CP_INDEX_MASK: u64 = 0xFFFF;

/// Which `indices` byte a bytecode is resolved under.
///
/// Puts and `invokevirtual` use the second byte so that a field can be
/// resolved for reading without being resolved for writing, and a
/// `Methodref` shared by `invokespecial` and `invokevirtual` keeps both.
pub fn byte_no(bc: Bytecode) -> i32 {
    match resolved_code(bc) {
        Bytecode::Putfield | Bytecode::Putstatic | Bytecode::Invokevirtual => BYTECODE_2,
        _ => BYTECODE_1,
    }
}

/// The bytecode an entry records once it is resolved for `bc`.
pub fn resolved_code(bc: Bytecode) -> Bytecode {
    match bc {
        Bytecode::Invokehandle => Bytecode::Invokehandle,
        _ => bc.java_code(),
    }
}

/// The `flags` word of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags(u64);

impl EntryFlags {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn field(tos: TosState, field_index: u16, is_volatile: bool, is_final: bool) -> Self {
        let mut bits = (tos as u64) << shift::TOS_STATE | 1 << shift::IS_FIELD_ENTRY | field_index as u64;
        if is_volatile {
            bits |= 1 << shift::IS_VOLATILE;
        }
        if is_final {
            bits |= 1 << shift::IS_FINAL;
        }
        Self(bits)
    }

    /// Flags of a method entry. `parameter_size` counts the receiver and
    /// any appendix.
    pub fn method(result: TosState, parameter_size: u8) -> Self {
        Self((result as u64) << shift::TOS_STATE | parameter_size as u64)
    }

    fn with(self, bit: u32) -> Self {
        Self(self.0 | 1 << bit)
    }

    pub fn with_vfinal(self) -> Self {
        self.with(shift::IS_VFINAL)
    }

    pub fn with_forced_virtual(self) -> Self {
        self.with(shift::IS_FORCED_VIRTUAL)
    }

    pub fn with_appendix(self) -> Self {
        self.with(shift::HAS_APPENDIX)
    }

    pub fn with_method_type(self) -> Self {
        self.with(shift::HAS_METHOD_TYPE)
    }

    pub fn with_final(self) -> Self {
        self.with(shift::IS_FINAL)
    }

    fn has(self, bit: u32) -> bool {
        self.0 >> bit & 1 != 0
    }

    pub fn tos_state(self) -> Option<TosState> {
        TosState::from_u8((self.0 >> shift::TOS_STATE & TOS_STATE_MASK) as u8)
    }

    pub fn is_field_entry(self) -> bool {
        self.has(shift::IS_FIELD_ENTRY)
    }

    pub fn is_volatile(self) -> bool {
        self.has(shift::IS_VOLATILE)
    }

    pub fn is_final(self) -> bool {
        self.has(shift::IS_FINAL)
    }

    pub fn is_vfinal(self) -> bool {
        self.has(shift::IS_VFINAL)
    }

    pub fn is_forced_virtual(self) -> bool {
        self.has(shift::IS_FORCED_VIRTUAL)
    }

    pub fn has_appendix(self) -> bool {
        self.has(shift::HAS_APPENDIX)
    }

    pub fn has_method_type(self) -> bool {
        self.has(shift::HAS_METHOD_TYPE)
    }

    pub fn parameter_size(self) -> u8 {
        (self.0 & PARAMETER_SIZE_MASK) as u8
    }

    pub fn field_index(self) -> u16 {
        (self.0 & FIELD_INDEX_MASK) as u16
    }
}

/// Address of entry `index` of the cache at `cache`.
pub fn entry_address(cache: u64, index: u16) -> u64 {
    cache + BASE as u64 + index as u64 * ENTRY_SIZE as u64
}

/// A snapshot of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub indices: u64,
    pub f1: u64,
    pub f2: u64,
    pub flags: EntryFlags,
}

impl CacheEntry {
    pub fn cp_index(&self) -> u16 {
        (self.indices & CP_INDEX_MASK) as u16
    }

    pub fn bytecode_1(&self) -> u8 {
        (self.indices >> 16) as u8
    }

    pub fn bytecode_2(&self) -> u8 {
        (self.indices >> 24) as u8
    }
}

/// Host view of one entry in simulated memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntryRef {
    addr: u64,
}

impl CacheEntryRef {
    pub fn at(cache: u64, index: u16) -> Self {
        Self {
            addr: entry_address(cache, index),
        }
    }

    pub fn address(&self) -> u64 {
        self.addr
    }

    /// Link-time initialisation: the cp index, nothing resolved.
    pub fn initialize(&self, mem: &Memory, cp_index: u16) -> Result<(), MemoryError> {
        mem.store_u64(self.addr + INDICES as u64, cp_index as u64)?;
        mem.store_u64(self.addr + F1 as u64, 0)?;
        mem.store_u64(self.addr + F2 as u64, 0)?;
        mem.store_u64(self.addr + FLAGS as u64, 0)
    }

    /// Read the entry; the `indices` load is ordered before the rest.
    pub fn load(&self, mem: &Memory) -> Result<CacheEntry, MemoryError> {
        let indices = mem.load(self.addr + INDICES as u64, 8, Ordering::Acquire)?;
        Ok(CacheEntry {
            indices,
            f1: mem.load_u64(self.addr + F1 as u64)?,
            f2: mem.load_u64(self.addr + F2 as u64)?,
            flags: EntryFlags::from_bits(mem.load_u64(self.addr + FLAGS as u64)?),
        })
    }

    pub fn cp_index(&self, mem: &Memory) -> Result<u16, MemoryError> {
        Ok((mem.load_u64(self.addr + INDICES as u64)? & CP_INDEX_MASK) as u16)
    }

    pub fn is_resolved(&self, mem: &Memory, bc: Bytecode) -> Result<bool, MemoryError> {
        let byte = mem.load(self.addr + (INDICES + byte_no(bc)) as u64, 1, Ordering::Acquire)?;
        Ok(byte as u8 == resolved_code(bc) as u8)
    }

    fn write_fields(&self, mem: &Memory, f1: u64, f2: u64, flags: EntryFlags) -> Result<(), MemoryError> {
        mem.store(self.addr + F1 as u64, 8, f1, Ordering::Relaxed)?;
        mem.store(self.addr + F2 as u64, 8, f2, Ordering::Relaxed)?;
        mem.store(self.addr + FLAGS as u64, 8, flags.bits(), Ordering::Relaxed)
    }

    /// A `Methodref` resolved for both `invokespecial` and `invokevirtual`
    /// keeps the bits of both resolutions.
    fn merged_flags(&self, mem: &Memory, flags: EntryFlags) -> Result<EntryFlags, MemoryError> {
        let old = mem.load_u64(self.addr + FLAGS as u64)?;
        Ok(EntryFlags::from_bits(old | flags.bits()))
    }

    fn publish(&self, mem: &Memory, byte: i32, bc: u8) -> Result<(), MemoryError> {
        mem.store(self.addr + (INDICES + byte) as u64, 1, bc as u64, Ordering::Release)
    }

    /// Resolve a field reference. `put_code` of `None` leaves puts
    /// unresolved so that they keep calling into the runtime.
    pub fn set_field(
        &self,
        mem: &Memory,
        get_code: Bytecode,
        put_code: Option<Bytecode>,
        holder: u64,
        offset: u64,
        flags: EntryFlags,
    ) -> Result<(), MemoryError> {
        self.write_fields(mem, holder, offset, flags)?;
        self.publish(mem, BYTECODE_1, get_code as u8)?;
        if let Some(put) = put_code {
            self.publish(mem, BYTECODE_2, put as u8)?;
        }
        Ok(())
    }

    /// Statically bound call: `Method*` in `f1` under `bytecode_1`.
    pub fn set_direct_call(&self, mem: &Memory, bc: Bytecode, method: u64, flags: EntryFlags) -> Result<(), MemoryError> {
        let f2 = mem.load_u64(self.addr + F2 as u64)?;
        let flags = self.merged_flags(mem, flags)?;
        self.write_fields(mem, method, f2, flags)?;
        self.publish(mem, BYTECODE_1, bc as u8)
    }

    /// `invokevirtual`: `Method*` (vfinal) or vtable index in `f2` under
    /// `bytecode_2`.
    pub fn set_virtual_call(&self, mem: &Memory, method_or_index: u64, flags: EntryFlags) -> Result<(), MemoryError> {
        let f1 = mem.load_u64(self.addr + F1 as u64)?;
        let flags = self.merged_flags(mem, flags)?;
        self.write_fields(mem, f1, method_or_index, flags)?;
        self.publish(mem, BYTECODE_2, Bytecode::Invokevirtual as u8)
    }

    /// `invokeinterface`: interface klass in `f1`, `Method*` (or vtable
    /// index when forced virtual) in `f2`.
    pub fn set_interface_call(
        &self,
        mem: &Memory,
        interface: u64,
        method_or_index: u64,
        flags: EntryFlags,
    ) -> Result<(), MemoryError> {
        self.write_fields(mem, interface, method_or_index, flags)?;
        self.publish(mem, BYTECODE_1, Bytecode::Invokeinterface as u8)
    }

    /// `invokedynamic`/`invokehandle`: adapter in `f1`, resolved
    /// references index of the appendix in `f2`.
    pub fn set_adapter_call(
        &self,
        mem: &Memory,
        bc: Bytecode,
        adapter: u64,
        appendix_index: u64,
        flags: EntryFlags,
    ) -> Result<(), MemoryError> {
        self.write_fields(mem, adapter, appendix_index, flags)?;
        self.publish(mem, BYTECODE_1, bc as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const CACHE: u64 = 0x0100_0000;

    fn memory() -> Memory {
        let mem = Memory::new();
        mem.map("meta", CACHE, 4096).unwrap();
        mem
    }

    #[test]
    fn test_flag_layout() {
        let flags = EntryFlags::field(TosState::Ltos, 7, true, false);
        assert_eq!(flags.bits() >> 28, TosState::Ltos as u64);
        assert!(flags.is_field_entry());
        assert!(flags.is_volatile());
        assert!(!flags.is_final());
        assert_eq!(flags.field_index(), 7);

        let flags = EntryFlags::method(TosState::Itos, 3).with_vfinal().with_appendix();
        assert!(flags.is_vfinal());
        assert!(flags.has_appendix());
        assert!(!flags.is_forced_virtual());
        assert_eq!(flags.parameter_size(), 3);
        assert_eq!(flags.tos_state(), Some(TosState::Itos));
    }

    #[test]
    fn test_byte_no() {
        assert_eq!(byte_no(Bytecode::Getfield), BYTECODE_1);
        assert_eq!(byte_no(Bytecode::Putstatic), BYTECODE_2);
        assert_eq!(byte_no(Bytecode::Invokevirtual), BYTECODE_2);
        assert_eq!(byte_no(Bytecode::FastInvokevfinal), BYTECODE_2);
        assert_eq!(byte_no(Bytecode::Invokespecial), BYTECODE_1);
        assert_eq!(byte_no(Bytecode::Invokehandle), BYTECODE_1);
    }

    #[test]
    fn test_field_resolution_without_put() {
        let mem = memory();
        let entry = CacheEntryRef::at(CACHE, 1);
        entry.initialize(&mem, 42).unwrap();
        assert!(!entry.is_resolved(&mem, Bytecode::Getfield).unwrap());

        let flags = EntryFlags::field(TosState::Itos, 0, false, true);
        entry.set_field(&mem, Bytecode::Getfield, None, 0, 16, flags).unwrap();
        assert!(entry.is_resolved(&mem, Bytecode::Getfield).unwrap());
        assert!(!entry.is_resolved(&mem, Bytecode::Putfield).unwrap());

        let snapshot = entry.load(&mem).unwrap();
        assert_eq!(snapshot.cp_index(), 42);
        assert_eq!(snapshot.bytecode_1(), Bytecode::Getfield as u8);
        assert_eq!(snapshot.bytecode_2(), 0);
        assert_eq!(snapshot.f2, 16);
    }

    #[test]
    fn test_shared_methodref_keeps_both_resolutions() {
        let mem = memory();
        let entry = CacheEntryRef::at(CACHE, 0);
        entry.initialize(&mem, 3).unwrap();
        let flags = EntryFlags::method(TosState::Vtos, 1);
        entry.set_direct_call(&mem, Bytecode::Invokespecial, 0x1234, flags).unwrap();
        entry.set_virtual_call(&mem, 5, flags).unwrap();
        let snapshot = entry.load(&mem).unwrap();
        assert_eq!(snapshot.f1, 0x1234);
        assert_eq!(snapshot.f2, 5);
        assert!(entry.is_resolved(&mem, Bytecode::Invokespecial).unwrap());
        assert!(entry.is_resolved(&mem, Bytecode::Invokevirtual).unwrap());

        let other = CacheEntryRef::at(CACHE, 1);
        other.initialize(&mem, 4).unwrap();
        other.set_virtual_call(&mem, 0x1234, flags.with_vfinal()).unwrap();
        other.set_direct_call(&mem, Bytecode::Invokespecial, 0x1234, flags).unwrap();
        assert!(other.load(&mem).unwrap().flags.is_vfinal());
    }

    #[test]
    fn test_racing_resolution_is_consistent() {
        let mem = Arc::new(memory());
        let entry = CacheEntryRef::at(CACHE, 2);
        entry.initialize(&mem, 9).unwrap();
        let flags = EntryFlags::method(TosState::Itos, 2).with_vfinal();

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let mem = Arc::clone(&mem);
                thread::spawn(move || {
                    for _ in 0..200 {
                        entry.set_virtual_call(&mem, 0xABCD, flags).unwrap();
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mem = Arc::clone(&mem);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        if entry.is_resolved(&mem, Bytecode::Invokevirtual).unwrap() {
                            let snapshot = entry.load(&mem).unwrap();
                            assert_eq!(snapshot.f2, 0xABCD);
                            assert_eq!(snapshot.flags, flags);
                        }
                    }
                })
            })
            .collect();
        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
        assert!(entry.is_resolved(&mem, Bytecode::Invokevirtual).unwrap());
        assert_eq!(entry.cp_index(&mem).unwrap(), 9);
    }
}
