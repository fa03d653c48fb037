//! Sparse simulated memory.
//!
//! Memory is a set of mapped regions made of `AtomicU64` words, so several
//! host threads may race on it the way harts race on real memory. Sub-word
//! and unaligned accesses are supported; an access that spans two words is
//! not single-copy atomic, matching the hardware's guarantee for
//! misaligned accesses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::runtime::StackMemory;
use crate::runtime::layout::PROTECTED_PAGE_SIZE;

/// Error type for memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("access to unmapped address {addr:#x}")]
    Unmapped { addr: u64 },
    #[error("region {name} at {base:#x} overlaps an existing mapping")]
    Overlap { name: String, base: u64 },
    #[error("invalid region size {0:#x}")]
    InvalidSize(u64),
}

impl MemoryError {
    /// The fault hit the protected page at address zero.
    pub fn is_null_access(&self) -> bool {
        matches!(self, MemoryError::Unmapped { addr } if *addr < PROTECTED_PAGE_SIZE)
    }
}

struct Region {
    name: String,
    base: u64,
    words: Box<[AtomicU64]>,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.words.len() as u64 * 8
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// A sparse, thread-safe, little-endian address space.
#[derive(Default)]
pub struct Memory {
    regions: RwLock<Vec<Arc<Region>>>,
}

fn mask(size: usize) -> u64 {
    if size >= 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `size` zeroed bytes at `base`. Both must be 8-byte aligned and
    /// the region may not cover the protected page.
    pub fn map(&self, name: &str, base: u64, size: u64) -> Result<(), MemoryError> {
        if size == 0 || size % 8 != 0 || base % 8 != 0 || base < PROTECTED_PAGE_SIZE {
            return Err(MemoryError::InvalidSize(size));
        }
        let mut regions = self.regions.write();
        if regions
            .iter()
            .any(|r| base < r.end() && r.base < base + size)
        {
            return Err(MemoryError::Overlap {
                name: name.to_string(),
                base,
            });
        }
        let words: Box<[AtomicU64]> = (0..size / 8).map(|_| AtomicU64::new(0)).collect();
        regions.push(Arc::new(Region {
            name: name.to_string(),
            base,
            words,
        }));
        tracing::debug!(region = name, base = format_args!("{:#x}", base), size, "mapped");
        Ok(())
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.regions.read().iter().any(|r| r.contains(addr))
    }

    /// Name of the region containing `addr`.
    pub fn region_name(&self, addr: u64) -> Option<String> {
        self.regions
            .read()
            .iter()
            .find(|r| r.contains(addr))
            .map(|r| r.name.clone())
    }

    fn with_word<R>(&self, addr: u64, f: impl FnOnce(&AtomicU64) -> R) -> Result<R, MemoryError> {
        let regions = self.regions.read();
        let region = regions
            .iter()
            .find(|r| r.contains(addr))
            .ok_or(MemoryError::Unmapped { addr })?;
        let index = ((addr - region.base) / 8) as usize;
        Ok(f(&region.words[index]))
    }

    /// Load `size` (1, 2, 4 or 8) bytes, zero-extended.
    pub fn load(&self, addr: u64, size: usize, order: Ordering) -> Result<u64, MemoryError> {
        let shift = (addr % 8) as usize;
        let word_addr = addr - shift as u64;
        let lo = self.with_word(word_addr, |w| w.load(order)).map_err(|_| MemoryError::Unmapped { addr })?;
        if shift + size <= 8 {
            return Ok((lo >> (shift * 8)) & mask(size));
        }
        let hi = self
            .with_word(word_addr + 8, |w| w.load(order))
            .map_err(|_| MemoryError::Unmapped { addr: word_addr + 8 })?;
        let low_bytes = 8 - shift;
        let value = (lo >> (shift * 8)) | (hi << (low_bytes * 8));
        Ok(value & mask(size))
    }

    fn store_in_word(&self, word_addr: u64, shift: usize, size: usize, value: u64, order: Ordering) -> Result<(), MemoryError> {
        self.with_word(word_addr, |w| {
            if shift == 0 && size == 8 {
                w.store(value, order);
            } else {
                let m = mask(size) << (shift * 8);
                let v = (value << (shift * 8)) & m;
                let _ = w.fetch_update(order, Ordering::Relaxed, |old| Some((old & !m) | v));
            }
        })
    }

    /// Store the low `size` bytes of `value`.
    pub fn store(&self, addr: u64, size: usize, value: u64, order: Ordering) -> Result<(), MemoryError> {
        let shift = (addr % 8) as usize;
        let word_addr = addr - shift as u64;
        if shift + size <= 8 {
            return self
                .store_in_word(word_addr, shift, size, value, order)
                .map_err(|_| MemoryError::Unmapped { addr });
        }
        if !self.is_mapped(word_addr + 8) {
            return Err(MemoryError::Unmapped { addr: word_addr + 8 });
        }
        let low_bytes = 8 - shift;
        self.store_in_word(word_addr, shift, low_bytes, value, order)
            .map_err(|_| MemoryError::Unmapped { addr })?;
        self.store_in_word(word_addr + 8, 0, size - low_bytes, value >> (low_bytes * 8), order)
    }

    pub fn load_u8(&self, addr: u64) -> Result<u8, MemoryError> {
        self.load(addr, 1, Ordering::Relaxed).map(|v| v as u8)
    }

    pub fn load_u16(&self, addr: u64) -> Result<u16, MemoryError> {
        self.load(addr, 2, Ordering::Relaxed).map(|v| v as u16)
    }

    pub fn load_u32(&self, addr: u64) -> Result<u32, MemoryError> {
        self.load(addr, 4, Ordering::Relaxed).map(|v| v as u32)
    }

    pub fn load_u64(&self, addr: u64) -> Result<u64, MemoryError> {
        self.load(addr, 8, Ordering::Relaxed)
    }

    pub fn store_u8(&self, addr: u64, value: u8) -> Result<(), MemoryError> {
        self.store(addr, 1, value as u64, Ordering::Relaxed)
    }

    pub fn store_u16(&self, addr: u64, value: u16) -> Result<(), MemoryError> {
        self.store(addr, 2, value as u64, Ordering::Relaxed)
    }

    pub fn store_u32(&self, addr: u64, value: u32) -> Result<(), MemoryError> {
        self.store(addr, 4, value as u64, Ordering::Relaxed)
    }

    pub fn store_u64(&self, addr: u64, value: u64) -> Result<(), MemoryError> {
        self.store(addr, 8, value, Ordering::Relaxed)
    }

    pub fn load_acquire_u64(&self, addr: u64) -> Result<u64, MemoryError> {
        self.load(addr, 8, Ordering::Acquire)
    }

    pub fn store_release_u64(&self, addr: u64, value: u64) -> Result<(), MemoryError> {
        self.store(addr, 8, value, Ordering::Release)
    }

    /// Atomically replace the byte at `addr` if it still equals `expected`.
    /// Returns the byte observed.
    pub fn compare_exchange_u8(&self, addr: u64, expected: u8, new: u8) -> Result<u8, MemoryError> {
        let shift = (addr % 8) * 8;
        self.with_word(addr - addr % 8, |w| {
            let mut observed = expected;
            let _ = w.fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                observed = (old >> shift) as u8;
                if observed == expected {
                    Some((old & !(0xFF << shift)) | ((new as u64) << shift))
                } else {
                    None
                }
            });
            observed
        })
    }

    pub fn read_bytes(&self, addr: u64, out: &mut [u8]) -> Result<(), MemoryError> {
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.load_u8(addr + i as u64)?;
        }
        Ok(())
    }

    pub fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        let mut i = 0;
        while i < data.len() {
            let at = addr + i as u64;
            if at % 8 == 0 && data.len() - i >= 8 {
                let mut word = [0u8; 8];
                word.copy_from_slice(&data[i..i + 8]);
                self.store_u64(at, u64::from_le_bytes(word))?;
                i += 8;
            } else {
                self.store_u8(at, data[i])?;
                i += 1;
            }
        }
        Ok(())
    }

    /// Set `len` bytes at `addr` to `byte`.
    pub fn fill(&self, addr: u64, len: u64, byte: u8) -> Result<(), MemoryError> {
        let pattern = u64::from_le_bytes([byte; 8]);
        let mut at = addr;
        let end = addr + len;
        while at < end {
            if at % 8 == 0 && end - at >= 8 {
                self.store_u64(at, pattern)?;
                at += 8;
            } else {
                self.store_u8(at, byte)?;
                at += 1;
            }
        }
        Ok(())
    }
}

impl StackMemory for Memory {
    fn load_word(&self, addr: u64) -> u64 {
        self.load_u64(addr).unwrap_or(0)
    }

    fn store_word(&self, addr: u64, value: u64) {
        if let Err(e) = self.store_u64(addr, value) {
            tracing::warn!("frame store failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        let mem = Memory::new();
        mem.map("test", 0x1_0000, 0x1000).unwrap();
        mem
    }

    #[test]
    fn test_sub_word_access() {
        let mem = memory();
        mem.store_u64(0x1_0000, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.load_u8(0x1_0000).unwrap(), 0x88);
        assert_eq!(mem.load_u16(0x1_0002).unwrap(), 0x5566);
        assert_eq!(mem.load_u32(0x1_0004).unwrap(), 0x1122_3344);

        mem.store_u8(0x1_0001, 0xAB).unwrap();
        assert_eq!(mem.load_u64(0x1_0000).unwrap(), 0x1122_3344_5566_AB88);
    }

    #[test]
    fn test_unaligned_access_spanning_words() {
        let mem = memory();
        mem.store_u32(0x1_0006, 0xDEAD_BEEF).unwrap();
        assert_eq!(mem.load_u32(0x1_0006).unwrap(), 0xDEAD_BEEF);
        assert_eq!(mem.load_u16(0x1_0006).unwrap(), 0xBEEF);
        assert_eq!(mem.load_u16(0x1_0008).unwrap(), 0xDEAD);

        mem.store_u64(0x1_0013, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(mem.load_u64(0x1_0013).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_faults() {
        let mem = memory();
        let err = mem.load_u64(8).unwrap_err();
        assert!(err.is_null_access());
        let err = mem.load_u64(0x2_0000).unwrap_err();
        assert!(!err.is_null_access());
        assert!(mem.store_u64(0x1_0FFC, 0).is_err());
        assert!(mem.map("overlap", 0x1_0800, 0x1000).is_err());
        assert!(mem.map("zero page", 0, 0x1000).is_err());
    }

    #[test]
    fn test_compare_exchange_byte() {
        let mem = memory();
        mem.store_u8(0x1_0003, 0xB4).unwrap();
        assert_eq!(mem.compare_exchange_u8(0x1_0003, 0xB4, 0xCC).unwrap(), 0xB4);
        assert_eq!(mem.load_u8(0x1_0003).unwrap(), 0xCC);
        assert_eq!(mem.compare_exchange_u8(0x1_0003, 0xB4, 0x11).unwrap(), 0xCC);
        assert_eq!(mem.load_u8(0x1_0003).unwrap(), 0xCC);
    }

    #[test]
    fn test_bulk_helpers() {
        let mem = memory();
        mem.fill(0x1_0003, 13, 0xFF).unwrap();
        assert_eq!(mem.load_u8(0x1_0002).unwrap(), 0);
        assert_eq!(mem.load_u64(0x1_0008).unwrap(), u64::MAX);
        assert_eq!(mem.load_u8(0x1_0010).unwrap(), 0);

        mem.write_bytes(0x1_0101, b"hello world").unwrap();
        let mut out = [0u8; 11];
        mem.read_bytes(0x1_0101, &mut out).unwrap();
        assert_eq!(&out, b"hello world");
    }
}
