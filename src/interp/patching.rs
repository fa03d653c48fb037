//! Bytecode quickening.
//!
//! Generated code rewrites a bytecode into its quickened form with a single
//! byte store. A breakpoint hides the real bytecode: the store then goes to
//! the breakpoint table instead, so that clearing the breakpoint restores
//! the quickened form.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::bytecodes::Bytecode;
use super::cp_cache::{BYTECODE_2, INDICES};
use super::interp_masm::{InterpreterMacroAssembler, XBCP};
use super::templates::TemplateGen;
use crate::asm::Reg;
use crate::runtime::RuntimeEntry;
use crate::sim::memory::{Memory, MemoryError};

impl TemplateGen<'_> {
    /// Replace the bytecode at `xbcp` by the one in `bc_reg` (loaded with
    /// `bc` first when `load_bc_into_bc_reg`). Clobbers `tmp`, `t0`, `a0`
    /// and `a1`.
    pub fn patch_bytecode(&mut self, bc: Bytecode, bc_reg: Reg, tmp: Reg, load_bc_into_bc_reg: bool) {
        if !self.config().rewrite_bytecodes {
            return;
        }
        emit_patch_bytecode(self, bc, bc_reg, tmp, load_bc_into_bc_reg);
    }
}

fn is_fast_put(bc: Bytecode) -> bool {
    (Bytecode::FastAputfield as u8..=Bytecode::FastSputfield as u8).contains(&(bc as u8))
}

fn emit_patch_bytecode(masm: &mut InterpreterMacroAssembler, bc: Bytecode, bc_reg: Reg, tmp: Reg, load: bool) {
    let patch_done = masm.new_label();
    let fast_patch = masm.new_label();

    if is_fast_put(bc) {
        // Only patch once the put side of the entry is resolved; final
        // fields never are.
        masm.get_cache_and_index_at_bcp(tmp, bc_reg, 1);
        masm.lbu(tmp, tmp, InterpreterMacroAssembler::cache_field(INDICES + BYTECODE_2));
        if load {
            masm.li(bc_reg, bc as i64);
        }
        masm.beqz(tmp, patch_done);
    } else if load {
        masm.li(bc_reg, bc as i64);
    }

    masm.lbu(tmp, XBCP, 0);
    masm.li(Reg::T0, Bytecode::Breakpoint as i64);
    masm.bne(tmp, Reg::T0, fast_patch);
    masm.mv(Reg::A1, bc_reg);
    masm.call_vm(RuntimeEntry::SetOriginalBytecode);
    masm.j(patch_done);

    masm.bind(fast_patch);
    masm.sb(bc_reg, XBCP, 0);
    masm.bind(patch_done);
}

/// Original bytecodes under breakpoints, keyed by bytecode address.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    originals: Mutex<HashMap<u64, u8>>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a breakpoint at `bcp`, remembering the bytecode it covers.
    /// Setting the same breakpoint twice is a no-op.
    pub fn set(&self, mem: &Memory, bcp: u64) -> Result<(), MemoryError> {
        let mut originals = self.originals.lock();
        if originals.contains_key(&bcp) {
            return Ok(());
        }
        loop {
            let current = mem.load_u8(bcp)?;
            if mem.compare_exchange_u8(bcp, current, Bytecode::Breakpoint as u8)? == current {
                originals.insert(bcp, current);
                return Ok(());
            }
        }
    }

    /// Remove the breakpoint at `bcp`, putting back the (possibly
    /// quickened) original. Returns whether one was set.
    pub fn clear(&self, mem: &Memory, bcp: u64) -> Result<bool, MemoryError> {
        let mut originals = self.originals.lock();
        match originals.remove(&bcp) {
            Some(original) => {
                mem.store_u8(bcp, original)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn original(&self, bcp: u64) -> Option<u8> {
        self.originals.lock().get(&bcp).copied()
    }

    /// Record the quickened form of the bytecode under a breakpoint.
    pub fn set_original(&self, bcp: u64, bc: u8) -> bool {
        match self.originals.lock().get_mut(&bcp) {
            Some(slot) => {
                *slot = bc;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.originals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a host-side quickening attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quickened {
    /// The byte in the code now holds the new bytecode.
    Patched,
    /// A breakpoint covers the bytecode; the table holds the new one.
    UnderBreakpoint,
    /// Someone else rewrote the bytecode first.
    Lost(u8),
}

/// One bytecode in method code, patched by the host with the same protocol
/// as generated code: compare with the breakpoint, then a single byte write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodeCell {
    bcp: u64,
}

impl BytecodeCell {
    pub fn new(bcp: u64) -> Self {
        Self { bcp }
    }

    pub fn address(&self) -> u64 {
        self.bcp
    }

    /// The bytecode that executes here, looking through breakpoints.
    pub fn code(&self, mem: &Memory, breakpoints: &BreakpointTable) -> Result<u8, MemoryError> {
        let live = mem.load_u8(self.bcp)?;
        if live == Bytecode::Breakpoint as u8 {
            if let Some(original) = breakpoints.original(self.bcp) {
                return Ok(original);
            }
        }
        Ok(live)
    }

    /// Rewrite `expected` into `new`.
    pub fn quicken(
        &self,
        mem: &Memory,
        breakpoints: &BreakpointTable,
        expected: u8,
        new: u8,
    ) -> Result<Quickened, MemoryError> {
        loop {
            let live = mem.compare_exchange_u8(self.bcp, expected, new)?;
            if live == expected {
                return Ok(Quickened::Patched);
            }
            if live != Bytecode::Breakpoint as u8 {
                return Ok(Quickened::Lost(live));
            }
            if breakpoints.set_original(self.bcp, new) {
                return Ok(Quickened::UnderBreakpoint);
            }
            // The breakpoint went away between the two reads.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const CODE: u64 = 0x0100_0000;

    fn memory() -> Memory {
        let mem = Memory::new();
        mem.map("meta", CODE, 4096).unwrap();
        mem
    }

    #[test]
    fn test_quicken_plain_bytecode() {
        let mem = memory();
        let breakpoints = BreakpointTable::new();
        mem.store_u8(CODE, Bytecode::Getfield as u8).unwrap();
        let cell = BytecodeCell::new(CODE);

        let result = cell
            .quicken(&mem, &breakpoints, Bytecode::Getfield as u8, Bytecode::FastIgetfield as u8)
            .unwrap();
        assert_eq!(result, Quickened::Patched);
        assert_eq!(mem.load_u8(CODE).unwrap(), Bytecode::FastIgetfield as u8);
    }

    #[test]
    fn test_quicken_under_breakpoint_survives_clear() {
        let mem = memory();
        let breakpoints = BreakpointTable::new();
        mem.store_u8(CODE, Bytecode::Getfield as u8).unwrap();
        breakpoints.set(&mem, CODE).unwrap();
        assert_eq!(mem.load_u8(CODE).unwrap(), Bytecode::Breakpoint as u8);

        let cell = BytecodeCell::new(CODE);
        assert_eq!(cell.code(&mem, &breakpoints).unwrap(), Bytecode::Getfield as u8);
        let result = cell
            .quicken(&mem, &breakpoints, Bytecode::Getfield as u8, Bytecode::FastIgetfield as u8)
            .unwrap();
        assert_eq!(result, Quickened::UnderBreakpoint);
        assert_eq!(mem.load_u8(CODE).unwrap(), Bytecode::Breakpoint as u8);

        assert!(breakpoints.clear(&mem, CODE).unwrap());
        assert_eq!(mem.load_u8(CODE).unwrap(), Bytecode::FastIgetfield as u8);
        assert!(breakpoints.is_empty());
    }

    #[test]
    fn test_racing_quickeners_agree() {
        let mem = Arc::new(memory());
        let breakpoints = Arc::new(BreakpointTable::new());
        mem.store_u8(CODE, Bytecode::Iload as u8).unwrap();

        let handles: Vec<_> = [Bytecode::FastIload, Bytecode::FastIload2]
            .into_iter()
            .map(|target| {
                let mem = Arc::clone(&mem);
                let breakpoints = Arc::clone(&breakpoints);
                thread::spawn(move || {
                    BytecodeCell::new(CODE)
                        .quicken(&mem, &breakpoints, Bytecode::Iload as u8, target as u8)
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<Quickened> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let patched = results.iter().filter(|r| **r == Quickened::Patched).count();
        assert_eq!(patched, 1);
        let live = mem.load_u8(CODE).unwrap();
        assert!(live == Bytecode::FastIload as u8 || live == Bytecode::FastIload2 as u8);
        assert!(results.contains(&Quickened::Lost(live)));
    }
}
