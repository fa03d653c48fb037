//! Field access: `getfield`/`putfield`/`getstatic`/`putstatic`, their
//! quickened forms and constant pool cache resolution.
//!
//! The generic templates find the field's TOS-state in the cache entry and
//! jump through a branch table with one entry per state. Every entry is
//! preceded by exactly one instruction that only volatile accesses execute:
//! the jump target is `table[tos] - 4 * volatile`.

use super::TemplateGen;
use crate::asm::{AccessReg, Cond, Decorators, Label, Reg};
use crate::interp::bytecodes::{Bytecode, TosState};
use crate::interp::cp_cache::{self, F1, F2, FLAGS, INDICES, TOS_STATE_MASK, shift};
use crate::interp::interp_masm::{FTOS, InterpreterMacroAssembler, XLOCALS, XBCP, XVOLATILE, XTOS};
use crate::runtime::RuntimeEntry;
use crate::runtime::layout::{method, oop};

/// Emission order of the branch table entries.
const FIELD_STATES: [TosState; 9] = [
    TosState::Dtos,
    TosState::Ftos,
    TosState::Itos,
    TosState::Ltos,
    TosState::Btos,
    TosState::Ztos,
    TosState::Ctos,
    TosState::Stos,
    TosState::Atos,
];

fn fast_get_code(state: TosState) -> Bytecode {
    match state {
        TosState::Btos | TosState::Ztos => Bytecode::FastBgetfield,
        TosState::Ctos => Bytecode::FastCgetfield,
        TosState::Stos => Bytecode::FastSgetfield,
        TosState::Itos => Bytecode::FastIgetfield,
        TosState::Ltos => Bytecode::FastLgetfield,
        TosState::Ftos => Bytecode::FastFgetfield,
        TosState::Dtos => Bytecode::FastDgetfield,
        TosState::Atos | TosState::Vtos => Bytecode::FastAgetfield,
    }
}

fn fast_put_code(state: TosState) -> Bytecode {
    match state {
        TosState::Btos => Bytecode::FastBputfield,
        TosState::Ztos => Bytecode::FastZputfield,
        TosState::Ctos => Bytecode::FastCputfield,
        TosState::Stos => Bytecode::FastSputfield,
        TosState::Itos => Bytecode::FastIputfield,
        TosState::Ltos => Bytecode::FastLputfield,
        TosState::Ftos => Bytecode::FastFputfield,
        TosState::Dtos => Bytecode::FastDputfield,
        TosState::Atos | TosState::Vtos => Bytecode::FastAputfield,
    }
}

/// Register a value of `state` lives in.
fn tos_reg(state: TosState) -> AccessReg {
    if state.is_float() {
        AccessReg::F(FTOS)
    } else {
        AccessReg::X(XTOS)
    }
}

const fn entry_field(field: i32) -> i32 {
    InterpreterMacroAssembler::cache_field(field)
}

impl TemplateGen<'_> {
    /// Make sure the cache entry of the current bytecode is resolved
    /// under `byte_no`. Leaves the entry in `cache`; clobbers `index`,
    /// `t1`, `t4` and the registers of a runtime call. Static methods and
    /// fields also pass the class initialization barrier.
    pub(super) fn resolve_cache_and_index(&mut self, byte_no: i32, cache: Reg, index: Reg) {
        let resolved = self.new_label();
        let slow = self.new_label();
        let code = cp_cache::resolved_code(self.bytecode());

        self.get_cache_and_index_at_bcp(cache, index, 1);
        self.lbu(Reg::T1, cache, entry_field(INDICES + byte_no));
        self.acquire();
        self.li(Reg::T4, code as i64);
        self.beq(Reg::T1, Reg::T4, resolved);

        self.bind(slow);
        self.li(Reg::A1, code as i64);
        self.call_vm(RuntimeEntry::ResolveFromCache);
        self.get_cache_and_index_at_bcp(cache, index, 1);

        self.bind(resolved);
        let holder = match code {
            Bytecode::Invokestatic => {
                self.ld(Reg::T1, cache, entry_field(F1));
                self.ld(Reg::T1, Reg::T1, method::HOLDER);
                true
            }
            Bytecode::Getstatic | Bytecode::Putstatic => {
                self.ld(Reg::T1, cache, entry_field(F1));
                self.ld(Reg::T1, Reg::T1, oop::MIRROR_KLASS);
                true
            }
            _ => false,
        };
        if holder {
            let initialized = self.new_label();
            self.clinit_barrier(Reg::T1, Reg::T4, initialized);
            self.j(slow);
            self.bind(initialized);
        }
    }

    /// `XVOLATILE` = volatile bit of the entry in `cache`, `tos` = its
    /// TOS-state, `offset` = field offset.
    fn load_field_entry(&mut self, cache: Reg, offset: Reg, tos: Reg) {
        self.ld(offset, cache, entry_field(F2));
        self.ld(tos, cache, entry_field(FLAGS));
        self.srli(XVOLATILE, tos, shift::IS_VOLATILE);
        self.andi(XVOLATILE, XVOLATILE, 1);
        self.srli(tos, tos, shift::TOS_STATE);
        self.andi(tos, tos, TOS_STATE_MASK as i32);
    }

    /// Jump to `table[tos] - 4 * XVOLATILE`.
    fn field_dispatch(&mut self, tos: Reg, entries: [Option<Label>; TosState::COUNT]) {
        if self.config().verify_interpreter {
            let illegal = self.stubs().illegal_tos_state;
            self.li(Reg::T6, TosState::COUNT as i64);
            self.bc_far(Cond::Geu, tos, Reg::T6, illegal);
        }
        self.branch_table(Reg::T1, entries);
        self.shadd(Reg::T1, tos, Reg::T1, Reg::T6, 3);
        self.ld(Reg::T1, Reg::T1, 0);
        self.slli(Reg::T6, XVOLATILE, 2);
        self.sub(Reg::T1, Reg::T1, Reg::T6);
        self.jr(Reg::T1);
    }

    /// `T3` = receiver popped from the stack, null checked.
    fn pop_and_check_object(&mut self, obj: Reg) {
        self.pop_ptr(obj);
        self.null_check(obj, -1);
    }

    pub(super) fn getfield(&mut self) {
        self.getfield_or_static(cp_cache::BYTECODE_1, false, true);
    }

    pub(super) fn nofast_getfield(&mut self) {
        self.getfield_or_static(cp_cache::BYTECODE_1, false, false);
    }

    pub(super) fn getstatic(&mut self) {
        self.getfield_or_static(cp_cache::BYTECODE_1, true, false);
    }

    fn getfield_or_static(&mut self, byte_no: i32, is_static: bool, may_rewrite: bool) {
        let (cache, obj, offset, tos) = (Reg::T2, Reg::T3, Reg::T4, Reg::T5);
        let done = self.new_label();

        self.resolve_cache_and_index(byte_no, cache, Reg::T3);
        self.load_field_entry(cache, offset, tos);
        if is_static {
            self.ld(obj, cache, entry_field(F1));
        } else {
            self.pop_and_check_object(obj);
        }
        self.add(obj, obj, offset);

        let mut entries = [None; TosState::COUNT];
        let table_jump = self.new_label();
        self.j(table_jump);

        for state in FIELD_STATES {
            // Volatile entry: a volatile load is fence, load, acquire.
            self.full_fence();
            let entry = self.new_label();
            self.bind(entry);
            entries[state.index()] = Some(entry);

            let ty = state.basic_type();
            if state == TosState::Atos {
                self.load_heap_oop(XTOS, obj, 0, Reg::T6, Decorators::empty());
            } else {
                self.access_load_at(ty, Decorators::IN_HEAP, tos_reg(state), obj, 0, Reg::T6);
            }
            self.push(state);
            if !is_static && may_rewrite {
                self.patch_bytecode(fast_get_code(state), Reg::T5, Reg::T6, true);
            }
            self.j(done);
        }

        self.bind(table_jump);
        self.field_dispatch(tos, entries);

        self.bind(done);
        let not_volatile = self.new_label();
        self.beqz(XVOLATILE, not_volatile);
        self.acquire();
        self.bind(not_volatile);
    }

    pub(super) fn putfield(&mut self) {
        self.putfield_or_static(cp_cache::BYTECODE_2, false, true);
    }

    pub(super) fn nofast_putfield(&mut self) {
        self.putfield_or_static(cp_cache::BYTECODE_2, false, false);
    }

    pub(super) fn putstatic(&mut self) {
        self.putfield_or_static(cp_cache::BYTECODE_2, true, false);
    }

    fn putfield_or_static(&mut self, byte_no: i32, is_static: bool, may_rewrite: bool) {
        let (cache, obj, offset, tos) = (Reg::T2, Reg::T3, Reg::T4, Reg::T5);
        let done = self.new_label();

        self.resolve_cache_and_index(byte_no, cache, Reg::T3);
        self.load_field_entry(cache, offset, tos);
        if is_static {
            self.ld(obj, cache, entry_field(F1));
        }

        let mut entries = [None; TosState::COUNT];
        let table_jump = self.new_label();
        self.j(table_jump);

        for state in FIELD_STATES {
            // Volatile entry.
            self.release();
            let entry = self.new_label();
            self.bind(entry);
            entries[state.index()] = Some(entry);

            self.pop(state);
            if !is_static {
                self.pop_and_check_object(obj);
            }
            self.add(obj, obj, offset);
            let ty = state.basic_type();
            self.access_store_at(ty, Decorators::IN_HEAP, obj, 0, tos_reg(state), Reg::T5, Reg::T6);
            if !is_static && may_rewrite {
                self.patch_bytecode(fast_put_code(state), Reg::T5, Reg::T6, true);
            }
            self.j(done);
        }

        self.bind(table_jump);
        self.field_dispatch(tos, entries);

        self.bind(done);
        let not_volatile = self.new_label();
        self.beqz(XVOLATILE, not_volatile);
        self.full_fence();
        self.bind(not_volatile);
    }

    /// Branch over `body` unless the entry in `cache` is volatile.
    fn if_volatile(&mut self, cache: Reg, tmp: Reg, body: fn(&mut Self)) {
        let not_volatile = self.new_label();
        self.ld(tmp, cache, entry_field(FLAGS));
        self.srli(tmp, tmp, shift::IS_VOLATILE);
        self.andi(tmp, tmp, 1);
        self.beqz(tmp, not_volatile);
        body(self);
        self.bind(not_volatile);
    }

    /// Quickened `getfield` with the receiver in `xtos`.
    pub(super) fn fast_accessfield(&mut self, state: TosState) {
        let (cache, addr) = (Reg::T2, Reg::T1);
        self.get_cache_and_index_at_bcp(cache, Reg::T3, 1);
        self.ld(Reg::T4, cache, entry_field(F2));
        self.null_check(XTOS, -1);
        self.add(addr, XTOS, Reg::T4);
        if state == TosState::Atos {
            self.load_heap_oop(XTOS, addr, 0, Reg::T6, Decorators::empty());
        } else {
            self.access_load_at(state.basic_type(), Decorators::IN_HEAP, tos_reg(state), addr, 0, Reg::T6);
        }
        self.if_volatile(cache, Reg::T5, |g| g.acquire());
    }

    /// Quickened `putfield`: value in the TOS registers, receiver below.
    pub(super) fn fast_storefield(&mut self, state: TosState) {
        let (cache, obj) = (Reg::T2, Reg::T3);
        self.get_cache_and_index_at_bcp(cache, Reg::T3, 1);
        self.ld(Reg::T4, cache, entry_field(F2));
        self.if_volatile(cache, Reg::T5, |g| g.release());

        self.pop_and_check_object(obj);
        self.add(obj, obj, Reg::T4);
        self.access_store_at(state.basic_type(), Decorators::IN_HEAP, obj, 0, tos_reg(state), Reg::T5, Reg::T6);

        self.if_volatile(cache, Reg::T5, |g| g.full_fence());
    }

    /// `aload_0; getfield` fused. The cache index belongs to the
    /// `getfield` one byte further on, which is also where a null
    /// receiver is reported.
    pub(super) fn fast_xaccess(&mut self, state: TosState) {
        let (cache, addr) = (Reg::T2, Reg::T1);
        self.ld(XTOS, XLOCALS, 0);
        self.get_cache_and_index_at_bcp(cache, Reg::T3, 2);
        self.ld(Reg::T4, cache, entry_field(F2));

        self.addi(XBCP, XBCP, 1);
        self.null_check(XTOS, -1);
        self.add(addr, XTOS, Reg::T4);
        match state {
            TosState::Atos => self.load_heap_oop(XTOS, addr, 0, Reg::T6, Decorators::empty()),
            TosState::Ftos => self.flw(FTOS, addr, 0),
            _ => self.lw(XTOS, addr, 0),
        }
        self.if_volatile(cache, Reg::T5, |g| g.acquire());
        self.addi(XBCP, XBCP, -1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_table_covers_every_value_state() {
        let mut seen: Vec<TosState> = FIELD_STATES.to_vec();
        seen.sort_by_key(|s| s.index());
        seen.dedup();
        assert_eq!(seen.len(), TosState::COUNT - 1);
        assert!(!FIELD_STATES.contains(&TosState::Vtos));
    }

    #[test]
    fn test_quickened_codes() {
        assert_eq!(fast_get_code(TosState::Ztos), Bytecode::FastBgetfield);
        assert_eq!(fast_put_code(TosState::Ztos), Bytecode::FastZputfield);
        for state in FIELD_STATES {
            assert_eq!(fast_get_code(state).java_code(), Bytecode::Getfield);
            assert_eq!(fast_put_code(state).java_code(), Bytecode::Putfield);
        }
    }
}
