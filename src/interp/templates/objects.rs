//! Arrays, allocation, type checks, exceptions, monitors, `wide` and
//! `breakpoint`.

use super::TemplateGen;
use crate::asm::{AccessReg, Decorators, Reg};
use crate::interp::bytecodes::TosState;
use crate::interp::interp_masm::{
    DispatchKind, DispatchTables, FTOS, XBCP, XDISPATCH, XESP, XMETHOD, XORIGINAL_BC, XTHREAD, XTOS, fp_slot,
};
use crate::runtime::{Barrier, RuntimeEntry};
use crate::runtime::layout::{BasicType, InitState, constant_pool, frame, klass, oop, tag, thread};

const ARRAY: Decorators = Decorators::IN_HEAP.union(Decorators::IS_ARRAY);

/// log2 of the element size of a primitive array.
fn log2_element_size(ty: BasicType) -> u32 {
    ty.heap_size(false).trailing_zeros()
}

impl TemplateGen<'_> {
    // ==================== Array loads ====================

    /// `T2` = address of element `XTOS` of the array below it, minus the
    /// array base offset.
    fn array_element(&mut self, log2_size: u32) {
        let aioobe = self.stubs().array_index_out_of_bounds;
        self.mv(Reg::T1, XTOS);
        self.pop_ptr(Reg::T2);
        self.index_check(Reg::T2, Reg::T1, Reg::T3, aioobe);
        self.shadd(Reg::T2, Reg::T1, Reg::T2, Reg::T3, log2_size);
    }

    fn array_load(&mut self, ty: BasicType) {
        self.array_element(log2_element_size(ty));
        let dst = match ty {
            BasicType::Float | BasicType::Double => AccessReg::F(FTOS),
            _ => AccessReg::X(XTOS),
        };
        self.access_load_at(ty, ARRAY, dst, Reg::T2, oop::ARRAY_BASE, Reg::T3);
    }

    pub(super) fn iaload(&mut self) {
        self.array_load(BasicType::Int);
    }

    pub(super) fn laload(&mut self) {
        self.array_load(BasicType::Long);
    }

    pub(super) fn faload(&mut self) {
        self.array_load(BasicType::Float);
    }

    pub(super) fn daload(&mut self) {
        self.array_load(BasicType::Double);
    }

    pub(super) fn aaload(&mut self) {
        let log2 = self.log_heap_oop_size();
        self.array_element(log2);
        self.load_heap_oop(XTOS, Reg::T2, oop::ARRAY_BASE, Reg::T3, Decorators::IS_ARRAY);
    }

    /// Byte and boolean arrays share `baload`.
    pub(super) fn baload(&mut self) {
        self.array_load(BasicType::Byte);
    }

    pub(super) fn caload(&mut self) {
        self.array_load(BasicType::Char);
    }

    pub(super) fn saload(&mut self) {
        self.array_load(BasicType::Short);
    }

    /// `iload; caload` fused.
    pub(super) fn fast_icaload(&mut self) {
        self.lbu(Reg::T1, XBCP, 1);
        self.local_address(Reg::T1, Reg::T1);
        self.lw(XTOS, Reg::T1, 0);
        self.array_load(BasicType::Char);
    }

    pub(super) fn arraylength(&mut self) {
        self.null_check(XTOS, oop::ARRAY_LENGTH as i64);
        self.lw(XTOS, XTOS, oop::ARRAY_LENGTH);
    }

    // ==================== Array stores ====================

    /// Value in the TOS registers; index and array on the stack.
    fn array_store(&mut self, ty: BasicType) {
        let aioobe = self.stubs().array_index_out_of_bounds;
        self.pop_i(Reg::T1);
        self.pop_ptr(Reg::T2);
        self.index_check(Reg::T2, Reg::T1, Reg::T3, aioobe);
        self.shadd(Reg::T2, Reg::T1, Reg::T2, Reg::T3, log2_element_size(ty));
        let val = match ty {
            BasicType::Float | BasicType::Double => AccessReg::F(FTOS),
            _ => AccessReg::X(XTOS),
        };
        self.access_store_at(ty, ARRAY, Reg::T2, oop::ARRAY_BASE, val, Reg::T3, Reg::T4);
    }

    pub(super) fn iastore(&mut self) {
        self.array_store(BasicType::Int);
    }

    pub(super) fn lastore(&mut self) {
        self.array_store(BasicType::Long);
    }

    pub(super) fn fastore(&mut self) {
        self.array_store(BasicType::Float);
    }

    pub(super) fn dastore(&mut self) {
        self.array_store(BasicType::Double);
    }

    /// Byte arrays store the low byte; boolean arrays the low bit.
    pub(super) fn bastore(&mut self) {
        let aioobe = self.stubs().array_index_out_of_bounds;
        let byte_array = self.new_label();
        self.pop_i(Reg::T1);
        self.pop_ptr(Reg::T2);
        self.index_check(Reg::T2, Reg::T1, Reg::T3, aioobe);

        self.load_klass(Reg::T3, Reg::T2);
        self.lw(Reg::T3, Reg::T3, klass::LAYOUT_HELPER);
        self.li(Reg::T4, klass::LH_BOOLEAN_DIFFBIT as i64);
        self.andr(Reg::T3, Reg::T3, Reg::T4);
        self.beqz(Reg::T3, byte_array);
        self.andi(XTOS, XTOS, 1);
        self.bind(byte_array);

        self.add(Reg::T2, Reg::T2, Reg::T1);
        self.access_store_at(BasicType::Byte, ARRAY, Reg::T2, oop::ARRAY_BASE, AccessReg::X(XTOS), Reg::T3, Reg::T4);
    }

    /// Chars and shorts are both stored as their low half-word.
    pub(super) fn castore(&mut self) {
        self.array_store(BasicType::Char);
    }

    /// Reference stores check the value against the array's element type.
    pub(super) fn aastore(&mut self) {
        let aioobe = self.stubs().array_index_out_of_bounds;
        let array_store = self.stubs().array_store;
        let is_null = self.new_label();
        let ok = self.new_label();
        let done = self.new_label();
        let (value, index, array, addr) = (Reg::T1, Reg::T2, Reg::T3, Reg::T4);

        // ..., array, index, value
        self.ld(value, XESP, 8);
        self.ld(index, XESP, 16);
        self.ld(array, XESP, 24);
        self.index_check(array, index, Reg::T5, aioobe);
        let log2 = self.log_heap_oop_size();
        self.shadd(addr, index, array, Reg::T5, log2);

        self.beqz(value, is_null);
        self.load_klass(Reg::A1, value);
        self.load_klass(Reg::A2, array);
        self.ld(Reg::A2, Reg::A2, klass::ELEMENT_KLASS);
        self.check_klass_subtype(Reg::A1, Reg::A2, Reg::T5, Reg::T6, ok);
        self.mv(Reg::A1, array);
        self.mv(Reg::A2, value);
        self.j(array_store);

        self.bind(ok);
        self.store_heap_oop(addr, oop::ARRAY_BASE, value, Reg::T5, Reg::T6, Decorators::IS_ARRAY);
        self.j(done);

        self.bind(is_null);
        self.store_heap_oop(addr, oop::ARRAY_BASE, Reg::ZERO, Reg::T5, Reg::T6, Decorators::IS_ARRAY);

        self.bind(done);
        self.addi(XESP, XESP, 24);
    }

    // ==================== Allocation ====================

    /// `T2` = constant pool, `T3` = class index operand, `T4` = its tag.
    fn load_class_tag(&mut self) {
        self.get_constant_pool(Reg::T2);
        self.get_u2_be_at_bcp(Reg::T3, 1, Reg::T4);
        self.ld(Reg::T4, Reg::T2, constant_pool::TAGS);
        self.add(Reg::T4, Reg::T4, Reg::T3);
        self.lbu(Reg::T4, Reg::T4, constant_pool::ARRAY_DATA);
        self.acquire();
    }

    /// `dst` = resolved klass at the index in `T3`.
    fn load_resolved_klass(&mut self, dst: Reg) {
        self.ld(dst, Reg::T2, constant_pool::RESOLVED_KLASSES);
        self.shadd(dst, Reg::T3, dst, Reg::T6, 3);
        self.ld(dst, dst, constant_pool::ARRAY_DATA);
    }

    /// Instances of initialized classes without finalizers come from the
    /// thread's allocation buffer; everything else from the runtime.
    pub(super) fn new_instance(&mut self) {
        let slow_case = self.new_label();
        let done = self.new_label();
        let (klass_reg, size) = (Reg::T5, Reg::T6);

        self.load_class_tag();
        self.li(Reg::T1, tag::CLASS as i64);
        self.bne(Reg::T4, Reg::T1, slow_case);
        self.load_resolved_klass(klass_reg);

        self.lwu(Reg::T1, klass_reg, klass::INIT_STATE);
        self.li(Reg::T4, InitState::FullyInitialized as i64);
        self.bne(Reg::T1, Reg::T4, slow_case);

        self.lw(size, klass_reg, klass::LAYOUT_HELPER);
        self.andi(Reg::T1, size, klass::LH_INSTANCE_SLOW_PATH_BIT);
        self.bnez(Reg::T1, slow_case);

        if self.config().use_tlab {
            let initialize_header = self.new_label();
            // Bump the allocation pointer.
            self.ld(XTOS, XTHREAD, thread::TLAB_TOP);
            self.add(Reg::T1, XTOS, size);
            self.ld(Reg::T4, XTHREAD, thread::TLAB_END);
            self.bgtu(Reg::T1, Reg::T4, slow_case);
            self.sd(Reg::T1, XTHREAD, thread::TLAB_TOP);

            if !self.config().zero_tlab {
                let zero = self.new_label();
                self.addi(size, size, -oop::HEADER_SIZE);
                self.beqz(size, initialize_header);
                self.addi(Reg::T1, XTOS, oop::HEADER_SIZE);
                self.bind(zero);
                self.sd(Reg::ZERO, Reg::T1, 0);
                self.addi(Reg::T1, Reg::T1, 8);
                self.addi(size, size, -8);
                self.bnez(size, zero);
            }

            self.bind(initialize_header);
            self.li(Reg::T1, oop::PROTOTYPE_MARK as i64);
            self.sd(Reg::T1, XTOS, oop::MARK);
            self.sd(klass_reg, XTOS, oop::KLASS);
            self.j(done);
        }

        self.bind(slow_case);
        self.get_constant_pool(Reg::A1);
        self.get_u2_be_at_bcp(Reg::A2, 1, Reg::T1);
        self.call_vm(RuntimeEntry::New);
        self.get_vm_result(XTOS);

        self.bind(done);
        // Initializing stores before the ones that publish the object.
        self.membar(Barrier::StoreStore);
    }

    pub(super) fn newarray(&mut self) {
        self.lbu(Reg::A1, XBCP, 1);
        self.mv(Reg::A2, XTOS);
        self.call_vm(RuntimeEntry::NewArray);
        self.get_vm_result(XTOS);
    }

    pub(super) fn anewarray(&mut self) {
        self.get_constant_pool(Reg::A1);
        self.get_u2_be_at_bcp(Reg::A2, 1, Reg::T1);
        self.mv(Reg::A3, XTOS);
        self.call_vm(RuntimeEntry::ANewArray);
        self.get_vm_result(XTOS);
    }

    /// The dimensions stay on the stack for the runtime to read; `a1`
    /// points at the outermost one.
    pub(super) fn multianewarray(&mut self) {
        self.lbu(Reg::T1, XBCP, 3);
        self.shadd(Reg::A1, Reg::T1, XESP, Reg::T2, 3);
        self.call_vm(RuntimeEntry::MultiANewArray);
        self.get_vm_result(XTOS);
        self.lbu(Reg::T1, XBCP, 3);
        self.shadd(XESP, Reg::T1, XESP, Reg::T2, 3);
    }

    // ==================== Exceptions and type checks ====================

    pub(super) fn athrow(&mut self) {
        self.null_check(XTOS, -1);
        self.mv(Reg::A1, XTOS);
        self.call_vm(RuntimeEntry::ThrowException);
        self.should_not_reach_here();
    }

    /// `A2` = klass named by the operand, resolving it through the
    /// runtime if needed. Keeps the object in `XTOS`.
    fn load_type_check_klass(&mut self) {
        let quicked = self.new_label();
        let resolved = self.new_label();

        self.load_class_tag();
        self.li(Reg::T1, tag::CLASS as i64);
        self.beq(Reg::T4, Reg::T1, quicked);

        self.push_ptr(XTOS);
        self.mv(Reg::A1, Reg::T2);
        self.mv(Reg::A2, Reg::T3);
        self.call_vm(RuntimeEntry::QuickenIoCc);
        self.get_vm_result_2(Reg::A2);
        self.pop_ptr(XTOS);
        self.j(resolved);

        self.bind(quicked);
        self.load_resolved_klass(Reg::A2);
        self.bind(resolved);
    }

    pub(super) fn checkcast(&mut self) {
        let class_cast = self.stubs().class_cast;
        let is_null = self.new_label();
        let ok = self.new_label();

        self.beqz(XTOS, is_null);
        self.load_type_check_klass();
        self.load_klass(Reg::T5, XTOS);
        self.check_klass_subtype(Reg::T5, Reg::A2, Reg::T6, Reg::A4, ok);
        self.mv(Reg::A1, XTOS);
        self.j(class_cast);

        self.bind(ok);
        self.bind(is_null);
    }

    pub(super) fn instanceof(&mut self) {
        let is_null = self.new_label();
        let ok = self.new_label();
        let done = self.new_label();

        self.beqz(XTOS, is_null);
        self.load_type_check_klass();
        self.load_klass(Reg::T5, XTOS);
        self.check_klass_subtype(Reg::T5, Reg::A2, Reg::T6, Reg::A4, ok);
        self.li(XTOS, 0);
        self.j(done);

        self.bind(ok);
        self.li(XTOS, 1);
        self.j(done);

        // null is an instance of nothing; XTOS is already zero.
        self.bind(is_null);
        self.bind(done);
    }

    // ==================== Monitors ====================

    /// Take a free monitor slot, or the slot already holding this object,
    /// or grow the monitor block by moving the expression stack down.
    pub(super) fn monitorenter(&mut self) {
        let loop_ = self.new_label();
        let entry = self.new_label();
        let exit = self.new_label();
        let not_used = self.new_label();
        let allocated = self.new_label();
        let (free, scan, bottom) = (Reg::A1, Reg::T3, Reg::T2);

        self.null_check(XTOS, -1);

        self.mv(free, Reg::ZERO);
        self.get_monitors(scan);
        self.addi(bottom, Reg::FP, -frame::HEADER_SIZE);
        self.j(entry);
        self.bind(loop_);
        self.ld(Reg::T4, scan, frame::MONITOR_OBJ);
        self.bnez(Reg::T4, not_used);
        self.mv(free, scan);
        self.bind(not_used);
        self.beq(XTOS, Reg::T4, exit);
        self.addi(scan, scan, frame::MONITOR_SIZE);
        self.bind(entry);
        self.bne(scan, bottom, loop_);
        self.bind(exit);
        self.bnez(free, allocated);

        {
            let copy = self.new_label();
            let copy_entry = self.new_label();
            // New monitor block end, expression stack moved below it.
            self.get_monitors(free);
            self.addi(free, free, -frame::MONITOR_SIZE);
            self.set_monitors(free);
            self.addi(XESP, XESP, -frame::MONITOR_SIZE);
            self.addi(Reg::SP, Reg::SP, -frame::MONITOR_SIZE);
            self.sd(Reg::SP, Reg::FP, fp_slot(frame::TOP_FRAME_SP));
            self.addi(scan, XESP, 8);
            self.j(copy_entry);
            self.bind(copy);
            self.ld(Reg::T4, scan, frame::MONITOR_SIZE);
            self.sd(Reg::T4, scan, 0);
            self.addi(scan, scan, 8);
            self.bind(copy_entry);
            self.bne(scan, free, copy);
        }

        self.bind(allocated);
        // The exception state of an async exception is after the bytecode.
        self.addi(XBCP, XBCP, 1);
        self.sd(XTOS, free, frame::MONITOR_OBJ);
        self.lock_object(free);
        self.dispatch_next(TosState::Vtos, 0, DispatchKind::Normal);
    }

    pub(super) fn monitorexit(&mut self) {
        let imse = self.stubs().illegal_monitor_state;
        let loop_ = self.new_label();
        let entry = self.new_label();
        let found = self.new_label();
        let (scan, bottom) = (Reg::T3, Reg::T2);

        self.null_check(XTOS, -1);

        self.get_monitors(scan);
        self.addi(bottom, Reg::FP, -frame::HEADER_SIZE);
        self.j(entry);
        self.bind(loop_);
        self.ld(Reg::T4, scan, frame::MONITOR_OBJ);
        self.beq(XTOS, Reg::T4, found);
        self.addi(scan, scan, frame::MONITOR_SIZE);
        self.bind(entry);
        self.bne(scan, bottom, loop_);
        self.j(imse);

        self.bind(found);
        self.unlock_object(scan);
    }

    // ==================== wide, breakpoint ====================

    pub(super) fn wide(&mut self) {
        self.lbu(Reg::T1, XBCP, 1);
        self.add_imm(Reg::T2, XDISPATCH, DispatchTables::WIDE_OFFSET as i64);
        self.shadd(Reg::T1, Reg::T1, Reg::T2, Reg::T1, 3);
        self.ld(Reg::T1, Reg::T1, 0);
        self.jr(Reg::T1);
    }

    /// Report the breakpoint, then run the bytecode it replaced.
    pub(super) fn breakpoint(&mut self) {
        self.mv(Reg::A1, XMETHOD);
        self.mv(Reg::A2, XBCP);
        self.call_vm(RuntimeEntry::GetOriginalBytecode);
        self.mv(XORIGINAL_BC, Reg::A0);

        self.mv(Reg::A1, XMETHOD);
        self.mv(Reg::A2, XBCP);
        self.call_vm(RuntimeEntry::Breakpoint);

        self.dispatch_only_normal_with(TosState::Vtos, XORIGINAL_BC);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(log2_element_size(BasicType::Byte), 0);
        assert_eq!(log2_element_size(BasicType::Boolean), 0);
        assert_eq!(log2_element_size(BasicType::Char), 1);
        assert_eq!(log2_element_size(BasicType::Int), 2);
        assert_eq!(log2_element_size(BasicType::Double), 3);
    }

    #[test]
    fn test_array_decorators() {
        assert!(ARRAY.contains(Decorators::IN_HEAP));
        assert!(ARRAY.contains(Decorators::IS_ARRAY));
    }
}
