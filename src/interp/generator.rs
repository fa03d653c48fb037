//! Template interpreter generation.
//!
//! [`generate`] emits the whole interpreter into one code buffer placed at a
//! fixed address. The dispatch tables come first and are filled in last,
//! once every entry point is bound:
//!
//! ```text
//!   base                      normal tables     (10 x 256 slots)
//!   + SAFEPOINT_OFFSET        safepoint tables  (10 x 256 slots)
//!   + WIDE_OFFSET             wide table        (256 slots)
//!   + RETURN_3_OFFSET         invoke return entries, 3-byte invokes
//!   + RETURN_5_OFFSET         invoke return entries, 5-byte invokes
//!   + SIZE                    stubs, method entries, templates,
//!                             field branch tables
//! ```

use std::sync::Arc;

use super::bytecodes::{Bytecode, TosState};
use super::interp_masm::{
    DispatchKind, DispatchTables, InterpreterMacroAssembler, XBCP, XESP, XLOCALS, XMETHOD, fp_slot,
};
use super::templates::{BranchTable, Stubs, Template, TemplateGen, TemplateTable};
use crate::asm::macro_asm::patch_movptr;
use crate::asm::{AsmError, BarrierSetAssembler, CodeBuffer, Label, MacroAssembler, Reg};
use crate::config::InterpreterConfig;
use crate::runtime::RuntimeEntry;
use crate::runtime::layout::{AccessFlags, const_method, constant_pool, frame, klass, method};

/// Words between the expression stack limit and `sp`.
const STACK_SLACK: i32 = 16;

/// Addresses of one generated template.
#[derive(Debug, Clone)]
pub struct GeneratedTemplate {
    pub bytecode: Bytecode,
    pub wide: bool,
    pub tos_in: TosState,
    pub tos_out: TosState,
    /// First byte of the template, including its entry points.
    pub start: u64,
    pub end: u64,
    /// Entry point for each incoming TOS-state.
    pub entries: [u64; TosState::COUNT],
}

/// Entry points outside the templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoints {
    pub method: u64,
    pub synchronized_method: u64,
    pub abstract_method: u64,
    /// Where a faulting implicit or trap-based null check continues.
    pub null_pointer: u64,
    pub illegal_tos_state: u64,
}

/// The generated interpreter: code plus the addresses the runtime needs.
pub struct Interpreter {
    code: Vec<u8>,
    tables: DispatchTables,
    entries: EntryPoints,
    templates: Vec<GeneratedTemplate>,
    field_tables: Vec<u64>,
    stop_messages: Vec<String>,
}

impl Interpreter {
    pub fn base(&self) -> u64 {
        self.tables.base()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn tables(&self) -> DispatchTables {
        self.tables
    }

    pub fn entries(&self) -> EntryPoints {
        self.entries
    }

    /// Entry a method with `flags` is called through.
    pub fn method_entry(&self, flags: AccessFlags) -> u64 {
        if flags.contains(AccessFlags::ABSTRACT) {
            self.entries.abstract_method
        } else if flags.contains(AccessFlags::SYNCHRONIZED) {
            self.entries.synchronized_method
        } else {
            self.entries.method
        }
    }

    pub fn templates(&self) -> &[GeneratedTemplate] {
        &self.templates
    }

    pub fn template(&self, bc: Bytecode, wide: bool) -> Option<&GeneratedTemplate> {
        self.templates.iter().find(|t| t.bytecode == bc && t.wide == wide)
    }

    /// Addresses of the field branch tables, in emission order.
    pub fn field_branch_tables(&self) -> &[u64] {
        &self.field_tables
    }

    /// Message of the `stop` with the given id.
    pub fn stop_message(&self, id: u64) -> Option<&str> {
        self.stop_messages.get(id as usize).map(String::as_str)
    }

    /// Code bytes of `[start, end)`.
    pub fn code_range(&self, start: u64, end: u64) -> &[u8] {
        let from = (start - self.base()) as usize;
        let to = (end - self.base()) as usize;
        &self.code[from..to]
    }

    fn read_slot(&self, addr: u64) -> u64 {
        let offset = (addr - self.base()) as usize;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.code[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Contents of the normal dispatch table slot for `bc` in `state`.
    pub fn dispatch_target(&self, state: TosState, bc: u8) -> u64 {
        self.read_slot(self.tables.normal_slot(state, bc))
    }

    pub fn safepoint_target(&self, state: TosState, bc: u8) -> u64 {
        self.read_slot(self.tables.safepoint_slot(state, bc))
    }

    pub fn wide_target(&self, bc: u8) -> u64 {
        self.read_slot(self.tables.wide() + bc as u64 * 8)
    }

    /// Invoke return entry for an invoke of `length` bytes whose callee
    /// returns `state`.
    pub fn return_entry(&self, length: usize, state: TosState) -> u64 {
        self.read_slot(self.tables.invoke_return(length) + state as u64 * 8)
    }
}

/// Labels of one template while the code is being emitted.
struct TemplateLabels {
    template: Template,
    start: usize,
    end: usize,
    entries: [Label; TosState::COUNT],
}

/// Labels of everything outside the templates.
struct SharedLabels {
    stubs: Stubs,
    illegal_bytecode: Label,
    safepoint: [Label; TosState::COUNT],
    trace: Option<[Label; TosState::COUNT]>,
    return_3: [Label; TosState::COUNT],
    return_5: [Label; TosState::COUNT],
    method: Label,
    synchronized_method: Label,
    abstract_method: Label,
}

fn new_labels<const N: usize>(masm: &mut InterpreterMacroAssembler) -> [Label; N] {
    std::array::from_fn(|_| masm.new_label())
}

fn create_stubs(masm: &mut InterpreterMacroAssembler) -> Stubs {
    Stubs {
        null_pointer: masm.new_label(),
        array_index_out_of_bounds: masm.new_label(),
        arithmetic: masm.new_label(),
        class_cast: masm.new_label(),
        array_store: masm.new_label(),
        incompatible_class_change: masm.new_label(),
        abstract_method: masm.new_label(),
        illegal_monitor_state: masm.new_label(),
        illegal_tos_state: masm.new_label(),
    }
}

/// Generate the interpreter at `base`.
pub fn generate(
    config: &InterpreterConfig,
    barrier_set: Arc<dyn BarrierSetAssembler>,
    base: u64,
) -> Result<Interpreter, AsmError> {
    let mut buf = CodeBuffer::with_capacity(base, 512 * 1024);
    for _ in 0..DispatchTables::SIZE / 8 {
        buf.emit_u64(0);
    }
    let tables = DispatchTables::new(base);
    let masm = MacroAssembler::new(buf, config.macro_config(), barrier_set);
    let mut masm = InterpreterMacroAssembler::new(masm, tables);

    let stubs = create_stubs(&mut masm);
    masm.set_npe_stub(stubs.null_pointer);
    let labels = SharedLabels {
        stubs,
        illegal_bytecode: masm.new_label(),
        safepoint: new_labels(&mut masm),
        trace: config.trace_bytecodes.then(|| new_labels(&mut masm)),
        return_3: new_labels(&mut masm),
        return_5: new_labels(&mut masm),
        method: masm.new_label(),
        synchronized_method: masm.new_label(),
        abstract_method: masm.new_label(),
    };

    let mut g = TemplateGen::new(masm, config, stubs);
    generate_throw_stubs(&mut g, &labels);
    generate_safepoint_entries(&mut g, &labels);
    if let Some(trace) = labels.trace {
        generate_trace_stubs(&mut g, trace);
    }
    generate_return_entries(&mut g, &labels);
    g.bind(labels.method);
    generate_method_entry(&mut g, false);
    g.bind(labels.synchronized_method);
    generate_method_entry(&mut g, true);
    g.bind(labels.abstract_method);
    generate_abstract_entry(&mut g, &labels);

    let table = TemplateTable::new();
    let mut generated = Vec::new();
    for t in table.templates().chain(table.wide_templates()) {
        generated.push(generate_template(&mut g, *t, &labels));
    }
    g.set_template(None);

    let (mut masm, branch_tables) = g.into_parts();
    let branch_table_addresses = emit_branch_tables(&mut masm, &branch_tables, &labels);

    let (mut buf, stop_messages) = masm.into_inner().into_parts();
    buf.patch_forward_refs()?;
    for (table, addr) in branch_tables.iter().zip(&branch_table_addresses) {
        patch_movptr(buf.code_mut(), table.movptr_offset, *addr);
    }

    let resolve = |buf: &CodeBuffer, label: Label| -> Result<u64, AsmError> {
        buf.label_offset(label)
            .map(|offset| buf.address_of(offset))
            .ok_or(AsmError::UnboundLabel(label.id()))
    };

    // Dispatch tables.
    let illegal = resolve(&buf, labels.illegal_bytecode)?;
    let mut slots: Vec<(u64, u64)> = Vec::new();
    for state in TosState::ALL {
        let safepoint = resolve(&buf, labels.safepoint[state.index()])?;
        for bc in 0..=255u8 {
            slots.push((tables.normal_slot(state, bc), illegal));
            slots.push((tables.safepoint_slot(state, bc), safepoint));
        }
        slots.push((
            tables.invoke_return(3) + state as u64 * 8,
            resolve(&buf, labels.return_3[state.index()])?,
        ));
        slots.push((
            tables.invoke_return(5) + state as u64 * 8,
            resolve(&buf, labels.return_5[state.index()])?,
        ));
    }
    for bc in 0..=255u8 {
        slots.push((tables.wide() + bc as u64 * 8, illegal));
    }

    let mut templates = Vec::with_capacity(generated.len());
    for t in &generated {
        let mut entries = [0u64; TosState::COUNT];
        for state in TosState::ALL {
            entries[state.index()] = resolve(&buf, t.entries[state.index()])?;
        }
        let bc = t.template.bytecode as u8;
        if t.template.is_wide() {
            slots.push((tables.wide() + bc as u64 * 8, entries[TosState::Vtos.index()]));
        } else {
            for state in TosState::ALL {
                slots.push((tables.normal_slot(state, bc), entries[state.index()]));
            }
        }
        templates.push(GeneratedTemplate {
            bytecode: t.template.bytecode,
            wide: t.template.is_wide(),
            tos_in: t.template.tos_in,
            tos_out: t.template.tos_out,
            start: buf.address_of(t.start),
            end: buf.address_of(t.end),
            entries,
        });
    }
    // Later writes win: template entries override the illegal default.
    for (slot, target) in slots {
        let offset = (slot - base) as usize;
        buf.code_mut()[offset..offset + 8].copy_from_slice(&target.to_le_bytes());
    }

    let entries = EntryPoints {
        method: resolve(&buf, labels.method)?,
        synchronized_method: resolve(&buf, labels.synchronized_method)?,
        abstract_method: resolve(&buf, labels.abstract_method)?,
        null_pointer: resolve(&buf, labels.stubs.null_pointer)?,
        illegal_tos_state: resolve(&buf, labels.stubs.illegal_tos_state)?,
    };

    tracing::debug!(
        base = format_args!("{:#x}", base),
        size = buf.len(),
        templates = templates.len(),
        branch_tables = branch_tables.len(),
        "interpreter generated"
    );

    Ok(Interpreter {
        code: buf.into_code(),
        tables,
        entries,
        templates,
        field_tables: branch_table_addresses,
        stop_messages,
    })
}

/// Emit the field branch tables and return their addresses. Missing
/// states go to the illegal TOS-state stub.
fn emit_branch_tables(masm: &mut InterpreterMacroAssembler, tables: &[BranchTable], labels: &SharedLabels) -> Vec<u64> {
    let mut addresses = Vec::with_capacity(tables.len());
    for table in tables {
        masm.align(8);
        addresses.push(masm.pc());
        for entry in table.entries {
            masm.emit_address_of(entry.unwrap_or(labels.stubs.illegal_tos_state));
        }
    }
    addresses
}

fn generate_throw_stubs(g: &mut TemplateGen<'_>, labels: &SharedLabels) {
    let stubs = labels.stubs;
    let throws = [
        (stubs.null_pointer, RuntimeEntry::ThrowNullPointerException),
        (stubs.array_index_out_of_bounds, RuntimeEntry::ThrowArrayIndexOutOfBoundsException),
        (stubs.arithmetic, RuntimeEntry::ThrowArithmeticException),
        (stubs.class_cast, RuntimeEntry::ThrowClassCastException),
        (stubs.array_store, RuntimeEntry::ThrowArrayStoreException),
        (stubs.incompatible_class_change, RuntimeEntry::ThrowIncompatibleClassChangeError),
        (stubs.abstract_method, RuntimeEntry::ThrowAbstractMethodError),
        (stubs.illegal_monitor_state, RuntimeEntry::ThrowIllegalMonitorStateException),
    ];
    for (label, entry) in throws {
        g.bind(label);
        g.call_vm(entry);
        g.should_not_reach_here();
    }

    // Branch table slots are entered at `slot - 4` for volatile fields.
    g.nop();
    g.bind(stubs.illegal_tos_state);
    g.stop("illegal tos state");

    g.bind(labels.illegal_bytecode);
    g.stop("illegal bytecode");
}

/// Safepoint table entries: spill the TOS, let the runtime run, then
/// dispatch the same bytecode again through the normal table.
fn generate_safepoint_entries(g: &mut TemplateGen<'_>, labels: &SharedLabels) {
    for state in TosState::ALL {
        g.bind(labels.safepoint[state.index()]);
        g.push(state);
        g.call_vm(RuntimeEntry::AtSafepoint);
        g.dispatch_only(TosState::Vtos, DispatchKind::Normal);
    }
}

/// `jal` targets run before every template. The return address is kept
/// in the frame's result slot across the runtime call.
fn generate_trace_stubs(g: &mut TemplateGen<'_>, trace: [Label; TosState::COUNT]) {
    for state in TosState::ALL {
        g.bind(trace[state.index()]);
        g.sd(Reg::RA, Reg::FP, fp_slot(frame::RESULT_TMP));
        g.push(state);
        g.li(Reg::A1, state as i64);
        g.call_vm(RuntimeEntry::TraceBytecode);
        g.pop(state);
        g.ld(Reg::RA, Reg::FP, fp_slot(frame::RESULT_TMP));
        g.ret();
    }
}

/// Continuation of a call site: the callee left the caller's `esp`
/// above its arguments and the result in the TOS registers.
fn generate_return_entries(g: &mut TemplateGen<'_>, labels: &SharedLabels) {
    for (length, entries) in [(3, labels.return_3), (5, labels.return_5)] {
        for state in TosState::ALL {
            g.bind(entries[state.index()]);
            g.restore_bcp();
            g.restore_locals();
            g.restore_method();
            g.ld(Reg::SP, Reg::FP, fp_slot(frame::TOP_FRAME_SP));
            g.dispatch_next(state, length, DispatchKind::Normal);
        }
    }
}

/// Build an interpreter frame for `XMETHOD` and start at bci 0.
///
/// On entry `XESP` is the caller's stack pointer with the arguments above
/// it, `ra` the return entry and `sp` the caller's `sp`. The locals start
/// at the first argument; the locals that are not arguments are zeroed
/// below it, and the frame follows.
fn generate_method_entry(g: &mut TemplateGen<'_>, synchronized: bool) {
    let const_method_reg = Reg::T1;
    let sender_sp = Reg::T5;
    let new_fp = Reg::T6;

    g.mv(sender_sp, Reg::SP);
    g.ld(const_method_reg, XMETHOD, method::CONST_METHOD);
    g.lhu(Reg::T2, const_method_reg, const_method::SIZE_OF_PARAMETERS);
    g.lhu(Reg::T3, const_method_reg, const_method::MAX_LOCALS);
    g.shadd(XLOCALS, Reg::T2, XESP, Reg::T4, 3);

    let zero_locals = g.new_label();
    let locals_done = g.new_label();
    g.sub(Reg::T3, Reg::T3, Reg::T2);
    g.mv(Reg::T4, XESP);
    g.bind(zero_locals);
    g.blez(Reg::T3, locals_done);
    g.sd(Reg::ZERO, Reg::T4, 0);
    g.addi(Reg::T4, Reg::T4, -8);
    g.addi(Reg::T3, Reg::T3, -1);
    g.j(zero_locals);
    g.bind(locals_done);

    // T4 is the highest free word below the locals.
    g.addi(new_fp, Reg::T4, 8);
    g.andi(new_fp, new_fp, -16);
    g.sd(Reg::RA, new_fp, frame::RETURN_ADDRESS);
    g.sd(Reg::FP, new_fp, frame::LINK);
    g.mv(Reg::FP, new_fp);

    g.sd(XMETHOD, Reg::FP, fp_slot(frame::METHOD));
    g.ld(Reg::T2, XMETHOD, method::HOLDER);
    g.ld(Reg::T2, Reg::T2, klass::JAVA_MIRROR);
    g.sd(Reg::T2, Reg::FP, fp_slot(frame::MIRROR));
    g.ld(Reg::T2, const_method_reg, const_method::CONSTANTS);
    g.ld(Reg::T2, Reg::T2, constant_pool::CACHE);
    g.sd(Reg::T2, Reg::FP, fp_slot(frame::CPOOL_CACHE));
    g.sd(XLOCALS, Reg::FP, fp_slot(frame::LOCALS));
    g.sd(Reg::ZERO, Reg::FP, fp_slot(frame::MDX));
    g.sd(Reg::ZERO, Reg::FP, fp_slot(frame::OOP_TMP));
    g.sd(Reg::ZERO, Reg::FP, fp_slot(frame::RESULT_TMP));
    g.sd(sender_sp, Reg::FP, fp_slot(frame::SENDER_SP));
    g.addi(XBCP, const_method_reg, const_method::CODE);

    let monitor = Reg::T2;
    if synchronized {
        // One monitor for the receiver, or the mirror of a static method.
        let is_static = g.new_label();
        let have_object = g.new_label();
        g.addi(monitor, Reg::FP, -(frame::HEADER_SIZE + frame::MONITOR_SIZE));
        g.sd(monitor, Reg::FP, fp_slot(frame::MONITORS));
        g.lwu(Reg::T3, XMETHOD, method::ACCESS_FLAGS);
        g.andi(Reg::T3, Reg::T3, AccessFlags::STATIC.bits() as i32);
        g.bnez(Reg::T3, is_static);
        g.ld(Reg::T3, XLOCALS, 0);
        g.j(have_object);
        g.bind(is_static);
        g.ld(Reg::T3, Reg::FP, fp_slot(frame::MIRROR));
        g.bind(have_object);
        g.sd(Reg::T3, monitor, frame::MONITOR_OBJ);
        g.addi(XESP, monitor, -frame::STACK_ELEMENT_SIZE);
    } else {
        g.addi(Reg::T2, Reg::FP, -frame::HEADER_SIZE);
        g.sd(Reg::T2, Reg::FP, fp_slot(frame::MONITORS));
        g.addi(XESP, Reg::FP, -(frame::HEADER_SIZE + frame::STACK_ELEMENT_SIZE));
    }

    g.lhu(Reg::T3, const_method_reg, const_method::MAX_STACK);
    g.slli(Reg::T3, Reg::T3, 3);
    g.sub(Reg::T3, XESP, Reg::T3);
    g.addi(Reg::T3, Reg::T3, -STACK_SLACK * 8);
    g.andi(Reg::T3, Reg::T3, -16);
    let sp_ok = g.new_label();
    g.bleu(Reg::T3, sender_sp, sp_ok);
    g.andi(Reg::T3, sender_sp, -16);
    g.bind(sp_ok);
    g.mv(Reg::SP, Reg::T3);
    g.sd(Reg::SP, Reg::FP, fp_slot(frame::TOP_FRAME_SP));
    g.save_esp();
    g.save_bcp();

    if synchronized {
        g.lock_object(monitor);
    }
    g.dispatch_only(TosState::Vtos, DispatchKind::Normal);
}

/// Abstract methods throw in the caller's frame.
fn generate_abstract_entry(g: &mut TemplateGen<'_>, labels: &SharedLabels) {
    g.mv(Reg::A1, Reg::ZERO);
    g.mv(Reg::A2, XMETHOD);
    g.restore_method();
    g.j(labels.stubs.abstract_method);
}

/// Entry points, optional trace call, body and dispatch epilog of one
/// template.
///
/// A `vtos` template is entered from any state: typed entries spill the
/// TOS and join the `vtos` entry. A typed template pops at its `vtos`
/// entry and falls into the typed entry; sub-int states share the `itos`
/// entry and every other state is illegal.
fn generate_template(g: &mut TemplateGen<'_>, t: Template, labels: &SharedLabels) -> TemplateLabels {
    g.set_template(Some(t));
    g.align(4);
    let start = g.offset();
    let illegal = labels.stubs.illegal_tos_state;
    let mut entries = [illegal; TosState::COUNT];

    let vtos_entry = g.new_label();
    if t.tos_in == TosState::Vtos {
        for state in TosState::ALL {
            if state == TosState::Vtos {
                continue;
            }
            let entry = g.new_label();
            g.bind(entry);
            g.push(state);
            g.j(vtos_entry);
            entries[state.index()] = entry;
        }
        g.bind(vtos_entry);
    } else {
        g.bind(vtos_entry);
        g.pop(t.tos_in);
        let typed_entry = g.new_label();
        g.bind(typed_entry);
        if t.tos_in.is_int_like() {
            for state in TosState::ALL.into_iter().filter(|s| s.is_int_like()) {
                entries[state.index()] = typed_entry;
            }
        } else {
            entries[t.tos_in.index()] = typed_entry;
        }
    }
    entries[TosState::Vtos.index()] = vtos_entry;

    if let Some(trace) = labels.trace {
        g.jal_to(Reg::RA, trace[t.tos_in.index()]);
    }

    let body = g.offset();
    t.generate(g);
    if !t.does_dispatch() {
        g.dispatch_epilog(t.tos_out, t.step());
    }
    let end = g.offset();

    if g.config().trace_templates {
        tracing::debug!(
            bytecode = t.bytecode.name(),
            wide = t.is_wide(),
            tos_in = t.tos_in.name(),
            tos_out = t.tos_out.name(),
            offset = format_args!("{:#x}", start),
            body = body - start,
            size = end - start,
            "template"
        );
    }

    TemplateLabels {
        template: t,
        start,
        end,
        entries,
    }
}
