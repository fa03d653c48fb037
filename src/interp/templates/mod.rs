//! The template table: one code generator per bytecode.
//!
//! A [`Template`] describes a bytecode's TOS-state contract and names the
//! function that emits its body. [`TemplateGen`] is the context those
//! functions run in; the generator in [`crate::interp::generator`] wraps each
//! body with entry points and the dispatch epilog.

mod arith;
mod branches;
mod consts;
mod fields;
mod invoke;
mod locals;
mod objects;
mod stack;

use std::ops::{Deref, DerefMut};

use bitflags::bitflags;

use crate::asm::{Cond, Label, Reg};
use crate::config::InterpreterConfig;
use crate::interp::bytecodes::{Bytecode, TosState};
use crate::interp::interp_masm::InterpreterMacroAssembler;

pub use arith::Op;

bitflags! {
    /// Properties of a template body.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct TemplateFlags: u8 {
        /// Reads operands or rewrites the bytecode through `xbcp`.
        const USES_BCP = 1 << 0;
        /// Ends with its own dispatch (or never falls through).
        const DOES_DISPATCH = 1 << 1;
        /// May call into the runtime.
        const CALLS_VM = 1 << 2;
        /// Operand indices are 16-bit (`wide` prefix).
        const WIDE = 1 << 3;
    }
}

pub type Generator = fn(&mut TemplateGen<'_>);

/// Code generation recipe for one bytecode.
#[derive(Clone, Copy)]
pub struct Template {
    pub bytecode: Bytecode,
    pub flags: TemplateFlags,
    pub tos_in: TosState,
    pub tos_out: TosState,
    generator: Generator,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("bytecode", &self.bytecode.name())
            .field("flags", &self.flags)
            .field("tos_in", &self.tos_in)
            .field("tos_out", &self.tos_out)
            .finish()
    }
}

impl Template {
    pub fn uses_bcp(&self) -> bool {
        self.flags.contains(TemplateFlags::USES_BCP)
    }

    pub fn does_dispatch(&self) -> bool {
        self.flags.contains(TemplateFlags::DOES_DISPATCH)
    }

    pub fn calls_vm(&self) -> bool {
        self.flags.contains(TemplateFlags::CALLS_VM)
    }

    pub fn is_wide(&self) -> bool {
        self.flags.contains(TemplateFlags::WIDE)
    }

    /// Bytes to advance after the body.
    pub fn step(&self) -> i32 {
        if self.is_wide() {
            self.bytecode.wide_length() as i32
        } else {
            self.bytecode.length() as i32
        }
    }

    pub fn generate(&self, g: &mut TemplateGen<'_>) {
        (self.generator)(g)
    }
}

/// Labels of the shared throw stubs. Each stub takes its arguments in
/// `a1`/`a2` as documented on the matching runtime entry.
#[derive(Debug, Clone, Copy)]
pub struct Stubs {
    pub null_pointer: Label,
    pub array_index_out_of_bounds: Label,
    pub arithmetic: Label,
    pub class_cast: Label,
    pub array_store: Label,
    pub incompatible_class_change: Label,
    pub abstract_method: Label,
    pub illegal_monitor_state: Label,
    /// Reached through a branch table slot with no template behind it.
    pub illegal_tos_state: Label,
}

/// A `movptr` in the code that must be patched with the address of a
/// branch table emitted after all templates. Slot `i` of the table holds
/// the entry for the TOS-state with index `i`.
#[derive(Debug, Clone)]
pub struct BranchTable {
    pub movptr_offset: usize,
    pub entries: [Option<Label>; TosState::COUNT],
}

/// Context of template code generation.
pub struct TemplateGen<'a> {
    masm: InterpreterMacroAssembler,
    config: &'a InterpreterConfig,
    stubs: Stubs,
    template: Option<Template>,
    branch_tables: Vec<BranchTable>,
}

impl Deref for TemplateGen<'_> {
    type Target = InterpreterMacroAssembler;

    fn deref(&self) -> &InterpreterMacroAssembler {
        &self.masm
    }
}

impl DerefMut for TemplateGen<'_> {
    fn deref_mut(&mut self) -> &mut InterpreterMacroAssembler {
        &mut self.masm
    }
}

impl<'a> TemplateGen<'a> {
    pub fn new(masm: InterpreterMacroAssembler, config: &'a InterpreterConfig, stubs: Stubs) -> Self {
        Self {
            masm,
            config,
            stubs,
            template: None,
            branch_tables: Vec::new(),
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        self.config
    }

    pub fn stubs(&self) -> Stubs {
        self.stubs
    }

    pub fn set_template(&mut self, template: Option<Template>) {
        self.template = template;
    }

    fn template(&self) -> Template {
        match self.template {
            Some(t) => t,
            None => panic!("template body generated outside a template"),
        }
    }

    /// Bytecode of the template being generated.
    pub fn bytecode(&self) -> Bytecode {
        self.template().bytecode
    }

    pub fn is_wide(&self) -> bool {
        self.template().is_wide()
    }

    pub fn step(&self) -> i32 {
        self.template().step()
    }

    /// Load the address of a branch table to be emitted later.
    pub fn branch_table(&mut self, dst: Reg, entries: [Option<Label>; TosState::COUNT]) {
        let movptr_offset = self.movptr(dst, 0);
        self.branch_tables.push(BranchTable { movptr_offset, entries });
    }

    pub fn into_parts(self) -> (InterpreterMacroAssembler, Vec<BranchTable>) {
        (self.masm, self.branch_tables)
    }
}

/// The templates of all bytecodes, indexed by opcode.
pub struct TemplateTable {
    normal: Vec<Option<Template>>,
    wide: Vec<Option<Template>>,
}

impl Default for TemplateTable {
    fn default() -> Self {
        Self::new()
    }
}

const UBCP: TemplateFlags = TemplateFlags::USES_BCP;
const DISP: TemplateFlags = TemplateFlags::DOES_DISPATCH;
const CLVM: TemplateFlags = TemplateFlags::CALLS_VM;
const WIDE: TemplateFlags = TemplateFlags::WIDE;
const NONE: TemplateFlags = TemplateFlags::empty();

impl TemplateTable {
    pub fn template_for(&self, bc: Bytecode) -> Option<&Template> {
        self.normal[bc as usize].as_ref()
    }

    pub fn wide_template_for(&self, bc: Bytecode) -> Option<&Template> {
        self.wide[bc as usize].as_ref()
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.normal.iter().flatten()
    }

    pub fn wide_templates(&self) -> impl Iterator<Item = &Template> {
        self.wide.iter().flatten()
    }

    fn def(&mut self, bc: Bytecode, flags: TemplateFlags, tos_in: TosState, tos_out: TosState, generator: Generator) {
        let template = Template {
            bytecode: bc,
            flags,
            tos_in,
            tos_out,
            generator,
        };
        let table = if flags.contains(WIDE) { &mut self.wide } else { &mut self.normal };
        assert!(table[bc as usize].is_none(), "{} defined twice", bc.name());
        table[bc as usize] = Some(template);
    }

    pub fn new() -> Self {
        use Bytecode::*;
        use TosState::*;

        let mut t = TemplateTable {
            normal: vec![None; 256],
            wide: vec![None; 256],
        };

        // Constants
        t.def(Nop, NONE, Vtos, Vtos, |_| {});
        t.def(AconstNull, NONE, Vtos, Atos, |g| g.aconst_null());
        t.def(IconstM1, NONE, Vtos, Itos, |g| g.iconst(-1));
        t.def(Iconst0, NONE, Vtos, Itos, |g| g.iconst(0));
        t.def(Iconst1, NONE, Vtos, Itos, |g| g.iconst(1));
        t.def(Iconst2, NONE, Vtos, Itos, |g| g.iconst(2));
        t.def(Iconst3, NONE, Vtos, Itos, |g| g.iconst(3));
        t.def(Iconst4, NONE, Vtos, Itos, |g| g.iconst(4));
        t.def(Iconst5, NONE, Vtos, Itos, |g| g.iconst(5));
        t.def(Lconst0, NONE, Vtos, Ltos, |g| g.lconst(0));
        t.def(Lconst1, NONE, Vtos, Ltos, |g| g.lconst(1));
        t.def(Fconst0, NONE, Vtos, Ftos, |g| g.fconst(0.0));
        t.def(Fconst1, NONE, Vtos, Ftos, |g| g.fconst(1.0));
        t.def(Fconst2, NONE, Vtos, Ftos, |g| g.fconst(2.0));
        t.def(Dconst0, NONE, Vtos, Dtos, |g| g.dconst(0.0));
        t.def(Dconst1, NONE, Vtos, Dtos, |g| g.dconst(1.0));
        t.def(Bipush, UBCP, Vtos, Itos, |g| g.bipush());
        t.def(Sipush, UBCP, Vtos, Itos, |g| g.sipush());
        t.def(Ldc, UBCP | CLVM, Vtos, Vtos, |g| g.ldc(false));
        t.def(LdcW, UBCP | CLVM, Vtos, Vtos, |g| g.ldc(true));
        t.def(Ldc2W, UBCP, Vtos, Vtos, |g| g.ldc2_w());
        t.def(FastAldc, UBCP | CLVM, Vtos, Atos, |g| g.fast_aldc(false));
        t.def(FastAldcW, UBCP | CLVM, Vtos, Atos, |g| g.fast_aldc(true));

        // Loads
        t.def(Iload, UBCP | CLVM, Vtos, Itos, |g| g.iload());
        t.def(NofastIload, UBCP, Vtos, Itos, |g| g.nofast_iload());
        t.def(FastIload, UBCP, Vtos, Itos, |g| g.fast_iload());
        t.def(FastIload2, UBCP, Vtos, Itos, |g| g.fast_iload2());
        t.def(Lload, UBCP, Vtos, Ltos, |g| g.lload());
        t.def(Fload, UBCP, Vtos, Ftos, |g| g.fload());
        t.def(Dload, UBCP, Vtos, Dtos, |g| g.dload());
        t.def(Aload, UBCP, Vtos, Atos, |g| g.aload());
        t.def(Iload0, NONE, Vtos, Itos, |g| g.iload_n(0));
        t.def(Iload1, NONE, Vtos, Itos, |g| g.iload_n(1));
        t.def(Iload2, NONE, Vtos, Itos, |g| g.iload_n(2));
        t.def(Iload3, NONE, Vtos, Itos, |g| g.iload_n(3));
        t.def(Lload0, NONE, Vtos, Ltos, |g| g.lload_n(0));
        t.def(Lload1, NONE, Vtos, Ltos, |g| g.lload_n(1));
        t.def(Lload2, NONE, Vtos, Ltos, |g| g.lload_n(2));
        t.def(Lload3, NONE, Vtos, Ltos, |g| g.lload_n(3));
        t.def(Fload0, NONE, Vtos, Ftos, |g| g.fload_n(0));
        t.def(Fload1, NONE, Vtos, Ftos, |g| g.fload_n(1));
        t.def(Fload2, NONE, Vtos, Ftos, |g| g.fload_n(2));
        t.def(Fload3, NONE, Vtos, Ftos, |g| g.fload_n(3));
        t.def(Dload0, NONE, Vtos, Dtos, |g| g.dload_n(0));
        t.def(Dload1, NONE, Vtos, Dtos, |g| g.dload_n(1));
        t.def(Dload2, NONE, Vtos, Dtos, |g| g.dload_n(2));
        t.def(Dload3, NONE, Vtos, Dtos, |g| g.dload_n(3));
        t.def(Aload0, UBCP | CLVM, Vtos, Atos, |g| g.aload_0());
        t.def(NofastAload0, NONE, Vtos, Atos, |g| g.aload_n(0));
        t.def(FastAload0, NONE, Vtos, Atos, |g| g.aload_n(0));
        t.def(Aload1, NONE, Vtos, Atos, |g| g.aload_n(1));
        t.def(Aload2, NONE, Vtos, Atos, |g| g.aload_n(2));
        t.def(Aload3, NONE, Vtos, Atos, |g| g.aload_n(3));
        t.def(Iaload, NONE, Itos, Itos, |g| g.iaload());
        t.def(Laload, NONE, Itos, Ltos, |g| g.laload());
        t.def(Faload, NONE, Itos, Ftos, |g| g.faload());
        t.def(Daload, NONE, Itos, Dtos, |g| g.daload());
        t.def(Aaload, NONE, Itos, Atos, |g| g.aaload());
        t.def(Baload, NONE, Itos, Itos, |g| g.baload());
        t.def(Caload, NONE, Itos, Itos, |g| g.caload());
        t.def(FastIcaload, UBCP, Vtos, Itos, |g| g.fast_icaload());
        t.def(Saload, NONE, Itos, Itos, |g| g.saload());

        // Stores
        t.def(Istore, UBCP, Itos, Vtos, |g| g.istore());
        t.def(Lstore, UBCP, Ltos, Vtos, |g| g.lstore());
        t.def(Fstore, UBCP, Ftos, Vtos, |g| g.fstore());
        t.def(Dstore, UBCP, Dtos, Vtos, |g| g.dstore());
        t.def(Astore, UBCP, Vtos, Vtos, |g| g.astore());
        t.def(Istore0, NONE, Itos, Vtos, |g| g.istore_n(0));
        t.def(Istore1, NONE, Itos, Vtos, |g| g.istore_n(1));
        t.def(Istore2, NONE, Itos, Vtos, |g| g.istore_n(2));
        t.def(Istore3, NONE, Itos, Vtos, |g| g.istore_n(3));
        t.def(Lstore0, NONE, Ltos, Vtos, |g| g.lstore_n(0));
        t.def(Lstore1, NONE, Ltos, Vtos, |g| g.lstore_n(1));
        t.def(Lstore2, NONE, Ltos, Vtos, |g| g.lstore_n(2));
        t.def(Lstore3, NONE, Ltos, Vtos, |g| g.lstore_n(3));
        t.def(Fstore0, NONE, Ftos, Vtos, |g| g.fstore_n(0));
        t.def(Fstore1, NONE, Ftos, Vtos, |g| g.fstore_n(1));
        t.def(Fstore2, NONE, Ftos, Vtos, |g| g.fstore_n(2));
        t.def(Fstore3, NONE, Ftos, Vtos, |g| g.fstore_n(3));
        t.def(Dstore0, NONE, Dtos, Vtos, |g| g.dstore_n(0));
        t.def(Dstore1, NONE, Dtos, Vtos, |g| g.dstore_n(1));
        t.def(Dstore2, NONE, Dtos, Vtos, |g| g.dstore_n(2));
        t.def(Dstore3, NONE, Dtos, Vtos, |g| g.dstore_n(3));
        t.def(Astore0, NONE, Vtos, Vtos, |g| g.astore_n(0));
        t.def(Astore1, NONE, Vtos, Vtos, |g| g.astore_n(1));
        t.def(Astore2, NONE, Vtos, Vtos, |g| g.astore_n(2));
        t.def(Astore3, NONE, Vtos, Vtos, |g| g.astore_n(3));
        t.def(Iastore, NONE, Itos, Vtos, |g| g.iastore());
        t.def(Lastore, NONE, Ltos, Vtos, |g| g.lastore());
        t.def(Fastore, NONE, Ftos, Vtos, |g| g.fastore());
        t.def(Dastore, NONE, Dtos, Vtos, |g| g.dastore());
        t.def(Aastore, CLVM, Vtos, Vtos, |g| g.aastore());
        t.def(Bastore, NONE, Itos, Vtos, |g| g.bastore());
        t.def(Castore, NONE, Itos, Vtos, |g| g.castore());
        t.def(Sastore, NONE, Itos, Vtos, |g| g.castore());

        // Stack
        t.def(Pop, NONE, Vtos, Vtos, |g| g.pop_words(1));
        t.def(Pop2, NONE, Vtos, Vtos, |g| g.pop_words(2));
        t.def(Dup, NONE, Vtos, Vtos, |g| g.dup());
        t.def(DupX1, NONE, Vtos, Vtos, |g| g.dup_x1());
        t.def(DupX2, NONE, Vtos, Vtos, |g| g.dup_x2());
        t.def(Dup2, NONE, Vtos, Vtos, |g| g.dup2());
        t.def(Dup2X1, NONE, Vtos, Vtos, |g| g.dup2_x1());
        t.def(Dup2X2, NONE, Vtos, Vtos, |g| g.dup2_x2());
        t.def(Swap, NONE, Vtos, Vtos, |g| g.swap());

        // Arithmetic
        t.def(Iadd, NONE, Itos, Itos, |g| g.iop2(Op::Add));
        t.def(Ladd, NONE, Ltos, Ltos, |g| g.lop2(Op::Add));
        t.def(Fadd, NONE, Ftos, Ftos, |g| g.fop2(Op::Add));
        t.def(Dadd, NONE, Dtos, Dtos, |g| g.dop2(Op::Add));
        t.def(Isub, NONE, Itos, Itos, |g| g.iop2(Op::Sub));
        t.def(Lsub, NONE, Ltos, Ltos, |g| g.lop2(Op::Sub));
        t.def(Fsub, NONE, Ftos, Ftos, |g| g.fop2(Op::Sub));
        t.def(Dsub, NONE, Dtos, Dtos, |g| g.dop2(Op::Sub));
        t.def(Imul, NONE, Itos, Itos, |g| g.iop2(Op::Mul));
        t.def(Lmul, NONE, Ltos, Ltos, |g| g.lop2(Op::Mul));
        t.def(Fmul, NONE, Ftos, Ftos, |g| g.fop2(Op::Mul));
        t.def(Dmul, NONE, Dtos, Dtos, |g| g.dop2(Op::Mul));
        t.def(Idiv, NONE, Itos, Itos, |g| g.idiv(false));
        t.def(Ldiv, NONE, Ltos, Ltos, |g| g.ldiv(false));
        t.def(Fdiv, NONE, Ftos, Ftos, |g| g.fop2(Op::Div));
        t.def(Ddiv, NONE, Dtos, Dtos, |g| g.dop2(Op::Div));
        t.def(Irem, NONE, Itos, Itos, |g| g.idiv(true));
        t.def(Lrem, NONE, Ltos, Ltos, |g| g.ldiv(true));
        t.def(Frem, NONE, Ftos, Ftos, |g| g.fop2(Op::Rem));
        t.def(Drem, NONE, Dtos, Dtos, |g| g.dop2(Op::Rem));
        t.def(Ineg, NONE, Itos, Itos, |g| g.ineg());
        t.def(Lneg, NONE, Ltos, Ltos, |g| g.lneg());
        t.def(Fneg, NONE, Ftos, Ftos, |g| g.fneg_tos(false));
        t.def(Dneg, NONE, Dtos, Dtos, |g| g.fneg_tos(true));
        t.def(Ishl, NONE, Itos, Itos, |g| g.iop2(Op::Shl));
        t.def(Lshl, NONE, Itos, Ltos, |g| g.lshift(Op::Shl));
        t.def(Ishr, NONE, Itos, Itos, |g| g.iop2(Op::Shr));
        t.def(Lshr, NONE, Itos, Ltos, |g| g.lshift(Op::Shr));
        t.def(Iushr, NONE, Itos, Itos, |g| g.iop2(Op::Ushr));
        t.def(Lushr, NONE, Itos, Ltos, |g| g.lshift(Op::Ushr));
        t.def(Iand, NONE, Itos, Itos, |g| g.iop2(Op::And));
        t.def(Land, NONE, Ltos, Ltos, |g| g.lop2(Op::And));
        t.def(Ior, NONE, Itos, Itos, |g| g.iop2(Op::Or));
        t.def(Lor, NONE, Ltos, Ltos, |g| g.lop2(Op::Or));
        t.def(Ixor, NONE, Itos, Itos, |g| g.iop2(Op::Xor));
        t.def(Lxor, NONE, Ltos, Ltos, |g| g.lop2(Op::Xor));
        t.def(Iinc, UBCP, Vtos, Vtos, |g| g.iinc());

        // Conversions
        t.def(I2l, NONE, Itos, Ltos, |g| g.convert(I2l));
        t.def(I2f, NONE, Itos, Ftos, |g| g.convert(I2f));
        t.def(I2d, NONE, Itos, Dtos, |g| g.convert(I2d));
        t.def(L2i, NONE, Ltos, Itos, |g| g.convert(L2i));
        t.def(L2f, NONE, Ltos, Ftos, |g| g.convert(L2f));
        t.def(L2d, NONE, Ltos, Dtos, |g| g.convert(L2d));
        t.def(F2i, NONE, Ftos, Itos, |g| g.convert(F2i));
        t.def(F2l, NONE, Ftos, Ltos, |g| g.convert(F2l));
        t.def(F2d, NONE, Ftos, Dtos, |g| g.convert(F2d));
        t.def(D2i, NONE, Dtos, Itos, |g| g.convert(D2i));
        t.def(D2l, NONE, Dtos, Ltos, |g| g.convert(D2l));
        t.def(D2f, NONE, Dtos, Ftos, |g| g.convert(D2f));
        t.def(I2b, NONE, Itos, Itos, |g| g.convert(I2b));
        t.def(I2c, NONE, Itos, Itos, |g| g.convert(I2c));
        t.def(I2s, NONE, Itos, Itos, |g| g.convert(I2s));

        // Comparisons
        t.def(Lcmp, NONE, Ltos, Itos, |g| g.lcmp());
        t.def(Fcmpl, NONE, Ftos, Itos, |g| g.float_cmp(false, -1));
        t.def(Fcmpg, NONE, Ftos, Itos, |g| g.float_cmp(false, 1));
        t.def(Dcmpl, NONE, Dtos, Itos, |g| g.float_cmp(true, -1));
        t.def(Dcmpg, NONE, Dtos, Itos, |g| g.float_cmp(true, 1));

        // Branches
        t.def(Ifeq, UBCP, Itos, Vtos, |g| g.if_0cmp(Cond::Eq));
        t.def(Ifne, UBCP, Itos, Vtos, |g| g.if_0cmp(Cond::Ne));
        t.def(Iflt, UBCP, Itos, Vtos, |g| g.if_0cmp(Cond::Lt));
        t.def(Ifge, UBCP, Itos, Vtos, |g| g.if_0cmp(Cond::Ge));
        t.def(Ifgt, UBCP, Itos, Vtos, |g| g.if_0cmp(Cond::Gt));
        t.def(Ifle, UBCP, Itos, Vtos, |g| g.if_0cmp(Cond::Le));
        t.def(IfIcmpeq, UBCP, Itos, Vtos, |g| g.if_icmp(Cond::Eq));
        t.def(IfIcmpne, UBCP, Itos, Vtos, |g| g.if_icmp(Cond::Ne));
        t.def(IfIcmplt, UBCP, Itos, Vtos, |g| g.if_icmp(Cond::Lt));
        t.def(IfIcmpge, UBCP, Itos, Vtos, |g| g.if_icmp(Cond::Ge));
        t.def(IfIcmpgt, UBCP, Itos, Vtos, |g| g.if_icmp(Cond::Gt));
        t.def(IfIcmple, UBCP, Itos, Vtos, |g| g.if_icmp(Cond::Le));
        t.def(IfAcmpeq, UBCP, Atos, Vtos, |g| g.if_acmp(Cond::Eq));
        t.def(IfAcmpne, UBCP, Atos, Vtos, |g| g.if_acmp(Cond::Ne));
        t.def(Ifnull, UBCP, Atos, Vtos, |g| g.if_0cmp(Cond::Eq));
        t.def(Ifnonnull, UBCP, Atos, Vtos, |g| g.if_0cmp(Cond::Ne));
        t.def(Goto, UBCP | DISP, Vtos, Vtos, |g| g.take_branch(false, false));
        t.def(Jsr, UBCP | DISP, Vtos, Vtos, |g| g.take_branch(true, false));
        t.def(GotoW, UBCP | DISP, Vtos, Vtos, |g| g.take_branch(false, true));
        t.def(JsrW, UBCP | DISP, Vtos, Vtos, |g| g.take_branch(true, true));
        t.def(Ret, UBCP | DISP, Vtos, Vtos, |g| g.jsr_ret());
        t.def(Tableswitch, UBCP | DISP, Itos, Vtos, |g| g.tableswitch());
        t.def(Lookupswitch, UBCP | DISP, Itos, Itos, |g| g.lookupswitch());
        t.def(FastLinearswitch, UBCP | DISP, Itos, Vtos, |g| g.fast_linearswitch());
        t.def(FastBinaryswitch, UBCP | DISP, Itos, Vtos, |g| g.fast_binaryswitch());

        // Returns
        t.def(Ireturn, DISP, Itos, Itos, |g| g.return_entry(Itos));
        t.def(Lreturn, DISP, Ltos, Ltos, |g| g.return_entry(Ltos));
        t.def(Freturn, DISP, Ftos, Ftos, |g| g.return_entry(Ftos));
        t.def(Dreturn, DISP, Dtos, Dtos, |g| g.return_entry(Dtos));
        t.def(Areturn, DISP, Atos, Atos, |g| g.return_entry(Atos));
        t.def(Return, DISP, Vtos, Vtos, |g| g.return_entry(Vtos));
        t.def(ReturnRegisterFinalizer, DISP | CLVM, Vtos, Vtos, |g| g.return_entry(Vtos));

        // Fields
        t.def(Getstatic, UBCP | CLVM, Vtos, Vtos, |g| g.getstatic());
        t.def(Putstatic, UBCP | CLVM, Vtos, Vtos, |g| g.putstatic());
        t.def(Getfield, UBCP | CLVM, Vtos, Vtos, |g| g.getfield());
        t.def(Putfield, UBCP | CLVM, Vtos, Vtos, |g| g.putfield());
        t.def(NofastGetfield, UBCP | CLVM, Vtos, Vtos, |g| g.nofast_getfield());
        t.def(NofastPutfield, UBCP | CLVM, Vtos, Vtos, |g| g.nofast_putfield());
        t.def(FastAgetfield, UBCP, Atos, Atos, |g| g.fast_accessfield(Atos));
        t.def(FastBgetfield, UBCP, Atos, Itos, |g| g.fast_accessfield(Btos));
        t.def(FastCgetfield, UBCP, Atos, Itos, |g| g.fast_accessfield(Ctos));
        t.def(FastDgetfield, UBCP, Atos, Dtos, |g| g.fast_accessfield(Dtos));
        t.def(FastFgetfield, UBCP, Atos, Ftos, |g| g.fast_accessfield(Ftos));
        t.def(FastIgetfield, UBCP, Atos, Itos, |g| g.fast_accessfield(Itos));
        t.def(FastLgetfield, UBCP, Atos, Ltos, |g| g.fast_accessfield(Ltos));
        t.def(FastSgetfield, UBCP, Atos, Itos, |g| g.fast_accessfield(Stos));
        t.def(FastAputfield, UBCP, Atos, Vtos, |g| g.fast_storefield(Atos));
        t.def(FastBputfield, UBCP, Itos, Vtos, |g| g.fast_storefield(Btos));
        t.def(FastZputfield, UBCP, Itos, Vtos, |g| g.fast_storefield(Ztos));
        t.def(FastCputfield, UBCP, Itos, Vtos, |g| g.fast_storefield(Ctos));
        t.def(FastDputfield, UBCP, Dtos, Vtos, |g| g.fast_storefield(Dtos));
        t.def(FastFputfield, UBCP, Ftos, Vtos, |g| g.fast_storefield(Ftos));
        t.def(FastIputfield, UBCP, Itos, Vtos, |g| g.fast_storefield(Itos));
        t.def(FastLputfield, UBCP, Ltos, Vtos, |g| g.fast_storefield(Ltos));
        t.def(FastSputfield, UBCP, Itos, Vtos, |g| g.fast_storefield(Stos));
        t.def(FastIaccess0, UBCP, Vtos, Itos, |g| g.fast_xaccess(Itos));
        t.def(FastAaccess0, UBCP, Vtos, Atos, |g| g.fast_xaccess(Atos));
        t.def(FastFaccess0, UBCP, Vtos, Ftos, |g| g.fast_xaccess(Ftos));

        // Invokes
        t.def(Invokevirtual, UBCP | DISP | CLVM, Vtos, Vtos, |g| g.invokevirtual());
        t.def(Invokespecial, UBCP | DISP | CLVM, Vtos, Vtos, |g| g.invokespecial());
        t.def(Invokestatic, UBCP | DISP | CLVM, Vtos, Vtos, |g| g.invokestatic());
        t.def(Invokeinterface, UBCP | DISP | CLVM, Vtos, Vtos, |g| g.invokeinterface());
        t.def(Invokedynamic, UBCP | DISP | CLVM, Vtos, Vtos, |g| g.invokedynamic());
        t.def(Invokehandle, UBCP | DISP | CLVM, Vtos, Vtos, |g| g.invokehandle());
        t.def(FastInvokevfinal, UBCP | DISP, Vtos, Vtos, |g| g.fast_invokevfinal());

        // Objects and arrays
        t.def(New, UBCP | CLVM, Vtos, Atos, |g| g.new_instance());
        t.def(Newarray, UBCP | CLVM, Itos, Atos, |g| g.newarray());
        t.def(Anewarray, UBCP | CLVM, Itos, Atos, |g| g.anewarray());
        t.def(Multianewarray, UBCP | CLVM, Vtos, Atos, |g| g.multianewarray());
        t.def(Arraylength, NONE, Atos, Itos, |g| g.arraylength());
        t.def(Athrow, DISP, Atos, Vtos, |g| g.athrow());
        t.def(Checkcast, UBCP | CLVM, Atos, Atos, |g| g.checkcast());
        t.def(Instanceof, UBCP | CLVM, Atos, Itos, |g| g.instanceof());
        t.def(Monitorenter, DISP | CLVM, Atos, Vtos, |g| g.monitorenter());
        t.def(Monitorexit, CLVM, Atos, Vtos, |g| g.monitorexit());

        // Wide and debugging
        t.def(Wide, UBCP | DISP, Vtos, Vtos, |g| g.wide());
        t.def(Breakpoint, UBCP | DISP | CLVM, Vtos, Vtos, |g| g.breakpoint());
        t.def(Shouldnotreachhere, NONE, Vtos, Vtos, |g| g.should_not_reach_here());

        t.def(Iload, UBCP | WIDE, Vtos, Itos, |g| g.wide_iload());
        t.def(Lload, UBCP | WIDE, Vtos, Ltos, |g| g.lload());
        t.def(Fload, UBCP | WIDE, Vtos, Ftos, |g| g.fload());
        t.def(Dload, UBCP | WIDE, Vtos, Dtos, |g| g.dload());
        t.def(Aload, UBCP | WIDE, Vtos, Atos, |g| g.aload());
        t.def(Istore, UBCP | WIDE, Vtos, Vtos, |g| g.wide_store(Itos));
        t.def(Lstore, UBCP | WIDE, Vtos, Vtos, |g| g.wide_store(Ltos));
        t.def(Fstore, UBCP | WIDE, Vtos, Vtos, |g| g.wide_store(Ftos));
        t.def(Dstore, UBCP | WIDE, Vtos, Vtos, |g| g.wide_store(Dtos));
        t.def(Astore, UBCP | WIDE, Vtos, Vtos, |g| g.astore());
        t.def(Iinc, UBCP | WIDE, Vtos, Vtos, |g| g.iinc());
        t.def(Ret, UBCP | WIDE | DISP, Vtos, Vtos, |g| g.jsr_ret());

        t
    }
}
