//! Bytecode catalogue and top-of-stack states.
//!
//! The table covers the standard instruction set (0x00-0xca) and the
//! quickened variants the interpreter rewrites them into. Lengths are in
//! bytes including the opcode; `0` marks a variable-length instruction.
//! Depth is the operand stack effect in slots, `VAR` when it depends on the
//! resolved constant.

use crate::runtime::layout::BasicType;

/// Category of the value cached in the top-of-stack register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TosState {
    Btos = 0,
    Ztos = 1,
    Ctos = 2,
    Stos = 3,
    Itos = 4,
    Ltos = 5,
    Ftos = 6,
    Dtos = 7,
    Atos = 8,
    Vtos = 9,
}

impl TosState {
    pub const COUNT: usize = 10;

    pub const ALL: [TosState; 10] = [
        TosState::Btos,
        TosState::Ztos,
        TosState::Ctos,
        TosState::Stos,
        TosState::Itos,
        TosState::Ltos,
        TosState::Ftos,
        TosState::Dtos,
        TosState::Atos,
        TosState::Vtos,
    ];

    pub fn from_u8(v: u8) -> Option<TosState> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TosState::Btos => "btos",
            TosState::Ztos => "ztos",
            TosState::Ctos => "ctos",
            TosState::Stos => "stos",
            TosState::Itos => "itos",
            TosState::Ltos => "ltos",
            TosState::Ftos => "ftos",
            TosState::Dtos => "dtos",
            TosState::Atos => "atos",
            TosState::Vtos => "vtos",
        }
    }

    pub fn from_basic_type(ty: BasicType) -> TosState {
        match ty {
            BasicType::Byte => TosState::Btos,
            BasicType::Boolean => TosState::Ztos,
            BasicType::Char => TosState::Ctos,
            BasicType::Short => TosState::Stos,
            BasicType::Int => TosState::Itos,
            BasicType::Long => TosState::Ltos,
            BasicType::Float => TosState::Ftos,
            BasicType::Double => TosState::Dtos,
            BasicType::Object | BasicType::Array => TosState::Atos,
            BasicType::Void => TosState::Vtos,
        }
    }

    pub fn basic_type(self) -> BasicType {
        match self {
            TosState::Btos => BasicType::Byte,
            TosState::Ztos => BasicType::Boolean,
            TosState::Ctos => BasicType::Char,
            TosState::Stos => BasicType::Short,
            TosState::Itos => BasicType::Int,
            TosState::Ltos => BasicType::Long,
            TosState::Ftos => BasicType::Float,
            TosState::Dtos => BasicType::Double,
            TosState::Atos => BasicType::Object,
            TosState::Vtos => BasicType::Void,
        }
    }

    /// Expression stack slots a value of this state occupies.
    pub fn slots(self) -> i32 {
        match self {
            TosState::Ltos | TosState::Dtos => 2,
            TosState::Vtos => 0,
            _ => 1,
        }
    }

    /// Sub-int states share the int register and stack shape.
    pub fn is_int_like(self) -> bool {
        matches!(
            self,
            TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos | TosState::Itos
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TosState::Ftos | TosState::Dtos)
    }
}

/// Depth marker for instructions whose stack effect is resolved at run time.
pub const VAR: i8 = i8::MIN;

macro_rules! bytecodes {
    ($(($name:ident, $code:literal, $text:literal, $len:literal, $wide:literal, $depth:expr),)*) => {
        /// A bytecode, standard or quickened.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Bytecode {
            $($name = $code,)*
        }

        impl Bytecode {
            pub const ALL: &'static [Bytecode] = &[$(Bytecode::$name,)*];

            pub fn from_u8(code: u8) -> Option<Bytecode> {
                match code {
                    $($code => Some(Bytecode::$name),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Bytecode::$name => $text,)*
                }
            }

            /// Fixed length in bytes, or 0 when variable.
            pub fn length(self) -> usize {
                match self {
                    $(Bytecode::$name => $len,)*
                }
            }

            /// Length of the `wide` form, or 0 when there is none.
            pub fn wide_length(self) -> usize {
                match self {
                    $(Bytecode::$name => $wide,)*
                }
            }

            /// Stack effect in slots, or `None` when it depends on the
            /// resolved constant.
            pub fn depth(self) -> Option<i32> {
                let d: i8 = match self {
                    $(Bytecode::$name => $depth,)*
                };
                if d == VAR { None } else { Some(d as i32) }
            }
        }
    };
}

bytecodes! {
    (Nop, 0x00, "nop", 1, 0, 0),
    (AconstNull, 0x01, "aconst_null", 1, 0, 1),
    (IconstM1, 0x02, "iconst_m1", 1, 0, 1),
    (Iconst0, 0x03, "iconst_0", 1, 0, 1),
    (Iconst1, 0x04, "iconst_1", 1, 0, 1),
    (Iconst2, 0x05, "iconst_2", 1, 0, 1),
    (Iconst3, 0x06, "iconst_3", 1, 0, 1),
    (Iconst4, 0x07, "iconst_4", 1, 0, 1),
    (Iconst5, 0x08, "iconst_5", 1, 0, 1),
    (Lconst0, 0x09, "lconst_0", 1, 0, 2),
    (Lconst1, 0x0a, "lconst_1", 1, 0, 2),
    (Fconst0, 0x0b, "fconst_0", 1, 0, 1),
    (Fconst1, 0x0c, "fconst_1", 1, 0, 1),
    (Fconst2, 0x0d, "fconst_2", 1, 0, 1),
    (Dconst0, 0x0e, "dconst_0", 1, 0, 2),
    (Dconst1, 0x0f, "dconst_1", 1, 0, 2),
    (Bipush, 0x10, "bipush", 2, 0, 1),
    (Sipush, 0x11, "sipush", 3, 0, 1),
    (Ldc, 0x12, "ldc", 2, 0, 1),
    (LdcW, 0x13, "ldc_w", 3, 0, 1),
    (Ldc2W, 0x14, "ldc2_w", 3, 0, 2),
    (Iload, 0x15, "iload", 2, 4, 1),
    (Lload, 0x16, "lload", 2, 4, 2),
    (Fload, 0x17, "fload", 2, 4, 1),
    (Dload, 0x18, "dload", 2, 4, 2),
    (Aload, 0x19, "aload", 2, 4, 1),
    (Iload0, 0x1a, "iload_0", 1, 0, 1),
    (Iload1, 0x1b, "iload_1", 1, 0, 1),
    (Iload2, 0x1c, "iload_2", 1, 0, 1),
    (Iload3, 0x1d, "iload_3", 1, 0, 1),
    (Lload0, 0x1e, "lload_0", 1, 0, 2),
    (Lload1, 0x1f, "lload_1", 1, 0, 2),
    (Lload2, 0x20, "lload_2", 1, 0, 2),
    (Lload3, 0x21, "lload_3", 1, 0, 2),
    (Fload0, 0x22, "fload_0", 1, 0, 1),
    (Fload1, 0x23, "fload_1", 1, 0, 1),
    (Fload2, 0x24, "fload_2", 1, 0, 1),
    (Fload3, 0x25, "fload_3", 1, 0, 1),
    (Dload0, 0x26, "dload_0", 1, 0, 2),
    (Dload1, 0x27, "dload_1", 1, 0, 2),
    (Dload2, 0x28, "dload_2", 1, 0, 2),
    (Dload3, 0x29, "dload_3", 1, 0, 2),
    (Aload0, 0x2a, "aload_0", 1, 0, 1),
    (Aload1, 0x2b, "aload_1", 1, 0, 1),
    (Aload2, 0x2c, "aload_2", 1, 0, 1),
    (Aload3, 0x2d, "aload_3", 1, 0, 1),
    (Iaload, 0x2e, "iaload", 1, 0, -1),
    (Laload, 0x2f, "laload", 1, 0, 0),
    (Faload, 0x30, "faload", 1, 0, -1),
    (Daload, 0x31, "daload", 1, 0, 0),
    (Aaload, 0x32, "aaload", 1, 0, -1),
    (Baload, 0x33, "baload", 1, 0, -1),
    (Caload, 0x34, "caload", 1, 0, -1),
    (Saload, 0x35, "saload", 1, 0, -1),
    (Istore, 0x36, "istore", 2, 4, -1),
    (Lstore, 0x37, "lstore", 2, 4, -2),
    (Fstore, 0x38, "fstore", 2, 4, -1),
    (Dstore, 0x39, "dstore", 2, 4, -2),
    (Astore, 0x3a, "astore", 2, 4, -1),
    (Istore0, 0x3b, "istore_0", 1, 0, -1),
    (Istore1, 0x3c, "istore_1", 1, 0, -1),
    (Istore2, 0x3d, "istore_2", 1, 0, -1),
    (Istore3, 0x3e, "istore_3", 1, 0, -1),
    (Lstore0, 0x3f, "lstore_0", 1, 0, -2),
    (Lstore1, 0x40, "lstore_1", 1, 0, -2),
    (Lstore2, 0x41, "lstore_2", 1, 0, -2),
    (Lstore3, 0x42, "lstore_3", 1, 0, -2),
    (Fstore0, 0x43, "fstore_0", 1, 0, -1),
    (Fstore1, 0x44, "fstore_1", 1, 0, -1),
    (Fstore2, 0x45, "fstore_2", 1, 0, -1),
    (Fstore3, 0x46, "fstore_3", 1, 0, -1),
    (Dstore0, 0x47, "dstore_0", 1, 0, -2),
    (Dstore1, 0x48, "dstore_1", 1, 0, -2),
    (Dstore2, 0x49, "dstore_2", 1, 0, -2),
    (Dstore3, 0x4a, "dstore_3", 1, 0, -2),
    (Astore0, 0x4b, "astore_0", 1, 0, -1),
    (Astore1, 0x4c, "astore_1", 1, 0, -1),
    (Astore2, 0x4d, "astore_2", 1, 0, -1),
    (Astore3, 0x4e, "astore_3", 1, 0, -1),
    (Iastore, 0x4f, "iastore", 1, 0, -3),
    (Lastore, 0x50, "lastore", 1, 0, -4),
    (Fastore, 0x51, "fastore", 1, 0, -3),
    (Dastore, 0x52, "dastore", 1, 0, -4),
    (Aastore, 0x53, "aastore", 1, 0, -3),
    (Bastore, 0x54, "bastore", 1, 0, -3),
    (Castore, 0x55, "castore", 1, 0, -3),
    (Sastore, 0x56, "sastore", 1, 0, -3),
    (Pop, 0x57, "pop", 1, 0, -1),
    (Pop2, 0x58, "pop2", 1, 0, -2),
    (Dup, 0x59, "dup", 1, 0, 1),
    (DupX1, 0x5a, "dup_x1", 1, 0, 1),
    (DupX2, 0x5b, "dup_x2", 1, 0, 1),
    (Dup2, 0x5c, "dup2", 1, 0, 2),
    (Dup2X1, 0x5d, "dup2_x1", 1, 0, 2),
    (Dup2X2, 0x5e, "dup2_x2", 1, 0, 2),
    (Swap, 0x5f, "swap", 1, 0, 0),
    (Iadd, 0x60, "iadd", 1, 0, -1),
    (Ladd, 0x61, "ladd", 1, 0, -2),
    (Fadd, 0x62, "fadd", 1, 0, -1),
    (Dadd, 0x63, "dadd", 1, 0, -2),
    (Isub, 0x64, "isub", 1, 0, -1),
    (Lsub, 0x65, "lsub", 1, 0, -2),
    (Fsub, 0x66, "fsub", 1, 0, -1),
    (Dsub, 0x67, "dsub", 1, 0, -2),
    (Imul, 0x68, "imul", 1, 0, -1),
    (Lmul, 0x69, "lmul", 1, 0, -2),
    (Fmul, 0x6a, "fmul", 1, 0, -1),
    (Dmul, 0x6b, "dmul", 1, 0, -2),
    (Idiv, 0x6c, "idiv", 1, 0, -1),
    (Ldiv, 0x6d, "ldiv", 1, 0, -2),
    (Fdiv, 0x6e, "fdiv", 1, 0, -1),
    (Ddiv, 0x6f, "ddiv", 1, 0, -2),
    (Irem, 0x70, "irem", 1, 0, -1),
    (Lrem, 0x71, "lrem", 1, 0, -2),
    (Frem, 0x72, "frem", 1, 0, -1),
    (Drem, 0x73, "drem", 1, 0, -2),
    (Ineg, 0x74, "ineg", 1, 0, 0),
    (Lneg, 0x75, "lneg", 1, 0, 0),
    (Fneg, 0x76, "fneg", 1, 0, 0),
    (Dneg, 0x77, "dneg", 1, 0, 0),
    (Ishl, 0x78, "ishl", 1, 0, -1),
    (Lshl, 0x79, "lshl", 1, 0, -1),
    (Ishr, 0x7a, "ishr", 1, 0, -1),
    (Lshr, 0x7b, "lshr", 1, 0, -1),
    (Iushr, 0x7c, "iushr", 1, 0, -1),
    (Lushr, 0x7d, "lushr", 1, 0, -1),
    (Iand, 0x7e, "iand", 1, 0, -1),
    (Land, 0x7f, "land", 1, 0, -2),
    (Ior, 0x80, "ior", 1, 0, -1),
    (Lor, 0x81, "lor", 1, 0, -2),
    (Ixor, 0x82, "ixor", 1, 0, -1),
    (Lxor, 0x83, "lxor", 1, 0, -2),
    (Iinc, 0x84, "iinc", 3, 6, 0),
    (I2l, 0x85, "i2l", 1, 0, 1),
    (I2f, 0x86, "i2f", 1, 0, 0),
    (I2d, 0x87, "i2d", 1, 0, 1),
    (L2i, 0x88, "l2i", 1, 0, -1),
    (L2f, 0x89, "l2f", 1, 0, -1),
    (L2d, 0x8a, "l2d", 1, 0, 0),
    (F2i, 0x8b, "f2i", 1, 0, 0),
    (F2l, 0x8c, "f2l", 1, 0, 1),
    (F2d, 0x8d, "f2d", 1, 0, 1),
    (D2i, 0x8e, "d2i", 1, 0, -1),
    (D2l, 0x8f, "d2l", 1, 0, 0),
    (D2f, 0x90, "d2f", 1, 0, -1),
    (I2b, 0x91, "i2b", 1, 0, 0),
    (I2c, 0x92, "i2c", 1, 0, 0),
    (I2s, 0x93, "i2s", 1, 0, 0),
    (Lcmp, 0x94, "lcmp", 1, 0, -3),
    (Fcmpl, 0x95, "fcmpl", 1, 0, -1),
    (Fcmpg, 0x96, "fcmpg", 1, 0, -1),
    (Dcmpl, 0x97, "dcmpl", 1, 0, -3),
    (Dcmpg, 0x98, "dcmpg", 1, 0, -3),
    (Ifeq, 0x99, "ifeq", 3, 0, -1),
    (Ifne, 0x9a, "ifne", 3, 0, -1),
    (Iflt, 0x9b, "iflt", 3, 0, -1),
    (Ifge, 0x9c, "ifge", 3, 0, -1),
    (Ifgt, 0x9d, "ifgt", 3, 0, -1),
    (Ifle, 0x9e, "ifle", 3, 0, -1),
    (IfIcmpeq, 0x9f, "if_icmpeq", 3, 0, -2),
    (IfIcmpne, 0xa0, "if_icmpne", 3, 0, -2),
    (IfIcmplt, 0xa1, "if_icmplt", 3, 0, -2),
    (IfIcmpge, 0xa2, "if_icmpge", 3, 0, -2),
    (IfIcmpgt, 0xa3, "if_icmpgt", 3, 0, -2),
    (IfIcmple, 0xa4, "if_icmple", 3, 0, -2),
    (IfAcmpeq, 0xa5, "if_acmpeq", 3, 0, -2),
    (IfAcmpne, 0xa6, "if_acmpne", 3, 0, -2),
    (Goto, 0xa7, "goto", 3, 0, 0),
    (Jsr, 0xa8, "jsr", 3, 0, 1),
    (Ret, 0xa9, "ret", 2, 4, 0),
    (Tableswitch, 0xaa, "tableswitch", 0, 0, -1),
    (Lookupswitch, 0xab, "lookupswitch", 0, 0, -1),
    (Ireturn, 0xac, "ireturn", 1, 0, -1),
    (Lreturn, 0xad, "lreturn", 1, 0, -2),
    (Freturn, 0xae, "freturn", 1, 0, -1),
    (Dreturn, 0xaf, "dreturn", 1, 0, -2),
    (Areturn, 0xb0, "areturn", 1, 0, -1),
    (Return, 0xb1, "return", 1, 0, 0),
    (Getstatic, 0xb2, "getstatic", 3, 0, VAR),
    (Putstatic, 0xb3, "putstatic", 3, 0, VAR),
    (Getfield, 0xb4, "getfield", 3, 0, VAR),
    (Putfield, 0xb5, "putfield", 3, 0, VAR),
    (Invokevirtual, 0xb6, "invokevirtual", 3, 0, VAR),
    (Invokespecial, 0xb7, "invokespecial", 3, 0, VAR),
    (Invokestatic, 0xb8, "invokestatic", 3, 0, VAR),
    (Invokeinterface, 0xb9, "invokeinterface", 5, 0, VAR),
    (Invokedynamic, 0xba, "invokedynamic", 5, 0, VAR),
    (New, 0xbb, "new", 3, 0, 1),
    (Newarray, 0xbc, "newarray", 2, 0, 0),
    (Anewarray, 0xbd, "anewarray", 3, 0, 0),
    (Arraylength, 0xbe, "arraylength", 1, 0, 0),
    (Athrow, 0xbf, "athrow", 1, 0, -1),
    (Checkcast, 0xc0, "checkcast", 3, 0, 0),
    (Instanceof, 0xc1, "instanceof", 3, 0, 0),
    (Monitorenter, 0xc2, "monitorenter", 1, 0, -1),
    (Monitorexit, 0xc3, "monitorexit", 1, 0, -1),
    (Wide, 0xc4, "wide", 0, 0, 0),
    (Multianewarray, 0xc5, "multianewarray", 4, 0, VAR),
    (Ifnull, 0xc6, "ifnull", 3, 0, -1),
    (Ifnonnull, 0xc7, "ifnonnull", 3, 0, -1),
    (GotoW, 0xc8, "goto_w", 5, 0, 0),
    (JsrW, 0xc9, "jsr_w", 5, 0, 1),
    (Breakpoint, 0xca, "breakpoint", 1, 0, 0),
    (FastAgetfield, 0xcb, "fast_agetfield", 3, 0, 0),
    (FastBgetfield, 0xcc, "fast_bgetfield", 3, 0, 0),
    (FastCgetfield, 0xcd, "fast_cgetfield", 3, 0, 0),
    (FastDgetfield, 0xce, "fast_dgetfield", 3, 0, 1),
    (FastFgetfield, 0xcf, "fast_fgetfield", 3, 0, 0),
    (FastIgetfield, 0xd0, "fast_igetfield", 3, 0, 0),
    (FastLgetfield, 0xd1, "fast_lgetfield", 3, 0, 1),
    (FastSgetfield, 0xd2, "fast_sgetfield", 3, 0, 0),
    (FastAputfield, 0xd3, "fast_aputfield", 3, 0, -2),
    (FastBputfield, 0xd4, "fast_bputfield", 3, 0, -2),
    (FastZputfield, 0xd5, "fast_zputfield", 3, 0, -2),
    (FastCputfield, 0xd6, "fast_cputfield", 3, 0, -2),
    (FastDputfield, 0xd7, "fast_dputfield", 3, 0, -3),
    (FastFputfield, 0xd8, "fast_fputfield", 3, 0, -2),
    (FastIputfield, 0xd9, "fast_iputfield", 3, 0, -2),
    (FastLputfield, 0xda, "fast_lputfield", 3, 0, -3),
    (FastSputfield, 0xdb, "fast_sputfield", 3, 0, -2),
    (FastAload0, 0xdc, "fast_aload_0", 1, 0, 1),
    (FastIaccess0, 0xdd, "fast_iaccess_0", 4, 0, 1),
    (FastAaccess0, 0xde, "fast_aaccess_0", 4, 0, 1),
    (FastFaccess0, 0xdf, "fast_faccess_0", 4, 0, 1),
    (FastIload, 0xe0, "fast_iload", 2, 0, 1),
    (FastIload2, 0xe1, "fast_iload2", 4, 0, 2),
    (FastIcaload, 0xe2, "fast_icaload", 3, 0, 0),
    (FastInvokevfinal, 0xe3, "fast_invokevfinal", 3, 0, VAR),
    (FastLinearswitch, 0xe4, "fast_linearswitch", 0, 0, -1),
    (FastBinaryswitch, 0xe5, "fast_binaryswitch", 0, 0, -1),
    (FastAldc, 0xe6, "fast_aldc", 2, 0, 1),
    (FastAldcW, 0xe7, "fast_aldc_w", 3, 0, 1),
    (ReturnRegisterFinalizer, 0xe8, "return_register_finalizer", 1, 0, 0),
    (Invokehandle, 0xe9, "invokehandle", 3, 0, VAR),
    (NofastGetfield, 0xea, "nofast_getfield", 3, 0, VAR),
    (NofastPutfield, 0xeb, "nofast_putfield", 3, 0, VAR),
    (NofastAload0, 0xec, "nofast_aload_0", 1, 0, 1),
    (NofastIload, 0xed, "nofast_iload", 2, 0, 1),
    (Shouldnotreachhere, 0xee, "shouldnotreachhere", 1, 0, 0),
}

impl Bytecode {
    /// Number of distinct bytecode values with a template.
    pub const NUMBER_OF_CODES: usize = 0xef;

    pub fn from_name(name: &str) -> Option<Bytecode> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    /// The standard bytecode a quickened variant stands for.
    pub fn java_code(self) -> Bytecode {
        use Bytecode::*;
        match self {
            FastAgetfield | FastBgetfield | FastCgetfield | FastDgetfield | FastFgetfield
            | FastIgetfield | FastLgetfield | FastSgetfield | NofastGetfield => Getfield,
            FastAputfield | FastBputfield | FastZputfield | FastCputfield | FastDputfield
            | FastFputfield | FastIputfield | FastLputfield | FastSputfield | NofastPutfield => Putfield,
            FastAload0 | FastIaccess0 | FastAaccess0 | FastFaccess0 | NofastAload0 => Aload0,
            FastIload | FastIload2 | FastIcaload | NofastIload => Iload,
            FastInvokevfinal | Invokehandle => Invokevirtual,
            FastLinearswitch | FastBinaryswitch => Lookupswitch,
            FastAldc => Ldc,
            FastAldcW => LdcW,
            ReturnRegisterFinalizer => Return,
            other => other,
        }
    }

    pub fn is_java_code(self) -> bool {
        (self as u8) < Bytecode::Breakpoint as u8
    }

    pub fn is_invoke(self) -> bool {
        use Bytecode::*;
        matches!(
            self,
            Invokevirtual
                | Invokespecial
                | Invokestatic
                | Invokeinterface
                | Invokedynamic
                | Invokehandle
                | FastInvokevfinal
        )
    }

    pub fn is_return(self) -> bool {
        use Bytecode::*;
        matches!(
            self,
            Ireturn | Lreturn | Freturn | Dreturn | Areturn | Return | ReturnRegisterFinalizer
        )
    }

    /// Whether the instruction has a 16-bit (or, for `goto_w`/`jsr_w`, a
    /// 32-bit) branch offset.
    pub fn is_branch(self) -> bool {
        let c = self as u8;
        (Bytecode::Ifeq as u8..=Bytecode::Jsr as u8).contains(&c)
            || matches!(self, Bytecode::Ifnull | Bytecode::Ifnonnull | Bytecode::GotoW | Bytecode::JsrW)
    }

    /// Instructions whose operand is a member reference that the rewriter
    /// turns into a native-order cache index.
    pub fn uses_cp_cache(self) -> bool {
        use Bytecode::*;
        matches!(
            self,
            Getstatic
                | Putstatic
                | Getfield
                | Putfield
                | Invokevirtual
                | Invokespecial
                | Invokestatic
                | Invokeinterface
                | Invokedynamic
                | Invokehandle
                | NofastGetfield
                | NofastPutfield
                | FastInvokevfinal
        ) || (self as u8 >= FastAgetfield as u8 && self as u8 <= FastSputfield as u8)
    }
}

/// Length of the instruction at `bci` in `code`, including variable-length
/// and `wide` forms. Switch padding is relative to the start of `code`.
pub fn length_at(code: &[u8], bci: usize) -> Option<usize> {
    let bc = Bytecode::from_u8(*code.get(bci)?)?;
    let fixed = bc.length();
    if fixed != 0 {
        return Some(fixed);
    }
    let read_i32 = |at: usize| -> Option<i32> {
        let b = code.get(at..at + 4)?;
        Some(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    };
    match bc {
        Bytecode::Wide => {
            let inner = Bytecode::from_u8(*code.get(bci + 1)?)?;
            match inner.wide_length() {
                0 => None,
                n => Some(n),
            }
        }
        Bytecode::Tableswitch => {
            let base = (bci + 4) & !3;
            let lo = read_i32(base + 4)?;
            let hi = read_i32(base + 8)?;
            if hi < lo {
                return None;
            }
            Some(base + 12 + (hi - lo + 1) as usize * 4 - bci)
        }
        Bytecode::Lookupswitch | Bytecode::FastLinearswitch | Bytecode::FastBinaryswitch => {
            let base = (bci + 4) & !3;
            let npairs = read_i32(base + 4)?;
            if npairs < 0 {
                return None;
            }
            Some(base + 8 + npairs as usize * 8 - bci)
        }
        _ => None,
    }
}
