//! Link-time bytecode rewriting.
//!
//! Before a class's methods first run, member-reference operands are
//! replaced by native-order indices into the class's constant pool cache
//! and a few bytecodes are replaced by forms the interpreter can execute
//! directly:
//!
//! * `lookupswitch` becomes `fast_linearswitch` or `fast_binaryswitch`;
//! * `ldc`/`ldc_w` of a string becomes `fast_aldc`/`fast_aldc_w` with an
//!   index into the resolved references;
//! * `invokevirtual` of a signature-polymorphic method becomes
//!   `invokehandle`;
//! * `return` in `Object.<init>` becomes `return_register_finalizer`.

use std::collections::HashMap;

use thiserror::Error;

use super::bytecodes::{Bytecode, length_at};
use crate::runtime::layout::tag;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("bci {bci}: truncated instruction")]
    Truncated { bci: usize },
    #[error("bci {bci}: unknown bytecode {code:#04x}")]
    UnknownBytecode { bci: usize, code: u8 },
    #[error("bci {bci}: constant pool index {index} is not a {expected}")]
    BadConstant {
        bci: usize,
        index: u16,
        expected: &'static str,
    },
    #[error("more than 65535 cache entries")]
    CacheOverflow,
}

/// What the rewriter needs to know about the constant pool.
pub trait ConstantPoolView {
    /// Tag of entry `index`, `None` when out of range.
    fn tag(&self, index: u16) -> Option<u8>;

    /// Whether the method reference at `index` names a signature-polymorphic
    /// method (`MethodHandle.invoke`, `invokeExact`, ...).
    fn is_signature_polymorphic(&self, index: u16) -> bool;
}

/// One constant pool cache entry to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSlot {
    pub cp_index: u16,
    /// Resolved references slot reserved for the appendix of an
    /// `invokedynamic` or `invokehandle` call site.
    pub appendix: Option<u16>,
}

/// One resolved references slot to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSlot {
    String { cp_index: u16 },
    Appendix { cp_index: u16 },
}

/// Cache and resolved references layout of one rewritten class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteResult {
    pub cache: Vec<CacheSlot>,
    pub references: Vec<ReferenceSlot>,
}

/// Rewrites the methods of one class against its constant pool.
pub struct Rewriter<'a, C: ConstantPoolView> {
    cp: &'a C,
    binary_switch_threshold: u32,
    /// Member references share one cache entry per cp index.
    cache_indices: HashMap<u16, u16>,
    string_indices: HashMap<u16, u16>,
    result: RewriteResult,
}

fn read_u2_be(code: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([code[at], code[at + 1]])
}

fn write_u2_native(code: &mut [u8], at: usize, value: u16) {
    code[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

impl<'a, C: ConstantPoolView> Rewriter<'a, C> {
    pub fn new(cp: &'a C, binary_switch_threshold: u32) -> Self {
        Self {
            cp,
            binary_switch_threshold,
            cache_indices: HashMap::new(),
            string_indices: HashMap::new(),
            result: RewriteResult::default(),
        }
    }

    fn push_cache(&mut self, slot: CacheSlot) -> Result<u16, RewriteError> {
        let index = u16::try_from(self.result.cache.len()).map_err(|_| RewriteError::CacheOverflow)?;
        self.result.cache.push(slot);
        Ok(index)
    }

    fn push_reference(&mut self, slot: ReferenceSlot) -> Result<u16, RewriteError> {
        let index = u16::try_from(self.result.references.len()).map_err(|_| RewriteError::CacheOverflow)?;
        self.result.references.push(slot);
        Ok(index)
    }

    fn member_cache_index(&mut self, cp_index: u16) -> Result<u16, RewriteError> {
        if let Some(&index) = self.cache_indices.get(&cp_index) {
            return Ok(index);
        }
        let index = self.push_cache(CacheSlot { cp_index, appendix: None })?;
        self.cache_indices.insert(cp_index, index);
        Ok(index)
    }

    /// Call sites with an appendix get an entry of their own.
    fn call_site_cache_index(&mut self, cp_index: u16) -> Result<u16, RewriteError> {
        let appendix = self.push_reference(ReferenceSlot::Appendix { cp_index })?;
        self.push_cache(CacheSlot {
            cp_index,
            appendix: Some(appendix),
        })
    }

    fn string_reference_index(&mut self, cp_index: u16) -> Result<u16, RewriteError> {
        if let Some(&index) = self.string_indices.get(&cp_index) {
            return Ok(index);
        }
        let index = self.push_reference(ReferenceSlot::String { cp_index })?;
        self.string_indices.insert(cp_index, index);
        Ok(index)
    }

    fn expect_tag(&self, bci: usize, index: u16, accepted: &[u8], expected: &'static str) -> Result<u8, RewriteError> {
        match self.cp.tag(index) {
            Some(t) if accepted.contains(&t) => Ok(t),
            _ => Err(RewriteError::BadConstant { bci, index, expected }),
        }
    }

    /// Rewrite one method's code in place.
    pub fn rewrite_method(&mut self, code: &mut [u8], is_object_init: bool) -> Result<(), RewriteError> {
        let mut bci = 0;
        while bci < code.len() {
            let raw = code[bci];
            let bc = Bytecode::from_u8(raw).ok_or(RewriteError::UnknownBytecode { bci, code: raw })?;
            let len = length_at(code, bci).ok_or(RewriteError::Truncated { bci })?;
            if bci + len > code.len() {
                return Err(RewriteError::Truncated { bci });
            }

            match bc {
                Bytecode::Getstatic | Bytecode::Putstatic | Bytecode::Getfield | Bytecode::Putfield => {
                    let cp_index = read_u2_be(code, bci + 1);
                    self.expect_tag(bci, cp_index, &[tag::FIELDREF], "field reference")?;
                    let index = self.member_cache_index(cp_index)?;
                    write_u2_native(code, bci + 1, index);
                }
                Bytecode::Invokevirtual | Bytecode::Invokespecial | Bytecode::Invokestatic => {
                    let cp_index = read_u2_be(code, bci + 1);
                    self.expect_tag(
                        bci,
                        cp_index,
                        &[tag::METHODREF, tag::INTERFACE_METHODREF],
                        "method reference",
                    )?;
                    let index = if bc == Bytecode::Invokevirtual && self.cp.is_signature_polymorphic(cp_index) {
                        code[bci] = Bytecode::Invokehandle as u8;
                        self.call_site_cache_index(cp_index)?
                    } else {
                        self.member_cache_index(cp_index)?
                    };
                    write_u2_native(code, bci + 1, index);
                }
                Bytecode::Invokeinterface => {
                    let cp_index = read_u2_be(code, bci + 1);
                    self.expect_tag(bci, cp_index, &[tag::INTERFACE_METHODREF], "interface method reference")?;
                    let index = self.member_cache_index(cp_index)?;
                    write_u2_native(code, bci + 1, index);
                }
                Bytecode::Invokedynamic => {
                    let cp_index = read_u2_be(code, bci + 1);
                    self.expect_tag(bci, cp_index, &[tag::INVOKE_DYNAMIC], "invokedynamic call site")?;
                    let index = self.call_site_cache_index(cp_index)?;
                    write_u2_native(code, bci + 1, index);
                }
                Bytecode::Ldc | Bytecode::LdcW => {
                    let wide = bc == Bytecode::LdcW;
                    let cp_index = if wide { read_u2_be(code, bci + 1) } else { code[bci + 1] as u16 };
                    let t = self.expect_tag(
                        bci,
                        cp_index,
                        &[tag::INTEGER, tag::FLOAT, tag::STRING, tag::CLASS, tag::UNRESOLVED_CLASS],
                        "loadable constant",
                    )?;
                    if t == tag::STRING {
                        let index = self.string_reference_index(cp_index)?;
                        if wide {
                            code[bci] = Bytecode::FastAldcW as u8;
                            write_u2_native(code, bci + 1, index);
                        } else if let Ok(narrow) = u8::try_from(index) {
                            code[bci] = Bytecode::FastAldc as u8;
                            code[bci + 1] = narrow;
                        }
                    }
                }
                Bytecode::Ldc2W => {
                    let cp_index = read_u2_be(code, bci + 1);
                    self.expect_tag(bci, cp_index, &[tag::LONG, tag::DOUBLE], "long or double constant")?;
                }
                Bytecode::Lookupswitch => {
                    let npairs_at = ((bci + 4) & !3) + 4;
                    let npairs = i32::from_be_bytes([
                        code[npairs_at],
                        code[npairs_at + 1],
                        code[npairs_at + 2],
                        code[npairs_at + 3],
                    ]);
                    code[bci] = if npairs as u32 >= self.binary_switch_threshold {
                        Bytecode::FastBinaryswitch as u8
                    } else {
                        Bytecode::FastLinearswitch as u8
                    };
                }
                Bytecode::Return if is_object_init => {
                    code[bci] = Bytecode::ReturnRegisterFinalizer as u8;
                }
                _ => {}
            }
            bci += len;
        }
        Ok(())
    }

    pub fn finish(self) -> RewriteResult {
        self.result
    }
}
