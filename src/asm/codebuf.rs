//! Code buffer for building interpreter code.
//!
//! The buffer collects RISC-V machine code for a fixed load address and
//! records forward references to labels, which are patched once every label
//! has been bound.

use thiserror::Error;

/// Errors raised while resolving code buffer references.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("label {0} referenced but never bound")]
    UnboundLabel(usize),
    #[error("branch at offset {offset:#x} cannot reach label {label} ({distance} bytes)")]
    BranchOutOfRange {
        offset: usize,
        label: usize,
        distance: i64,
    },
    #[error("immediate {value} does not fit in {bits} bits")]
    ImmediateOutOfRange { value: i64, bits: u32 },
}

/// A position in the code that can be referenced before it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl Label {
    pub fn id(self) -> usize {
        self.0
    }
}

/// Kind of reference to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// 13-bit pc-relative offset of a conditional branch (B-type)
    Branch,
    /// 21-bit pc-relative offset of `jal` (J-type)
    Jump,
    /// 64-bit absolute address stored as data
    Absolute64,
}

/// A buffer for building machine code.
pub struct CodeBuffer {
    /// Address the first byte will live at
    base: u64,
    /// The code bytes
    code: Vec<u8>,
    /// Bound label offsets, indexed by label id
    labels: Vec<Option<usize>>,
    /// Pending references (offset, label, kind)
    forward_refs: Vec<(usize, Label, ReferenceKind)>,
}

impl CodeBuffer {
    /// Create a new empty code buffer that will be placed at `base`.
    pub fn new(base: u64) -> Self {
        Self {
            base,
            code: Vec::new(),
            labels: Vec::new(),
            forward_refs: Vec::new(),
        }
    }

    /// Create a new code buffer with pre-allocated capacity.
    pub fn with_capacity(base: u64, capacity: usize) -> Self {
        Self {
            base,
            code: Vec::with_capacity(capacity),
            labels: Vec::new(),
            forward_refs: Vec::new(),
        }
    }

    /// Load address of offset 0.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Get the current size of the code.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Get the current offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Absolute address of the next byte to be emitted.
    pub fn pc(&self) -> u64 {
        self.base + self.code.len() as u64
    }

    /// Absolute address of `offset`.
    pub fn address_of(&self, offset: usize) -> u64 {
        self.base + offset as u64
    }

    /// Emit a single byte.
    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Emit a 16-bit value (little-endian).
    pub fn emit_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Read back a 32-bit word.
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.code[offset],
            self.code[offset + 1],
            self.code[offset + 2],
            self.code[offset + 3],
        ])
    }

    /// Overwrite a 32-bit word.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.code[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Create a new, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label at the current position.
    pub fn bind(&mut self, label: Label) {
        debug_assert!(self.labels[label.0].is_none(), "label bound twice");
        self.labels[label.0] = Some(self.code.len());
    }

    /// Get the offset of a label (if bound).
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0).copied().flatten()
    }

    /// Record a reference to `label` at the current offset. The caller emits
    /// the instruction (or data word) right after this call.
    pub fn emit_forward_ref(&mut self, label: Label, kind: ReferenceKind) {
        self.forward_refs.push((self.code.len(), label, kind));
    }

    /// Patch all forward references.
    /// Returns an error if any label is unbound or out of reach.
    pub fn patch_forward_refs(&mut self) -> Result<(), AsmError> {
        let refs = std::mem::take(&mut self.forward_refs);
        for (offset, label, kind) in refs {
            let target = self.labels[label.0].ok_or(AsmError::UnboundLabel(label.0))?;
            let distance = target as i64 - offset as i64;
            match kind {
                ReferenceKind::Branch => {
                    if !(-(1 << 12)..(1 << 12)).contains(&distance) {
                        return Err(AsmError::BranchOutOfRange {
                            offset,
                            label: label.0,
                            distance,
                        });
                    }
                    let inst = self.read_u32(offset) & 0x01FF_F07F;
                    self.patch_u32(offset, inst | encode_b_offset(distance as i32));
                }
                ReferenceKind::Jump => {
                    if !(-(1 << 20)..(1 << 20)).contains(&distance) {
                        return Err(AsmError::BranchOutOfRange {
                            offset,
                            label: label.0,
                            distance,
                        });
                    }
                    let inst = self.read_u32(offset) & 0x0000_0FFF;
                    self.patch_u32(offset, inst | encode_j_offset(distance as i32));
                }
                ReferenceKind::Absolute64 => {
                    let addr = self.base + target as u64;
                    self.code[offset..offset + 8].copy_from_slice(&addr.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    /// Get the code bytes (for inspection).
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Get mutable access to the code bytes (for patching).
    pub fn code_mut(&mut self) -> &mut [u8] {
        &mut self.code
    }

    /// Consume the buffer and return the raw code bytes.
    /// Note: This does not patch forward references - use patch_forward_refs first.
    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    /// Align the code to the given boundary, padding with `nop`s.
    pub fn align(&mut self, alignment: usize) {
        debug_assert!(alignment.is_power_of_two() && alignment >= 4);
        while self.code.len() % alignment != 0 {
            self.emit_u32(super::riscv::NOP);
        }
    }
}

/// Scatter a branch offset into the B-type immediate fields.
pub fn encode_b_offset(offset: i32) -> u32 {
    let imm = offset as u32;
    ((imm >> 12) & 1) << 31
        | ((imm >> 5) & 0x3F) << 25
        | ((imm >> 1) & 0xF) << 8
        | ((imm >> 11) & 1) << 7
}

/// Scatter a jump offset into the J-type immediate fields.
pub fn encode_j_offset(offset: i32) -> u32 {
    let imm = offset as u32;
    ((imm >> 20) & 1) << 31
        | ((imm >> 1) & 0x3FF) << 21
        | ((imm >> 11) & 1) << 20
        | ((imm >> 12) & 0xFF) << 12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_bytes() {
        let mut buf = CodeBuffer::new(0x1000);
        buf.emit_u8(0x90);
        buf.emit_u16(0x1234);
        buf.emit_u32(0xDEADBEEF);

        assert_eq!(buf.len(), 7);
        assert_eq!(buf.code(), &[0x90, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(buf.pc(), 0x1007);
    }

    #[test]
    fn test_labels() {
        let mut buf = CodeBuffer::new(0);
        let label = buf.new_label();
        buf.emit_u32(0x13);
        buf.bind(label);
        buf.emit_u32(0x13);

        assert_eq!(buf.label_offset(label), Some(4));
    }

    #[test]
    fn test_alignment() {
        let mut buf = CodeBuffer::new(0);
        buf.emit_u32(0x13);
        buf.align(16);

        assert_eq!(buf.len(), 16);
        assert_eq!(buf.read_u32(12), 0x13);
    }

    #[test]
    fn test_unbound_label_is_reported() {
        let mut buf = CodeBuffer::new(0);
        let label = buf.new_label();
        buf.emit_forward_ref(label, ReferenceKind::Jump);
        buf.emit_u32(0x6F);

        assert_eq!(buf.patch_forward_refs(), Err(AsmError::UnboundLabel(0)));
    }

    #[test]
    fn test_absolute_reference() {
        let mut buf = CodeBuffer::new(0x4000);
        let label = buf.new_label();
        buf.emit_forward_ref(label, ReferenceKind::Absolute64);
        buf.emit_u64(0);
        buf.bind(label);
        buf.patch_forward_refs().unwrap();

        assert_eq!(&buf.code()[..8], &0x4008u64.to_le_bytes());
    }
}
