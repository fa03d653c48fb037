//! Interpreter frame accessor.
//!
//! A [`Frame`] is a view of one activation on a simulated stack. The frame
//! is identified by its `fp`; the return address and the caller's `fp` sit
//! just below it, and the `ijava_state` block starts `HEADER_SIZE` bytes
//! below `fp`:
//!
//! ```text
//!   fp -  8   return address
//!   fp - 16   caller fp (link)
//!   fp - 24   result_tmp      \
//!     ...                      | ijava_state
//!   fp - 112  method          /
//!             monitor block (grows down)
//!             expression stack (grows down)
//!   sp
//! ```

use parking_lot::RwLock;

use super::layout::{const_method, frame, method};

/// Word-granular access to the memory a frame lives in.
pub trait StackMemory {
    fn load_word(&self, addr: u64) -> u64;
    fn store_word(&self, addr: u64, value: u64);
}

/// Answers whether a pc belongs to a deoptimized compiled method.
pub trait CodeBlobLookup {
    /// The original pc to report instead of `pc`, if `pc` lies in a
    /// deoptimized blob.
    fn deopt_original_pc(&self, pc: u64) -> Option<u64>;
}

/// Lookup used when no compiled code exists.
pub struct NoCompiledCode;

impl CodeBlobLookup for NoCompiledCode {
    fn deopt_original_pc(&self, _pc: u64) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeoptBlob {
    start: u64,
    end: u64,
    original_pc: u64,
}

/// Registry of deoptimized code ranges.
#[derive(Default)]
pub struct DeoptRegistry {
    blobs: RwLock<Vec<DeoptBlob>>,
}

impl DeoptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `[start, end)` as deoptimized; frames returning into it report
    /// `original_pc`.
    pub fn register(&self, start: u64, end: u64, original_pc: u64) {
        self.blobs.write().push(DeoptBlob { start, end, original_pc });
    }
}

impl CodeBlobLookup for DeoptRegistry {
    fn deopt_original_pc(&self, pc: u64) -> Option<u64> {
        self.blobs
            .read()
            .iter()
            .find(|blob| (blob.start..blob.end).contains(&pc))
            .map(|blob| blob.original_pc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeoptState {
    NotDeoptimized,
    IsDeoptimized,
}

/// One interpreter activation.
pub struct Frame<'m, M: StackMemory> {
    mem: &'m M,
    sp: u64,
    fp: u64,
    pc: u64,
    deopt_state: DeoptState,
}

impl<'m, M: StackMemory> Frame<'m, M> {
    /// Build a frame from its `sp`, `fp` and the pc it is executing (or will
    /// return to). A pc inside a deoptimized blob is replaced by the
    /// original pc.
    pub fn new(mem: &'m M, sp: u64, fp: u64, pc: u64, blobs: &dyn CodeBlobLookup) -> Self {
        debug_assert!(pc != 0, "frame needs a pc");
        let (pc, deopt_state) = match blobs.deopt_original_pc(pc) {
            Some(original) => (original, DeoptState::IsDeoptimized),
            None => (pc, DeoptState::NotDeoptimized),
        };
        Self { mem, sp, fp, pc, deopt_state }
    }

    pub fn sp(&self) -> u64 {
        self.sp
    }

    pub fn fp(&self) -> u64 {
        self.fp
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn is_deoptimized(&self) -> bool {
        self.deopt_state == DeoptState::IsDeoptimized
    }

    /// Unique, ordered identity of the frame.
    pub fn id(&self) -> u64 {
        self.fp
    }

    /// Whether this frame is older than the frame identified by `id`.
    /// The stack grows down, so older frames have larger ids.
    pub fn is_older(&self, id: u64) -> bool {
        debug_assert!(self.id() != 0 && id != 0, "null frame id");
        self.id() > id
    }

    pub fn frame_size(&self) -> u64 {
        self.fp - self.sp
    }

    pub fn sender_pc(&self) -> u64 {
        self.mem.load_word(self.at(frame::RETURN_ADDRESS))
    }

    pub fn sender_sp(&self) -> u64 {
        self.mem.load_word(self.slot(frame::SENDER_SP))
    }

    pub fn link(&self) -> u64 {
        self.mem.load_word(self.at(frame::LINK))
    }

    pub fn real_fp(&self) -> u64 {
        self.fp
    }

    /// The caller's frame.
    pub fn sender(&self, blobs: &dyn CodeBlobLookup) -> Frame<'m, M> {
        Frame::new(self.mem, self.sender_sp(), self.link(), self.sender_pc(), blobs)
    }

    fn at(&self, offset: i32) -> u64 {
        self.fp.wrapping_add_signed(offset as i64)
    }

    fn slot(&self, field: i32) -> u64 {
        self.at(frame::ijava(field))
    }

    /// Base of the `ijava_state` block.
    pub fn ijava_state(&self) -> u64 {
        self.at(-frame::HEADER_SIZE)
    }

    // ==================== Interpreter slots ====================

    pub fn method(&self) -> u64 {
        self.mem.load_word(self.slot(frame::METHOD))
    }

    pub fn set_method(&self, method: u64) {
        self.mem.store_word(self.slot(frame::METHOD), method);
    }

    pub fn mirror(&self) -> u64 {
        self.mem.load_word(self.slot(frame::MIRROR))
    }

    pub fn set_mirror(&self, mirror: u64) {
        self.mem.store_word(self.slot(frame::MIRROR), mirror);
    }

    pub fn locals(&self) -> u64 {
        self.mem.load_word(self.slot(frame::LOCALS))
    }

    pub fn set_locals(&self, locals: u64) {
        self.mem.store_word(self.slot(frame::LOCALS), locals);
    }

    /// Address of local `index`.
    pub fn local_at(&self, index: u32) -> u64 {
        self.locals() - 8 * index as u64
    }

    pub fn bcp(&self) -> u64 {
        self.mem.load_word(self.slot(frame::BCP))
    }

    pub fn set_bcp(&self, bcp: u64) {
        self.mem.store_word(self.slot(frame::BCP), bcp);
    }

    /// Bytecode index of the saved bcp.
    pub fn bci(&self) -> u64 {
        let const_method = self.mem.load_word(self.method() + method::CONST_METHOD as u64);
        self.bcp() - (const_method + const_method::CODE as u64)
    }

    pub fn mdx(&self) -> u64 {
        self.mem.load_word(self.slot(frame::MDX))
    }

    pub fn set_mdx(&self, mdx: u64) {
        self.mem.store_word(self.slot(frame::MDX), mdx);
    }

    pub fn cpcache(&self) -> u64 {
        self.mem.load_word(self.slot(frame::CPOOL_CACHE))
    }

    pub fn set_cpcache(&self, cache: u64) {
        self.mem.store_word(self.slot(frame::CPOOL_CACHE), cache);
    }

    pub fn temp_oop(&self) -> u64 {
        self.mem.load_word(self.slot(frame::OOP_TMP))
    }

    pub fn set_temp_oop(&self, oop: u64) {
        self.mem.store_word(self.slot(frame::OOP_TMP), oop);
    }

    pub fn esp(&self) -> u64 {
        self.mem.load_word(self.slot(frame::ESP))
    }

    pub fn set_esp(&self, esp: u64) {
        self.mem.store_word(self.slot(frame::ESP), esp);
    }

    pub fn top_frame_sp(&self) -> u64 {
        self.mem.load_word(self.slot(frame::TOP_FRAME_SP))
    }

    pub fn set_top_frame_sp(&self, sp: u64) {
        self.mem.store_word(self.slot(frame::TOP_FRAME_SP), sp);
    }

    pub fn set_sender_sp(&self, sp: u64) {
        self.mem.store_word(self.slot(frame::SENDER_SP), sp);
    }

    // ==================== Monitors and expression stack ====================

    /// The most recently pushed monitor starts here.
    pub fn monitor_end(&self) -> u64 {
        self.mem.load_word(self.slot(frame::MONITORS))
    }

    pub fn set_monitor_end(&self, end: u64) {
        self.mem.store_word(self.slot(frame::MONITORS), end);
    }

    /// The oldest monitor ends here.
    pub fn monitor_begin(&self) -> u64 {
        self.ijava_state()
    }

    /// Monitor entry addresses, newest first.
    pub fn monitors(&self) -> impl Iterator<Item = u64> + '_ {
        let begin = self.monitor_begin();
        let step = frame::MONITOR_SIZE as usize;
        (self.monitor_end()..begin).step_by(step)
    }

    /// Object owned by the monitor at `entry` (zero when the slot is free).
    pub fn monitor_obj(&self, entry: u64) -> u64 {
        self.mem.load_word(entry + frame::MONITOR_OBJ as u64)
    }

    pub fn monitor_size_in_bytes() -> u64 {
        frame::MONITOR_SIZE as u64
    }

    /// First expression stack slot.
    pub fn expression_stack(&self) -> u64 {
        self.monitor_end() - 8
    }

    /// Address of the top of the expression stack.
    pub fn tos_address(&self) -> u64 {
        self.esp() + 8
    }

    pub fn tos_at(&self, offset: u32) -> u64 {
        self.tos_address() + 8 * offset as u64
    }

    /// Number of words on the expression stack.
    pub fn expression_stack_depth(&self) -> u64 {
        (self.expression_stack() - self.esp()) / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapMemory(RefCell<HashMap<u64, u64>>);

    impl StackMemory for MapMemory {
        fn load_word(&self, addr: u64) -> u64 {
            self.0.borrow().get(&addr).copied().unwrap_or(0)
        }

        fn store_word(&self, addr: u64, value: u64) {
            self.0.borrow_mut().insert(addr, value);
        }
    }

    const FP: u64 = 0x1000;
    const SP: u64 = 0xF00;

    #[test]
    fn test_identity_and_ordering() {
        let mem = MapMemory::default();
        let frame = Frame::new(&mem, SP, FP, 0x4000, &NoCompiledCode);

        assert_eq!(frame.id(), FP);
        assert!(frame.is_older(0x800));
        assert!(!frame.is_older(FP));
        assert_eq!(frame.frame_size(), 0x100);
        assert!(!frame.is_deoptimized());
    }

    #[test]
    fn test_sender_fields() {
        let mem = MapMemory::default();
        mem.store_word(FP - 8, 0x5000);
        mem.store_word(FP - 16, 0x2000);
        let frame = Frame::new(&mem, SP, FP, 0x4000, &NoCompiledCode);
        frame.set_sender_sp(0x1800);

        assert_eq!(frame.sender_pc(), 0x5000);
        assert_eq!(frame.link(), 0x2000);
        assert_eq!(frame.sender_sp(), 0x1800);

        let sender = frame.sender(&NoCompiledCode);
        assert_eq!(sender.fp(), 0x2000);
        assert_eq!(sender.sp(), 0x1800);
        assert_eq!(sender.pc(), 0x5000);
    }

    #[test]
    fn test_slots_are_offsets_from_fp() {
        let mem = MapMemory::default();
        let frame = Frame::new(&mem, SP, FP, 0x4000, &NoCompiledCode);
        frame.set_locals(0x1200);
        frame.set_bcp(0x9000);
        frame.set_esp(FP - 112 - 8 - 16);
        frame.set_monitor_end(FP - 112);

        assert_eq!(mem.load_word(FP - 112 + 16), 0x1200);
        assert_eq!(mem.load_word(FP - 112 + 40), 0x9000);
        assert_eq!(frame.local_at(2), 0x1200 - 16);
        assert_eq!(frame.expression_stack(), FP - 120);
        assert_eq!(frame.tos_address(), FP - 128);
        assert_eq!(frame.expression_stack_depth(), 2);
        assert_eq!(frame.monitors().count(), 0);
    }

    #[test]
    fn test_monitor_iteration_is_newest_first() {
        let mem = MapMemory::default();
        let frame = Frame::new(&mem, SP, FP, 0x4000, &NoCompiledCode);
        let begin = frame.monitor_begin();
        frame.set_monitor_end(begin - 32);

        let entries: Vec<u64> = frame.monitors().collect();
        assert_eq!(entries, vec![begin - 32, begin - 16]);
    }

    #[test]
    fn test_deoptimized_pc_is_rewritten() {
        let mem = MapMemory::default();
        let registry = DeoptRegistry::new();
        registry.register(0x7000, 0x7100, 0x4444);

        let frame = Frame::new(&mem, SP, FP, 0x7010, &registry);
        assert!(frame.is_deoptimized());
        assert_eq!(frame.pc(), 0x4444);

        let other = Frame::new(&mem, SP, FP, 0x7100, &registry);
        assert!(!other.is_deoptimized());
        assert_eq!(other.pc(), 0x7100);
    }
}
