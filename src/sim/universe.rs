//! Class metadata, the Java heap and the Java thread, laid out in simulated
//! memory where the generated code reads them.
//!
//! Linking a program assembles every class, lays out its fields, builds
//! the vtable and itable, rewrites the bytecodes and writes the constant
//! pool, its cache and the resolved references. Mirrors (`java/lang/Class`
//! instances holding the statics) live in the heap.

use std::collections::HashMap;
use std::sync::Arc;

use super::machine::MachineError;
use super::memory::{Memory, MemoryError};
use crate::classfile::manifest::CallSiteDef;
use crate::classfile::{
    ClassFile, Constant, ConstantPool, FieldDecl, MethodDecl, MethodDescriptor, OBJECT_CLASS, Program, ProgramError,
};
use crate::config::InterpreterConfig;
use crate::interp::cp_cache::CacheEntryRef;
use crate::interp::rewriter::{CacheSlot, ReferenceSlot};
use crate::interp::{Interpreter, Rewriter};
use crate::asm::BarrierSetKind;
use crate::asm::barrier::CardTableBarrierSet;
use crate::runtime::CompressedOops;
use crate::runtime::layout::{
    AccessFlags, BasicType, CARD_SHIFT, CARD_TABLE_BASE, CLEAN_CARD, DIRTY_CARD, HEAP_SIZE, InitState, META_BASE,
    META_SIZE, PAGE_SIZE, STACK_SIZE, STACK_TOP, THREAD_BASE, THREAD_SIZE, align_up, const_method, constant_pool,
    cp_cache, klass, method, oop, thread,
};

pub const CLASS_CLASS: &str = "java/lang/Class";
pub const STRING_CLASS: &str = "java/lang/String";
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";
pub const OUT_OF_MEMORY_ERROR: &str = "java/lang/OutOfMemoryError";

const TLAB_SIZE: u64 = 64 << 10;
/// Fresh TLABs are filled with this unless `zero_tlab` is set.
pub const TLAB_JUNK: u8 = 0xBA;

pub type KlassId = usize;
pub type MethodId = usize;

/// A bump pointer over one region.
#[derive(Debug, Clone, Copy)]
struct Bump {
    start: u64,
    top: u64,
    end: u64,
}

impl Bump {
    fn new(base: u64, size: u64) -> Self {
        Self {
            start: base,
            top: base,
            end: base + size,
        }
    }

    fn allocate(&mut self, size: u64, align: u64) -> Option<u64> {
        let start = align_up(self.top, align);
        let end = start.checked_add(size)?;
        if end > self.end {
            return None;
        }
        self.top = end;
        Some(start)
    }

    fn used(&self) -> u64 {
        self.top - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlassKind {
    Instance,
    ObjArray { element: KlassId },
    TypeArray(BasicType),
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub ty: BasicType,
    pub flags: AccessFlags,
    /// From the object start, or from the mirror start for statics.
    pub offset: u32,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }
}

/// Host-side view of one klass.
#[derive(Debug)]
pub struct KlassInfo {
    pub name: String,
    pub addr: u64,
    pub kind: KlassKind,
    pub flags: AccessFlags,
    pub super_klass: Option<KlassId>,
    /// Every interface implemented, directly or through a super.
    pub interfaces: Vec<KlassId>,
    /// Every proper supertype.
    pub supertypes: Vec<KlassId>,
    pub depth: usize,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodId>,
    pub vtable: Vec<MethodId>,
    /// Non-static methods an interface dispatches through its itable.
    pub itable_methods: Vec<MethodId>,
    pub instance_size: u32,
    pub mirror_size: u32,
    pub mirror: u64,
    pub constants: u64,
    pub cache: u64,
    pub pool: ConstantPool,
    pub cache_slots: Vec<CacheSlot>,
    pub references: Vec<ReferenceSlot>,
    pub array_klass: Option<KlassId>,
}

impl KlassInfo {
    pub fn is_interface(&self) -> bool {
        self.flags.contains(AccessFlags::INTERFACE)
    }

    pub fn is_array(&self) -> bool {
        !matches!(self.kind, KlassKind::Instance)
    }
}

/// Host-side view of one method.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub signature: MethodDescriptor,
    pub flags: AccessFlags,
    pub holder: KlassId,
    pub addr: u64,
    pub const_method: u64,
    pub code_len: u16,
    pub max_locals: u16,
    pub max_stack: u16,
    pub size_of_parameters: u16,
    pub vtable_index: i32,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_private(&self) -> bool {
        self.flags.contains(AccessFlags::PRIVATE)
    }

    /// Address of bytecode 0.
    pub fn code(&self) -> u64 {
        self.const_method + const_method::CODE as u64
    }

    fn same_signature(&self, other: &MethodInfo) -> bool {
        self.name == other.name && self.descriptor == other.descriptor
    }
}

struct LinkContext<'a> {
    interp: &'a Interpreter,
    binary_switch_threshold: u32,
}

pub struct Universe {
    mem: Arc<Memory>,
    compressed_oops: Option<CompressedOops>,
    card_table: Option<u64>,
    use_tlab: bool,
    zero_tlab: bool,
    meta: Bump,
    heap: Bump,
    thread: u64,
    klasses: Vec<KlassInfo>,
    by_name: HashMap<String, KlassId>,
    by_addr: HashMap<u64, KlassId>,
    methods: Vec<MethodInfo>,
    method_by_addr: HashMap<u64, MethodId>,
    symbols: HashMap<String, u64>,
    strings: HashMap<String, u64>,
    callsites: Vec<CallSiteDef>,
    out_of_memory: u64,
}

fn meta_full() -> MachineError {
    MachineError::Program(ProgramError::MetaspaceFull)
}

fn same_signature(a: &MethodInfo, name: &str, descriptor: &str) -> bool {
    a.name == name && a.descriptor == descriptor
}

/// Lays out `decls` from `start`, largest first. Returns the end offset.
fn place_fields<'a>(
    decls: impl Iterator<Item = &'a FieldDecl>,
    start: u32,
    compressed: bool,
    out: &mut Vec<FieldInfo>,
) -> u32 {
    let mut sorted: Vec<&FieldDecl> = decls.collect();
    sorted.sort_by_key(|f| std::cmp::Reverse(f.ty.heap_size(compressed)));
    let mut offset = start;
    for f in sorted {
        let size = f.ty.heap_size(compressed);
        offset = align_up(offset as u64, size as u64) as u32;
        out.push(FieldInfo {
            name: f.name.clone(),
            descriptor: f.descriptor.clone(),
            ty: f.ty,
            flags: f.flags,
            offset,
        });
        offset += size;
    }
    offset
}

impl Universe {
    /// Map the data regions and link `program` together with the
    /// bootstrap classes.
    pub fn new(
        mem: Arc<Memory>,
        config: &InterpreterConfig,
        interp: &Interpreter,
        program: &Program,
    ) -> Result<Self, MachineError> {
        let (compressed_oops, heap_base) = config.heap_layout();
        let cards = HEAP_SIZE >> CARD_SHIFT;
        mem.map("meta", META_BASE, META_SIZE)?;
        mem.map("thread", THREAD_BASE, THREAD_SIZE)?;
        mem.map("card table", CARD_TABLE_BASE, align_up(cards, PAGE_SIZE))?;
        mem.fill(CARD_TABLE_BASE, cards, CLEAN_CARD)?;
        mem.map("heap", heap_base, HEAP_SIZE)?;
        mem.map("stack", STACK_TOP - STACK_SIZE, STACK_SIZE)?;

        let card_table = match config.barrier_set {
            BarrierSetKind::CardTable => Some(CardTableBarrierSet::for_heap(heap_base).byte_map_base()),
            BarrierSetKind::None => None,
        };

        let mut universe = Universe {
            mem,
            compressed_oops,
            card_table,
            use_tlab: config.use_tlab,
            zero_tlab: config.zero_tlab,
            meta: Bump::new(META_BASE, META_SIZE),
            heap: Bump::new(heap_base, HEAP_SIZE),
            thread: THREAD_BASE,
            klasses: Vec::new(),
            by_name: HashMap::new(),
            by_addr: HashMap::new(),
            methods: Vec::new(),
            method_by_addr: HashMap::new(),
            symbols: HashMap::new(),
            strings: HashMap::new(),
            callsites: Vec::new(),
            out_of_memory: 0,
        };
        universe.mem.store_u64(THREAD_BASE + thread::THREAD_ID as u64, 1)?;

        let bootstrap = Program::bootstrap()?;
        let bootstrap_count = bootstrap.class.len();
        let mut all = bootstrap;
        all.merge(program.clone());

        let mut order = Vec::with_capacity(all.class.len());
        let mut files = HashMap::new();
        for def in &all.class {
            let cf = ClassFile::assemble(def)?;
            if files.insert(def.name.clone(), cf).is_some() {
                return Err(ProgramError::DuplicateClass(def.name.clone()).into());
            }
            order.push(def.name.clone());
        }
        for site in &all.callsite {
            crate::classfile::MethodRef::parse(&site.target)?;
        }
        universe.callsites = all.callsite;

        let ctx = LinkContext {
            interp,
            binary_switch_threshold: config.binary_switch_threshold,
        };
        let mut linking = Vec::new();
        for name in &order {
            universe.link_class(name, name, &mut files, &mut linking, &ctx)?;
        }
        for ty in [
            BasicType::Boolean,
            BasicType::Char,
            BasicType::Float,
            BasicType::Double,
            BasicType::Byte,
            BasicType::Short,
            BasicType::Int,
            BasicType::Long,
        ] {
            universe.type_array_klass(ty)?;
        }
        for id in 0..universe.klasses.len() {
            universe.create_mirror(id)?;
        }

        // Bootstrap classes have no initializers.
        for name in order.iter().take(bootstrap_count) {
            if let Some(id) = universe.klass_id(name) {
                universe.set_init_state(id, InitState::FullyInitialized)?;
            }
        }

        let oom = universe.klass_id(OUT_OF_MEMORY_ERROR).ok_or_else(|| ProgramError::UnknownClass {
            name: OUT_OF_MEMORY_ERROR.to_string(),
            referenced_by: "bootstrap".to_string(),
        })?;
        universe.out_of_memory = universe.allocate_instance(oom)?.ok_or(MachineError::HeapExhausted)?;

        tracing::debug!(
            classes = universe.klasses.len(),
            methods = universe.methods.len(),
            metaspace = universe.meta.used(),
            "program linked"
        );
        Ok(universe)
    }

    // ==================== Accessors ====================

    pub fn mem(&self) -> &Memory {
        &self.mem
    }

    pub fn memory(&self) -> Arc<Memory> {
        Arc::clone(&self.mem)
    }

    pub fn thread(&self) -> u64 {
        self.thread
    }

    pub fn compressed_oops(&self) -> Option<CompressedOops> {
        self.compressed_oops
    }

    pub fn heap_used(&self) -> u64 {
        self.heap.used()
    }

    /// The preallocated `OutOfMemoryError`.
    pub fn out_of_memory(&self) -> u64 {
        self.out_of_memory
    }

    pub fn klasses(&self) -> &[KlassInfo] {
        &self.klasses
    }

    pub fn klass(&self, id: KlassId) -> &KlassInfo {
        &self.klasses[id]
    }

    pub fn klass_id(&self, name: &str) -> Option<KlassId> {
        self.by_name.get(name).copied()
    }

    pub fn klass_at(&self, addr: u64) -> Option<KlassId> {
        self.by_addr.get(&addr).copied()
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    pub fn method(&self, id: MethodId) -> &MethodInfo {
        &self.methods[id]
    }

    pub fn method_at(&self, addr: u64) -> Option<MethodId> {
        self.method_by_addr.get(&addr).copied()
    }

    /// `Class.name(descriptor)` of a method.
    pub fn method_name(&self, id: MethodId) -> String {
        let m = &self.methods[id];
        format!("{}.{}{}", self.klasses[m.holder].name, m.name, m.descriptor)
    }

    pub fn callsite(&self, class: &str, name: &str, descriptor: &str) -> Option<&CallSiteDef> {
        self.callsites
            .iter()
            .find(|s| s.class == class && s.name == name && s.descriptor == descriptor)
    }

    pub fn klass_of(&self, obj: u64) -> Result<KlassId, MachineError> {
        let addr = self.mem.load_u64(obj + oop::KLASS as u64)?;
        self.klass_at(addr).ok_or(MachineError::CorruptObject(obj))
    }

    pub fn init_state(&self, id: KlassId) -> Result<u32, MemoryError> {
        self.mem.load_u32(self.klasses[id].addr + klass::INIT_STATE as u64)
    }

    pub fn set_init_state(&self, id: KlassId, state: InitState) -> Result<(), MemoryError> {
        let k = self.klasses[id].addr;
        let init_thread = if state == InitState::BeingInitialized { self.thread } else { 0 };
        self.mem.store_u64(k + klass::INIT_THREAD as u64, init_thread)?;
        self.mem
            .store(k + klass::INIT_STATE as u64, 4, state as u64, std::sync::atomic::Ordering::Release)
    }

    pub fn is_subtype(&self, sub: KlassId, sup: KlassId) -> bool {
        sub == sup || self.klasses[sub].supertypes.contains(&sup)
    }

    // ==================== Lookup ====================

    /// Field `name` declared by `id`, its interfaces or its supers.
    pub fn find_field(&self, id: KlassId, name: &str, descriptor: &str) -> Option<(KlassId, &FieldInfo)> {
        let mut current = Some(id);
        while let Some(k) = current {
            let info = &self.klasses[k];
            if let Some(f) = info.fields.iter().find(|f| f.name == name && f.descriptor == descriptor) {
                return Some((k, f));
            }
            for &i in &info.interfaces {
                if let Some(f) = self.klasses[i]
                    .fields
                    .iter()
                    .find(|f| f.name == name && f.descriptor == descriptor)
                {
                    return Some((i, f));
                }
            }
            current = info.super_klass;
        }
        None
    }

    pub fn find_declared_method(&self, id: KlassId, name: &str, descriptor: &str) -> Option<MethodId> {
        self.klasses[id]
            .methods
            .iter()
            .copied()
            .find(|&m| same_signature(&self.methods[m], name, descriptor))
    }

    /// Method resolution for a class: the class and its supers, then the
    /// interfaces (non-abstract methods win).
    pub fn find_method(&self, id: KlassId, name: &str, descriptor: &str) -> Option<MethodId> {
        let mut current = Some(id);
        while let Some(k) = current {
            if let Some(m) = self.find_declared_method(k, name, descriptor) {
                return Some(m);
            }
            current = self.klasses[k].super_klass;
        }
        self.find_in_interfaces(id, name, descriptor)
    }

    /// Interface method resolution: the interface, its superinterfaces,
    /// then the public methods of `Object`.
    pub fn find_interface_method(&self, id: KlassId, name: &str, descriptor: &str) -> Option<MethodId> {
        if let Some(m) = self.find_declared_method(id, name, descriptor) {
            return Some(m);
        }
        if let Some(m) = self.find_in_interfaces(id, name, descriptor) {
            return Some(m);
        }
        let object = self.klass_id(OBJECT_CLASS)?;
        self.find_declared_method(object, name, descriptor)
            .filter(|&m| !self.methods[m].is_static() && self.methods[m].flags.contains(AccessFlags::PUBLIC))
    }

    fn find_in_interfaces(&self, id: KlassId, name: &str, descriptor: &str) -> Option<MethodId> {
        let candidates: Vec<MethodId> = self.klasses[id]
            .interfaces
            .iter()
            .filter_map(|&i| self.find_declared_method(i, name, descriptor))
            .filter(|&m| !self.methods[m].is_static())
            .collect();
        candidates
            .iter()
            .copied()
            .find(|&m| !self.methods[m].is_abstract())
            .or_else(|| candidates.first().copied())
    }

    /// Index of `name`/`descriptor` in the vtable of `id`.
    pub fn vtable_slot(&self, id: KlassId, name: &str, descriptor: &str) -> Option<usize> {
        self.klasses[id]
            .vtable
            .iter()
            .position(|&m| same_signature(&self.methods[m], name, descriptor))
    }

    /// Klass of a class name or an array descriptor such as `[I` or
    /// `[Ljava/lang/String;`. Array klasses are created on first use.
    pub fn klass_for_name(&mut self, name: &str) -> Result<Option<KlassId>, MachineError> {
        let Some(component) = name.strip_prefix('[') else {
            return Ok(self.klass_id(name));
        };
        let element = match component.as_bytes().first() {
            Some(b'L') => match component.strip_suffix(';') {
                Some(class) => self.klass_id(&class[1..]),
                None => None,
            },
            Some(b'[') => self.klass_for_name(component)?,
            Some(_) if component.len() == 1 => match BasicType::from_descriptor(component) {
                Some(ty) if !ty.is_reference() && ty != BasicType::Void => {
                    return self.type_array_klass(ty).map(Some);
                }
                _ => None,
            },
            _ => None,
        };
        element.map(|e| self.array_klass(e)).transpose()
    }

    // ==================== Memory helpers ====================

    fn meta_alloc(&mut self, size: u64) -> Result<u64, MachineError> {
        self.meta.allocate(size, 8).ok_or_else(meta_full)
    }

    /// A metadata array of words: `u32` length, then the elements.
    fn word_array(&mut self, values: &[u64]) -> Result<u64, MachineError> {
        let addr = self.meta_alloc(constant_pool::ARRAY_DATA as u64 + values.len() as u64 * 8)?;
        self.mem.store_u32(addr, values.len() as u32)?;
        for (i, v) in values.iter().enumerate() {
            self.mem.store_u64(addr + constant_pool::ARRAY_DATA as u64 + i as u64 * 8, *v)?;
        }
        Ok(addr)
    }

    fn symbol(&mut self, s: &str) -> Result<u64, MachineError> {
        if let Some(&addr) = self.symbols.get(s) {
            return Ok(addr);
        }
        let addr = self.meta_alloc(constant_pool::ARRAY_DATA as u64 + s.len() as u64 + 1)?;
        self.mem.store_u32(addr, s.len() as u32)?;
        self.mem.write_bytes(addr + constant_pool::ARRAY_DATA as u64, s.as_bytes())?;
        self.symbols.insert(s.to_string(), addr);
        Ok(addr)
    }

    /// Read a reference stored in the heap.
    pub fn load_oop(&self, addr: u64) -> Result<u64, MemoryError> {
        match self.compressed_oops {
            Some(oops) => Ok(oops.decode(self.mem.load_u32(addr)?)),
            None => self.mem.load_u64(addr),
        }
    }

    /// Store a reference into the heap, dirtying its card.
    pub fn store_oop(&self, addr: u64, value: u64) -> Result<(), MemoryError> {
        match self.compressed_oops {
            Some(oops) => self.mem.store_u32(addr, oops.encode(value))?,
            None => self.mem.store_u64(addr, value)?,
        }
        if let Some(byte_map_base) = self.card_table {
            self.mem.store_u8(byte_map_base.wrapping_add(addr >> CARD_SHIFT), DIRTY_CARD)?;
        }
        Ok(())
    }

    pub fn heap_oop_size(&self) -> u64 {
        if self.compressed_oops.is_some() { 4 } else { 8 }
    }

    // ==================== Allocation ====================

    fn tlab_allocate(&mut self, size: u64) -> Result<Option<u64>, MemoryError> {
        let t = self.thread;
        let top = self.mem.load_u64(t + thread::TLAB_TOP as u64)?;
        let end = self.mem.load_u64(t + thread::TLAB_END as u64)?;
        if top != 0 && top + size <= end {
            self.mem.store_u64(t + thread::TLAB_TOP as u64, top + size)?;
            return Ok(Some(top));
        }
        if size > TLAB_SIZE / 4 {
            return Ok(None);
        }
        let Some(start) = self.heap.allocate(TLAB_SIZE, 8) else {
            return Ok(None);
        };
        // Heap memory is handed out once, so a fresh TLAB is zero already.
        if !self.zero_tlab {
            self.mem.fill(start, TLAB_SIZE, TLAB_JUNK)?;
        }
        self.mem.store_u64(t + thread::TLAB_START as u64, start)?;
        self.mem.store_u64(t + thread::TLAB_TOP as u64, start + size)?;
        self.mem.store_u64(t + thread::TLAB_END as u64, start + TLAB_SIZE)?;
        tracing::trace!(start = format_args!("{:#x}", start), "tlab refilled");
        Ok(Some(start))
    }

    /// Zeroed storage with a header for `klass`; `None` when the heap is
    /// exhausted.
    fn allocate(&mut self, size: u64, klass_addr: u64) -> Result<Option<u64>, MemoryError> {
        let size = align_up(size, 8);
        let addr = if self.use_tlab {
            match self.tlab_allocate(size)? {
                Some(addr) => Some(addr),
                None => self.heap.allocate(size, 8),
            }
        } else {
            self.heap.allocate(size, 8)
        };
        let Some(addr) = addr else {
            return Ok(None);
        };
        self.mem.fill(addr, size, 0)?;
        self.mem.store_u64(addr + oop::MARK as u64, oop::PROTOTYPE_MARK)?;
        self.mem.store_u64(addr + oop::KLASS as u64, klass_addr)?;
        Ok(Some(addr))
    }

    pub fn allocate_instance(&mut self, id: KlassId) -> Result<Option<u64>, MachineError> {
        let (size, addr) = (self.klasses[id].instance_size, self.klasses[id].addr);
        Ok(self.allocate(size as u64, addr)?)
    }

    pub fn element_size(&self, id: KlassId) -> u64 {
        match self.klasses[id].kind {
            KlassKind::TypeArray(ty) => ty.heap_size(false) as u64,
            _ => self.heap_oop_size(),
        }
    }

    pub fn allocate_array(&mut self, id: KlassId, length: u32) -> Result<Option<u64>, MachineError> {
        let size = oop::ARRAY_BASE as u64 + length as u64 * self.element_size(id);
        let addr = self.klasses[id].addr;
        let Some(array) = self.allocate(size, addr)? else {
            return Ok(None);
        };
        self.mem.store_u32(array + oop::ARRAY_LENGTH as u64, length)?;
        Ok(Some(array))
    }

    pub fn array_length(&self, array: u64) -> Result<u32, MemoryError> {
        self.mem.load_u32(array + oop::ARRAY_LENGTH as u64)
    }

    // ==================== Strings ====================

    /// The interned `java/lang/String` for `s`.
    pub fn intern(&mut self, s: &str) -> Result<u64, MachineError> {
        if let Some(&oop) = self.strings.get(s) {
            return Ok(oop);
        }
        let oop = self.new_string(s)?;
        self.strings.insert(s.to_string(), oop);
        Ok(oop)
    }

    pub fn new_string(&mut self, s: &str) -> Result<u64, MachineError> {
        let chars: Vec<u16> = s.encode_utf16().collect();
        let char_array = self.type_array_klass(BasicType::Char)?;
        let value = self
            .allocate_array(char_array, chars.len() as u32)?
            .ok_or(MachineError::HeapExhausted)?;
        for (i, c) in chars.iter().enumerate() {
            self.mem.store_u16(value + oop::ARRAY_BASE as u64 + i as u64 * 2, *c)?;
        }
        let string = self.klass_id(STRING_CLASS).ok_or_else(|| missing(STRING_CLASS))?;
        let obj = self.allocate_instance(string)?.ok_or(MachineError::HeapExhausted)?;
        let offset = self.instance_field_offset(string, "value", "[C")?;
        self.store_oop(obj + offset, value)?;
        Ok(obj)
    }

    /// Contents of a `java/lang/String`; `None` for null.
    pub fn string_value(&self, obj: u64) -> Result<Option<String>, MachineError> {
        if obj == 0 {
            return Ok(None);
        }
        let string = self.klass_id(STRING_CLASS).ok_or_else(|| missing(STRING_CLASS))?;
        let offset = self.instance_field_offset(string, "value", "[C")?;
        let value = self.load_oop(obj + offset)?;
        if value == 0 {
            return Ok(Some(String::new()));
        }
        let len = self.array_length(value)?;
        let mut chars = Vec::with_capacity(len as usize);
        for i in 0..len as u64 {
            chars.push(self.mem.load_u16(value + oop::ARRAY_BASE as u64 + i * 2)?);
        }
        Ok(Some(String::from_utf16_lossy(&chars)))
    }

    pub fn instance_field_offset(&self, id: KlassId, name: &str, descriptor: &str) -> Result<u64, MachineError> {
        self.find_field(id, name, descriptor)
            .filter(|(_, f)| !f.is_static())
            .map(|(_, f)| f.offset as u64)
            .ok_or_else(|| MachineError::MissingField(format!("{}.{}", self.klasses[id].name, name)))
    }

    // ==================== Linking ====================

    fn link_class(
        &mut self,
        name: &str,
        referenced_by: &str,
        files: &mut HashMap<String, ClassFile>,
        linking: &mut Vec<String>,
        ctx: &LinkContext<'_>,
    ) -> Result<KlassId, MachineError> {
        if let Some(id) = self.klass_id(name) {
            return Ok(id);
        }
        if linking.iter().any(|n| n == name) {
            return Err(ProgramError::ClassCircularity(name.to_string()).into());
        }
        let Some(cf) = files.remove(name) else {
            return Err(ProgramError::UnknownClass {
                name: name.to_string(),
                referenced_by: referenced_by.to_string(),
            }
            .into());
        };
        linking.push(name.to_string());

        let super_klass = match &cf.super_name {
            Some(s) => Some(self.link_class(s, name, files, linking, ctx)?),
            None => None,
        };
        if let Some(s) = super_klass {
            let sup = &self.klasses[s];
            if sup.is_interface() || sup.flags.contains(AccessFlags::FINAL) {
                return Err(ProgramError::IncompatibleClassChange {
                    class: name.to_string(),
                    message: format!("cannot extend {}", sup.name),
                }
                .into());
            }
        }
        let mut direct = Vec::with_capacity(cf.interfaces.len());
        for i in &cf.interfaces {
            let id = self.link_class(i, name, files, linking, ctx)?;
            if !self.klasses[id].is_interface() {
                return Err(ProgramError::IncompatibleClassChange {
                    class: name.to_string(),
                    message: format!("{i} is not an interface"),
                }
                .into());
            }
            direct.push(id);
        }
        linking.pop();
        self.define_instance_klass(cf, super_klass, &direct, ctx)
    }

    fn define_instance_klass(
        &mut self,
        cf: ClassFile,
        super_klass: Option<KlassId>,
        direct: &[KlassId],
        ctx: &LinkContext<'_>,
    ) -> Result<KlassId, MachineError> {
        let ClassFile {
            name,
            mut flags,
            fields: field_decls,
            mut methods,
            pool,
            ..
        } = cf;
        let is_interface = flags.contains(AccessFlags::INTERFACE);
        let compressed = self.compressed_oops.is_some();

        // Interfaces, transitively, in declaration order.
        let mut interfaces: Vec<KlassId> = match super_klass {
            Some(s) if !is_interface => self.klasses[s].interfaces.clone(),
            _ => Vec::new(),
        };
        for &d in direct {
            for i in std::iter::once(d).chain(self.klasses[d].interfaces.iter().copied()) {
                if !interfaces.contains(&i) {
                    interfaces.push(i);
                }
            }
        }
        let mut supertypes = Vec::new();
        let mut current = super_klass;
        while let Some(s) = current {
            supertypes.push(s);
            current = self.klasses[s].super_klass;
        }
        supertypes.extend(interfaces.iter().copied());
        let depth = super_klass.map_or(0, |s| self.klasses[s].depth + 1);

        // Fields.
        let mut fields = Vec::with_capacity(field_decls.len());
        let instance_start = super_klass.map_or(oop::HEADER_SIZE as u32, |s| self.klasses[s].instance_size);
        let instance_end = place_fields(
            field_decls.iter().filter(|f| !f.is_static()),
            instance_start,
            compressed,
            &mut fields,
        );
        let statics_end = place_fields(
            field_decls.iter().filter(|f| f.is_static()),
            oop::MIRROR_STATICS as u32,
            compressed,
            &mut fields,
        );
        let instance_size = align_up(instance_end.max(oop::HEADER_SIZE as u32) as u64, 8) as u32;

        // Bytecodes are rewritten before they reach memory.
        let mut rewriter = Rewriter::new(&pool, ctx.binary_switch_threshold);
        for m in methods.iter_mut().filter(|m| !m.code.is_empty()) {
            let is_object_init = name == OBJECT_CLASS && m.name == "<init>";
            rewriter
                .rewrite_method(&mut m.code, is_object_init)
                .map_err(|source| ProgramError::Rewrite {
                    class: name.clone(),
                    source,
                })?;
        }
        let layout = rewriter.finish();

        let has_finalizer = name != OBJECT_CLASS
            && (methods.iter().any(|m| m.name == "finalize" && m.descriptor == "()V" && !m.is_static())
                || super_klass.is_some_and(|s| self.klasses[s].flags.contains(AccessFlags::HAS_FINALIZER)));
        if has_finalizer {
            flags |= AccessFlags::HAS_FINALIZER;
        }

        let id = self.klasses.len();
        let method_ids = self.create_methods(id, &methods)?;

        // vtable: the super's, overridden in place, then new methods, then
        // interface methods the class does not define.
        let mut itable_methods = Vec::new();
        let mut vtable = Vec::new();
        if is_interface {
            for &m in &method_ids {
                let info = &self.methods[m];
                if !info.is_static() && !info.is_private() && info.name != "<clinit>" {
                    self.methods[m].vtable_index = method::ITABLE_INDEX_MAX - itable_methods.len() as i32;
                    itable_methods.push(m);
                }
            }
        } else {
            vtable = super_klass.map_or_else(Vec::new, |s| self.klasses[s].vtable.clone());
            for &m in &method_ids {
                let info = &self.methods[m];
                if info.is_static() || info.is_private() || info.name.starts_with('<') {
                    continue;
                }
                let slot = match vtable.iter().position(|&v| self.methods[v].same_signature(info)) {
                    Some(slot) => {
                        vtable[slot] = m;
                        slot
                    }
                    None => {
                        vtable.push(m);
                        vtable.len() - 1
                    }
                };
                self.methods[m].vtable_index = slot as i32;
            }
            for &i in &interfaces {
                for &im in &self.klasses[i].itable_methods {
                    let info = &self.methods[im];
                    match vtable.iter().position(|&v| self.methods[v].same_signature(info)) {
                        None => vtable.push(im),
                        Some(slot) => {
                            let current = &self.methods[vtable[slot]];
                            // The class being linked is not in `klasses` yet and is never
                            // an interface.
                            let from_interface = current.holder != id && self.klasses[current.holder].is_interface();
                            if from_interface && current.is_abstract() && !info.is_abstract() {
                                vtable[slot] = im;
                            }
                        }
                    }
                }
            }
        }

        // itable: one block per interface, the implementation or zero.
        let mut itable = Vec::with_capacity(interfaces.len());
        if !is_interface {
            for &i in &interfaces {
                let block: Vec<u64> = self.klasses[i]
                    .itable_methods
                    .iter()
                    .map(|&im| {
                        let info = &self.methods[im];
                        vtable
                            .iter()
                            .map(|&v| &self.methods[v])
                            .find(|v| v.same_signature(info) && !v.is_abstract())
                            .map_or(0, |v| v.addr)
                    })
                    .collect();
                itable.push((self.klasses[i].addr, block));
            }
        }

        let vtable_bytes = vtable.len() as u64 * klass::VTABLE_ENTRY_SIZE as u64;
        let offsets_bytes = (itable.len() as u64 + 1) * klass::ITABLE_OFFSET_ENTRY_SIZE as u64;
        let blocks_bytes: u64 = itable.iter().map(|(_, b)| b.len() as u64 * 8).sum();
        let addr = self.meta_alloc(klass::VTABLE_START as u64 + vtable_bytes + offsets_bytes + blocks_bytes)?;

        let slow_path = is_interface || flags.contains(AccessFlags::ABSTRACT) || has_finalizer;
        let mut primary = Vec::new();
        if !is_interface {
            primary = supertypes
                .iter()
                .take_while(|&&s| !self.klasses[s].is_interface())
                .map(|&s| self.klasses[s].addr)
                .collect::<Vec<_>>();
            primary.reverse();
            primary.push(addr);
        } else if let Some(s) = super_klass {
            primary.push(self.klasses[s].addr);
        }
        let (super_check_offset, secondaries) = self.super_check_layout(&primary, is_interface, &interfaces);
        let secondary_supers = self.word_array(&secondaries)?;
        let name_symbol = self.symbol(&name)?;

        let m = &self.mem;
        let a = |off: i32| addr + off as u64;
        m.store_u32(a(klass::LAYOUT_HELPER), klass::instance_layout_helper(instance_size as i32, slow_path) as u32)?;
        m.store_u32(a(klass::INIT_STATE), InitState::Linked as u32)?;
        m.store_u32(a(klass::ACCESS_FLAGS), flags.bits())?;
        m.store_u32(a(klass::SUPER_CHECK_OFFSET), super_check_offset as u32)?;
        m.store_u64(a(klass::SECONDARY_SUPERS), secondary_supers)?;
        for (depth, s) in primary.iter().take(klass::PRIMARY_SUPER_LIMIT as usize).enumerate() {
            m.store_u64(a(klass::primary_super_offset(depth as i32)), *s)?;
        }
        m.store_u64(a(klass::SUPER), super_klass.map_or(0, |s| self.klasses[s].addr))?;
        m.store_u64(a(klass::NAME), name_symbol)?;
        m.store_u32(a(klass::VTABLE_LENGTH), vtable.len() as u32)?;
        m.store_u32(a(klass::ITABLE_LENGTH), ((offsets_bytes + blocks_bytes) / 8) as u32)?;
        m.store_u64(a(klass::PROTOTYPE_HEADER), oop::PROTOTYPE_MARK)?;
        for (i, &v) in vtable.iter().enumerate() {
            m.store_u64(a(klass::VTABLE_START) + i as u64 * 8, self.methods[v].addr)?;
        }
        let offsets = a(klass::VTABLE_START) + vtable_bytes;
        let mut block = offsets + offsets_bytes;
        for (i, (interface, methods)) in itable.iter().enumerate() {
            let entry = offsets + i as u64 * klass::ITABLE_OFFSET_ENTRY_SIZE as u64;
            m.store_u64(entry + klass::ITABLE_INTERFACE as u64, *interface)?;
            m.store_u64(entry + klass::ITABLE_OFFSET as u64, block - addr)?;
            for (j, method) in methods.iter().enumerate() {
                m.store_u64(block + j as u64 * 8, *method)?;
            }
            block += methods.len() as u64 * 8;
        }

        let (constants, cache) = self.write_constant_pool(addr, &pool, &layout.cache, layout.references.len())?;
        for &mid in &method_ids {
            self.write_method(mid, addr, constants, ctx.interp)?;
        }
        for (mid, decl) in method_ids.iter().zip(&methods) {
            let code = self.methods[*mid].code();
            self.mem.write_bytes(code, &decl.code)?;
        }

        self.by_name.insert(name.clone(), id);
        self.by_addr.insert(addr, id);
        self.klasses.push(KlassInfo {
            name,
            addr,
            kind: KlassKind::Instance,
            flags,
            super_klass,
            interfaces,
            supertypes,
            depth,
            fields,
            methods: method_ids,
            vtable,
            itable_methods,
            instance_size,
            mirror_size: align_up(statics_end as u64, 8) as u32,
            mirror: 0,
            constants,
            cache,
            pool,
            cache_slots: layout.cache,
            references: layout.references,
            array_klass: None,
        });
        if self.klass_id(CLASS_CLASS).is_some_and(|c| self.klasses[c].mirror != 0 || c == id) {
            self.create_mirror(id)?;
        }
        Ok(id)
    }

    /// Super check offset and secondary supers of a klass whose primary
    /// supers (root first, itself last) are `primary`.
    fn super_check_layout(&self, primary: &[u64], is_interface: bool, interfaces: &[KlassId]) -> (i32, Vec<u64>) {
        let limit = klass::PRIMARY_SUPER_LIMIT as usize;
        let mut secondaries: Vec<u64> = interfaces.iter().map(|&i| self.klasses[i].addr).collect();
        if primary.len() > limit {
            secondaries.extend(primary[limit..].iter().copied());
        }
        let offset = if is_interface || primary.len() > limit {
            klass::SECONDARY_SUPER_CACHE
        } else {
            klass::primary_super_offset(primary.len() as i32 - 1)
        };
        (offset, secondaries)
    }

    fn create_methods(&mut self, holder: KlassId, decls: &[MethodDecl]) -> Result<Vec<MethodId>, MachineError> {
        let mut ids = Vec::with_capacity(decls.len());
        for decl in decls {
            let addr = self.meta_alloc(method::SIZE as u64)?;
            let const_method = self.meta_alloc(const_method::CODE as u64 + decl.code.len() as u64)?;
            let id = self.methods.len();
            self.methods.push(MethodInfo {
                name: decl.name.clone(),
                descriptor: decl.descriptor.clone(),
                signature: decl.signature.clone(),
                flags: decl.flags,
                holder,
                addr,
                const_method,
                code_len: decl.code.len() as u16,
                max_locals: decl.max_locals,
                max_stack: decl.max_stack,
                size_of_parameters: decl.size_of_parameters(),
                vtable_index: method::NONVIRTUAL_VTABLE_INDEX,
            });
            self.method_by_addr.insert(addr, id);
            ids.push(id);
        }
        Ok(ids)
    }

    fn write_method(&mut self, id: MethodId, holder: u64, constants: u64, interp: &Interpreter) -> Result<(), MachineError> {
        let method_name = self.methods[id].name.clone();
        let name = self.symbol(&method_name)?;
        let info = &self.methods[id];
        let m = &self.mem;
        let cm = info.const_method;
        m.store_u64(cm + const_method::CONSTANTS as u64, constants)?;
        m.store_u16(cm + const_method::CODE_SIZE as u64, info.code_len)?;
        m.store_u16(cm + const_method::SIZE_OF_PARAMETERS as u64, info.size_of_parameters)?;
        m.store_u16(cm + const_method::MAX_LOCALS as u64, info.max_locals.max(info.size_of_parameters))?;
        m.store_u16(cm + const_method::MAX_STACK as u64, info.max_stack)?;

        let addr = info.addr;
        m.store_u64(addr + method::CONST_METHOD as u64, cm)?;
        m.store_u32(addr + method::ACCESS_FLAGS as u64, info.flags.bits())?;
        m.store_u32(addr + method::VTABLE_INDEX as u64, info.vtable_index as u32)?;
        m.store_u64(addr + method::FROM_INTERPRETED_ENTRY as u64, interp.method_entry(info.flags))?;
        m.store_u64(addr + method::HOLDER as u64, holder)?;
        m.store_u64(addr + method::NAME as u64, name)?;
        Ok(())
    }

    /// Constant pool, tags, resolved klasses and references, and the cache.
    fn write_constant_pool(
        &mut self,
        holder: u64,
        pool: &ConstantPool,
        cache_slots: &[CacheSlot],
        references: usize,
    ) -> Result<(u64, u64), MachineError> {
        let len = pool.len() as u64;
        let cp = self.meta_alloc(constant_pool::HEADER_SIZE as u64 + len * 8)?;
        let tags = self.meta_alloc(constant_pool::ARRAY_DATA as u64 + len)?;
        let resolved_klasses = self.word_array(&vec![0; len as usize])?;
        let resolved_references = self.word_array(&vec![0; references])?;
        let cache = self.meta_alloc(cp_cache::BASE as u64 + cache_slots.len() as u64 * cp_cache::ENTRY_SIZE as u64)?;

        let m = &self.mem;
        m.store_u32(tags, len as u32)?;
        for (i, constant) in pool.entries().iter().enumerate() {
            let tag = match constant {
                Constant::Class { .. } => crate::runtime::layout::tag::UNRESOLVED_CLASS,
                c => c.tag(),
            };
            m.store_u8(tags + constant_pool::ARRAY_DATA as u64 + i as u64, tag)?;
            let slot = cp + constant_pool::HEADER_SIZE as u64 + i as u64 * 8;
            match constant {
                Constant::Integer(v) => m.store_u64(slot, *v as u32 as u64)?,
                Constant::Float(v) => m.store_u64(slot, v.to_bits() as u64)?,
                Constant::Long(v) => m.store_u64(slot, *v as u64)?,
                Constant::Double(v) => m.store_u64(slot, v.to_bits())?,
                _ => {}
            }
        }
        m.store_u64(cp + constant_pool::TAGS as u64, tags)?;
        m.store_u64(cp + constant_pool::CACHE as u64, cache)?;
        m.store_u64(cp + constant_pool::POOL_HOLDER as u64, holder)?;
        m.store_u64(cp + constant_pool::RESOLVED_KLASSES as u64, resolved_klasses)?;
        m.store_u64(cp + constant_pool::RESOLVED_REFERENCES as u64, resolved_references)?;
        m.store_u64(cp + constant_pool::LENGTH as u64, len)?;

        m.store_u64(cache + cp_cache::LENGTH as u64, cache_slots.len() as u64)?;
        m.store_u64(cache + cp_cache::CONSTANT_POOL as u64, cp)?;
        for (i, slot) in cache_slots.iter().enumerate() {
            CacheEntryRef::at(cache, i as u16).initialize(m, slot.cp_index)?;
        }
        Ok((cp, cache))
    }

    /// `java/lang/Class` instance of `id`, sized for its statics.
    fn create_mirror(&mut self, id: KlassId) -> Result<(), MachineError> {
        if self.klasses[id].mirror != 0 {
            return Ok(());
        }
        let class = self.klass_id(CLASS_CLASS).ok_or_else(|| missing(CLASS_CLASS))?;
        let size = align_up(self.klasses[id].mirror_size.max(oop::MIRROR_STATICS as u32) as u64, 8);
        let class_addr = self.klasses[class].addr;
        let mirror = self.heap.allocate(size, 8).ok_or(MachineError::HeapExhausted)?;
        self.mem.fill(mirror, size, 0)?;
        self.mem.store_u64(mirror + oop::MARK as u64, oop::PROTOTYPE_MARK)?;
        self.mem.store_u64(mirror + oop::KLASS as u64, class_addr)?;
        self.mem.store_u64(mirror + oop::MIRROR_KLASS as u64, self.klasses[id].addr)?;
        self.mem.store_u64(self.klasses[id].addr + klass::JAVA_MIRROR as u64, mirror)?;
        self.klasses[id].mirror = mirror;
        Ok(())
    }

    // ==================== Array klasses ====================

    pub fn type_array_klass(&mut self, ty: BasicType) -> Result<KlassId, MachineError> {
        let name = format!("[{}", ty.descriptor_char());
        if let Some(id) = self.klass_id(&name) {
            return Ok(id);
        }
        self.define_array_klass(name, KlassKind::TypeArray(ty))
    }

    /// Array klass with elements of klass `element`.
    pub fn array_klass(&mut self, element: KlassId) -> Result<KlassId, MachineError> {
        if let Some(id) = self.klasses[element].array_klass {
            return Ok(id);
        }
        let element_name = &self.klasses[element].name;
        let name = if element_name.starts_with('[') {
            format!("[{element_name}")
        } else {
            format!("[L{element_name};")
        };
        // Arrays of the element's supertypes come first.
        let supertypes = self.klasses[element].supertypes.clone();
        for s in supertypes {
            self.array_klass(s)?;
        }
        let id = self.define_array_klass(name, KlassKind::ObjArray { element })?;
        self.klasses[element].array_klass = Some(id);
        Ok(id)
    }

    fn define_array_klass(&mut self, name: String, kind: KlassKind) -> Result<KlassId, MachineError> {
        let object = self.klass_id(OBJECT_CLASS).ok_or_else(|| missing(OBJECT_CLASS))?;
        let object_addr = self.klasses[object].addr;
        let vtable = self.klasses[object].vtable.clone();
        let compressed = self.compressed_oops.is_some();
        let addr = self.meta_alloc(
            klass::VTABLE_START as u64 + vtable.len() as u64 * 8 + klass::ITABLE_OFFSET_ENTRY_SIZE as u64,
        )?;

        let mut supertypes = vec![object];
        let (element_type, element_addr, super_check_offset, secondaries) = match kind {
            KlassKind::TypeArray(ty) => (ty, 0, klass::primary_super_offset(1), Vec::new()),
            KlassKind::ObjArray { element } => {
                // [S is a supertype of [E for every supertype S of E.
                let mut secondaries = Vec::new();
                for &s in &self.klasses[element].supertypes {
                    if let Some(a) = self.klasses[s].array_klass {
                        secondaries.push(self.klasses[a].addr);
                        supertypes.push(a);
                    }
                }
                (BasicType::Object, self.klasses[element].addr, klass::SECONDARY_SUPER_CACHE, secondaries)
            }
            KlassKind::Instance => {
                return Err(MachineError::IllegalState(format!("{name} is not an array klass")));
            }
        };
        let secondary_supers = self.word_array(&secondaries)?;
        let name_symbol = self.symbol(&name)?;

        let m = &self.mem;
        let a = |off: i32| addr + off as u64;
        m.store_u32(a(klass::LAYOUT_HELPER), klass::array_layout_helper(element_type, compressed) as u32)?;
        m.store_u32(a(klass::INIT_STATE), InitState::FullyInitialized as u32)?;
        m.store_u32(a(klass::ACCESS_FLAGS), (AccessFlags::PUBLIC | AccessFlags::FINAL).bits())?;
        m.store_u32(a(klass::SUPER_CHECK_OFFSET), super_check_offset as u32)?;
        m.store_u64(a(klass::SECONDARY_SUPERS), secondary_supers)?;
        m.store_u64(a(klass::primary_super_offset(0)), object_addr)?;
        if matches!(kind, KlassKind::TypeArray(_)) {
            m.store_u64(a(klass::primary_super_offset(1)), addr)?;
        }
        m.store_u64(a(klass::SUPER), object_addr)?;
        m.store_u64(a(klass::NAME), name_symbol)?;
        m.store_u64(a(klass::ELEMENT_KLASS), element_addr)?;
        m.store_u32(a(klass::VTABLE_LENGTH), vtable.len() as u32)?;
        m.store_u32(a(klass::ITABLE_LENGTH), 2)?;
        m.store_u64(a(klass::PROTOTYPE_HEADER), oop::PROTOTYPE_MARK)?;
        for (i, &v) in vtable.iter().enumerate() {
            m.store_u64(a(klass::VTABLE_START) + i as u64 * 8, self.methods[v].addr)?;
        }

        let id = self.klasses.len();
        self.by_name.insert(name.clone(), id);
        self.by_addr.insert(addr, id);
        self.klasses.push(KlassInfo {
            name,
            addr,
            kind,
            flags: AccessFlags::PUBLIC | AccessFlags::FINAL,
            super_klass: Some(object),
            interfaces: Vec::new(),
            supertypes,
            depth: 1,
            fields: Vec::new(),
            methods: Vec::new(),
            vtable,
            itable_methods: Vec::new(),
            instance_size: oop::ARRAY_BASE as u32,
            mirror_size: oop::MIRROR_STATICS as u32,
            mirror: 0,
            constants: 0,
            cache: 0,
            pool: ConstantPool::new(),
            cache_slots: Vec::new(),
            references: Vec::new(),
            array_klass: None,
        });
        if self.klass_id(CLASS_CLASS).is_some_and(|c| self.klasses[c].mirror != 0) {
            self.create_mirror(id)?;
        }
        Ok(id)
    }
}

fn missing(name: &str) -> MachineError {
    ProgramError::UnknownClass {
        name: name.to_string(),
        referenced_by: "bootstrap".to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::barrier::barrier_set_for;
    use crate::interp::generate;
    use crate::runtime::layout::CODE_BASE;

    fn link(source: &str, config: &InterpreterConfig) -> Universe {
        let (_, heap) = config.heap_layout();
        let interp = generate(config, barrier_set_for(config.barrier_set, heap), CODE_BASE).unwrap();
        let program = Program::from_toml(source).unwrap();
        Universe::new(Arc::new(Memory::new()), config, &interp, &program).unwrap()
    }

    const SHAPES: &str = r#"
        [[class]]
        name = "Shape"
        flags = ["interface"]

        [[class.method]]
        name = "area"
        descriptor = "()I"

        [[class]]
        name = "Square"
        interfaces = ["Shape"]

        [[class.field]]
        name = "side"
        descriptor = "I"

        [[class.field]]
        name = "next"
        descriptor = "LSquare;"

        [[class.field]]
        name = "count"
        descriptor = "J"
        flags = ["static"]

        [[class.method]]
        name = "area"
        descriptor = "()I"
        code = "aload_0\ngetfield Square.side:I\ndup\nimul\nireturn"

        [[class.method]]
        name = "toString"
        descriptor = "()Ljava/lang/String;"
        code = "ldc \"square\"\nareturn"
    "#;

    #[test]
    fn test_field_layout() {
        let u = link(SHAPES, &InterpreterConfig::default());
        let square = u.klass_id("Square").unwrap();
        let (_, side) = u.find_field(square, "side", "I").unwrap();
        let (_, next) = u.find_field(square, "next", "LSquare;").unwrap();
        let (_, count) = u.find_field(square, "count", "J").unwrap();
        assert_eq!(next.offset, 16);
        assert_eq!(side.offset, 24);
        assert_eq!(u.klass(square).instance_size, 32);
        assert_eq!(count.offset, oop::MIRROR_STATICS as u32);

        let compressed = link(
            SHAPES,
            &InterpreterConfig {
                compressed_oops: Some(crate::runtime::NarrowOopMode::ZeroBased),
                ..InterpreterConfig::default()
            },
        );
        let square = compressed.klass_id("Square").unwrap();
        assert_eq!(compressed.klass(square).instance_size, 24);
    }

    #[test]
    fn test_itable_points_at_implementation() {
        let u = link(SHAPES, &InterpreterConfig::default());
        let square = u.klass_id("Square").unwrap();
        let shape = u.klass_id("Shape").unwrap();
        let k = u.klass(square).addr;
        let vtable_len = u.mem().load_u32(k + klass::VTABLE_LENGTH as u64).unwrap() as u64;
        let entry = k + klass::VTABLE_START as u64 + vtable_len * 8;
        assert_eq!(u.mem().load_u64(entry).unwrap(), u.klass(shape).addr);
        let block = k + u.mem().load_u64(entry + 8).unwrap();
        let area = u.find_declared_method(square, "area", "()I").unwrap();
        assert_eq!(u.mem().load_u64(block).unwrap(), u.method(area).addr);
        // terminator
        assert_eq!(u.mem().load_u64(entry + 16).unwrap(), 0);

        let interface_area = u.find_declared_method(shape, "area", "()I").unwrap();
        assert_eq!(u.method(interface_area).vtable_index, method::ITABLE_INDEX_MAX);
    }

    #[test]
    fn test_class_defining_its_interface_method_links() {
        let source = r#"
            [[class]]
            name = "I"
            flags = ["interface"]

            [[class.method]]
            name = "f"
            descriptor = "()I"

            [[class.method]]
            name = "g"
            descriptor = "()I"
            code = "iconst_2\nireturn"

            [[class]]
            name = "C"
            interfaces = ["I"]

            [[class.method]]
            name = "f"
            descriptor = "()I"
            code = "iconst_1\nireturn"
        "#;
        let u = link(source, &InterpreterConfig::default());
        let c = u.klass_id("C").unwrap();
        let i = u.klass_id("I").unwrap();
        let own = u.find_declared_method(c, "f", "()I").unwrap();
        let default = u.find_declared_method(i, "g", "()I").unwrap();
        let f_slot = u.vtable_slot(c, "f", "()I").unwrap();
        let g_slot = u.vtable_slot(c, "g", "()I").unwrap();
        assert_eq!(u.klass(c).vtable[f_slot], own);
        assert_eq!(u.klass(c).vtable[g_slot], default);
    }

    #[test]
    fn test_vtable_overrides_in_place() {
        let u = link(SHAPES, &InterpreterConfig::default());
        let object = u.klass_id(OBJECT_CLASS).unwrap();
        let square = u.klass_id("Square").unwrap();
        let equals = u.vtable_slot(object, "equals", "(Ljava/lang/Object;)Z").unwrap();
        assert_eq!(u.vtable_slot(square, "equals", "(Ljava/lang/Object;)Z"), Some(equals));
        let to_string = u.find_declared_method(square, "toString", "()Ljava/lang/String;").unwrap();
        assert_eq!(u.method(to_string).vtable_index as usize, u.vtable_slot(square, "toString", "()Ljava/lang/String;").unwrap());
    }

    #[test]
    fn test_array_klasses_are_covariant() {
        let mut u = link(SHAPES, &InterpreterConfig::default());
        let squares = u.klass_for_name("[LSquare;").unwrap().unwrap();
        let shapes = u.klass_for_name("[LShape;").unwrap().unwrap();
        let objects = u.klass_for_name("[Ljava/lang/Object;").unwrap().unwrap();
        let ints = u.klass_for_name("[I").unwrap().unwrap();
        assert!(u.is_subtype(squares, shapes));
        assert!(u.is_subtype(squares, objects));
        assert!(!u.is_subtype(ints, objects));
        assert_eq!(u.klass_for_name("[[I").unwrap().map(|k| u.klass(k).name.clone()), Some("[[I".to_string()));
        assert!(u.klass_for_name("[LMissing;").unwrap().is_none());
    }

    #[test]
    fn test_strings_are_interned() {
        let mut u = link("", &InterpreterConfig::default());
        let a = u.intern("hello").unwrap();
        assert_eq!(u.intern("hello").unwrap(), a);
        assert_ne!(u.new_string("hello").unwrap(), a);
        assert_eq!(u.string_value(a).unwrap().as_deref(), Some("hello"));
        assert_eq!(u.string_value(0).unwrap(), None);
    }

    #[test]
    fn test_tlab_refill_fills_junk() {
        let mut u = link("", &InterpreterConfig::default());
        let object = u.klass_id(OBJECT_CLASS).unwrap();
        let obj = u.allocate_instance(object).unwrap().unwrap();
        let t = u.thread();
        let top = u.mem().load_u64(t + thread::TLAB_TOP as u64).unwrap();
        assert_eq!(top, obj + 16);
        assert_eq!(u.mem().load_u8(top).unwrap(), TLAB_JUNK);

        let mut zeroed = link(
            "",
            &InterpreterConfig {
                zero_tlab: true,
                ..InterpreterConfig::default()
            },
        );
        let object = zeroed.klass_id(OBJECT_CLASS).unwrap();
        let obj = zeroed.allocate_instance(object).unwrap().unwrap();
        assert_eq!(zeroed.mem().load_u64(obj + 16).unwrap(), 0);
    }

    #[test]
    fn test_link_errors() {
        let config = InterpreterConfig::default();
        let (_, heap) = config.heap_layout();
        let interp = generate(&config, barrier_set_for(config.barrier_set, heap), CODE_BASE).unwrap();
        let err = |source: &str| {
            let program = Program::from_toml(source).unwrap();
            Universe::new(Arc::new(Memory::new()), &config, &interp, &program).err().unwrap()
        };
        assert!(matches!(
            err("[[class]]\nname = \"A\"\nsuper = \"B\"\n"),
            MachineError::Program(ProgramError::UnknownClass { .. })
        ));
        assert!(matches!(
            err("[[class]]\nname = \"A\"\nsuper = \"B\"\n[[class]]\nname = \"B\"\nsuper = \"A\"\n"),
            MachineError::Program(ProgramError::ClassCircularity(_))
        ));
        assert!(matches!(
            err("[[class]]\nname = \"java/lang/Object\"\n"),
            MachineError::Program(ProgramError::DuplicateClass(_))
        ));
        assert!(matches!(
            err("[[class]]\nname = \"A\"\nsuper = \"java/lang/String\"\n"),
            MachineError::Program(ProgramError::IncompatibleClassChange { .. })
        ));
    }
}
