//! Host side of the interpreter runtime entries.
//!
//! Generated code reaches these through `call_vm`: the frame's bcp and esp
//! are saved, `a0` holds the thread and the arguments follow in `a1..`.
//! A handler answers through `a0`/`fa0`, the thread's `vm_result` words,
//! memory, or a pending exception which the caller forwards on return.

use std::sync::atomic::Ordering;

use super::cpu::Hart;
use super::machine::{BreakpointHit, Machine, MachineError, Outcome, TraceEvent};
use super::universe::{KlassId, KlassKind, THROWABLE_CLASS};
use crate::asm::{FReg, Reg};
use crate::classfile::{MemberKind, MethodRef, ProgramError};
use crate::interp::bytecodes::{Bytecode, TosState};
use crate::interp::cp_cache::{CacheEntryRef, EntryFlags, F1};
use crate::interp::patching::BytecodeCell;
use crate::interp::rewriter::ReferenceSlot;
use crate::runtime::layout::{
    AccessFlags, BasicType, InitState, constant_pool, const_method, frame, method, oop, tag, thread,
};
use crate::runtime::{Frame, NoCompiledCode, RuntimeEntry};

/// Interpreter state saved in the frame of the caller of a runtime entry.
#[derive(Debug, Clone, Copy)]
struct CallerFrame {
    method: u64,
    bcp: u64,
    cache: u64,
    depth: u64,
}

/// An owned member reference read from a constant pool.
#[derive(Debug, Clone)]
struct Member {
    kind: MemberKind,
    class: String,
    name: String,
    descriptor: String,
}

fn result_state(descriptor: &str) -> TosState {
    crate::classfile::MethodDescriptor::parse(descriptor).map_or(TosState::Vtos, |d| d.result_state())
}

fn param_slots(descriptor: &str) -> u16 {
    crate::classfile::MethodDescriptor::parse(descriptor).map_or(0, |d| d.param_slots())
}

impl Machine {
    /// Run the runtime entry the hart stopped at. The caller resumes the
    /// hart at `ra` afterwards.
    pub(super) fn handle_runtime_call(&mut self, entry: RuntimeEntry, hart: &mut Hart) -> Result<(), MachineError> {
        let a1 = hart.reg(Reg::A1);
        let a2 = hart.reg(Reg::A2);
        let a3 = hart.reg(Reg::A3);
        tracing::trace!(entry = entry.name(), a1 = format_args!("{a1:#x}"), a2 = format_args!("{a2:#x}"), "runtime call");

        match entry {
            RuntimeEntry::ResolveFromCache => {
                let code = Bytecode::from_u8(a1 as u8)
                    .ok_or_else(|| MachineError::IllegalState(format!("resolve for bytecode {a1:#x}")))?;
                self.resolve_from_cache(hart, code)
            }
            RuntimeEntry::Ldc => self.ldc(hart, a1 != 0),
            RuntimeEntry::ResolveLdc => self.resolve_ldc(hart, a1 != 0),
            RuntimeEntry::New => self.new_instance(hart, a1, a2 as u16),
            RuntimeEntry::NewArray => self.new_type_array(a1 as u8, a2 as i32),
            RuntimeEntry::ANewArray => self.new_object_array(a1, a2 as u16, a3 as i32),
            RuntimeEntry::MultiANewArray => self.new_multi_array(hart, a1),
            RuntimeEntry::QuickenIoCc => {
                if let Some(k) = self.resolve_klass_at(a1, a2 as u16)? {
                    let addr = self.universe.klass(k).addr;
                    self.set_vm_result_2(addr)?;
                }
                Ok(())
            }
            RuntimeEntry::MonitorEnter => self.monitor_enter(a1),
            RuntimeEntry::MonitorExit => self.monitor_exit(a1),
            RuntimeEntry::ThrowNullPointerException => self.throw("java/lang/NullPointerException", None),
            RuntimeEntry::ThrowArrayIndexOutOfBoundsException => {
                let length = self.universe.array_length(a1)?;
                let message = format!("Index {} out of bounds for length {length}", a2 as i32);
                self.throw("java/lang/ArrayIndexOutOfBoundsException", Some(message))
            }
            RuntimeEntry::ThrowArithmeticException => self.throw("java/lang/ArithmeticException", Some("/ by zero".into())),
            RuntimeEntry::ThrowClassCastException => {
                let from = self.class_name_of(a1)?;
                let to = self.klass_name_at(a2);
                let message = format!("class {from} cannot be cast to class {to}");
                self.throw("java/lang/ClassCastException", Some(message))
            }
            RuntimeEntry::ThrowArrayStoreException => {
                let value = self.class_name_of(a2)?;
                self.throw("java/lang/ArrayStoreException", Some(value))
            }
            RuntimeEntry::ThrowIncompatibleClassChangeError => {
                let message = format!(
                    "class {} does not implement the requested interface {}",
                    self.klass_name_at(a1),
                    self.klass_name_at(a2)
                );
                self.throw("java/lang/IncompatibleClassChangeError", Some(message))
            }
            RuntimeEntry::ThrowAbstractMethodError => {
                let callee = self.method_name_at(a2);
                let message = if a1 == 0 {
                    callee
                } else {
                    format!("receiver class {} does not define or inherit {callee}", self.klass_name_at(a1))
                };
                self.throw("java/lang/AbstractMethodError", Some(message))
            }
            RuntimeEntry::ThrowIllegalMonitorStateException => {
                self.throw("java/lang/IllegalMonitorStateException", None)
            }
            RuntimeEntry::ThrowException => self.set_pending_exception(a1),
            RuntimeEntry::AtSafepoint => {
                self.safepoints += 1;
                let word = self.universe.thread() + thread::POLLING_WORD as u64;
                let mem = self.universe.mem();
                let poll = mem.load_u64(word)?;
                mem.store_u64(word, poll & !thread::POLL_BIT)?;
                Ok(())
            }
            RuntimeEntry::TraceBytecode => self.trace_bytecode(hart, a1 as u8),
            RuntimeEntry::GetOriginalBytecode => {
                let original = match self.breakpoints.original(a2) {
                    Some(bc) => bc,
                    None => self.universe.mem().load_u8(a2)?,
                };
                hart.set_reg(Reg::A0, original as u64);
                Ok(())
            }
            RuntimeEntry::SetOriginalBytecode => {
                let caller = self.caller_frame(hart);
                self.breakpoints.set_original(caller.bcp, a1 as u8);
                Ok(())
            }
            RuntimeEntry::Breakpoint => {
                let hit = BreakpointHit {
                    method: self.method_name_at(a1),
                    bci: self.bci_of(a1, a2)?,
                };
                tracing::debug!(method = %hit.method, bci = hit.bci, "breakpoint");
                self.breakpoint_hits.push(hit);
                Ok(())
            }
            RuntimeEntry::Frem => {
                let value = hart.f32_reg(FReg::FA0) % hart.f32_reg(FReg::FA1);
                hart.set_f32_reg(FReg::FA0, value);
                Ok(())
            }
            RuntimeEntry::Drem => {
                let value = hart.f64_reg(FReg::FA0) % hart.f64_reg(FReg::FA1);
                hart.set_f64_reg(FReg::FA0, value);
                Ok(())
            }
            RuntimeEntry::RegisterFinalizer => {
                self.finalizable.push(a1);
                Ok(())
            }
            RuntimeEntry::Stop => {
                let message = self.interp.stop_message(a1).unwrap_or("unknown stop").to_string();
                Err(MachineError::Stop(message))
            }
            RuntimeEntry::HostReturn | RuntimeEntry::ForwardException => Err(MachineError::IllegalState(format!(
                "{} is not a runtime call",
                entry.name()
            ))),
        }
    }

    // ==================== Thread words ====================

    pub(super) fn pending_exception(&self) -> Result<u64, MachineError> {
        Ok(self
            .universe
            .mem()
            .load_u64(self.universe.thread() + thread::PENDING_EXCEPTION as u64)?)
    }

    pub(super) fn set_pending_exception(&self, exception: u64) -> Result<(), MachineError> {
        let addr = self.universe.thread() + thread::PENDING_EXCEPTION as u64;
        Ok(self.universe.mem().store_u64(addr, exception)?)
    }

    fn set_vm_result(&self, value: u64) -> Result<(), MachineError> {
        let addr = self.universe.thread() + thread::VM_RESULT as u64;
        Ok(self.universe.mem().store_u64(addr, value)?)
    }

    fn set_vm_result_2(&self, value: u64) -> Result<(), MachineError> {
        let addr = self.universe.thread() + thread::VM_RESULT_2 as u64;
        Ok(self.universe.mem().store_u64(addr, value)?)
    }

    // ==================== Exceptions ====================

    /// Allocate an instance of `class` with `message` and make it the
    /// pending exception.
    pub(super) fn throw(&mut self, class: &str, message: Option<String>) -> Result<(), MachineError> {
        let exception = self.new_throwable(class, message.as_deref())?;
        tracing::debug!(class, message = message.as_deref().unwrap_or(""), "exception thrown");
        self.set_pending_exception(exception)
    }

    fn new_throwable(&mut self, class: &str, message: Option<&str>) -> Result<u64, MachineError> {
        let k = self.universe.klass_id(class).ok_or_else(|| {
            MachineError::Program(ProgramError::UnknownClass {
                name: class.to_string(),
                referenced_by: "runtime".to_string(),
            })
        })?;
        let Some(exception) = self.universe.allocate_instance(k)? else {
            return Ok(self.universe.out_of_memory());
        };
        if let Some(message) = message {
            let string = match self.universe.new_string(message) {
                Ok(s) => s,
                Err(MachineError::HeapExhausted) => return Ok(self.universe.out_of_memory()),
                Err(e) => return Err(e),
            };
            let throwable = self.universe.klass_id(THROWABLE_CLASS).unwrap_or(k);
            let offset = self
                .universe
                .instance_field_offset(throwable, "message", "Ljava/lang/String;")?;
            self.universe.store_oop(exception + offset, string)?;
        }
        Ok(exception)
    }

    /// Class name and message of a throwable.
    pub(super) fn describe_exception(&self, exception: u64) -> Result<(String, Option<String>), MachineError> {
        let k = self.universe.klass_of(exception)?;
        let throwable = self
            .universe
            .klass_id(THROWABLE_CLASS)
            .ok_or_else(|| MachineError::IllegalState("no Throwable class".into()))?;
        let offset = self
            .universe
            .instance_field_offset(throwable, "message", "Ljava/lang/String;")?;
        let message = self.universe.string_value(self.universe.load_oop(exception + offset)?)?;
        Ok((self.universe.klass(k).name.clone(), message))
    }

    fn class_name_of(&self, obj: u64) -> Result<String, MachineError> {
        if obj == 0 {
            return Ok("null".to_string());
        }
        let k = self.universe.klass_of(obj)?;
        Ok(self.universe.klass(k).name.clone())
    }

    fn klass_name_at(&self, addr: u64) -> String {
        self.universe
            .klass_at(addr)
            .map_or_else(|| format!("{addr:#x}"), |k| self.universe.klass(k).name.clone())
    }

    fn method_name_at(&self, addr: u64) -> String {
        self.universe
            .method_at(addr)
            .map_or_else(|| format!("{addr:#x}"), |m| self.universe.method_name(m))
    }

    fn bci_of(&self, method_addr: u64, bcp: u64) -> Result<u32, MachineError> {
        let const_method = self.universe.mem().load_u64(method_addr + method::CONST_METHOD as u64)?;
        Ok((bcp - (const_method + const_method::CODE as u64)) as u32)
    }

    // ==================== Frames ====================

    fn caller_frame(&self, hart: &Hart) -> CallerFrame {
        let mem = self.universe.mem();
        let f = Frame::new(mem, hart.reg(Reg::SP), hart.reg(Reg::FP), hart.pc, &NoCompiledCode);
        CallerFrame {
            method: f.method(),
            bcp: f.bcp(),
            cache: f.cpcache(),
            depth: f.expression_stack_depth(),
        }
    }

    fn caller_holder(&self, caller: &CallerFrame) -> Result<KlassId, MachineError> {
        self.universe
            .method_at(caller.method)
            .map(|m| self.universe.method(m).holder)
            .ok_or(MachineError::CorruptFrame(caller.method))
    }

    /// Release the monitors of every interpreter frame from `fp` up to the
    /// frame entered from the host.
    pub(super) fn unwind_frames(&mut self, sp: u64, fp: u64, pc: u64) -> Result<usize, MachineError> {
        let host_return = RuntimeEntry::HostReturn.address();
        let mem = self.universe.memory();
        let mut frame = Frame::new(&*mem, sp, fp, pc, &NoCompiledCode);
        let mut frames = 0;
        loop {
            let owned: Vec<u64> = frame
                .monitors()
                .map(|entry| frame.monitor_obj(entry))
                .filter(|&obj| obj != 0)
                .collect();
            for obj in owned {
                self.release_lock(obj);
            }
            frames += 1;
            if frame.sender_pc() == host_return {
                return Ok(frames);
            }
            if frame.link() == 0 || frames > 1 << 16 {
                return Err(MachineError::IllegalState("unwound past the host frame".into()));
            }
            frame = frame.sender(&NoCompiledCode);
        }
    }

    // ==================== Monitors ====================

    fn monitor_enter(&mut self, entry: u64) -> Result<(), MachineError> {
        let mem = self.universe.mem();
        let obj = mem.load_u64(entry + frame::MONITOR_OBJ as u64)?;
        let mark = mem.load_u64(obj + oop::MARK as u64)?;
        mem.store_u64(entry + frame::MONITOR_LOCK as u64, mark)?;
        *self.locks.entry(obj).or_insert(0) += 1;
        Ok(())
    }

    fn monitor_exit(&mut self, entry: u64) -> Result<(), MachineError> {
        let obj = self.universe.mem().load_u64(entry + frame::MONITOR_OBJ as u64)?;
        if !self.release_lock(obj) {
            return self.throw("java/lang/IllegalMonitorStateException", None);
        }
        Ok(())
    }

    fn release_lock(&mut self, obj: u64) -> bool {
        match self.locks.get_mut(&obj) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.locks.remove(&obj);
                true
            }
            None => false,
        }
    }

    // ==================== Tracing ====================

    fn trace_bytecode(&mut self, hart: &Hart, state: u8) -> Result<(), MachineError> {
        let caller = self.caller_frame(hart);
        let code = BytecodeCell::new(caller.bcp).code(self.universe.mem(), &self.breakpoints)?;
        let event = TraceEvent {
            method: self.method_name_at(caller.method),
            bci: self.bci_of(caller.method, caller.bcp)?,
            bytecode: Bytecode::from_u8(code).map_or("illegal", Bytecode::name),
            state: TosState::from_u8(state).unwrap_or(TosState::Vtos),
            depth: caller.depth,
        };
        tracing::trace!(method = %event.method, bci = event.bci, bytecode = event.bytecode, depth = event.depth, "bytecode");
        self.trace.push(event);
        Ok(())
    }

    // ==================== Class initialization ====================

    /// Run the static initializers of `k` and its supers. Returns `false`
    /// with an exception pending when initialization failed.
    pub(super) fn initialize(&mut self, k: KlassId, hart: &Hart) -> Result<bool, MachineError> {
        let state = self.universe.init_state(k)?;
        if state == InitState::FullyInitialized as u32 || state == InitState::BeingInitialized as u32 {
            return Ok(true);
        }
        let name = self.universe.klass(k).name.clone();
        if state == InitState::InitializationError as u32 {
            self.throw("java/lang/NoClassDefFoundError", Some(format!("Could not initialize class {name}")))?;
            return Ok(false);
        }

        self.universe.set_init_state(k, InitState::BeingInitialized)?;
        let info = self.universe.klass(k);
        if let Some(sup) = info.super_klass.filter(|_| !info.is_interface()) {
            if !self.initialize(sup, hart)? {
                self.universe.set_init_state(k, InitState::InitializationError)?;
                return Ok(false);
            }
        }

        if let Some(clinit) = self.universe.find_declared_method(k, "<clinit>", "()V") {
            tracing::debug!(class = %name, "running static initializer");
            let caller = (hart.reg(Reg::SP), hart.reg(Reg::FP));
            if let Outcome::Threw { class, message, .. } = self.call_method(clinit, &[], Some(caller))? {
                self.universe.set_init_state(k, InitState::InitializationError)?;
                let cause = match message {
                    Some(m) => format!("{class}: {m}"),
                    None => class,
                };
                self.throw("java/lang/ExceptionInInitializerError", Some(cause))?;
                return Ok(false);
            }
        }
        self.universe.set_init_state(k, InitState::FullyInitialized)?;
        Ok(true)
    }

    // ==================== Resolution ====================

    fn member_at(&self, holder: KlassId, cp_index: u16) -> Result<Member, MachineError> {
        let info = self.universe.klass(holder);
        let member = info.pool.member_ref(cp_index).ok_or_else(|| {
            MachineError::IllegalState(format!("{}: no member reference at #{cp_index}", info.name))
        })?;
        Ok(Member {
            kind: member.kind,
            class: member.class.to_string(),
            name: member.name.to_string(),
            descriptor: member.descriptor.to_string(),
        })
    }

    /// Klass named `name`, throwing `NoClassDefFoundError` when there is
    /// none.
    fn resolve_klass_name(&mut self, name: &str) -> Result<Option<KlassId>, MachineError> {
        match self.universe.klass_for_name(name)? {
            Some(k) => Ok(Some(k)),
            None => {
                self.throw("java/lang/NoClassDefFoundError", Some(name.to_string()))?;
                Ok(None)
            }
        }
    }

    /// Resolve the class entry `index` of the pool at `cp` and record it
    /// in the pool so the templates' fast paths see it.
    fn resolve_klass_at(&mut self, cp: u64, index: u16) -> Result<Option<KlassId>, MachineError> {
        let mem = self.universe.memory();
        let holder_addr = mem.load_u64(cp + constant_pool::POOL_HOLDER as u64)?;
        let holder = self.universe.klass_at(holder_addr).ok_or(MachineError::CorruptFrame(cp))?;
        let name = self
            .universe
            .klass(holder)
            .pool
            .class_name(index)
            .map(str::to_string)
            .ok_or_else(|| MachineError::IllegalState(format!("no class constant at #{index}")))?;
        let Some(k) = self.resolve_klass_name(&name)? else {
            return Ok(None);
        };

        let resolved = mem.load_u64(cp + constant_pool::RESOLVED_KLASSES as u64)?;
        mem.store_u64(
            resolved + constant_pool::ARRAY_DATA as u64 + index as u64 * 8,
            self.universe.klass(k).addr,
        )?;
        let tags = mem.load_u64(cp + constant_pool::TAGS as u64)?;
        mem.store(
            tags + constant_pool::ARRAY_DATA as u64 + index as u64,
            1,
            tag::CLASS as u64,
            Ordering::Release,
        )?;
        Ok(Some(k))
    }

    fn resolve_from_cache(&mut self, hart: &Hart, code: Bytecode) -> Result<(), MachineError> {
        let caller = self.caller_frame(hart);
        let mem = self.universe.memory();
        let index = mem.load_u16(caller.bcp + 1)?;
        let entry = CacheEntryRef::at(caller.cache, index);

        if !entry.is_resolved(&mem, code)? {
            let holder = self.caller_holder(&caller)?;
            let member = self.member_at(holder, entry.cp_index(&mem)?)?;
            tracing::trace!(bytecode = code.name(), class = %member.class, name = %member.name, "resolving");
            let resolved = match code {
                Bytecode::Getfield | Bytecode::Putfield | Bytecode::Getstatic | Bytecode::Putstatic => {
                    self.resolve_field(holder, code, &member, entry)?
                }
                Bytecode::Invokevirtual => self.resolve_invokevirtual(&member, entry)?,
                Bytecode::Invokespecial => self.resolve_invokespecial(holder, &member, entry)?,
                Bytecode::Invokestatic => self.resolve_invokestatic(&member, entry)?,
                Bytecode::Invokeinterface => self.resolve_invokeinterface(&member, entry)?,
                Bytecode::Invokedynamic | Bytecode::Invokehandle => {
                    self.resolve_call_site(hart, holder, index, code, &member, entry)?
                }
                other => {
                    return Err(MachineError::IllegalState(format!("{} has no cache entry", other.name())));
                }
            };
            if !resolved {
                return Ok(());
            }
        }

        // Statics need their holder initialized before the template
        // passes its barrier.
        let f1 = mem.load_u64(entry.address() + F1 as u64)?;
        let holder_addr = match code {
            Bytecode::Getstatic | Bytecode::Putstatic => mem.load_u64(f1 + oop::MIRROR_KLASS as u64)?,
            Bytecode::Invokestatic => mem.load_u64(f1 + method::HOLDER as u64)?,
            _ => return Ok(()),
        };
        let k = self.universe.klass_at(holder_addr).ok_or(MachineError::CorruptObject(holder_addr))?;
        self.initialize(k, hart)?;
        Ok(())
    }

    fn resolve_field(
        &mut self,
        holder: KlassId,
        code: Bytecode,
        member: &Member,
        entry: CacheEntryRef,
    ) -> Result<bool, MachineError> {
        let Some(class) = self.resolve_klass_name(&member.class)? else {
            return Ok(false);
        };
        let Some((declaring, field)) = self
            .universe
            .find_field(class, &member.name, &member.descriptor)
            .map(|(k, f)| (k, f.clone()))
        else {
            self.throw("java/lang/NoSuchFieldError", Some(member.name.clone()))?;
            return Ok(false);
        };

        let is_static = matches!(code, Bytecode::Getstatic | Bytecode::Putstatic);
        if field.is_static() != is_static {
            let kind = if is_static { "static" } else { "non-static" };
            let message = format!("expected {kind} field {}.{}", member.class, member.name);
            self.throw("java/lang/IncompatibleClassChangeError", Some(message))?;
            return Ok(false);
        }

        let is_final = field.flags.contains(AccessFlags::FINAL);
        let (get_code, put_code) = if is_static {
            (Bytecode::Getstatic, Bytecode::Putstatic)
        } else {
            (Bytecode::Getfield, Bytecode::Putfield)
        };
        // Final fields are written only by their own class.
        let put_code = (!is_final || declaring == holder).then_some(put_code);
        if put_code.is_none() && matches!(code, Bytecode::Putfield | Bytecode::Putstatic) {
            let message = format!("update to final field {}.{}", member.class, member.name);
            self.throw("java/lang/IllegalAccessError", Some(message))?;
            return Ok(false);
        }

        let declaring_info = self.universe.klass(declaring);
        let field_index = declaring_info
            .fields
            .iter()
            .position(|f| f.name == field.name && f.descriptor == field.descriptor)
            .unwrap_or(0) as u16;
        let holder_word = if is_static { declaring_info.mirror } else { declaring_info.addr };
        let flags = EntryFlags::field(
            TosState::from_basic_type(field.ty),
            field_index,
            field.flags.contains(AccessFlags::VOLATILE),
            is_final,
        );
        entry.set_field(
            self.universe.mem(),
            get_code,
            put_code,
            holder_word,
            field.offset as u64,
            flags,
        )?;
        Ok(true)
    }

    /// `NoSuchMethodError` unless `found` is set.
    fn require_method(&mut self, found: Option<usize>, member: &Member) -> Result<Option<usize>, MachineError> {
        if found.is_none() {
            let message = format!("{}.{}{}", member.class, member.name, member.descriptor);
            self.throw("java/lang/NoSuchMethodError", Some(message))?;
        }
        Ok(found)
    }

    fn incompatible(&mut self, member: &Member, what: &str) -> Result<bool, MachineError> {
        let message = format!("{}.{}{}: {what}", member.class, member.name, member.descriptor);
        self.throw("java/lang/IncompatibleClassChangeError", Some(message))?;
        Ok(false)
    }

    fn method_flags(member: &Member, receiver: bool) -> EntryFlags {
        let slots = param_slots(&member.descriptor) + u16::from(receiver);
        EntryFlags::method(result_state(&member.descriptor), slots as u8)
    }

    fn resolve_invokevirtual(&mut self, member: &Member, entry: CacheEntryRef) -> Result<bool, MachineError> {
        let Some(class) = self.resolve_klass_name(&member.class)? else {
            return Ok(false);
        };
        if self.universe.klass(class).is_interface() {
            return self.incompatible(member, "found interface, but class was expected");
        }
        let found = self.universe.find_method(class, &member.name, &member.descriptor);
        let Some(m) = self.require_method(found, member)? else {
            return Ok(false);
        };
        let info = self.universe.method(m);
        if info.is_static() {
            return self.incompatible(member, "expected non-static method");
        }
        let flags = Self::method_flags(member, true);
        let mem = self.universe.memory();
        if info.flags.contains(AccessFlags::FINAL) || info.is_private() {
            entry.set_virtual_call(&mem, info.addr, flags.with_vfinal())?;
        } else {
            let slot = self
                .universe
                .vtable_slot(class, &member.name, &member.descriptor)
                .ok_or_else(|| MachineError::IllegalState(format!("{} has no vtable slot", member.name)))?;
            entry.set_virtual_call(&mem, slot as u64, flags)?;
        }
        Ok(true)
    }

    fn resolve_invokespecial(&mut self, holder: KlassId, member: &Member, entry: CacheEntryRef) -> Result<bool, MachineError> {
        let Some(class) = self.resolve_klass_name(&member.class)? else {
            return Ok(false);
        };
        let is_interface = self.universe.klass(class).is_interface();
        // Super calls select from the caller's superclass.
        let lookup = match self.universe.klass(holder).super_klass {
            Some(sup) if !is_interface && member.name != "<init>" && class != holder && self.universe.is_subtype(holder, class) => sup,
            _ => class,
        };
        let found = if is_interface {
            self.universe.find_interface_method(lookup, &member.name, &member.descriptor)
        } else {
            self.universe.find_method(lookup, &member.name, &member.descriptor)
        };
        let Some(m) = self.require_method(found, member)? else {
            return Ok(false);
        };
        let info = self.universe.method(m);
        if info.is_static() {
            return self.incompatible(member, "expected non-static method");
        }
        if info.is_abstract() {
            let message = self.universe.method_name(m);
            self.throw("java/lang/AbstractMethodError", Some(message))?;
            return Ok(false);
        }
        let addr = info.addr;
        entry.set_direct_call(self.universe.mem(), Bytecode::Invokespecial, addr, Self::method_flags(member, true))?;
        Ok(true)
    }

    fn resolve_invokestatic(&mut self, member: &Member, entry: CacheEntryRef) -> Result<bool, MachineError> {
        let Some(class) = self.resolve_klass_name(&member.class)? else {
            return Ok(false);
        };
        let found = if member.kind == MemberKind::InterfaceMethod {
            self.universe.find_declared_method(class, &member.name, &member.descriptor)
        } else {
            self.universe.find_method(class, &member.name, &member.descriptor)
        };
        let Some(m) = self.require_method(found, member)? else {
            return Ok(false);
        };
        let info = self.universe.method(m);
        if !info.is_static() {
            return self.incompatible(member, "expected static method");
        }
        let addr = info.addr;
        entry.set_direct_call(self.universe.mem(), Bytecode::Invokestatic, addr, Self::method_flags(member, false))?;
        Ok(true)
    }

    fn resolve_invokeinterface(&mut self, member: &Member, entry: CacheEntryRef) -> Result<bool, MachineError> {
        let Some(class) = self.resolve_klass_name(&member.class)? else {
            return Ok(false);
        };
        if !self.universe.klass(class).is_interface() {
            return self.incompatible(member, "found class, but interface was expected");
        }
        let found = self.universe.find_interface_method(class, &member.name, &member.descriptor);
        let Some(m) = self.require_method(found, member)? else {
            return Ok(false);
        };
        let info = self.universe.method(m);
        if info.is_static() {
            return self.incompatible(member, "expected non-static method");
        }
        let mut flags = Self::method_flags(member, true);
        let declared_by_class = !self.universe.klass(info.holder).is_interface();
        let target = if declared_by_class {
            // An Object method reached through an interface.
            flags = flags.with_forced_virtual();
            if info.flags.contains(AccessFlags::FINAL) {
                flags = flags.with_vfinal();
                info.addr
            } else {
                let holder = info.holder;
                self.universe
                    .vtable_slot(holder, &member.name, &member.descriptor)
                    .ok_or_else(|| MachineError::IllegalState(format!("{} has no vtable slot", member.name)))?
                    as u64
            }
        } else {
            if info.is_private() {
                flags = flags.with_vfinal();
            }
            info.addr
        };
        let interface = self.universe.klass(class).addr;
        entry.set_interface_call(self.universe.mem(), interface, target, flags)?;
        Ok(true)
    }

    /// Bind an `invokedynamic` or `invokehandle` site to the static
    /// method its manifest binding names.
    fn resolve_call_site(
        &mut self,
        hart: &Hart,
        holder: KlassId,
        index: u16,
        code: Bytecode,
        member: &Member,
        entry: CacheEntryRef,
    ) -> Result<bool, MachineError> {
        let caller_class = self.universe.klass(holder).name.clone();
        let site_name = format!("{caller_class}.{}{}", member.name, member.descriptor);
        let bad = |reason: &str| MachineError::Program(ProgramError::BadCallSite(site_name.clone(), reason.to_string()));

        let site = self
            .universe
            .callsite(&caller_class, &member.name, &member.descriptor)
            .cloned()
            .ok_or_else(|| bad("no binding"))?;
        let target = MethodRef::parse(&site.target)?;
        let target_class = self.universe.klass_id(&target.class).ok_or_else(|| bad("unknown target class"))?;
        let m = self
            .universe
            .find_method(target_class, &target.name, &target.descriptor)
            .ok_or_else(|| bad("unknown target method"))?;
        let info = self.universe.method(m).clone();
        if !info.is_static() {
            return Err(bad("target must be static"));
        }

        let has_receiver = code == Bytecode::Invokehandle;
        let has_appendix = site.appendix.is_some();
        let slots = param_slots(&member.descriptor) + u16::from(has_receiver) + u16::from(has_appendix);
        let call_result = result_state(&member.descriptor);
        if info.size_of_parameters != slots || info.signature.result_state() != call_result {
            return Err(bad("target signature does not match the call"));
        }

        let mut flags = EntryFlags::method(call_result, slots as u8);
        let mut appendix_index = 0;
        if let Some(appendix) = &site.appendix {
            let slot = self
                .universe
                .klass(holder)
                .cache_slots
                .get(index as usize)
                .and_then(|s| s.appendix)
                .ok_or_else(|| bad("no appendix slot"))?;
            let string = self.universe.intern(appendix)?;
            self.store_resolved_reference(holder, slot, string)?;
            appendix_index = slot as u64;
            flags = flags.with_appendix();
        }

        let target_holder = info.holder;
        entry.set_adapter_call(self.universe.mem(), code, info.addr, appendix_index, flags)?;
        // Adapters run without a class initialization barrier.
        self.initialize(target_holder, hart)
    }

    // ==================== Constants ====================

    fn store_resolved_reference(&self, holder: KlassId, index: u16, value: u64) -> Result<(), MachineError> {
        let mem = self.universe.mem();
        let cp = self.universe.klass(holder).constants;
        let references = mem.load_u64(cp + constant_pool::RESOLVED_REFERENCES as u64)?;
        let addr = references + constant_pool::ARRAY_DATA as u64 + index as u64 * 8;
        Ok(mem.store(addr, 8, value, Ordering::Release)?)
    }

    fn ldc(&mut self, hart: &Hart, wide: bool) -> Result<(), MachineError> {
        let caller = self.caller_frame(hart);
        let mem = self.universe.memory();
        let cp_index = if wide {
            u16::from_be_bytes([mem.load_u8(caller.bcp + 1)?, mem.load_u8(caller.bcp + 2)?])
        } else {
            mem.load_u8(caller.bcp + 1)? as u16
        };
        let holder = self.caller_holder(&caller)?;
        let pool = &self.universe.klass(holder).pool;
        if let Some(s) = pool.string_at(cp_index).map(str::to_string) {
            let string = self.universe.intern(&s)?;
            return self.set_vm_result(string);
        }
        if pool.class_name(cp_index).is_some() {
            let cp = self.universe.klass(holder).constants;
            if let Some(k) = self.resolve_klass_at(cp, cp_index)? {
                let mirror = self.universe.klass(k).mirror;
                self.set_vm_result(mirror)?;
            }
            return Ok(());
        }
        Err(MachineError::IllegalState(format!("ldc of constant #{cp_index}")))
    }

    fn resolve_ldc(&mut self, hart: &Hart, wide: bool) -> Result<(), MachineError> {
        let caller = self.caller_frame(hart);
        let mem = self.universe.memory();
        let index = if wide {
            mem.load_u16(caller.bcp + 1)?
        } else {
            mem.load_u8(caller.bcp + 1)? as u16
        };
        let holder = self.caller_holder(&caller)?;
        let info = self.universe.klass(holder);
        let Some(ReferenceSlot::String { cp_index }) = info.references.get(index as usize).copied() else {
            return Err(MachineError::IllegalState(format!("resolved reference {index} is not a string")));
        };
        let text = info
            .pool
            .string_at(cp_index)
            .map(str::to_string)
            .ok_or_else(|| MachineError::IllegalState(format!("no string constant at #{cp_index}")))?;
        let string = self.universe.intern(&text)?;
        self.store_resolved_reference(holder, index, string)?;
        self.set_vm_result(string)
    }

    // ==================== Allocation ====================

    fn out_of_memory(&self) -> Result<(), MachineError> {
        tracing::debug!("heap exhausted");
        self.set_pending_exception(self.universe.out_of_memory())
    }

    fn new_instance(&mut self, hart: &Hart, cp: u64, index: u16) -> Result<(), MachineError> {
        let Some(k) = self.resolve_klass_at(cp, index)? else {
            return Ok(());
        };
        let info = self.universe.klass(k);
        if info.is_array() || info.is_interface() || info.flags.contains(AccessFlags::ABSTRACT) {
            let name = info.name.clone();
            return self.throw("java/lang/InstantiationError", Some(name));
        }
        if !self.initialize(k, hart)? {
            return Ok(());
        }
        match self.universe.allocate_instance(k)? {
            Some(obj) => self.set_vm_result(obj),
            None => self.out_of_memory(),
        }
    }

    fn negative_size(&mut self, length: i32) -> Result<bool, MachineError> {
        if length < 0 {
            self.throw("java/lang/NegativeArraySizeException", Some(length.to_string()))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn new_type_array(&mut self, type_code: u8, length: i32) -> Result<(), MachineError> {
        if self.negative_size(length)? {
            return Ok(());
        }
        let ty = BasicType::from_code(type_code)
            .filter(|t| !t.is_reference() && *t != BasicType::Void)
            .ok_or_else(|| MachineError::IllegalState(format!("newarray of type {type_code}")))?;
        let k = self.universe.type_array_klass(ty)?;
        match self.universe.allocate_array(k, length as u32)? {
            Some(array) => self.set_vm_result(array),
            None => self.out_of_memory(),
        }
    }

    fn new_object_array(&mut self, cp: u64, index: u16, length: i32) -> Result<(), MachineError> {
        if self.negative_size(length)? {
            return Ok(());
        }
        let Some(element) = self.resolve_klass_at(cp, index)? else {
            return Ok(());
        };
        let k = self.universe.array_klass(element)?;
        match self.universe.allocate_array(k, length as u32)? {
            Some(array) => self.set_vm_result(array),
            None => self.out_of_memory(),
        }
    }

    /// `first_dim` is the address of the outermost dimension; dimension
    /// `i` sits `8 * i` bytes below it.
    fn new_multi_array(&mut self, hart: &Hart, first_dim: u64) -> Result<(), MachineError> {
        let caller = self.caller_frame(hart);
        let mem = self.universe.memory();
        let index = u16::from_be_bytes([mem.load_u8(caller.bcp + 1)?, mem.load_u8(caller.bcp + 2)?]);
        let dimensions = mem.load_u8(caller.bcp + 3)? as u64;
        let mut dims = Vec::with_capacity(dimensions as usize);
        for i in 0..dimensions {
            dims.push(mem.load_u32(first_dim - 8 * i)? as i32);
        }
        if let Some(&negative) = dims.iter().find(|&&d| d < 0) {
            return self.throw("java/lang/NegativeArraySizeException", Some(negative.to_string()));
        }
        let holder = self.caller_holder(&caller)?;
        let cp = self.universe.klass(holder).constants;
        let Some(k) = self.resolve_klass_at(cp, index)? else {
            return Ok(());
        };
        match self.allocate_multi(k, &dims)? {
            Some(array) => self.set_vm_result(array),
            None => self.out_of_memory(),
        }
    }

    fn allocate_multi(&mut self, k: KlassId, dims: &[i32]) -> Result<Option<u64>, MachineError> {
        let Some((&length, rest)) = dims.split_first() else {
            return Ok(None);
        };
        let Some(array) = self.universe.allocate_array(k, length as u32)? else {
            return Ok(None);
        };
        if let (KlassKind::ObjArray { element }, false) = (self.universe.klass(k).kind, rest.is_empty()) {
            let element_size = self.universe.heap_oop_size();
            for i in 0..length as u64 {
                let Some(sub) = self.allocate_multi(element, rest)? else {
                    return Ok(None);
                };
                self.universe
                    .store_oop(array + oop::ARRAY_BASE as u64 + i * element_size, sub)?;
            }
        }
        Ok(Some(array))
    }
}
