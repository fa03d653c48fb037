//! A single-threaded VM around the generated interpreter.
//!
//! [`Machine`] generates the template table for a configuration, links a
//! program into simulated memory and calls methods through the method
//! entry, serving runtime calls on the host until control returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::cpu::{Event, Hart, SimError};
use super::memory::{Memory, MemoryError};
use super::universe::{MethodId, Universe};
use crate::asm::barrier::barrier_set_for;
use crate::asm::{AsmError, Reg};
use crate::classfile::{MethodRef, Program, ProgramError};
use crate::config::{ConfigError, InterpreterConfig};
use crate::interp::bytecodes::{Bytecode, TosState};
use crate::interp::interp_masm::{XDISPATCH, XESP, XMETHOD, XTHREAD};
use crate::interp::patching::{BreakpointTable, BytecodeCell};
use crate::interp::{Interpreter, generate};
use crate::asm::FReg;
use crate::runtime::RuntimeEntry;
use crate::runtime::layout::{BasicType, CODE_BASE, CODE_SIZE, STACK_TOP, method, thread};

#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("code generation failed: {0}")]
    Asm(#[from] AsmError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error("stop: {0}")]
    Stop(String),
    #[error("no method {0}")]
    UnknownMethod(String),
    #[error("bad arguments: {0}")]
    BadArguments(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("heap exhausted")]
    HeapExhausted,
    #[error("{0:#x} is not an object")]
    CorruptObject(u64),
    #[error("corrupt interpreter frame near {0:#x}")]
    CorruptFrame(u64),
    #[error("no field {0}")]
    MissingField(String),
}

/// A Java value crossing the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Uncompressed address; 0 is null.
    Reference(u64),
    Void,
}

impl Value {
    pub const NULL: Value = Value::Reference(0);

    fn fits(&self, ty: BasicType) -> bool {
        match (self, ty) {
            (Value::Int(_), BasicType::Boolean | BasicType::Char | BasicType::Byte | BasicType::Short | BasicType::Int) => {
                true
            }
            (Value::Long(_), BasicType::Long) => true,
            (Value::Float(_), BasicType::Float) => true,
            (Value::Double(_), BasicType::Double) => true,
            (Value::Reference(_), BasicType::Object | BasicType::Array) => true,
            _ => false,
        }
    }

    /// Bits of the value as it sits in a local slot.
    fn slot_bits(&self) -> u64 {
        match *self {
            Value::Int(v) => v as i64 as u64,
            Value::Long(v) => v as u64,
            Value::Float(v) => v.to_bits() as u64,
            Value::Double(v) => v.to_bits(),
            Value::Reference(v) => v,
            Value::Void => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}L"),
            Value::Float(v) => write!(f, "{v}f"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Reference(0) => write!(f, "null"),
            Value::Reference(v) => write!(f, "@{v:#x}"),
            Value::Void => write!(f, "void"),
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(Value),
    /// An exception propagated out of the invoked method.
    Threw {
        class: String,
        message: Option<String>,
        exception: u64,
    },
}

impl Outcome {
    pub fn value(&self) -> Option<Value> {
        match self {
            Outcome::Returned(v) => Some(*v),
            Outcome::Threw { .. } => None,
        }
    }
}

/// One bytecode about to execute, recorded when `trace_bytecodes` is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub method: String,
    pub bci: u32,
    pub bytecode: &'static str,
    /// TOS-state the template was entered in.
    pub state: TosState,
    /// Expression stack slots, counting a cached TOS.
    pub depth: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointHit {
    pub method: String,
    pub bci: u32,
}

/// Space left between the host's locals block and the caller's stack.
const HOST_FRAME_GAP: u64 = 256;

pub struct Machine {
    pub(super) config: InterpreterConfig,
    pub(super) interp: Interpreter,
    pub(super) universe: Universe,
    pub(super) breakpoints: BreakpointTable,
    /// Owner counts of locked objects.
    pub(super) locks: HashMap<u64, u32>,
    pub(super) trace: Vec<TraceEvent>,
    pub(super) breakpoint_hits: Vec<BreakpointHit>,
    pub(super) finalizable: Vec<u64>,
    pub(super) safepoints: u64,
    budget: u64,
    instructions: u64,
}

impl Machine {
    pub fn new(config: InterpreterConfig, program: &Program) -> Result<Self, MachineError> {
        config.validate()?;
        let (_, heap_base) = config.heap_layout();
        let interp = generate(&config, barrier_set_for(config.barrier_set, heap_base), CODE_BASE)?;

        let mem = Arc::new(Memory::new());
        mem.map("code", CODE_BASE, CODE_SIZE)?;
        mem.write_bytes(interp.base(), interp.code())?;
        tracing::debug!(bytes = interp.code().len(), templates = interp.templates().len(), "interpreter generated");

        let universe = Universe::new(mem, &config, &interp, program)?;
        Ok(Self {
            budget: config.instruction_limit,
            config,
            interp,
            universe,
            breakpoints: BreakpointTable::new(),
            locks: HashMap::new(),
            trace: Vec::new(),
            breakpoint_hits: Vec::new(),
            finalizable: Vec::new(),
            safepoints: 0,
            instructions: 0,
        })
    }

    /// Call `target` (`Class.name(descriptor)`) with `args`, the receiver
    /// first for instance methods.
    pub fn invoke(&mut self, target: &str, args: &[Value]) -> Result<Outcome, MachineError> {
        let m = self.resolve_target(target)?;
        self.budget = self.config.instruction_limit;
        tracing::debug!(target, "invoke");
        self.call_method(m, args, None)
    }

    fn resolve_target(&self, target: &str) -> Result<MethodId, MachineError> {
        let r = MethodRef::parse(target)?;
        let k = self
            .universe
            .klass_id(&r.class)
            .ok_or_else(|| MachineError::UnknownMethod(target.to_string()))?;
        self.universe
            .find_method(k, &r.name, &r.descriptor)
            .ok_or_else(|| MachineError::UnknownMethod(target.to_string()))
    }

    /// Run `m` on a fresh hart. `caller` holds the `sp` and `fp` of an
    /// interpreter frame suspended in a runtime call; its stack is left
    /// untouched.
    pub(super) fn call_method(
        &mut self,
        m: MethodId,
        args: &[Value],
        caller: Option<(u64, u64)>,
    ) -> Result<Outcome, MachineError> {
        let info = self.universe.method(m).clone();
        let name = self.universe.method_name(m);

        let mut types = Vec::with_capacity(info.signature.params.len() + 1);
        if !info.is_static() {
            types.push(BasicType::Object);
        }
        types.extend(info.signature.params.iter().copied());
        if types.len() != args.len() {
            return Err(MachineError::BadArguments(format!(
                "{name} takes {} arguments, got {}",
                types.len(),
                args.len()
            )));
        }
        if let Some((i, _)) = types.iter().zip(args).enumerate().find(|(_, (ty, v))| !v.fits(**ty)) {
            return Err(MachineError::BadArguments(format!("{name}: argument {i} is {:?}", args[i])));
        }

        if info.is_abstract() {
            self.throw("java/lang/AbstractMethodError", Some(name))?;
            return self.take_pending();
        }

        let (base, fp) = match caller {
            Some((sp, fp)) => ((sp - HOST_FRAME_GAP) & !15, fp),
            None => (STACK_TOP - HOST_FRAME_GAP, 0),
        };
        let mem = self.universe.memory();
        let mut slot = 0u64;
        for (ty, value) in types.iter().zip(args) {
            let wide = matches!(ty, BasicType::Long | BasicType::Double);
            if wide {
                mem.store_u64(base - 8 * (slot + 1), value.slot_bits())?;
                slot += 2;
            } else {
                mem.store_u64(base - 8 * slot, value.slot_bits())?;
                slot += 1;
            }
        }

        let esp = base - slot * 8;
        let sp = esp & !15;
        let entry = mem.load_u64(info.addr + method::FROM_INTERPRETED_ENTRY as u64)?;
        let mut hart = Hart::new(entry);
        hart.set_reg(Reg::SP, sp);
        hart.set_reg(Reg::FP, fp);
        hart.set_reg(Reg::RA, RuntimeEntry::HostReturn.address());
        hart.set_reg(XESP, esp);
        hart.set_reg(XMETHOD, info.addr);
        hart.set_reg(XTHREAD, self.universe.thread());
        hart.set_reg(XDISPATCH, self.interp.tables().normal(TosState::Btos));

        loop {
            let before = hart.instret;
            let event = hart.run(&mem, self.budget.max(1));
            let retired = hart.instret - before;
            self.instructions += retired;
            self.budget = self.budget.saturating_sub(retired);
            match event? {
                Event::RuntimeCall(RuntimeEntry::HostReturn) => {
                    if hart.reg(Reg::SP) != sp || hart.reg(Reg::FP) != fp {
                        return Err(MachineError::IllegalState(format!(
                            "{name} returned with sp {:#x} fp {:#x}, expected {sp:#x} {fp:#x}",
                            hart.reg(Reg::SP),
                            hart.reg(Reg::FP)
                        )));
                    }
                    return Ok(Outcome::Returned(Self::result(&hart, info.signature.ret)));
                }
                Event::RuntimeCall(RuntimeEntry::ForwardException) => {
                    let frames = self.unwind_frames(hart.reg(Reg::SP), hart.reg(Reg::FP), hart.pc)?;
                    tracing::debug!(method = %name, frames, "exception unwound to host");
                    return self.take_pending();
                }
                Event::RuntimeCall(entry) => {
                    self.handle_runtime_call(entry, &mut hart)?;
                    hart.pc = hart.reg(Reg::RA);
                }
                Event::NullFault { pc, addr } => {
                    tracing::trace!(pc = format_args!("{pc:#x}"), addr = format_args!("{addr:#x}"), "null fault");
                    hart.pc = self.interp.entries().null_pointer;
                }
                Event::Ebreak { pc } => {
                    tracing::trace!(pc = format_args!("{pc:#x}"), "null check trap");
                    hart.pc = self.interp.entries().null_pointer;
                }
                Event::Ecall { pc } => {
                    return Err(MachineError::IllegalState(format!("ecall at {pc:#x}")));
                }
            }
        }
    }

    fn result(hart: &Hart, ty: BasicType) -> Value {
        let a0 = hart.reg(Reg::A0);
        match ty {
            BasicType::Void => Value::Void,
            BasicType::Long => Value::Long(a0 as i64),
            BasicType::Float => Value::Float(hart.f32_reg(FReg::FA0)),
            BasicType::Double => Value::Double(hart.f64_reg(FReg::FA0)),
            BasicType::Object | BasicType::Array => Value::Reference(a0),
            BasicType::Boolean | BasicType::Char | BasicType::Byte | BasicType::Short | BasicType::Int => {
                Value::Int(a0 as i32)
            }
        }
    }

    /// Clear the pending exception and describe it.
    fn take_pending(&mut self) -> Result<Outcome, MachineError> {
        let exception = self.pending_exception()?;
        if exception == 0 {
            return Err(MachineError::IllegalState("exception forwarded without a pending exception".into()));
        }
        self.set_pending_exception(0)?;
        let (class, message) = self.describe_exception(exception)?;
        Ok(Outcome::Threw {
            class,
            message,
            exception,
        })
    }

    // ==================== Breakpoints ====================

    fn bcp(&self, target: &str, bci: u32) -> Result<u64, MachineError> {
        let m = self.resolve_target(target)?;
        let info = self.universe.method(m);
        if bci >= info.code_len as u32 {
            return Err(MachineError::BadArguments(format!("{target} has no bci {bci}")));
        }
        Ok(info.code() + bci as u64)
    }

    pub fn set_breakpoint(&mut self, target: &str, bci: u32) -> Result<(), MachineError> {
        let bcp = self.bcp(target, bci)?;
        self.breakpoints.set(self.universe.mem(), bcp)?;
        Ok(())
    }

    /// Returns whether a breakpoint was set there.
    pub fn clear_breakpoint(&mut self, target: &str, bci: u32) -> Result<bool, MachineError> {
        let bcp = self.bcp(target, bci)?;
        Ok(self.breakpoints.clear(self.universe.mem(), bcp)?)
    }

    pub fn breakpoint_hits(&self) -> &[BreakpointHit] {
        &self.breakpoint_hits
    }

    /// The bytecode at `bci`, looking through a breakpoint.
    pub fn bytecode_at(&self, target: &str, bci: u32) -> Result<Option<Bytecode>, MachineError> {
        let bcp = self.bcp(target, bci)?;
        let code = BytecodeCell::new(bcp).code(self.universe.mem(), &self.breakpoints)?;
        Ok(Bytecode::from_u8(code))
    }

    // ==================== Safepoints ====================

    /// Arm the thread's polling word; the next dispatch through the
    /// safepoint table calls into the runtime.
    pub fn request_safepoint(&self) -> Result<(), MachineError> {
        let word = self.universe.thread() + thread::POLLING_WORD as u64;
        let mem = self.universe.mem();
        mem.store_u64(word, mem.load_u64(word)? | thread::POLL_BIT)?;
        Ok(())
    }

    pub fn safepoints(&self) -> u64 {
        self.safepoints
    }

    // ==================== Inspection ====================

    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    pub fn finalizable(&self) -> &[u64] {
        &self.finalizable
    }

    /// Monitors currently held, by object.
    pub fn held_monitors(&self) -> usize {
        self.locks.len()
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn string_value(&self, value: &Value) -> Result<Option<String>, MachineError> {
        match *value {
            Value::Reference(obj) => self.universe.string_value(obj),
            _ => Ok(None),
        }
    }

    pub fn new_string(&mut self, s: &str) -> Result<Value, MachineError> {
        Ok(Value::Reference(self.universe.new_string(s)?))
    }

    /// Read a static field straight from the class mirror.
    pub fn get_static(&self, class: &str, field: &str) -> Result<Value, MachineError> {
        let missing = || MachineError::MissingField(format!("{class}.{field}"));
        let k = self.universe.klass_id(class).ok_or_else(missing)?;
        let info = self.universe.klass(k);
        let f = info
            .fields
            .iter()
            .find(|f| f.name == field && f.is_static())
            .ok_or_else(missing)?;
        let addr = info.mirror + f.offset as u64;
        let mem = self.universe.mem();
        Ok(match f.ty {
            BasicType::Boolean => Value::Int(mem.load_u8(addr)? as i32),
            BasicType::Byte => Value::Int(mem.load_u8(addr)? as i8 as i32),
            BasicType::Char => Value::Int(mem.load_u16(addr)? as i32),
            BasicType::Short => Value::Int(mem.load_u16(addr)? as i16 as i32),
            BasicType::Int => Value::Int(mem.load_u32(addr)? as i32),
            BasicType::Long => Value::Long(mem.load_u64(addr)? as i64),
            BasicType::Float => Value::Float(f32::from_bits(mem.load_u32(addr)?)),
            BasicType::Double => Value::Double(f64::from_bits(mem.load_u64(addr)?)),
            BasicType::Object | BasicType::Array => Value::Reference(self.universe.load_oop(addr)?),
            BasicType::Void => Value::Void,
        })
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interp
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn memory(&self) -> Arc<Memory> {
        self.universe.memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(source: &str) -> Machine {
        let program = Program::from_toml(source).unwrap();
        Machine::new(InterpreterConfig::default(), &program).unwrap()
    }

    const ADD: &str = r#"
        [[class]]
        name = "Calc"

        [[class.method]]
        name = "add"
        descriptor = "(IJ)J"
        flags = ["static"]
        code = """
            iload_0
            i2l
            lload_1
            ladd
            lreturn
        """
    "#;

    #[test]
    fn test_invoke_static_with_wide_argument() {
        let mut vm = machine(ADD);
        let out = vm.invoke("Calc.add(IJ)J", &[Value::Int(-2), Value::Long(1 << 40)]).unwrap();
        assert_eq!(out, Outcome::Returned(Value::Long((1 << 40) - 2)));
        assert!(vm.instructions() > 0);
    }

    #[test]
    fn test_argument_checks() {
        let mut vm = machine(ADD);
        let err = vm.invoke("Calc.add(IJ)J", &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, MachineError::BadArguments(_)));
        let err = vm.invoke("Calc.add(IJ)J", &[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert!(matches!(err, MachineError::BadArguments(_)));
        let err = vm.invoke("Calc.sub(IJ)J", &[]).unwrap_err();
        assert!(matches!(err, MachineError::UnknownMethod(_)));
    }

    #[test]
    fn test_instruction_limit() {
        let mut vm = machine(
            r#"
            [[class]]
            name = "Spin"

            [[class.method]]
            name = "forever"
            descriptor = "()V"
            flags = ["static"]
            code = """
            top:
                goto top
            """
            "#,
        );
        vm.config.instruction_limit = 10_000;
        let err = vm.invoke("Spin.forever()V", &[]).unwrap_err();
        assert!(matches!(err, MachineError::Sim(SimError::InstructionLimit(_))));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(5).to_string(), "5");
        assert_eq!(Value::Long(5).to_string(), "5L");
        assert_eq!(Value::NULL.to_string(), "null");
        assert_eq!(
            serde_json::to_string(&Value::Int(7)).unwrap(),
            r#"{"type":"int","value":7}"#
        );
    }
}
