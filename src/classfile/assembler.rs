//! Text assembler for method bodies.
//!
//! One instruction per line, mnemonics as in the class file format:
//!
//! ```text
//! loop:                          // labels end in ':'
//!     iload_1
//!     ifle done
//!     iinc 1 -1
//!     goto loop
//! done:
//!     ldc "text"                 // also: ldc 42, ldc 1.5, ldc class Foo
//!     ldc2_w 10L                 // also: ldc2_w 2.5
//!     getfield Point.x:I
//!     invokevirtual Point.sum()I
//!     invokedynamic make(I)Ljava/lang/Object;
//!     tableswitch 0 default=Ld L0 L1
//!     lookupswitch default=Ld 1:L1 10:L2
//!     newarray int
//!     multianewarray [[I 2
//!     wide iinc 300 1000
//! ```
//!
//! Branch offsets, switch padding, the `invokeinterface` count byte and the
//! maximum stack depth are computed by the assembler.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::constant_pool::{ConstantPool, MemberKind, PoolOverflow};
use super::descriptor::{MethodDescriptor, field_type, newarray_type};
use crate::interp::bytecodes::Bytecode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssembleError {
    #[error("{span}: unknown instruction `{name}`")]
    UnknownInstruction { span: Span, name: String },
    #[error("{span}: {message}")]
    Syntax { span: Span, message: String },
    #[error("{span}: undefined label `{label}`")]
    UndefinedLabel { span: Span, label: String },
    #[error("{span}: duplicate label `{label}`")]
    DuplicateLabel { span: Span, label: String },
    #[error("{span}: branch to `{label}` is out of range")]
    BranchOutOfRange { span: Span, label: String },
    #[error("{span}: stack underflow")]
    StackUnderflow { span: Span },
    #[error("{span}: inconsistent stack depth at branch target")]
    InconsistentStack { span: Span },
    #[error("method code exceeds 65535 bytes")]
    CodeTooLarge,
    #[error(transparent)]
    Pool(#[from] PoolOverflow),
}

fn syntax(span: Span, message: impl Into<String>) -> AssembleError {
    AssembleError::Syntax {
        span,
        message: message.into(),
    }
}

/// An assembled method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMethod {
    pub code: Vec<u8>,
    pub max_locals: u16,
    pub max_stack: u16,
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    quoted: bool,
    span: Span,
}

fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token>, AssembleError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some(&(col, ch)) = chars.peek() {
        let span = Span::new(line_no, col + 1);
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, '\\')) => match chars.next() {
                        Some((_, 'n')) => text.push('\n'),
                        Some((_, 't')) => text.push('\t'),
                        Some((_, c @ ('"' | '\\'))) => text.push(c),
                        _ => return Err(syntax(span, "bad escape in string")),
                    },
                    Some((_, c)) => text.push(c),
                    None => return Err(syntax(span, "unterminated string")),
                }
            }
            tokens.push(Token {
                text,
                quoted: true,
                span,
            });
        } else if line[col..].starts_with("//") {
            break;
        } else {
            let mut text = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token {
                text,
                quoted: false,
                span,
            });
        }
    }
    Ok(tokens)
}

fn parse_int(tok: &Token) -> Result<i64, AssembleError> {
    let t = tok.text.as_str();
    let (neg, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| syntax(tok.span, format!("expected an integer, found `{t}`")))?;
    Ok(if neg { -value } else { value })
}

fn int_in<T: TryFrom<i64>>(tok: &Token) -> Result<T, AssembleError> {
    T::try_from(parse_int(tok)?).map_err(|_| syntax(tok.span, format!("`{}` is out of range", tok.text)))
}

fn is_label(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Splits `Class.name` at the last dot.
fn split_member(text: &str) -> Option<(&str, &str)> {
    let dot = text.rfind('.')?;
    let (class, name) = (&text[..dot], &text[dot + 1..]);
    (!class.is_empty() && !name.is_empty()).then_some((class, name))
}

#[derive(Debug, Clone)]
enum Flow {
    Next,
    /// Conditional branch, falls through.
    Branch(Vec<(String, Span)>),
    /// Unconditional transfer to one of the targets.
    Jump(Vec<(String, Span)>),
    Jsr(String, Span),
    Stop,
}

#[derive(Debug, Clone)]
struct Insn {
    bci: usize,
    delta: i32,
    flow: Flow,
    span: Span,
}

struct Fixup {
    at: usize,
    from: usize,
    wide: bool,
    label: String,
    span: Span,
}

struct Assembler<'a> {
    pool: &'a mut ConstantPool,
    code: Vec<u8>,
    labels: HashMap<String, usize>,
    fixups: Vec<Fixup>,
    insns: Vec<Insn>,
    max_locals: u16,
}

/// Slots a load or store of this kind occupies.
fn local_width(bc: Bytecode) -> u16 {
    use Bytecode::*;
    match bc {
        Lload | Dload | Lstore | Dstore => 2,
        _ => 1,
    }
}

/// Locals named by the `_<n>` forms.
fn implicit_local(bc: Bytecode) -> Option<(u16, u16)> {
    let c = bc as u8;
    let base = if (Bytecode::Iload0 as u8..=Bytecode::Aload3 as u8).contains(&c) {
        Bytecode::Iload0 as u8
    } else if (Bytecode::Istore0 as u8..=Bytecode::Astore3 as u8).contains(&c) {
        Bytecode::Istore0 as u8
    } else {
        return None;
    };
    let group = (c - base) / 4;
    let index = ((c - base) % 4) as u16;
    let width = if group == 1 || group == 3 { 2 } else { 1 };
    Some((index, width))
}

impl<'a> Assembler<'a> {
    fn touch_local(&mut self, index: u16, width: u16) {
        self.max_locals = self.max_locals.max(index.saturating_add(width));
    }

    fn emit_u2(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    fn emit_i4(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    fn label_ref(&mut self, from: usize, wide: bool, tok: &Token) -> Result<(String, Span), AssembleError> {
        if !is_label(&tok.text) {
            return Err(syntax(tok.span, format!("expected a label, found `{}`", tok.text)));
        }
        self.fixups.push(Fixup {
            at: self.code.len(),
            from,
            wide,
            label: tok.text.clone(),
            span: tok.span,
        });
        if wide {
            self.emit_i4(0);
        } else {
            self.emit_u2(0);
        }
        Ok((tok.text.clone(), tok.span))
    }

    fn line(&mut self, line_no: usize, line: &str) -> Result<(), AssembleError> {
        let tokens = tokenize(line_no, line)?;
        let mut rest = tokens.as_slice();
        while let Some((first, tail)) = rest.split_first() {
            let Some(name) = first.text.strip_suffix(':').filter(|n| !first.quoted && is_label(n)) else {
                break;
            };
            if self.labels.insert(name.to_string(), self.code.len()).is_some() {
                return Err(AssembleError::DuplicateLabel {
                    span: first.span,
                    label: name.to_string(),
                });
            }
            rest = tail;
        }
        let Some((mnemonic, operands)) = rest.split_first() else {
            return Ok(());
        };
        self.instruction(mnemonic, operands)
    }

    fn operand<'t>(&self, mnemonic: &Token, operands: &'t [Token], i: usize) -> Result<&'t Token, AssembleError> {
        operands
            .get(i)
            .ok_or_else(|| syntax(mnemonic.span, format!("`{}` needs more operands", mnemonic.text)))
    }

    fn expect_count(&self, mnemonic: &Token, operands: &[Token], n: usize) -> Result<(), AssembleError> {
        match operands.get(n) {
            Some(extra) => Err(syntax(extra.span, format!("unexpected operand `{}`", extra.text))),
            None if operands.len() < n => Err(syntax(
                mnemonic.span,
                format!("`{}` needs {n} operand(s)", mnemonic.text),
            )),
            None => Ok(()),
        }
    }

    fn single_word_constant(&mut self, operands: &[Token], mnemonic: &Token) -> Result<u16, AssembleError> {
        let tok = self.operand(mnemonic, operands, 0)?;
        if tok.quoted {
            self.expect_count(mnemonic, operands, 1)?;
            return Ok(self.pool.string(&tok.text)?);
        }
        if tok.text == "class" {
            self.expect_count(mnemonic, operands, 2)?;
            return Ok(self.pool.class(&operands[1].text)?);
        }
        self.expect_count(mnemonic, operands, 1)?;
        let t = tok.text.trim_end_matches(['f', 'F']);
        let is_float = t.len() != tok.text.len() || t.contains('.') || t.contains('e') || t.contains("NaN");
        if is_float && !t.starts_with("0x") {
            let v: f32 = t
                .parse()
                .map_err(|_| syntax(tok.span, format!("bad float constant `{}`", tok.text)))?;
            Ok(self.pool.float(v)?)
        } else {
            Ok(self.pool.integer(int_in(tok)?)?)
        }
    }

    fn double_word_constant(&mut self, tok: &Token) -> Result<u16, AssembleError> {
        if let Some(t) = tok.text.strip_suffix(['L', 'l']) {
            let t = Token {
                text: t.to_string(),
                ..tok.clone()
            };
            return Ok(self.pool.long(parse_int(&t)?)?);
        }
        let t = tok.text.trim_end_matches(['d', 'D']);
        if t.len() != tok.text.len() || t.contains('.') || t.contains('e') || t.contains("NaN") || t.contains("inf") {
            let v: f64 = t
                .parse()
                .map_err(|_| syntax(tok.span, format!("bad double constant `{}`", tok.text)))?;
            return Ok(self.pool.double(v)?);
        }
        Ok(self.pool.long(parse_int(tok)?)?)
    }

    fn instruction(&mut self, mnemonic: &Token, operands: &[Token]) -> Result<(), AssembleError> {
        let span = mnemonic.span;
        let bc = Bytecode::from_name(&mnemonic.text)
            .filter(|b| b.is_java_code())
            .ok_or_else(|| AssembleError::UnknownInstruction {
                span,
                name: mnemonic.text.clone(),
            })?;
        let bci = self.code.len();
        self.code.push(bc as u8);
        let mut delta = bc.depth();
        let mut flow = Flow::Next;

        use Bytecode::*;
        match bc {
            Wide => return self.wide(mnemonic, operands, bci),
            Bipush => {
                self.expect_count(mnemonic, operands, 1)?;
                let v: i8 = int_in(&operands[0])?;
                self.code.push(v as u8);
            }
            Sipush => {
                self.expect_count(mnemonic, operands, 1)?;
                let v: i16 = int_in(&operands[0])?;
                self.code.extend_from_slice(&v.to_be_bytes());
            }
            Ldc | LdcW => {
                let index = self.single_word_constant(operands, mnemonic)?;
                if bc == Ldc {
                    let narrow = u8::try_from(index).map_err(|_| syntax(span, "constant index above 255, use ldc_w"))?;
                    self.code.push(narrow);
                } else {
                    self.emit_u2(index);
                }
            }
            Ldc2W => {
                self.expect_count(mnemonic, operands, 1)?;
                let index = self.double_word_constant(&operands[0])?;
                self.emit_u2(index);
            }
            Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore | Dstore | Astore | Ret => {
                self.expect_count(mnemonic, operands, 1)?;
                let index: u8 = int_in(&operands[0])
                    .map_err(|_| syntax(operands[0].span, "local index above 255, use wide"))?;
                self.touch_local(index as u16, local_width(bc));
                self.code.push(index);
                if bc == Ret {
                    flow = Flow::Stop;
                }
            }
            Iinc => {
                self.expect_count(mnemonic, operands, 2)?;
                let index: u8 = int_in(&operands[0])?;
                let value: i8 = int_in(&operands[1])?;
                self.touch_local(index as u16, 1);
                self.code.push(index);
                self.code.push(value as u8);
            }
            Tableswitch => {
                self.align_switch();
                let low: i32 = int_in(self.operand(mnemonic, operands, 0)?)?;
                let default = self.operand(mnemonic, operands, 1)?;
                let default = self.default_label(default)?;
                let mut targets = vec![self.label_ref(bci, true, &default)?];
                let cases = &operands[2..];
                if cases.is_empty() {
                    return Err(syntax(span, "tableswitch needs at least one case"));
                }
                let high = low
                    .checked_add(cases.len() as i32 - 1)
                    .ok_or_else(|| syntax(span, "tableswitch range overflows"))?;
                self.emit_i4(low);
                self.emit_i4(high);
                for case in cases {
                    targets.push(self.label_ref(bci, true, case)?);
                }
                flow = Flow::Jump(targets);
            }
            Lookupswitch => {
                self.align_switch();
                let default = self.operand(mnemonic, operands, 0)?;
                let default = self.default_label(default)?;
                let mut targets = vec![self.label_ref(bci, true, &default)?];
                let mut pairs = Vec::new();
                for tok in &operands[1..] {
                    let Some((key, label)) = tok.text.split_once(':') else {
                        return Err(syntax(tok.span, "expected `key:label`"));
                    };
                    let key_tok = Token {
                        text: key.to_string(),
                        ..tok.clone()
                    };
                    let label_tok = Token {
                        text: label.to_string(),
                        ..tok.clone()
                    };
                    pairs.push((int_in::<i32>(&key_tok)?, label_tok));
                }
                pairs.sort_by_key(|(k, _)| *k);
                if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
                    return Err(syntax(span, "duplicate lookupswitch key"));
                }
                self.emit_i4(pairs.len() as i32);
                for (key, label) in &pairs {
                    self.emit_i4(*key);
                    targets.push(self.label_ref(bci, true, label)?);
                }
                flow = Flow::Jump(targets);
            }
            Getstatic | Putstatic | Getfield | Putfield => {
                self.expect_count(mnemonic, operands, 1)?;
                let tok = &operands[0];
                let bad = || syntax(tok.span, format!("expected `Class.field:Descriptor`, found `{}`", tok.text));
                let (member, desc) = tok.text.split_once(':').ok_or_else(bad)?;
                let (class, name) = split_member(member).ok_or_else(bad)?;
                let ty = field_type(desc).ok_or_else(bad)?;
                let index = self.pool.member(MemberKind::Field, class, name, desc)?;
                self.emit_u2(index);
                let slots = ty.slots() as i32;
                delta = Some(match bc {
                    Getstatic => slots,
                    Putstatic => -slots,
                    Getfield => slots - 1,
                    _ => -slots - 1,
                });
            }
            Invokevirtual | Invokespecial | Invokestatic | Invokeinterface => {
                self.expect_count(mnemonic, operands, 1)?;
                let tok = &operands[0];
                let bad = || syntax(tok.span, format!("expected `Class.method(Descriptor)`, found `{}`", tok.text));
                let paren = tok.text.find('(').ok_or_else(bad)?;
                let (class, name) = split_member(&tok.text[..paren]).ok_or_else(bad)?;
                let desc = &tok.text[paren..];
                let parsed = MethodDescriptor::parse(desc).ok_or_else(bad)?;
                let kind = if bc == Invokeinterface {
                    MemberKind::InterfaceMethod
                } else {
                    MemberKind::Method
                };
                let index = self.pool.member(kind, class, name, desc)?;
                self.emit_u2(index);
                let receiver = i32::from(bc != Invokestatic);
                if bc == Invokeinterface {
                    self.code.push((parsed.param_slots() + 1) as u8);
                    self.code.push(0);
                }
                delta = Some(parsed.ret.slots() as i32 - parsed.param_slots() as i32 - receiver);
            }
            Invokedynamic => {
                self.expect_count(mnemonic, operands, 1)?;
                let tok = &operands[0];
                let bad = || syntax(tok.span, format!("expected `name(Descriptor)`, found `{}`", tok.text));
                let paren = tok.text.find('(').filter(|&p| p > 0).ok_or_else(bad)?;
                let desc = &tok.text[paren..];
                let parsed = MethodDescriptor::parse(desc).ok_or_else(bad)?;
                let index = self.pool.member(MemberKind::CallSite, "", &tok.text[..paren], desc)?;
                self.emit_u2(index);
                self.emit_u2(0);
                delta = Some(parsed.ret.slots() as i32 - parsed.param_slots() as i32);
            }
            New | Anewarray | Checkcast | Instanceof => {
                self.expect_count(mnemonic, operands, 1)?;
                let index = self.pool.class(&operands[0].text)?;
                self.emit_u2(index);
            }
            Newarray => {
                self.expect_count(mnemonic, operands, 1)?;
                let ty = newarray_type(&operands[0].text)
                    .ok_or_else(|| syntax(operands[0].span, format!("unknown array type `{}`", operands[0].text)))?;
                self.code.push(ty as u8);
            }
            Multianewarray => {
                self.expect_count(mnemonic, operands, 2)?;
                let index = self.pool.class(&operands[0].text)?;
                let dims: u8 = int_in(&operands[1])?;
                if dims == 0 {
                    return Err(syntax(operands[1].span, "multianewarray needs at least one dimension"));
                }
                self.emit_u2(index);
                self.code.push(dims);
                delta = Some(1 - dims as i32);
            }
            _ if bc.is_branch() => {
                self.expect_count(mnemonic, operands, 1)?;
                let wide = matches!(bc, GotoW | JsrW);
                let target = self.label_ref(bci, wide, &operands[0])?;
                flow = match bc {
                    Goto | GotoW => Flow::Jump(vec![target]),
                    Jsr | JsrW => Flow::Jsr(target.0, target.1),
                    _ => Flow::Branch(vec![target]),
                };
            }
            _ => {
                self.expect_count(mnemonic, operands, 0)?;
                if let Some((index, width)) = implicit_local(bc) {
                    self.touch_local(index, width);
                }
                if bc.is_return() || bc == Athrow {
                    flow = Flow::Stop;
                }
            }
        }
        self.insns.push(Insn {
            bci,
            delta: delta.unwrap_or(0),
            flow,
            span,
        });
        Ok(())
    }

    fn wide(&mut self, mnemonic: &Token, operands: &[Token], bci: usize) -> Result<(), AssembleError> {
        let inner_tok = self.operand(mnemonic, operands, 0)?;
        let inner = Bytecode::from_name(&inner_tok.text)
            .filter(|b| b.wide_length() != 0)
            .ok_or_else(|| syntax(inner_tok.span, format!("`{}` has no wide form", inner_tok.text)))?;
        self.code.push(inner as u8);
        let operands = &operands[1..];
        let index: u16 = int_in(self.operand(mnemonic, operands, 0)?)?;
        self.emit_u2(index);
        let mut flow = Flow::Next;
        if inner == Bytecode::Iinc {
            self.expect_count(mnemonic, operands, 2)?;
            let value: i16 = int_in(&operands[1])?;
            self.code.extend_from_slice(&value.to_be_bytes());
            self.touch_local(index, 1);
        } else {
            self.expect_count(mnemonic, operands, 1)?;
            self.touch_local(index, local_width(inner));
            if inner == Bytecode::Ret {
                flow = Flow::Stop;
            }
        }
        self.insns.push(Insn {
            bci,
            delta: inner.depth().unwrap_or(0),
            flow,
            span: mnemonic.span,
        });
        Ok(())
    }

    fn align_switch(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
    }

    fn default_label(&self, tok: &Token) -> Result<Token, AssembleError> {
        let label = tok
            .text
            .strip_prefix("default=")
            .ok_or_else(|| syntax(tok.span, "expected `default=<label>`"))?;
        Ok(Token {
            text: label.to_string(),
            ..tok.clone()
        })
    }

    fn resolve(&self, label: &str, span: Span) -> Result<usize, AssembleError> {
        self.labels.get(label).copied().ok_or_else(|| AssembleError::UndefinedLabel {
            span,
            label: label.to_string(),
        })
    }

    fn finish(mut self, arg_slots: u16) -> Result<AssembledMethod, AssembleError> {
        if self.code.len() > u16::MAX as usize {
            return Err(AssembleError::CodeTooLarge);
        }
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.resolve(&fixup.label, fixup.span)?;
            let offset = target as i64 - fixup.from as i64;
            if fixup.wide {
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&(offset as i32).to_be_bytes());
            } else {
                let narrow = i16::try_from(offset).map_err(|_| AssembleError::BranchOutOfRange {
                    span: fixup.span,
                    label: fixup.label.clone(),
                })?;
                self.code[fixup.at..fixup.at + 2].copy_from_slice(&narrow.to_be_bytes());
            }
        }
        let max_stack = self.max_stack()?;
        Ok(AssembledMethod {
            code: self.code,
            max_locals: self.max_locals.max(arg_slots),
            max_stack,
        })
    }

    /// Propagates stack depths along control flow.
    fn max_stack(&self) -> Result<u16, AssembleError> {
        let by_bci: HashMap<usize, usize> = self.insns.iter().enumerate().map(|(i, insn)| (insn.bci, i)).collect();
        let mut depth: Vec<Option<i32>> = vec![None; self.insns.len()];
        let mut work = Vec::new();
        let mut max = 0;
        if !self.insns.is_empty() {
            depth[0] = Some(0);
            work.push(0usize);
        }
        while let Some(i) = work.pop() {
            let insn = &self.insns[i];
            let before = depth[i].unwrap_or(0);
            let after = before + insn.delta;
            if after < 0 {
                return Err(AssembleError::StackUnderflow { span: insn.span });
            }
            max = max.max(before).max(after);

            let mut successors = Vec::new();
            let mut visit = |label: &str, span: Span, d: i32| -> Result<(), AssembleError> {
                let bci = self.resolve(label, span)?;
                successors.push((*by_bci.get(&bci).ok_or_else(|| syntax(span, "branch into the end of code"))?, d));
                Ok(())
            };
            match &insn.flow {
                Flow::Next => {}
                Flow::Branch(targets) | Flow::Jump(targets) => {
                    for (label, span) in targets {
                        visit(label, *span, after)?;
                    }
                }
                Flow::Jsr(label, span) => visit(label, *span, after)?,
                Flow::Stop => {}
            }
            let falls_through = match insn.flow {
                Flow::Next | Flow::Branch(_) => Some(after),
                Flow::Jsr(..) => Some(before),
                _ => None,
            };
            if let Some(d) = falls_through {
                if i + 1 < self.insns.len() {
                    successors.push((i + 1, d));
                }
            }
            for (next, d) in successors {
                match depth[next] {
                    None => {
                        depth[next] = Some(d);
                        work.push(next);
                    }
                    Some(seen) if seen != d => {
                        return Err(AssembleError::InconsistentStack {
                            span: self.insns[next].span,
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        u16::try_from(max).map_err(|_| AssembleError::CodeTooLarge)
    }
}

/// Assembles `source` into bytecode, adding its constants to `pool`.
/// `arg_slots` counts the receiver and parameters.
pub fn assemble(source: &str, pool: &mut ConstantPool, arg_slots: u16) -> Result<AssembledMethod, AssembleError> {
    let mut asm = Assembler {
        pool,
        code: Vec::new(),
        labels: HashMap::new(),
        fixups: Vec::new(),
        insns: Vec::new(),
        max_locals: 0,
    };
    for (i, line) in source.lines().enumerate() {
        asm.line(i + 1, line)?;
    }
    asm.finish(arg_slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::constant_pool::Constant;
    use crate::interp::bytecodes::length_at;

    fn asm(source: &str) -> (AssembledMethod, ConstantPool) {
        let mut pool = ConstantPool::new();
        let m = assemble(source, &mut pool, 0).unwrap();
        (m, pool)
    }

    #[test]
    fn test_simple_body() {
        let (m, _) = asm("iconst_2\n iconst_3 // comment\n iadd\n ireturn\n");
        assert_eq!(m.code, vec![0x05, 0x06, 0x60, 0xac]);
        assert_eq!(m.max_stack, 2);
        assert_eq!(m.max_locals, 0);
    }

    #[test]
    fn test_branches_and_locals() {
        let (m, _) = asm(
            "
            iconst_0
            istore_1
        loop:
            iload_1
            bipush 10
            if_icmpge done
            iinc 1 1
            goto loop
        done: iload_1
            ireturn
            ",
        );
        // if_icmpge at bci 5 jumps to done (bci 14)
        assert_eq!(&m.code[5..8], &[0xa2, 0x00, 0x09]);
        // goto at bci 11 jumps back to loop (bci 2)
        assert_eq!(&m.code[11..14], &[0xa7, 0xff, 0xf7]);
        assert_eq!(m.max_locals, 2);
        assert_eq!(m.max_stack, 2);
    }

    #[test]
    fn test_constants() {
        let (m, pool) = asm("ldc \"hi\"\n ldc 1.5\n pop\n pop\n ldc2_w 7L\n ldc2_w 2.5\n pop2\n pop2\n return");
        let s = m.code[1] as u16;
        assert_eq!(pool.string_at(s), Some("hi"));
        assert_eq!(pool.get(m.code[3] as u16), Some(&Constant::Float(1.5)));
        let l = u16::from_be_bytes([m.code[7], m.code[8]]);
        assert_eq!(pool.get(l), Some(&Constant::Long(7)));
        let d = u16::from_be_bytes([m.code[10], m.code[11]]);
        assert_eq!(pool.get(d), Some(&Constant::Double(2.5)));
        assert_eq!(m.max_stack, 4);
    }

    #[test]
    fn test_switch_padding_and_targets() {
        let (m, _) = asm(
            "
            iload_0
            tableswitch 1 default=D A B
        A:  iconst_1
            ireturn
        B:  iconst_2
            ireturn
        D:  iconst_0
            ireturn
            ",
        );
        assert_eq!(m.code[1], Bytecode::Tableswitch as u8);
        assert_eq!(&m.code[2..4], &[0, 0]);
        assert_eq!(length_at(&m.code, 1), Some(23));
        let default = i32::from_be_bytes([m.code[4], m.code[5], m.code[6], m.code[7]]);
        assert_eq!(default, 28 - 1);
        assert_eq!(m.max_locals, 1);

        let (m, _) = asm("iload_0\n lookupswitch default=D 10:B 1:A\nA: iconst_1\n ireturn\nB: iconst_2\n ireturn\nD: iconst_0\n ireturn");
        // pairs are sorted by key
        let first_key = i32::from_be_bytes([m.code[12], m.code[13], m.code[14], m.code[15]]);
        assert_eq!(first_key, 1);
    }

    #[test]
    fn test_member_references() {
        let (m, pool) = asm(
            "
            aload_0
            getfield Point.x:I
            aload_0
            aload_1
            invokeinterface Shape.scale(Ljava/lang/Object;)I
            iadd
            invokedynamic add(I)J
            pop2
            return
            ",
        );
        let field = pool.member_ref(u16::from_be_bytes([m.code[2], m.code[3]])).unwrap();
        assert_eq!((field.class, field.name, field.descriptor), ("Point", "x", "I"));
        assert_eq!(m.code[6], Bytecode::Invokeinterface as u8);
        assert_eq!(&m.code[9..11], &[2, 0]);
        assert_eq!(m.code[12], Bytecode::Invokedynamic as u8);
        let site = pool.member_ref(u16::from_be_bytes([m.code[13], m.code[14]])).unwrap();
        assert_eq!((site.kind, site.name, site.descriptor), (MemberKind::CallSite, "add", "(I)J"));
        assert_eq!(m.max_stack, 3);
        assert_eq!(m.max_locals, 2);
    }

    #[test]
    fn test_wide_forms() {
        let (m, _) = asm("wide iinc 300 1000\n wide lload 400\n pop2\n return");
        assert_eq!(&m.code[..6], &[0xc4, 0x84, 0x01, 0x2c, 0x03, 0xe8]);
        assert_eq!(length_at(&m.code, 0), Some(6));
        assert_eq!(length_at(&m.code, 6), Some(4));
        assert_eq!(m.max_locals, 402);
    }

    #[test]
    fn test_errors() {
        let mut pool = ConstantPool::new();
        let err = assemble("iadd2", &mut pool, 0).unwrap_err();
        assert!(matches!(err, AssembleError::UnknownInstruction { span: Span { line: 1, column: 1 }, .. }));

        let err = assemble("nop\n  goto nowhere", &mut pool, 0).unwrap_err();
        assert!(matches!(err, AssembleError::UndefinedLabel { span: Span { line: 2, column: 8 }, .. }));

        let err = assemble("iadd\nireturn", &mut pool, 0).unwrap_err();
        assert!(matches!(err, AssembleError::StackUnderflow { .. }));

        let err = assemble("bipush 300", &mut pool, 0).unwrap_err();
        assert!(matches!(err, AssembleError::Syntax { .. }));

        let err = assemble("fast_iload 1", &mut pool, 0).unwrap_err();
        assert!(matches!(err, AssembleError::UnknownInstruction { .. }));

        let err = assemble("a: nop\na: return", &mut pool, 0).unwrap_err();
        assert!(matches!(err, AssembleError::DuplicateLabel { .. }));
        assert_eq!(err.to_string(), "2:1: duplicate label `a`");
    }
}
