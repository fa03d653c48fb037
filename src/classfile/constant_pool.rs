//! Constant pools built while assembling a class.

use thiserror::Error;

use crate::interp::ConstantPoolView;
use crate::runtime::layout::tag;

pub const METHOD_HANDLE_CLASS: &str = "java/lang/invoke/MethodHandle";

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Slot 0 and the second slot of a long or double.
    Unused,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name: u16 },
    String { utf8: u16 },
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    InvokeDynamic { name_and_type: u16 },
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Unused => 0,
            Constant::Utf8(_) => tag::UTF8,
            Constant::Integer(_) => tag::INTEGER,
            Constant::Float(_) => tag::FLOAT,
            Constant::Long(_) => tag::LONG,
            Constant::Double(_) => tag::DOUBLE,
            Constant::Class { .. } => tag::CLASS,
            Constant::String { .. } => tag::STRING,
            Constant::Fieldref { .. } => tag::FIELDREF,
            Constant::Methodref { .. } => tag::METHODREF,
            Constant::InterfaceMethodref { .. } => tag::INTERFACE_METHODREF,
            Constant::NameAndType { .. } => tag::NAME_AND_TYPE,
            Constant::InvokeDynamic { .. } => tag::INVOKE_DYNAMIC,
        }
    }

    fn same(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("constant pool exceeds 65535 entries")]
pub struct PoolOverflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
    CallSite,
}

/// A symbolic member reference read back from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    /// Empty for call sites.
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unused],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    pub fn entries(&self) -> &[Constant] {
        &self.entries
    }

    fn add(&mut self, constant: Constant) -> Result<u16, PoolOverflow> {
        if let Some(i) = self.entries.iter().position(|c| c.same(&constant)) {
            return Ok(i as u16);
        }
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        let index = self.entries.len();
        if index + usize::from(wide) > u16::MAX as usize {
            return Err(PoolOverflow);
        }
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unused);
        }
        Ok(index as u16)
    }

    pub fn utf8(&mut self, s: &str) -> Result<u16, PoolOverflow> {
        self.add(Constant::Utf8(s.to_string()))
    }

    pub fn integer(&mut self, v: i32) -> Result<u16, PoolOverflow> {
        self.add(Constant::Integer(v))
    }

    pub fn float(&mut self, v: f32) -> Result<u16, PoolOverflow> {
        self.add(Constant::Float(v))
    }

    pub fn long(&mut self, v: i64) -> Result<u16, PoolOverflow> {
        self.add(Constant::Long(v))
    }

    pub fn double(&mut self, v: f64) -> Result<u16, PoolOverflow> {
        self.add(Constant::Double(v))
    }

    pub fn class(&mut self, name: &str) -> Result<u16, PoolOverflow> {
        let name = self.utf8(name)?;
        self.add(Constant::Class { name })
    }

    pub fn string(&mut self, s: &str) -> Result<u16, PoolOverflow> {
        let utf8 = self.utf8(s)?;
        self.add(Constant::String { utf8 })
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, PoolOverflow> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.add(Constant::NameAndType { name, descriptor })
    }

    pub fn member(&mut self, kind: MemberKind, class: &str, name: &str, descriptor: &str) -> Result<u16, PoolOverflow> {
        let name_and_type = self.name_and_type(name, descriptor)?;
        if kind == MemberKind::CallSite {
            return self.add(Constant::InvokeDynamic { name_and_type });
        }
        let class = self.class(class)?;
        self.add(match kind {
            MemberKind::Field => Constant::Fieldref { class, name_and_type },
            MemberKind::Method => Constant::Methodref { class, name_and_type },
            _ => Constant::InterfaceMethodref { class, name_and_type },
        })
    }

    pub fn utf8_at(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Class { name } => self.utf8_at(*name),
            _ => None,
        }
    }

    pub fn string_at(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::String { utf8 } => self.utf8_at(*utf8),
            _ => None,
        }
    }

    fn name_and_type_at(&self, index: u16) -> Option<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => Some((self.utf8_at(*name)?, self.utf8_at(*descriptor)?)),
            _ => None,
        }
    }

    pub fn member_ref(&self, index: u16) -> Option<MemberRef<'_>> {
        let (kind, class, nat) = match *self.get(index)? {
            Constant::Fieldref { class, name_and_type } => (MemberKind::Field, Some(class), name_and_type),
            Constant::Methodref { class, name_and_type } => (MemberKind::Method, Some(class), name_and_type),
            Constant::InterfaceMethodref { class, name_and_type } => {
                (MemberKind::InterfaceMethod, Some(class), name_and_type)
            }
            Constant::InvokeDynamic { name_and_type } => (MemberKind::CallSite, None, name_and_type),
            _ => return None,
        };
        let class = match class {
            Some(c) => self.class_name(c)?,
            None => "",
        };
        let (name, descriptor) = self.name_and_type_at(nat)?;
        Some(MemberRef {
            kind,
            class,
            name,
            descriptor,
        })
    }
}

impl ConstantPoolView for ConstantPool {
    fn tag(&self, index: u16) -> Option<u8> {
        match self.get(index)? {
            Constant::Class { .. } => Some(tag::UNRESOLVED_CLASS),
            c => Some(c.tag()),
        }
    }

    fn is_signature_polymorphic(&self, index: u16) -> bool {
        matches!(
            self.member_ref(index),
            Some(MemberRef { kind: MemberKind::Method, class: METHOD_HANDLE_CLASS, name: "invoke" | "invokeExact", .. })
        )
    }
}
