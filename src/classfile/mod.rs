//! Programs: TOML manifests whose method bodies are bytecode assembly,
//! assembled into classes with their own constant pools.

pub mod assembler;
pub mod constant_pool;
pub mod descriptor;
pub mod manifest;

pub use assembler::{AssembleError, AssembledMethod, Span, assemble};
pub use constant_pool::{Constant, ConstantPool, MemberKind, MemberRef};
pub use descriptor::MethodDescriptor;
pub use manifest::{CallSiteDef, ClassDef, MethodRef, OBJECT_CLASS, Program};

use thiserror::Error;

use crate::interp::RewriteError;
use crate::runtime::layout::{AccessFlags, BasicType};
use manifest::{MethodDef, parse_flags};

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse program: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown access flag `{0}`")]
    UnknownFlag(String),
    #[error("bad method reference `{0}`")]
    BadMethodRef(String),
    #[error("{class}: bad descriptor `{descriptor}` for `{member}`")]
    BadDescriptor {
        class: String,
        member: String,
        descriptor: String,
    },
    #[error("{method}: {source}")]
    Assemble {
        method: String,
        #[source]
        source: AssembleError,
    },
    #[error("{0}: method has no code")]
    MissingCode(String),
    #[error("{0}: abstract method has code")]
    AbstractWithCode(String),
    #[error("{0}: native methods are not supported")]
    NativeMethod(String),
    #[error("class {0} is defined twice")]
    DuplicateClass(String),
    #[error("class {name} referenced by {referenced_by} is not defined")]
    UnknownClass { name: String, referenced_by: String },
    #[error("class {0} is its own superclass")]
    ClassCircularity(String),
    #[error("class {class}: {message}")]
    IncompatibleClassChange { class: String, message: String },
    #[error("no method {0}")]
    UnknownMethod(String),
    #[error("call site {0}: {1}")]
    BadCallSite(String, String),
    #[error("{class}: {source}")]
    Rewrite {
        class: String,
        #[source]
        source: RewriteError,
    },
    #[error("{0}: constant pool overflow")]
    PoolOverflow(String),
    #[error("metadata space exhausted")]
    MetaspaceFull,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub descriptor: String,
    pub ty: BasicType,
    pub flags: AccessFlags,
}

impl FieldDecl {
    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub descriptor: String,
    pub signature: MethodDescriptor,
    pub flags: AccessFlags,
    pub code: Vec<u8>,
    pub max_locals: u16,
    pub max_stack: u16,
}

impl MethodDecl {
    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(AccessFlags::ABSTRACT)
    }

    /// Parameter slots including the receiver.
    pub fn size_of_parameters(&self) -> u16 {
        self.signature.param_slots() + u16::from(!self.is_static())
    }
}

/// One assembled class.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub flags: AccessFlags,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub pool: ConstantPool,
}

impl ClassFile {
    pub fn assemble(def: &ClassDef) -> Result<Self, ProgramError> {
        let mut flags = parse_flags(&def.flags)?;
        let is_interface = flags.contains(AccessFlags::INTERFACE);
        if is_interface {
            flags |= AccessFlags::ABSTRACT;
        }
        let super_name = if def.name == OBJECT_CLASS {
            None
        } else {
            Some(def.super_name.clone().unwrap_or_else(|| OBJECT_CLASS.to_string()))
        };

        let mut fields = Vec::with_capacity(def.field.len());
        for f in &def.field {
            let ty = descriptor::field_type(&f.descriptor).ok_or_else(|| ProgramError::BadDescriptor {
                class: def.name.clone(),
                member: f.name.clone(),
                descriptor: f.descriptor.clone(),
            })?;
            fields.push(FieldDecl {
                name: f.name.clone(),
                descriptor: f.descriptor.clone(),
                ty,
                flags: parse_flags(&f.flags)?,
            });
        }

        let mut pool = ConstantPool::new();
        let mut methods = Vec::with_capacity(def.method.len());
        for m in &def.method {
            methods.push(Self::assemble_method(&def.name, m, is_interface, &mut pool)?);
        }

        Ok(Self {
            name: def.name.clone(),
            super_name,
            interfaces: def.interfaces.clone(),
            flags,
            fields,
            methods,
            pool,
        })
    }

    fn assemble_method(
        class: &str,
        m: &MethodDef,
        in_interface: bool,
        pool: &mut ConstantPool,
    ) -> Result<MethodDecl, ProgramError> {
        let qualified = format!("{class}.{}{}", m.name, m.descriptor);
        let signature = MethodDescriptor::parse(&m.descriptor).ok_or_else(|| ProgramError::BadDescriptor {
            class: class.to_string(),
            member: m.name.clone(),
            descriptor: m.descriptor.clone(),
        })?;
        let mut flags = parse_flags(&m.flags)?;
        let has_code = !m.code.trim().is_empty();
        if flags.contains(AccessFlags::NATIVE) {
            return Err(ProgramError::NativeMethod(qualified));
        }
        if in_interface && !has_code && !flags.contains(AccessFlags::STATIC) {
            flags |= AccessFlags::ABSTRACT;
        }
        if flags.contains(AccessFlags::ABSTRACT) {
            if has_code {
                return Err(ProgramError::AbstractWithCode(qualified));
            }
        } else if !has_code {
            return Err(ProgramError::MissingCode(qualified));
        }

        let arg_slots = signature.param_slots() + u16::from(!flags.contains(AccessFlags::STATIC));
        let assembled = if has_code {
            assemble(&m.code, pool, arg_slots).map_err(|source| match source {
                AssembleError::Pool(_) => ProgramError::PoolOverflow(class.to_string()),
                source => ProgramError::Assemble {
                    method: qualified.clone(),
                    source,
                },
            })?
        } else {
            AssembledMethod {
                code: Vec::new(),
                max_locals: arg_slots,
                max_stack: 0,
            }
        };

        Ok(MethodDecl {
            name: m.name.clone(),
            descriptor: m.descriptor.clone(),
            signature,
            flags,
            code: assembled.code,
            max_locals: m.max_locals.unwrap_or(0).max(assembled.max_locals),
            max_stack: m.max_stack.unwrap_or(0).max(assembled.max_stack),
        })
    }

    pub fn is_interface(&self) -> bool {
        self.flags.contains(AccessFlags::INTERFACE)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name && m.descriptor == descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(source: &str) -> Result<ClassFile, ProgramError> {
        let program = Program::from_toml(source).unwrap();
        ClassFile::assemble(&program.class[0])
    }

    #[test]
    fn test_assemble_class() {
        let c = class(
            r#"
            [[class]]
            name = "Counter"

            [[class.field]]
            name = "count"
            descriptor = "J"

            [[class.method]]
            name = "bump"
            descriptor = "(J)V"
            code = """
                aload_0
                dup
                getfield Counter.count:J
                lload_1
                ladd
                putfield Counter.count:J
                return
            """
            "#,
        )
        .unwrap();
        assert_eq!(c.super_name.as_deref(), Some(OBJECT_CLASS));
        assert_eq!(c.fields[0].ty, BasicType::Long);
        let bump = c.find_method("bump", "(J)V").unwrap();
        assert_eq!(bump.size_of_parameters(), 3);
        assert_eq!(bump.max_locals, 3);
        assert_eq!(bump.max_stack, 5);
    }

    #[test]
    fn test_interface_methods_default_to_abstract() {
        let c = class(
            r#"
            [[class]]
            name = "Shape"
            flags = ["interface"]

            [[class.method]]
            name = "area"
            descriptor = "()I"
            "#,
        )
        .unwrap();
        assert!(c.is_interface());
        assert!(c.flags.contains(AccessFlags::ABSTRACT));
        assert!(c.methods[0].is_abstract());
    }

    #[test]
    fn test_method_errors() {
        let missing = class("[[class]]\nname = \"A\"\n[[class.method]]\nname = \"f\"\ndescriptor = \"()V\"\n");
        assert!(matches!(missing, Err(ProgramError::MissingCode(m)) if m == "A.f()V"));

        let native = class(
            "[[class]]\nname = \"A\"\n[[class.method]]\nname = \"f\"\ndescriptor = \"()V\"\nflags = [\"native\"]\n",
        );
        assert!(matches!(native, Err(ProgramError::NativeMethod(_))));

        let bad = class("[[class]]\nname = \"A\"\n[[class.method]]\nname = \"f\"\ndescriptor = \"()V\"\ncode = \"pop\"\n");
        let err = bad.unwrap_err();
        assert!(matches!(err, ProgramError::Assemble { .. }));
        assert_eq!(err.to_string(), "A.f()V: 1:1: stack underflow");
    }
}
