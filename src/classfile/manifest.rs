//! Program manifests.
//!
//! ```toml
//! [[class]]
//! name = "Main"
//!
//! [[class.method]]
//! name = "add"
//! descriptor = "(II)I"
//! flags = ["static"]
//! code = """
//!     iload_0
//!     iload_1
//!     iadd
//!     ireturn
//! """
//!
//! [[callsite]]
//! class = "Main"
//! name = "plus"
//! descriptor = "(II)I"
//! target = "Main.add(II)I"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::ProgramError;
use crate::runtime::layout::AccessFlags;

pub const OBJECT_CLASS: &str = "java/lang/Object";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    #[serde(default)]
    pub class: Vec<ClassDef>,
    #[serde(default)]
    pub callsite: Vec<CallSiteDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassDef {
    pub name: String,
    /// Defaults to `java/lang/Object`; absent only for `Object` itself.
    #[serde(default, rename = "super")]
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub field: Vec<FieldDef>,
    #[serde(default)]
    pub method: Vec<MethodDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDef {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_locals: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stack: Option<u16>,
    /// Bytecode assembly; empty for abstract methods.
    #[serde(default)]
    pub code: String,
}

/// Binds an `invokedynamic` or `invokehandle` call site to the method that
/// implements it.
///
/// A site matches on the calling class and the name and descriptor at the
/// call. The target receives the call's arguments (the method handle first
/// for `invokehandle`) followed by the appendix string when one is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallSiteDef {
    pub class: String,
    pub name: String,
    pub descriptor: String,
    /// `Class.method(Descriptor)`
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appendix: Option<String>,
}

/// A parsed `Class.method(Descriptor)` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn parse(text: &str) -> Result<Self, ProgramError> {
        let bad = || ProgramError::BadMethodRef(text.to_string());
        let paren = text.find('(').ok_or_else(bad)?;
        let dot = text[..paren].rfind('.').ok_or_else(bad)?;
        let (class, name) = (&text[..dot], &text[dot + 1..paren]);
        if class.is_empty() || name.is_empty() {
            return Err(bad());
        }
        Ok(Self {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: text[paren..].to_string(),
        })
    }
}

impl std::fmt::Display for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}

impl Program {
    pub fn from_toml(source: &str) -> Result<Self, ProgramError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ProgramError> {
        let content = fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Classes every program links against.
    pub fn bootstrap() -> Result<Self, ProgramError> {
        Self::from_toml(include_str!("bootstrap.toml"))
    }

    /// Appends `other`'s classes and call sites.
    pub fn merge(&mut self, other: Program) {
        self.class.extend(other.class);
        self.callsite.extend(other.callsite);
    }
}

pub fn parse_flags(flags: &[String]) -> Result<AccessFlags, ProgramError> {
    flags.iter().try_fold(AccessFlags::empty(), |acc, flag| {
        let f = match flag.as_str() {
            "public" => AccessFlags::PUBLIC,
            "private" => AccessFlags::PRIVATE,
            "protected" => AccessFlags::PROTECTED,
            "static" => AccessFlags::STATIC,
            "final" => AccessFlags::FINAL,
            "synchronized" => AccessFlags::SYNCHRONIZED,
            "volatile" => AccessFlags::VOLATILE,
            "native" => AccessFlags::NATIVE,
            "interface" => AccessFlags::INTERFACE,
            "abstract" => AccessFlags::ABSTRACT,
            other => return Err(ProgramError::UnknownFlag(other.to_string())),
        };
        Ok(acc | f)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program() {
        let program = Program::from_toml(
            r#"
            [[class]]
            name = "Point"
            flags = ["final"]
            interfaces = ["Shape"]

            [[class.field]]
            name = "x"
            descriptor = "I"

            [[class.method]]
            name = "getX"
            descriptor = "()I"
            code = "aload_0\ngetfield Point.x:I\nireturn"

            [[callsite]]
            class = "Point"
            name = "make"
            descriptor = "()LPoint;"
            target = "Point.create(Ljava/lang/Object;)LPoint;"
            appendix = "tag"
            "#,
        )
        .unwrap();
        let point = &program.class[0];
        assert_eq!(point.super_name, None);
        assert_eq!(point.interfaces, vec!["Shape".to_string()]);
        assert_eq!(point.field[0].descriptor, "I");
        assert_eq!(point.method[0].max_locals, None);
        assert_eq!(program.callsite[0].appendix.as_deref(), Some("tag"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Program::from_toml("[[class]]\nname = \"A\"\nsuperclass = \"B\"\n").is_err());
    }

    #[test]
    fn test_method_refs() {
        let r = MethodRef::parse("java/lang/Object.<init>()V").unwrap();
        assert_eq!(r.class, "java/lang/Object");
        assert_eq!(r.name, "<init>");
        assert_eq!(r.descriptor, "()V");
        assert_eq!(r.to_string(), "java/lang/Object.<init>()V");
        assert!(MethodRef::parse("main()V").is_err());
        assert!(MethodRef::parse("Main.main").is_err());
    }

    #[test]
    fn test_flags() {
        let flags = parse_flags(&["public".into(), "static".into()]).unwrap();
        assert_eq!(flags, AccessFlags::PUBLIC | AccessFlags::STATIC);
        assert!(matches!(
            parse_flags(&["sealed".into()]),
            Err(ProgramError::UnknownFlag(f)) if f == "sealed"
        ));
    }

    #[test]
    fn test_bootstrap_parses() {
        let boot = Program::bootstrap().unwrap();
        assert!(boot.class.iter().any(|c| c.name == OBJECT_CLASS));
        assert!(boot.class.iter().any(|c| c.name == "java/lang/NullPointerException"));
    }
}
