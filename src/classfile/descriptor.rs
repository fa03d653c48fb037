//! Field and method descriptors.

use crate::interp::bytecodes::TosState;
use crate::runtime::layout::BasicType;

/// Parse one field type starting at `pos`; returns the type and the
/// position after it.
fn parse_field_type(desc: &[u8], pos: usize) -> Option<(BasicType, usize)> {
    let ty = BasicType::from_descriptor(std::str::from_utf8(desc.get(pos..)?).ok()?)?;
    match ty {
        BasicType::Object => {
            let end = desc[pos..].iter().position(|&b| b == b';')?;
            if end < 2 {
                return None;
            }
            Some((ty, pos + end + 1))
        }
        BasicType::Array => {
            let (_, next) = parse_field_type(desc, pos + 1)?;
            Some((ty, next))
        }
        BasicType::Void => None,
        _ => Some((ty, pos + 1)),
    }
}

/// Basic type of a complete field descriptor.
pub fn field_type(desc: &str) -> Option<BasicType> {
    let bytes = desc.as_bytes();
    match parse_field_type(bytes, 0)? {
        (ty, end) if end == bytes.len() => Some(ty),
        _ => None,
    }
}

/// A parsed method descriptor such as `(IJLjava/lang/String;)V`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<BasicType>,
    pub ret: BasicType,
}

impl MethodDescriptor {
    pub fn parse(desc: &str) -> Option<Self> {
        let bytes = desc.as_bytes();
        if bytes.first() != Some(&b'(') {
            return None;
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while *bytes.get(pos)? != b')' {
            let (ty, next) = parse_field_type(bytes, pos)?;
            params.push(ty);
            pos = next;
        }
        pos += 1;
        let ret = if bytes.get(pos) == Some(&b'V') && pos + 1 == bytes.len() {
            BasicType::Void
        } else {
            let (ty, end) = parse_field_type(bytes, pos)?;
            if end != bytes.len() {
                return None;
            }
            ty
        };
        Some(Self { params, ret })
    }

    /// Operand stack slots of the declared parameters, without a receiver.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|t| t.slots() as u16).sum()
    }

    pub fn result_state(&self) -> TosState {
        TosState::from_basic_type(self.ret)
    }
}

/// Element type name of a `newarray` operand.
pub fn newarray_type(name: &str) -> Option<BasicType> {
    Some(match name {
        "boolean" => BasicType::Boolean,
        "char" => BasicType::Char,
        "float" => BasicType::Float,
        "double" => BasicType::Double,
        "byte" => BasicType::Byte,
        "short" => BasicType::Short,
        "int" => BasicType::Int,
        "long" => BasicType::Long,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_descriptors() {
        let d = MethodDescriptor::parse("(IJLjava/lang/String;[[D)V").unwrap();
        assert_eq!(
            d.params,
            vec![BasicType::Int, BasicType::Long, BasicType::Object, BasicType::Array]
        );
        assert_eq!(d.ret, BasicType::Void);
        assert_eq!(d.param_slots(), 5);
        assert_eq!(d.result_state(), TosState::Vtos);

        let d = MethodDescriptor::parse("()Ljava/lang/Object;").unwrap();
        assert!(d.params.is_empty());
        assert_eq!(d.result_state(), TosState::Atos);
    }

    #[test]
    fn test_malformed_descriptors() {
        for bad in ["", "I", "(I", "(V)V", "(L;)V", "()", "()VV", "(Q)V", "(I)[", "()Ljava/lang/Object"] {
            assert!(MethodDescriptor::parse(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn test_field_types() {
        assert_eq!(field_type("I"), Some(BasicType::Int));
        assert_eq!(field_type("[Ljava/lang/String;"), Some(BasicType::Array));
        assert_eq!(field_type("Ljava/lang/String;"), Some(BasicType::Object));
        assert_eq!(field_type("V"), None);
        assert_eq!(field_type("II"), None);
        assert_eq!(newarray_type("char"), Some(BasicType::Char));
        assert_eq!(newarray_type("object"), None);
    }
}
