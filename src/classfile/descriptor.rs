use super::{ARRAY_MARKER, CLASS_END, CLASS_MARKER};
use std::mem::size_of;

/// Size in bytes of a reference slot in any layout.
pub const REFERENCE_SIZE: usize = size_of::<usize>();

/// Largest number of array dimensions a descriptor may carry.
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Void,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 9] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Byte,
        PrimitiveKind::Char,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Float,
        PrimitiveKind::Long,
        PrimitiveKind::Double,
        PrimitiveKind::Void,
    ];

    pub fn from_id(id: char) -> Option<Self> {
        Some(match id {
            'Z' => Self::Boolean,
            'B' => Self::Byte,
            'C' => Self::Char,
            'S' => Self::Short,
            'I' => Self::Int,
            'F' => Self::Float,
            'J' => Self::Long,
            'D' => Self::Double,
            'V' => Self::Void,
            _ => return None,
        })
    }

    /// The one-character descriptor id.
    pub const fn id(self) -> char {
        match self {
            Self::Boolean => 'Z',
            Self::Byte => 'B',
            Self::Char => 'C',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Float => 'F',
            Self::Long => 'J',
            Self::Double => 'D',
            Self::Void => 'V',
        }
    }

    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Float => "float",
            Self::Long => "long",
            Self::Double => "double",
            Self::Void => "void",
        }
    }

    pub const fn size(self) -> usize {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Char | Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
            Self::Void => 0,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A parsed field descriptor borrowing from its source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldDescriptor<'a> {
    Primitive(PrimitiveKind),
    /// Internal class name without the `L`/`;` wrapper.
    Class(&'a str),
    /// The whole array descriptor, markers included.
    Array(&'a str),
}

impl<'a> FieldDescriptor<'a> {
    pub fn parse(text: &'a str) -> Option<Self> {
        match Self::parse_prefix(text)? {
            (d, "") => Some(d),
            _ => None,
        }
    }

    /// Parses one descriptor from the front of `text`, returning the rest.
    pub fn parse_prefix(text: &'a str) -> Option<(Self, &'a str)> {
        let first = text.chars().next()?;
        match first {
            ARRAY_MARKER => {
                let dims = text.chars().take_while(|c| *c == ARRAY_MARKER).count();
                if dims > MAX_ARRAY_DIMENSIONS {
                    return None;
                }
                let (_, rest) = Self::parse_prefix(&text[dims..])?;
                let consumed = text.len() - rest.len();
                Some((Self::Array(&text[..consumed]), rest))
            }
            CLASS_MARKER => {
                let end = text.find(CLASS_END)?;
                let name = &text[1..end];
                if name.is_empty() || name.contains(['.', '[']) {
                    return None;
                }
                Some((Self::Class(name), &text[end + 1..]))
            }
            _ => match PrimitiveKind::from_id(first)? {
                PrimitiveKind::Void => None,
                kind => Some((Self::Primitive(kind), &text[1..])),
            },
        }
    }

    /// Natural width of a value of this type inside a layout.
    pub fn width(&self) -> usize {
        match self {
            Self::Primitive(kind) => kind.size(),
            Self::Class(_) | Self::Array(_) => REFERENCE_SIZE,
        }
    }

    pub fn is_reference(&self) -> bool {
        !matches!(self, Self::Primitive(_))
    }
}

/// A parsed method descriptor `(params)ret`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor<'a> {
    pub parameters: Vec<FieldDescriptor<'a>>,
    /// `None` for `V`.
    pub return_type: Option<FieldDescriptor<'a>>,
    /// The text between the parentheses, used for overloaded native names.
    pub parameter_text: &'a str,
}

impl<'a> MethodDescriptor<'a> {
    pub fn parse(text: &'a str) -> Option<Self> {
        let inner = text.strip_prefix('(')?;
        let close = inner.find(')')?;
        let parameter_text = &inner[..close];

        let mut parameters = vec![];
        let mut rest = parameter_text;
        while !rest.is_empty() {
            let (d, r) = FieldDescriptor::parse_prefix(rest)?;
            parameters.push(d);
            rest = r;
        }

        let ret = &inner[close + 1..];
        let return_type = if ret == "V" {
            None
        } else {
            Some(FieldDescriptor::parse(ret)?)
        };

        Some(Self {
            parameters,
            return_type,
            parameter_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_field_descriptors() {
        assert_eq!(
            FieldDescriptor::parse("I"),
            Some(FieldDescriptor::Primitive(PrimitiveKind::Int))
        );
        assert_eq!(
            FieldDescriptor::parse("Ljava/lang/String;"),
            Some(FieldDescriptor::Class("java/lang/String"))
        );
        assert_eq!(
            FieldDescriptor::parse("[[J"),
            Some(FieldDescriptor::Array("[[J"))
        );
        assert_eq!(
            FieldDescriptor::parse("[Ljava/lang/Object;"),
            Some(FieldDescriptor::Array("[Ljava/lang/Object;"))
        );
    }

    #[test]
    fn rejects_malformed_field_descriptors() {
        for bad in ["", "V", "[V", "L;", "Ljava/lang/Object", "II", "Q", "La.b;"] {
            assert_eq!(FieldDescriptor::parse(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn widths_follow_natural_sizes() {
        let w = |d: &str| FieldDescriptor::parse(d).unwrap().width();
        assert_eq!(w("J"), 8);
        assert_eq!(w("D"), 8);
        assert_eq!(w("I"), 4);
        assert_eq!(w("F"), 4);
        assert_eq!(w("S"), 2);
        assert_eq!(w("C"), 2);
        assert_eq!(w("B"), 1);
        assert_eq!(w("Z"), 1);
        assert_eq!(w("LFoo;"), REFERENCE_SIZE);
        assert_eq!(w("[I"), REFERENCE_SIZE);
    }

    #[test]
    fn parses_method_descriptors() {
        let m = MethodDescriptor::parse("(I[JLjava/lang/String;)V").unwrap();
        assert_eq!(m.parameters.len(), 3);
        assert_eq!(m.return_type, None);
        assert_eq!(m.parameter_text, "I[JLjava/lang/String;");

        let m = MethodDescriptor::parse("()Ljava/lang/Object;").unwrap();
        assert!(m.parameters.is_empty());
        assert_eq!(m.return_type, Some(FieldDescriptor::Class("java/lang/Object")));

        assert!(MethodDescriptor::parse("(V)V").is_none());
        assert!(MethodDescriptor::parse("I)V").is_none());
        assert!(MethodDescriptor::parse("()").is_none());
    }
}
