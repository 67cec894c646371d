use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::PropertyId;

/// A single typed value.
///
/// The type code is significant: allocation arithmetic preserves it, and
/// the allocation manager compares capacities using it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleValue {
    Bool(bool),
    Short(i16),
    Long(i32),
    LongLong(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

/// Arithmetic operator accepted inside a `__MATH__` expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl MathOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "+" => Some(MathOp::Add),
            "-" => Some(MathOp::Sub),
            "*" => Some(MathOp::Mul),
            "/" => Some(MathOp::Div),
            _ => None,
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            MathOp::Add => lhs + rhs,
            MathOp::Sub => lhs - rhs,
            MathOp::Mul => lhs * rhs,
            MathOp::Div => lhs / rhs,
        }
    }
}

impl fmt::Display for MathOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "*",
            MathOp::Div => "/",
        };
        f.write_str(op)
    }
}

impl SimpleValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SimpleValue::Short(v) => Some(f64::from(*v)),
            SimpleValue::Long(v) => Some(f64::from(*v)),
            SimpleValue::LongLong(v) => Some(*v as f64),
            SimpleValue::Float(v) => Some(f64::from(*v)),
            SimpleValue::Double(v) => Some(*v),
            SimpleValue::Bool(_) | SimpleValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SimpleValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Applies `self op operand`, producing a result with the same type
    /// code as `self`. Returns `None` for non-numeric values.
    pub fn apply_math(&self, operand: f64, op: MathOp) -> Option<SimpleValue> {
        let result = op.apply(self.as_f64()?, operand);
        let value = match self {
            SimpleValue::Short(_) => SimpleValue::Short(result as i16),
            SimpleValue::Long(_) => SimpleValue::Long(result as i32),
            SimpleValue::LongLong(_) => SimpleValue::LongLong(result as i64),
            SimpleValue::Float(_) => SimpleValue::Float(result as f32),
            SimpleValue::Double(_) => SimpleValue::Double(result),
            SimpleValue::Bool(_) | SimpleValue::Str(_) => unreachable!(),
        };
        Some(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SimpleValue::Bool(_) => "bool",
            SimpleValue::Short(_) => "short",
            SimpleValue::Long(_) => "long",
            SimpleValue::LongLong(_) => "longlong",
            SimpleValue::Float(_) => "float",
            SimpleValue::Double(_) => "double",
            SimpleValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for SimpleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimpleValue::Bool(v) => write!(f, "{v}"),
            SimpleValue::Short(v) => write!(f, "{v}"),
            SimpleValue::Long(v) => write!(f, "{v}"),
            SimpleValue::LongLong(v) => write!(f, "{v}"),
            SimpleValue::Float(v) => write!(f, "{v}"),
            SimpleValue::Double(v) => write!(f, "{v}"),
            SimpleValue::Str(v) => f.write_str(v),
        }
    }
}

/// A property value of any shape.
///
/// Struct values are nested property lists; allocation requests may nest
/// arbitrarily and expression rewriting descends through them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Simple(SimpleValue),
    Sequence(Vec<SimpleValue>),
    Struct(Vec<Property>),
    StructSequence(Vec<Vec<Property>>),
}

impl PropertyValue {
    pub fn as_simple(&self) -> Option<&SimpleValue> {
        match self {
            PropertyValue::Simple(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Property]> {
        match self {
            PropertyValue::Struct(members) => Some(members),
            _ => None,
        }
    }
}

impl From<SimpleValue> for PropertyValue {
    fn from(value: SimpleValue) -> Self {
        PropertyValue::Simple(value)
    }
}

/// An (id, value) pair as exchanged with devices and the allocation
/// manager. Lists preserve order and permit duplicate ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(id: impl Into<PropertyId>, value: impl Into<PropertyValue>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }

    pub fn simple(id: impl Into<PropertyId>, value: SimpleValue) -> Self {
        Self::new(id, PropertyValue::Simple(value))
    }
}

/// Role a descriptor property plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Configure,
    Allocation,
    ExecParam,
}

/// A property declaration from a property descriptor: the id, the default
/// value, and the role it plays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub id: PropertyId,
    pub value: PropertyValue,
    pub kind: PropertyKind,
}

impl PropertyDef {
    pub fn new(
        id: impl Into<PropertyId>,
        value: impl Into<PropertyValue>,
        kind: PropertyKind,
    ) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_preserves_type_code() {
        let doubled = SimpleValue::Long(5).apply_math(2.0, MathOp::Mul).unwrap();
        assert_eq!(doubled, SimpleValue::Long(10));

        let halved = SimpleValue::Double(5.0).apply_math(2.0, MathOp::Div).unwrap();
        assert_eq!(halved, SimpleValue::Double(2.5));
    }

    #[test]
    fn math_puts_the_stored_value_on_the_left() {
        let diff = SimpleValue::Long(5).apply_math(2.0, MathOp::Sub).unwrap();
        assert_eq!(diff, SimpleValue::Long(3));
    }

    #[test]
    fn math_rejects_non_numeric_values() {
        assert!(SimpleValue::Str("x".into()).apply_math(2.0, MathOp::Add).is_none());
        assert!(SimpleValue::Bool(true).apply_math(2.0, MathOp::Add).is_none());
    }

    #[test]
    fn operator_parsing() {
        assert_eq!(MathOp::parse("*"), Some(MathOp::Mul));
        assert_eq!(MathOp::parse("%"), None);
    }
}
