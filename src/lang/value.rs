use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Serialize, Serializer};

use super::ast::{Item, ItemKind};
use crate::runtime::runtime_error::Fault;

/// Runtime value in SBL.
///
/// Values are the only data that can live on the operand stack or in a local.
/// Stacks own their elements, so a clone never shares storage with its
/// source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Val {
    /// Arbitrary-range integer.
    Int(#[serde(serialize_with = "int_as_string")] BigInt),
    Char(char),
    Str(String),
    Bool(bool),
    /// `@`
    Nil,
    /// Stack literal value: `[1 'a "b"]`.
    Stack(Vec<Val>),
}

/// Tag of a [`Val`], used in type errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValKind {
    Int,
    Char,
    Str,
    Bool,
    Nil,
    Stack,
}

fn int_as_string<S: Serializer>(n: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(n)
}

impl Val {
    pub fn kind(&self) -> ValKind {
        match self {
            Val::Int(_) => ValKind::Int,
            Val::Char(_) => ValKind::Char,
            Val::Str(_) => ValKind::Str,
            Val::Bool(_) => ValKind::Bool,
            Val::Nil => ValKind::Nil,
            Val::Stack(_) => ValKind::Stack,
        }
    }

    /// Materializes a constant item. Returns `None` if a name appears in it.
    pub fn from_const(item: &Item) -> Option<Val> {
        Some(match &item.kind {
            ItemKind::Int(n) => Val::Int(n.clone()),
            ItemKind::Char(c) => Val::Char(*c),
            ItemKind::Str(s) => Val::Str(s.clone()),
            ItemKind::Bool(b) => Val::Bool(*b),
            ItemKind::Nil => Val::Nil,
            ItemKind::Ident(_) => return None,
            ItemKind::Stack(items) => Val::Stack(
                items
                    .iter()
                    .map(Val::from_const)
                    .collect::<Option<Vec<_>>>()?,
            ),
        })
    }

    /// Falsy values are `F`, `0`, `@`, `""` and `[]`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Int(n) => !n.is_zero(),
            Val::Nil => false,
            Val::Str(s) => !s.is_empty(),
            Val::Stack(items) => !items.is_empty(),
            Val::Char(_) => true,
        }
    }

    /// Equality between two values of the same tag.
    pub fn try_eq(&self, other: &Val, op: &str) -> Result<bool, Fault> {
        if self.kind() != other.kind() {
            return Err(Fault::mismatch(op, self, other));
        }
        Ok(self == other)
    }

    /// Ordering between two integers, characters or strings.
    pub fn try_cmp(&self, other: &Val, op: &str) -> Result<Ordering, Fault> {
        match (self, other) {
            (Val::Int(a), Val::Int(b)) => Ok(a.cmp(b)),
            (Val::Char(a), Val::Char(b)) => Ok(a.cmp(b)),
            (Val::Str(a), Val::Str(b)) => Ok(a.cmp(b)),
            _ if self.kind() != other.kind() => Err(Fault::mismatch(op, self, other)),
            _ => Err(Fault::WrongType {
                op: op.to_string(),
                expected: "integer, character or string",
                found: self.kind(),
            }),
        }
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Int(BigInt::from(n))
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl std::fmt::Display for ValKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValKind::Int => "integer",
            ValKind::Char => "character",
            ValKind::Str => "string",
            ValKind::Bool => "boolean",
            ValKind::Nil => "nil",
            ValKind::Stack => "stack",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for Val {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Val::Int(n) => write!(f, "{}", n),
            Val::Char(c) => write!(f, "{}", c),
            Val::Str(s) => write!(f, "{}", s),
            Val::Bool(true) => write!(f, "T"),
            Val::Bool(false) => write!(f, "F"),
            Val::Nil => write!(f, "Nil"),
            Val::Stack(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::position::Range;

    fn item(kind: ItemKind) -> Item {
        Item::new(kind, Range::default())
    }

    #[test]
    fn test_truthiness() {
        for falsy in [
            Val::Bool(false),
            Val::from(0),
            Val::Nil,
            Val::from(""),
            Val::Stack(vec![]),
        ] {
            assert!(!falsy.is_truthy(), "{:?} should be falsy", falsy);
        }
        for truthy in [
            Val::Bool(true),
            Val::from(-1),
            Val::Char('a'),
            Val::from("x"),
            Val::Stack(vec![Val::Nil]),
        ] {
            assert!(truthy.is_truthy(), "{:?} should be truthy", truthy);
        }
    }

    #[test]
    fn test_display() {
        let v = Val::Stack(vec![
            Val::from(1),
            Val::Bool(true),
            Val::Nil,
            Val::Stack(vec![Val::Char('c')]),
        ]);
        assert_eq!(v.to_string(), "[1, T, Nil, [c]]");
        assert_eq!(Val::Stack(vec![]).to_string(), "[]");
    }

    #[test]
    fn test_compare_requires_matching_tags() {
        assert_eq!(
            Val::from(2).try_cmp(&Val::from(10), "<").unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Val::from("b").try_cmp(&Val::from("a"), ">").unwrap(),
            Ordering::Greater
        );

        let err = Val::from(1).try_cmp(&Val::from("1"), "<").unwrap_err();
        assert!(matches!(err, Fault::TypeMismatch { .. }));
        assert!(err.to_string().contains("integer"), "msg was: {}", err);

        let err = Val::Nil.try_cmp(&Val::Nil, "<").unwrap_err();
        assert!(matches!(err, Fault::WrongType { .. }));
    }

    #[test]
    fn test_stack_equality_is_elementwise() {
        let a = Val::Stack(vec![Val::from(1), Val::from("x")]);
        let b = Val::Stack(vec![Val::from(1), Val::from("x")]);
        let c = Val::Stack(vec![Val::from(1)]);
        assert!(a.try_eq(&b, "==").unwrap());
        assert!(!a.try_eq(&c, "==").unwrap());
        assert!(a.try_eq(&Val::Nil, "==").is_err());
    }

    #[test]
    fn test_from_const() {
        let konst = item(ItemKind::Stack(vec![
            item(ItemKind::Int(BigInt::from(7))),
            item(ItemKind::Stack(vec![item(ItemKind::Bool(false))])),
        ]));
        assert_eq!(
            Val::from_const(&konst),
            Some(Val::Stack(vec![
                Val::from(7),
                Val::Stack(vec![Val::Bool(false)])
            ]))
        );

        let named = item(ItemKind::Stack(vec![item(ItemKind::Ident("x".into()))]));
        assert_eq!(Val::from_const(&named), None);
    }

    #[test]
    fn test_serialize_big_int_as_string() {
        let big: BigInt = "123456789012345678901234567890".parse().unwrap();
        let json = serde_json::to_string(&Val::Int(big)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":"123456789012345678901234567890"}"#);
        let json = serde_json::to_string(&Val::Nil).unwrap();
        assert_eq!(json, r#"{"type":"nil"}"#);
    }
}
