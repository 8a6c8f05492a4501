use std::collections::BTreeMap;
use std::fmt;

use kubedump_core::{Resource, ResourceKind};

use crate::Pattern;

/// Compiled filter. Immutable once parsed; evaluation is pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    True,
    False,
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Resource { kind: ResourceKind, namespace: Pattern, name: Pattern },
    Namespace(Pattern),
    Labels(BTreeMap<String, Pattern>),
}

impl Expression {
    pub fn matches(&self, r: &Resource) -> bool {
        match self {
            Expression::True => true,
            Expression::False => false,
            Expression::Not(e) => !e.matches(r),
            Expression::And(a, b) => a.matches(r) && b.matches(r),
            Expression::Or(a, b) => a.matches(r) || b.matches(r),
            Expression::Resource { kind, namespace, name } => {
                r.kind == *kind && namespace.matches(&r.namespace) && name.matches(&r.name)
            }
            Expression::Namespace(p) => p.matches(&r.namespace),
            Expression::Labels(want) => Self::labels_match(want, &r.labels),
        }
    }

    fn labels_match(want: &BTreeMap<String, Pattern>, have: &BTreeMap<String, String>) -> bool {
        want.iter().all(|(k, p)| have.get(k).is_some_and(|v| p.matches(v)))
    }
}

impl Default for Expression {
    fn default() -> Self {
        Expression::True
    }
}

/// Prints the canonical prefix form, which parses back to an equal tree.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::True => f.write_str("true"),
            Expression::False => f.write_str("false"),
            Expression::Not(e) => write!(f, "not ({})", e),
            Expression::And(a, b) => write!(f, "and ({}) ({})", a, b),
            Expression::Or(a, b) => write!(f, "or ({}) ({})", a, b),
            Expression::Resource { kind, namespace, name } => {
                write!(f, "{} {}/{}", kind.as_str().to_ascii_lowercase(), namespace, name)
            }
            Expression::Namespace(p) => write!(f, "namespace {}", p),
            Expression::Labels(m) => {
                f.write_str("label")?;
                for (k, v) in m {
                    write!(f, " {}={}", k, v)?;
                }
                Ok(())
            }
        }
    }
}
