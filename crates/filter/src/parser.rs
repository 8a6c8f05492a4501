use std::collections::BTreeMap;

use kubedump_core::ResourceKind;

use crate::lexer::{tokenize, Token};
use crate::pattern::{validate_label_key, Segment};
use crate::{Expression, ParseError, Pattern};

const DEFAULT_NAMESPACE: &str = "default";

/// Compile filter text. Empty (or blank) input yields [`Expression::True`].
pub fn parse(text: &str) -> Result<Expression, ParseError> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Ok(Expression::True);
    }
    let mut p = Parser { tokens, pos: 0 };
    let expr = p.expr(None)?;
    if p.pos < p.tokens.len() {
        let rest: Vec<&str> = p.tokens[p.pos..].iter().map(Token::text).collect();
        return Err(ParseError::TrailingTokens(rest.join(" ")));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// One expression. `operator` names the construct waiting for it, for error messages.
    fn expr(&mut self, operator: Option<&str>) -> Result<Expression, ParseError> {
        let missing = || ParseError::MissingOperand(operator.unwrap_or("expression").to_string());
        let tok = self.next().ok_or_else(missing)?;
        let word = match tok {
            Token::Open => {
                let inner = self.expr(Some("("))?;
                return match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(ParseError::UnbalancedParen),
                };
            }
            Token::Close => {
                return Err(match operator {
                    Some(op) => ParseError::MissingOperand(op.to_string()),
                    None => ParseError::UnexpectedToken(")".to_string()),
                })
            }
            Token::Word(w) => w,
        };
        match word.as_str() {
            "true" => Ok(Expression::True),
            "false" => Ok(Expression::False),
            "not" => Ok(Expression::Not(Box::new(self.expr(Some("not"))?))),
            "and" | "or" => {
                let left = self.expr(Some(word.as_str()))?;
                let right = self.expr(Some(word.as_str()))?;
                Ok(if word == "and" {
                    Expression::And(Box::new(left), Box::new(right))
                } else {
                    Expression::Or(Box::new(left), Box::new(right))
                })
            }
            "namespace" => {
                let raw = self.operand("namespace")?;
                if raw.contains('/') {
                    return Err(ParseError::MalformedPattern(raw));
                }
                Ok(Expression::Namespace(Pattern::validated(&raw, Segment::Namespace)?))
            }
            "label" => self.labels(),
            other => match ResourceKind::from_keyword(other) {
                Some(kind) => {
                    let raw = self.operand(other)?;
                    let (namespace, name) = resource_pattern(&raw)?;
                    Ok(Expression::Resource { kind, namespace, name })
                }
                None => Err(ParseError::UnexpectedToken(other.to_string())),
            },
        }
    }

    /// A bare word operand (patterns are never parenthesized).
    fn operand(&mut self, operator: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Word(_)) => match self.next() {
                Some(Token::Word(w)) => Ok(w),
                _ => Err(ParseError::MissingOperand(operator.to_string())),
            },
            _ => Err(ParseError::MissingOperand(operator.to_string())),
        }
    }

    /// `label (key=valuePattern)*`: consumes every following word that contains `=`.
    fn labels(&mut self) -> Result<Expression, ParseError> {
        let mut map = BTreeMap::new();
        while let Some(Token::Word(w)) = self.peek() {
            let Some((key, value)) = w.split_once('=') else { break };
            if key.is_empty() {
                return Err(ParseError::EmptyLabelKey(w.clone()));
            }
            validate_label_key(key)?;
            let pattern = Pattern::validated(value, Segment::LabelValue)?;
            map.insert(key.to_string(), pattern);
            self.pos += 1;
        }
        Ok(Expression::Labels(map))
    }
}

/// `[namespace/]name`, namespace defaulting to `default`.
fn resource_pattern(raw: &str) -> Result<(Pattern, Pattern), ParseError> {
    let parts: Vec<&str> = raw.split('/').collect();
    let (ns, name) = match parts.as_slice() {
        [name] => (DEFAULT_NAMESPACE, *name),
        [ns, name] => (*ns, *name),
        _ => return Err(ParseError::MalformedPattern(raw.to_string())),
    };
    if ns.is_empty() || name.is_empty() {
        return Err(ParseError::MalformedPattern(raw.to_string()));
    }
    Ok((Pattern::validated(ns, Segment::Namespace)?, Pattern::validated(name, Segment::Name)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(kind: ResourceKind, ns: &str, name: &str) -> Expression {
        Expression::Resource { kind, namespace: Pattern::new(ns), name: Pattern::new(name) }
    }

    #[test]
    fn empty_is_true() {
        assert_eq!(parse("").unwrap(), Expression::True);
        assert_eq!(parse("  ").unwrap(), Expression::True);
    }

    #[test]
    fn resource_defaults_namespace() {
        assert_eq!(parse("pod web").unwrap(), res(ResourceKind::Pod, "default", "web"));
        assert_eq!(parse("job batch/etl-*").unwrap(), res(ResourceKind::Job, "batch", "etl-*"));
        assert_eq!(parse("replicaset */*").unwrap(), res(ResourceKind::ReplicaSet, "*", "*"));
    }

    #[test]
    fn prefix_operators_nest() {
        let e = parse("and namespace prod or pod a service b").unwrap();
        assert_eq!(
            e,
            Expression::And(
                Box::new(Expression::Namespace(Pattern::new("prod"))),
                Box::new(Expression::Or(
                    Box::new(res(ResourceKind::Pod, "default", "a")),
                    Box::new(res(ResourceKind::Service, "default", "b")),
                )),
            )
        );
    }

    #[test]
    fn parentheses_group() {
        let a = parse("not (and (pod a) (namespace default))").unwrap();
        let b = parse("not and pod a namespace default").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn labels_consume_pairs() {
        let e = parse("label app=web tier=front-*").unwrap();
        let Expression::Labels(m) = e else { panic!("expected labels") };
        assert_eq!(m.len(), 2);
        assert_eq!(m["tier"], Pattern::new("front-*"));

        assert_eq!(parse("label").unwrap(), Expression::Labels(BTreeMap::new()));
        assert!(matches!(parse("and label app=web pod x").unwrap(), Expression::And(_, _)));
    }

    #[test]
    fn errors() {
        assert!(matches!(parse("pod bad-name-"), Err(ParseError::InvalidDns { .. })));
        assert!(matches!(parse("pod a/b/c"), Err(ParseError::MalformedPattern(_))));
        assert!(matches!(parse("pod /web"), Err(ParseError::MalformedPattern(_))));
        assert!(matches!(parse("namespace a/b"), Err(ParseError::MalformedPattern(_))));
        assert!(matches!(parse("and pod a"), Err(ParseError::MissingOperand(op)) if op == "and"));
        assert!(matches!(parse("not"), Err(ParseError::MissingOperand(_))));
        assert!(matches!(parse("pod"), Err(ParseError::MissingOperand(_))));
        assert!(matches!(parse("pod a pod b"), Err(ParseError::TrailingTokens(_))));
        assert!(matches!(parse("label =web"), Err(ParseError::EmptyLabelKey(_))));
        assert!(matches!(parse("(pod a"), Err(ParseError::UnbalancedParen)));
        assert!(matches!(parse("pod a)"), Err(ParseError::TrailingTokens(_))));
        assert!(matches!(parse("node a"), Err(ParseError::UnexpectedToken(_))));
        assert!(matches!(parse("pod (a)"), Err(ParseError::MissingOperand(_))));
    }

    #[test]
    fn display_round_trips() {
        for text in ["and (pod a) (not namespace kube-*)", "or label app=web job x/y", "label", "secret prod/tls-?"] {
            let e = parse(text).unwrap();
            assert_eq!(parse(&e.to_string()).unwrap(), e, "{}", text);
        }
    }
}
