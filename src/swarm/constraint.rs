//! Placement constraint expressions
//!
//! Constraints take the form `key==value` or `key!=value`, where the key
//! names a node attribute (`node.role`, `node.hostname`,
//! `node.labels.<label>`, `engine.labels.<label>`). Comparison is
//! case-insensitive.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)[a-z_][a-z0-9\-_.]+$").unwrap());

static VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[a-z0-9:\-_\s\.\*\(\)\?\+\[\]\\\^\$\|/]+$").unwrap()
});

/// Constraint operators, in match order
const OPERATORS: [(&str, Operator); 2] = [("==", Operator::Eq), ("!=", Operator::NotEq)];

/// Error raised when a constraint expression does not parse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("invalid constraint: {0}")]
    MissingOperator(String),

    #[error("key '{0}' is invalid")]
    InvalidKey(String),

    #[error("value '{0}' is invalid")]
    InvalidValue(String),
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Eq => write!(f, "=="),
            Operator::NotEq => write!(f, "!="),
        }
    }
}

/// A parsed placement constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

impl Constraint {
    /// Parse a single expression
    pub fn parse(expr: &str) -> std::result::Result<Self, ConstraintError> {
        for (token, operator) in OPERATORS {
            let Some((key, value)) = expr.split_once(token) else {
                continue;
            };

            let key = key.trim();
            if !KEY_RE.is_match(key) {
                return Err(ConstraintError::InvalidKey(key.to_string()));
            }

            let value = value.trim();
            if !VALUE_RE.is_match(value) {
                return Err(ConstraintError::InvalidValue(value.to_string()));
            }

            return Ok(Self {
                key: key.to_string(),
                operator,
                value: value.to_string(),
            });
        }

        Err(ConstraintError::MissingOperator(expr.to_string()))
    }

    /// Evaluate against a map of node attributes keyed like constraint keys
    ///
    /// A missing attribute compares as unequal.
    pub fn matches(&self, attributes: &HashMap<String, String>) -> bool {
        let equal = attributes
            .get(&self.key)
            .map(|actual| actual.eq_ignore_ascii_case(&self.value))
            .unwrap_or(false);

        match self.operator {
            Operator::Eq => equal,
            Operator::NotEq => !equal,
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.key, self.operator, self.value)
    }
}

/// Parse every expression, failing on the first one that does not parse
pub fn parse_exprs<S: AsRef<str>>(exprs: &[S]) -> std::result::Result<Vec<Constraint>, ConstraintError> {
    exprs.iter().map(|e| Constraint::parse(e.as_ref())).collect()
}

/// Whether all constraints hold for the given node attributes
pub fn all_match(constraints: &[Constraint], attributes: &HashMap<String, String>) -> bool {
    constraints.iter().all(|c| c.matches(attributes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_eq_and_neq() {
        let c = Constraint::parse("node.role == manager").unwrap();
        assert_eq!(c.key, "node.role");
        assert_eq!(c.operator, Operator::Eq);
        assert_eq!(c.value, "manager");

        let c = Constraint::parse("node.labels.zone!=eu-west-1").unwrap();
        assert_eq!(c.operator, Operator::NotEq);
        assert_eq!(c.value, "eu-west-1");
    }

    #[test]
    fn test_parse_rejects_missing_operator() {
        assert_eq!(
            Constraint::parse("node.role=manager"),
            Err(ConstraintError::MissingOperator("node.role=manager".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_bad_key_and_value() {
        assert!(matches!(
            Constraint::parse("9node==x"),
            Err(ConstraintError::InvalidKey(_))
        ));
        assert!(matches!(
            Constraint::parse("node.role==man@ger"),
            Err(ConstraintError::InvalidValue(_))
        ));
        assert!(matches!(
            Constraint::parse("node.role=="),
            Err(ConstraintError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_parse_exprs_first_error_wins() {
        let exprs = vec!["node.role==worker".to_string(), "bogus".to_string()];
        assert!(parse_exprs(&exprs).is_err());

        let empty: Vec<String> = Vec::new();
        assert!(parse_exprs(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_matches_case_insensitive() {
        let mut attrs = HashMap::new();
        attrs.insert("node.role".to_string(), "Manager".to_string());

        assert!(Constraint::parse("node.role==manager").unwrap().matches(&attrs));
        assert!(!Constraint::parse("node.role!=manager").unwrap().matches(&attrs));
        assert!(Constraint::parse("node.labels.ssd!=true").unwrap().matches(&attrs));
        assert!(!Constraint::parse("node.labels.ssd==true").unwrap().matches(&attrs));
    }
}
