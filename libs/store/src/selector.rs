//! Kubernetes label selector grammar: `=`, `==`, `!=`, `in`, `notin`,
//! existence and non-existence requirements, comma separated.

use crate::error::{Result, StoreError};

use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Eq(String, String),
    NotEq(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    NotExists(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// An empty selector matches everything.
    pub fn parse(input: &str) -> Result<Selector> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Selector::default());
        }

        let requirements = split_top_level(input)
            .into_iter()
            .map(|term| parse_requirement(term.trim()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Selector { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Eq(key, value) => labels.get(key) == Some(value),
            Requirement::NotEq(key, value) => labels.get(key) != Some(value),
            Requirement::In(key, values) => {
                labels.get(key).is_some_and(|v| values.contains(v))
            }
            Requirement::NotIn(key, values) => {
                !labels.get(key).is_some_and(|v| values.contains(v))
            }
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Split on commas that are not enclosed in a `(...)` value set.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    terms.push(&input[start..]);
    terms
}

fn parse_requirement(term: &str) -> Result<Requirement> {
    if term.is_empty() {
        return Err(StoreError::InvalidSelector("empty requirement".to_string()));
    }

    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(validate_key(key)?));
    }

    if let Some((key, values)) = split_set_requirement(term, " notin ") {
        return Ok(Requirement::NotIn(validate_key(key)?, parse_values(values)?));
    }
    if let Some((key, values)) = split_set_requirement(term, " in ") {
        return Ok(Requirement::In(validate_key(key)?, parse_values(values)?));
    }

    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEq(
            validate_key(key.trim())?,
            value.trim().to_string(),
        ));
    }
    if let Some((key, value)) = term.split_once("==") {
        return Ok(Requirement::Eq(
            validate_key(key.trim())?,
            value.trim().to_string(),
        ));
    }
    if let Some((key, value)) = term.split_once('=') {
        return Ok(Requirement::Eq(
            validate_key(key.trim())?,
            value.trim().to_string(),
        ));
    }

    Ok(Requirement::Exists(validate_key(term)?))
}

fn split_set_requirement<'a>(term: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let idx = term.find(op)?;
    Some((term[..idx].trim(), term[idx + op.len()..].trim()))
}

fn parse_values(values: &str) -> Result<Vec<String>> {
    let inner = values
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| {
            StoreError::InvalidSelector(format!("expected parenthesized value set, got {values:?}"))
        })?;
    Ok(inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

fn validate_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() || key.contains(|c: char| c.is_whitespace() || c == '(' || c == ')') {
        return Err(StoreError::InvalidSelector(format!("invalid key {key:?}")));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches_all() {
        let selector = Selector::parse("").unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[("app", "web")])));
        assert!(selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_equality() {
        let selector = Selector::parse("app=web").unwrap();
        assert!(selector.matches(&labels(&[("app", "web")])));
        assert!(!selector.matches(&labels(&[("app", "db")])));
        assert!(!selector.matches(&BTreeMap::new()));

        let double = Selector::parse("app==web").unwrap();
        assert_eq!(selector, double);
    }

    #[test]
    fn test_inequality() {
        let selector = Selector::parse("app!=web").unwrap();
        assert!(!selector.matches(&labels(&[("app", "web")])));
        assert!(selector.matches(&labels(&[("app", "db")])));
        assert!(selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_set_requirements() {
        let selector = Selector::parse("env in (prod, staging)").unwrap();
        assert!(selector.matches(&labels(&[("env", "prod")])));
        assert!(selector.matches(&labels(&[("env", "staging")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&BTreeMap::new()));

        let selector = Selector::parse("env notin (prod)").unwrap();
        assert!(!selector.matches(&labels(&[("env", "prod")])));
        assert!(selector.matches(&labels(&[("env", "dev")])));
        assert!(selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_existence() {
        let selector = Selector::parse("app").unwrap();
        assert!(selector.matches(&labels(&[("app", "anything")])));
        assert!(!selector.matches(&BTreeMap::new()));

        let selector = Selector::parse("!app").unwrap();
        assert!(!selector.matches(&labels(&[("app", "anything")])));
        assert!(selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_conjunction_with_set_commas() {
        let selector = Selector::parse("app=web,env in (prod, staging),!legacy").unwrap();
        assert!(selector.matches(&labels(&[("app", "web"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[
            ("app", "web"),
            ("env", "prod"),
            ("legacy", "true")
        ])));
    }

    #[test]
    fn test_invalid_selectors() {
        assert!(Selector::parse(",").is_err());
        assert!(Selector::parse("env in prod").is_err());
        assert!(Selector::parse("a b=c").is_err());
    }
}
