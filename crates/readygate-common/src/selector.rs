//! Node label selectors
//!
//! Parses the Kubernetes set-based selector syntax used in the handler
//! configuration (`key`, `!key`, `key=value`, `key!=value`,
//! `key in (a, b)`, `key notin (a, b)`) into a predicate over node labels.
//! Requirements are joined by commas and must all hold.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

pub(crate) const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// A single label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// The label key must be present
    Exists(String),
    /// The label key must be absent
    DoesNotExist(String),
    /// The label must be present with exactly this value
    Equals(String, String),
    /// The label must be absent or carry a different value
    NotEquals(String, String),
    /// The label must be present with one of the values
    In(String, BTreeSet<String>),
    /// The label must be absent or carry none of the values
    NotIn(String, BTreeSet<String>),
}

impl Requirement {
    /// Evaluate this requirement against a label set
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Exists(key) => write!(f, "{key}"),
            Requirement::DoesNotExist(key) => write!(f, "!{key}"),
            Requirement::Equals(key, value) => write!(f, "{key}={value}"),
            Requirement::NotEquals(key, value) => write!(f, "{key}!={value}"),
            Requirement::In(key, values) => write!(f, "{key} in ({})", join(values)),
            Requirement::NotIn(key, values) => write!(f, "{key} notin ({})", join(values)),
        }
    }
}

/// A conjunction of label requirements.
///
/// The empty selector matches every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSelector {
    requirements: Vec<Requirement>,
}

impl NodeSelector {
    /// A selector that matches every label set
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parse a selector expression
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Ok(Self::everything());
        }

        let requirements = split_requirements(trimmed)
            .map_err(|msg| Error::selector(expression, msg))?
            .into_iter()
            .map(|part| parse_requirement(part).map_err(|msg| Error::selector(expression, msg)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { requirements })
    }

    /// Parse several expressions and combine them into one conjunction
    pub fn parse_all<S: AsRef<str>>(expressions: &[S]) -> Result<Self> {
        let joined = expressions
            .iter()
            .map(|e| e.as_ref().trim())
            .filter(|e| !e.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        Self::parse(&joined)
    }

    /// Whether the selector has no requirements
    pub fn selects_all(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The parsed requirements, in expression order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Evaluate the selector against a label set
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for NodeSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Split on commas that are not inside a parenthesized value list
fn split_requirements(expression: &str) -> std::result::Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in expression.char_indices() {
        match c {
            '(' => {
                if depth > 0 {
                    return Err("nested parentheses are not allowed".to_string());
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err("unbalanced ')'".to_string());
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                parts.push(expression[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unterminated value list".to_string());
    }
    parts.push(expression[start..].trim());

    if parts.iter().any(|p| p.is_empty()) {
        return Err("empty requirement".to_string());
    }
    Ok(parts)
}

fn parse_requirement(part: &str) -> std::result::Result<Requirement, String> {
    if let Some((key, value)) = part.split_once("!=") {
        let (key, value) = (key.trim(), value.trim());
        validate_key(key)?;
        validate_value(value)?;
        return Ok(Requirement::NotEquals(key.to_string(), value.to_string()));
    }
    if let Some((key, value)) = part.split_once("==").or_else(|| part.split_once('=')) {
        let (key, value) = (key.trim(), value.trim());
        validate_key(key)?;
        validate_value(value)?;
        return Ok(Requirement::Equals(key.to_string(), value.to_string()));
    }
    if let Some(key) = part.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement::DoesNotExist(key.to_string()));
    }

    match part.split_once(char::is_whitespace) {
        None => {
            validate_key(part)?;
            Ok(Requirement::Exists(part.to_string()))
        }
        Some((key, rest)) => {
            validate_key(key)?;
            let rest = rest.trim_start();
            if let Some(list) = strip_operator(rest, "notin") {
                Ok(Requirement::NotIn(key.to_string(), parse_values(list)?))
            } else if let Some(list) = strip_operator(rest, "in") {
                Ok(Requirement::In(key.to_string(), parse_values(list)?))
            } else {
                Err(format!("unknown operator in requirement {part:?}"))
            }
        }
    }
}

/// Strip a set operator, which must be followed by whitespace or '('
fn strip_operator<'a>(rest: &'a str, operator: &str) -> Option<&'a str> {
    let tail = rest.strip_prefix(operator)?;
    if tail.starts_with('(') || tail.starts_with(char::is_whitespace) {
        Some(tail.trim_start())
    } else {
        None
    }
}

fn parse_values(list: &str) -> std::result::Result<BTreeSet<String>, String> {
    let inner = list
        .strip_prefix('(')
        .and_then(|l| l.strip_suffix(')'))
        .ok_or_else(|| format!("expected parenthesized value list, found {list:?}"))?;
    if inner.trim().is_empty() {
        return Err("values set can't be empty".to_string());
    }

    let mut values = BTreeSet::new();
    for value in inner.split(',').map(str::trim) {
        validate_value(value)?;
        values.insert(value.to_string());
    }
    Ok(values)
}

/// Validate a label key: an optional DNS-subdomain prefix and a name
fn validate_key(key: &str) -> std::result::Result<(), String> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        let valid_prefix = !prefix.is_empty()
            && prefix.len() <= MAX_PREFIX_LEN
            && prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
        if !valid_prefix {
            return Err(format!("invalid label key prefix {prefix:?}"));
        }
    }

    if name.is_empty() || !is_label_name(name) {
        return Err(format!("invalid label key {key:?}"));
    }
    Ok(())
}

/// Validate a label value (the empty value is allowed)
fn validate_value(value: &str) -> std::result::Result<(), String> {
    if value.is_empty() || is_label_name(value) {
        Ok(())
    } else {
        Err(format!("invalid label value {value:?}"))
    }
}

/// Whether `s` is a valid label value or qualified-name name part
pub(crate) fn is_label_name(s: &str) -> bool {
    let bounded_by_alnum = s.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && s.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    s.len() <= MAX_NAME_LEN
        && bounded_by_alnum
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = NodeSelector::parse("  ").unwrap();
        assert!(selector.selects_all());
        assert!(selector.matches(&BTreeMap::new()));
        assert!(NodeSelector::parse_all::<&str>(&[]).unwrap().selects_all());
    }

    #[rstest]
    #[case::exists("node-role.kubernetes.io/node", &[("node-role.kubernetes.io/node", "")], true)]
    #[case::exists_missing("node-role.kubernetes.io/node", &[], false)]
    #[case::not_exists("!spot", &[("zone", "a")], true)]
    #[case::not_exists_present("!spot", &[("spot", "true")], false)]
    #[case::equals("zone=a", &[("zone", "a")], true)]
    #[case::double_equals("zone==a", &[("zone", "a")], true)]
    #[case::equals_wrong_value("zone=a", &[("zone", "b")], false)]
    #[case::not_equals_missing_key("zone!=a", &[], true)]
    #[case::not_equals_same_value("zone!=a", &[("zone", "a")], false)]
    #[case::in_set("zone in (a, b)", &[("zone", "b")], true)]
    #[case::in_set_missing_key("zone in (a,b)", &[], false)]
    #[case::notin_set("zone notin (a,b)", &[("zone", "c")], true)]
    #[case::notin_missing_key("zone notin (a,b)", &[], true)]
    #[case::notin_member("zone notin (a,b)", &[("zone", "a")], false)]
    fn single_requirement_semantics(
        #[case] expression: &str,
        #[case] node_labels: &[(&str, &str)],
        #[case] expected: bool,
    ) {
        let selector = NodeSelector::parse(expression).unwrap();
        assert_eq!(selector.matches(&labels(node_labels)), expected);
    }

    #[test]
    fn requirements_are_a_conjunction() {
        let selector = NodeSelector::parse("zone in (a, b),tier=web,!spot").unwrap();
        assert_eq!(selector.requirements().len(), 3);
        assert!(selector.matches(&labels(&[("zone", "a"), ("tier", "web")])));
        assert!(!selector.matches(&labels(&[("zone", "a"), ("tier", "db")])));
        assert!(!selector.matches(&labels(&[("zone", "a"), ("tier", "web"), ("spot", "1")])));
    }

    #[test]
    fn parse_all_joins_expressions() {
        let selector = NodeSelector::parse_all(&["node-role.kubernetes.io/node", "zone=a"]).unwrap();
        assert_eq!(selector.to_string(), "node-role.kubernetes.io/node,zone=a");
    }

    #[rstest]
    #[case::unterminated("zone in (a,b")]
    #[case::unbalanced("zone=a)")]
    #[case::empty_part("zone=a,,tier=web")]
    #[case::unknown_operator("zone within (a)")]
    #[case::bad_key("-zone=a")]
    #[case::bad_value("zone=a b")]
    #[case::bad_prefix("Example.COM/zone=a")]
    #[case::missing_list("zone in a")]
    #[case::empty_set("zone in ()")]
    #[case::empty_notin_set("zone notin ( )")]
    fn malformed_expressions_are_rejected(#[case] expression: &str) {
        let err = NodeSelector::parse(expression).unwrap_err();
        assert!(matches!(err, Error::Selector { .. }), "{expression}: {err}");
    }

    #[test]
    fn display_round_trips_through_parse() {
        let selector: NodeSelector = "zone notin (b,a),tier!=db".parse().unwrap();
        let reparsed = NodeSelector::parse(&selector.to_string()).unwrap();
        assert_eq!(selector, reparsed);
    }
}
