use regex::Regex;

use crate::engine::source::PurifyRule;
use crate::error::{RuleError, RuleResult};

/// Purify rules with their patterns compiled.
pub struct Purifier {
    rules: Vec<(Regex, String)>,
}

impl Purifier {
    pub fn compile(rules: &[PurifyRule]) -> RuleResult<Self> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.replacement.clone()))
                    .map_err(|e| {
                        RuleError::from(e)
                            .with_field(format!("content.purify[{}]", i))
                            .with_expr(&rule.pattern)
                    })
            })
            .collect::<RuleResult<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Apply every rule in order, trim, and drop units left empty.
    pub fn apply(&self, units: Vec<String>) -> Vec<String> {
        units
            .into_iter()
            .filter_map(|unit| {
                let mut text = unit;
                for (pattern, replacement) in &self.rules {
                    text = pattern.replace_all(&text, replacement.as_str()).into_owned();
                }
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn rule(pattern: &str, replacement: &str) -> PurifyRule {
        PurifyRule {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }
    }

    #[test]
    fn test_rules_apply_in_order() {
        let purifier = Purifier::compile(&[rule("foo", "bar"), rule("bar", "baz")]).unwrap();
        assert_eq!(purifier.apply(vec!["foo".to_string()]), vec!["baz"]);
    }

    #[test]
    fn test_empty_units_dropped() {
        let purifier = Purifier::compile(&[rule(r"(?i)visit .*\.com", "")]).unwrap();
        let units = vec![
            "  First line. ".to_string(),
            "Visit books.com".to_string(),
            "   ".to_string(),
            "Second line.".to_string(),
        ];
        assert_eq!(purifier.apply(units), vec!["First line.", "Second line."]);
    }

    #[test]
    fn test_capture_groups_in_replacement() {
        let purifier = Purifier::compile(&[rule(r"(\w+)@(\w+)", "$2 at $1")]).unwrap();
        assert_eq!(purifier.apply(vec!["me@home".to_string()]), vec!["home at me"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Purifier::compile(&[rule("ok", ""), rule("(", "")]).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.context.field_path.as_deref(), Some("content.purify[1]"));
    }
}
