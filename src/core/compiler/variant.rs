//! Application-variant detection.
//!
//! A variant is keyed on the application identifier rather than on the
//! descriptor structure. Rules are data: a built-in default plus any rules
//! from the settings file, first match wins.

use heck::ToShoutySnakeCase;
use regex::Regex;

use crate::config::VariantRuleConfig;
use crate::error::{Error, Result};

const BUILTIN_RULES: &[(&str, &str)] = &[("Y88", "(?i)Y88")];

#[derive(Debug, Clone)]
pub struct VariantRule {
    pub name: String,
    pattern: Regex,
    /// Deploy-pruning body used instead of the generic variant body.
    pub script: Option<String>,
}

impl VariantRule {
    pub fn new(name: impl Into<String>, pattern: &str, script: Option<String>) -> Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::config_invalid_enum(format!("variants.{}.pattern", name), e.to_string(), &[])
        })?;
        Ok(Self {
            name,
            pattern,
            script,
        })
    }

    pub fn matches(&self, application_id: &str) -> bool {
        self.pattern.is_match(application_id)
    }

    /// Variable carrying the variant's bench environment, e.g. `BENCH_Y88`.
    pub fn environment_key(&self) -> String {
        format!("BENCH_{}", self.name.to_shouty_snake_case())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariantTable {
    rules: Vec<VariantRule>,
}

impl VariantTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .filter_map(|(name, pattern)| VariantRule::new(*name, pattern, None).ok())
            .collect();
        Self { rules }
    }

    /// Configured rules take precedence over the built-in ones.
    pub fn from_settings(configured: &[VariantRuleConfig]) -> Result<Self> {
        let mut rules = configured
            .iter()
            .map(|rule| VariantRule::new(rule.name.clone(), &rule.pattern, rule.script.clone()))
            .collect::<Result<Vec<_>>>()?;
        rules.extend(Self::builtin().rules);
        Ok(Self { rules })
    }

    pub fn detect(&self, application_id: &str) -> Option<&VariantRule> {
        self.rules.iter().find(|rule| rule.matches(application_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rule_matches_case_insensitively() {
        let table = VariantTable::builtin();
        let rule = table.detect("app-y88-core").unwrap();
        assert_eq!(rule.name, "Y88");
        assert_eq!(rule.environment_key(), "BENCH_Y88");
        assert!(table.detect("A7K12").is_none());
    }

    #[test]
    fn configured_rules_win_over_builtin() {
        let table = VariantTable::from_settings(&[VariantRuleConfig {
            name: "legacy y88".into(),
            pattern: "^Y88".into(),
            script: Some("print('legacy')".into()),
        }])
        .unwrap();
        let rule = table.detect("Y88-batch").unwrap();
        assert_eq!(rule.environment_key(), "BENCH_LEGACY_Y88");
        assert!(rule.script.is_some());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = VariantTable::from_settings(&[VariantRuleConfig {
            name: "broken".into(),
            pattern: "(".into(),
            script: None,
        }])
        .unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_enum");
    }
}
