use crate::document::Node;
use crate::error::{ConfigError, RuleError};
use crate::findings::{Category, Issue, IssueSeverity};
use crate::platforms::Platform;
use regex::Regex;
use serde::Deserialize;

/// A rule supplied by the caller. Runs after the built-in catalog with the
/// same failure isolation.
pub trait CustomRule: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn applies_to(&self, _platform: Platform) -> bool {
        true
    }

    fn check(&self, document: &Node, raw_text: &str, platform: Platform) -> Result<Vec<Issue>, RuleError>;
}

/// Declarative regex rule as written in `[[patterns]]` of the config file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PatternRuleConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub pattern: String,
    #[serde(default = "default_severity")]
    pub severity: IssueSeverity,
    #[serde(default = "default_category")]
    pub category: Category,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    /// Platform labels; empty means every platform.
    #[serde(default)]
    pub platforms: Vec<String>,
}

fn default_severity() -> IssueSeverity {
    IssueSeverity::Warning
}

fn default_category() -> Category {
    Category::BestPractice
}

/// A compiled [`PatternRuleConfig`]. Reports one issue per matching line.
#[derive(Debug)]
pub struct PatternRule {
    config: PatternRuleConfig,
    regex: Regex,
    platforms: Vec<Platform>,
}

impl PatternRule {
    pub fn compile(config: PatternRuleConfig) -> Result<Self, ConfigError> {
        let regex = Regex::new(&config.pattern).map_err(|source| ConfigError::InvalidPattern {
            id: config.id.clone(),
            source,
        })?;

        let mut platforms = Vec::new();
        for label in &config.platforms {
            match Platform::from_label(label) {
                Platform::Unknown => {
                    return Err(ConfigError::UnknownPlatform {
                        id: config.id.clone(),
                        platform: label.clone(),
                    })
                }
                platform => platforms.push(platform),
            }
        }

        Ok(Self {
            config,
            regex,
            platforms,
        })
    }
}

impl CustomRule for PatternRule {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(&self.config.id)
    }

    fn applies_to(&self, platform: Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&platform)
    }

    fn check(&self, _document: &Node, raw_text: &str, _platform: Platform) -> Result<Vec<Issue>, RuleError> {
        let issues = raw_text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim_start().starts_with('#') && self.regex.is_match(line))
            .map(|(i, _)| {
                let issue = Issue::new(
                    self.name().to_string(),
                    self.config.message.clone(),
                    self.config.severity,
                    self.config.category,
                )
                .with_rule(self.config.id.clone())
                .at_line(i + 1);
                match &self.config.suggestion {
                    Some(suggestion) => issue.with_suggestion(suggestion.clone()),
                    None => issue,
                }
            })
            .collect();
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pattern: &str, platforms: &[&str]) -> PatternRuleConfig {
        PatternRuleConfig {
            id: "no-sudo".into(),
            name: Some("No sudo".into()),
            pattern: pattern.into(),
            severity: IssueSeverity::Warning,
            category: Category::BestPractice,
            message: "sudo used in CI script".into(),
            suggestion: None,
            platforms: platforms.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_pattern_rule_reports_each_line() {
        let rule = PatternRule::compile(config(r"\bsudo\s", &[])).unwrap();
        let issues = rule
            .check(&Node::Null, "script:\n  - sudo apt-get update\n  # sudo ignored\n  - sudo make install\n", Platform::GitlabCi)
            .unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].lines, vec![2]);
        assert_eq!(issues[1].lines, vec![4]);
        assert_eq!(issues[0].rule_id.as_deref(), Some("no-sudo"));
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let err = PatternRule::compile(config("(unclosed", &[])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_unknown_platform_is_config_error() {
        let err = PatternRule::compile(config("x", &["jenkins"])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlatform { .. }));
    }

    #[test]
    fn test_scope_from_platform_list() {
        let rule = PatternRule::compile(config("x", &["gitlab-ci"])).unwrap();
        assert!(rule.applies_to(Platform::GitlabCi));
        assert!(!rule.applies_to(Platform::GithubActions));
    }
}
