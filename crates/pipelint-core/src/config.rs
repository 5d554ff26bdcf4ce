use crate::error::ConfigError;
use crate::rules::custom::{CustomRule, PatternRule, PatternRuleConfig};
use crate::rules::{Level, LevelFilter};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Default upper bound on configuration size, in bytes.
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// File name picked up from the working directory when no config is given.
pub const DEFAULT_CONFIG_FILE: &str = ".pipelint.toml";

/// Options for one analysis run, loadable from `.pipelint.toml`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enable_security_analysis: bool,
    pub enable_performance_analysis: bool,
    pub enable_cost_analysis: bool,
    pub max_file_size: usize,
    /// Run expert-level rules too.
    pub strict_mode: bool,
    pub disabled_rules: Vec<String>,
    /// Rules registered in code; never read from the file.
    #[serde(skip)]
    pub custom_rules: Vec<Arc<dyn CustomRule>>,
    pub patterns: Vec<PatternRuleConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enable_security_analysis: true,
            enable_performance_analysis: true,
            enable_cost_analysis: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            strict_mode: false,
            disabled_rules: Vec::new(),
            custom_rules: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let custom: Vec<&str> = self.custom_rules.iter().map(|r| r.id()).collect();
        f.debug_struct("AnalysisConfig")
            .field("enable_security_analysis", &self.enable_security_analysis)
            .field("enable_performance_analysis", &self.enable_performance_analysis)
            .field("enable_cost_analysis", &self.enable_cost_analysis)
            .field("max_file_size", &self.max_file_size)
            .field("strict_mode", &self.strict_mode)
            .field("disabled_rules", &self.disabled_rules)
            .field("custom_rules", &custom)
            .field("patterns", &self.patterns)
            .finish()
    }
}

impl AnalysisConfig {
    /// Parse a TOML document. `[[patterns]]` regexes are compiled here so a
    /// bad pattern fails the load instead of the analysis.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.custom_rule_set()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn with_custom_rule(mut self, rule: Arc<dyn CustomRule>) -> Self {
        self.custom_rules.push(rule);
        self
    }

    pub fn level(&self) -> LevelFilter {
        if self.strict_mode {
            LevelFilter::UpTo(Level::Expert)
        } else {
            LevelFilter::UpTo(Level::Senior)
        }
    }

    /// Code-registered rules followed by the compiled `[[patterns]]`.
    pub fn custom_rule_set(&self) -> Result<Vec<Arc<dyn CustomRule>>, ConfigError> {
        let mut rules = self.custom_rules.clone();
        for pattern in &self.patterns {
            rules.push(Arc::new(PatternRule::compile(pattern.clone())?));
        }
        Ok(rules)
    }
}
