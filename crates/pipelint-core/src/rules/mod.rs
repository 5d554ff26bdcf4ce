pub mod compliance;
pub mod context;
pub mod cost;
pub mod custom;
pub mod engine;
pub mod maintainability;
pub mod performance;
pub mod typo;

use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, IssueSeverity, Rating, VulnerabilitySeverity};
use crate::parser::dag::PipelineDag;
use crate::platforms::Platform;
use crate::security;
use context::RuleContext;
pub use context::RuleOutcome;
pub use engine::RuleEngine;
use serde::Serialize;
use std::fmt;

/// Strictness tier gating which rules run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Junior,
    Intermediate,
    Senior,
    Expert,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Junior => "junior",
            Level::Intermediate => "intermediate",
            Level::Senior => "senior",
            Level::Expert => "expert",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level requested for a run. `All` bypasses the level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFilter {
    All,
    UpTo(Level),
}

impl LevelFilter {
    pub fn admits(&self, level: Level) -> bool {
        match self {
            LevelFilter::All => true,
            LevelFilter::UpTo(max) => level <= *max,
        }
    }
}

/// Platforms a rule applies to.
#[derive(Debug, Clone, Copy)]
pub enum PlatformScope {
    All,
    Only(&'static [Platform]),
}

impl PlatformScope {
    pub fn applies_to(&self, platform: Platform) -> bool {
        match self {
            PlatformScope::All => true,
            PlatformScope::Only(platforms) => platforms.contains(&platform),
        }
    }

    pub fn labels(&self) -> Vec<&'static str> {
        match self {
            PlatformScope::All => vec!["all"],
            PlatformScope::Only(platforms) => platforms.iter().map(Platform::as_str).collect(),
        }
    }
}

/// Severity a rule's findings carry by default, in the vocabulary of the
/// finding kind it produces.
#[derive(Debug, Clone, Copy)]
pub enum DefaultSeverity {
    Issue(IssueSeverity),
    Vulnerability(VulnerabilitySeverity),
    Optimization(Rating),
}

impl DefaultSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            DefaultSeverity::Issue(IssueSeverity::Critical) => "critical",
            DefaultSeverity::Issue(IssueSeverity::Error) => "error",
            DefaultSeverity::Issue(IssueSeverity::Warning) => "warning",
            DefaultSeverity::Issue(IssueSeverity::Info) => "info",
            DefaultSeverity::Vulnerability(VulnerabilitySeverity::Critical) => "critical",
            DefaultSeverity::Vulnerability(VulnerabilitySeverity::High) => "high",
            DefaultSeverity::Vulnerability(VulnerabilitySeverity::Medium) => "medium",
            DefaultSeverity::Vulnerability(VulnerabilitySeverity::Low) => "low",
            DefaultSeverity::Optimization(Rating::High) => "high impact",
            DefaultSeverity::Optimization(Rating::Medium) => "medium impact",
            DefaultSeverity::Optimization(Rating::Low) => "low impact",
        }
    }
}

/// Static description of a rule.
#[derive(Debug)]
pub struct RuleMeta {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: Category,
    pub severity: DefaultSeverity,
    pub level: Level,
    pub platforms: PlatformScope,
}

/// A stateless check over a document and its source text.
pub trait Rule: Send + Sync {
    fn meta(&self) -> &'static RuleMeta;

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError>;
}

/// The built-in catalog, in execution order.
pub static BUILTIN_RULES: &[&dyn Rule] = &[
    &security::secrets::SecretSignatures,
    &security::entropy::HighEntropyStrings,
    &security::commands::RemoteScriptExecution,
    &security::commands::DangerousCommands,
    &security::commands::PrivilegedContainers,
    &security::commands::InsecureHttp,
    &security::commands::HardcodedLocalhost,
    &security::supply_chain::UnpinnedImages,
    &security::injection::ExpressionInjection,
    &security::permissions::BroadPermissions,
    &performance::MissingDependencyCache,
    &performance::StaticCacheKey,
    &performance::Parallelization,
    &performance::MatrixCandidates,
    &performance::MissingConcurrency,
    &cost::ExpensiveRunners,
    &cost::UnfilteredTriggers,
    &cost::OversizedArtifacts,
    &cost::LargeMatrix,
    &maintainability::NamingConventions,
    &maintainability::MissingNames,
    &maintainability::Complexity,
    &maintainability::DuplicatedSteps,
    &maintainability::LongScripts,
    &typo::KeyTypos,
    &compliance::MissingPermissions,
    &compliance::MissingTimeouts,
    &compliance::IgnoredFailures,
];

/// Build the job graph for rules that reason about jobs rather than text.
pub(crate) fn pipeline(document: &Node, platform: Platform) -> Result<PipelineDag, RuleError> {
    crate::parser::build_dag(document, platform).map_err(|e| RuleError::failed(format!("{e:#}")))
}

/// Lines that are not YAML comments, with their 1-based numbers.
pub(crate) fn code_lines<'a>(ctx: &RuleContext<'a>) -> Vec<(usize, &'a str)> {
    ctx.lines()
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.trim_start().starts_with('#'))
        .map(|(i, line)| (i + 1, *line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Junior < Level::Intermediate);
        assert!(Level::Senior < Level::Expert);
        assert!(LevelFilter::UpTo(Level::Senior).admits(Level::Intermediate));
        assert!(!LevelFilter::UpTo(Level::Senior).admits(Level::Expert));
        assert!(LevelFilter::All.admits(Level::Expert));
    }

    #[test]
    fn test_builtin_ids_are_unique_and_well_formed() {
        let mut seen = HashSet::new();
        for rule in BUILTIN_RULES {
            let id = rule.meta().id;
            assert!(id.starts_with("PLT-"), "{id}");
            assert!(seen.insert(id), "duplicate rule id {id}");
        }
        assert_eq!(seen.len(), 28);
    }

    #[test]
    fn test_scope_filter() {
        let scope = PlatformScope::Only(&[Platform::GitlabCi]);
        assert!(scope.applies_to(Platform::GitlabCi));
        assert!(!scope.applies_to(Platform::GithubActions));
        assert!(PlatformScope::All.applies_to(Platform::Unknown));
    }
}
