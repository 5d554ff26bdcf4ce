pub mod critical_path;
pub mod metrics;
pub mod scoring;

use crate::config::AnalysisConfig;
use crate::cost::{estimate_costs, CostEstimation};
use crate::document::Node;
use crate::error::ParseError;
use crate::findings::{Category, Issue, IssueSeverity, Optimization};
use crate::graph::{dependency_graph, PLACEHOLDER_GRAPH};
use crate::parser::{self, build_dag, dag::PipelineDag};
use crate::platforms::{analyzer_for, run_analyzer, Platform};
use crate::rules::context::{RuleContext, RuleOutcome};
use crate::rules::engine::{panic_message, RuleEngine};
use chrono::{DateTime, Utc};
use metrics::Metrics;
use scoring::{recommendations, score, Recommendation, SecurityReport};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Everything one analysis produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub platform: String,
    pub score: u8,
    pub issues: Vec<Issue>,
    pub optimizations: Vec<Optimization>,
    pub security: SecurityReport,
    pub cost: CostEstimation,
    pub metrics: Metrics,
    /// Mermaid flowchart source.
    pub dependency_graph: String,
    pub recommendations: Vec<Recommendation>,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Result reported when analysis itself broke down.
    pub fn failed(message: &str) -> Self {
        let issues = vec![Issue::new(
            "Analysis failed",
            format!("The configuration could not be analyzed: {message}"),
            IssueSeverity::Critical,
            Category::Structure,
        )];
        Self {
            platform: Platform::Unknown.as_str().to_string(),
            score: 0,
            recommendations: recommendations(&issues, &[]),
            issues,
            optimizations: Vec::new(),
            security: SecurityReport::default(),
            cost: CostEstimation::disabled(),
            metrics: Metrics::default(),
            dependency_graph: PLACEHOLDER_GRAPH.to_string(),
            analyzed_at: Utc::now(),
        }
    }
}

/// Parse `raw_text` and analyze it. Only YAML errors are returned; every
/// other problem is reported as findings.
pub fn analyze_source(raw_text: &str, platform: &str, config: &AnalysisConfig) -> Result<AnalysisResult, ParseError> {
    let document = parser::parse(raw_text)?;
    Ok(analyze(&document, platform, raw_text, config))
}

/// Analyze a parsed document. Never panics; an internal failure yields
/// [`AnalysisResult::failed`].
pub fn analyze(document: &Node, platform: &str, raw_text: &str, config: &AnalysisConfig) -> AnalysisResult {
    match catch_unwind(AssertUnwindSafe(|| run_analysis(document, platform, raw_text, config))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(error = %message, "analysis aborted");
            AnalysisResult::failed(&message)
        }
    }
}

/// Problems with the input as a whole. Rules are skipped when one is found.
fn input_error(document: &Node, raw_text: &str, config: &AnalysisConfig) -> Option<Issue> {
    if raw_text.len() > config.max_file_size {
        return Some(
            Issue::new(
                "Configuration file too large",
                format!(
                    "The configuration is {} bytes; the limit is {} bytes",
                    raw_text.len(),
                    config.max_file_size
                ),
                IssueSeverity::Error,
                Category::Structure,
            )
            .with_suggestion("Split the pipeline into smaller files or raise `max_file_size`"),
        );
    }
    if raw_text.trim().is_empty() || document.is_empty_document() {
        return Some(
            Issue::new(
                "Empty configuration",
                "The configuration file has no content",
                IssueSeverity::Error,
                Category::Structure,
            )
            .with_suggestion("Add pipeline definitions"),
        );
    }
    if !document.is_mapping() {
        return Some(
            Issue::new(
                "Invalid configuration root",
                "The top level of a pipeline configuration must be a mapping",
                IssueSeverity::Error,
                Category::Structure,
            )
            .with_suggestion("Start the file with top-level keys such as `jobs:` or `stages:`"),
        );
    }
    None
}

fn engine_for(config: &AnalysisConfig) -> Result<RuleEngine<'static>, crate::error::ConfigError> {
    let mut engine = RuleEngine::builtin()
        .with_disabled_rules(config.disabled_rules.iter().cloned())
        .with_custom_rules(config.custom_rule_set()?);
    if !config.enable_security_analysis {
        engine = engine.disable_category(Category::Security);
    }
    if !config.enable_performance_analysis {
        engine = engine.disable_category(Category::Performance);
    }
    if !config.enable_cost_analysis {
        engine = engine.disable_category(Category::Cost);
    }
    Ok(engine)
}

fn run_analysis(document: &Node, label: &str, raw_text: &str, config: &AnalysisConfig) -> AnalysisResult {
    let platform = Platform::from_label(label);
    let platform_label = match platform {
        Platform::Unknown if !label.trim().is_empty() => label.trim().to_lowercase(),
        known => known.as_str().to_string(),
    };

    let (outcome, dag) = match input_error(document, raw_text, config) {
        Some(issue) => {
            tracing::debug!(title = %issue.title, "skipping rules for unusable input");
            let outcome = RuleOutcome {
                issues: vec![issue],
                ..RuleOutcome::default()
            };
            (outcome, PipelineDag::new(String::new(), platform_label.clone()))
        }
        None => (run_rules(document, platform, raw_text, config), pipeline_model(document, platform)),
    };

    let RuleOutcome {
        issues,
        optimizations,
        vulnerabilities,
    } = outcome;

    let score = score(&issues, &vulnerabilities);
    let security = SecurityReport::from_vulnerabilities(vulnerabilities);
    let metrics = Metrics::compute(&dag, raw_text, security.overall_score);
    let cost = if config.enable_cost_analysis {
        estimate_costs(&dag)
    } else {
        CostEstimation::disabled()
    };
    let recommendations = recommendations(&issues, &optimizations);

    tracing::info!(
        platform = %platform_label,
        score,
        issues = issues.len(),
        optimizations = optimizations.len(),
        vulnerabilities = security.vulnerabilities.len(),
        "analysis complete"
    );

    AnalysisResult {
        platform: platform_label,
        score,
        issues,
        optimizations,
        security,
        cost,
        metrics,
        dependency_graph: dependency_graph(document, platform),
        recommendations,
        analyzed_at: Utc::now(),
    }
}

fn run_rules(document: &Node, platform: Platform, raw_text: &str, config: &AnalysisConfig) -> RuleOutcome {
    let mut ctx = RuleContext::new(raw_text, platform);

    if let Some(analyzer) = analyzer_for(platform) {
        run_analyzer(analyzer, document, &mut ctx);
    }

    match engine_for(config) {
        Ok(engine) => engine.run(document, &mut ctx, config.level()),
        Err(err) => {
            tracing::warn!(error = %err, "custom rules rejected");
            ctx.push_issue(Issue::new(
                "Invalid custom rule",
                err.to_string(),
                IssueSeverity::Error,
                Category::Linting,
            ));
        }
    }

    ctx.into_outcome()
}

/// Job graph for metrics and cost. A document the builder cannot read
/// yields an empty graph; the analyzers already report why.
fn pipeline_model(document: &Node, platform: Platform) -> PipelineDag {
    build_dag(document, platform).unwrap_or_else(|err| {
        tracing::debug!(error = %err, "no job graph for document");
        PipelineDag::new(String::new(), platform.as_str().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(raw: &str, platform: &str) -> AnalysisResult {
        analyze_source(raw, platform, &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_configuration() {
        let result = run("", "github-actions");
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].title, "Empty configuration");
        assert_eq!(result.issues[0].severity, IssueSeverity::Error);
        assert_eq!(result.score, 85);
        assert!(result.optimizations.is_empty());
        assert_eq!(result.security.overall_score, 100);

        let result = run("{}", "gitlab-ci");
        assert_eq!(result.issues[0].title, "Empty configuration");
    }

    #[test]
    fn test_oversized_input_skips_rules() {
        let config = AnalysisConfig {
            max_file_size: 16,
            ..AnalysisConfig::default()
        };
        let raw = "jobs:\n  build:\n    runs-on: macos-latest\n";
        let result = analyze(&parse(raw).unwrap(), "github-actions", raw, &config);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].title, "Configuration file too large");
        assert!(result.optimizations.is_empty());
    }

    #[test]
    fn test_non_mapping_root() {
        let result = run("- a\n- b\n", "gitlab-ci");
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].title, "Invalid configuration root");
    }

    #[test]
    fn test_cost_disabled_is_zero() {
        let config = AnalysisConfig {
            enable_cost_analysis: false,
            ..AnalysisConfig::default()
        };
        let raw = "on: push\njobs:\n  build:\n    runs-on: macos-latest\n    steps:\n      - run: make\n";
        let result = analyze_source(raw, "github-actions", &config).unwrap();
        assert_eq!(result.cost, CostEstimation::default());
        assert!(result.optimizations.iter().all(|o| o.category != Category::Cost));
    }

    #[test]
    fn test_platform_label_is_normalized() {
        let raw = "build:\n  script: [make]\n";
        assert_eq!(run(raw, "gitlab").platform, "gitlab-ci");
        assert_eq!(run(raw, "Jenkins").platform, "jenkins");
    }

    #[test]
    fn test_failed_result() {
        let result = AnalysisResult::failed("boom");
        assert_eq!(result.platform, "unknown");
        assert_eq!(result.score, 0);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].severity, IssueSeverity::Critical);
        assert_eq!(result.metrics, Metrics::default());
    }

    #[test]
    fn test_parse_error_surfaces() {
        assert!(analyze_source("jobs: [\n", "github-actions", &AnalysisConfig::default()).is_err());
    }
}
