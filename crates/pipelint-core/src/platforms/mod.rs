pub mod bitbucket;
pub mod github;
pub mod gitlab;

use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::rules::context::RuleContext;
use serde::{Serialize, Serializer};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

/// CI/CD dialect a configuration is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    GithubActions,
    GitlabCi,
    BitbucketPipelines,
    Unknown,
}

impl Platform {
    pub const SUPPORTED: &'static [Platform] = &[
        Platform::GithubActions,
        Platform::GitlabCi,
        Platform::BitbucketPipelines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GithubActions => "github-actions",
            Platform::GitlabCi => "gitlab-ci",
            Platform::BitbucketPipelines => "bitbucket-pipelines",
            Platform::Unknown => "unknown",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::GithubActions => "GitHub Actions",
            Platform::GitlabCi => "GitLab CI",
            Platform::BitbucketPipelines => "Bitbucket Pipelines",
            Platform::Unknown => "Unknown",
        }
    }

    /// Resolve a platform label. Short aliases (`github`, `gitlab`,
    /// `bitbucket`) are accepted; anything else is `Unknown`.
    pub fn from_label(label: &str) -> Platform {
        match label.trim().to_lowercase().as_str() {
            "github-actions" | "github" | "gha" => Platform::GithubActions,
            "gitlab-ci" | "gitlab" => Platform::GitlabCi,
            "bitbucket-pipelines" | "bitbucket" => Platform::BitbucketPipelines,
            _ => Platform::Unknown,
        }
    }

    /// Guess the platform from a file path, falling back to the document shape.
    pub fn detect(path: Option<&Path>, document: &Node) -> Platform {
        if let Some(path) = path {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let full = path.to_string_lossy().replace('\\', "/");

            if file_name == ".gitlab-ci.yml" || file_name == ".gitlab-ci.yaml" {
                return Platform::GitlabCi;
            }
            if file_name.starts_with("bitbucket-pipelines") {
                return Platform::BitbucketPipelines;
            }
            if full.contains(".github/workflows/") {
                return Platform::GithubActions;
            }
        }

        if document.get("pipelines").is_some() {
            return Platform::BitbucketPipelines;
        }
        if document.get("jobs").is_some() && (document.get("on").is_some() || document.get("true").is_some()) {
            return Platform::GithubActions;
        }
        let gitlab_like = document.get("stages").is_some()
            || document
                .as_mapping()
                .map(|m| m.iter().any(|(_, v)| v.get("script").is_some()))
                .unwrap_or(false);
        if gitlab_like {
            return Platform::GitlabCi;
        }
        if document.get("jobs").is_some() {
            return Platform::GithubActions;
        }
        Platform::Unknown
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Structural validation for one platform dialect.
///
/// Findings go through the context sink; the `validate_structure` return
/// value is an advisory copy of the top-level issues it pushed.
pub trait PlatformAnalyzer: Send + Sync {
    fn platform(&self) -> Platform;

    /// Required top-level fields.
    fn validate_structure(&self, document: &Node, ctx: &mut RuleContext) -> Vec<Issue>;

    /// Per-job checks: runner/stage fields, step lists, dependencies.
    fn analyze_jobs(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError>;

    /// Per-step checks for the steps of one job (`label` names the job).
    fn analyze_steps(&self, steps: &[Node], label: &str, ctx: &mut RuleContext) -> Result<(), RuleError>;
}

static GITHUB: github::GitHubActionsAnalyzer = github::GitHubActionsAnalyzer;
static GITLAB: gitlab::GitLabCIAnalyzer = gitlab::GitLabCIAnalyzer;
static BITBUCKET: bitbucket::BitbucketAnalyzer = bitbucket::BitbucketAnalyzer;

pub fn analyzer_for(platform: Platform) -> Option<&'static dyn PlatformAnalyzer> {
    match platform {
        Platform::GithubActions => Some(&GITHUB),
        Platform::GitlabCi => Some(&GITLAB),
        Platform::BitbucketPipelines => Some(&BITBUCKET),
        Platform::Unknown => None,
    }
}

/// Run an analyzer with failure isolation.
///
/// An error or panic becomes a single `analyzer-error-<platform>` issue;
/// findings pushed before the failure stay in the sink.
pub fn run_analyzer(analyzer: &dyn PlatformAnalyzer, document: &Node, ctx: &mut RuleContext) {
    let platform = analyzer.platform();
    tracing::debug!(platform = %platform, "running platform analyzer");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        analyzer.validate_structure(document, ctx);
        analyzer.analyze_jobs(document, ctx)
    }));

    let message = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(panic) => crate::rules::engine::panic_message(panic.as_ref()),
    };

    tracing::warn!(platform = %platform, error = %message, "platform analyzer failed");
    ctx.push_issue(
        Issue::new(
            format!("{} analyzer failed", platform.display_name()),
            format!("Structural analysis stopped early: {message}"),
            IssueSeverity::Error,
            Category::Linting,
        )
        .with_rule(format!("analyzer-error-{platform}")),
    );
}

/// Shorthand used by the analyzers for structure-category issues.
pub(crate) fn structure_issue(
    title: impl Into<String>,
    description: impl Into<String>,
    severity: IssueSeverity,
) -> Issue {
    Issue::new(title, description, severity, Category::Structure)
}

/// Attach a source line when one was found.
pub(crate) fn located(issue: Issue, line: Option<usize>) -> Issue {
    match line {
        Some(line) => issue.at_line(line),
        None => issue,
    }
}
