use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Optimization, Rating};
use crate::parser::bitbucket;
use crate::parser::dag::PipelineDag;
use crate::parser::gitlab::is_job_entry;
use crate::platforms::Platform;
use crate::rules::context::RuleContext;
use crate::rules::{pipeline, DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};

/// Matrix expansions above this many combinations are reported.
pub const MAX_MATRIX_COMBINATIONS: usize = 10;

/// Billing class of a runner label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerClass {
    Standard,
    Windows,
    MacOs,
    Large,
}

impl RunnerClass {
    /// Per-minute price relative to a standard Linux runner.
    pub fn multiplier(&self) -> u32 {
        match self {
            RunnerClass::Standard => 1,
            RunnerClass::Windows => 2,
            RunnerClass::Large => 4,
            RunnerClass::MacOs => 10,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunnerClass::Standard => "standard",
            RunnerClass::Windows => "Windows",
            RunnerClass::MacOs => "macOS",
            RunnerClass::Large => "large",
        }
    }
}

/// Classify a `runs-on` / tags / Bitbucket size label.
pub fn classify_runner(runs_on: &str) -> RunnerClass {
    let label = runs_on.to_lowercase();
    if label.contains("macos") {
        return RunnerClass::MacOs;
    }
    if label.contains("windows") {
        return RunnerClass::Windows;
    }
    let bitbucket_size = ["bitbucket:2x", "bitbucket:4x", "bitbucket:8x", "bitbucket:16x"]
        .iter()
        .any(|size| label == *size);
    if bitbucket_size || label.contains("large") || label.contains("-cores") || label.contains("gpu") {
        return RunnerClass::Large;
    }
    RunnerClass::Standard
}

pub struct ExpensiveRunners;

static EXPENSIVE_RUNNERS_META: RuleMeta = RuleMeta {
    id: "PLT-COST-001",
    name: "Expensive runner classes",
    description: "macOS, Windows and large runners bill at a multiple of the standard rate",
    category: Category::Cost,
    severity: DefaultSeverity::Optimization(Rating::Medium),
    level: Level::Intermediate,
    platforms: PlatformScope::All,
};

impl Rule for ExpensiveRunners {
    fn meta(&self) -> &'static RuleMeta {
        &EXPENSIVE_RUNNERS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;
        for job in dag.jobs() {
            let class = classify_runner(&job.runs_on);
            if class == RunnerClass::Standard {
                continue;
            }
            let impact = if class == RunnerClass::MacOs { Rating::High } else { Rating::Medium };
            let label = job.runs_on.trim_start_matches("bitbucket:");
            let line = ctx.line_containing(label);
            ctx.push_optimization(
                Optimization::new(
                    format!("Expensive {} runner", class.label()),
                    format!(
                        "Job '{}' runs on '{}', billed at about {}x the standard Linux rate",
                        job.id,
                        label,
                        class.multiplier()
                    ),
                    impact,
                    Rating::Medium,
                    Category::Cost,
                    "Run platform-independent work on standard Linux runners and keep the expensive runner for what needs it",
                )
                .with_rule(EXPENSIVE_RUNNERS_META.id)
                .with_lines(line.into_iter().collect()),
            );
        }
        Ok(())
    }
}

pub struct UnfilteredTriggers;

static UNFILTERED_TRIGGERS_META: RuleMeta = RuleMeta {
    id: "PLT-COST-002",
    name: "Unfiltered build triggers",
    description: "Pipelines that run on every push to every branch",
    category: Category::Cost,
    severity: DefaultSeverity::Optimization(Rating::Medium),
    level: Level::Intermediate,
    platforms: PlatformScope::Only(&[Platform::GithubActions, Platform::GitlabCi]),
};

impl UnfilteredTriggers {
    fn gitlab_jobs_filtered(document: &Node) -> bool {
        let Some(map) = document.as_mapping() else {
            return false;
        };
        let mut jobs = map.iter().filter(|(k, v)| is_job_entry(k, v)).peekable();
        jobs.peek().is_some()
            && jobs.all(|(_, job)| ["rules", "only", "except"].iter().any(|k| job.get(k).is_some()))
    }
}

impl Rule for UnfilteredTriggers {
    fn meta(&self) -> &'static RuleMeta {
        &UNFILTERED_TRIGGERS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;
        let unfiltered_push = dag.triggers.iter().any(|t| t.event == "push" && !t.is_filtered());
        if !unfiltered_push {
            return Ok(());
        }

        let (description, example, line) = match ctx.platform() {
            Platform::GitlabCi => {
                if Self::gitlab_jobs_filtered(document) {
                    return Ok(());
                }
                (
                    "No `workflow: rules` or per-job `rules` limit when pipelines run, so every push to every branch starts one",
                    "workflow:\n  rules:\n    - if: $CI_PIPELINE_SOURCE == \"merge_request_event\"\n    - if: $CI_COMMIT_BRANCH == $CI_DEFAULT_BRANCH",
                    None,
                )
            }
            _ => (
                "The workflow runs on every push to every branch, including work-in-progress branches",
                "on:\n  push:\n    branches: [main]\n    paths-ignore: ['docs/**']",
                ctx.line_of_key("push").or_else(|| ctx.line_of_key("on")),
            ),
        };

        ctx.push_optimization(
            Optimization::new(
                "Filter pipeline triggers",
                description,
                Rating::Medium,
                Rating::Low,
                Category::Cost,
                "Limit push triggers to the branches and paths that need a build",
            )
            .with_rule(UNFILTERED_TRIGGERS_META.id)
            .with_example(example)
            .with_lines(line.into_iter().collect()),
        );
        Ok(())
    }
}

/// `true` for globs that match the whole workspace.
pub fn is_workspace_glob(path: &str) -> bool {
    matches!(path.trim(), "." | "./" | "*" | "**" | "**/*" | "/" | "./**")
}

/// `true` for artifact paths that sweep up the whole workspace or dependency trees.
pub fn is_broad_path(path: &str) -> bool {
    is_workspace_glob(path) || path.contains("node_modules")
}

pub struct OversizedArtifacts;

static OVERSIZED_ARTIFACTS_META: RuleMeta = RuleMeta {
    id: "PLT-COST-003",
    name: "Oversized artifacts",
    description: "Artifact and cache globs that capture the workspace, and artifacts kept forever",
    category: Category::Cost,
    severity: DefaultSeverity::Optimization(Rating::Medium),
    level: Level::Senior,
    platforms: PlatformScope::All,
};

struct ArtifactFinding {
    owner: String,
    kind: ArtifactProblem,
}

enum ArtifactProblem {
    BroadPath(String),
    BroadCache(String),
    NoExpiry,
}

impl OversizedArtifacts {
    fn github(document: &Node, out: &mut Vec<ArtifactFinding>) {
        let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) else {
            return;
        };
        for (job_id, job) in jobs.iter() {
            for step in job.get("steps").and_then(Node::as_sequence).unwrap_or_default() {
                let uploads = step
                    .get("uses")
                    .and_then(Node::as_str)
                    .is_some_and(|u| u.starts_with("actions/upload-artifact"));
                if !uploads {
                    continue;
                }
                let paths = step
                    .get_path("with.path")
                    .and_then(Node::as_str)
                    .map(|p| p.lines().map(str::to_string).collect::<Vec<_>>())
                    .unwrap_or_default();
                for path in paths.into_iter().filter(|p| is_broad_path(p)) {
                    out.push(ArtifactFinding { owner: job_id.to_string(), kind: ArtifactProblem::BroadPath(path) });
                }
                if step.get_path("with.retention-days").is_none() {
                    out.push(ArtifactFinding { owner: job_id.to_string(), kind: ArtifactProblem::NoExpiry });
                }
            }
        }
    }

    fn gitlab(document: &Node, out: &mut Vec<ArtifactFinding>) {
        let Some(map) = document.as_mapping() else {
            return;
        };
        let default_expiry = document.get_path("default.artifacts.expire_in").is_some();
        for (job_id, job) in map.iter().filter(|(k, v)| is_job_entry(k, v)) {
            let Some(artifacts) = job.get("artifacts") else {
                continue;
            };
            let paths = artifacts.get("paths").map(Node::string_list).unwrap_or_default();
            for path in paths.into_iter().filter(|p| is_broad_path(p)) {
                out.push(ArtifactFinding { owner: job_id.to_string(), kind: ArtifactProblem::BroadPath(path) });
            }
            // report-only artifacts expire on their own
            let has_files = !artifacts.get("paths").map(Node::string_list).unwrap_or_default().is_empty()
                || artifacts.get("untracked").is_some_and(Node::is_truthy);
            if has_files && artifacts.get("expire_in").is_none() && !default_expiry {
                out.push(ArtifactFinding { owner: job_id.to_string(), kind: ArtifactProblem::NoExpiry });
            }
        }
    }

    fn bitbucket(document: &Node, out: &mut Vec<ArtifactFinding>) {
        for entry in bitbucket::step_entries(document) {
            let artifacts = match entry.step.get("artifacts") {
                Some(Node::Mapping(_)) => entry.step.get_path("artifacts.paths"),
                other => other,
            };
            let paths = artifacts.map(Node::string_list).unwrap_or_default();
            let owner = entry
                .step
                .get("name")
                .and_then(Node::as_str)
                .map(String::from)
                .unwrap_or_else(|| entry.pipeline.clone());
            for path in paths.into_iter().filter(|p| is_broad_path(p)) {
                out.push(ArtifactFinding { owner: owner.clone(), kind: ArtifactProblem::BroadPath(path) });
            }
        }
    }

    fn path_lines(ctx: &RuleContext, path: &str) -> Vec<usize> {
        ctx.lines_where(|l| {
            let item = l.trim_start().trim_start_matches("- ").trim_start_matches("path:").trim();
            item.trim_matches(|c| c == '"' || c == '\'') == path
        })
    }

    /// Dependency caches such as `node_modules` are expected; only workspace-wide globs are reported.
    fn caches(dag: &PipelineDag, out: &mut Vec<ArtifactFinding>) {
        for job in dag.jobs() {
            let paths = job.caches.iter().flat_map(|cache| cache.paths.iter());
            for path in paths.filter(|p| is_workspace_glob(p)) {
                out.push(ArtifactFinding { owner: job.id.clone(), kind: ArtifactProblem::BroadCache(path.clone()) });
            }
        }
    }
}

impl Rule for OversizedArtifacts {
    fn meta(&self) -> &'static RuleMeta {
        &OVERSIZED_ARTIFACTS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let mut found = Vec::new();
        match ctx.platform() {
            Platform::GithubActions => Self::github(document, &mut found),
            Platform::GitlabCi => Self::gitlab(document, &mut found),
            Platform::BitbucketPipelines => Self::bitbucket(document, &mut found),
            Platform::Unknown => {}
        }
        match pipeline(document, ctx.platform()) {
            Ok(dag) => Self::caches(&dag, &mut found),
            Err(err) => tracing::debug!(error = %err, "cache paths not checked"),
        }

        for finding in found {
            let optimization = match &finding.kind {
                ArtifactProblem::BroadPath(path) => Optimization::new(
                    "Narrow artifact paths",
                    format!(
                        "'{}' uploads '{path}', which sweeps up far more than the build output",
                        finding.owner
                    ),
                    Rating::Medium,
                    Rating::Low,
                    Category::Cost,
                    "List only the files later jobs or reviewers need, e.g. dist/ or coverage reports",
                )
                .with_lines(Self::path_lines(ctx, path)),
                ArtifactProblem::BroadCache(path) => Optimization::new(
                    "Narrow cache paths",
                    format!(
                        "'{}' caches '{path}', so every save and restore moves the whole workspace",
                        finding.owner
                    ),
                    Rating::Medium,
                    Rating::Low,
                    Category::Cost,
                    "Cache only dependency directories such as ~/.npm, ~/.cache/pip or vendor/",
                )
                .with_lines(Self::path_lines(ctx, path)),
                ArtifactProblem::NoExpiry => Optimization::new(
                    "Set an artifact expiry",
                    format!(
                        "Artifacts of '{}' have no expiry and are stored for the platform maximum",
                        finding.owner
                    ),
                    Rating::Low,
                    Rating::Low,
                    Category::Cost,
                    "Expire build artifacts after a few days",
                )
                .with_example(match ctx.platform() {
                    Platform::GitlabCi => "artifacts:\n  expire_in: 1 week",
                    _ => "with:\n  retention-days: 5",
                }),
            };
            ctx.push_optimization(optimization.with_rule(OVERSIZED_ARTIFACTS_META.id));
        }
        Ok(())
    }
}

pub struct LargeMatrix;

static LARGE_MATRIX_META: RuleMeta = RuleMeta {
    id: "PLT-COST-004",
    name: "Large matrix expansion",
    description: "Matrices with more than ten combinations multiply runner minutes",
    category: Category::Cost,
    severity: DefaultSeverity::Optimization(Rating::High),
    level: Level::Intermediate,
    platforms: PlatformScope::Only(&[Platform::GithubActions, Platform::GitlabCi]),
};

impl Rule for LargeMatrix {
    fn meta(&self) -> &'static RuleMeta {
        &LARGE_MATRIX_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;
        for job in dag.jobs() {
            let Some(matrix) = &job.matrix else {
                continue;
            };
            if matrix.total_combinations <= MAX_MATRIX_COMBINATIONS {
                continue;
            }
            let axes: Vec<String> = matrix
                .variables
                .iter()
                .map(|(name, count)| format!("{name} ({count})"))
                .collect();
            let line = ctx.line_of_key("matrix");
            ctx.push_optimization(
                Optimization::new(
                    "Large matrix expansion",
                    format!(
                        "Job '{}' expands to {} combinations across {}",
                        job.id,
                        matrix.total_combinations,
                        axes.join(" x ")
                    ),
                    Rating::High,
                    Rating::Medium,
                    Category::Cost,
                    "Test the full matrix on a schedule and a representative subset on pull requests, or prune with `exclude`",
                )
                .with_rule(LARGE_MATRIX_META.id)
                .with_lines(line.into_iter().collect()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::rules::RuleOutcome;

    fn run(rule: &dyn Rule, raw: &str, platform: Platform) -> RuleOutcome {
        let doc = parse(raw).unwrap();
        let mut ctx = RuleContext::new(raw, platform);
        rule.check(&doc, &mut ctx).unwrap();
        ctx.into_outcome()
    }

    #[test]
    fn test_classify_runner() {
        assert_eq!(classify_runner("ubuntu-latest"), RunnerClass::Standard);
        assert_eq!(classify_runner("macos-14"), RunnerClass::MacOs);
        assert_eq!(classify_runner("windows-2022"), RunnerClass::Windows);
        assert_eq!(classify_runner("ubuntu-22.04-16-cores"), RunnerClass::Large);
        assert_eq!(classify_runner("saas-linux-large-amd64"), RunnerClass::Large);
        assert_eq!(classify_runner("bitbucket:4x"), RunnerClass::Large);
        assert_eq!(classify_runner("bitbucket:node:20"), RunnerClass::Standard);
    }

    #[test]
    fn test_macos_runner_reported() {
        let raw = "on: push\njobs:\n  ios:\n    runs-on: macos-14\n    steps: [{run: xcodebuild}]\n";
        let outcome = run(&ExpensiveRunners, raw, Platform::GithubActions);
        assert_eq!(outcome.optimizations.len(), 1);
        assert_eq!(outcome.optimizations[0].impact, Rating::High);
        assert_eq!(outcome.optimizations[0].category, Category::Cost);
        assert_eq!(outcome.optimizations[0].lines, vec![4]);
    }

    #[test]
    fn test_unfiltered_push() {
        let raw = "on:\n  push:\njobs:\n  a:\n    runs-on: ubuntu-latest\n    steps: [{run: make}]\n";
        let outcome = run(&UnfilteredTriggers, raw, Platform::GithubActions);
        assert_eq!(outcome.optimizations.len(), 1);
        assert_eq!(outcome.optimizations[0].lines, vec![2]);

        let filtered = "on:\n  push:\n    branches: [main]\njobs:\n  a:\n    runs-on: ubuntu-latest\n    steps: [{run: make}]\n";
        assert!(run(&UnfilteredTriggers, filtered, Platform::GithubActions).optimizations.is_empty());
    }

    #[test]
    fn test_gitlab_rules_filter_pipelines() {
        let unfiltered = "build:\n  script: [make]\n";
        assert_eq!(run(&UnfilteredTriggers, unfiltered, Platform::GitlabCi).optimizations.len(), 1);

        let per_job = "build:\n  script: [make]\n  only: [main]\n";
        assert!(run(&UnfilteredTriggers, per_job, Platform::GitlabCi).optimizations.is_empty());

        let workflow = "workflow:\n  rules:\n    - if: $CI_COMMIT_BRANCH == \"main\"\nbuild:\n  script: [make]\n";
        assert!(run(&UnfilteredTriggers, workflow, Platform::GitlabCi).optimizations.is_empty());
    }

    #[test]
    fn test_broad_artifacts_and_expiry() {
        let raw = r#"
build:
  script: [npm ci, npm run build]
  artifacts:
    paths:
      - node_modules/
      - dist/
"#;
        let outcome = run(&OversizedArtifacts, raw, Platform::GitlabCi);
        let titles: Vec<_> = outcome.optimizations.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles, vec!["Narrow artifact paths", "Set an artifact expiry"]);
        assert_eq!(outcome.optimizations[0].lines, vec![6]);
    }

    #[test]
    fn test_workspace_cache_glob() {
        let raw = r#"
build:
  script: [make]
  cache:
    key: build
    paths:
      - "**/*"
"#;
        let outcome = run(&OversizedArtifacts, raw, Platform::GitlabCi);
        assert_eq!(outcome.optimizations.len(), 1);
        assert_eq!(outcome.optimizations[0].title, "Narrow cache paths");
        assert_eq!(outcome.optimizations[0].lines, vec![7]);
        assert_eq!(outcome.optimizations[0].rule_id.as_deref(), Some("PLT-COST-003"));

        let github = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/cache@v4
        with:
          path: .
          key: "${{ hashFiles('package-lock.json') }}"
"#;
        let outcome = run(&OversizedArtifacts, github, Platform::GithubActions);
        assert_eq!(outcome.optimizations.len(), 1);
        assert_eq!(outcome.optimizations[0].lines, vec![9]);
    }

    #[test]
    fn test_dependency_cache_is_fine() {
        let raw = r#"
pipelines:
  default:
    - step:
        name: Install
        caches: [node]
        script: [npm ci]
"#;
        assert!(run(&OversizedArtifacts, raw, Platform::BitbucketPipelines).optimizations.is_empty());
    }

    #[test]
    fn test_github_upload_with_retention_is_fine() {
        let raw = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/upload-artifact@v4
        with:
          name: dist
          path: dist/
          retention-days: 3
"#;
        assert!(run(&OversizedArtifacts, raw, Platform::GithubActions).optimizations.is_empty());
    }

    #[test]
    fn test_large_matrix() {
        let raw = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        os: [ubuntu-latest, windows-latest, macos-latest]
        node: [16, 18, 20, 22]
    steps: [{run: npm test}]
"#;
        let outcome = run(&LargeMatrix, raw, Platform::GithubActions);
        assert_eq!(outcome.optimizations.len(), 1);
        assert!(outcome.optimizations[0].description.contains("12 combinations"));
    }
}
