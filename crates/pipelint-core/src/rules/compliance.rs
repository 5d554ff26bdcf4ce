use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::parser::gitlab::is_job_entry;
use crate::platforms::Platform;
use crate::rules::context::RuleContext;
use crate::rules::{pipeline, DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};

/// Minimal `permissions` block for the actions a workflow uses.
pub fn suggested_permissions(document: &Node, platform: Platform) -> Vec<&'static str> {
    let Ok(dag) = pipeline(document, platform) else {
        return vec!["contents: read"];
    };
    let actions: Vec<&str> = dag
        .jobs()
        .flat_map(|job| job.steps.iter())
        .filter_map(|step| step.uses.as_deref())
        .collect();

    let releases = actions
        .iter()
        .any(|u| u.contains("create-release") || u.contains("upload-release-asset") || u.contains("gh-release"));
    let mut perms = vec![if releases { "contents: write" } else { "contents: read" }];
    if actions.iter().any(|u| u.contains("docker/build-push-action")) {
        perms.push("packages: write");
    }
    if actions.iter().any(|u| u.contains("codeql-action/upload-sarif")) {
        perms.push("security-events: write");
    }
    if actions.iter().any(|u| u.contains("configure-aws-credentials") || u.contains("google-github-actions/auth")) {
        perms.push("id-token: write");
    }
    perms
}

pub struct MissingPermissions;

static MISSING_PERMISSIONS_META: RuleMeta = RuleMeta {
    id: "PLT-CMP-001",
    name: "Missing explicit permissions",
    description: "Workflows without a permissions block inherit the repository's default token scope",
    category: Category::Compliance,
    severity: DefaultSeverity::Issue(IssueSeverity::Info),
    level: Level::Senior,
    platforms: PlatformScope::Only(&[Platform::GithubActions]),
};

impl Rule for MissingPermissions {
    fn meta(&self) -> &'static RuleMeta {
        &MISSING_PERMISSIONS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        if document.get("permissions").is_some() {
            return Ok(());
        }
        let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) else {
            return Ok(());
        };
        if !jobs.is_empty() && jobs.iter().all(|(_, job)| job.get("permissions").is_some()) {
            return Ok(());
        }

        let perms = suggested_permissions(document, ctx.platform());
        ctx.push_issue(
            Issue::new(
                "Missing explicit permissions block",
                "The workflow does not declare `permissions`, so GITHUB_TOKEN gets whatever the repository default is",
                IssueSeverity::Info,
                Category::Compliance,
            )
            .with_rule(MISSING_PERMISSIONS_META.id)
            .with_suggestion("Declare the minimal token scope at the top of the workflow")
            .with_example(format!("permissions:\n  {}", perms.join("\n  ")))
            .fixable(true)
            .with_fix_minutes(5)
            .with_docs("https://docs.github.com/en/actions/using-jobs/assigning-permissions-to-jobs"),
        );
        Ok(())
    }
}

pub struct MissingTimeouts;

static MISSING_TIMEOUTS_META: RuleMeta = RuleMeta {
    id: "PLT-CMP-002",
    name: "Missing job timeouts",
    description: "Jobs without a timeout can hang for hours before the platform kills them",
    category: Category::Compliance,
    severity: DefaultSeverity::Issue(IssueSeverity::Info),
    level: Level::Expert,
    platforms: PlatformScope::Only(&[Platform::GithubActions, Platform::GitlabCi]),
};

impl Rule for MissingTimeouts {
    fn meta(&self) -> &'static RuleMeta {
        &MISSING_TIMEOUTS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let (missing, key, example): (Vec<&str>, &str, &str) = match ctx.platform() {
            Platform::GithubActions => {
                let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) else {
                    return Ok(());
                };
                let missing = jobs
                    .iter()
                    // reusable workflow calls cannot set a timeout
                    .filter(|(_, job)| job.get("uses").is_none() && job.get("timeout-minutes").is_none())
                    .map(|(id, _)| id)
                    .collect();
                (missing, "timeout-minutes", "timeout-minutes: 30")
            }
            _ => {
                if document.get_path("default.timeout").is_some() {
                    return Ok(());
                }
                let Some(map) = document.as_mapping() else {
                    return Ok(());
                };
                let missing = map
                    .iter()
                    .filter(|(k, v)| is_job_entry(k, v) && v.get("timeout").is_none())
                    .map(|(id, _)| id)
                    .collect();
                (missing, "timeout", "timeout: 30 minutes")
            }
        };
        if missing.is_empty() {
            return Ok(());
        }

        let lines = missing.iter().filter_map(|id| ctx.line_of_key(id)).collect();
        ctx.push_issue(
            Issue::new(
                "Jobs without a timeout",
                format!("Jobs {} have no `{key}`; a hung step holds the runner until the platform limit", missing.join(", ")),
                IssueSeverity::Info,
                Category::Compliance,
            )
            .with_rule(MISSING_TIMEOUTS_META.id)
            .with_suggestion(format!("Set `{key}` on each job to a little above its normal duration"))
            .with_example(example)
            .with_lines(lines)
            .fixable(true)
            .with_fix_minutes(2),
        );
        Ok(())
    }
}

pub struct IgnoredFailures;

static IGNORED_FAILURES_META: RuleMeta = RuleMeta {
    id: "PLT-CMP-003",
    name: "Failures ignored",
    description: "Jobs or steps whose failure does not fail the pipeline",
    category: Category::Compliance,
    severity: DefaultSeverity::Issue(IssueSeverity::Info),
    level: Level::Senior,
    platforms: PlatformScope::Only(&[Platform::GithubActions, Platform::GitlabCi]),
};

impl Rule for IgnoredFailures {
    fn meta(&self) -> &'static RuleMeta {
        &IGNORED_FAILURES_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let key = match ctx.platform() {
            Platform::GithubActions => "continue-on-error",
            _ => "allow_failure",
        };
        let prefix = format!("{key}:");
        let lines = ctx.lines_where(|line| {
            let trimmed = line.trim_start().trim_start_matches("- ");
            trimmed
                .strip_prefix(prefix.as_str())
                .is_some_and(|value| value.trim() == "true")
        });

        for line in lines {
            ctx.push_issue(
                Issue::new(
                    "Failure ignored",
                    format!("`{key}: true` lets this job or step fail without failing the pipeline"),
                    IssueSeverity::Info,
                    Category::Compliance,
                )
                .with_rule(IGNORED_FAILURES_META.id)
                .with_suggestion("Fix or quarantine the flaky work instead of ignoring its result, or document why failure is acceptable")
                .at_line(line),
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
    fn test_missing_permissions_with_suggestion() {
        let raw = r#"
on: push
jobs:
  image:
    runs-on: ubuntu-latest
    steps:
      - uses: docker/build-push-action@v5
"#;
        let outcome = run(&MissingPermissions, raw, Platform::GithubActions);
        assert_eq!(outcome.issues.len(), 1);
        let issue = &outcome.issues[0];
        assert_eq!(issue.category, Category::Compliance);
        assert_eq!(issue.example.as_deref(), Some("permissions:\n  contents: read\n  packages: write"));
    }

    #[test]
    fn test_declared_permissions_pass() {
        let raw = "on: push\npermissions:\n  contents: read\njobs:\n  a:\n    runs-on: x\n    steps: [{run: make}]\n";
        assert!(run(&MissingPermissions, raw, Platform::GithubActions).issues.is_empty());
    }

    #[test]
    fn test_missing_timeouts() {
        let raw = "on: push\njobs:\n  a:\n    runs-on: x\n    timeout-minutes: 10\n    steps: [{run: make}]\n  b:\n    runs-on: x\n    steps: [{run: make}]\n";
        let outcome = run(&MissingTimeouts, raw, Platform::GithubActions);
        assert_eq!(outcome.issues.len(), 1);
        assert!(outcome.issues[0].description.starts_with("Jobs b have"));
        assert_eq!(outcome.issues[0].lines, vec![7]);
    }

    #[test]
    fn test_gitlab_default_timeout_covers_jobs() {
        let raw = "default:\n  timeout: 20m\nbuild:\n  script: [make]\n";
        assert!(run(&MissingTimeouts, raw, Platform::GitlabCi).issues.is_empty());
    }

    #[test]
    fn test_ignored_failures() {
        let raw = "lint:\n  script: [make lint]\n  allow_failure: true\ntest:\n  script: [make test]\n  allow_failure: false\n";
        let outcome = run(&IgnoredFailures, raw, Platform::GitlabCi);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].lines, vec![3]);
    }
}
