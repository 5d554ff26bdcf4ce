use super::{located, structure_issue, Platform, PlatformAnalyzer};
use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::rules::context::RuleContext;
use crate::security::supply_chain::{classify_image, classify_pinning, ImageTag, PinningRisk};

/// Structural checks for `.github/workflows/*.yml`.
pub struct GitHubActionsAnalyzer;

impl GitHubActionsAnalyzer {
    fn check_step(&self, step: &Node, position: usize, label: &str, ctx: &mut RuleContext) {
        let uses = step.get("uses").and_then(Node::as_str);
        let run = step.get("run").and_then(Node::as_str);

        if uses.is_none() && run.is_none() {
            let line = step
                .get("name")
                .and_then(Node::as_str)
                .and_then(|name| ctx.line_containing(name));
            ctx.push_issue(located(
                structure_issue(
                    "Step has no action",
                    format!("Step {position} of job '{label}' has neither `run` nor `uses`"),
                    IssueSeverity::Error,
                ),
                line,
            ));
        }

        if let Some(uses) = uses {
            let line = ctx.line_containing(uses);
            if let Some(image) = uses.strip_prefix("docker://") {
                if classify_image(image) == ImageTag::Untagged {
                    ctx.push_issue(located(
                        Issue::new(
                            "Docker action without tag",
                            format!("Step {position} of job '{label}' runs '{uses}' without an image tag"),
                            IssueSeverity::Warning,
                            Category::Security,
                        )
                        .with_suggestion("Pin the image to a version tag or digest"),
                        line,
                    ));
                }
            } else if !uses.starts_with("./") {
                let message = match classify_pinning(uses) {
                    PinningRisk::Unpinned => Some(("Unpinned action", "has no version ref")),
                    PinningRisk::Branch => Some(("Action pinned to a branch", "follows a branch that changes with every push")),
                    _ => None,
                };
                if let Some((title, what)) = message {
                    ctx.push_issue(located(
                        Issue::new(
                            format!("{title}: {uses}"),
                            format!("Step {position} of job '{label}' uses '{uses}', which {what}"),
                            IssueSeverity::Warning,
                            Category::Security,
                        )
                        .with_suggestion("Pin the action to a release tag, or better a full commit SHA")
                        .with_example("uses: actions/checkout@b4ffde65f46336ab88eb53be808477a3936bae11 # v4.1.1")
                        .fixable(true)
                        .with_fix_minutes(5),
                        line,
                    ));
                }
            }
        }

        if let Some(run) = run {
            if step.get("name").is_none() {
                let first = run.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
                let line = if first.is_empty() { None } else { ctx.line_containing(first) };
                ctx.push_issue(located(
                    Issue::new(
                        "Run step without name",
                        format!("Step {position} of job '{label}' runs a command without a `name`"),
                        IssueSeverity::Info,
                        Category::BestPractice,
                    )
                    .with_suggestion("Name run steps so logs and the checks UI are readable"),
                    line,
                ));
            }
        }
    }
}

impl PlatformAnalyzer for GitHubActionsAnalyzer {
    fn platform(&self) -> Platform {
        Platform::GithubActions
    }

    fn validate_structure(&self, document: &Node, ctx: &mut RuleContext) -> Vec<Issue> {
        let mut issues = Vec::new();

        // YAML 1.1 readers turn a bare `on` key into `true`
        let trigger = document.get("on").or_else(|| document.get("true"));
        if !trigger.is_some_and(Node::is_truthy) {
            issues.push(located(
                structure_issue(
                    "Missing workflow trigger",
                    "The workflow has no `on` section, so it never runs",
                    IssueSeverity::Error,
                )
                .with_suggestion("Add triggers, e.g. `on: [push, pull_request]`"),
                ctx.line_of_key("on"),
            ));
        }

        if document.get("name").is_none() {
            issues.push(
                structure_issue(
                    "Missing workflow name",
                    "Without `name` the workflow is listed by its file path",
                    IssueSeverity::Warning,
                )
                .with_suggestion("Add a top-level `name`"),
            );
        }

        let has_jobs = document
            .get("jobs")
            .and_then(Node::as_mapping)
            .is_some_and(|jobs| !jobs.is_empty());
        if !has_jobs {
            issues.push(located(
                structure_issue("No jobs defined", "`jobs` must be a non-empty mapping of job definitions", IssueSeverity::Error),
                ctx.line_of_key("jobs"),
            ));
        }

        for issue in &issues {
            ctx.push_issue(issue.clone());
        }
        issues
    }

    fn analyze_jobs(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) else {
            return Ok(());
        };

        for (job_id, job) in jobs.iter() {
            let line = ctx.line_of_key(job_id);
            if !job.is_mapping() {
                ctx.push_issue(located(
                    structure_issue("Invalid job", format!("Job '{job_id}' must be a mapping"), IssueSeverity::Error),
                    line,
                ));
                continue;
            }

            let reusable = job.get("uses").is_some();
            if !reusable && job.get("runs-on").is_none() {
                ctx.push_issue(located(
                    structure_issue(
                        "Missing runs-on",
                        format!("Job '{job_id}' does not say which runner to use"),
                        IssueSeverity::Error,
                    )
                    .with_suggestion("Add `runs-on: ubuntu-latest` or a self-hosted label"),
                    line,
                ));
            }

            match job.get("steps") {
                None if !reusable => ctx.push_issue(located(
                    structure_issue("Missing steps", format!("Job '{job_id}' has no `steps`"), IssueSeverity::Error),
                    line,
                )),
                Some(steps) => match steps.as_sequence() {
                    Some(steps) => self.analyze_steps(steps, job_id, ctx)?,
                    None => ctx.push_issue(located(
                        structure_issue(
                            "Invalid steps",
                            format!("`steps` of job '{job_id}' must be a list"),
                            IssueSeverity::Error,
                        ),
                        line,
                    )),
                },
                None => {}
            }

            for dependency in job.get("needs").map(Node::string_list).unwrap_or_default() {
                if !jobs.contains_key(&dependency) {
                    ctx.push_issue(located(
                        structure_issue(
                            "Unknown job dependency",
                            format!("Job '{job_id}' needs '{dependency}', which is not defined"),
                            IssueSeverity::Error,
                        ),
                        line,
                    ));
                }
            }
        }
        Ok(())
    }

    fn analyze_steps(&self, steps: &[Node], label: &str, ctx: &mut RuleContext) -> Result<(), RuleError> {
        for (i, step) in steps.iter().enumerate() {
            if !step.is_mapping() {
                let line = step.as_str().and_then(|text| ctx.line_containing(text));
                ctx.push_issue(located(
                    structure_issue(
                        "Invalid step",
                        format!("Step {} of job '{label}' must be a mapping with `run` or `uses`", i + 1),
                        IssueSeverity::Error,
                    )
                    .with_suggestion("Write shell commands as `- run: <command>`"),
                    line,
                ));
                continue;
            }
            self.check_step(step, i + 1, label, ctx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::platforms::run_analyzer;

    fn analyze(raw: &str) -> Vec<Issue> {
        let doc = parse(raw).unwrap();
        let mut ctx = RuleContext::new(raw, Platform::GithubActions);
        run_analyzer(&GitHubActionsAnalyzer, &doc, &mut ctx);
        ctx.into_outcome().issues
    }

    fn titles(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_valid_workflow_is_clean() {
        let issues = analyze(
            r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Build
        run: make
"#,
        );
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn test_missing_on_name_and_jobs() {
        let issues = analyze("jobs: {}\n");
        assert_eq!(
            titles(&issues),
            vec!["Missing workflow trigger", "Missing workflow name", "No jobs defined"]
        );
        assert_eq!(issues[0].severity, IssueSeverity::Error);
        assert_eq!(issues[1].severity, IssueSeverity::Warning);
        assert!(issues.iter().all(|i| i.category == Category::Structure));
    }

    #[test]
    fn test_job_checks() {
        let issues = analyze(
            r#"
name: CI
on: push
jobs:
  build:
    needs: setup
    steps: "make"
  call:
    uses: org/repo/.github/workflows/reusable.yml@main
"#,
        );
        assert_eq!(
            titles(&issues),
            vec!["Missing runs-on", "Invalid steps", "Unknown job dependency"]
        );
    }

    #[test]
    fn test_bare_string_step_does_not_hide_later_jobs() {
        let issues = analyze(
            r#"
name: CI
on: push
jobs:
  a:
    runs-on: ubuntu-latest
    steps:
      - echo hi
      - name: Build
        run: make
  b:
    steps:
      - name: Test
        run: make test
"#,
        );
        assert_eq!(titles(&issues), vec!["Invalid step", "Missing runs-on"]);
        assert_eq!(issues[0].lines, vec![8]);
        assert_eq!(issues[1].lines, vec![11]);
        assert!(issues.iter().all(|i| i.category == Category::Structure));
    }

    #[test]
    fn test_step_checks() {
        let issues = analyze(
            r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - name: Nothing
      - uses: some/action
      - uses: other/action@main
      - uses: docker://alpine
      - uses: ./local-action
      - run: make
"#,
        );
        assert_eq!(
            titles(&issues),
            vec![
                "Step has no action",
                "Unpinned action: some/action",
                "Action pinned to a branch: other/action@main",
                "Docker action without tag",
                "Run step without name",
            ]
        );
        assert_eq!(issues[0].lines, vec![8]);
        assert_eq!(issues[4].severity, IssueSeverity::Info);
    }

    #[test]
    fn test_non_mapping_step_is_isolated() {
        let issues = analyze("name: CI\non: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - just a string\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].rule_id.as_deref(), Some("analyzer-error-github-actions"));
    }
}
