use super::{located, structure_issue, Platform, PlatformAnalyzer};
use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Issue, IssueSeverity};
use crate::parser::gitlab::{is_job_entry, parse_image, DEFAULT_STAGES};
use crate::rules::context::RuleContext;
use crate::security::supply_chain::{classify_image, is_templated, ImageTag};
use std::slice;

/// Structural checks for `.gitlab-ci.yml`.
pub struct GitLabCIAnalyzer;

/// Keys that make a top-level mapping runnable.
const JOB_BODY_KEYS: &[&str] = &["script", "trigger", "extends"];

fn has_job_body(job: &Node) -> bool {
    JOB_BODY_KEYS.iter().any(|key| job.get(key).is_some())
}

impl PlatformAnalyzer for GitLabCIAnalyzer {
    fn platform(&self) -> Platform {
        Platform::GitlabCi
    }

    fn validate_structure(&self, document: &Node, ctx: &mut RuleContext) -> Vec<Issue> {
        let mut issues = Vec::new();
        let has_jobs = document
            .as_mapping()
            .is_some_and(|map| map.iter().any(|(k, v)| is_job_entry(k, v) && has_job_body(v)));
        if !has_jobs && document.get("stages").is_none() {
            issues.push(
                structure_issue(
                    "No jobs defined",
                    "The file defines no job with `script`, `trigger` or `extends`, and no `stages`",
                    IssueSeverity::Error,
                )
                .with_suggestion("Add at least one job with a `script`"),
            );
        }
        for issue in &issues {
            ctx.push_issue(issue.clone());
        }
        issues
    }

    fn analyze_jobs(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let Some(map) = document.as_mapping() else {
            return Ok(());
        };
        let declared = document.get("stages").map(Node::string_list);

        for (job_id, job) in map.iter().filter(|(k, v)| is_job_entry(k, v)) {
            let line = ctx.line_of_key(job_id);

            if !has_job_body(job) {
                ctx.push_issue(located(
                    structure_issue(
                        "Job without script",
                        format!("Job '{job_id}' has no `script`, `trigger` or `extends`"),
                        IssueSeverity::Error,
                    )
                    .with_suggestion("Add a `script` list, or `extends` a template that has one"),
                    line,
                ));
            }

            if let Some(stage) = job.get("stage").and_then(Node::as_str) {
                let builtin = stage == ".pre" || stage == ".post";
                match &declared {
                    Some(stages) if !builtin && !stages.iter().any(|s| s == stage) => {
                        ctx.push_issue(located(
                            structure_issue(
                                "Undeclared stage",
                                format!("Job '{job_id}' uses stage '{stage}', which is not in `stages`"),
                                IssueSeverity::Error,
                            )
                            .with_suggestion(format!("Add '{stage}' to the `stages` list")),
                            ctx.line_containing(&format!("stage: {stage}")).or(line),
                        ));
                    }
                    None if !DEFAULT_STAGES.contains(&stage) => {
                        ctx.push_issue(located(
                            structure_issue(
                                "Unknown stage",
                                format!(
                                    "Job '{job_id}' uses stage '{stage}', but no `stages` list is declared and it is not one of {}",
                                    DEFAULT_STAGES.join(", ")
                                ),
                                IssueSeverity::Warning,
                            )
                            .with_suggestion("Declare the pipeline's stages explicitly"),
                            ctx.line_containing(&format!("stage: {stage}")).or(line),
                        ));
                    }
                    _ => {}
                }
            }

            if let Some(script) = job.get("script") {
                match script {
                    Node::Sequence(items) => self.analyze_steps(items, job_id, ctx)?,
                    other => self.analyze_steps(slice::from_ref(other), job_id, ctx)?,
                }
            }

            if let Some(image) = job.get("image").and_then(parse_image) {
                if !is_templated(&image) && classify_image(&image) == ImageTag::Untagged {
                    ctx.push_issue(located(
                        structure_issue(
                            "Untagged job image",
                            format!("Job '{job_id}' uses image '{image}' without a tag, which resolves to `latest`"),
                            IssueSeverity::Warning,
                        )
                        .with_suggestion("Pin the image to a version tag"),
                        ctx.line_containing(&image),
                    ));
                }
            }
        }
        Ok(())
    }

    fn analyze_steps(&self, steps: &[Node], label: &str, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let commands: Vec<String> = steps
            .iter()
            .flat_map(Node::string_list)
            .filter(|line| !line.trim().is_empty())
            .collect();
        if commands.is_empty() {
            let line = ctx
                .lines_where(|l| l.trim_start().starts_with("script:"))
                .into_iter()
                .find(|&n| n > ctx.line_of_key(label).unwrap_or(0));
            ctx.push_issue(located(
                structure_issue("Empty script", format!("Job '{label}' has an empty `script`"), IssueSeverity::Error),
                line,
            ));
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
        let mut ctx = RuleContext::new(raw, Platform::GitlabCi);
        run_analyzer(&GitLabCIAnalyzer, &doc, &mut ctx);
        ctx.into_outcome().issues
    }

    fn titles(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_valid_pipeline_is_clean() {
        let issues = analyze(
            r#"
stages: [build, test]
build:
  stage: build
  image: node:20
  script:
    - npm ci
test:
  stage: test
  script: npm test
"#,
        );
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn test_no_jobs() {
        let issues = analyze("variables:\n  FOO: bar\n");
        assert_eq!(titles(&issues), vec!["No jobs defined"]);
    }

    #[test]
    fn test_stage_checks() {
        let issues = analyze("stages: [build]\ncompile:\n  stage: package\n  script: [make]\n");
        assert_eq!(titles(&issues), vec!["Undeclared stage"]);
        assert_eq!(issues[0].severity, IssueSeverity::Error);
        assert_eq!(issues[0].lines, vec![3]);

        let issues = analyze("compile:\n  stage: package\n  script: [make]\n");
        assert_eq!(titles(&issues), vec!["Unknown stage"]);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
    }

    #[test]
    fn test_missing_and_empty_script() {
        let issues = analyze("stages: [test]\nlint:\n  stage: test\nunit:\n  script: []\n");
        assert_eq!(titles(&issues), vec!["Job without script", "Empty script"]);
        assert_eq!(issues[1].lines, vec![5]);
    }

    #[test]
    fn test_untagged_image() {
        let issues = analyze("build:\n  image: node\n  script: [make]\ndeploy:\n  image: $DEPLOY_IMAGE\n  script: [deploy]\n");
        assert_eq!(titles(&issues), vec!["Untagged job image"]);
        assert_eq!(issues[0].lines, vec![2]);
    }
}
