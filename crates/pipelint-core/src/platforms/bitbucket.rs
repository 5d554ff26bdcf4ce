use super::{located, structure_issue, Platform, PlatformAnalyzer};
use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::parser::bitbucket::{step_entries, PIPELINE_SECTIONS};
use crate::parser::gitlab::parse_image;
use crate::rules::context::RuleContext;
use crate::security::supply_chain::{classify_image, is_templated, ImageTag};

/// Structural checks for `bitbucket-pipelines.yml`.
pub struct BitbucketAnalyzer;

fn untagged_image(image: &Node) -> Option<String> {
    let image = parse_image(image)?;
    (!is_templated(&image) && classify_image(&image) == ImageTag::Untagged).then_some(image)
}

impl PlatformAnalyzer for BitbucketAnalyzer {
    fn platform(&self) -> Platform {
        Platform::BitbucketPipelines
    }

    fn validate_structure(&self, document: &Node, ctx: &mut RuleContext) -> Vec<Issue> {
        let mut issues = Vec::new();

        match document.get("pipelines").and_then(Node::as_mapping) {
            None => issues.push(located(
                structure_issue(
                    "Missing pipelines",
                    "`pipelines` must be a mapping of pipeline sections",
                    IssueSeverity::Error,
                )
                .with_suggestion("Add `pipelines:` with at least a `default` pipeline"),
                ctx.line_of_key("pipelines"),
            )),
            Some(sections) if !PIPELINE_SECTIONS.iter().any(|s| sections.contains_key(s)) => {
                issues.push(located(
                    structure_issue(
                        "No pipeline sections",
                        format!("`pipelines` contains none of {}", PIPELINE_SECTIONS.join(", ")),
                        IssueSeverity::Warning,
                    ),
                    ctx.line_of_key("pipelines"),
                ));
            }
            Some(_) => {}
        }

        if let Some(image) = document.get("image").and_then(untagged_image) {
            issues.push(located(
                structure_issue(
                    "Untagged default image",
                    format!("The default image '{image}' has no tag and resolves to `latest`"),
                    IssueSeverity::Warning,
                )
                .with_suggestion("Pin the image to a version tag"),
                ctx.line_containing(&image),
            ));
        }

        for issue in &issues {
            ctx.push_issue(issue.clone());
        }
        issues
    }

    fn analyze_jobs(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        // group steps per pipeline, keeping declaration order
        let mut pipelines: Vec<(String, Vec<Node>)> = Vec::new();
        for entry in step_entries(document) {
            let continues = pipelines.last().is_some_and(|(label, _)| *label == entry.pipeline);
            if !continues {
                pipelines.push((entry.pipeline.clone(), Vec::new()));
            }
            if let Some((_, steps)) = pipelines.last_mut() {
                steps.push(entry.step.clone());
            }
        }
        for (label, steps) in &pipelines {
            self.analyze_steps(steps, label, ctx)?;
        }
        Ok(())
    }

    fn analyze_steps(&self, steps: &[Node], label: &str, ctx: &mut RuleContext) -> Result<(), RuleError> {
        for (i, step) in steps.iter().enumerate() {
            let name = step.get("name").and_then(Node::as_str);
            let what = match name {
                Some(name) => format!("Step '{name}' of pipeline '{label}'"),
                None => format!("Step {} of pipeline '{label}'", i + 1),
            };
            let line = name.and_then(|n| ctx.line_containing(n));

            let has_script = step
                .get("script")
                .and_then(Node::as_sequence)
                .is_some_and(|s| !s.is_empty());
            if !has_script {
                ctx.push_issue(located(
                    structure_issue("Step without script", format!("{what} has no `script`"), IssueSeverity::Error),
                    line,
                ));
            }

            if name.is_none() {
                ctx.push_issue(
                    Issue::new(
                        "Step without name",
                        format!("{what} has no `name`; the UI shows it as an anonymous step"),
                        IssueSeverity::Info,
                        Category::BestPractice,
                    )
                    .with_suggestion("Name every step"),
                );
            }

            if let Some(image) = step.get("image").and_then(untagged_image) {
                ctx.push_issue(located(
                    structure_issue(
                        "Untagged step image",
                        format!("{what} uses image '{image}' without a tag"),
                        IssueSeverity::Warning,
                    )
                    .with_suggestion("Pin the image to a version tag"),
                    ctx.line_containing(&image),
                ));
            }
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
        let mut ctx = RuleContext::new(raw, Platform::BitbucketPipelines);
        run_analyzer(&BitbucketAnalyzer, &doc, &mut ctx);
        ctx.into_outcome().issues
    }

    fn titles(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_valid_pipeline_is_clean() {
        let issues = analyze(
            r#"
image: node:20
pipelines:
  default:
    - step:
        name: Build
        script:
          - npm ci
    - parallel:
        - step:
            name: Lint
            script: [npm run lint]
        - step:
            name: Test
            script: [npm test]
"#,
        );
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn test_missing_pipelines_and_untagged_image() {
        let issues = analyze("image: python\n");
        assert_eq!(titles(&issues), vec!["Missing pipelines", "Untagged default image"]);
        assert_eq!(issues[1].lines, vec![1]);
    }

    #[test]
    fn test_unknown_sections() {
        let issues = analyze("pipelines:\n  nightly: []\n");
        assert_eq!(titles(&issues), vec!["No pipeline sections"]);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
    }

    #[test]
    fn test_step_checks() {
        let issues = analyze(
            r#"
pipelines:
  branches:
    main:
      - step:
          image: alpine
          script: []
"#,
        );
        assert_eq!(
            titles(&issues),
            vec!["Step without script", "Step without name", "Untagged step image"]
        );
        assert!(issues[1].description.starts_with("Step 1 of pipeline 'branches.main'"));
    }
}
