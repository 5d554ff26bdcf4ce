use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, SecurityVulnerability, VulnerabilitySeverity};
use crate::platforms::Platform;
use crate::rules::context::RuleContext;
use crate::rules::{DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};
use lazy_static::lazy_static;
use regex::Regex;

/// GitHub Actions expression contexts an outside contributor can control.
const DANGEROUS_CONTEXTS: &[&str] = &[
    "github.event.issue.title",
    "github.event.issue.body",
    "github.event.pull_request.title",
    "github.event.pull_request.body",
    "github.event.pull_request.head.ref",
    "github.event.pull_request.head.label",
    "github.event.comment.body",
    "github.event.review.body",
    "github.event.review_comment.body",
    "github.event.head_commit.message",
    "github.event.head_commit.author.name",
    "github.event.head_commit.author.email",
    "github.event.commits",
    "github.head_ref",
    "github.event.workflow_run.head_branch",
    "github.event.discussion.title",
    "github.event.discussion.body",
    "github.event.pages",
];

lazy_static! {
    static ref EXPRESSION: Regex = Regex::new(r"\$\{\{\s*(.+?)\s*\}\}").unwrap();
}

/// Attacker-controlled contexts referenced by `${{ }}` expressions in `script`.
pub fn tainted_expressions(script: &str) -> Vec<&'static str> {
    let mut found = Vec::new();
    for caps in EXPRESSION.captures_iter(script) {
        let Some(expr) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        for context in DANGEROUS_CONTEXTS {
            if expr.contains(context) && !found.contains(context) {
                found.push(*context);
            }
        }
    }
    found
}

pub struct ExpressionInjection;

static INJECTION_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-009",
    name: "Expression injection",
    description: "Untrusted event data interpolated directly into shell scripts",
    category: Category::Security,
    severity: DefaultSeverity::Vulnerability(VulnerabilitySeverity::Critical),
    level: Level::Junior,
    platforms: PlatformScope::Only(&[Platform::GithubActions]),
};

impl Rule for ExpressionInjection {
    fn meta(&self) -> &'static RuleMeta {
        &INJECTION_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) else {
            return Ok(());
        };

        for (job_id, job) in jobs.iter() {
            let steps = job.get("steps").and_then(Node::as_sequence).unwrap_or_default();
            for (index, step) in steps.iter().enumerate() {
                // actions/github-script evaluates `with.script` as JavaScript
                let script = step
                    .get("run")
                    .or_else(|| step.get_path("with.script"))
                    .and_then(Node::as_str);
                let Some(script) = script else {
                    continue;
                };

                for context in tainted_expressions(script) {
                    let line = ctx.line_containing(context);
                    let step_label = step
                        .get("name")
                        .and_then(Node::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| format!("#{}", index + 1));
                    let vuln = SecurityVulnerability::new(
                        format!("Expression injection via {context}"),
                        format!(
                            "Job '{job_id}', step '{step_label}' interpolates `{context}` straight into a script. \
                             Anyone who can open an issue or pull request controls this value."
                        ),
                        VulnerabilitySeverity::Critical,
                        format!(
                            "Pass the value through an environment variable:\n  env:\n    UNTRUSTED: ${{{{ {context} }}}}\nand reference \"$UNTRUSTED\" in the script"
                        ),
                    )
                    .with_rule(INJECTION_META.id)
                    .with_cvss(9.3);
                    ctx.push_vulnerability(match line {
                        Some(line) => vuln.at_line(line),
                        None => vuln,
                    });
                }
            }
        }
        Ok(())
    }
}
