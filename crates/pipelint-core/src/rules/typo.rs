use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::parser::bitbucket::{self, PIPELINE_SECTIONS};
use crate::parser::gitlab::RESERVED_KEYWORDS;
use crate::platforms::Platform;
use crate::rules::context::RuleContext;
use crate::rules::{DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};

const GITHUB_WORKFLOW_KEYS: &[&str] = &[
    "name", "run-name", "on", "permissions", "env", "defaults", "concurrency", "jobs",
];

const GITHUB_JOB_KEYS: &[&str] = &[
    "name", "permissions", "needs", "if", "runs-on", "environment", "concurrency", "outputs",
    "env", "defaults", "steps", "timeout-minutes", "strategy", "continue-on-error", "container",
    "services", "uses", "with", "secrets",
];

const GITHUB_STEP_KEYS: &[&str] = &[
    "id", "if", "name", "uses", "run", "shell", "with", "env", "continue-on-error",
    "timeout-minutes", "working-directory",
];

const GITLAB_JOB_KEYS: &[&str] = &[
    "script", "before_script", "after_script", "stage", "image", "services", "only", "except",
    "rules", "when", "allow_failure", "needs", "dependencies", "artifacts", "cache", "coverage",
    "retry", "timeout", "parallel", "trigger", "extends", "tags", "resource_group", "environment",
    "release", "interruptible", "variables", "inherit", "id_tokens", "secrets", "hooks", "pages",
    "start_in",
];

const BITBUCKET_TOP_KEYS: &[&str] = &["image", "pipelines", "definitions", "options", "clone", "labels"];

const BITBUCKET_STEP_KEYS: &[&str] = &[
    "name", "script", "image", "caches", "services", "artifacts", "size", "deployment", "trigger",
    "condition", "after-script", "max-time", "oidc", "runs-on", "clone", "fail-fast",
];

/// Closest known key within Damerau-Levenshtein distance 2, excluding exact matches.
pub fn closest_key(key: &str, known: &[&'static str]) -> Option<&'static str> {
    if key.chars().count() < 3 || known.contains(&key) {
        return None;
    }
    // env-var style names are user data, not keywords
    if key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        return None;
    }
    let mut best: Option<(&'static str, usize)> = None;
    for &candidate in known {
        let distance = strsim::damerau_levenshtein(key, candidate);
        if distance == 0 || distance > 2 {
            continue;
        }
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((candidate, distance));
        }
    }
    best.map(|(candidate, _)| candidate)
}

pub struct KeyTypos;

static KEY_TYPOS_META: RuleMeta = RuleMeta {
    id: "PLT-LINT-001",
    name: "Probable key typos",
    description: "Keys one or two edits away from a platform keyword are silently ignored by the runner",
    category: Category::Linting,
    severity: DefaultSeverity::Issue(IssueSeverity::Warning),
    level: Level::Intermediate,
    platforms: PlatformScope::Only(&[
        Platform::GithubActions,
        Platform::GitlabCi,
        Platform::BitbucketPipelines,
    ]),
};

/// A suspicious key and the keyword it probably meant.
struct Suspect {
    key: String,
    suggestion: &'static str,
    scope: String,
}

fn scan(map: &Node, known: &[&'static str], scope: &str, out: &mut Vec<Suspect>) {
    let Some(map) = map.as_mapping() else {
        return;
    };
    for key in map.keys() {
        if let Some(suggestion) = closest_key(key, known) {
            out.push(Suspect {
                key: key.to_string(),
                suggestion,
                scope: scope.to_string(),
            });
        }
    }
}

fn github_suspects(document: &Node, out: &mut Vec<Suspect>) {
    scan(document, GITHUB_WORKFLOW_KEYS, "workflow", out);
    let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) else {
        return;
    };
    for (job_id, job) in jobs.iter() {
        scan(job, GITHUB_JOB_KEYS, &format!("job '{job_id}'"), out);
        for step in job.get("steps").and_then(Node::as_sequence).unwrap_or_default() {
            scan(step, GITHUB_STEP_KEYS, &format!("a step of job '{job_id}'"), out);
        }
    }
}

fn gitlab_suspects(document: &Node, out: &mut Vec<Suspect>) {
    let Some(map) = document.as_mapping() else {
        return;
    };
    for (key, value) in map.iter() {
        if key.starts_with('.') || RESERVED_KEYWORDS.contains(&key) {
            continue;
        }
        let looks_like_job = value.as_mapping().is_some_and(|job| {
            job.keys()
                .any(|k| GITLAB_JOB_KEYS.contains(&k) || closest_key(k, GITLAB_JOB_KEYS).is_some())
        });
        if looks_like_job {
            scan(value, GITLAB_JOB_KEYS, &format!("job '{key}'"), out);
        } else if let Some(suggestion) = closest_key(key, RESERVED_KEYWORDS) {
            out.push(Suspect {
                key: key.to_string(),
                suggestion,
                scope: "the top level".to_string(),
            });
        }
    }
}

fn bitbucket_suspects(document: &Node, out: &mut Vec<Suspect>) {
    scan(document, BITBUCKET_TOP_KEYS, "the top level", out);
    if let Some(pipelines) = document.get("pipelines") {
        scan(pipelines, PIPELINE_SECTIONS, "pipelines", out);
    }
    for entry in bitbucket::step_entries(document) {
        scan(entry.step, BITBUCKET_STEP_KEYS, &format!("a step of pipeline '{}'", entry.pipeline), out);
    }
}

impl Rule for KeyTypos {
    fn meta(&self) -> &'static RuleMeta {
        &KEY_TYPOS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let mut suspects = Vec::new();
        match ctx.platform() {
            Platform::GithubActions => github_suspects(document, &mut suspects),
            Platform::GitlabCi => gitlab_suspects(document, &mut suspects),
            Platform::BitbucketPipelines => bitbucket_suspects(document, &mut suspects),
            Platform::Unknown => {}
        }

        for suspect in suspects {
            let issue = Issue::new(
                format!("Possible typo: '{}'", suspect.key),
                format!(
                    "Unknown key '{}' in {}; did you mean '{}'? The runner ignores keys it does not recognise",
                    suspect.key, suspect.scope, suspect.suggestion
                ),
                IssueSeverity::Warning,
                Category::Linting,
            )
            .with_rule(KEY_TYPOS_META.id)
            .with_suggestion(format!("Replace '{}' with '{}'", suspect.key, suspect.suggestion))
            .fixable(true)
            .with_fix_minutes(1);
            let issue = match ctx.line_of_key(&suspect.key) {
                Some(line) => issue.at_line(line),
                None => issue,
            };
            ctx.push_issue(issue);
        }
        Ok(())
    }
}
