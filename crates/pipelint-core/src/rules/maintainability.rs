use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::parser::gitlab::is_job_entry;
use crate::platforms::Platform;
use crate::rules::context::RuleContext;
use crate::rules::{pipeline, DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};
use std::collections::HashMap;

/// Keys and shell operators that add a branch to the pipeline's control flow.
pub const CONDITIONAL_KEYWORDS: &[&str] = &[
    "if:", "when:", "rules:", "only:", "except:", "condition:", "changes:", "matrix:",
    "continue-on-error:", "allow_failure:", "&&", "||",
];

/// Cyclomatic complexity above which an info issue is raised.
pub const COMPLEXITY_INFO: usize = 10;
/// Cyclomatic complexity above which a warning is raised instead.
pub const COMPLEXITY_WARNING: usize = 20;
/// Minimum run of identical consecutive steps counted as duplication.
pub const DUPLICATE_WINDOW: usize = 3;
/// Inline scripts longer than this many lines are reported.
pub const MAX_SCRIPT_LINES: usize = 20;

/// `1 + Σ occurrences of conditional keywords` over non-comment lines.
pub fn cyclomatic_complexity(raw_text: &str) -> usize {
    let branches: usize = raw_text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(|line| CONDITIONAL_KEYWORDS.iter().map(|kw| line.matches(kw).count()).sum::<usize>())
        .sum();
    1 + branches
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NamingStyle {
    Kebab,
    Snake,
    Camel,
}

impl NamingStyle {
    fn of(id: &str) -> Option<NamingStyle> {
        let has_upper = id.chars().any(|c| c.is_ascii_uppercase());
        match (id.contains('-'), id.contains('_'), has_upper) {
            (true, false, false) => Some(NamingStyle::Kebab),
            (false, true, false) => Some(NamingStyle::Snake),
            (false, false, true) => Some(NamingStyle::Camel),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            NamingStyle::Kebab => "kebab-case",
            NamingStyle::Snake => "snake_case",
            NamingStyle::Camel => "camelCase",
        }
    }
}

fn job_ids(document: &Node, platform: Platform) -> Vec<String> {
    match platform {
        Platform::GithubActions => document
            .get("jobs")
            .and_then(Node::as_mapping)
            .map(|jobs| jobs.keys().map(String::from).collect())
            .unwrap_or_default(),
        Platform::GitlabCi => document
            .as_mapping()
            .map(|map| {
                map.iter()
                    .filter(|(k, v)| is_job_entry(k, v))
                    .map(|(k, _)| k.to_string())
                    .collect()
            })
            .unwrap_or_default(),
        Platform::BitbucketPipelines => document
            .get_path("pipelines.custom")
            .and_then(Node::as_mapping)
            .map(|custom| custom.keys().map(String::from).collect())
            .unwrap_or_default(),
        Platform::Unknown => Vec::new(),
    }
}

pub struct NamingConventions;

static NAMING_META: RuleMeta = RuleMeta {
    id: "PLT-MNT-001",
    name: "Naming conventions",
    description: "Job identifiers mixing kebab-case, snake_case and camelCase",
    category: Category::Maintainability,
    severity: DefaultSeverity::Issue(IssueSeverity::Info),
    level: Level::Senior,
    platforms: PlatformScope::All,
};

impl Rule for NamingConventions {
    fn meta(&self) -> &'static RuleMeta {
        &NAMING_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let ids = job_ids(document, ctx.platform());
        let mut styles: Vec<(NamingStyle, Vec<&str>)> = Vec::new();
        for id in &ids {
            let Some(style) = NamingStyle::of(id) else {
                continue;
            };
            match styles.iter_mut().find(|(s, _)| *s == style) {
                Some((_, members)) => members.push(id.as_str()),
                None => styles.push((style, vec![id.as_str()])),
            }
        }
        if styles.len() < 2 {
            return Ok(());
        }

        let summary: Vec<String> = styles
            .iter()
            .map(|(style, members)| format!("{} ({})", style.label(), members.join(", ")))
            .collect();
        let dominant = styles
            .iter()
            .max_by_key(|(_, members)| members.len())
            .map(|(style, _)| style.label())
            .unwrap_or("kebab-case");
        ctx.push_issue(
            Issue::new(
                "Inconsistent job naming",
                format!("Job identifiers mix naming styles: {}", summary.join("; ")),
                IssueSeverity::Info,
                Category::Maintainability,
            )
            .with_rule(NAMING_META.id)
            .with_suggestion(format!("Use {dominant} for every job identifier"))
            .with_fix_minutes(10),
        );
        Ok(())
    }
}

pub struct MissingNames;

static MISSING_NAMES_META: RuleMeta = RuleMeta {
    id: "PLT-MNT-002",
    name: "Missing names and descriptions",
    description: "Jobs without a display name and workflow inputs without a description",
    category: Category::Maintainability,
    severity: DefaultSeverity::Issue(IssueSeverity::Info),
    level: Level::Expert,
    platforms: PlatformScope::Only(&[Platform::GithubActions]),
};

impl Rule for MissingNames {
    fn meta(&self) -> &'static RuleMeta {
        &MISSING_NAMES_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        if let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) {
            let unnamed: Vec<&str> = jobs
                .iter()
                .filter(|(_, job)| job.get("name").is_none() && job.get("uses").is_none())
                .map(|(id, _)| id)
                .collect();
            if !unnamed.is_empty() {
                let lines = unnamed.iter().filter_map(|id| ctx.line_of_key(id)).collect();
                ctx.push_issue(
                    Issue::new(
                        "Jobs without display names",
                        format!("Jobs {} have no `name`, so the checks UI shows raw identifiers", unnamed.join(", ")),
                        IssueSeverity::Info,
                        Category::Maintainability,
                    )
                    .with_rule(MISSING_NAMES_META.id)
                    .with_suggestion("Give each job a short human-readable `name`")
                    .with_lines(lines)
                    .with_fix_minutes(2),
                );
            }
        }

        for trigger in ["workflow_dispatch", "workflow_call"] {
            let path = format!("on.{trigger}.inputs");
            let Some(inputs) = document.get_path(&path).and_then(Node::as_mapping) else {
                continue;
            };
            for (input, spec) in inputs.iter() {
                if spec.get("description").is_some() {
                    continue;
                }
                let issue = Issue::new(
                    format!("Input '{input}' has no description"),
                    format!("The `{trigger}` input '{input}' is shown without any explanation to whoever triggers the workflow"),
                    IssueSeverity::Info,
                    Category::Maintainability,
                )
                .with_rule(MISSING_NAMES_META.id)
                .with_suggestion("Add a `description` to every input");
                ctx.push_issue(match ctx.line_of_key(input) {
                    Some(line) => issue.at_line(line),
                    None => issue,
                });
            }
        }
        Ok(())
    }
}

pub struct Complexity;

static COMPLEXITY_META: RuleMeta = RuleMeta {
    id: "PLT-MNT-003",
    name: "Configuration complexity",
    description: "Pipelines with many conditional branches are hard to reason about",
    category: Category::Maintainability,
    severity: DefaultSeverity::Issue(IssueSeverity::Warning),
    level: Level::Senior,
    platforms: PlatformScope::All,
};

impl Rule for Complexity {
    fn meta(&self) -> &'static RuleMeta {
        &COMPLEXITY_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let complexity = cyclomatic_complexity(ctx.raw_text());
        let severity = if complexity > COMPLEXITY_WARNING {
            IssueSeverity::Warning
        } else if complexity > COMPLEXITY_INFO {
            IssueSeverity::Info
        } else {
            return Ok(());
        };
        ctx.push_issue(
            Issue::new(
                "High configuration complexity",
                format!("Cyclomatic complexity is {complexity}; conditions and rules are spread throughout the file"),
                severity,
                Category::Maintainability,
            )
            .with_rule(COMPLEXITY_META.id)
            .with_suggestion("Split the pipeline into reusable workflows or included files, and move shell logic into scripts")
            .with_fix_minutes(60),
        );
        Ok(())
    }
}

pub struct DuplicatedSteps;

static DUPLICATED_STEPS_META: RuleMeta = RuleMeta {
    id: "PLT-MNT-004",
    name: "Duplicated step sequences",
    description: "Three or more identical consecutive steps repeated in several jobs",
    category: Category::Maintainability,
    severity: DefaultSeverity::Issue(IssueSeverity::Warning),
    level: Level::Senior,
    platforms: PlatformScope::All,
};

impl Rule for DuplicatedSteps {
    fn meta(&self) -> &'static RuleMeta {
        &DUPLICATED_STEPS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;

        // window -> jobs containing it, in first-seen order
        let mut windows: Vec<(Vec<String>, Vec<String>)> = Vec::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        for job in dag.jobs() {
            let signatures: Vec<String> = job.steps.iter().map(|s| s.signature()).collect();
            for window in signatures.windows(DUPLICATE_WINDOW) {
                let key = window.to_vec();
                let slot = *index.entry(key.clone()).or_insert_with(|| {
                    windows.push((key, Vec::new()));
                    windows.len() - 1
                });
                let jobs = &mut windows[slot].1;
                if !jobs.contains(&job.id) {
                    jobs.push(job.id.clone());
                }
            }
        }

        let mut reported: Vec<Vec<String>> = Vec::new();
        for (window, jobs) in windows {
            if jobs.len() < 2 || reported.contains(&jobs) {
                continue;
            }
            let steps: Vec<String> = window
                .iter()
                .map(|s| s.trim_start_matches("uses:").trim_start_matches("run:").to_string())
                .collect();
            ctx.push_issue(
                Issue::new(
                    "Duplicated step sequence",
                    format!("Jobs {} repeat the same steps: {}", jobs.join(", "), steps.join(" -> ")),
                    IssueSeverity::Warning,
                    Category::Maintainability,
                )
                .with_rule(DUPLICATED_STEPS_META.id)
                .with_suggestion(match ctx.platform() {
                    Platform::GithubActions => "Extract the shared steps into a composite action or reusable workflow",
                    Platform::GitlabCi => "Move the shared script into a hidden job and use `extends` or `!reference`",
                    _ => "Move the shared commands into a YAML anchor or a script in the repository",
                })
                .with_fix_minutes(30),
            );
            reported.push(jobs);
        }
        Ok(())
    }
}

pub struct LongScripts;

static LONG_SCRIPTS_META: RuleMeta = RuleMeta {
    id: "PLT-MNT-005",
    name: "Long inline scripts",
    description: "Inline scripts beyond twenty lines belong in a script file",
    category: Category::Maintainability,
    severity: DefaultSeverity::Issue(IssueSeverity::Info),
    level: Level::Expert,
    platforms: PlatformScope::All,
};

impl LongScripts {
    fn issue(owner: &str, lines: usize, at: Option<usize>) -> Issue {
        let issue = Issue::new(
            "Long inline script",
            format!("{owner} has an inline script of {lines} lines"),
            IssueSeverity::Info,
            Category::Maintainability,
        )
        .with_rule(LONG_SCRIPTS_META.id)
        .with_suggestion("Move the script into a file in the repository and call it from the pipeline")
        .with_fix_minutes(15);
        match at {
            Some(line) => issue.at_line(line),
            None => issue,
        }
    }
}

impl Rule for LongScripts {
    fn meta(&self) -> &'static RuleMeta {
        &LONG_SCRIPTS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;
        for job in dag.jobs() {
            let runs: Vec<&str> = job.steps.iter().filter_map(|s| s.run.as_deref()).collect();
            if ctx.platform() == Platform::GithubActions {
                for run in runs {
                    let count = run.lines().filter(|l| !l.trim().is_empty()).count();
                    if count > MAX_SCRIPT_LINES {
                        let first = run.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
                        let at = ctx.line_containing(first);
                        ctx.push_issue(Self::issue(&format!("Job '{}'", job.id), count, at));
                    }
                }
            } else {
                // each script entry is one step; a job's script is their concatenation
                let count: usize = runs.iter().map(|r| r.lines().filter(|l| !l.trim().is_empty()).count()).sum();
                if count > MAX_SCRIPT_LINES {
                    let at = ctx.line_of_key(&job.id);
                    ctx.push_issue(Self::issue(&format!("Job '{}'", job.id), count, at));
                }
            }
        }
        Ok(())
    }
}
