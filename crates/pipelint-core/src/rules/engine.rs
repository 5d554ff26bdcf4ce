use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::platforms::Platform;
use crate::rules::context::{RuleContext, RuleOutcome};
use crate::rules::custom::CustomRule;
use crate::rules::{LevelFilter, Rule, BUILTIN_RULES};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Runs a fixed rule list against documents.
///
/// The engine holds configuration only. Every run gets its own
/// [`RuleContext`], so one engine can serve any number of documents.
#[derive(Clone)]
pub struct RuleEngine<'r> {
    rules: &'r [&'r dyn Rule],
    custom_rules: Vec<Arc<dyn CustomRule>>,
    disabled_rules: HashSet<String>,
    disabled_categories: HashSet<Category>,
}

impl RuleEngine<'static> {
    /// Engine over the built-in catalog.
    pub fn builtin() -> Self {
        RuleEngine::new(BUILTIN_RULES)
    }
}

impl<'r> RuleEngine<'r> {
    pub fn new(rules: &'r [&'r dyn Rule]) -> Self {
        Self {
            rules,
            custom_rules: Vec::new(),
            disabled_rules: HashSet::new(),
            disabled_categories: HashSet::new(),
        }
    }

    pub fn with_custom_rules(mut self, custom_rules: Vec<Arc<dyn CustomRule>>) -> Self {
        self.custom_rules = custom_rules;
        self
    }

    pub fn with_disabled_rules<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_rules.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn disable_category(mut self, category: Category) -> Self {
        self.disabled_categories.insert(category);
        self
    }

    /// Rules that would run for `platform` at `level`, in registration order.
    pub fn select(&self, platform: Platform, level: LevelFilter) -> Vec<&'r dyn Rule> {
        self.rules
            .iter()
            .copied()
            .filter(|rule| {
                let meta = rule.meta();
                meta.platforms.applies_to(platform)
                    && level.admits(meta.level)
                    && !self.disabled_rules.contains(meta.id)
                    && !self.disabled_categories.contains(&meta.category)
            })
            .collect()
    }

    /// Run every applicable rule against a document with a fresh context.
    pub fn execute(&self, document: &Node, raw_text: &str, platform: Platform, level: LevelFilter) -> RuleOutcome {
        let mut ctx = RuleContext::new(raw_text, platform);
        self.run(document, &mut ctx, level);
        ctx.into_outcome()
    }

    /// Run every applicable rule, writing into an existing context.
    pub fn run(&self, document: &Node, ctx: &mut RuleContext, level: LevelFilter) {
        let platform = ctx.platform();

        for rule in self.select(platform, level) {
            let id = rule.meta().id;
            tracing::debug!(rule = id, "running rule");
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.check(document, ctx)));
            if let Some(message) = failure_message(outcome) {
                tracing::warn!(rule = id, error = %message, "rule failed");
                ctx.push_issue(rule_error_issue(id, rule.meta().name, &message));
            }
        }

        for custom in &self.custom_rules {
            let id = custom.id().to_string();
            if self.disabled_rules.contains(&id) || !custom.applies_to(platform) {
                continue;
            }
            tracing::debug!(rule = %id, "running custom rule");
            let raw_text = ctx.raw_text();
            let outcome = catch_unwind(AssertUnwindSafe(|| custom.check(document, raw_text, platform)));
            match outcome {
                Ok(Ok(issues)) => issues.into_iter().for_each(|issue| ctx.push_issue(issue)),
                other => {
                    let message = failure_message(other.map(|r| r.map(|_| ()))).unwrap_or_default();
                    tracing::warn!(rule = %id, error = %message, "custom rule failed");
                    ctx.push_issue(rule_error_issue(&id, custom.name(), &message));
                }
            }
        }
    }
}

fn failure_message(outcome: std::thread::Result<Result<(), RuleError>>) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(panic) => Some(panic_message(panic.as_ref())),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn rule_error_issue(id: &str, name: &str, message: &str) -> Issue {
    Issue::new(
        format!("Rule '{name}' failed"),
        format!("Rule {id} could not complete: {message}"),
        IssueSeverity::Error,
        Category::Linting,
    )
    .with_rule(format!("rule-error-{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{Rating, SecurityVulnerability, VulnerabilitySeverity};
    use crate::rules::{DefaultSeverity, Level, PlatformScope, RuleMeta};

    struct AlwaysWarns;
    struct Explodes;
    struct GitlabOnly;
    struct ExpertOnly;

    static WARNS_META: RuleMeta = RuleMeta {
        id: "TEST-001",
        name: "Always warns",
        description: "",
        category: Category::Linting,
        severity: DefaultSeverity::Issue(IssueSeverity::Warning),
        level: Level::Junior,
        platforms: PlatformScope::All,
    };
    static EXPLODES_META: RuleMeta = RuleMeta {
        id: "TEST-002",
        name: "Explodes",
        description: "",
        category: Category::Security,
        severity: DefaultSeverity::Vulnerability(VulnerabilitySeverity::Low),
        level: Level::Junior,
        platforms: PlatformScope::All,
    };
    static GITLAB_META: RuleMeta = RuleMeta {
        id: "TEST-003",
        name: "GitLab only",
        description: "",
        category: Category::Performance,
        severity: DefaultSeverity::Optimization(Rating::Low),
        level: Level::Junior,
        platforms: PlatformScope::Only(&[Platform::GitlabCi]),
    };
    static EXPERT_META: RuleMeta = RuleMeta {
        id: "TEST-004",
        name: "Expert only",
        description: "",
        category: Category::Maintainability,
        severity: DefaultSeverity::Issue(IssueSeverity::Info),
        level: Level::Expert,
        platforms: PlatformScope::All,
    };

    impl Rule for AlwaysWarns {
        fn meta(&self) -> &'static RuleMeta {
            &WARNS_META
        }
        fn check(&self, _: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
            ctx.push_issue(Issue::new("warn", "always", IssueSeverity::Warning, Category::Linting));
            Ok(())
        }
    }

    impl Rule for Explodes {
        fn meta(&self) -> &'static RuleMeta {
            &EXPLODES_META
        }
        fn check(&self, _: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
            ctx.push_vulnerability(SecurityVulnerability::new("before", "", VulnerabilitySeverity::Low, ""));
            panic!("boom");
        }
    }

    impl Rule for GitlabOnly {
        fn meta(&self) -> &'static RuleMeta {
            &GITLAB_META
        }
        fn check(&self, _: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
            ctx.push_issue(Issue::new("gitlab", "", IssueSeverity::Info, Category::Performance));
            Ok(())
        }
    }

    impl Rule for ExpertOnly {
        fn meta(&self) -> &'static RuleMeta {
            &EXPERT_META
        }
        fn check(&self, _: &Node, _: &mut RuleContext) -> Result<(), RuleError> {
            Err(RuleError::failed("should not run"))
        }
    }

    static RULES: &[&dyn Rule] = &[&Explodes, &AlwaysWarns, &GitlabOnly, &ExpertOnly];

    #[test]
    fn test_panicking_rule_is_isolated() {
        let engine = RuleEngine::new(RULES);
        let outcome = engine.execute(&Node::Null, "", Platform::GithubActions, LevelFilter::UpTo(Level::Senior));

        let synthetic: Vec<_> = outcome
            .issues
            .iter()
            .filter(|i| i.rule_id.as_deref() == Some("rule-error-TEST-002"))
            .collect();
        assert_eq!(synthetic.len(), 1);
        assert_eq!(synthetic[0].severity, IssueSeverity::Error);
        assert_eq!(synthetic[0].category, Category::Linting);
        assert!(outcome.issues.iter().any(|i| i.title == "warn"));
        // pushed before the panic
        assert_eq!(outcome.vulnerabilities.len(), 1);
    }

    #[test]
    fn test_platform_scope_is_respected() {
        let engine = RuleEngine::new(RULES);
        let outcome = engine.execute(&Node::Null, "", Platform::GithubActions, LevelFilter::All);
        assert!(outcome.issues.iter().all(|i| i.title != "gitlab"));

        let outcome = engine.execute(&Node::Null, "", Platform::GitlabCi, LevelFilter::UpTo(Level::Junior));
        assert!(outcome.issues.iter().any(|i| i.title == "gitlab"));
    }

    #[test]
    fn test_level_filter_and_all() {
        let engine = RuleEngine::new(RULES);
        let senior = engine.select(Platform::GithubActions, LevelFilter::UpTo(Level::Senior));
        assert!(senior.iter().all(|r| r.meta().id != "TEST-004"));

        let outcome = engine.execute(&Node::Null, "", Platform::GithubActions, LevelFilter::All);
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.rule_id.as_deref() == Some("rule-error-TEST-004")));
    }

    #[test]
    fn test_disabled_rules_and_categories() {
        let engine = RuleEngine::new(RULES)
            .with_disabled_rules(["TEST-001"])
            .disable_category(Category::Security);
        let ids: Vec<_> = engine
            .select(Platform::GitlabCi, LevelFilter::All)
            .iter()
            .map(|r| r.meta().id)
            .collect();
        assert_eq!(ids, vec!["TEST-003", "TEST-004"]);
    }

    #[test]
    fn test_runs_do_not_leak_into_each_other() {
        let engine = RuleEngine::new(RULES);
        let first = engine.execute(&Node::Null, "", Platform::GithubActions, LevelFilter::UpTo(Level::Junior));
        let second = engine.execute(&Node::Null, "", Platform::GithubActions, LevelFilter::UpTo(Level::Junior));
        assert_eq!(first, second);
    }
}
