use crate::findings::{Issue, Optimization, SecurityVulnerability};
use crate::platforms::Platform;

/// Everything a rule sees during one run: the source text, the platform,
/// and three append-only sinks.
/// Findings pushed here cannot be read back until the run ends.
#[derive(Debug)]
pub struct RuleContext<'a> {
    raw_text: &'a str,
    lines: Vec<&'a str>,
    platform: Platform,
    issues: Vec<Issue>,
    optimizations: Vec<Optimization>,
    vulnerabilities: Vec<SecurityVulnerability>,
}

/// Findings collected by one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub issues: Vec<Issue>,
    pub optimizations: Vec<Optimization>,
    pub vulnerabilities: Vec<SecurityVulnerability>,
}

impl<'a> RuleContext<'a> {
    pub fn new(raw_text: &'a str, platform: Platform) -> Self {
        Self {
            raw_text,
            lines: raw_text.lines().collect(),
            platform,
            issues: Vec::new(),
            optimizations: Vec::new(),
            vulnerabilities: Vec::new(),
        }
    }

    pub fn raw_text(&self) -> &'a str {
        self.raw_text
    }

    pub fn lines(&self) -> &[&'a str] {
        &self.lines
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn push_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn push_optimization(&mut self, optimization: Optimization) {
        self.optimizations.push(optimization);
    }

    pub fn push_vulnerability(&mut self, vulnerability: SecurityVulnerability) {
        self.vulnerabilities.push(vulnerability);
    }

    /// 1-based numbers of the lines matching `predicate`.
    pub fn lines_where(&self, predicate: impl Fn(&str) -> bool) -> Vec<usize> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| predicate(line))
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// First line containing `needle`.
    pub fn line_containing(&self, needle: &str) -> Option<usize> {
        self.lines.iter().position(|l| l.contains(needle)).map(|i| i + 1)
    }

    /// First line declaring `key:` (bare, quoted or as a list item).
    pub fn line_of_key(&self, key: &str) -> Option<usize> {
        let bare = format!("{key}:");
        let double = format!("\"{key}\":");
        let single = format!("'{key}':");
        self.lines
            .iter()
            .position(|line| {
                let trimmed = line.trim_start().trim_start_matches("- ");
                trimmed.starts_with(&bare) || trimmed.starts_with(&double) || trimmed.starts_with(&single)
            })
            .map(|i| i + 1)
    }

    pub fn into_outcome(self) -> RuleOutcome {
        RuleOutcome {
            issues: self.issues,
            optimizations: self.optimizations,
            vulnerabilities: self.vulnerabilities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{Category, IssueSeverity};

    #[test]
    fn test_line_lookup_is_one_based() {
        let ctx = RuleContext::new("name: CI\njobs:\n  build:\n    runs-on: x\n", Platform::GithubActions);
        assert_eq!(ctx.line_of_key("jobs"), Some(2));
        assert_eq!(ctx.line_of_key("build"), Some(3));
        assert_eq!(ctx.line_containing("runs-on"), Some(4));
        assert_eq!(ctx.lines_where(|l| l.contains(':')), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_sinks_move_into_outcome() {
        let mut ctx = RuleContext::new("", Platform::Unknown);
        ctx.push_issue(Issue::new("a", "b", IssueSeverity::Info, Category::Linting));
        let outcome = ctx.into_outcome();
        assert_eq!(outcome.issues.len(), 1);
        assert!(outcome.optimizations.is_empty());
    }
}
