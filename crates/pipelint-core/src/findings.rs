use serde::{Deserialize, Serialize};

/// Severity of a linting [`Issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

impl IssueSeverity {
    /// Points taken off the overall score per issue.
    pub fn deduction(&self) -> i64 {
        match self {
            IssueSeverity::Critical => 25,
            IssueSeverity::Error => 15,
            IssueSeverity::Warning => 8,
            IssueSeverity::Info => 3,
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            IssueSeverity::Critical => 4,
            IssueSeverity::Error => 3,
            IssueSeverity::Warning => 2,
            IssueSeverity::Info => 1,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            IssueSeverity::Critical => "CRITICAL",
            IssueSeverity::Error => "ERROR",
            IssueSeverity::Warning => "WARNING",
            IssueSeverity::Info => "INFO",
        }
    }
}

/// Severity of a [`SecurityVulnerability`]. Not interchangeable with [`IssueSeverity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilitySeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl VulnerabilitySeverity {
    /// Points taken off the overall score per vulnerability.
    pub fn deduction(&self) -> i64 {
        match self {
            VulnerabilitySeverity::Critical => 30,
            VulnerabilitySeverity::High => 20,
            VulnerabilitySeverity::Medium => 10,
            VulnerabilitySeverity::Low => 5,
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            VulnerabilitySeverity::Critical => 4,
            VulnerabilitySeverity::High => 3,
            VulnerabilitySeverity::Medium => 2,
            VulnerabilitySeverity::Low => 1,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            VulnerabilitySeverity::Critical => "CRITICAL",
            VulnerabilitySeverity::High => "HIGH",
            VulnerabilitySeverity::Medium => "MEDIUM",
            VulnerabilitySeverity::Low => "LOW",
        }
    }
}

/// Impact or effort rating of an [`Optimization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    High,
    Medium,
    Low,
}

impl Rating {
    pub fn label(&self) -> &str {
        match self {
            Rating::High => "high",
            Rating::Medium => "medium",
            Rating::Low => "low",
        }
    }
}

/// Area a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Security,
    Performance,
    Maintainability,
    Cost,
    Linting,
    Structure,
    Compliance,
    BestPractice,
}

impl Category {
    pub fn label(&self) -> &str {
        match self {
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Maintainability => "maintainability",
            Category::Cost => "cost",
            Category::Linting => "linting",
            Category::Structure => "structure",
            Category::Compliance => "compliance",
            Category::BestPractice => "best-practice",
        }
    }
}

/// A discrete linting finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub title: String,
    pub description: String,
    pub severity: IssueSeverity,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixable: Option<bool>,
    /// 1-based line numbers, empty when the finding has no location.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_fix_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
}

impl Issue {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: IssueSeverity,
        category: Category,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            category,
            rule_id: None,
            suggestion: None,
            example: None,
            fixable: None,
            lines: Vec::new(),
            estimated_fix_minutes: None,
            documentation_url: None,
        }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn fixable(mut self, fixable: bool) -> Self {
        self.fixable = Some(fixable);
        self
    }

    pub fn at_line(self, line: usize) -> Self {
        self.with_lines(vec![line])
    }

    pub fn with_lines(mut self, mut lines: Vec<usize>) -> Self {
        lines.sort_unstable();
        lines.dedup();
        self.lines = lines;
        self
    }

    pub fn with_fix_minutes(mut self, minutes: u32) -> Self {
        self.estimated_fix_minutes = Some(minutes);
        self
    }

    pub fn with_docs(mut self, url: impl Into<String>) -> Self {
        self.documentation_url = Some(url.into());
        self
    }
}

/// A suggested improvement. Not a defect, never affects the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    pub title: String,
    pub description: String,
    pub impact: Rating,
    pub effort: Rating,
    pub category: Category,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Optimization {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        impact: Rating,
        effort: Rating,
        category: Category,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            impact,
            effort,
            category,
            suggestion: suggestion.into(),
            example: None,
            lines: Vec::new(),
            rule_id: None,
        }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn with_lines(mut self, mut lines: Vec<usize>) -> Self {
        lines.sort_unstable();
        lines.dedup();
        self.lines = lines;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityVulnerability {
    pub title: String,
    pub description: String,
    pub severity: VulnerabilitySeverity,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl SecurityVulnerability {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: VulnerabilitySeverity,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            recommendation: recommendation.into(),
            line: None,
            cve: None,
            cvss: None,
            rule_id: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_cvss(mut self, cvss: f32) -> Self {
        self.cvss = Some(cvss);
        self
    }
}
