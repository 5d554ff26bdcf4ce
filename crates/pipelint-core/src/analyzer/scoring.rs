use crate::findings::{Category, Issue, IssueSeverity, Optimization, Rating, SecurityVulnerability, VulnerabilitySeverity};
use serde::{Deserialize, Serialize};

/// Overall health score: 100 minus every issue and vulnerability deduction, clamped to `0..=100`.
pub fn score(issues: &[Issue], vulnerabilities: &[SecurityVulnerability]) -> u8 {
    let deductions: i64 = issues.iter().map(|i| i.severity.deduction()).sum::<i64>()
        + vulnerabilities.iter().map(|v| v.severity.deduction()).sum::<i64>();
    (100 - deductions).clamp(0, 100) as u8
}

/// Security summary, scored independently of the overall score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub overall_score: u8,
    pub vulnerabilities: Vec<SecurityVulnerability>,
    pub exposed_secrets: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SecurityReport {
    pub fn from_vulnerabilities(vulnerabilities: Vec<SecurityVulnerability>) -> Self {
        let count = |severity: VulnerabilitySeverity| vulnerabilities.iter().filter(|v| v.severity == severity).count();
        let exposed_secrets = vulnerabilities
            .iter()
            .filter(|v| {
                let title = v.title.to_lowercase();
                title.contains("secret") || title.contains("key") || title.contains("token")
            })
            .count();
        let overall_score = 100usize.saturating_sub(10 * vulnerabilities.len()) as u8;

        Self {
            overall_score,
            exposed_secrets,
            critical: count(VulnerabilitySeverity::Critical),
            high: count(VulnerabilitySeverity::High),
            medium: count(VulnerabilitySeverity::Medium),
            low: count(VulnerabilitySeverity::Low),
            vulnerabilities,
        }
    }
}

impl Default for SecurityReport {
    fn default() -> Self {
        Self::from_vulnerabilities(Vec::new())
    }
}

/// A ranked, fixed-text next step derived from the findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: u8,
    pub title: String,
    pub description: String,
    pub impact: Rating,
    pub effort: Rating,
    pub category: Category,
}

impl Recommendation {
    fn new(priority: u8, title: &str, description: &str, impact: Rating, effort: Rating, category: Category) -> Self {
        Self {
            priority,
            title: title.to_string(),
            description: description.to_string(),
            impact,
            effort,
            category,
        }
    }
}

/// Recommendations in rank order: critical issues, error issues,
/// security issues, high-impact optimizations.
pub fn recommendations(issues: &[Issue], optimizations: &[Optimization]) -> Vec<Recommendation> {
    let mut ranked = Vec::new();
    if issues.iter().any(|i| i.severity == IssueSeverity::Critical) {
        ranked.push(Recommendation::new(
            1,
            "Fix critical issues",
            "Critical issues can break the pipeline or expose the project; resolve them before anything else",
            Rating::High,
            Rating::Medium,
            Category::Structure,
        ));
    }
    if issues.iter().any(|i| i.severity == IssueSeverity::Error) {
        ranked.push(Recommendation::new(
            2,
            "Resolve configuration errors",
            "Errors stop jobs from running as written; fix them to get a working pipeline",
            Rating::High,
            Rating::Low,
            Category::Structure,
        ));
    }
    if issues.iter().any(|i| i.category == Category::Security) {
        ranked.push(Recommendation::new(
            3,
            "Harden pipeline security",
            "Pin images and actions, avoid plain HTTP and keep credentials in the secret store",
            Rating::High,
            Rating::Medium,
            Category::Security,
        ));
    }
    if optimizations.iter().any(|o| o.impact == Rating::High) {
        ranked.push(Recommendation::new(
            4,
            "Apply high-impact optimizations",
            "Caching, parallel jobs and cheaper runners give the largest time and cost savings",
            Rating::High,
            Rating::Low,
            Category::Performance,
        ));
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: IssueSeverity, category: Category) -> Issue {
        Issue::new("t", "d", severity, category)
    }

    fn vuln(title: &str, severity: VulnerabilitySeverity) -> SecurityVulnerability {
        SecurityVulnerability::new(title, "d", severity, "r")
    }

    #[test]
    fn test_score_deductions() {
        assert_eq!(score(&[], &[]), 100);
        assert_eq!(score(&[issue(IssueSeverity::Error, Category::Structure)], &[]), 85);
        let issues = [
            issue(IssueSeverity::Critical, Category::Structure),
            issue(IssueSeverity::Warning, Category::Security),
            issue(IssueSeverity::Info, Category::Maintainability),
        ];
        let vulns = [vuln("x", VulnerabilitySeverity::High), vuln("y", VulnerabilitySeverity::Low)];
        assert_eq!(score(&issues, &vulns), 100 - 25 - 8 - 3 - 20 - 5);
    }

    #[test]
    fn test_score_clamps_at_zero() {
        let vulns: Vec<_> = (0..5).map(|_| vuln("x", VulnerabilitySeverity::Critical)).collect();
        assert_eq!(score(&[], &vulns), 0);
    }

    #[test]
    fn test_score_is_monotonic() {
        let mut issues = Vec::new();
        let mut previous = score(&issues, &[]);
        for severity in [IssueSeverity::Info, IssueSeverity::Warning, IssueSeverity::Error, IssueSeverity::Critical] {
            issues.push(issue(severity, Category::Linting));
            let next = score(&issues, &[]);
            assert!(next <= previous);
            previous = next;
        }
    }

    #[test]
    fn test_security_report() {
        let report = SecurityReport::from_vulnerabilities(vec![
            vuln("AWS Access Key ID detected", VulnerabilitySeverity::Critical),
            vuln("GitHub Token detected", VulnerabilitySeverity::Critical),
            vuln("Remote script piped to shell", VulnerabilitySeverity::Critical),
            vuln("High-entropy string (possible secret)", VulnerabilitySeverity::High),
        ]);
        assert_eq!(report.overall_score, 60);
        assert_eq!(report.exposed_secrets, 3);
        assert_eq!(report.critical, 3);
        assert_eq!(report.high, 1);

        let many: Vec<_> = (0..12).map(|_| vuln("x", VulnerabilitySeverity::Low)).collect();
        assert_eq!(SecurityReport::from_vulnerabilities(many).overall_score, 0);
    }

    #[test]
    fn test_recommendation_order() {
        let issues = [
            issue(IssueSeverity::Warning, Category::Security),
            issue(IssueSeverity::Error, Category::Structure),
        ];
        let opts = [Optimization::new("o", "d", Rating::High, Rating::Low, Category::Performance, "s")];
        let titles: Vec<_> = recommendations(&issues, &opts).into_iter().map(|r| r.title).collect();
        assert_eq!(
            titles,
            vec!["Resolve configuration errors", "Harden pipeline security", "Apply high-impact optimizations"]
        );
        assert!(recommendations(&[], &[]).is_empty());
    }
}
