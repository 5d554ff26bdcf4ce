use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, SecurityVulnerability, VulnerabilitySeverity};
use crate::platforms::Platform;
use crate::rules::context::RuleContext;
use crate::rules::{DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};

/// Token scopes that allow pushing code or publishing releases.
const SENSITIVE_WRITE_SCOPES: &[&str] = &["contents", "packages", "actions", "id-token", "deployments"];

/// Scopes granted `write` by a `permissions` block.
pub fn write_scopes(permissions: &Node) -> Vec<&str> {
    let Some(map) = permissions.as_mapping() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, level)| level.as_str() == Some("write"))
        .map(|(scope, _)| scope)
        .collect()
}

pub struct BroadPermissions;

static BROAD_PERMISSIONS_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-010",
    name: "Overly broad permissions",
    description: "GITHUB_TOKEN granted write-all, or write on every sensitive scope",
    category: Category::Security,
    severity: DefaultSeverity::Vulnerability(VulnerabilitySeverity::Medium),
    level: Level::Intermediate,
    platforms: PlatformScope::Only(&[Platform::GithubActions]),
};

impl BroadPermissions {
    /// `job_line` is where the owning job starts; `None` for the workflow-level block.
    fn inspect(&self, scope: &str, permissions: &Node, job_line: Option<usize>, ctx: &mut RuleContext) {
        let grant = if permissions.as_str() == Some("write-all") {
            "write-all".to_string()
        } else {
            let writes = write_scopes(permissions);
            if !SENSITIVE_WRITE_SCOPES.iter().all(|s| writes.contains(s)) {
                return;
            }
            format!("write on {}", writes.join(", "))
        };

        let top_level = job_line.is_none();
        let line = ctx
            .lines_where(|l| {
                let trimmed = l.trim_start();
                let indented = trimmed.len() < l.len();
                trimmed.starts_with("permissions:")
                    && indented != top_level
                    && (grant != "write-all" || trimmed.contains("write-all"))
            })
            .into_iter()
            .find(|&n| n > job_line.unwrap_or(0));
        let vuln = SecurityVulnerability::new(
            "Overly broad GITHUB_TOKEN permissions",
            format!("{scope} grants {grant}; a compromised step can push code, publish packages or alter releases"),
            VulnerabilitySeverity::Medium,
            "Grant only the scopes each job needs, e.g.\n  permissions:\n    contents: read",
        )
        .with_rule(BROAD_PERMISSIONS_META.id);
        ctx.push_vulnerability(match line {
            Some(line) => vuln.at_line(line),
            None => vuln,
        });
    }
}

impl Rule for BroadPermissions {
    fn meta(&self) -> &'static RuleMeta {
        &BROAD_PERMISSIONS_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        if let Some(permissions) = document.get("permissions") {
            self.inspect("The workflow", permissions, None, ctx);
        }
        if let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) {
            let jobs_line = ctx.line_of_key("jobs").unwrap_or(0);
            for (job_id, job) in jobs.iter() {
                if let Some(permissions) = job.get("permissions") {
                    let job_key = format!("{job_id}:");
                    let job_line = ctx
                        .lines_where(|l| l.starts_with(' ') && l.trim_start().starts_with(&job_key))
                        .into_iter()
                        .find(|&n| n > jobs_line);
                    self.inspect(&format!("Job '{job_id}'"), permissions, Some(job_line.unwrap_or(jobs_line)), ctx);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(raw: &str) -> Vec<SecurityVulnerability> {
        let doc = parse(raw).unwrap();
        let mut ctx = RuleContext::new(raw, Platform::GithubActions);
        BroadPermissions.check(&doc, &mut ctx).unwrap();
        ctx.into_outcome().vulnerabilities
    }

    #[test]
    fn test_write_all_detected() {
        let vulns = check("on: push\npermissions: write-all\njobs: {}\n");
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].severity, VulnerabilitySeverity::Medium);
        assert_eq!(vulns[0].line, Some(2));
        assert!(vulns[0].description.contains("write-all"));
    }

    #[test]
    fn test_scoped_permissions_are_fine() {
        let vulns = check(
            r#"
on: push
permissions:
  contents: read
  pull-requests: write
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
"#,
        );
        assert!(vulns.is_empty());
    }

    #[test]
    fn test_job_level_every_sensitive_scope() {
        let vulns = check(
            r#"
on: push
jobs:
  release:
    runs-on: ubuntu-latest
    permissions:
      contents: write
      packages: write
      actions: write
      id-token: write
      deployments: write
    steps:
      - run: make release
"#,
        );
        assert_eq!(vulns.len(), 1);
        assert!(vulns[0].description.starts_with("Job 'release'"));
    }

    #[test]
    fn test_job_write_all_points_at_job_block() {
        let vulns = check(
            r#"
on: push
permissions: write-all
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
  release:
    runs-on: ubuntu-latest
    permissions: write-all
    steps:
      - run: make release
"#,
        );
        assert_eq!(vulns.len(), 2);
        assert_eq!(vulns[0].line, Some(3));
        assert!(vulns[1].description.starts_with("Job 'release'"));
        assert_eq!(vulns[1].line, Some(11));
    }

    #[test]
    fn test_write_scopes_lists_only_writes() {
        let doc = parse("contents: read\nissues: write\n").unwrap();
        assert_eq!(write_scopes(&doc), vec!["issues"]);
    }
}
