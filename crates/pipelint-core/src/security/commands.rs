use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity, SecurityVulnerability, VulnerabilitySeverity};
use crate::rules::context::RuleContext;
use crate::rules::{code_lines, DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PIPE_TO_SHELL: Regex = Regex::new(
        r"(?i)\b(?:curl|wget)\b[^|\n]*\|\s*(?:sudo\s+)?(?:-E\s+)?(?:ba|z|k|da|fi)?sh\b"
    )
    .unwrap();
    static ref PIPE_TO_INTERPRETER: Regex = Regex::new(
        r"(?i)\b(?:curl|wget)\b[^|\n]*\|\s*(?:sudo\s+)?(?:python3?|perl|ruby|node)\b"
    )
    .unwrap();
    static ref SHELL_PROCESS_SUBST: Regex = Regex::new(
        r"(?i)\b(?:ba|z)?sh\s+(?:-c\s+)?[<\x22']*\$?\(\s*(?:curl|wget)\b"
    )
    .unwrap();
    static ref PRIVILEGED: Regex = Regex::new(r"(?i)(?:\bprivileged\s*:\s*true\b|--privileged\b)").unwrap();
    static ref INSECURE_URL: Regex = Regex::new(r"\bhttp://([^\s'\x22/:@]+)").unwrap();
    static ref LOCALHOST: Regex = Regex::new(r"\b(?:localhost|127\.0\.0\.1|0\.0\.0\.0)\b").unwrap();
}

struct DangerousPattern {
    title: &'static str,
    regex: &'static str,
    severity: VulnerabilitySeverity,
    recommendation: &'static str,
}

const DANGEROUS_PATTERNS: &[DangerousPattern] = &[
    DangerousPattern {
        title: "Recursive delete of the root filesystem",
        regex: r"\brm\s+-[a-zA-Z]*[rR][a-zA-Z]*\s+(?:--no-preserve-root\s+)?/\*?(?:\s|;|$)",
        severity: VulnerabilitySeverity::Critical,
        recommendation: "Delete only the directories the job created",
    },
    DangerousPattern {
        title: "World-writable permissions (chmod 777)",
        regex: r"\bchmod\s+(?:-[a-zA-Z]+\s+)*0?777\b",
        severity: VulnerabilitySeverity::High,
        recommendation: "Grant the narrowest mode that works, e.g. 755 for executables",
    },
    DangerousPattern {
        title: "eval of command substitution",
        regex: r"\beval\s+[\x22']?(?:\$\(|`)",
        severity: VulnerabilitySeverity::High,
        recommendation: "Run the command directly instead of evaluating its output",
    },
    DangerousPattern {
        title: "Fork bomb",
        regex: r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        severity: VulnerabilitySeverity::Critical,
        recommendation: "Remove the command",
    },
    DangerousPattern {
        title: "Docker socket mounted into a container",
        regex: r"/var/run/docker\.sock",
        severity: VulnerabilitySeverity::High,
        recommendation: "Use rootless builders such as kaniko or buildah instead of the host socket",
    },
    DangerousPattern {
        title: "Raw write to a disk device",
        regex: r"\b(?:dd\s+[^\n]*of=/dev/(?:sd|hd|nvme|xvd)[a-z0-9]*|mkfs(?:\.[a-z0-9]+)?\s+/dev/)",
        severity: VulnerabilitySeverity::Critical,
        recommendation: "Remove the command; CI jobs should never touch block devices",
    },
];

lazy_static! {
    static ref DANGEROUS_COMPILED: Vec<(&'static DangerousPattern, Regex)> = DANGEROUS_PATTERNS
        .iter()
        .map(|p| (p, Regex::new(p.regex).unwrap()))
        .collect();
}

pub struct RemoteScriptExecution;

static REMOTE_SCRIPT_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-003",
    name: "Remote script piped to shell",
    description: "Downloads piped straight into a shell or interpreter run unreviewed code",
    category: Category::Security,
    severity: DefaultSeverity::Vulnerability(VulnerabilitySeverity::Critical),
    level: Level::Junior,
    platforms: PlatformScope::All,
};

impl Rule for RemoteScriptExecution {
    fn meta(&self) -> &'static RuleMeta {
        &REMOTE_SCRIPT_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        for (line_no, line) in code_lines(ctx) {
            let piped = PIPE_TO_SHELL.is_match(line)
                || PIPE_TO_INTERPRETER.is_match(line)
                || SHELL_PROCESS_SUBST.is_match(line);
            if !piped {
                continue;
            }
            ctx.push_vulnerability(
                SecurityVulnerability::new(
                    "Remote script piped to shell",
                    format!("Line {line_no} executes a downloaded script without verification: {}", line.trim()),
                    VulnerabilitySeverity::Critical,
                    "Download the script, verify its checksum or signature, then run the local copy",
                )
                .at_line(line_no)
                .with_cvss(9.8)
                .with_rule(REMOTE_SCRIPT_META.id),
            );
        }
        Ok(())
    }
}

pub struct DangerousCommands;

static DANGEROUS_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-004",
    name: "Dangerous shell commands",
    description: "Destructive or privilege-widening commands in scripts",
    category: Category::Security,
    severity: DefaultSeverity::Vulnerability(VulnerabilitySeverity::High),
    level: Level::Junior,
    platforms: PlatformScope::All,
};

impl Rule for DangerousCommands {
    fn meta(&self) -> &'static RuleMeta {
        &DANGEROUS_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        for (line_no, line) in code_lines(ctx) {
            for (pattern, regex) in DANGEROUS_COMPILED.iter() {
                if regex.is_match(line) {
                    ctx.push_vulnerability(
                        SecurityVulnerability::new(
                            pattern.title,
                            format!("Line {line_no}: {}", line.trim()),
                            pattern.severity,
                            pattern.recommendation,
                        )
                        .at_line(line_no)
                        .with_rule(DANGEROUS_META.id),
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct PrivilegedContainers;

static PRIVILEGED_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-005",
    name: "Privileged containers",
    description: "Containers started with full host privileges",
    category: Category::Security,
    severity: DefaultSeverity::Vulnerability(VulnerabilitySeverity::High),
    level: Level::Intermediate,
    platforms: PlatformScope::All,
};

impl Rule for PrivilegedContainers {
    fn meta(&self) -> &'static RuleMeta {
        &PRIVILEGED_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        for (line_no, line) in code_lines(ctx) {
            if PRIVILEGED.is_match(line) {
                ctx.push_vulnerability(
                    SecurityVulnerability::new(
                        "Privileged container",
                        format!("Line {line_no} runs a container in privileged mode, giving it root on the host"),
                        VulnerabilitySeverity::High,
                        "Drop privileged mode and add only the capabilities the job needs",
                    )
                    .at_line(line_no)
                    .with_rule(PRIVILEGED_META.id),
                );
            }
        }
        Ok(())
    }
}

pub struct InsecureHttp;

static INSECURE_HTTP_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-006",
    name: "Insecure HTTP URLs",
    description: "Plain HTTP downloads can be tampered with in transit",
    category: Category::Security,
    severity: DefaultSeverity::Issue(IssueSeverity::Warning),
    level: Level::Junior,
    platforms: PlatformScope::All,
};

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0")
}

impl Rule for InsecureHttp {
    fn meta(&self) -> &'static RuleMeta {
        &INSECURE_HTTP_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        for (line_no, line) in code_lines(ctx) {
            let hosts: Vec<&str> = INSECURE_URL
                .captures_iter(line)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .filter(|host| !is_loopback(host))
                .collect();
            if hosts.is_empty() {
                continue;
            }
            ctx.push_issue(
                Issue::new(
                    "Insecure HTTP URL",
                    format!("Line {line_no} fetches from {} over plain HTTP", hosts.join(", ")),
                    IssueSeverity::Warning,
                    Category::Security,
                )
                .with_rule(INSECURE_HTTP_META.id)
                .with_suggestion("Use https:// URLs")
                .fixable(true)
                .at_line(line_no)
                .with_fix_minutes(2),
            );
        }
        Ok(())
    }
}

pub struct HardcodedLocalhost;

static LOCALHOST_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-007",
    name: "Hardcoded localhost",
    description: "Loopback addresses baked into pipeline configuration",
    category: Category::BestPractice,
    severity: DefaultSeverity::Issue(IssueSeverity::Info),
    level: Level::Senior,
    platforms: PlatformScope::All,
};

impl Rule for HardcodedLocalhost {
    fn meta(&self) -> &'static RuleMeta {
        &LOCALHOST_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let lines: Vec<usize> = code_lines(ctx)
            .into_iter()
            .filter(|(_, line)| LOCALHOST.is_match(line))
            .map(|(n, _)| n)
            .collect();
        if lines.is_empty() {
            return Ok(());
        }
        ctx.push_issue(
            Issue::new(
                "Hardcoded localhost",
                format!("{} line(s) reference a loopback address directly", lines.len()),
                IssueSeverity::Info,
                Category::BestPractice,
            )
            .with_rule(LOCALHOST_META.id)
            .with_suggestion("Read service hosts from variables so jobs work with service containers")
            .with_lines(lines),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::Platform;
    use crate::rules::context::RuleOutcome;

    fn run(rule: &dyn Rule, raw: &str) -> RuleOutcome {
        let mut ctx = RuleContext::new(raw, Platform::GithubActions);
        rule.check(&Node::Null, &mut ctx).unwrap();
        ctx.into_outcome()
    }

    #[test]
    fn test_pipe_to_shell_variants() {
        for line in [
            "curl http://insecure.example.com/script.sh | bash",
            "curl -fsSL https://get.example.io | sudo sh",
            "wget -qO- https://x.io/install | python3",
            "bash <(curl -s https://x.io/i.sh)",
        ] {
            let outcome = run(&RemoteScriptExecution, line);
            assert_eq!(outcome.vulnerabilities.len(), 1, "{line}");
            assert_eq!(outcome.vulnerabilities[0].severity, VulnerabilitySeverity::Critical);
        }
        assert!(run(&RemoteScriptExecution, "curl -o out.tgz https://x.io/a.tgz").vulnerabilities.is_empty());
        assert!(run(&RemoteScriptExecution, "# curl https://x.io | sh").vulnerabilities.is_empty());
    }

    #[test]
    fn test_dangerous_commands() {
        let outcome = run(
            &DangerousCommands,
            "rm -rf /\nrm -rf /tmp/build\nchmod 777 deploy.sh\neval \"$(ssh-agent -s)\"\n:(){ :|:& };:\n",
        );
        let titles: Vec<_> = outcome.vulnerabilities.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Recursive delete of the root filesystem",
                "World-writable permissions (chmod 777)",
                "eval of command substitution",
                "Fork bomb",
            ]
        );
        assert_eq!(outcome.vulnerabilities[1].line, Some(3));
    }

    #[test]
    fn test_scenario_line_is_not_a_dangerous_command() {
        assert!(run(&DangerousCommands, "curl http://insecure.example.com/script.sh | bash")
            .vulnerabilities
            .is_empty());
    }

    #[test]
    fn test_privileged() {
        let outcome = run(&PrivilegedContainers, "services:\n  - name: docker:dind\n    privileged: true\n");
        assert_eq!(outcome.vulnerabilities.len(), 1);
        assert_eq!(outcome.vulnerabilities[0].line, Some(3));
    }

    #[test]
    fn test_insecure_http_skips_loopback() {
        let outcome = run(&InsecureHttp, "curl http://insecure.example.com/script.sh | bash");
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].severity, IssueSeverity::Warning);
        assert_eq!(outcome.issues[0].category, Category::Security);
        assert!(run(&InsecureHttp, "curl http://localhost:8080/health").issues.is_empty());
    }

    #[test]
    fn test_localhost_collects_lines() {
        let outcome = run(&HardcodedLocalhost, "a: http://localhost:3000\nb: ok\nc: 127.0.0.1\n");
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].lines, vec![1, 3]);
    }
}
