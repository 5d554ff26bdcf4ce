use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, SecurityVulnerability, VulnerabilitySeverity};
use crate::rules::context::RuleContext;
use crate::rules::{DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};
use crate::security::entropy::mask_secret;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

type Validator = fn(&str) -> bool;

/// A known credential format.
struct SecretSignature {
    name: &'static str,
    regex: &'static str,
    /// Capture group holding the secret value.
    group: usize,
    severity: VulnerabilitySeverity,
    validator: Option<Validator>,
    /// Generic signatures only run on lines no specific signature matched.
    generic: bool,
}

const SIGNATURES: &[SecretSignature] = &[
    SecretSignature {
        name: "AWS Access Key ID",
        regex: r"\b((?:AKIA|ASIA)[0-9A-Z]{16})\b",
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "AWS Secret Access Key",
        regex: r#"(?i)aws_?secret_?(?:access_?)?key['"]?\s*[:=]\s*['"]?([A-Za-z0-9/+=]{40})(?:[^A-Za-z0-9/+=]|$)"#,
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "GitHub Token",
        regex: r"\b((?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{36})\b",
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "GitHub Fine-grained Token",
        regex: r"\b(github_pat_[A-Za-z0-9_]{82})\b",
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "GitLab Personal Access Token",
        regex: r"\b(glpat-[A-Za-z0-9_\-]{20})\b",
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "Slack Token",
        regex: r"\b(xox[baprs]-[A-Za-z0-9\-]{10,})",
        group: 1,
        severity: VulnerabilitySeverity::High,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "Slack Webhook URL",
        regex: r"(https://hooks\.slack\.com/services/T[A-Z0-9]+/B[A-Z0-9]+/[A-Za-z0-9]+)",
        group: 1,
        severity: VulnerabilitySeverity::High,
        validator: None,
        generic: false,
    },
    SecretSignature {
        name: "Google API Key",
        regex: r"\b(AIza[0-9A-Za-z_\-]{35})",
        group: 1,
        severity: VulnerabilitySeverity::High,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "Stripe Live Secret Key",
        regex: r"\b(sk_live_[0-9a-zA-Z]{24,})",
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "npm Access Token",
        regex: r"\b(npm_[A-Za-z0-9]{36})\b",
        group: 1,
        severity: VulnerabilitySeverity::High,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "Private Key",
        regex: r"(-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY(?: BLOCK)?-----)",
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: None,
        generic: false,
    },
    SecretSignature {
        name: "JSON Web Token",
        regex: r"\b(eyJ[A-Za-z0-9_\-]{10,}\.eyJ[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,})",
        group: 1,
        severity: VulnerabilitySeverity::High,
        validator: None,
        generic: false,
    },
    SecretSignature {
        name: "Database Connection String Password",
        regex: r"(?i)\b(?:postgres(?:ql)?|mysql|mongodb(?:\+srv)?|redis|amqp|mssql)://[^:\s/@]+:([^@\s/]+)@",
        group: 1,
        severity: VulnerabilitySeverity::Critical,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "Docker Login Password",
        regex: r#"docker\s+login\b.*?(?:\s-p|\s--password)[\s=]+['"]?([^\s'"]+)"#,
        group: 1,
        severity: VulnerabilitySeverity::High,
        validator: Some(is_real_value),
        generic: false,
    },
    SecretSignature {
        name: "Hardcoded Secret Assignment",
        regex: r#"(?i)\b[A-Za-z0-9_\-]*(?:password|passwd|secret|token|api[_\-]?key|access[_\-]?key|private[_\-]?key|credentials?)[A-Za-z0-9_\-]*['"]?\s*[:=]\s*['"]([^'"\s]{8,})['"]"#,
        group: 1,
        severity: VulnerabilitySeverity::Medium,
        validator: Some(is_generic_secret),
        generic: true,
    },
];

lazy_static! {
    static ref COMPILED: Vec<(&'static SecretSignature, Regex)> = SIGNATURES
        .iter()
        .map(|sig| (sig, Regex::new(sig.regex).unwrap()))
        .collect();
}

const PLACEHOLDER_MARKERS: &[&str] = &[
    "example", "placeholder", "changeme", "change_me", "your_", "your-", "xxxx", "dummy",
    "sample", "test", "fake", "redacted", "<", ">", "...",
];

const TEMPLATE_MARKERS: &[&str] = &["${", "{{", "$(", "%{", "#{"];

const NON_SECRET_LITERALS: &[&str] = &[
    "password", "secret", "token", "true", "false", "null", "none", "required", "optional",
    "undefined", "string",
];

/// Rejects placeholder text and template references.
fn is_real_value(value: &str) -> bool {
    let lower = value.to_lowercase();
    if PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    !value.starts_with('$') && !TEMPLATE_MARKERS.iter().any(|m| value.contains(m))
}

/// Stricter check for `key = "value"` matches.
fn is_generic_secret(value: &str) -> bool {
    if !is_real_value(value) {
        return false;
    }
    if NON_SECRET_LITERALS.contains(&value.to_lowercase().as_str()) {
        return false;
    }
    has_character_diversity(value)
}

/// At least six distinct characters drawn from two or more character classes.
fn has_character_diversity(value: &str) -> bool {
    let distinct: HashSet<char> = value.chars().collect();
    if distinct.len() < 6 {
        return false;
    }
    let classes = [
        value.chars().any(|c| c.is_ascii_lowercase()),
        value.chars().any(|c| c.is_ascii_uppercase()),
        value.chars().any(|c| c.is_ascii_digit()),
        value.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    classes.iter().filter(|present| **present).count() >= 2
}

/// A signature hit on one line.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretMatch {
    pub signature: &'static str,
    pub line: usize,
    pub masked: String,
    pub severity: VulnerabilitySeverity,
}

/// Scan text for known credential formats.
///
/// Matches rejected by a signature's validator are dropped without a trace.
pub fn scan_text(text: &str) -> Vec<SecretMatch> {
    let mut matches = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let mut reported = false;
        for (signature, regex) in COMPILED.iter() {
            if signature.generic && reported {
                continue;
            }
            for caps in regex.captures_iter(line) {
                let Some(value) = caps.get(signature.group).map(|m| m.as_str()) else {
                    continue;
                };
                if let Some(validate) = signature.validator {
                    if !validate(value) {
                        continue;
                    }
                }
                reported = true;
                matches.push(SecretMatch {
                    signature: signature.name,
                    line: i + 1,
                    masked: mask_secret(value),
                    severity: signature.severity,
                });
            }
        }
    }
    matches
}

pub struct SecretSignatures;

static SECRET_SIGNATURES_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-001",
    name: "Hardcoded secrets",
    description: "Detects known credential formats such as cloud keys, VCS tokens and private keys",
    category: Category::Security,
    severity: DefaultSeverity::Vulnerability(VulnerabilitySeverity::Critical),
    level: Level::Junior,
    platforms: PlatformScope::All,
};

impl Rule for SecretSignatures {
    fn meta(&self) -> &'static RuleMeta {
        &SECRET_SIGNATURES_META
    }

    fn check(&self, _document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        for hit in scan_text(ctx.raw_text()) {
            ctx.push_vulnerability(
                SecurityVulnerability::new(
                    format!("{} detected", hit.signature),
                    format!("Line {} contains what looks like a {}: {}", hit.line, hit.signature, hit.masked),
                    hit.severity,
                    "Revoke the credential, remove it from the file and inject it from the CI secret store",
                )
                .at_line(hit.line)
                .with_rule(SECRET_SIGNATURES_META.id),
            );
        }
        Ok(())
    }
}
