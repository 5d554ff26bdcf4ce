use colored::*;
use pipelint_core::analyzer::AnalysisResult;
use pipelint_core::rules::RuleMeta;
use pipelint_core::{Issue, IssueSeverity, Optimization, Rating, SecurityVulnerability, VulnerabilitySeverity};
use std::cmp::Reverse;
use std::path::Path;

/// Format seconds into a human-readable duration like "4:32" or "1:02:15".
fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

fn colored_score(score: u8) -> ColoredString {
    let text = format!("{score}/100");
    match score {
        80..=100 => text.green().bold(),
        50..=79 => text.yellow().bold(),
        _ => text.red().bold(),
    }
}

fn lines_suffix(lines: &[usize]) -> String {
    match lines {
        [] => String::new(),
        [line] => format!(" (line {line})"),
        many => format!(
            " (lines {})",
            many.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Print a full analysis result to the terminal.
pub fn print_analysis_result(file: &Path, result: &AnalysisResult) {
    println!();
    println!(
        "{}",
        format!(" pipelint v{} - {}", env!("CARGO_PKG_VERSION"), file.display()).bold()
    );
    println!();

    let metrics = &result.metrics;
    println!(" {}", "Pipeline Structure".bold().underline());
    println!(" {} Platform: {}", "|-".dimmed(), result.platform.cyan());
    println!(
        " {} {} jobs, {} steps, {} triggers",
        "|-".dimmed(),
        metrics.job_count,
        metrics.step_count,
        metrics.trigger_count
    );
    if !metrics.performance.critical_path.is_empty() {
        println!(
            " {} Critical path: {} ({})",
            "|-".dimmed(),
            metrics.performance.critical_path.join(" -> "),
            format_duration(metrics.performance.build_time_estimate_secs)
        );
    }
    println!();

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    if result.issues.is_empty() && result.security.vulnerabilities.is_empty() && result.optimizations.is_empty() {
        println!(" {} No findings. Your pipeline looks good!", "OK".green().bold());
        println!();
    }
    // most severe first
    let mut vulnerabilities: Vec<_> = result.security.vulnerabilities.iter().collect();
    vulnerabilities.sort_by_key(|v| Reverse(v.severity.priority()));
    for vulnerability in vulnerabilities {
        print_vulnerability(vulnerability);
    }
    let mut issues: Vec<_> = result.issues.iter().collect();
    issues.sort_by_key(|i| Reverse(i.severity.priority()));
    for issue in issues {
        print_issue(issue);
    }
    for optimization in &result.optimizations {
        print_optimization(optimization);
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    println!(" {}", "Summary".bold().underline());
    println!(" {} Health score:     {}", "|-".dimmed(), colored_score(result.score));
    println!(
        " {} Security score:   {} ({} critical, {} high, {} exposed secrets)",
        "|-".dimmed(),
        colored_score(result.security.overall_score),
        if result.security.critical > 0 {
            result.security.critical.to_string().red().bold().to_string()
        } else {
            "0".to_string()
        },
        if result.security.high > 0 {
            result.security.high.to_string().yellow().bold().to_string()
        } else {
            "0".to_string()
        },
        result.security.exposed_secrets
    );
    println!(
        " {} Parallelization:  {:.0}%  Cache usage: {:.0}%",
        "|-".dimmed(),
        metrics.performance.parallelization_score,
        metrics.cache_usage_percent
    );
    println!(
        " {} Complexity:       cyclomatic {}, maintainability {:.0}",
        "|-".dimmed(),
        metrics.complexity.cyclomatic,
        metrics.complexity.maintainability_index
    );
    if result.cost.current > 0.0 {
        println!(
            " {} Relative cost:    {:.1} units -> {} ({}% savings)",
            "|-".dimmed(),
            result.cost.current,
            format!("{:.1}", result.cost.optimized).green(),
            result.cost.savings_percentage
        );
    }
    println!();

    if !result.recommendations.is_empty() {
        println!(" {}", "Next steps".bold().underline());
        for rec in &result.recommendations {
            println!(" {}. {} {}", rec.priority, rec.title.bold(), rec.description.dimmed());
        }
        println!();
    }
}

fn print_issue(issue: &Issue) {
    let symbol = format!(" {} ", issue.severity.symbol());
    let tag = match issue.severity {
        IssueSeverity::Critical | IssueSeverity::Error => symbol.on_red().white().bold().to_string(),
        IssueSeverity::Warning => symbol.on_yellow().black().bold().to_string(),
        IssueSeverity::Info => symbol.on_blue().white().to_string(),
    };

    print!(" {} {}{}", tag, issue.title.bold(), lines_suffix(&issue.lines).dimmed());
    if let Some(rule) = &issue.rule_id {
        print!(" [{}]", rule.dimmed());
    }
    println!();
    println!("   {} {}", "|".dimmed(), issue.description);
    if let Some(suggestion) = &issue.suggestion {
        println!("   {} {} {}", "|".dimmed(), "Fix:".dimmed(), suggestion.cyan());
    }
    println!();
}

fn print_vulnerability(vulnerability: &SecurityVulnerability) {
    let symbol = format!(" {} ", vulnerability.severity.symbol());
    let tag = match vulnerability.severity {
        VulnerabilitySeverity::Critical => symbol.on_red().white().bold().to_string(),
        VulnerabilitySeverity::High => symbol.on_yellow().black().bold().to_string(),
        VulnerabilitySeverity::Medium => symbol.on_blue().white().bold().to_string(),
        VulnerabilitySeverity::Low => symbol.dimmed().to_string(),
    };

    let location = vulnerability.line.map(|l| format!(" (line {l})")).unwrap_or_default();
    println!(" {} {}{}", tag, vulnerability.title.bold(), location.dimmed());
    println!("   {} {}", "|".dimmed(), vulnerability.description);
    println!("   {} {}", "|".dimmed(), vulnerability.recommendation.dimmed());
    println!();
}

fn print_optimization(optimization: &Optimization) {
    let tag = match optimization.impact {
        Rating::High => " OPT:HIGH ".on_green().black().bold().to_string(),
        Rating::Medium => " OPT:MED ".green().bold().to_string(),
        Rating::Low => " OPT:LOW ".dimmed().to_string(),
    };

    println!(
        " {} {}{}",
        tag,
        optimization.title.bold(),
        lines_suffix(&optimization.lines).dimmed()
    );
    println!("   {} {}", "|".dimmed(), optimization.description);
    println!(
        "   {} Effort: {} | {}",
        "|".dimmed(),
        optimization.effort.label(),
        optimization.suggestion.cyan()
    );
    println!();
}

/// Print the rule catalog as a table.
pub fn print_rule_catalog(rules: &[&RuleMeta]) {
    println!();
    println!(
        " {:<13} {:<13} {:<14} {:<40} {}",
        "ID".bold(),
        "LEVEL".bold(),
        "DEFAULT".bold(),
        "NAME".bold(),
        "PLATFORMS".bold()
    );
    for meta in rules {
        println!(
            " {:<13} {:<13} {:<14} {:<40} {}",
            meta.id.cyan(),
            meta.level.as_str(),
            meta.severity.label(),
            meta.name,
            meta.platforms.labels().join(", ").dimmed()
        );
    }
    println!();
    println!(" {} rules", rules.len());
    println!();
}
