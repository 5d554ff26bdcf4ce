mod display;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use pipelint_core::config::DEFAULT_CONFIG_FILE;
use pipelint_core::parser::parse;
use pipelint_core::{analyze, AnalysisConfig, AnalysisResult, Platform};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pipelint",
    version,
    about = "Static analyzer for CI/CD pipeline configurations",
    long_about = "Lint GitHub Actions, GitLab CI and Bitbucket Pipelines configurations.\n\nReports structural issues, leaked secrets, risky commands, optimization opportunities and a 0-100 health score."
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). PIPELINT_LOG / RUST_LOG take precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze pipeline configuration files
    Analyze {
        /// Path to a pipeline file or a directory containing pipeline files
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Platform label (github-actions, gitlab-ci, bitbucket-pipelines); detected when omitted
        #[arg(short, long)]
        platform: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Config file (defaults to .pipelint.toml in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run expert-level rules too
        #[arg(long)]
        strict: bool,

        /// Skip security rules
        #[arg(long)]
        no_security: bool,

        /// Skip performance rules
        #[arg(long)]
        no_performance: bool,

        /// Skip cost rules and the cost estimate
        #[arg(long)]
        no_cost: bool,

        /// Reject files larger than this many bytes
        #[arg(long)]
        max_file_size: Option<usize>,

        /// Exit with an error when any file scores below this
        #[arg(long)]
        fail_under: Option<u8>,
    },

    /// List the built-in rules
    Rules {
        /// Only rules that apply to this platform
        #[arg(short, long)]
        platform: Option<String>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags that override values from the config file.
#[derive(Debug, Default, Clone, Copy)]
struct Overrides {
    strict: bool,
    no_security: bool,
    no_performance: bool,
    no_cost: bool,
    max_file_size: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Analyze {
            path,
            platform,
            format,
            config,
            strict,
            no_security,
            no_performance,
            no_cost,
            max_file_size,
            fail_under,
        } => {
            let overrides = Overrides {
                strict,
                no_security,
                no_performance,
                no_cost,
                max_file_size,
            };
            let config = load_config(config.as_deref(), Path::new(DEFAULT_CONFIG_FILE), overrides)?;
            cmd_analyze(&path, platform.as_deref(), format, &config, fail_under)
        }
        Commands::Rules { platform } => cmd_rules(platform.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pipelint", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("PIPELINT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Explicit `--config`, else `fallback` when it exists, else defaults; flags win.
fn load_config(explicit: Option<&Path>, fallback: &Path, overrides: Overrides) -> Result<AnalysisConfig> {
    let mut config = match explicit {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None if fallback.is_file() => AnalysisConfig::load(fallback)
            .with_context(|| format!("Failed to load config '{}'", fallback.display()))?,
        None => AnalysisConfig::default(),
    };

    config.strict_mode |= overrides.strict;
    config.enable_security_analysis &= !overrides.no_security;
    config.enable_performance_analysis &= !overrides.no_performance;
    config.enable_cost_analysis &= !overrides.no_cost;
    if let Some(size) = overrides.max_file_size {
        config.max_file_size = size;
    }
    tracing::debug!(?config, "effective configuration");
    Ok(config)
}

fn parse_platform(label: &str) -> Result<Platform> {
    match Platform::from_label(label) {
        Platform::Unknown => anyhow::bail!(
            "Unknown platform '{}'. Expected one of: {}",
            label,
            Platform::SUPPORTED
                .iter()
                .map(Platform::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        platform => Ok(platform),
    }
}

fn discover_pipeline_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if path.is_dir() {
        let mut files: Vec<PathBuf> = glob::glob(&format!("{}/**/*.yml", path.display()))
            .context("Failed to read glob pattern")?
            .chain(glob::glob(&format!("{}/**/*.yaml", path.display())).context("Failed to read glob pattern")?)
            .filter_map(|r| r.ok())
            .collect();
        files.sort();
        return Ok(files);
    }

    anyhow::bail!("Path '{}' does not exist", path.display());
}

fn analyze_file(file: &Path, platform: Option<Platform>, config: &AnalysisConfig) -> Result<AnalysisResult> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let document = parse(&raw).with_context(|| format!("Failed to parse {}", file.display()))?;
    let platform = platform.unwrap_or_else(|| Platform::detect(Some(file), &document));
    tracing::debug!(file = %file.display(), platform = %platform, "analyzing");
    Ok(analyze(&document, platform.as_str(), &raw, config))
}

fn cmd_analyze(
    path: &Path,
    platform: Option<&str>,
    format: OutputFormat,
    config: &AnalysisConfig,
    fail_under: Option<u8>,
) -> Result<()> {
    let platform = platform.map(parse_platform).transpose()?;
    let files = discover_pipeline_files(path)?;
    if files.is_empty() {
        anyhow::bail!(
            "No pipeline files found at '{}'. \
            Make sure the path points to a YAML file or a directory containing one.",
            path.display()
        );
    }

    let mut reports = Vec::with_capacity(files.len());
    for file in &files {
        reports.push((file.clone(), analyze_file(file, platform, config)?));
    }

    match format {
        OutputFormat::Json => {
            let mut values = Vec::with_capacity(reports.len());
            for (file, result) in &reports {
                let mut value = serde_json::to_value(result)?;
                if let Some(map) = value.as_object_mut() {
                    map.insert("file".to_string(), serde_json::Value::String(file.display().to_string()));
                }
                values.push(value);
            }
            let json = match values.len() {
                1 => serde_json::to_string_pretty(&values[0])?,
                _ => serde_json::to_string_pretty(&values)?,
            };
            println!("{json}");
        }
        OutputFormat::Text => {
            for (file, result) in &reports {
                display::print_analysis_result(file, result);
            }
        }
    }

    if let Some(threshold) = fail_under {
        let failing: Vec<String> = reports
            .iter()
            .filter(|(_, r)| r.score < threshold)
            .map(|(file, r)| format!("{} ({})", file.display(), r.score))
            .collect();
        if !failing.is_empty() {
            anyhow::bail!("Score below {threshold}: {}", failing.join(", "));
        }
    }
    Ok(())
}

fn cmd_rules(platform: Option<&str>) -> Result<()> {
    let platform = platform.map(parse_platform).transpose()?;
    let rules: Vec<_> = pipelint_core::rules::BUILTIN_RULES
        .iter()
        .map(|rule| rule.meta())
        .filter(|meta| platform.map_or(true, |p| meta.platforms.applies_to(p)))
        .collect();
    display::print_rule_catalog(&rules);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strict_mode = true\ndisabled_rules = [\"PLT-MNT-001\"]").unwrap();

        let config = load_config(Some(file.path()), Path::new("/nonexistent"), Overrides::default()).unwrap();
        assert!(config.strict_mode);
        assert_eq!(config.disabled_rules, vec!["PLT-MNT-001"]);
    }

    #[test]
    fn test_fallback_config_and_flag_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&fallback, "enable_cost_analysis = true\nmax_file_size = 2048\n").unwrap();

        let overrides = Overrides {
            no_cost: true,
            max_file_size: Some(512),
            ..Overrides::default()
        };
        let config = load_config(None, &fallback, overrides).unwrap();
        assert!(!config.enable_cost_analysis);
        assert!(config.enable_security_analysis);
        assert_eq!(config.max_file_size, 512);
    }

    #[test]
    fn test_missing_fallback_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(None, &dir.path().join(DEFAULT_CONFIG_FILE), Overrides::default()).unwrap();
        assert!(!config.strict_mode);
        assert_eq!(config.max_file_size, pipelint_core::config::DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn test_bad_config_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[patterns]]\nid = \"x\"\npattern = \"(\"\nmessage = \"m\"").unwrap();
        let err = load_config(Some(file.path()), Path::new("/nonexistent"), Overrides::default()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to load config"));
    }

    #[test]
    fn test_directory_discovery_and_detection() {
        let dir = tempfile::tempdir().unwrap();
        let workflows = dir.path().join(".github/workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(workflows.join("ci.yml"), "on: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        let files = discover_pipeline_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);

        let result = analyze_file(&files[0], None, &AnalysisConfig::default()).unwrap();
        assert_eq!(result.platform, "github-actions");
    }

    #[test]
    fn test_unknown_platform_flag_is_rejected() {
        assert!(parse_platform("jenkins").is_err());
        assert_eq!(parse_platform("gitlab").unwrap(), Platform::GitlabCi);
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
