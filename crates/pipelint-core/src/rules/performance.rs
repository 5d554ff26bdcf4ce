use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Optimization, Rating};
use crate::parser::dag::{JobNode, PipelineDag};
use crate::platforms::Platform;
use crate::rules::context::RuleContext;
use crate::rules::{pipeline, DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

/// Minimum step-signature similarity for two jobs to be folded into a matrix.
pub const MATRIX_SIMILARITY: f64 = 0.70;

/// A package ecosystem whose install step benefits from a cache.
struct Ecosystem {
    name: &'static str,
    command: Regex,
    paths: &'static str,
    lockfile: &'static str,
}

lazy_static! {
    static ref ECOSYSTEMS: Vec<Ecosystem> = vec![
        Ecosystem {
            name: "npm",
            command: Regex::new(r"\b(?:npm\s+(?:ci|install)|yarn\s+install|pnpm\s+install)\b").unwrap(),
            paths: "~/.npm",
            lockfile: "package-lock.json",
        },
        Ecosystem {
            name: "pip",
            command: Regex::new(r"\bpip3?\s+install\b").unwrap(),
            paths: "~/.cache/pip",
            lockfile: "requirements.txt",
        },
        Ecosystem {
            name: "Bundler",
            command: Regex::new(r"\bbundle\s+install\b").unwrap(),
            paths: "vendor/bundle",
            lockfile: "Gemfile.lock",
        },
        Ecosystem {
            name: "Composer",
            command: Regex::new(r"\bcomposer\s+install\b").unwrap(),
            paths: "vendor",
            lockfile: "composer.lock",
        },
        Ecosystem {
            name: "Maven/Gradle",
            command: Regex::new(r"(?:^|\s|/)(?:mvn|mvnw|gradle|gradlew)\s").unwrap(),
            paths: "~/.m2/repository",
            lockfile: "pom.xml",
        },
        Ecosystem {
            name: "Go modules",
            command: Regex::new(r"\bgo\s+(?:mod\s+download|build|test)\b").unwrap(),
            paths: "~/go/pkg/mod",
            lockfile: "go.sum",
        },
        Ecosystem {
            name: "Cargo",
            command: Regex::new(r"\bcargo\s+(?:build|test|clippy)\b").unwrap(),
            paths: "~/.cargo/registry",
            lockfile: "Cargo.lock",
        },
    ];
}

fn cache_example(platform: Platform, ecosystem: &Ecosystem) -> String {
    match platform {
        Platform::GithubActions => format!(
            "- uses: actions/cache@v4\n  with:\n    path: {}\n    key: ${{{{ runner.os }}}}-{}-${{{{ hashFiles('**/{}') }}}}",
            ecosystem.paths,
            ecosystem.name.to_lowercase(),
            ecosystem.lockfile
        ),
        Platform::GitlabCi => format!(
            "cache:\n  key:\n    files:\n      - {}\n  paths:\n    - {}",
            ecosystem.lockfile, ecosystem.paths
        ),
        _ => format!("caches:\n  - {}", ecosystem.name.to_lowercase()),
    }
}

/// First line of a multi-line command, for locating it in the source.
fn first_line(command: &str) -> &str {
    command.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or(command)
}

pub struct MissingDependencyCache;

static MISSING_CACHE_META: RuleMeta = RuleMeta {
    id: "PLT-PERF-001",
    name: "Missing dependency cache",
    description: "Dependency installs without any cache re-download everything on every run",
    category: Category::Performance,
    severity: DefaultSeverity::Optimization(Rating::High),
    level: Level::Junior,
    platforms: PlatformScope::All,
};

impl Rule for MissingDependencyCache {
    fn meta(&self) -> &'static RuleMeta {
        &MISSING_CACHE_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;
        for job in dag.jobs().filter(|job| !job.has_cache()) {
            for ecosystem in ECOSYSTEMS.iter() {
                let Some(command) = job
                    .steps
                    .iter()
                    .filter_map(|step| step.run.as_deref())
                    .find(|run| ecosystem.command.is_match(run))
                else {
                    continue;
                };

                let line = ctx.line_containing(first_line(command));
                let optimization = Optimization::new(
                    format!("Cache {} dependencies", ecosystem.name),
                    format!(
                        "Job '{}' runs `{}` without a dependency cache, so every run downloads all packages again",
                        job.id,
                        first_line(command)
                    ),
                    Rating::High,
                    Rating::Low,
                    Category::Performance,
                    format!(
                        "Cache {} keyed on a hash of {}",
                        ecosystem.paths, ecosystem.lockfile
                    ),
                )
                .with_rule(MISSING_CACHE_META.id)
                .with_example(cache_example(ctx.platform(), ecosystem))
                .with_lines(line.into_iter().collect());
                ctx.push_optimization(optimization);
            }
        }
        Ok(())
    }
}

pub struct StaticCacheKey;

static STATIC_KEY_META: RuleMeta = RuleMeta {
    id: "PLT-PERF-002",
    name: "Static cache key",
    description: "Cache keys that never change serve stale dependencies forever",
    category: Category::Performance,
    severity: DefaultSeverity::Optimization(Rating::Medium),
    level: Level::Intermediate,
    platforms: PlatformScope::All,
};

impl Rule for StaticCacheKey {
    fn meta(&self) -> &'static RuleMeta {
        &STATIC_KEY_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;

        // a global GitLab cache is attached to every job; report each key once
        let mut by_key: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for job in dag.jobs() {
            for cache in job.caches.iter().filter(|c| !c.dynamic_key) {
                if let Some(key) = &cache.key {
                    by_key.entry(key.clone()).or_default().push(job.id.clone());
                }
            }
        }

        for (key, jobs) in by_key {
            let line = ctx.line_containing(&key);
            ctx.push_optimization(
                Optimization::new(
                    "Use a content-based cache key",
                    format!(
                        "Cache key '{key}' (used by {}) never changes, so the cache is never refreshed when dependencies do",
                        jobs.join(", ")
                    ),
                    Rating::Medium,
                    Rating::Low,
                    Category::Performance,
                    "Derive the key from the lockfile hash so it changes with the dependencies",
                )
                .with_rule(STATIC_KEY_META.id)
                .with_example("key: ${{ runner.os }}-deps-${{ hashFiles('**/package-lock.json') }}")
                .with_lines(line.into_iter().collect()),
            );
        }
        Ok(())
    }
}

pub struct Parallelization;

static PARALLELIZATION_META: RuleMeta = RuleMeta {
    id: "PLT-PERF-003",
    name: "Parallelization analysis",
    description: "Reports fully parallel pipelines and long serial job chains",
    category: Category::Performance,
    severity: DefaultSeverity::Optimization(Rating::High),
    level: Level::Intermediate,
    platforms: PlatformScope::All,
};

impl Parallelization {
    fn serial_chain(dag: &PipelineDag) -> Option<Optimization> {
        let chain = dag.longest_chain();
        if chain < 3 || dag.max_parallelism() != 1 {
            return None;
        }
        let ids = dag.job_ids().join(" -> ");
        Some(
            Optimization::new(
                "Long serial job chain",
                format!("All {chain} jobs run one after another ({ids}); total time is the sum of every job"),
                Rating::High,
                Rating::Medium,
                Category::Performance,
                "Drop dependencies that do not pass artifacts, so independent jobs can start together",
            )
            .with_rule(PARALLELIZATION_META.id),
        )
    }
}

impl Rule for Parallelization {
    fn meta(&self) -> &'static RuleMeta {
        &PARALLELIZATION_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;
        let total = dag.job_count();
        if total < 2 {
            return Ok(());
        }

        if dag.independent_job_count() == total {
            ctx.push_optimization(
                Optimization::new(
                    "Good parallelization",
                    format!("All {total} jobs are independent and can start at the same time"),
                    Rating::Low,
                    Rating::Low,
                    Category::Performance,
                    "Keep jobs independent; add `needs` only where a job consumes another job's output",
                )
                .with_rule(PARALLELIZATION_META.id),
            );
        } else if let Some(optimization) = Self::serial_chain(&dag) {
            ctx.push_optimization(optimization);
        }
        Ok(())
    }
}

/// Jaccard similarity of two signature sets.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn signatures(job: &JobNode) -> HashSet<String> {
    job.steps.iter().map(|s| s.signature()).collect()
}

pub struct MatrixCandidates;

static MATRIX_META: RuleMeta = RuleMeta {
    id: "PLT-PERF-004",
    name: "Matrix candidates",
    description: "Near-identical jobs that could be one matrix job",
    category: Category::Performance,
    severity: DefaultSeverity::Optimization(Rating::Medium),
    level: Level::Senior,
    platforms: PlatformScope::Only(&[Platform::GithubActions, Platform::GitlabCi]),
};

impl Rule for MatrixCandidates {
    fn meta(&self) -> &'static RuleMeta {
        &MATRIX_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let dag = pipeline(document, ctx.platform())?;
        let jobs: Vec<(&JobNode, HashSet<String>)> = dag
            .jobs()
            .filter(|job| job.matrix.is_none() && job.steps.len() >= 2)
            .map(|job| (job, signatures(job)))
            .collect();

        let mut grouped = vec![false; jobs.len()];
        for i in 0..jobs.len() {
            if grouped[i] {
                continue;
            }
            let mut group = vec![i];
            for j in (i + 1)..jobs.len() {
                if !grouped[j] && jaccard(&jobs[i].1, &jobs[j].1) >= MATRIX_SIMILARITY {
                    group.push(j);
                }
            }
            if group.len() < 2 {
                continue;
            }
            group.iter().for_each(|&k| grouped[k] = true);

            let ids: Vec<&str> = group.iter().map(|&k| jobs[k].0.id.as_str()).collect();
            let lines = ids.iter().filter_map(|id| ctx.line_of_key(id)).collect();
            ctx.push_optimization(
                Optimization::new(
                    "Combine similar jobs into a matrix",
                    format!(
                        "Jobs {} run nearly the same steps and differ only in parameters",
                        ids.join(", ")
                    ),
                    Rating::Medium,
                    Rating::Medium,
                    Category::Performance,
                    "Replace the copies with a single job driven by a matrix of the varying values",
                )
                .with_rule(MATRIX_META.id)
                .with_example("strategy:\n  matrix:\n    node: [18, 20, 22]")
                .with_lines(lines),
            );
        }
        Ok(())
    }
}

pub struct MissingConcurrency;

static CONCURRENCY_META: RuleMeta = RuleMeta {
    id: "PLT-PERF-005",
    name: "Missing concurrency control",
    description: "Pull request workflows without `concurrency` keep running for superseded commits",
    category: Category::Performance,
    severity: DefaultSeverity::Optimization(Rating::Medium),
    level: Level::Senior,
    platforms: PlatformScope::Only(&[Platform::GithubActions]),
};

impl Rule for MissingConcurrency {
    fn meta(&self) -> &'static RuleMeta {
        &CONCURRENCY_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        if document.get("concurrency").is_some() {
            return Ok(());
        }
        let dag = pipeline(document, ctx.platform())?;
        let on_pull_requests = dag
            .triggers
            .iter()
            .any(|t| t.event == "pull_request" || t.event == "pull_request_target");
        if !on_pull_requests {
            return Ok(());
        }
        let jobs_cover_it = document
            .get("jobs")
            .and_then(Node::as_mapping)
            .is_some_and(|jobs| !jobs.is_empty() && jobs.iter().all(|(_, job)| job.get("concurrency").is_some()));
        if jobs_cover_it {
            return Ok(());
        }

        let line = ctx.line_of_key("on");
        ctx.push_optimization(
            Optimization::new(
                "Cancel superseded pull request runs",
                "The workflow runs on pull requests but has no `concurrency` group, so every push keeps older runs going",
                Rating::Medium,
                Rating::Low,
                Category::Performance,
                "Add a concurrency group keyed on the ref with cancel-in-progress",
            )
            .with_rule(CONCURRENCY_META.id)
            .with_example("concurrency:\n  group: ${{ github.workflow }}-${{ github.ref }}\n  cancel-in-progress: true")
            .with_lines(line.into_iter().collect()),
        );
        Ok(())
    }
}
