use super::critical_path::critical_path;
use crate::parser::dag::PipelineDag;
use crate::rules::cost::{classify_runner, RunnerClass};
use crate::rules::maintainability::cyclomatic_complexity;
use serde::{Deserialize, Serialize};

const ERROR_HANDLING_KEYWORDS: &[&str] = &[
    "timeout", "retry", "continue-on-error", "allow_failure", "failure()", "always()", "on_failure",
    "after_script", "after-script",
];

const TEST_KEYWORDS: &[&str] = &["test", "spec", "pytest", "jest", "coverage", "lint", "check"];

/// Counts and derived ratios describing a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub job_count: usize,
    pub step_count: usize,
    pub trigger_count: usize,
    /// Jobs that wait on nothing.
    pub parallelizable_jobs: usize,
    pub cache_usage_percent: f64,
    pub security_score: u8,
    pub performance: PerformanceMetrics,
    pub complexity: ComplexityMetrics,
    pub coverage: CoverageMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Duration of the critical path, in seconds.
    pub build_time_estimate_secs: f64,
    pub critical_path: Vec<String>,
    /// `100 × independent jobs / jobs`.
    pub parallelization_score: f64,
    /// Share of cache declarations keyed on file hashes or variables.
    pub cache_efficiency: f64,
    /// Share of jobs on standard-priced runners.
    pub resource_utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    pub cyclomatic: usize,
    pub cognitive: f64,
    pub maintainability_index: f64,
    pub lines_of_code: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetrics {
    pub documentation: f64,
    pub error_handling: f64,
    pub testing: f64,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (100.0 * part as f64 / whole as f64).min(100.0)
}

impl ComplexityMetrics {
    pub fn measure(raw_text: &str) -> Self {
        let cyclomatic = cyclomatic_complexity(raw_text);
        let lines_of_code = raw_text.lines().filter(|l| !l.trim().is_empty()).count().max(1);
        let maintainability_index =
            (171.0 - 5.2 * (lines_of_code as f64).ln() - 0.23 * cyclomatic as f64).max(0.0);
        Self {
            cyclomatic,
            cognitive: (cyclomatic as f64 * 1.2).min(50.0),
            maintainability_index,
            lines_of_code,
        }
    }
}

impl CoverageMetrics {
    pub fn measure(raw_text: &str, dag: &PipelineDag) -> Self {
        let lines: Vec<&str> = raw_text.lines().filter(|l| !l.trim().is_empty()).collect();
        let documented = lines
            .iter()
            .filter(|l| {
                let t = l.trim_start().trim_start_matches("- ");
                t.starts_with('#') || t.starts_with("name:") || t.starts_with("description:")
            })
            .count();
        let lowered = raw_text.to_lowercase();
        let error_handling = ERROR_HANDLING_KEYWORDS
            .iter()
            .map(|kw| lowered.matches(kw).count())
            .sum::<usize>();
        let tested = dag
            .jobs()
            .filter(|job| {
                let id = job.id.to_lowercase();
                TEST_KEYWORDS.iter().any(|kw| id.contains(kw))
                    || job.steps.iter().any(|s| {
                        let text = s.run.as_deref().or(s.uses.as_deref()).unwrap_or_default().to_lowercase();
                        TEST_KEYWORDS.iter().any(|kw| text.contains(kw))
                    })
            })
            .count();

        Self {
            documentation: percent(documented, lines.len()),
            error_handling: percent(error_handling, dag.job_count()),
            testing: percent(tested, dag.job_count()),
        }
    }
}

impl Metrics {
    pub fn compute(dag: &PipelineDag, raw_text: &str, security_score: u8) -> Self {
        let jobs = dag.job_count();
        let with_cache = dag.jobs().filter(|j| j.has_cache()).count();
        let caches: Vec<_> = dag.jobs().flat_map(|j| j.caches.iter()).collect();
        let dynamic = caches.iter().filter(|c| c.dynamic_key).count();
        let standard = dag
            .jobs()
            .filter(|j| classify_runner(&j.runs_on) == RunnerClass::Standard)
            .count();
        let path = critical_path(dag);

        Self {
            job_count: jobs,
            step_count: dag.step_count(),
            trigger_count: dag.triggers.len(),
            parallelizable_jobs: dag.independent_job_count(),
            cache_usage_percent: percent(with_cache, jobs),
            security_score,
            performance: PerformanceMetrics {
                build_time_estimate_secs: path.duration_secs,
                critical_path: path.jobs,
                parallelization_score: percent(dag.independent_job_count(), jobs),
                cache_efficiency: percent(dynamic, caches.len()),
                resource_utilization: percent(standard, jobs),
            },
            complexity: ComplexityMetrics::measure(raw_text),
            coverage: CoverageMetrics::measure(raw_text, dag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{build_dag, parse};
    use crate::platforms::Platform;

    fn metrics(raw: &str, platform: Platform) -> Metrics {
        let doc = parse(raw).unwrap();
        let dag = build_dag(&doc, platform).unwrap();
        Metrics::compute(&dag, raw, 100)
    }

    #[test]
    fn test_independent_jobs_score_full_parallelization() {
        let mut raw = String::from("on: push\njobs:\n");
        for i in 0..5 {
            raw.push_str(&format!("  job{i}:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo {i}\n"));
        }
        let m = metrics(&raw, Platform::GithubActions);
        assert_eq!(m.job_count, 5);
        assert_eq!(m.parallelizable_jobs, 5);
        assert_eq!(m.performance.parallelization_score, 100.0);
        assert_eq!(m.performance.resource_utilization, 100.0);
        assert_eq!(m.trigger_count, 1);
    }

    #[test]
    fn test_chain_and_caches() {
        let raw = r#"
on: push
jobs:
  build:
    runs-on: macos-latest
    steps:
      - uses: actions/cache@v4
        with:
          path: ~/.npm
          key: npm-${{ hashFiles('package-lock.json') }}
      - run: npm ci
  test:
    needs: build
    runs-on: ubuntu-latest
    steps:
      - run: npm test
"#;
        let m = metrics(raw, Platform::GithubActions);
        assert_eq!(m.performance.parallelization_score, 50.0);
        assert_eq!(m.cache_usage_percent, 50.0);
        assert_eq!(m.performance.cache_efficiency, 100.0);
        assert_eq!(m.performance.resource_utilization, 50.0);
        assert_eq!(m.performance.critical_path, vec!["build", "test"]);
        assert!(m.performance.build_time_estimate_secs > 0.0);
        assert_eq!(m.coverage.testing, 50.0);
    }

    #[test]
    fn test_complexity_formulas() {
        let c = ComplexityMetrics::measure("a: 1\n\nb: 2\n");
        assert_eq!(c.cyclomatic, 1);
        assert_eq!(c.lines_of_code, 2);
        assert!((c.cognitive - 1.2).abs() < 1e-9);
        let expected = 171.0 - 5.2 * 2f64.ln() - 0.23;
        assert!((c.maintainability_index - expected).abs() < 1e-9);

        let empty = ComplexityMetrics::measure("");
        assert_eq!(empty.lines_of_code, 1);
        assert!((empty.maintainability_index - (171.0 - 0.23)).abs() < 1e-9);
    }

    #[test]
    fn test_cognitive_is_capped() {
        let raw = "if: x\n".repeat(100);
        assert_eq!(ComplexityMetrics::measure(&raw).cognitive, 50.0);
    }

    #[test]
    fn test_empty_dag_metrics_are_zero() {
        let dag = PipelineDag::new("empty".into(), "unknown".into());
        let m = Metrics::compute(&dag, "", 100);
        assert_eq!(m.performance.parallelization_score, 0.0);
        assert_eq!(m.cache_usage_percent, 0.0);
        assert_eq!(m.coverage.testing, 0.0);
    }
}
