use crate::document::Node;
use crate::parser::dag::*;
use anyhow::Result;

/// Builds the job graph of a GitHub Actions workflow.
pub struct GitHubActionsParser;

impl GitHubActionsParser {
    /// Build a Pipeline DAG from a parsed workflow document.
    ///
    /// Dangling `needs` references are left out of the graph; the structural
    /// analyzer reports them.
    pub fn build(document: &Node) -> Result<PipelineDag> {
        let name = document
            .get("name")
            .and_then(Node::as_str)
            .unwrap_or("Unnamed Workflow")
            .to_string();

        let mut dag = PipelineDag::new(name, "github-actions".to_string());
        dag.triggers = Self::parse_triggers(document);

        let Some(jobs) = document.get("jobs").and_then(Node::as_mapping) else {
            return Ok(dag);
        };

        // First pass: create all job nodes
        for (job_id, job_config) in jobs.iter() {
            dag.add_job(Self::parse_job(job_id, job_config));
        }

        // Second pass: edges run from dependency to dependent
        for (job_id, job_config) in jobs.iter() {
            let Some(needs) = job_config.get("needs") else {
                continue;
            };
            for dep in needs.string_list() {
                if dag.get_job(&dep).is_none() {
                    tracing::debug!(job = job_id, needs = %dep, "skipping dangling needs reference");
                    continue;
                }
                dag.add_dependency(&dep, job_id, DagEdge::Dependency)?;
            }
        }

        Ok(dag)
    }

    fn parse_triggers(document: &Node) -> Vec<WorkflowTrigger> {
        match document.get("on") {
            Some(Node::Mapping(map)) => map
                .iter()
                .map(|(event, config)| WorkflowTrigger {
                    event: event.to_string(),
                    branches: config.get("branches").map(Node::string_list),
                    paths: config.get("paths").map(Node::string_list),
                    paths_ignore: config.get("paths-ignore").map(Node::string_list),
                })
                .collect(),
            Some(other) => other
                .string_list()
                .iter()
                .map(|event| WorkflowTrigger::bare(event))
                .collect(),
            None => Vec::new(),
        }
    }

    fn parse_job(job_id: &str, config: &Node) -> JobNode {
        let name = config
            .get("name")
            .and_then(Node::as_str)
            .unwrap_or(job_id)
            .to_string();

        let mut job = JobNode::new(job_id.to_string(), name);

        if let Some(runs_on) = config.get("runs-on") {
            job.runs_on = runs_on.string_list().join(",");
        }
        if let Some(needs) = config.get("needs") {
            job.needs = needs.string_list();
        }
        job.matrix = config
            .get_path("strategy.matrix")
            .and_then(parse_matrix);

        if let Some(steps) = config.get("steps").and_then(Node::as_sequence) {
            job.steps = steps.iter().map(Self::parse_step).collect();
        }

        job.caches = Self::detect_caches(config);
        job.recompute_duration();
        job
    }

    fn parse_step(step: &Node) -> StepInfo {
        let uses = step.get("uses").and_then(Node::as_str);
        let run = step.get("run").and_then(Node::as_str);
        StepInfo {
            name: step.get("name").and_then(Node::as_str).map(String::from),
            uses: uses.map(String::from),
            run: run.map(String::from),
            estimated_duration_secs: estimate_step_duration(uses, run),
        }
    }

    /// Cache declarations come from `actions/cache` steps and from the
    /// built-in `cache:` input of the setup actions.
    fn detect_caches(config: &Node) -> Vec<CacheConfig> {
        let Some(steps) = config.get("steps").and_then(Node::as_sequence) else {
            return Vec::new();
        };

        let mut caches = Vec::new();
        for step in steps {
            let uses = step.get("uses").and_then(Node::as_str).unwrap_or_default();
            if uses.starts_with("actions/cache") {
                let key = step.get_path("with.key").and_then(Node::scalar_string);
                let paths = step
                    .get_path("with.path")
                    .and_then(Node::as_str)
                    .map(|p| p.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
                    .unwrap_or_default();
                let dynamic_key = key.as_deref().map(is_dynamic_key).unwrap_or(false);
                caches.push(CacheConfig { key, paths, dynamic_key });
            } else if uses.starts_with("actions/setup-") {
                if let Some(manager) = step.get_path("with.cache").and_then(Node::as_str) {
                    // setup actions key their cache on the lock file
                    caches.push(CacheConfig {
                        key: Some(format!("{manager}-lockfile")),
                        paths: Vec::new(),
                        dynamic_key: true,
                    });
                }
            }
        }
        caches
    }
}

/// A cache key is dynamic when it embeds a file hash or a pipeline variable.
pub fn is_dynamic_key(key: &str) -> bool {
    key.contains("hashFiles") || key.contains("${{") || key.contains('$')
}

/// Matrix axes of a `matrix:` mapping, ignoring `include`/`exclude`.
pub fn parse_matrix(matrix: &Node) -> Option<MatrixStrategy> {
    let mapping = matrix.as_mapping()?;

    let mut variables = Vec::new();
    let mut total = 1usize;
    for (key, value) in mapping.iter() {
        if key == "include" || key == "exclude" {
            continue;
        }
        if let Some(values) = value.as_sequence() {
            total = total.saturating_mul(values.len());
            variables.push((key.to_string(), values.len()));
        }
    }

    if variables.is_empty() {
        return None;
    }

    Some(MatrixStrategy {
        variables,
        total_combinations: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_build_simple_workflow() {
        let doc = parse(
            r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Build
        run: npm run build
  test:
    needs: build
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Test
        run: npm test
"#,
        )
        .unwrap();
        let dag = GitHubActionsParser::build(&doc).unwrap();
        assert_eq!(dag.job_count(), 2);
        assert_eq!(dag.name, "CI");
        assert_eq!(dag.get_job("test").unwrap().needs, vec!["build"]);
        assert_eq!(dag.triggers.len(), 1);
        assert_eq!(dag.root_jobs().len(), 1);
    }

    #[test]
    fn test_build_parallel_jobs() {
        let doc = parse(
            r#"
on: [push, pull_request]
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: npm run lint
  test:
    runs-on: ubuntu-latest
    steps:
      - run: npm test
  build:
    runs-on: ubuntu-latest
    steps:
      - run: npm run build
"#,
        )
        .unwrap();
        let dag = GitHubActionsParser::build(&doc).unwrap();
        assert_eq!(dag.root_jobs().len(), 3);
        assert_eq!(dag.max_parallelism(), 3);
        assert_eq!(dag.triggers.len(), 2);
    }

    #[test]
    fn test_matrix_combinations() {
        let doc = parse(
            r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        node: [18, 20, 22]
        os: [ubuntu-latest, macos-latest]
        include:
          - node: 23
    steps:
      - run: npm test
"#,
        )
        .unwrap();
        let dag = GitHubActionsParser::build(&doc).unwrap();
        let matrix = dag.get_job("test").unwrap().matrix.as_ref().unwrap();
        assert_eq!(matrix.total_combinations, 6);
    }

    #[test]
    fn test_matrix_combinations_saturate() {
        let axes: String = (0..20)
            .map(|i| format!("        axis{i}: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]\n"))
            .collect();
        let raw = format!(
            "on: push\njobs:\n  test:\n    runs-on: ubuntu-latest\n    strategy:\n      matrix:\n{axes}    steps:\n      - run: make\n"
        );
        let doc = parse(&raw).unwrap();
        let dag = GitHubActionsParser::build(&doc).unwrap();
        let matrix = dag.get_job("test").unwrap().matrix.as_ref().unwrap();
        assert_eq!(matrix.variables.len(), 20);
        assert_eq!(matrix.total_combinations, usize::MAX);
    }

    #[test]
    fn test_dangling_needs_is_skipped() {
        let doc = parse("on: push\njobs:\n  deploy:\n    needs: missing\n    runs-on: ubuntu-latest\n").unwrap();
        let dag = GitHubActionsParser::build(&doc).unwrap();
        assert_eq!(dag.job_count(), 1);
        assert_eq!(dag.graph.edge_count(), 0);
    }

    #[test]
    fn test_detects_cache_keys() {
        let doc = parse(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/cache@v4
        with:
          path: ~/.npm
          key: npm-${{ hashFiles('package-lock.json') }}
      - uses: actions/setup-python@v5
        with:
          cache: pip
"#,
        )
        .unwrap();
        let dag = GitHubActionsParser::build(&doc).unwrap();
        let job = dag.get_job("build").unwrap();
        assert_eq!(job.caches.len(), 2);
        assert!(job.caches.iter().all(|c| c.dynamic_key));
        assert_eq!(job.caches[0].paths, vec!["~/.npm"]);
    }
}
