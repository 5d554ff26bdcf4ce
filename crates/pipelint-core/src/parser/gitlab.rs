use crate::document::Node;
use crate::parser::dag::*;
use crate::parser::github::{is_dynamic_key, parse_matrix};
use anyhow::Result;
use std::collections::HashMap;

/// Builds the job graph of a `.gitlab-ci.yml` file.
pub struct GitLabCIParser;

/// Reserved top-level keywords in GitLab CI that are NOT job definitions.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "image", "services", "stages", "before_script", "after_script",
    "variables", "cache", "default", "include", "workflow",
];

/// Stages GitLab assumes when a file declares no `stages:` list.
pub const DEFAULT_STAGES: &[&str] = &[".pre", "build", "test", "deploy", ".post"];

/// `true` for top-level entries GitLab would run as jobs.
pub fn is_job_entry(key: &str, value: &Node) -> bool {
    !RESERVED_KEYWORDS.contains(&key) && !key.starts_with('.') && value.is_mapping()
}

/// Every script line of a job, in execution order.
pub fn script_lines(config: &Node) -> Vec<String> {
    ["before_script", "script", "after_script"]
        .iter()
        .filter_map(|key| config.get(key))
        .flat_map(Node::string_list)
        .collect()
}

impl GitLabCIParser {
    /// Build a Pipeline DAG from a parsed GitLab CI document.
    pub fn build(document: &Node) -> Result<PipelineDag> {
        let mut dag = PipelineDag::new("GitLab CI".to_string(), "gitlab-ci".to_string());
        let Some(mapping) = document.as_mapping() else {
            return Ok(dag);
        };

        let stages = Self::parse_stages(document);
        let global_cache = document
            .get("cache")
            .or_else(|| document.get_path("default.cache"));

        let mut jobs_by_stage: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in mapping.iter().filter(|(k, v)| is_job_entry(k, v)) {
            let job = Self::parse_job(key, value, global_cache);
            let stage = job.stage.clone().unwrap_or_else(|| "test".to_string());
            jobs_by_stage.entry(stage).or_default().push(job.id.clone());
            dag.add_job(job);
        }

        // Jobs in a stage wait on every job of the previous stage unless
        // they declare `needs:`.
        for (key, value) in mapping.iter().filter(|(k, v)| is_job_entry(k, v)) {
            if let Some(needs) = value.get("needs") {
                for dep in Self::parse_needs(needs) {
                    if dag.get_job(&dep).is_some() {
                        dag.add_dependency(&dep, key, DagEdge::Dependency)?;
                    }
                }
                continue;
            }

            let job_stage = value.get("stage").and_then(Node::as_str).unwrap_or("test");
            let Some(stage_idx) = stages.iter().position(|s| s == job_stage) else {
                continue;
            };
            let previous = stages[..stage_idx]
                .iter()
                .rev()
                .find_map(|stage| jobs_by_stage.get(stage));
            if let Some(prev_jobs) = previous {
                for prev_job in prev_jobs.clone() {
                    dag.add_dependency(&prev_job, key, DagEdge::Ordering)?;
                }
            }
        }

        dag.triggers = Self::parse_triggers(document);
        Ok(dag)
    }

    fn parse_stages(document: &Node) -> Vec<String> {
        document
            .get("stages")
            .map(Node::string_list)
            .filter(|stages| !stages.is_empty())
            .unwrap_or_else(|| DEFAULT_STAGES.iter().map(|s| s.to_string()).collect())
    }

    fn parse_job(job_id: &str, config: &Node, global_cache: Option<&Node>) -> JobNode {
        let mut job = JobNode::new(job_id.to_string(), job_id.to_string());

        job.stage = Some(
            config
                .get("stage")
                .and_then(Node::as_str)
                .unwrap_or("test")
                .to_string(),
        );

        job.runs_on = match config.get("tags") {
            Some(tags) => tags.string_list().join(","),
            None => config
                .get("image")
                .and_then(parse_image)
                .unwrap_or_else(|| "docker".to_string()),
        };

        if let Some(needs) = config.get("needs") {
            job.needs = Self::parse_needs(needs);
        }

        job.steps = script_lines(config).iter().map(|cmd| StepInfo::run(cmd)).collect();

        if let Some(cache) = config.get("cache").or(global_cache) {
            job.caches = parse_caches(cache);
        }

        job.matrix = match config.get("parallel") {
            Some(Node::Number(n)) if *n >= 1.0 => Some(MatrixStrategy {
                variables: vec![("CI_NODE_INDEX".to_string(), *n as usize)],
                total_combinations: *n as usize,
            }),
            Some(parallel) => parallel.get("matrix").and_then(Self::parse_parallel_matrix),
            None => None,
        };

        job.recompute_duration();
        job
    }

    /// `parallel: matrix:` is a list of axis maps; each entry expands on its own.
    fn parse_parallel_matrix(matrix: &Node) -> Option<MatrixStrategy> {
        let entries = matrix.as_sequence()?;
        let mut variables = Vec::new();
        let mut total = 0usize;
        for entry in entries {
            if let Some(strategy) = parse_matrix(entry) {
                total = total.saturating_add(strategy.total_combinations);
                variables.extend(strategy.variables);
            }
        }
        (total > 0).then_some(MatrixStrategy {
            variables,
            total_combinations: total,
        })
    }

    fn parse_needs(needs: &Node) -> Vec<String> {
        match needs {
            Node::Sequence(seq) => seq
                .iter()
                .filter_map(|v| match v {
                    Node::String(s) => Some(s.clone()),
                    Node::Mapping(_) => v.get("job").and_then(Node::as_str).map(String::from),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn parse_triggers(document: &Node) -> Vec<WorkflowTrigger> {
        let rules = document
            .get_path("workflow.rules")
            .and_then(Node::as_sequence)
            .unwrap_or_default();
        if rules.is_empty() {
            return vec![WorkflowTrigger::bare("push")];
        }
        rules
            .iter()
            .filter_map(|rule| rule.get("if").and_then(Node::as_str))
            .map(|condition| WorkflowTrigger {
                event: "rules".to_string(),
                branches: Some(vec![condition.to_string()]),
                paths: None,
                paths_ignore: None,
            })
            .collect()
    }
}

/// Image name from either `image: node:20` or `image: { name: node:20 }`.
pub fn parse_image(value: &Node) -> Option<String> {
    match value {
        Node::String(s) => Some(s.clone()),
        Node::Mapping(_) => value.get("name").and_then(Node::as_str).map(String::from),
        _ => None,
    }
}

/// GitLab and Bitbucket both accept a single cache map or a list of them.
fn parse_caches(cache: &Node) -> Vec<CacheConfig> {
    let entries: Vec<&Node> = match cache {
        Node::Sequence(seq) => seq.iter().collect(),
        Node::Mapping(_) => vec![cache],
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .map(|entry| {
            let key = match entry.get("key") {
                Some(Node::Mapping(_)) => Some("files".to_string()),
                Some(other) => other.scalar_string(),
                None => None,
            };
            let dynamic_key = match entry.get("key") {
                Some(Node::Mapping(_)) => true,
                _ => key.as_deref().map(is_dynamic_key).unwrap_or(false),
            };
            CacheConfig {
                key,
                paths: entry.get("paths").map(Node::string_list).unwrap_or_default(),
                dynamic_key,
            }
        })
        .collect()
}
