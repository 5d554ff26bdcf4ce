use crate::document::Node;
use crate::parser::dag::{CacheConfig, DagEdge, JobNode, PipelineDag, StepInfo, WorkflowTrigger};
use crate::parser::gitlab::parse_image;
use anyhow::Result;

/// Builds the job graph of a `bitbucket-pipelines.yml` file.
///
/// Every step becomes a job. Steps run in sequence, steps inside a
/// `parallel:` block run together and all wait on the previous group.
pub struct BitbucketParser;

/// Pipeline sections under `pipelines:`.
pub const PIPELINE_SECTIONS: &[&str] = &["default", "branches", "pull-requests", "tags", "custom"];

/// Caches Bitbucket defines out of the box; their keys follow the lock files.
const PREDEFINED_CACHES: &[(&str, &str)] = &[
    ("node", "node_modules"),
    ("pip", "~/.cache/pip"),
    ("maven", "~/.m2/repository"),
    ("gradle", "~/.gradle/caches"),
    ("composer", "~/.composer/cache"),
    ("dotnetcore", "~/.nuget/packages"),
    ("sbt", "~/.sbt"),
    ("ivy2", "~/.ivy2/cache"),
    ("docker", "/var/lib/docker"),
];

/// A step together with the pipeline it belongs to (`default`, `branches.main`, ...).
pub struct StepEntry<'a> {
    pub pipeline: String,
    pub step: &'a Node,
    /// Index of the group this step runs in within its pipeline.
    pub group: usize,
}

/// Each pipeline under `pipelines:` as `(label, list of steps/parallel blocks)`.
pub fn pipelines(document: &Node) -> Vec<(String, &Node)> {
    let Some(sections) = document.get("pipelines").and_then(Node::as_mapping) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for (section, value) in sections.iter() {
        if section == "default" {
            found.push((section.to_string(), value));
        } else if let Some(named) = value.as_mapping() {
            for (name, pipeline) in named.iter() {
                found.push((format!("{section}.{name}"), pipeline));
            }
        }
    }
    found
}

/// Flatten every pipeline into its steps, keeping group order.
pub fn step_entries(document: &Node) -> Vec<StepEntry<'_>> {
    let mut entries = Vec::new();
    for (label, pipeline) in pipelines(document) {
        let Some(items) = pipeline.as_sequence() else {
            continue;
        };
        for (group, item) in items.iter().enumerate() {
            if let Some(step) = item.get("step") {
                entries.push(StepEntry { pipeline: label.clone(), step, group });
            } else if let Some(parallel) = item.get("parallel") {
                // `parallel:` is a list, or a map with a `steps:` list
                let steps = parallel
                    .as_sequence()
                    .or_else(|| parallel.get("steps").and_then(Node::as_sequence))
                    .unwrap_or_default();
                for nested in steps {
                    if let Some(step) = nested.get("step") {
                        entries.push(StepEntry { pipeline: label.clone(), step, group });
                    }
                }
            }
        }
    }
    entries
}

impl BitbucketParser {
    /// Build a Pipeline DAG from a parsed Bitbucket Pipelines document.
    pub fn build(document: &Node) -> Result<PipelineDag> {
        let mut dag = PipelineDag::new(
            "Bitbucket Pipeline".to_string(),
            "bitbucket-pipelines".to_string(),
        );

        let default_image = document
            .get("image")
            .and_then(parse_image)
            .unwrap_or_else(|| "atlassian/default-image".to_string());

        let mut previous: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut position: Option<(String, usize)> = None;

        for (counter, entry) in step_entries(document).into_iter().enumerate() {
            let here = (entry.pipeline.clone(), entry.group);
            if position.as_ref() != Some(&here) {
                if position.as_ref().map(|(p, _)| p) == Some(&entry.pipeline) {
                    previous = std::mem::take(&mut current);
                } else {
                    previous.clear();
                    current.clear();
                }
                position = Some(here);
            }

            let mut job = Self::parse_step(entry.step, &entry.pipeline, counter + 1, &default_image, document);
            while dag.get_job(&job.id).is_some() {
                job.id = format!("{}-{}", job.id, counter + 1);
            }
            job.needs = previous.clone();
            let job_id = job.id.clone();
            dag.add_job(job);
            for prev in &previous {
                dag.add_dependency(prev, &job_id, DagEdge::Ordering)?;
            }
            current.push(job_id);
        }

        dag.triggers = pipelines(document)
            .into_iter()
            .map(|(label, _)| {
                let (section, pattern) = label.split_once('.').unwrap_or((label.as_str(), ""));
                WorkflowTrigger {
                    event: section.to_string(),
                    branches: (!pattern.is_empty()).then(|| vec![pattern.to_string()]),
                    paths: None,
                    paths_ignore: None,
                }
            })
            .collect();

        Ok(dag)
    }

    fn parse_step(step: &Node, pipeline: &str, counter: usize, default_image: &str, document: &Node) -> JobNode {
        let name = step
            .get("name")
            .and_then(Node::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("Step {counter}"));
        let slug: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let id = format!("{}-{}", pipeline.replace('.', "-"), slug);

        let mut job = JobNode::new(id, name);
        job.runs_on = match step.get("size").and_then(Node::as_str) {
            Some(size) => format!("bitbucket:{size}"),
            None => format!(
                "bitbucket:{}",
                step.get("image").and_then(parse_image).unwrap_or_else(|| default_image.to_string())
            ),
        };
        job.steps = step
            .get("script")
            .map(Node::string_list)
            .unwrap_or_default()
            .iter()
            .map(|cmd| StepInfo::run(cmd))
            .collect();
        job.caches = Self::extract_caches(step, document);
        job.recompute_duration();
        job
    }

    fn extract_caches(step: &Node, document: &Node) -> Vec<CacheConfig> {
        let names = step.get("caches").map(Node::string_list).unwrap_or_default();
        names
            .into_iter()
            .map(|name| {
                if let Some((_, path)) = PREDEFINED_CACHES.iter().find(|(n, _)| *n == name) {
                    return CacheConfig {
                        key: Some(name.clone()),
                        paths: vec![path.to_string()],
                        dynamic_key: true,
                    };
                }
                let definition = document
                    .get_path("definitions.caches")
                    .and_then(|caches| caches.get(&name));
                match definition {
                    Some(Node::Mapping(_)) => CacheConfig {
                        dynamic_key: definition.and_then(|d| d.get_path("key.files")).is_some(),
                        paths: definition
                            .and_then(|d| d.get("path"))
                            .map(Node::string_list)
                            .unwrap_or_default(),
                        key: Some(name),
                    },
                    Some(path) => CacheConfig {
                        paths: path.string_list(),
                        key: Some(name),
                        dynamic_key: false,
                    },
                    None => CacheConfig {
                        key: Some(name),
                        paths: Vec::new(),
                        dynamic_key: false,
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_sequential_and_parallel_steps() {
        let doc = parse(
            r#"
image: node:20
pipelines:
  default:
    - step:
        name: Install
        caches: [node]
        script:
          - npm ci
    - parallel:
        - step:
            name: Test
            script: [npm test]
        - step:
            name: Lint
            script: [npm run lint]
    - step:
        name: Deploy
        script: [./deploy.sh]
"#,
        )
        .unwrap();
        let dag = BitbucketParser::build(&doc).unwrap();
        assert_eq!(dag.job_count(), 4);
        assert_eq!(dag.root_jobs().len(), 1);
        assert_eq!(dag.max_parallelism(), 2);
        assert_eq!(dag.get_job("default-deploy").unwrap().needs.len(), 2);
        assert!(dag.get_job("default-install").unwrap().has_cache());
    }

    #[test]
    fn test_pipelines_do_not_chain_into_each_other() {
        let doc = parse(
            r#"
pipelines:
  default:
    - step:
        script: [make]
  branches:
    main:
      - step:
          script: [make release]
"#,
        )
        .unwrap();
        let dag = BitbucketParser::build(&doc).unwrap();
        assert_eq!(dag.job_count(), 2);
        assert_eq!(dag.root_jobs().len(), 2);
        assert_eq!(dag.triggers.len(), 2);
    }

    #[test]
    fn test_custom_cache_definition_without_key_is_static() {
        let doc = parse(
            r#"
definitions:
  caches:
    deps: vendor/
pipelines:
  default:
    - step:
        caches: [deps]
        script: [composer install]
"#,
        )
        .unwrap();
        let dag = BitbucketParser::build(&doc).unwrap();
        let job = dag.jobs().next().unwrap();
        assert!(!job.caches[0].dynamic_key);
        assert_eq!(job.caches[0].paths, vec!["vendor/"]);
    }
}
