use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single step (GitHub step, GitLab/Bitbucket script line) within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    pub name: Option<String>,
    pub uses: Option<String>,
    pub run: Option<String>,
    pub estimated_duration_secs: f64,
}

impl StepInfo {
    pub fn run(command: &str) -> Self {
        Self {
            name: None,
            uses: None,
            run: Some(command.to_string()),
            estimated_duration_secs: estimate_step_duration(None, Some(command)),
        }
    }

    pub fn uses(action: &str) -> Self {
        Self {
            name: None,
            uses: Some(action.to_string()),
            run: None,
            estimated_duration_secs: estimate_step_duration(Some(action), None),
        }
    }

    /// Version-independent identity of a step, used to compare jobs.
    ///
    /// `actions/setup-node@v4` becomes `uses:actions/setup-node`, a run step
    /// becomes its first two words, lowercased.
    pub fn signature(&self) -> String {
        if let Some(uses) = &self.uses {
            let action = uses.split('@').next().unwrap_or(uses);
            return format!("uses:{}", action.to_lowercase());
        }
        if let Some(run) = &self.run {
            let head: Vec<&str> = run.split_whitespace().take(2).collect();
            return format!("run:{}", head.join(" ").to_lowercase());
        }
        "empty".to_string()
    }
}

/// A cache declaration attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub key: Option<String>,
    pub paths: Vec<String>,
    /// Key changes with file contents or pipeline variables.
    pub dynamic_key: bool,
}

/// Matrix strategy for a job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatrixStrategy {
    pub variables: Vec<(String, usize)>,
    pub total_combinations: usize,
}

/// A node in the pipeline DAG representing a single job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNode {
    pub id: String,
    pub name: String,
    pub steps: Vec<StepInfo>,
    pub needs: Vec<String>,
    pub runs_on: String,
    pub estimated_duration_secs: f64,
    pub caches: Vec<CacheConfig>,
    pub matrix: Option<MatrixStrategy>,
    pub stage: Option<String>,
}

impl JobNode {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            steps: Vec::new(),
            needs: Vec::new(),
            runs_on: String::new(),
            estimated_duration_secs: 0.0,
            caches: Vec::new(),
            matrix: None,
            stage: None,
        }
    }

    pub fn has_cache(&self) -> bool {
        !self.caches.is_empty()
    }

    pub fn recompute_duration(&mut self) {
        self.estimated_duration_secs = self.steps.iter().map(|s| s.estimated_duration_secs).sum();
    }
}

/// Edge types in the pipeline DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DagEdge {
    /// Explicit `needs` relationship.
    Dependency,
    /// Implied by stage or step ordering.
    Ordering,
}

/// Trigger event for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub event: String,
    pub branches: Option<Vec<String>>,
    pub paths: Option<Vec<String>>,
    pub paths_ignore: Option<Vec<String>>,
}

impl WorkflowTrigger {
    pub fn bare(event: &str) -> Self {
        Self {
            event: event.to_string(),
            branches: None,
            paths: None,
            paths_ignore: None,
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.branches.is_some() || self.paths.is_some() || self.paths_ignore.is_some()
    }
}

/// The job graph of one pipeline, independent of the platform dialect.
#[derive(Debug, Clone)]
pub struct PipelineDag {
    pub name: String,
    pub provider: String,
    pub triggers: Vec<WorkflowTrigger>,
    pub graph: DiGraph<JobNode, DagEdge>,
    pub node_map: HashMap<String, NodeIndex>,
}

impl PipelineDag {
    pub fn new(name: String, provider: String) -> Self {
        Self {
            name,
            provider,
            triggers: Vec::new(),
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Add a job node to the DAG, returning its index.
    pub fn add_job(&mut self, job: JobNode) -> NodeIndex {
        let id = job.id.clone();
        let idx = self.graph.add_node(job);
        self.node_map.insert(id, idx);
        idx
    }

    /// Add a dependency edge between two jobs.
    pub fn add_dependency(&mut self, from_id: &str, to_id: &str, edge: DagEdge) -> anyhow::Result<()> {
        let from_idx = self
            .node_map
            .get(from_id)
            .ok_or_else(|| anyhow::anyhow!("Job '{}' not found in DAG", from_id))?;
        let to_idx = self
            .node_map
            .get(to_id)
            .ok_or_else(|| anyhow::anyhow!("Job '{}' not found in DAG", to_id))?;
        self.graph.add_edge(*from_idx, *to_idx, edge);
        Ok(())
    }

    /// Jobs in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &JobNode> {
        self.graph.node_weights()
    }

    /// Get all root jobs (jobs with no dependencies).
    pub fn root_jobs(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Get all leaf jobs (jobs that nothing depends on).
    pub fn leaf_jobs(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn step_count(&self) -> usize {
        self.graph.node_weights().map(|j| j.steps.len()).sum()
    }

    pub fn get_job(&self, id: &str) -> Option<&JobNode> {
        self.node_map.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.graph.node_weights().map(|j| j.id.clone()).collect()
    }

    /// Jobs that can start immediately, i.e. that wait on nothing.
    pub fn independent_job_count(&self) -> usize {
        self.root_jobs().len()
    }

    /// Depth of each job (roots are 0), or `None` if the graph has a cycle.
    pub fn levels(&self) -> Option<HashMap<NodeIndex, usize>> {
        let topo = petgraph::algo::toposort(&self.graph, None).ok()?;
        let mut levels = HashMap::new();
        for node in topo {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dep| levels.get(&dep).map(|l| l + 1))
                .max()
                .unwrap_or(0);
            levels.insert(node, level);
        }
        Some(levels)
    }

    /// Number of jobs on the longest dependency chain.
    pub fn longest_chain(&self) -> usize {
        self.levels()
            .and_then(|levels| levels.values().max().map(|l| l + 1))
            .unwrap_or(0)
    }

    /// Compute the maximum parallelism (max number of jobs that can run concurrently).
    pub fn max_parallelism(&self) -> usize {
        let Some(levels) = self.levels() else {
            return 0;
        };
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for level in levels.values() {
            *counts.entry(*level).or_insert(0) += 1;
        }
        counts.into_values().max().unwrap_or(0)
    }
}

/// Estimate step duration in seconds based on heuristics.
pub fn estimate_step_duration(uses: Option<&str>, run: Option<&str>) -> f64 {
    if let Some(uses) = uses {
        if uses.starts_with("actions/checkout") {
            return 12.0;
        }
        if uses.starts_with("actions/setup-") {
            return 15.0;
        }
        if uses.starts_with("actions/cache") {
            return 10.0;
        }
        if uses.starts_with("docker/build-push-action") {
            return 300.0;
        }
        if uses.starts_with("actions/upload-artifact") || uses.starts_with("actions/download-artifact") {
            return 15.0;
        }
        return 20.0;
    }

    if let Some(run) = run {
        let cmd = run.to_lowercase();
        if cmd.contains("npm install") || cmd.contains("npm ci") || cmd.contains("yarn install") || cmd.contains("pnpm install") {
            return 180.0;
        }
        if cmd.contains("pip install") {
            return 120.0;
        }
        if cmd.contains("cargo build") {
            return 300.0;
        }
        if cmd.contains("npm run build") || cmd.contains("yarn build") || cmd.contains("pnpm build") {
            return 240.0;
        }
        if cmd.contains("npm test") || cmd.contains("pytest") || cmd.contains("cargo test") || cmd.contains("jest") {
            return 300.0;
        }
        if cmd.contains("npm run lint") || cmd.contains("eslint") || cmd.contains("clippy") {
            return 60.0;
        }
        if cmd.contains("docker build") {
            return 300.0;
        }
        if cmd.contains("docker push") {
            return 60.0;
        }
        if cmd.contains("deploy") || cmd.contains("kubectl") || cmd.contains("terraform") {
            return 120.0;
        }
        return 30.0;
    }

    10.0
}
