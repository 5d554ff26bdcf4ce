use crate::parser::dag::PipelineDag;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use std::collections::HashMap;

/// The slowest dependency chain through a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalPath {
    pub jobs: Vec<String>,
    pub duration_secs: f64,
}

impl CriticalPath {
    fn empty() -> Self {
        Self { jobs: Vec::new(), duration_secs: 0.0 }
    }
}

/// Longest path through the job graph, weighting each job by its estimated duration.
///
/// A cyclic graph has no schedule; it yields an empty path.
pub fn critical_path(dag: &PipelineDag) -> CriticalPath {
    let graph = &dag.graph;
    let Ok(order) = petgraph::algo::toposort(graph, None) else {
        return CriticalPath::empty();
    };

    // finish time of each job when every job starts as early as possible
    let mut finish: HashMap<NodeIndex, f64> = HashMap::new();
    let mut via: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    for node in order {
        let mut start = 0.0;
        for dep in graph.neighbors_directed(node, Direction::Incoming) {
            let dep_finish = finish.get(&dep).copied().unwrap_or(0.0);
            if dep_finish > start {
                start = dep_finish;
                via.insert(node, dep);
            }
        }
        finish.insert(node, start + graph[node].estimated_duration_secs);
    }

    let end = dag
        .leaf_jobs()
        .into_iter()
        .max_by(|a, b| finish[a].total_cmp(&finish[b]));
    let Some(end) = end else {
        return CriticalPath::empty();
    };

    let mut path = vec![end];
    let mut current = end;
    while let Some(&previous) = via.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();

    CriticalPath {
        jobs: path.iter().map(|&idx| graph[idx].id.clone()).collect(),
        duration_secs: finish[&end],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dag::{DagEdge, JobNode, StepInfo};

    fn job(id: &str, secs: f64) -> JobNode {
        let mut job = JobNode::new(id.to_string(), id.to_string());
        let mut step = StepInfo::run("make");
        step.estimated_duration_secs = secs;
        job.steps.push(step);
        job.recompute_duration();
        job
    }

    #[test]
    fn test_linear_chain() {
        let mut dag = PipelineDag::new("ci".into(), "github-actions".into());
        dag.add_job(job("a", 10.0));
        dag.add_job(job("b", 20.0));
        dag.add_job(job("c", 30.0));
        dag.add_dependency("a", "b", DagEdge::Dependency).unwrap();
        dag.add_dependency("b", "c", DagEdge::Dependency).unwrap();

        let path = critical_path(&dag);
        assert_eq!(path.jobs, vec!["a", "b", "c"]);
        assert!((path.duration_secs - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_picks_slowest_branch() {
        let mut dag = PipelineDag::new("ci".into(), "github-actions".into());
        dag.add_job(job("setup", 5.0));
        dag.add_job(job("fast", 10.0));
        dag.add_job(job("slow", 100.0));
        dag.add_dependency("setup", "fast", DagEdge::Dependency).unwrap();
        dag.add_dependency("setup", "slow", DagEdge::Dependency).unwrap();

        let path = critical_path(&dag);
        assert_eq!(path.jobs, vec!["setup", "slow"]);
        assert!((path.duration_secs - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_dag() {
        let dag = PipelineDag::new("ci".into(), "github-actions".into());
        assert_eq!(critical_path(&dag), CriticalPath::empty());
    }
}
