use crate::document::Node;
use crate::platforms::Platform;

/// Graph reported when no job graph can be drawn.
pub const PLACEHOLDER_GRAPH: &str = "graph TD\n    pipeline[Pipeline] --> complete[Complete]";

/// Mermaid flowchart of GitHub Actions job dependencies.
///
/// Each `needs` entry becomes a `dependency --> job` edge and jobs without
/// `needs` are listed as standalone nodes. Other platforms, and workflows
/// with fewer than two jobs, get [`PLACEHOLDER_GRAPH`].
pub fn dependency_graph(document: &Node, platform: Platform) -> String {
    let jobs = match document.get("jobs").and_then(Node::as_mapping) {
        Some(jobs) if platform == Platform::GithubActions && jobs.len() > 1 => jobs,
        _ => return PLACEHOLDER_GRAPH.to_string(),
    };

    let mut lines = vec!["graph TD".to_string()];
    for (job_id, job) in jobs.iter() {
        let needs = job.get("needs").map(Node::string_list).unwrap_or_default();
        if needs.is_empty() {
            lines.push(format!("    {job_id}"));
        }
        for dependency in needs {
            lines.push(format!("    {dependency} --> {job_id}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_mermaid_edges_and_standalone_nodes() {
        let doc = parse(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
  lint:
    runs-on: ubuntu-latest
  test:
    needs: build
    runs-on: ubuntu-latest
  deploy:
    needs: [build, test]
    runs-on: ubuntu-latest
"#,
        )
        .unwrap();
        assert_eq!(
            dependency_graph(&doc, Platform::GithubActions),
            "graph TD\n    build\n    lint\n    build --> test\n    build --> deploy\n    test --> deploy"
        );
    }

    #[test]
    fn test_placeholder_for_single_job_and_other_platforms() {
        let single = parse("on: push\njobs:\n  a:\n    runs-on: x\n").unwrap();
        assert_eq!(dependency_graph(&single, Platform::GithubActions), PLACEHOLDER_GRAPH);

        let gitlab = parse("jobs:\n  a: {}\n  b: {}\n").unwrap();
        assert_eq!(dependency_graph(&gitlab, Platform::GitlabCi), PLACEHOLDER_GRAPH);
    }
}
