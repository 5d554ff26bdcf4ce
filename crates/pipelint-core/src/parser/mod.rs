pub mod bitbucket;
pub mod dag;
pub mod github;
pub mod gitlab;

use crate::document::Node;
use crate::error::ParseError;
use crate::platforms::Platform;
use dag::PipelineDag;

/// Parse raw YAML text into a document tree.
///
/// Blank input parses to `Node::Null`; the analyzer reports it as an empty
/// configuration rather than failing here.
pub fn parse(raw_text: &str) -> Result<Node, ParseError> {
    if raw_text.trim().is_empty() {
        return Ok(Node::Null);
    }

    let value: serde_yaml::Value = serde_yaml::from_str(raw_text).map_err(|e| {
        let err = ParseError::new(e.to_string());
        match e.location() {
            Some(loc) => err.at(loc.line(), loc.column()),
            None => err,
        }
    })?;

    Ok(Node::from(value))
}

/// Build the job graph for a document using the platform's conventions.
pub fn build_dag(document: &Node, platform: Platform) -> anyhow::Result<PipelineDag> {
    match platform {
        Platform::GithubActions => github::GitHubActionsParser::build(document),
        Platform::GitlabCi => gitlab::GitLabCIParser::build(document),
        Platform::BitbucketPipelines => bitbucket::BitbucketParser::build(document),
        Platform::Unknown => Ok(PipelineDag::new(
            "Unknown pipeline".to_string(),
            Platform::Unknown.as_str().to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flow_mapping() {
        let doc = parse("{on: {push: {}}, jobs: {build: {runs-on: ubuntu-latest}}}").unwrap();
        assert_eq!(
            doc.get_path("jobs.build.runs-on").and_then(Node::as_str),
            Some("ubuntu-latest")
        );
        assert!(doc.get("on").is_some());
    }

    #[test]
    fn test_parse_blank_is_null() {
        assert_eq!(parse("   \n\n").unwrap(), Node::Null);
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err = parse("jobs:\n  build:\n    steps: [\n").unwrap_err();
        assert!(err.line.is_some());
        assert!(err.to_string().starts_with("YAML parse error"));
    }
}
