use crate::document::Node;
use crate::error::RuleError;
use crate::findings::{Category, Issue, IssueSeverity};
use crate::rules::context::RuleContext;
use crate::rules::{DefaultSeverity, Level, PlatformScope, Rule, RuleMeta};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SHA_REF: Regex = Regex::new(r"@[0-9a-f]{40}$").unwrap();
    static ref TAG_REF: Regex = Regex::new(r"@v?\d+(\.\d+)*$").unwrap();
    static ref BRANCH_REF: Regex = Regex::new(r"@(main|master|develop|dev)$").unwrap();
    static ref DOCKER_CLI_IMAGE: Regex =
        Regex::new(r"\bdocker\s+(?:run|pull)\b(?:\s+-{1,2}[^\s]+(?:\s+[^-\s][^\s]*)?)*?\s+([a-z0-9][a-z0-9._\-/]*(?::[A-Za-z0-9._\-]+)?(?:@sha256:[0-9a-f]+)?)").unwrap();
}

/// How firmly an action reference is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningRisk {
    /// Full commit SHA.
    Sha,
    /// Version tag, movable by the maintainer.
    Tag,
    /// Branch name; changes with every push.
    Branch,
    /// No `@ref` at all.
    Unpinned,
    Unknown,
}

impl PinningRisk {
    pub fn label(&self) -> &str {
        match self {
            PinningRisk::Sha => "SHA-pinned",
            PinningRisk::Tag => "tag-pinned",
            PinningRisk::Branch => "branch-pinned",
            PinningRisk::Unpinned => "unpinned",
            PinningRisk::Unknown => "pinned to an unknown ref",
        }
    }
}

/// Classify an action reference such as `actions/checkout@v4`.
pub fn classify_pinning(reference: &str) -> PinningRisk {
    if SHA_REF.is_match(reference) {
        return PinningRisk::Sha;
    }
    if TAG_REF.is_match(reference) {
        return PinningRisk::Tag;
    }
    if BRANCH_REF.is_match(reference) {
        return PinningRisk::Branch;
    }
    if !reference.contains('@') {
        return PinningRisk::Unpinned;
    }
    PinningRisk::Unknown
}

/// Tag state of a container image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTag {
    Digest,
    Tagged,
    Latest,
    Untagged,
}

/// Classify `node:20`, `registry:5000/app`, `alpine@sha256:...` and friends.
pub fn classify_image(image: &str) -> ImageTag {
    let image = image.trim().trim_start_matches("docker://");
    if image.contains("@sha256:") {
        return ImageTag::Digest;
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.split_once(':') {
        Some((_, "latest")) => ImageTag::Latest,
        Some((_, tag)) if !tag.is_empty() => ImageTag::Tagged,
        _ => ImageTag::Untagged,
    }
}

/// `true` for image strings built from variables, which cannot be judged statically.
pub fn is_templated(image: &str) -> bool {
    image.contains('$') || image.contains("{{")
}

/// Every image reference in the document, with the key path it was found at.
fn collect_images<'a>(node: &'a Node, path: &str, out: &mut Vec<(String, &'a str)>) {
    match node {
        Node::Mapping(map) => {
            for (key, value) in map.iter() {
                let child = if path.is_empty() { key.to_string() } else { format!("{path}.{key}") };
                match (key, value) {
                    ("image" | "container", Node::String(image)) => out.push((child.clone(), image.as_str())),
                    ("image", Node::Mapping(_)) => {
                        if let Some(image) = value.get("name").and_then(Node::as_str) {
                            out.push((child.clone(), image));
                        }
                    }
                    ("services", Node::Sequence(items)) => {
                        for (i, item) in items.iter().enumerate() {
                            let image = item.as_str().or_else(|| item.get("name").and_then(Node::as_str));
                            if let Some(image) = image {
                                out.push((format!("{child}.{i}"), image));
                            }
                        }
                    }
                    ("uses", Node::String(uses)) if uses.starts_with("docker://") => {
                        out.push((child.clone(), uses.as_str()));
                    }
                    _ => {}
                }
                collect_images(value, &child, out);
            }
        }
        Node::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_images(item, &format!("{path}.{i}"), out);
            }
        }
        _ => {}
    }
}

/// First line declaring `image` as the value of an image key or as a list item.
fn image_line(ctx: &RuleContext, image: &str) -> Option<usize> {
    ctx.lines_where(|l| {
        let item = l.trim_start().trim_start_matches("- ");
        let value = ["image:", "container:", "uses:", "name:"]
            .iter()
            .find_map(|key| item.strip_prefix(key))
            .unwrap_or(item);
        value.trim().trim_matches(|c| c == '"' || c == '\'') == image
    })
    .first()
    .copied()
}

pub struct UnpinnedImages;

static UNPINNED_IMAGES_META: RuleMeta = RuleMeta {
    id: "PLT-SEC-008",
    name: "Unpinned Docker images",
    description: "Images on `:latest` or without any tag change underneath the pipeline",
    category: Category::Security,
    severity: DefaultSeverity::Issue(IssueSeverity::Warning),
    level: Level::Intermediate,
    platforms: PlatformScope::All,
};

impl UnpinnedImages {
    fn issue(image: &str, location: &str, tag: ImageTag, line: Option<usize>) -> Issue {
        let what = match tag {
            ImageTag::Latest => "uses the mutable `latest` tag",
            _ => "has no tag and resolves to `latest`",
        };
        let issue = Issue::new(
            format!("Unpinned Docker image: {image}"),
            format!("Image '{image}' at {location} {what}, so builds are not reproducible"),
            IssueSeverity::Warning,
            Category::Security,
        )
        .with_rule(UNPINNED_IMAGES_META.id)
        .with_suggestion("Pin a specific version tag, or a digest (`image@sha256:...`) for full reproducibility")
        .with_example("image: node:20.11-alpine")
        .fixable(true)
        .with_fix_minutes(5);
        match line {
            Some(line) => issue.at_line(line),
            None => issue,
        }
    }
}

impl Rule for UnpinnedImages {
    fn meta(&self) -> &'static RuleMeta {
        &UNPINNED_IMAGES_META
    }

    fn check(&self, document: &Node, ctx: &mut RuleContext) -> Result<(), RuleError> {
        let mut images = Vec::new();
        collect_images(document, "", &mut images);

        for (location, image) in images {
            if is_templated(image) {
                continue;
            }
            let tag = classify_image(image);
            // untagged job images are reported by the platform analyzers
            let report = match tag {
                ImageTag::Latest => true,
                ImageTag::Untagged => location.contains("services") || location.contains("container"),
                _ => false,
            };
            if report {
                let line = image_line(ctx, image);
                ctx.push_issue(Self::issue(image, &location, tag, line));
            }
        }

        let mut cli_hits = Vec::new();
        for (i, line) in ctx.lines().iter().enumerate() {
            if line.trim_start().starts_with('#') {
                continue;
            }
            for caps in DOCKER_CLI_IMAGE.captures_iter(line) {
                if let Some(image) = caps.get(1).map(|m| m.as_str()) {
                    let tag = classify_image(image);
                    if matches!(tag, ImageTag::Latest | ImageTag::Untagged) {
                        cli_hits.push(Self::issue(image, "a docker command", tag, Some(i + 1)));
                    }
                }
            }
        }
        cli_hits.into_iter().for_each(|issue| ctx.push_issue(issue));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::platforms::Platform;

    #[test]
    fn test_sha_pinned_ok() {
        let pinning = classify_pinning("actions/checkout@a5ac7e51b41094c92402da3b24376905380afc29");
        assert_eq!(pinning, PinningRisk::Sha);
    }

    #[test]
    fn test_tag_branch_and_unpinned() {
        assert_eq!(classify_pinning("actions/checkout@v4"), PinningRisk::Tag);
        assert_eq!(classify_pinning("some/action@main"), PinningRisk::Branch);
        assert_eq!(classify_pinning("some/action"), PinningRisk::Unpinned);
        assert_eq!(classify_pinning("some/action@feature-x"), PinningRisk::Unknown);
    }

    #[test]
    fn test_classify_image() {
        assert_eq!(classify_image("node:20"), ImageTag::Tagged);
        assert_eq!(classify_image("node:latest"), ImageTag::Latest);
        assert_eq!(classify_image("node"), ImageTag::Untagged);
        assert_eq!(classify_image("registry.local:5000/team/app"), ImageTag::Untagged);
        assert_eq!(classify_image("alpine@sha256:abcd"), ImageTag::Digest);
        assert_eq!(classify_image("docker://alpine:3.19"), ImageTag::Tagged);
    }

    #[test]
    fn test_reports_latest_services_and_cli() {
        let raw = r#"
image: node:latest
services:
  - postgres
build:
  image: node
  script:
    - docker run --rm -v $PWD:/src redis
    - docker pull alpine:3.19
"#;
        let doc = parse(raw).unwrap();
        let mut ctx = RuleContext::new(raw, Platform::GitlabCi);
        UnpinnedImages.check(&doc, &mut ctx).unwrap();
        let outcome = ctx.into_outcome();
        let titles: Vec<_> = outcome.issues.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Unpinned Docker image: node:latest",
                "Unpinned Docker image: postgres",
                "Unpinned Docker image: redis",
            ]
        );
        assert_eq!(outcome.issues[0].lines, vec![2]);
    }

    #[test]
    fn test_line_points_at_image_key() {
        let raw = r#"
# upgrade from node:latest once the lockfile is fixed
variables:
  BASE: node:latest
build:
  image: node:latest
  script: [make]
"#;
        let doc = parse(raw).unwrap();
        let mut ctx = RuleContext::new(raw, Platform::GitlabCi);
        UnpinnedImages.check(&doc, &mut ctx).unwrap();
        let outcome = ctx.into_outcome();
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].lines, vec![6]);
    }

    #[test]
    fn test_templated_images_are_skipped() {
        let raw = "image: $CI_REGISTRY_IMAGE:latest\n";
        let doc = parse(raw).unwrap();
        let mut ctx = RuleContext::new(raw, Platform::GitlabCi);
        UnpinnedImages.check(&doc, &mut ctx).unwrap();
        assert!(ctx.into_outcome().issues.is_empty());
    }
}
