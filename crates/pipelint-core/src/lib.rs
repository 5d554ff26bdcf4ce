pub mod analyzer;
pub mod config;
pub mod cost;
pub mod document;
pub mod error;
pub mod findings;
pub mod graph;
pub mod parser;
pub mod platforms;
pub mod rules;
pub mod security;

pub use analyzer::{analyze, analyze_source, AnalysisResult};
pub use config::AnalysisConfig;
pub use document::Node;
pub use error::{ConfigError, ParseError, RuleError};
pub use findings::{Category, Issue, IssueSeverity, Optimization, Rating, SecurityVulnerability, VulnerabilitySeverity};
pub use parser::dag::{DagEdge, JobNode, PipelineDag, StepInfo};
pub use platforms::Platform;
pub use rules::custom::CustomRule;
