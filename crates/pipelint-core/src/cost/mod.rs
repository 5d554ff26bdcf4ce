use crate::parser::dag::PipelineDag;
use serde::{Deserialize, Serialize};

/// Relative cost units charged per job.
pub const UNITS_PER_JOB: f64 = 10.0;
/// Relative cost units charged per step.
pub const UNITS_PER_STEP: f64 = 2.0;
pub const STORAGE_UNITS: f64 = 5.0;
pub const NETWORK_UNITS: f64 = 2.0;
/// Share of the current cost expected to remain after optimization.
pub const OPTIMIZED_RATIO: f64 = 0.7;

/// Relative cost of one pipeline run, in abstract units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimation {
    pub compute: f64,
    pub storage: f64,
    pub network: f64,
    pub current: f64,
    pub optimized: f64,
    pub savings_percentage: u8,
}

impl CostEstimation {
    /// All-zero estimation, reported when cost analysis is turned off.
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Estimate the relative cost of a pipeline from its job and step counts.
pub fn estimate_costs(dag: &PipelineDag) -> CostEstimation {
    let compute = UNITS_PER_JOB * dag.job_count() as f64 + UNITS_PER_STEP * dag.step_count() as f64;
    let current = compute + STORAGE_UNITS + NETWORK_UNITS;
    let optimized = current * OPTIMIZED_RATIO;
    let savings_percentage = (100.0 * (current - optimized) / current).round() as u8;

    CostEstimation {
        compute,
        storage: STORAGE_UNITS,
        network: NETWORK_UNITS,
        current,
        optimized,
        savings_percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dag::{JobNode, StepInfo};

    #[test]
    fn test_cost_formula() {
        let mut dag = PipelineDag::new("ci".into(), "github-actions".into());
        let mut job = JobNode::new("build".into(), "Build".into());
        job.steps.push(StepInfo::run("make"));
        job.steps.push(StepInfo::run("make test"));
        dag.add_job(job);
        dag.add_job(JobNode::new("lint".into(), "Lint".into()));

        let cost = estimate_costs(&dag);
        assert_eq!(cost.compute, 24.0);
        assert_eq!(cost.current, 31.0);
        assert!((cost.optimized - 21.7).abs() < 1e-9);
        assert_eq!(cost.savings_percentage, 30);
    }

    #[test]
    fn test_empty_pipeline_still_has_fixed_costs() {
        let dag = PipelineDag::new("ci".into(), "unknown".into());
        let cost = estimate_costs(&dag);
        assert_eq!(cost.current, 7.0);
        assert_eq!(cost.savings_percentage, 30);
    }

    #[test]
    fn test_disabled_is_zero() {
        let cost = CostEstimation::disabled();
        assert_eq!(cost.current, 0.0);
        assert_eq!(cost.savings_percentage, 0);
    }
}
