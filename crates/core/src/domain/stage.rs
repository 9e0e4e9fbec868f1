// Stage plan configuration and weighted progress

use crate::domain::snapshot::StageUnits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage identifier within a job plan
pub type StageId = String;

/// Static description of one stage in a job plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDescriptor {
    pub id: StageId,
    pub display_name: String,
    pub description: String,
    /// Contribution to overall progress; normalized against the plan total
    pub weight: u32,
    pub can_pause: bool,
    pub can_cancel: bool,
    pub retryable: bool,
    pub estimated_units: Option<u64>,
}

impl StageDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, weight: u32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: String::new(),
            weight,
            can_pause: true,
            can_cancel: true,
            retryable: true,
            estimated_units: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn pausable(mut self, can_pause: bool) -> Self {
        self.can_pause = can_pause;
        self
    }

    pub fn estimated_units(mut self, units: u64) -> Self {
        self.estimated_units = Some(units);
        self
    }
}

/// Capture the ordered ids and weight map from a plan
pub fn capture_plan(plan: &[StageDescriptor]) -> (Vec<StageId>, BTreeMap<StageId, u32>) {
    let order = plan.iter().map(|s| s.id.clone()).collect();
    let weights = plan.iter().map(|s| (s.id.clone(), s.weight)).collect();
    (order, weights)
}

/// Overall progress: fully credit strictly earlier stages, add fractional
/// credit for the in-progress stage, normalize against the declared total.
///
/// A missing or zero `total` contributes nothing; the caller surfaces
/// `indeterminate` instead.
pub fn weighted_percent(
    stage_order: &[StageId],
    stage_weights: &BTreeMap<StageId, u32>,
    stage_index: usize,
    units: &StageUnits,
) -> u8 {
    let total_weight: u64 = stage_order
        .iter()
        .map(|id| u64::from(stage_weights.get(id).copied().unwrap_or(0)))
        .sum();
    if total_weight == 0 {
        return 0;
    }

    let earlier: u64 = stage_order
        .iter()
        .take(stage_index)
        .map(|id| u64::from(stage_weights.get(id).copied().unwrap_or(0)))
        .sum();

    let current_weight = stage_order
        .get(stage_index)
        .and_then(|id| stage_weights.get(id))
        .copied()
        .unwrap_or(0) as f64;

    let fraction = match units.total {
        Some(total) if total > 0 => (units.processed as f64 / total as f64).clamp(0.0, 1.0),
        _ => 0.0,
    };

    let raw = (earlier as f64 + current_weight * fraction) / total_weight as f64 * 100.0;
    raw.round().clamp(0.0, 100.0) as u8
}
