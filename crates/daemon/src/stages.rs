//! Default maintenance plan for the bookmark library
//!
//! Until the organizer's real scanners plug in, each stage walks a synthetic
//! unit count so the full progress/pause/cancel surface is exercisable end
//! to end.

use linkward_core::application::JobSystem;
use linkward_core::domain::StageDescriptor;
use linkward_core::port::{FnStageExecutor, StageContext, StageError, StageOutcome};
use std::sync::Arc;
use std::time::Duration;

/// The standard library-maintenance plan
pub fn default_plan() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::new("collect", "Collecting bookmarks", 20)
            .description("Scan the library and gather bookmark records")
            .estimated_units(200),
        StageDescriptor::new("dedupe", "Removing duplicates", 20)
            .description("Detect and merge duplicate bookmarks")
            .estimated_units(50),
        StageDescriptor::new("tag", "Tagging bookmarks", 40)
            .description("Derive tags for untagged bookmarks")
            .estimated_units(200),
        StageDescriptor::new("organize", "Organizing folders", 20)
            .description("Move bookmarks into their folders")
            .estimated_units(100),
    ]
}

/// Register a synthetic executor for every stage of the default plan
pub fn register_default_stages(system: &JobSystem) {
    for descriptor in default_plan() {
        let total = descriptor.estimated_units.unwrap_or(100);
        let summary_key = format!("{}Processed", descriptor.id);
        system.register_stage(
            descriptor.id.clone(),
            Arc::new(unit_walker(total, summary_key)),
        );
    }
}

/// An executor walking `total` units with per-unit progress reporting and
/// cooperative cancellation; resumes from the last reported count
fn unit_walker(total: u64, summary_key: String) -> FnStageExecutor {
    FnStageExecutor::new(move |ctx: StageContext| {
        let summary_key = summary_key.clone();
        async move {
            let mut processed = ctx.processed_units.min(total);
            while processed < total {
                if ctx.cancel.is_cancelled() {
                    return Ok(StageOutcome {
                        completed: false,
                        processed_units: Some(processed),
                        total_units: Some(total),
                        ..StageOutcome::default()
                    });
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
                processed += 1;
                ctx.hooks.progress(processed, Some(total)).await;
            }

            let mut summary = serde_json::Map::new();
            summary.insert(summary_key, serde_json::json!(total));
            Ok::<StageOutcome, StageError>(
                StageOutcome::completed().units(total, total).summary(summary),
            )
        }
    })
}
