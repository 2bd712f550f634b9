//! `adsync check`: parse and validate configuration, print the plan.

use std::path::Path;

use adsync_engine::config::{parse_orchestrator, validate_orchestrator};
use adsync_engine::scheduler::PlatformScheduler;
use adsync_engine::StepRegistry;
use adsync_platforms::specs;
use tracing::{error, info};

/// Returns a process exit code: 0 for a valid configuration, 1 otherwise.
pub fn execute(config_path: &Path) -> i32 {
    let config = match parse_orchestrator(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration failed to parse");
            return 1;
        }
    };
    if let Err(e) = validate_orchestrator(&config) {
        error!(error = %e, "configuration is invalid");
        return 1;
    }

    // Shipped platforms also get their table configs checked against the
    // step registry.
    let registry = StepRegistry::with_default_steps();
    for platform in config.enabled_platforms() {
        let spec = match specs::spec_for(&platform.name) {
            Ok(spec) => spec,
            Err(e) => {
                error!(platform = %platform.name, error = %e, "platform spec invalid");
                return 1;
            }
        };
        for table in &spec.tables {
            if let Err(e) = registry.build_pipeline(&table.settings.processing) {
                error!(
                    platform = %platform.name,
                    table = %table.name,
                    error = %e,
                    "processing chain invalid"
                );
                return 1;
            }
        }
        info!(
            platform = %platform.name,
            tables = spec.tables.len(),
            "platform table config ok"
        );
    }

    let enabled = config.enabled_platforms();
    let scheduler = PlatformScheduler::new(&enabled);
    let groups = match scheduler.schedule() {
        Ok(groups) => groups,
        Err(e) => {
            error!(error = %e, "scheduling failed");
            return 1;
        }
    };

    info!(platforms = enabled.len(), groups = groups.len(), "configuration is valid");
    for (i, group) in groups.iter().enumerate() {
        info!(group = i + 1, members = %group.join(", "), "execution group");
    }
    0
}
