use super::{types::Config, ConfigError};
use crate::stage::StageRegistry;

/// Cross-field validation, run after parsing.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.segmenter.segment_secs <= 0.0 || !config.segmenter.segment_secs.is_finite() {
        return Err(ConfigError::ValidationError(format!(
            "segmenter.segment_secs must be positive, got {}",
            config.segmenter.segment_secs
        )));
    }

    // Registry construction checks stage ordering and kind adjacency.
    let registry = StageRegistry::new(config.stages.clone())
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    // Every class the pipeline uses needs at least one slot, otherwise
    // its tasks would stay Blocked forever.
    for stage in registry.stages() {
        if config.resources.slots_for(stage.resource_class) == 0 {
            return Err(ConfigError::ValidationError(format!(
                "stage '{}' needs a {} slot but resources.{} is 0",
                stage.name, stage.resource_class, stage.resource_class
            )));
        }
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.orchestrator.workers == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.workers must be at least 1".to_string(),
        ));
    }

    Ok(())
}
