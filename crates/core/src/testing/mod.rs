//! Test doubles and fixtures.
//!
//! Used by unit tests and the integration suite; kept in the library so
//! downstream crates can drive the engine without real media backends.

mod fixtures;
mod memory_artifact_store;
mod mock_executor;

pub use fixtures::{dubbing_registry, dubbing_stages, test_source};
pub use memory_artifact_store::MemoryArtifactStore;
pub use mock_executor::{ExecutionRecord, MockStageExecutor};
