use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::fault::RetryPolicy;
use crate::orchestrator::OrchestratorConfig;
use crate::reassembly::ReassemblyMode;
use crate::stage::{ResourceClass, StageSpec};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    /// Ordered pipeline stages. Validated into a registry at startup.
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// No default: partial-output behaviour is an explicit choice.
    pub reassembly: ReassemblyConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Segmenter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmenterConfig {
    /// Target segment length in seconds. The final segment of a source
    /// may be shorter.
    #[serde(default = "default_segment_secs")]
    pub segment_secs: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            segment_secs: default_segment_secs(),
        }
    }
}

fn default_segment_secs() -> f64 {
    15.0
}

/// Resource slot counts per class
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourcesConfig {
    #[serde(default = "default_cpu_slots")]
    pub cpu: usize,
    #[serde(default = "default_gpu_slots")]
    pub gpu: usize,
    #[serde(default = "default_gpu_large_slots")]
    pub gpu_large: usize,
}

impl ResourcesConfig {
    /// Slot table for the allocator.
    pub fn slots(&self) -> HashMap<ResourceClass, usize> {
        let mut slots = HashMap::new();
        slots.insert(ResourceClass::Cpu, self.cpu);
        slots.insert(ResourceClass::Gpu, self.gpu);
        slots.insert(ResourceClass::GpuLarge, self.gpu_large);
        slots
    }

    pub fn slots_for(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Cpu => self.cpu,
            ResourceClass::Gpu => self.gpu,
            ResourceClass::GpuLarge => self.gpu_large,
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu_slots(),
            gpu: default_gpu_slots(),
            gpu_large: default_gpu_large_slots(),
        }
    }
}

fn default_cpu_slots() -> usize {
    4
}

fn default_gpu_slots() -> usize {
    1
}

fn default_gpu_large_slots() -> usize {
    1
}

/// Reassembly configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReassemblyConfig {
    pub mode: ReassemblyMode,
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
        }
    }
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("artifacts")
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("dubflow.db")
}
