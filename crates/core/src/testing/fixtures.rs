//! Shared pipeline fixtures.

use crate::segment::SourceRef;
use crate::stage::{ArtifactKind, ResourceClass, StageRegistry, StageSpec};

/// The canonical five-stage dubbing pipeline used across tests.
pub fn dubbing_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new(
            "extract",
            ArtifactKind::Source,
            ArtifactKind::AudioTrack,
            ResourceClass::Cpu,
        )
        .with_param("sample_rate", "16000"),
        StageSpec::new(
            "transcribe",
            ArtifactKind::AudioTrack,
            ArtifactKind::Transcript,
            ResourceClass::GpuLarge,
        )
        .with_param("model", "large-v3"),
        StageSpec::new(
            "translate",
            ArtifactKind::Transcript,
            ArtifactKind::Translation,
            ResourceClass::GpuLarge,
        )
        .with_param("target_lang", "hi"),
        StageSpec::new(
            "synthesize",
            ArtifactKind::Translation,
            ArtifactKind::SynthesizedSpeech,
            ResourceClass::GpuLarge,
        ),
        StageSpec::new(
            "lipsync",
            ArtifactKind::SynthesizedSpeech,
            ArtifactKind::DubbedClip,
            ResourceClass::Gpu,
        ),
    ]
}

/// Registry over [`dubbing_stages`].
pub fn dubbing_registry() -> StageRegistry {
    StageRegistry::new(dubbing_stages()).expect("fixture pipeline is valid")
}

pub fn test_source(duration_secs: f64) -> SourceRef {
    SourceRef::new("/media/episode-01.mp4", duration_secs)
}
