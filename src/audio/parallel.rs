use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::audio::tts::{SynthResult, VoiceChain};
use crate::timeline::builder::segment_audio_path;
use crate::timeline::NarrationSegment;

/// Synthesize every segment on a bounded worker pool
///
/// Each segment goes to its own indexed path, so workers share nothing but
/// the voice chain. The returned vector is in segment order.
pub fn synthesize_parallel(
    segments: &[NarrationSegment],
    voice: &VoiceChain,
    audio_dir: &Path,
    prefix: &str,
    workers: usize,
) -> Vec<SynthResult> {
    debug!(
        "Synthesizing {} segments with {} workers",
        segments.len(),
        workers
    );

    let run = || {
        segments
            .par_iter()
            .enumerate()
            .map(|(index, segment)| {
                let path = segment_audio_path(audio_dir, prefix, index);
                voice.synthesize(&segment.text, &path)
            })
            .collect::<Vec<_>>()
    };

    match rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
    {
        Ok(pool) => pool.install(run),
        Err(e) => {
            warn!("Could not build synthesis pool ({}); running sequentially", e);
            segments
                .iter()
                .enumerate()
                .map(|(index, segment)| {
                    let path = segment_audio_path(audio_dir, prefix, index);
                    voice.synthesize(&segment.text, &path)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tts::tests::FakeEngine;
    use tempfile::tempdir;

    #[test]
    fn test_results_keep_segment_order() {
        let dir = tempdir().unwrap();
        let voice = VoiceChain::new(Box::new(FakeEngine::new(0.1).failing_on("bad")), None);
        let segments: Vec<NarrationSegment> = ["one", "bad", "three", "four"]
            .iter()
            .enumerate()
            .map(|(i, t)| NarrationSegment::new(*t, i))
            .collect();

        let results = synthesize_parallel(&segments, &voice, dir.path(), "comment", 4);

        assert_eq!(results.len(), 4);
        assert!(results[1].is_failure());
        for index in [0, 2, 3] {
            assert_eq!(
                results[index].audio().unwrap(),
                segment_audio_path(dir.path(), "comment", index)
            );
        }
    }
}
