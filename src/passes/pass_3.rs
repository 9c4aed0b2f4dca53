//! Pass 3: Error by Pitch

use crate::analysis::{PitchBin, PitchCount, SampleRecord};
use crate::config::{Config, OutOfRangePolicy, MIDI_PITCH_COUNT};
use crate::dataset::EvaluationState;
use crate::error::{EvalError, Result};
use tracing::{info, warn};

/// Count correct/incorrect predictions per pitch and per pitch bin
pub fn run(state: &mut EvaluationState, config: &Config) -> Result<()> {
    let aggregation = &config.aggregation;
    info!(
        split = %aggregation.split,
        bin_width = aggregation.bin_width,
        "Pass 3: error by pitch"
    );

    let counts = count_by_pitch(&state.table.rows, &aggregation.split, aggregation.out_of_range)?;
    let bins = bin_pitch_counts(&counts, aggregation.bin_width)?;

    let empty = bins.iter().filter(|b| b.total == 0).count();
    info!(bins = bins.len(), empty, "  ✓ pitch bins aggregated");

    state.pitch_counts = counts;
    state.pitch_bins = bins;
    Ok(())
}

/// Correct/incorrect counts for every MIDI pitch 0..=127 in one split
///
/// Pitches without samples are present with zero counts.
pub fn count_by_pitch(
    samples: &[SampleRecord],
    split: &str,
    policy: OutOfRangePolicy,
) -> Result<Vec<PitchCount>> {
    let mut counts: Vec<PitchCount> = (0..MIDI_PITCH_COUNT)
        .map(|pitch| PitchCount {
            midi_number: pitch as u8,
            ..Default::default()
        })
        .collect();

    let mut dropped = 0usize;
    let mut clamped = 0usize;
    for sample in samples.iter().filter(|s| s.split == split) {
        let pitch = match resolve_pitch(sample, policy)? {
            PitchResolution::InRange(p) => p,
            PitchResolution::Clamped(p) => {
                clamped += 1;
                p
            }
            PitchResolution::Dropped => {
                dropped += 1;
                continue;
            }
        };

        let count = &mut counts[pitch];
        if sample.correct_class {
            count.correct += 1;
        } else {
            count.incorrect += 1;
        }
    }

    if dropped > 0 {
        warn!(samples = dropped, "dropped samples with MIDI numbers outside 0..=127");
    }
    if clamped > 0 {
        warn!(samples = clamped, "clamped MIDI numbers into 0..=127");
    }

    Ok(counts)
}

enum PitchResolution {
    InRange(usize),
    Clamped(usize),
    Dropped,
}

fn resolve_pitch(sample: &SampleRecord, policy: OutOfRangePolicy) -> Result<PitchResolution> {
    let max = MIDI_PITCH_COUNT as i64 - 1;
    if (0..=max).contains(&sample.midi_number) {
        return Ok(PitchResolution::InRange(sample.midi_number as usize));
    }
    match policy {
        OutOfRangePolicy::Error => Err(EvalError::PitchOutOfRange {
            sample_id: sample.sample_id.clone(),
            midi_number: sample.midi_number,
        }),
        OutOfRangePolicy::Drop => Ok(PitchResolution::Dropped),
        OutOfRangePolicy::Clamp => Ok(PitchResolution::Clamped(
            sample.midi_number.clamp(0, max) as usize,
        )),
    }
}

/// Sum pitch counts into contiguous bins labelled `floor(pitch / width) * width`
pub fn bin_pitch_counts(counts: &[PitchCount], bin_width: usize) -> Result<Vec<PitchBin>> {
    if bin_width == 0 {
        return Err(EvalError::ConfigValidation(
            "bin width must be > 0".to_string(),
        ));
    }

    let n_bins = (MIDI_PITCH_COUNT + bin_width - 1) / bin_width;
    let mut sums = vec![(0u64, 0u64); n_bins];
    // n_bins * bin_width >= 128, so every pitch below 128 has a bin
    for count in counts
        .iter()
        .filter(|c| usize::from(c.midi_number) < MIDI_PITCH_COUNT)
    {
        let (correct, incorrect) = &mut sums[usize::from(count.midi_number) / bin_width];
        *correct += count.correct;
        *incorrect += count.incorrect;
    }

    Ok(sums
        .into_iter()
        .enumerate()
        .map(|(idx, (correct, incorrect))| {
            PitchBin::from_counts((idx * bin_width) as u32, correct, incorrect)
        })
        .collect())
}
