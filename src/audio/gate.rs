//! Per-block speech/silence classification.
//!
//! Two independent gates decide whether a block counts as speech: a cheap
//! RMS energy gate, and a model-backed no-speech-probability gate behind the
//! [`NoSpeechScorer`] trait. The energy gate runs first so clearly silent
//! blocks never pay for the heavier check.

/// Trait for no-speech-probability scoring.
///
/// This trait allows swapping implementations (model-backed scorer vs the
/// built-in heuristic vs a test mock).
pub trait NoSpeechScorer: Send + Sync {
    /// Probability (0.0 to 1.0) that the block contains no speech.
    fn no_speech_prob(&self, samples: &[i16], sample_rate: u32) -> f32;
}

/// Heuristic scorer combining short-term energy and zero-crossing rate.
///
/// Voiced speech sits well above the noise floor with a low-to-moderate
/// zero-crossing rate; hiss and electrical noise cross zero far more often
/// at comparable energy. Stands in wherever no model-backed scorer is wired.
pub struct HeuristicScorer {
    /// RMS level treated as confidently-speech (probability bottoms out).
    reference_level: f32,
}

impl HeuristicScorer {
    pub fn new() -> Self {
        Self {
            reference_level: 0.02,
        }
    }

    pub fn with_reference_level(reference_level: f32) -> Self {
        Self { reference_level }
    }
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl NoSpeechScorer for HeuristicScorer {
    fn no_speech_prob(&self, samples: &[i16], _sample_rate: u32) -> f32 {
        if samples.is_empty() {
            return 1.0;
        }
        let rms = calculate_rms(samples);
        if rms <= f32::EPSILON {
            return 1.0;
        }
        let energy_term = 1.0 - (rms / self.reference_level).min(1.0);

        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] >= 0) != (w[1] >= 0))
            .count();
        let zcr = crossings as f32 / samples.len() as f32;
        // Above ~0.35 the block looks like broadband noise, not voicing.
        let zcr_term = if zcr > 0.35 { 0.3 } else { 0.0 };

        (0.7 * energy_term + zcr_term).clamp(0.0, 1.0)
    }
}

/// Two-stage block classifier.
pub struct BlockGate {
    energy_threshold: f32,
    no_speech_threshold: f32,
    scorer: Box<dyn NoSpeechScorer>,
}

impl BlockGate {
    /// Creates a gate with the built-in heuristic scorer.
    pub fn new(energy_threshold: f32, no_speech_threshold: f32) -> Self {
        Self::with_scorer(
            energy_threshold,
            no_speech_threshold,
            Box::new(HeuristicScorer::new()),
        )
    }

    /// Creates a gate with a custom scorer (model-backed or mock).
    pub fn with_scorer(
        energy_threshold: f32,
        no_speech_threshold: f32,
        scorer: Box<dyn NoSpeechScorer>,
    ) -> Self {
        Self {
            energy_threshold,
            no_speech_threshold,
            scorer,
        }
    }

    /// Classifies a block. Speech requires passing both gates.
    pub fn is_speech(&self, samples: &[i16], sample_rate: u32) -> bool {
        let rms = calculate_rms(samples);
        if rms <= self.energy_threshold {
            // Clear silence: skip the heavier model check entirely.
            return false;
        }
        self.scorer.no_speech_prob(samples, sample_rate) < self.no_speech_threshold
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// Returns a normalized value (0.0 to 1.0), where 0.0 is silence and 1.0 is
/// maximum amplitude.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
