//! Nanotick/sample conversion against a pluggable tempo provider.
//!
//! Musical time is measured in nanoticks: 1/960 000 of a quarter note,
//! tempo-independent and monotonic. Sample time is an index at the fixed
//! engine sample rate. Conversions round half-to-even so that round trips
//! stay within one sample for any tempo the transport can reach.

/// Nanoticks per quarter note.
pub const NANOTICKS_PER_QUARTER: u64 = 960_000;

/// Source of tempo at a musical position.
///
/// The engine core runs against a static provider, but the conversion layer
/// is written against the trait so a tempo map can slot in later.
pub trait TempoProvider: Send + Sync {
    /// Tempo in BPM at the given nanotick.
    fn bpm_at_nanotick(&self, nanotick: u64) -> f64;
}

/// Fixed-tempo provider.
#[derive(Debug, Clone, Copy)]
pub struct StaticTempoProvider {
    bpm: f64,
}

impl StaticTempoProvider {
    pub const fn new(bpm: f64) -> Self {
        Self { bpm }
    }
}

impl Default for StaticTempoProvider {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl TempoProvider for StaticTempoProvider {
    #[inline]
    fn bpm_at_nanotick(&self, _nanotick: u64) -> f64 {
        self.bpm
    }
}

/// Converts between nanoticks and engine samples.
#[derive(Clone, Copy)]
pub struct NanotickConverter<'a, T: TempoProvider + ?Sized> {
    tempo: &'a T,
    sample_rate: u32,
}

impl<'a, T: TempoProvider + ?Sized> NanotickConverter<'a, T> {
    pub fn new(tempo: &'a T, sample_rate: u32) -> Self {
        Self { tempo, sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sample index of a nanotick position.
    #[inline]
    pub fn nanoticks_to_samples(&self, ticks: u64) -> u64 {
        let bpm = self.tempo.bpm_at_nanotick(ticks);
        let samples = (ticks as f64 * self.sample_rate as f64 * 60.0)
            / (bpm * NANOTICKS_PER_QUARTER as f64);
        let rounded = samples.round_ties_even();
        if rounded <= 0.0 {
            0
        } else {
            rounded as u64
        }
    }

    /// Nanotick position of a sample index, using the tempo at `at_nanotick`.
    #[inline]
    pub fn samples_to_nanoticks_at(&self, samples: u64, at_nanotick: u64) -> u64 {
        let bpm = self.tempo.bpm_at_nanotick(at_nanotick);
        let ticks = (samples as f64 * bpm * NANOTICKS_PER_QUARTER as f64)
            / (self.sample_rate as f64 * 60.0);
        let rounded = ticks.round_ties_even();
        if rounded <= 0.0 {
            0
        } else {
            rounded as u64
        }
    }

    /// Nanotick position of a sample index at the timeline origin.
    #[inline]
    pub fn samples_to_nanoticks(&self, samples: u64) -> u64 {
        self.samples_to_nanoticks_at(samples, 0)
    }

    /// Nanoticks spanned by one block starting at `at_nanotick`.
    #[inline]
    pub fn block_ticks(&self, block_size: u32, at_nanotick: u64) -> u64 {
        self.samples_to_nanoticks_at(u64::from(block_size), at_nanotick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn quarter_note_at_120_bpm_is_half_second() {
        let tempo = StaticTempoProvider::new(120.0);
        let conv = NanotickConverter::new(&tempo, 48_000);
        assert_eq!(conv.nanoticks_to_samples(NANOTICKS_PER_QUARTER), 24_000);
        assert_eq!(conv.samples_to_nanoticks(24_000), NANOTICKS_PER_QUARTER);
    }

    #[test]
    fn zero_maps_to_zero() {
        let tempo = StaticTempoProvider::default();
        let conv = NanotickConverter::new(&tempo, 48_000);
        assert_eq!(conv.nanoticks_to_samples(0), 0);
        assert_eq!(conv.samples_to_nanoticks(0), 0);
    }

    #[test]
    fn block_ticks_at_120_bpm() {
        let tempo = StaticTempoProvider::new(120.0);
        let conv = NanotickConverter::new(&tempo, 48_000);
        // 512 samples at 48kHz/120bpm = 512/24000 quarters = 20480 nanoticks.
        assert_eq!(conv.block_ticks(512, 0), 20_480);
    }

    fn round_trip_within_one_sample(bpm: f64, samples: u64) {
        let tempo = StaticTempoProvider::new(bpm);
        let conv = NanotickConverter::new(&tempo, 48_000);
        let ticks = conv.samples_to_nanoticks(samples);
        let back = conv.nanoticks_to_samples(ticks);
        let diff = back.abs_diff(samples);
        assert!(diff <= 1, "bpm={bpm} samples={samples} back={back}");
    }

    proptest! {
        #[test]
        fn round_trip_60_bpm(samples in 0u64..1_000_000_000) {
            round_trip_within_one_sample(60.0, samples);
        }

        #[test]
        fn round_trip_120_bpm(samples in 0u64..1_000_000_000) {
            round_trip_within_one_sample(120.0, samples);
        }

        #[test]
        fn round_trip_fractional_bpm(samples in 0u64..1_000_000_000) {
            round_trip_within_one_sample(174.5, samples);
        }

        #[test]
        fn round_trip_tempo_range(bpm in 20.0f64..300.0, ticks in 0u64..10_000_000_000) {
            let tempo = StaticTempoProvider::new(bpm);
            let conv = NanotickConverter::new(&tempo, 48_000);
            let samples = conv.nanoticks_to_samples(ticks);
            let back = conv.samples_to_nanoticks(samples);
            // One sample is worth bpm * 960000 / (48000 * 60) nanoticks.
            let ticks_per_sample = bpm * NANOTICKS_PER_QUARTER as f64 / (48_000.0 * 60.0);
            let tolerance = ticks_per_sample.ceil() as u64 + 1;
            prop_assert!(back.abs_diff(ticks) <= tolerance);
        }
    }
}
