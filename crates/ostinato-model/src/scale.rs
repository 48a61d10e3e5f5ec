//! Scale registry and degree/pitch resolution in cents.
//!
//! Scales are interval tables above a root pitch class. Resolution works in
//! absolute cents so non-12-TET tables (ratio intervals) keep their tuning;
//! the MIDI pitch is the nearest semitone with the residual carried as a
//! cents offset.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Interval {
    pub cents: f64,
    pub ratio_num: u32,
    pub ratio_den: u32,
    pub has_ratio: bool,
}

impl Interval {
    pub const fn from_cents(cents: f64) -> Self {
        Self {
            cents,
            ratio_num: 0,
            ratio_den: 0,
            has_ratio: false,
        }
    }

    pub const fn from_ratio(num: u32, den: u32) -> Self {
        Self {
            cents: 0.0,
            ratio_num: num,
            ratio_den: den,
            has_ratio: true,
        }
    }
}

pub fn interval_to_cents(interval: &Interval) -> f64 {
    if !interval.has_ratio || interval.ratio_den == 0 {
        return interval.cents;
    }
    let ratio = f64::from(interval.ratio_num) / f64::from(interval.ratio_den);
    if ratio <= 0.0 {
        return interval.cents;
    }
    1200.0 * ratio.log2()
}

#[derive(Debug, Clone)]
pub struct Scale {
    pub id: u32,
    pub name: String,
    pub steps: Vec<Interval>,
    pub octave: Interval,
}

/// A scale degree or quantized pitch resolved to MIDI plus a cents residual.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResolvedPitch {
    pub midi: u8,
    pub cents: f32,
    pub absolute_cents: f64,
}

pub fn resolved_pitch_from_cents(absolute_cents: f64) -> ResolvedPitch {
    let rounded = (absolute_cents / 100.0 + 0.5).floor();
    let midi = rounded.clamp(0.0, 127.0) as u8;
    let midi_cents = f64::from(midi) * 100.0;
    ResolvedPitch {
        midi,
        cents: (absolute_cents - midi_cents) as f32,
        absolute_cents,
    }
}

/// Resolve a 1-based scale degree above `root_pc` at `base_octave`.
pub fn resolve_degree(degree: u32, base_octave: u8, root_pc: u32, scale: &Scale) -> ResolvedPitch {
    let root_cents = f64::from((i32::from(base_octave) + 1) * 12 + root_pc as i32) * 100.0;
    if scale.steps.is_empty() {
        return resolved_pitch_from_cents(root_cents);
    }
    let degree = degree.max(1);
    let steps_per_octave = scale.steps.len() as u32;
    let index = (degree - 1) % steps_per_octave;
    let octave = (degree - 1) / steps_per_octave;
    let octave_cents = interval_to_cents(&scale.octave);
    let step_cents = interval_to_cents(&scale.steps[index as usize]);
    resolved_pitch_from_cents(root_cents + f64::from(octave) * octave_cents + step_cents)
}

/// Snap a MIDI pitch to the nearest scale tone above/below.
pub fn quantize_to_scale(pitch: u8, root_pc: u32, scale: &Scale) -> ResolvedPitch {
    if scale.steps.is_empty() {
        return resolved_pitch_from_cents(f64::from(pitch) * 100.0);
    }
    let octave_cents = interval_to_cents(&scale.octave);
    if octave_cents <= 0.0 {
        return resolved_pitch_from_cents(f64::from(pitch) * 100.0);
    }
    let pitch_cents = f64::from(pitch) * 100.0;
    let root_cents = f64::from(root_pc % 12) * 100.0;
    let relative = pitch_cents - root_cents;
    let base_octave = (relative / octave_cents).floor() as i32;

    let mut best_cents = pitch_cents;
    let mut best_distance = f64::INFINITY;
    for octave in (base_octave - 1)..=(base_octave + 1) {
        let octave_base = root_cents + f64::from(octave) * octave_cents;
        for step in &scale.steps {
            let candidate = octave_base + interval_to_cents(step);
            let distance = (candidate - pitch_cents).abs();
            if distance < best_distance {
                best_distance = distance;
                best_cents = candidate;
            }
        }
    }
    resolved_pitch_from_cents(best_cents)
}

/// Built-in scales, immutable after first access.
pub struct ScaleRegistry {
    scales: Vec<Scale>,
}

impl ScaleRegistry {
    pub fn instance() -> &'static ScaleRegistry {
        static INSTANCE: OnceLock<ScaleRegistry> = OnceLock::new();
        INSTANCE.get_or_init(ScaleRegistry::built_in)
    }

    fn built_in() -> Self {
        fn make(id: u32, name: &str, cents_steps: &[f64]) -> Scale {
            Scale {
                id,
                name: name.to_string(),
                steps: cents_steps.iter().copied().map(Interval::from_cents).collect(),
                octave: Interval::from_cents(1200.0),
            }
        }
        Self {
            scales: vec![
                make(1, "Major", &[0.0, 200.0, 400.0, 500.0, 700.0, 900.0, 1100.0]),
                make(2, "Minor", &[0.0, 200.0, 300.0, 500.0, 700.0, 800.0, 1000.0]),
                make(3, "Dorian", &[0.0, 200.0, 300.0, 500.0, 700.0, 900.0, 1000.0]),
                make(4, "Mixolydian", &[0.0, 200.0, 400.0, 500.0, 700.0, 900.0, 1000.0]),
            ],
        }
    }

    pub fn find(&self, id: u32) -> Option<&Scale> {
        self.scales.iter().find(|s| s.id == id)
    }

    pub fn scales(&self) -> &[Scale] {
        &self.scales
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn major() -> &'static Scale {
        ScaleRegistry::instance().find(1).unwrap()
    }

    #[test]
    fn registry_has_built_in_scales() {
        let registry = ScaleRegistry::instance();
        assert_eq!(registry.scales().len(), 4);
        assert!(registry.find(2).is_some());
        assert!(registry.find(99).is_none());
    }

    #[test]
    fn c_major_degrees_resolve_to_white_keys() {
        // Base octave 4, root C -> C5 = MIDI 60.
        let pitches: Vec<u8> = (1..=8)
            .map(|d| resolve_degree(d, 4, 0, major()).midi)
            .collect();
        assert_eq!(pitches, vec![60, 62, 64, 65, 67, 69, 71, 72]);
    }

    #[test]
    fn degree_zero_is_treated_as_one() {
        assert_eq!(resolve_degree(0, 4, 0, major()).midi, 60);
    }

    #[test]
    fn quantize_snaps_to_nearest_tone() {
        // C# is one semitone from both C and D; the scan order picks C.
        assert_eq!(quantize_to_scale(61, 0, major()).midi, 60);
        // F# -> F or G, both 100 cents away; first candidate wins.
        assert_eq!(quantize_to_scale(66, 0, major()).midi, 65);
        // E is already in C major.
        assert_eq!(quantize_to_scale(64, 0, major()).midi, 64);
    }

    #[test]
    fn quantize_respects_root() {
        // In D major (root=2), E is a scale tone but D# snaps to D or E.
        let quantized = quantize_to_scale(63, 2, major()).midi;
        assert!(quantized == 62 || quantized == 64);
    }

    #[test]
    fn ratio_intervals_convert_to_cents() {
        let fifth = Interval::from_ratio(3, 2);
        let cents = interval_to_cents(&fifth);
        assert!((cents - 701.955).abs() < 0.001);
    }

    #[test]
    fn resolved_pitch_clamps_to_midi_range() {
        assert_eq!(resolved_pitch_from_cents(-500.0).midi, 0);
        assert_eq!(resolved_pitch_from_cents(20_000.0).midi, 127);
    }
}
