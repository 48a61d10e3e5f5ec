//! Chord degree expansion, inversion, and deterministic humanization.

use smallvec::SmallVec;

use crate::scale::{interval_to_cents, resolve_degree, resolved_pitch_from_cents, ResolvedPitch, Scale};

/// Chord quality codes carried by clip chord events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChordQuality {
    Mono = 0,
    Triad = 1,
    Tetrad = 2,
}

impl ChordQuality {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Mono,
            1 => Self::Triad,
            _ => Self::Tetrad,
        }
    }
}

/// Stacked-third degrees for a root degree and quality.
pub fn chord_degrees_for_quality(degree: u8, quality: u8) -> SmallVec<[u32; 4]> {
    let degree = u32::from(degree);
    match ChordQuality::from_u8(quality) {
        ChordQuality::Mono => SmallVec::from_slice(&[degree]),
        ChordQuality::Triad => SmallVec::from_slice(&[degree, degree + 2, degree + 4]),
        ChordQuality::Tetrad => SmallVec::from_slice(&[degree, degree + 2, degree + 4, degree + 6]),
    }
}

/// Resolve a chord to concrete pitches, lowest first, applying `inversion`
/// octave lifts to the bass tones.
pub fn resolve_chord_pitches(
    degree: u8,
    quality: u8,
    inversion: u8,
    base_octave: u8,
    root_pc: u32,
    scale: &Scale,
) -> SmallVec<[ResolvedPitch; 4]> {
    let degrees = chord_degrees_for_quality(degree, quality);
    let mut pitches: SmallVec<[ResolvedPitch; 4]> = degrees
        .iter()
        .map(|&d| resolve_degree(d, base_octave, root_pc, scale))
        .collect();
    pitches.sort_by(|a, b| a.absolute_cents.total_cmp(&b.absolute_cents));

    let octave_cents = interval_to_cents(&scale.octave);
    for _ in 0..inversion {
        if pitches.is_empty() {
            break;
        }
        let mut tone = pitches.remove(0);
        tone = resolved_pitch_from_cents(tone.absolute_cents + octave_cents);
        pitches.push(tone);
        pitches.sort_by(|a, b| a.absolute_cents.total_cmp(&b.absolute_cents));
    }

    pitches
}

/// Deterministic jitter in `[-range, range]` from a seed; the same seed
/// always yields the same offset, so renders are bitwise repeatable.
pub fn deterministic_jitter(seed: u32, range: i32) -> i32 {
    if range <= 0 {
        return 0;
    }
    let x = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    let span = range * 2 + 1;
    (x % span as u32) as i32 - range
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleRegistry;

    fn major() -> &'static Scale {
        ScaleRegistry::instance().find(1).unwrap()
    }

    #[test]
    fn quality_expands_stacked_thirds() {
        assert_eq!(chord_degrees_for_quality(1, 0).as_slice(), &[1]);
        assert_eq!(chord_degrees_for_quality(1, 1).as_slice(), &[1, 3, 5]);
        assert_eq!(chord_degrees_for_quality(2, 2).as_slice(), &[2, 4, 6, 8]);
    }

    #[test]
    fn c_major_triad_resolves_c_e_g() {
        let pitches = resolve_chord_pitches(1, 1, 0, 4, 0, major());
        let midi: Vec<u8> = pitches.iter().map(|p| p.midi).collect();
        assert_eq!(midi, vec![60, 64, 67]);
    }

    #[test]
    fn first_inversion_lifts_the_bass() {
        let pitches = resolve_chord_pitches(1, 1, 1, 4, 0, major());
        let midi: Vec<u8> = pitches.iter().map(|p| p.midi).collect();
        assert_eq!(midi, vec![64, 67, 72]);
    }

    #[test]
    fn second_inversion_lifts_two_tones() {
        let pitches = resolve_chord_pitches(1, 1, 2, 4, 0, major());
        let midi: Vec<u8> = pitches.iter().map(|p| p.midi).collect();
        assert_eq!(midi, vec![67, 72, 76]);
    }

    #[test]
    fn tetrad_on_degree_one_is_a_seventh_chord() {
        let pitches = resolve_chord_pitches(1, 2, 0, 4, 0, major());
        let midi: Vec<u8> = pitches.iter().map(|p| p.midi).collect();
        assert_eq!(midi, vec![60, 64, 67, 71]);
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        for seed in 0..200u32 {
            let a = deterministic_jitter(seed, 5);
            let b = deterministic_jitter(seed, 5);
            assert_eq!(a, b);
            assert!((-5..=5).contains(&a));
        }
    }

    #[test]
    fn jitter_zero_range_is_zero() {
        assert_eq!(deterministic_jitter(42, 0), 0);
        assert_eq!(deterministic_jitter(42, -3), 0);
    }
}
