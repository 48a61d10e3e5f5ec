//! Clip-window snapshot builder for `RequestClipWindow`.
//!
//! Windows larger than the snapshot caps page across requests: the UI
//! resubmits with the returned `next_event_index` until `complete`.

use ostinato_model::ClipEvent;
use ostinato_shm::{
    UiClipChord, UiClipNote, UiClipSnapshot, UiClipTrack, UI_MAX_CLIP_CHORDS, UI_MAX_CLIP_NOTES,
};

use crate::runtime::TrackRuntime;

pub fn build_clip_window(
    track: &TrackRuntime,
    window_start: u64,
    window_end: u64,
    cursor_event_index: u32,
    request_id: u32,
) -> Box<UiClipSnapshot> {
    let clip = track.clip_snapshot();
    let mut snapshot: Box<UiClipSnapshot> = Box::default();
    snapshot.request_id = request_id;

    let mut note_count = 0usize;
    let mut chord_count = 0usize;
    let mut next_event_index = cursor_event_index as usize;
    let mut complete = true;

    for (index, event) in clip
        .events
        .iter()
        .enumerate()
        .skip(cursor_event_index as usize)
    {
        let tick = event.nanotick();
        if tick < window_start {
            next_event_index = index + 1;
            continue;
        }
        if tick >= window_end {
            next_event_index = index;
            break;
        }
        match event {
            ClipEvent::Note(note) => {
                if note_count >= UI_MAX_CLIP_NOTES {
                    complete = false;
                    next_event_index = index;
                    break;
                }
                snapshot.notes[note_count] = UiClipNote {
                    t_on: note.nanotick,
                    t_off: note.nanotick + note.duration_nanoticks,
                    note_id: note.note_id,
                    pitch: note.pitch,
                    velocity: note.velocity,
                    column: note.column,
                    reserved: 0,
                };
                note_count += 1;
            }
            ClipEvent::Chord(chord) => {
                if chord_count >= UI_MAX_CLIP_CHORDS {
                    complete = false;
                    next_event_index = index;
                    break;
                }
                snapshot.chords[chord_count] = UiClipChord {
                    nanotick: chord.nanotick,
                    duration_nanoticks: chord.duration_nanoticks,
                    spread_nanoticks: chord.spread_nanoticks,
                    humanize_timing: chord.humanize_timing,
                    humanize_velocity: chord.humanize_velocity,
                    chord_id: chord.chord_id,
                    degree: chord.degree,
                    quality: chord.quality,
                    inversion: chord.inversion,
                    base_octave: chord.base_octave,
                    column: u32::from(chord.column),
                };
                chord_count += 1;
            }
            ClipEvent::Param(_) => {}
        }
        next_event_index = index + 1;
    }

    snapshot.track_count = 1;
    snapshot.note_count = note_count as u32;
    snapshot.chord_count = chord_count as u32;
    snapshot.next_event_index = next_event_index as u32;
    snapshot.complete = u32::from(complete);
    snapshot.tracks[0] = UiClipTrack {
        track_id: track.track_id,
        note_offset: 0,
        note_count: note_count as u32,
        chord_offset: 0,
        chord_count: chord_count as u32,
        reserved: 0,
        clip_start_nanotick: window_start,
        clip_end_nanotick: window_end,
    };
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_with_notes(count: u64) -> std::sync::Arc<TrackRuntime> {
        let track = TrackRuntime::new(0);
        track.edit_model(|model| {
            for i in 0..count {
                model
                    .clip
                    .write_note(i * 1000, 500, 60, 100, (i % 4) as u8, None);
            }
        });
        track
    }

    #[test]
    fn window_filters_by_range() {
        let track = track_with_notes(10);
        let snapshot = build_clip_window(&track, 2000, 5000, 0, 7);
        assert_eq!(snapshot.note_count, 3);
        assert_eq!(snapshot.request_id, 7);
        assert_eq!(snapshot.complete, 1);
        assert_eq!(snapshot.tracks[0].clip_start_nanotick, 2000);
        assert_eq!(snapshot.notes[0].t_on, 2000);
        assert_eq!(snapshot.notes[2].t_on, 4000);
    }

    #[test]
    fn cursor_resumes_iteration() {
        let track = track_with_notes(10);
        let first = build_clip_window(&track, 0, 100_000, 0, 1);
        assert_eq!(first.note_count, 10);
        let resumed = build_clip_window(&track, 0, 100_000, 5, 2);
        assert_eq!(resumed.note_count, 5);
        assert_eq!(resumed.notes[0].t_on, 5000);
    }

    #[test]
    fn chords_land_in_their_own_pool() {
        let track = TrackRuntime::new(0);
        track.edit_model(|model| {
            model.clip.write_note(0, 500, 60, 100, 0, None);
            model.clip.write_chord(1000, 960, 1, 1, 0, 4, 1, 0, 0, 0, None);
        });
        let snapshot = build_clip_window(&track, 0, 10_000, 0, 1);
        assert_eq!(snapshot.note_count, 1);
        assert_eq!(snapshot.chord_count, 1);
        assert_eq!(snapshot.chords[0].chord_id, 0);
        assert_eq!(snapshot.chords[0].column, 1);
    }
}
