//! Completion consumer: mailbox polling, watchdog pump, restart
//! orchestration, and UI state publication.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, trace};

use ostinato_host::Watchdog;
use ostinato_shm::{ShmHeader, UI_MAX_TRACKS};

use crate::engine::{connect_track_host, EngineShared};
use crate::mix::{AudioMixer, TrackMixSource};
use crate::runtime::TrackRuntime;
use crate::ui_region::UiTransportState;

/// Per-track consumer state that never crosses threads.
struct ConsumerTrackState {
    watchdog: Watchdog,
}

/// Consumer thread body: one tick per block period.
pub fn consumer_loop(shared: &Arc<EngineShared>, mixer: &Arc<Mutex<AudioMixer>>) {
    let block_duration = shared.config.block_duration();
    let mut states: std::collections::HashMap<u32, ConsumerTrackState> =
        std::collections::HashMap::new();
    let mut last_harmony_version = u32::MAX;

    while shared.running.get() {
        std::thread::sleep(block_duration);
        consumer_tick(shared, mixer, &mut states, &mut last_harmony_version);
    }
    trace!("consumer thread exiting");
}

fn consumer_tick(
    shared: &Arc<EngineShared>,
    mixer: &Arc<Mutex<AudioMixer>>,
    states: &mut std::collections::HashMap<u32, ConsumerTrackState>,
    last_harmony_version: &mut u32,
) {
    let tracks = shared.snapshot_tracks();

    for track in &tracks {
        let state = states.entry(track.track_id).or_insert_with(|| {
            ConsumerTrackState {
                watchdog: new_watchdog(shared, track),
            }
        });

        if track.needs_restart.swap(false) {
            restart_track(shared, track, &mut state.watchdog);
            rebuild_mix_sources(shared, &mixer.lock());
            continue;
        }
        if !track.host_ready.get() || !track.active.get() {
            continue;
        }
        let expected = shared
            .next_block_id
            .load(Ordering::Acquire)
            .saturating_sub(1);
        if expected == 0 {
            continue;
        }
        let controller = track.controller.lock();
        if let Some(mailbox) = controller.mailbox() {
            state.watchdog.check(mailbox, expected);
        }
    }

    publish_ui_state(shared, &tracks, last_harmony_version);
}

/// Watchdog whose restart callback arms the track's restart flag.
pub fn new_watchdog(shared: &Arc<EngineShared>, track: &Arc<TrackRuntime>) -> Watchdog {
    let flag = Arc::downgrade(track);
    Watchdog::new(shared.config.hard_timeout_blocks, move || {
        if let Some(track) = flag.upgrade() {
            track.needs_restart.set(true);
        }
    })
}

/// Relaunch a hung host: mark the runtime inactive, spawn and rebind,
/// reset the block timeline, and re-enqueue the mirror replay.
fn restart_track(shared: &Arc<EngineShared>, track: &Arc<TrackRuntime>, watchdog: &mut Watchdog) {
    info!(track = track.track_id, "restarting host");
    track.host_ready.set(false);
    track.active.set(false);

    match connect_track_host(shared, track) {
        Ok(()) => {
            // Block ids restart at 1 and the playhead returns to the loop
            // start; the producer sees this at its next iteration.
            shared.next_block_id.store(1, Ordering::Release);
            shared.audio_playback_block_id.store(0, Ordering::Release);
            shared.reset_timeline.set(true);
            watchdog.reset();
            if !track.mirror.is_empty() {
                track.mirror.enqueue_replay();
            }
            info!(track = track.track_id, "host restarted");
        }
        Err(e) => {
            error!(track = track.track_id, error = %e, "host restart failed");
        }
    }
}

/// Rebuild the audio callback's bindings from the live controllers.
pub fn rebuild_mix_sources(shared: &Arc<EngineShared>, mixer: &AudioMixer) {
    let tracks = shared.snapshot_tracks();
    let mut sources = Vec::with_capacity(tracks.len());
    let mut meters = Vec::with_capacity(tracks.len());
    for track in &tracks {
        let controller = track.controller.lock();
        let (Some(region), Some(mailbox_offset)) = (controller.region(), controller.mailbox_offset())
        else {
            meters.push(Arc::new(crate::mix::TrackMeter::default()));
            continue;
        };
        let header = unsafe { region.at::<ShmHeader>(0) };
        let meter = Arc::new(crate::mix::TrackMeter::default());
        meters.push(Arc::clone(&meter));
        sources.push(TrackMixSource {
            track_id: track.track_id,
            audio_out_offset: header.audio_out_offset,
            channel_stride_bytes: header.channel_stride_bytes,
            num_channels_out: header.num_channels_out,
            num_blocks: header.num_blocks,
            mailbox_offset,
            region,
            host_ready: track.host_ready_arc(),
            active: track.active_arc(),
            meter,
        });
    }
    mixer.update_tracks(sources);
    *shared.meters.lock() = meters;
}

/// Publish playhead, versions, meters, and the harmony snapshot under the
/// double-bump counter.
fn publish_ui_state(
    shared: &Arc<EngineShared>,
    tracks: &[Arc<TrackRuntime>],
    last_harmony_version: &mut u32,
) {
    let mut visual_sample_count = u64::MAX;
    let mut any_active = false;
    for track in tracks {
        if !track.active.get() {
            continue;
        }
        let controller = track.controller.lock();
        if let Some(mailbox) = controller.mailbox() {
            let completed = mailbox.completed_sample_time.load(Ordering::Acquire);
            visual_sample_count =
                visual_sample_count.min(shared.latency.compensated_start(completed));
            any_active = true;
        }
    }
    if !any_active {
        visual_sample_count = 0;
    }

    let mut track_peak_rms = [0.0f32; UI_MAX_TRACKS];
    for (index, meter) in shared.meters.lock().iter().take(UI_MAX_TRACKS).enumerate() {
        track_peak_rms[index] = meter.peak();
    }

    let clip_version = tracks.first().map(|t| t.clip_version()).unwrap_or(0);
    let harmony_version = shared.harmony_version_now();
    shared.ui.publish_transport(&UiTransportState {
        visual_sample_count,
        global_nanotick_playhead: shared.transport_nanotick.get(),
        track_count: tracks.len() as u32,
        transport_playing: shared.playing.get(),
        clip_version,
        harmony_version,
        track_peak_rms,
    });

    if harmony_version != *last_harmony_version {
        let events = shared.harmony_snapshot.load_full();
        shared.ui.publish_harmony(&events, harmony_version);
        *last_harmony_version = harmony_version;
    }
}
