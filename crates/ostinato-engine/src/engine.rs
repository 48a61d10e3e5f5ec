//! Engine assembly: shared state, thread spawn/join, environment wiring.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{error, info};

use ostinato_core::{
    AtomicFlag, AtomicU64Cell, EngineConfig, LatencyManager, LoopRange, StaticTempoProvider,
    NANOTICKS_PER_QUARTER,
};
use ostinato_host::{HostConfig, PluginCache};
use ostinato_model::{HarmonyEvent, HarmonyTimeline, UndoEntry};
use ostinato_patcher::{PatcherGraphState, PresetLibrary, WorkerPool};

use crate::consumer::consumer_loop;
use crate::error::{Error, Result};
use crate::mix::{AudioMixer, TrackMeter};
use crate::producer::producer_loop;
use crate::runtime::TrackRuntime;
use crate::ui::ui_loop;
use crate::ui_region::UiRegion;

/// Default loop length when none is set: four bars of 4/4.
pub const DEFAULT_PATTERN_TICKS: u64 = NANOTICKS_PER_QUARTER * 16;

/// How the engine process was asked to run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub socket_prefix: String,
    /// Explicit socket path for the primary track (`--socket`).
    pub socket_override: Option<std::path::PathBuf>,
    pub host_binary: std::path::PathBuf,
    pub plugin_path: Option<std::path::PathBuf>,
    /// Connect to an externally started host instead of spawning one.
    pub no_spawn: bool,
    pub run_seconds: Option<u64>,
    pub test_mode: bool,
    pub ui_shm_name: String,
    pub patcher_parallel: bool,
    pub patcher_parallel_threads: usize,
    pub plugin_cache_path: std::path::PathBuf,
    pub preset_dir: std::path::PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            socket_prefix: std::env::temp_dir()
                .join("ostinato_host")
                .to_string_lossy()
                .into_owned(),
            socket_override: None,
            host_binary: "./ostinato-host-process".into(),
            plugin_path: None,
            no_spawn: false,
            run_seconds: None,
            test_mode: false,
            ui_shm_name: "ostinato_ui".to_string(),
            patcher_parallel: false,
            patcher_parallel_threads: 2,
            plugin_cache_path: "plugin_cache.json".into(),
            preset_dir: "patcher_presets".into(),
        }
    }
}

impl EngineOptions {
    /// Apply the `OSTINATO_*` environment contracts over the defaults.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(prefix) = std::env::var("OSTINATO_HOST_SOCKET_PREFIX") {
            options.socket_prefix = prefix;
        }
        if let Ok(name) = std::env::var("OSTINATO_UI_SHM_NAME") {
            options.ui_shm_name = name;
        }
        if std::env::var("OSTINATO_ENGINE_TEST_MODE").is_ok_and(|v| v == "1") {
            options.test_mode = true;
        }
        if std::env::var("OSTINATO_PATCHER_PARALLEL").is_ok_and(|v| v == "1") {
            options.patcher_parallel = true;
        }
        if let Ok(threads) = std::env::var("OSTINATO_PATCHER_PARALLEL_THREADS") {
            if let Ok(threads) = threads.parse() {
                options.patcher_parallel_threads = threads;
            }
        }
        if let Ok(path) = std::env::var("OSTINATO_PLUGIN_CACHE") {
            options.plugin_cache_path = path.into();
        }
        options
    }

    pub fn socket_path_for_track(&self, track_id: u32) -> std::path::PathBuf {
        if track_id == 0 {
            if let Some(path) = &self.socket_override {
                return path.clone();
            }
        }
        std::path::PathBuf::from(format!("{}_{track_id}.sock", self.socket_prefix))
    }
}

/// State shared by every engine thread.
pub struct EngineShared {
    pub config: EngineConfig,
    pub tempo: StaticTempoProvider,
    pub latency: LatencyManager,

    pub running: AtomicFlag,
    pub playing: AtomicFlag,
    pub reset_timeline: AtomicFlag,
    pub transport_nanotick: AtomicU64Cell,
    /// Next block to issue; block ids start at 1.
    pub next_block_id: AtomicU32,
    pub audio_playback_block_id: Arc<AtomicU32>,
    pub loop_start_nanotick: AtomicU64Cell,
    pub loop_end_nanotick: AtomicU64Cell,
    pub pattern_ticks: u64,

    pub tracks: Mutex<Vec<Arc<TrackRuntime>>>,
    pub meters: Mutex<Vec<Arc<TrackMeter>>>,
    pub patcher: PatcherGraphState,

    pub harmony: Mutex<HarmonyTimeline>,
    pub harmony_snapshot: ArcSwap<Vec<HarmonyEvent>>,
    pub harmony_version: AtomicU32,

    pub undo_stack: Mutex<Vec<UndoEntry>>,
    pub redo_stack: Mutex<Vec<UndoEntry>>,

    pub ui: UiRegion,
    pub ui_out_drops: AtomicU64Cell,
    pub ui_out_last_warn: Mutex<Option<std::time::Instant>>,

    pub preset_library: PresetLibrary,
    pub plugin_cache: PluginCache,
    pub options: EngineOptions,
}

impl EngineShared {
    pub fn new(config: EngineConfig, options: EngineOptions) -> Result<Arc<Self>> {
        config.validate()?;
        let ui = UiRegion::create(&options.ui_shm_name, &config)?;
        let plugin_cache = PluginCache::read_or_empty(&options.plugin_cache_path);
        let latency = LatencyManager::new(config.block_size, config.num_blocks);
        Ok(Arc::new(Self {
            tempo: StaticTempoProvider::default(),
            latency,
            running: AtomicFlag::new(true),
            playing: AtomicFlag::new(false),
            reset_timeline: AtomicFlag::new(false),
            transport_nanotick: AtomicU64Cell::new(0),
            next_block_id: AtomicU32::new(1),
            audio_playback_block_id: Arc::new(AtomicU32::new(0)),
            loop_start_nanotick: AtomicU64Cell::new(0),
            loop_end_nanotick: AtomicU64Cell::new(DEFAULT_PATTERN_TICKS),
            pattern_ticks: DEFAULT_PATTERN_TICKS,
            tracks: Mutex::new(Vec::new()),
            meters: Mutex::new(Vec::new()),
            patcher: PatcherGraphState::new(),
            harmony: Mutex::new(HarmonyTimeline::new()),
            harmony_snapshot: ArcSwap::from_pointee(Vec::new()),
            harmony_version: AtomicU32::new(0),
            undo_stack: Mutex::new(Vec::new()),
            redo_stack: Mutex::new(Vec::new()),
            ui,
            ui_out_drops: AtomicU64Cell::new(0),
            ui_out_last_warn: Mutex::new(None),
            preset_library: PresetLibrary::new(&options.preset_dir),
            plugin_cache,
            options,
            config,
        }))
    }

    pub fn track(&self, track_id: u32) -> Option<Arc<TrackRuntime>> {
        self.tracks
            .lock()
            .iter()
            .find(|t| t.track_id == track_id)
            .cloned()
    }

    pub fn track_exists(&self, track_id: u32) -> bool {
        self.tracks.lock().iter().any(|t| t.track_id == track_id)
    }

    pub fn snapshot_tracks(&self) -> Vec<Arc<TrackRuntime>> {
        self.tracks.lock().clone()
    }

    pub fn loop_range(&self) -> LoopRange {
        LoopRange::new_or_fallback(
            self.loop_start_nanotick.get(),
            self.loop_end_nanotick.get(),
            self.pattern_ticks,
        )
    }

    pub fn set_loop_range(&self, start: u64, end: u64) -> bool {
        if end <= start {
            return false;
        }
        self.loop_start_nanotick.set(start);
        self.loop_end_nanotick.set(end);
        let current = self.transport_nanotick.get();
        if current < start || current >= end {
            self.transport_nanotick.set(start);
        }
        true
    }

    pub fn harmony_version_now(&self) -> u32 {
        self.harmony_version.load(Ordering::Acquire)
    }

    pub fn bump_harmony_version(&self) -> u32 {
        self.harmony_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Rebuild the producer's harmony snapshot after a timeline edit. The
    /// caller holds the harmony mutex.
    pub fn publish_harmony_snapshot(&self, timeline: &HarmonyTimeline) {
        self.harmony_snapshot
            .store(Arc::new(timeline.events().to_vec()));
    }

    /// Add a fresh track runtime. Host wiring happens separately.
    pub fn add_track(&self) -> Arc<TrackRuntime> {
        let mut tracks = self.tracks.lock();
        let track_id = tracks.len() as u32;
        let runtime = TrackRuntime::new(track_id);
        tracks.push(Arc::clone(&runtime));
        runtime
    }

    /// Stop every thread at its next sleep boundary.
    pub fn shutdown(&self) {
        self.running.set(false);
    }
}

/// A running engine: shared state plus joined-on-drop threads.
pub struct Engine {
    pub shared: Arc<EngineShared>,
    pub mixer: Arc<Mutex<AudioMixer>>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl Engine {
    /// Build shared state, launch the per-track hosts, and start the
    /// producer/consumer/ui threads.
    pub fn start(config: EngineConfig, options: EngineOptions) -> Result<Self> {
        let shared = EngineShared::new(config.clone(), options)?;
        // The mixer publishes into the engine-shared playback counter the
        // producer reads for back-pressure.
        let mixer = AudioMixer::new(
            config.block_size,
            config.num_blocks,
            config.mix_gain,
            Arc::clone(&shared.audio_playback_block_id),
        );

        // First track: launch or connect its host. Failure here aborts
        // setup (exit code 1 at the binary level); secondary tracks log
        // and are skipped.
        let primary = shared.add_track();
        install_default_chain(&shared, &primary);
        if let Err(e) = connect_track_host(&shared, &primary) {
            if !shared.options.test_mode {
                return Err(Error::Setup(format!("primary host setup failed: {e}")));
            }
            info!("test mode: continuing without a live host");
        }
        crate::consumer::rebuild_mix_sources(&shared, &mixer);

        let mixer = Arc::new(Mutex::new(mixer));
        let mut threads = Vec::new();

        let pool = shared.options.patcher_parallel.then(|| {
            WorkerPool::new(shared.options.patcher_parallel_threads)
        });
        {
            let shared = Arc::clone(&shared);
            threads.push(
                std::thread::Builder::new()
                    .name("ostinato-producer".into())
                    .spawn(move || producer_loop(&shared, pool))
                    .map_err(|e| Error::Setup(e.to_string()))?,
            );
        }
        {
            let shared = Arc::clone(&shared);
            let mixer = Arc::clone(&mixer);
            threads.push(
                std::thread::Builder::new()
                    .name("ostinato-consumer".into())
                    .spawn(move || consumer_loop(&shared, &mixer))
                    .map_err(|e| Error::Setup(e.to_string()))?,
            );
        }
        {
            let shared = Arc::clone(&shared);
            threads.push(
                std::thread::Builder::new()
                    .name("ostinato-ui".into())
                    .spawn(move || ui_loop(&shared))
                    .map_err(|e| Error::Setup(e.to_string()))?,
            );
        }

        info!(
            block_size = shared.config.block_size,
            sample_rate = shared.config.sample_rate,
            num_blocks = shared.config.num_blocks,
            latency = shared.latency.latency_samples(),
            "engine started"
        );
        Ok(Self {
            shared,
            mixer,
            threads,
        })
    }

    /// Signal shutdown and join every thread.
    pub fn stop(mut self) {
        self.shared.shutdown();
        for track in self.shared.snapshot_tracks() {
            let mut controller = track.controller.lock();
            let _ = controller.send_shutdown();
            controller.disconnect();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        info!("engine stopped");
    }
}

/// A fresh track starts with one instrument device: bound to the plugin
/// cache slot for the configured plugin, the first known instrument, or
/// the direct host slot when the cache cannot resolve anything.
pub fn install_default_chain(shared: &Arc<EngineShared>, runtime: &Arc<TrackRuntime>) {
    use ostinato_model::{Device, HOST_SLOT_DIRECT};

    let slot = shared
        .options
        .plugin_path
        .as_ref()
        .and_then(|path| shared.plugin_cache.resolve_host_slot(&path.to_string_lossy()))
        .or_else(|| shared.plugin_cache.first_instrument_slot())
        .unwrap_or(HOST_SLOT_DIRECT);

    runtime.edit_model(|model| {
        if !model.chain.has_instrument() {
            let _ = model
                .chain
                .add_device(Device::vst_instrument(slot), ostinato_model::DEVICE_ID_AUTO);
        }
    });
    info!(track = runtime.track_id, slot, "default chain installed");
}

/// Launch (or connect to) the host child for a track and mark it ready.
pub fn connect_track_host(shared: &Arc<EngineShared>, runtime: &Arc<TrackRuntime>) -> Result<()> {
    let options = &shared.options;
    let mut config = HostConfig::new(
        options.socket_path_for_track(runtime.track_id),
        options.host_binary.clone(),
    );
    config.plugin_path = options.plugin_path.clone();
    config.engine = shared.config.clone();

    let mut controller = runtime.controller.lock();
    let result = if options.no_spawn && runtime.track_id == 0 {
        controller.connect(&config)
    } else {
        controller.launch(&config)
    };
    match result {
        Ok(()) => {
            runtime.host_ready.set(true);
            info!(track = runtime.track_id, "host ready");
            Ok(())
        }
        Err(e) => {
            runtime.host_ready.set(false);
            error!(track = runtime.track_id, error = %e, "host setup failed");
            Err(e.into())
        }
    }
}
