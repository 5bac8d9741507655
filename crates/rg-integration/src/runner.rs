//! Engine that integrates the guest core with the host frontend
//!
//! This module provides the [`Engine`] which ties together:
//! - The cooperative host/guest scheduler
//! - The translation cache
//! - Content loading and backup storage
//! - The snapshot codec
//! - The frame-synchronized run loop

use crate::guest::{
    ExecutionMode, GuestCore, BASE_CLOCK_HZ, CYCLES_PER_FRAME, SCREEN_HEIGHT, SCREEN_PITCH,
    SCREEN_WIDTH, SOUND_FREQUENCY,
};
use crate::host::{
    AvInfo, Geometry, Host, HostLogLevel, MemoryId, PerfCounter, PixelFormat, Region, SystemInfo,
    Timing, VideoFrame,
};
use crate::loader::{ContentPaths, GameLoader};
use crate::options::{EngineOptions, CORE_OPTIONS};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rg_core::error::SnapshotError;
use rg_core::{
    Config, ContextId, ContextState, EngineError, GuestYield, Result, Scheduler, SchedulerStats,
    SnapshotCodec, SnapshotFormat,
};
use rg_memory::{CacheStats, TranslationCache};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Library name reported to the host
pub const LIBRARY_NAME: &str = "retro-gba";

/// Frontend API revision implemented by the engine
pub const API_VERSION: u32 = 1;

/// Prefix of messages forwarded to the host's log sink
const HOST_LOG_PREFIX: &str = "[retro-gba]: ";

/// State shared between the host and the guest context
pub struct Machine<G> {
    pub core: G,
    pub cache: TranslationCache,
    translate: bool,
}

/// Guest context entry procedure: one frame per activation
fn guest_entry<G: GuestCore>(machine: Arc<Mutex<Machine<G>>>, yielder: GuestYield) {
    tracing::debug!("Guest context started");
    loop {
        {
            let mut guard = machine.lock();
            let Machine {
                core,
                cache,
                translate,
            } = &mut *guard;

            let mode = if *translate && cache.is_active() {
                ExecutionMode::Translate(cache)
            } else {
                ExecutionMode::Interpret
            };
            tracing::trace!(translating = mode.is_translating(), "Guest frame");
            core.run_frame(mode);
        }

        if let Err(e) = yielder.switch_to_host() {
            tracing::debug!("Guest context leaving: {}", e);
            break;
        }
    }
}

/// Emulation engine driven by a host frontend
pub struct Engine<H: Host, G: GuestCore> {
    /// Configuration
    config: Config,
    /// Frontend
    host: H,
    /// Guest core and translation cache
    machine: Arc<Mutex<Machine<G>>>,
    /// Host/guest context pair
    scheduler: Scheduler,
    /// Content path resolution and image loading
    loader: GameLoader,
    /// Snapshot blob codec
    codec: SnapshotCodec,
    /// Options resolved from the host
    options: EngineOptions,
    /// Paths of the loaded game, `None` when not loaded
    content: Option<ContentPaths>,
    /// Frames emitted since load
    frame_count: u64,
    /// Audio drained from the guest each frame
    audio: Vec<i16>,
    /// `run_frame` timing
    frame_perf: PerfCounter,
}

impl<H: Host, G: GuestCore> Engine<H, G> {
    /// Create a new engine around `host` and `core`
    pub fn new(config: Config, host: H, core: G) -> Self {
        tracing::info!("Initializing {} engine", LIBRARY_NAME);

        let machine = Machine {
            core,
            cache: TranslationCache::new(config.cache),
            translate: false,
        };

        Self {
            scheduler: Scheduler::new(config.cpu.guest_stack_size),
            loader: GameLoader::new(config.paths.clone()),
            codec: SnapshotCodec::default(),
            options: EngineOptions::from_config(&config),
            machine: Arc::new(Mutex::new(machine)),
            content: None,
            frame_count: 0,
            audio: Vec::new(),
            frame_perf: PerfCounter {
                name: "run_frame",
                calls: 0,
                total: Duration::ZERO,
            },
            config,
            host,
        }
    }

    /// Static description of the engine
    pub fn system_info() -> SystemInfo {
        SystemInfo {
            library_name: LIBRARY_NAME,
            library_version: env!("CARGO_PKG_VERSION"),
            need_fullpath: true,
            block_extract: false,
            valid_extensions: "gba|bin|agb|gbz",
        }
    }

    /// Output geometry and timing
    pub fn av_info() -> AvInfo {
        AvInfo {
            geometry: Geometry {
                base_width: SCREEN_WIDTH,
                base_height: SCREEN_HEIGHT,
                max_width: SCREEN_WIDTH,
                max_height: SCREEN_HEIGHT,
                aspect_ratio: 0.0,
            },
            timing: Timing {
                fps: BASE_CLOCK_HZ as f64 / CYCLES_PER_FRAME as f64,
                sample_rate: SOUND_FREQUENCY as f64,
            },
        }
    }

    pub fn region() -> Region {
        Region::Ntsc
    }

    pub fn api_version() -> u32 {
        API_VERSION
    }

    /// Process-wide setup
    pub fn init(&mut self) {
        self.machine.lock().core.init();
        tracing::debug!("Engine initialized");
    }

    /// Declare the engine's options to the host
    pub fn set_environment(&mut self) {
        self.host.set_variables(CORE_OPTIONS);
    }

    /// Process-wide teardown
    pub fn deinit(&mut self) {
        if self.content.is_some() {
            self.unload_game();
        }

        self.host.perf_log(std::slice::from_ref(&self.frame_perf));

        let mut machine = self.machine.lock();
        machine.core.shutdown();
        machine.cache.teardown();
        tracing::debug!("Engine deinitialized");
    }

    fn host_log(&mut self, level: HostLogLevel, message: &str) {
        self.host.log(level, &format!("{}{}", HOST_LOG_PREFIX, message));
    }

    /// Load the game at `path`. On failure the engine is left not-loaded.
    pub fn load_game(&mut self, path: &Path) -> bool {
        if self.content.is_some() {
            self.unload_game();
        }

        tracing::info!("Loading game: {}", path.display());
        match self.try_load_game(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to load {}: {}", path.display(), e);
                self.host_log(HostLogLevel::Error, &e.to_string());

                self.scheduler.destroy();
                self.machine.lock().cache.teardown();
                self.content = None;
                false
            }
        }
    }

    fn try_load_game(&mut self, path: &Path) -> Result<()> {
        self.options.resolve(&self.host, true);
        let translate = self.options.translation;

        {
            let mut machine = self.machine.lock();
            machine.cache.teardown();
            let active = machine.cache.activate(translate)?;
            machine.translate = active;
        }

        if !self.host.set_pixel_format(PixelFormat::Rgb565) {
            tracing::info!("Host refused RGB565 output");
            self.host_log(HostLogLevel::Info, "RGB565 is not supported.");
        }

        let paths = self.loader.resolve_paths(&self.host, path);

        let bios = self.loader.load_bios(&paths.bios_path)?;
        if !bios.looks_official() {
            tracing::info!("BIOS at {} may be unofficial", bios.path.display());
            self.host_log(HostLogLevel::Info, "You have an incorrect BIOS image.");
            self.host_log(
                HostLogLevel::Info,
                "While many games will work fine, some will not.",
            );
            self.host_log(
                HostLogLevel::Info,
                "It is strongly recommended that you obtain the correct BIOS file.",
            );
        }

        let game = self.loader.load_gamepak(path)?;

        let backup = if self.config.general.load_backup {
            GameLoader::read_backup(&paths.backup_path)?
        } else {
            None
        };

        {
            let mut machine = self.machine.lock();
            machine.core.load_bios(&bios);
            machine.core.load_gamepak(&game)?;

            if let Some(data) = backup {
                let memory = machine.core.backup_memory_mut();
                let len = memory.len().min(data.len());
                memory[..len].copy_from_slice(&data[..len]);
                tracing::info!("Loaded backup: {}", paths.backup_path.display());
            }

            machine.core.reset();
            machine.cache.reset();
        }

        self.content = Some(paths);
        self.frame_count = 0;
        self.spawn_guest()?;

        tracing::info!(
            "Game loaded ({})",
            if translate { "dynamic recompiler" } else { "interpreter" }
        );
        Ok(())
    }

    fn spawn_guest(&mut self) -> Result<()> {
        let machine = Arc::clone(&self.machine);
        self.scheduler.create(move |yielder| guest_entry(machine, yielder))
    }

    /// Whether a game is loaded and its guest context exists
    pub fn is_loaded(&self) -> bool {
        self.content.is_some() && self.scheduler.has_guest()
    }

    /// Unsupported; always `false`
    pub fn load_game_special(&mut self, _game_type: u32, _paths: &[&Path]) -> bool {
        false
    }

    pub fn set_controller_port_device(&mut self, port: u32, device: u32) {
        tracing::debug!("Ignoring controller device {} on port {}", device, port);
    }

    /// Tear down the guest context and persist backup memory
    pub fn unload_game(&mut self) {
        self.scheduler.destroy();
        self.flush_backup();
        self.content = None;
        tracing::info!("Game unloaded");
    }

    fn flush_backup(&mut self) {
        if !self.config.general.flush_backup {
            return;
        }
        let Some(paths) = self.content.as_ref() else {
            return;
        };

        let result = {
            let mut machine = self.machine.lock();
            if !machine.core.take_backup_dirty() {
                return;
            }
            GameLoader::write_backup(&paths.backup_path, machine.core.backup_memory())
        };

        if let Err(e) = result {
            let message = format!("Failed to write backup memory: {}", e);
            tracing::warn!("{}", message);
            self.host_log(HostLogLevel::Warn, &message);
        }
    }

    /// Restart the loaded game from power-on defaults
    pub fn reset(&mut self) {
        if self.content.is_none() {
            tracing::warn!("Reset requested with no game loaded");
            return;
        }

        self.scheduler.destroy();
        self.flush_backup();

        {
            let mut machine = self.machine.lock();
            machine.core.reset();
            machine.cache.reset();
        }
        self.frame_count = 0;

        if let Err(e) = self.spawn_guest() {
            tracing::error!("Failed to recreate guest context: {}", e);
            self.host_log(HostLogLevel::Error, &e.to_string());
            self.content = None;
        }
        tracing::debug!("Engine reset");
    }

    /// Run exactly one video frame
    pub fn run(&mut self) -> Result<()> {
        if !self.is_loaded() {
            return Err(EngineError::NotLoaded);
        }

        self.host.poll_input();

        let start = Instant::now();
        self.scheduler.switch_to_guest()?;
        self.frame_perf.calls += 1;
        self.frame_perf.total += start.elapsed();

        let buttons = self.host.joypad_state();
        {
            let mut machine = self.machine.lock();
            machine.core.update_input(buttons);
            machine.core.render_audio(&mut self.audio);
        }
        if !self.audio.is_empty() {
            self.host.audio_sample_batch(&self.audio);
            self.audio.clear();
        }

        {
            let machine = self.machine.lock();
            let frame = VideoFrame {
                pixels: machine.core.screen(),
                width: SCREEN_WIDTH,
                height: SCREEN_HEIGHT,
                pitch: SCREEN_PITCH * 2,
            };
            self.host.video_refresh(&frame);
        }
        self.frame_count += 1;
        tracing::trace!("Frame {} complete", self.frame_count);

        if self.host.variables_updated() {
            self.options.resolve(&self.host, false);
        }
        Ok(())
    }

    /// Snapshots need a loaded game whose guest sits at a frame boundary
    fn check_suspended(&self) -> std::result::Result<(), SnapshotError> {
        match self.scheduler.state(ContextId::Guest) {
            ContextState::Suspended => Ok(()),
            ContextState::Running => Err(SnapshotError::GuestRunning),
            ContextState::Uncreated => Err(SnapshotError::NoGuest),
        }
    }

    /// Fixed snapshot blob size
    pub fn serialize_size(&self) -> usize {
        self.codec.size()
    }

    /// Capture the guest into `buffer`. `buffer` is untouched on failure.
    pub fn serialize(&self, buffer: &mut [u8]) -> bool {
        match self.try_serialize(buffer) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Serialize failed: {}", e);
                false
            }
        }
    }

    pub fn try_serialize(&self, buffer: &mut [u8]) -> std::result::Result<(), SnapshotError> {
        self.check_suspended()?;
        let machine = self.machine.lock();
        self.codec.serialize(&machine.core, buffer)
    }

    /// Restore the guest from `buffer` and invalidate every translation.
    /// The guest and the cache are untouched on failure.
    pub fn unserialize(&mut self, buffer: &[u8]) -> bool {
        match self.try_unserialize(buffer) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Unserialize failed: {}", e);
                false
            }
        }
    }

    pub fn try_unserialize(
        &mut self,
        buffer: &[u8],
    ) -> std::result::Result<SnapshotFormat, SnapshotError> {
        self.check_suspended()?;
        let mut guard = self.machine.lock();
        let machine = &mut *guard;
        let format = self.codec.restore(&mut machine.core, buffer)?;
        machine.cache.reset();
        Ok(format)
    }

    /// Host-visible memory for `id`, if the engine exposes it
    pub fn memory_data(&self, id: MemoryId) -> Option<MappedMutexGuard<'_, [u8]>> {
        match id {
            MemoryId::SaveRam => Some(MutexGuard::map(self.machine.lock(), |machine| {
                machine.core.backup_memory_mut()
            })),
            _ => None,
        }
    }

    pub fn memory_size(&self, id: MemoryId) -> usize {
        match id {
            MemoryId::SaveRam => self.machine.lock().core.backup_memory().len(),
            _ => 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Paths of the loaded game
    pub fn content(&self) -> Option<&ContentPaths> {
        self.content.as_ref()
    }

    /// Frames emitted since the game was loaded or reset
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn guest_state(&self) -> ContextState {
        self.scheduler.state(ContextId::Guest)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.machine.lock().cache.stats()
    }

    /// Performance counters reported at `deinit`
    pub fn perf_counters(&self) -> &[PerfCounter] {
        std::slice::from_ref(&self.frame_perf)
    }

    /// Inspect the machine while the guest is suspended
    pub fn with_machine<R>(&self, f: impl FnOnce(&Machine<G>) -> R) -> R {
        f(&*self.machine.lock())
    }
}

impl<H: Host, G: GuestCore> Drop for Engine<H, G> {
    fn drop(&mut self) {
        self.scheduler.destroy();
    }
}
