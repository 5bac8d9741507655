//! Guest core boundary
//!
//! The instruction executor, peripherals, audio mixing and backup formats
//! live behind [`GuestCore`]. The engine only drives it one frame at a time
//! and moves its state in and out of snapshots.

use crate::loader::{BiosImage, GameImage};
use rg_core::error::LoaderError;
use rg_core::Snapshottable;
use rg_memory::TranslationCache;

/// LCD width in pixels
pub const SCREEN_WIDTH: u32 = 240;
/// LCD height in pixels
pub const SCREEN_HEIGHT: u32 = 160;
/// Framebuffer row length in pixels
pub const SCREEN_PITCH: usize = 240;

/// Master clock of the handheld (4 × 4.194304 MHz)
pub const BASE_CLOCK_HZ: u32 = 16_777_216;
/// Clocks per video frame (308 dots × 228 lines × 4)
pub const CYCLES_PER_FRAME: u32 = 308 * 228 * 4;
/// Output audio rate
pub const SOUND_FREQUENCY: u32 = 44_100;

/// Key bits reported by the host, active high
pub mod keys {
    pub const A: u16 = 1 << 0;
    pub const B: u16 = 1 << 1;
    pub const SELECT: u16 = 1 << 2;
    pub const START: u16 = 1 << 3;
    pub const RIGHT: u16 = 1 << 4;
    pub const LEFT: u16 = 1 << 5;
    pub const UP: u16 = 1 << 6;
    pub const DOWN: u16 = 1 << 7;
    pub const R: u16 = 1 << 8;
    pub const L: u16 = 1 << 9;
}

/// How the guest executes instructions for a frame
pub enum ExecutionMode<'a> {
    /// Pure interpretation
    Interpret,
    /// Dynamic recompilation into the given cache
    Translate(&'a mut TranslationCache),
}

impl ExecutionMode<'_> {
    pub fn is_translating(&self) -> bool {
        matches!(self, Self::Translate(_))
    }
}

/// Emulated handheld driven by the engine.
///
/// `run_frame` executes on the guest context; every other method is only
/// called from the host context while the guest is suspended.
pub trait GuestCore: Snapshottable + Send + 'static {
    /// Process-wide setup (game-pak buffer, sound)
    fn init(&mut self) {}

    /// Process-wide teardown
    fn shutdown(&mut self) {}

    fn load_bios(&mut self, bios: &BiosImage);

    fn load_gamepak(&mut self, game: &GameImage) -> Result<(), LoaderError>;

    /// Return to power-on defaults, keeping BIOS and game-pak
    fn reset(&mut self);

    /// Execute up to the next frame boundary
    fn run_frame(&mut self, mode: ExecutionMode<'_>);

    /// Latch the host's button state
    fn update_input(&mut self, buttons: u16);

    /// Move mixed samples (interleaved stereo) produced this frame into `out`
    fn render_audio(&mut self, out: &mut Vec<i16>);

    /// Current framebuffer, `SCREEN_PITCH × SCREEN_HEIGHT` RGB565 pixels
    fn screen(&self) -> &[u16];

    /// Battery-backed save memory
    fn backup_memory(&self) -> &[u8];

    fn backup_memory_mut(&mut self) -> &mut [u8];

    /// Whether backup memory changed since the last call; clears the flag
    fn take_backup_dirty(&mut self) -> bool;
}
