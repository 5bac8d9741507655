//! Null guest core (test pattern only)
//!
//! A deterministic stand-in for the real CPU/peripheral core. It renders a
//! pattern derived from the loaded images, the frame counter and the latched
//! input, produces a square-wave tone, and writes to backup memory while
//! START is held. Everything it does is reproducible from its snapshot.

use crate::guest::{
    keys, ExecutionMode, GuestCore, BASE_CLOCK_HZ, CYCLES_PER_FRAME, SCREEN_HEIGHT,
    SCREEN_PITCH, SOUND_FREQUENCY,
};
use crate::loader::{BiosImage, GameImage};
use rg_core::error::{LoaderError, SnapshotError};
use rg_core::{Snapshottable, StateReader, StateWriter};
use rg_memory::RegionKind;

/// SRAM backup size
pub const NULL_CORE_BACKUP_SIZE: usize = 0x8000;

/// Game-pak entry point
const ROM_ENTRY_PC: u32 = 0x0800_0000;

const SCREEN_PIXELS: usize = SCREEN_PITCH * SCREEN_HEIGHT as usize;

/// Stereo sample pairs per frame
const SAMPLES_PER_FRAME: usize =
    (SOUND_FREQUENCY as u64 * CYCLES_PER_FRAME as u64 / BASE_CLOCK_HZ as u64) as usize;

/// Deterministic test-pattern guest
pub struct NullCore {
    bios: Vec<u8>,
    rom: Vec<u8>,
    frame: u32,
    cycles: u64,
    buttons: u16,
    seed: u32,
    lfsr: u32,
    audio_phase: u32,
    screen: Vec<u16>,
    backup: Vec<u8>,
    backup_dirty: bool,
    audio: Vec<i16>,
}

impl NullCore {
    pub fn new() -> Self {
        Self {
            bios: Vec::new(),
            rom: Vec::new(),
            frame: 0,
            cycles: 0,
            buttons: 0,
            seed: 0,
            lfsr: 1,
            audio_phase: 0,
            screen: vec![0; SCREEN_PIXELS],
            backup: vec![0xFF; NULL_CORE_BACKUP_SIZE],
            backup_dirty: false,
            audio: Vec::with_capacity(SAMPLES_PER_FRAME * 2),
        }
    }

    /// Frames executed since the last reset
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Guest clock cycles executed since the last reset
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn fold(seed: u32, bytes: &[u8]) -> u32 {
        bytes.iter().fold(seed, |acc, &b| acc.rotate_left(5) ^ b as u32)
    }

    fn update_seed(&mut self) {
        let bios = &self.bios[..self.bios.len().min(0x100)];
        let header = &self.rom[..self.rom.len().min(0xC0)];
        self.seed = Self::fold(Self::fold(0x9E37_79B9, bios), header);
    }

    fn step_lfsr(&mut self) {
        let mut x = self.lfsr;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.lfsr = x;
    }

    fn draw(&mut self) {
        let frame = self.frame;
        let buttons = self.buttons as u32;
        let noise = self.lfsr ^ self.seed;

        for (y, row) in self.screen.chunks_exact_mut(SCREEN_PITCH).enumerate() {
            let y = y as u32;
            for (x, pixel) in row.iter_mut().enumerate() {
                let x = x as u32;
                let r = (x + frame) & 0x1F;
                let g = (y * 2 + buttons) & 0x3F;
                let b = ((noise >> ((x ^ y) & 15)) ^ (x >> 3)) & 0x1F;
                *pixel = ((r << 11) | (g << 5) | b) as u16;
            }
        }
    }

    fn mix(&mut self) {
        // Tone pitch follows the d-pad so input is audible
        let period = 100 + ((self.buttons & 0xF0) as u32 >> 2);
        for _ in 0..SAMPLES_PER_FRAME {
            let high = (self.audio_phase % period) < period / 2;
            let sample = if high { 0x0800 } else { -0x0800 };
            self.audio.push(sample);
            self.audio.push(sample);
            self.audio_phase = self.audio_phase.wrapping_add(1);
        }
    }

    fn translate(&mut self, cache: &mut rg_memory::TranslationCache) {
        // Stand-in for a compiled block: the frame number
        let block = self.frame.to_le_bytes();
        if cache.emit(RegionKind::Ram, &block).is_err() {
            if let Some(region) = cache.region_mut(RegionKind::Ram) {
                region.reset();
            }
            if let Err(e) = cache.emit(RegionKind::Ram, &block) {
                tracing::warn!("Dropping translated block: {}", e);
            }
        }

        let gates = cache.gates_mut();
        if !gates.contains(ROM_ENTRY_PC) {
            if let Err(e) = gates.push(ROM_ENTRY_PC) {
                tracing::warn!("Entry gate not recorded: {}", e);
            }
        }
        gates.set_idle_loop_target(Some(ROM_ENTRY_PC + 0x1C0));
    }
}

impl Default for NullCore {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestCore for NullCore {
    fn load_bios(&mut self, bios: &BiosImage) {
        self.bios = bios.data.clone();
        self.update_seed();
    }

    fn load_gamepak(&mut self, game: &GameImage) -> Result<(), LoaderError> {
        if game.data.is_empty() {
            return Err(LoaderError::InvalidGame("empty image".to_string()));
        }
        self.rom = game.data.clone();
        self.update_seed();
        Ok(())
    }

    fn reset(&mut self) {
        self.frame = 0;
        self.cycles = 0;
        self.buttons = 0;
        self.lfsr = self.seed | 1;
        self.audio_phase = 0;
        self.screen.fill(0);
        self.audio.clear();
        tracing::debug!("Null core reset (seed {:#010x})", self.seed);
    }

    fn run_frame(&mut self, mode: ExecutionMode<'_>) {
        if let ExecutionMode::Translate(cache) = mode {
            self.translate(cache);
        }

        self.step_lfsr();
        self.frame = self.frame.wrapping_add(1);
        self.cycles += CYCLES_PER_FRAME as u64;
        self.draw();
        self.mix();

        if self.buttons & keys::START != 0 {
            self.backup[..4].copy_from_slice(&self.frame.to_le_bytes());
            self.backup_dirty = true;
        }
    }

    fn update_input(&mut self, buttons: u16) {
        self.buttons = buttons;
    }

    fn render_audio(&mut self, out: &mut Vec<i16>) {
        out.append(&mut self.audio);
    }

    fn screen(&self) -> &[u16] {
        &self.screen
    }

    fn backup_memory(&self) -> &[u8] {
        &self.backup
    }

    fn backup_memory_mut(&mut self) -> &mut [u8] {
        &mut self.backup
    }

    fn take_backup_dirty(&mut self) -> bool {
        std::mem::take(&mut self.backup_dirty)
    }
}

impl Snapshottable for NullCore {
    fn save_state(&self, out: &mut [u8]) -> Result<usize, SnapshotError> {
        let mut writer = StateWriter::new(out);
        writer.put_u32(self.frame)?;
        writer.put_u64(self.cycles)?;
        writer.put_u16(self.buttons)?;
        writer.put_u32(self.seed)?;
        writer.put_u32(self.lfsr)?;
        writer.put_u32(self.audio_phase)?;
        writer.put_u32(self.backup.len() as u32)?;
        writer.put_bytes(&self.backup)?;
        writer.put_u32(self.screen.len() as u32)?;
        for &pixel in &self.screen {
            writer.put_u16(pixel)?;
        }
        Ok(writer.position())
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mut reader = StateReader::new(data);
        let frame = reader.get_u32()?;
        let cycles = reader.get_u64()?;
        let buttons = reader.get_u16()?;
        let seed = reader.get_u32()?;
        let lfsr = reader.get_u32()?;
        let audio_phase = reader.get_u32()?;

        let backup_len = reader.get_u32()? as usize;
        if backup_len != self.backup.len() {
            return Err(SnapshotError::Corrupt(format!(
                "backup size {} does not match {}",
                backup_len,
                self.backup.len()
            )));
        }
        let backup = reader.get_bytes(backup_len)?;

        let screen_len = reader.get_u32()? as usize;
        if screen_len != SCREEN_PIXELS {
            return Err(SnapshotError::Corrupt(format!(
                "screen size {} does not match {}",
                screen_len, SCREEN_PIXELS
            )));
        }
        let screen = reader.get_bytes(screen_len * 2)?;

        self.frame = frame;
        self.cycles = cycles;
        self.buttons = buttons;
        self.seed = seed;
        self.lfsr = lfsr;
        self.audio_phase = audio_phase;
        if self.backup[..] != backup[..] {
            self.backup.copy_from_slice(backup);
            self.backup_dirty = true;
        }
        for (pixel, bytes) in self.screen.iter_mut().zip(screen.chunks_exact(2)) {
            *pixel = u16::from_le_bytes([bytes[0], bytes[1]]);
        }
        self.audio.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rg_core::config::CacheConfig;
    use rg_memory::TranslationCache;
    use std::path::PathBuf;

    fn loaded_core() -> NullCore {
        let mut core = NullCore::new();
        core.load_bios(&BiosImage {
            path: PathBuf::from("bios"),
            data: vec![0x18; 0x4000],
        });
        let mut rom = vec![0u8; 0xC0];
        rom[0xA0..0xA4].copy_from_slice(b"TEST");
        core.load_gamepak(&GameImage {
            path: PathBuf::from("game.gba"),
            data: rom,
            header: Default::default(),
        })
        .unwrap();
        core.reset();
        core
    }

    #[test]
    fn test_run_frame_advances() {
        let mut core = loaded_core();
        core.run_frame(ExecutionMode::Interpret);
        core.run_frame(ExecutionMode::Interpret);
        assert_eq!(core.frame(), 2);
        assert_eq!(core.cycles(), 2 * CYCLES_PER_FRAME as u64);

        let mut audio = Vec::new();
        core.render_audio(&mut audio);
        assert_eq!(audio.len(), 2 * 2 * SAMPLES_PER_FRAME);
        core.render_audio(&mut audio);
        assert_eq!(audio.len(), 2 * 2 * SAMPLES_PER_FRAME);
    }

    #[test]
    fn test_deterministic() {
        let mut a = loaded_core();
        let mut b = loaded_core();
        for _ in 0..5 {
            a.run_frame(ExecutionMode::Interpret);
            b.run_frame(ExecutionMode::Interpret);
        }
        assert_eq!(a.screen(), b.screen());
    }

    #[test]
    fn test_start_dirties_backup() {
        let mut core = loaded_core();
        core.run_frame(ExecutionMode::Interpret);
        assert!(!core.take_backup_dirty());

        core.update_input(keys::START);
        core.run_frame(ExecutionMode::Interpret);
        assert!(core.take_backup_dirty());
        assert!(!core.take_backup_dirty());
        assert_eq!(&core.backup_memory()[..4], &2u32.to_le_bytes());
    }

    #[test]
    fn test_state_roundtrip() {
        let mut core = loaded_core();
        core.update_input(keys::A | keys::RIGHT);
        for _ in 0..3 {
            core.run_frame(ExecutionMode::Interpret);
        }

        let mut payload = vec![0u8; 0x20000];
        let used = core.save_state(&mut payload).unwrap();

        let mut restored = loaded_core();
        restored.load_state(&payload[..used]).unwrap();
        assert_eq!(restored.frame(), 3);
        assert_eq!(restored.screen(), core.screen());

        core.run_frame(ExecutionMode::Interpret);
        restored.run_frame(ExecutionMode::Interpret);
        assert_eq!(restored.screen(), core.screen());
    }

    #[test]
    fn test_translate_survives_full_cache() {
        let mut core = loaded_core();
        let mut cache = TranslationCache::new(CacheConfig {
            max_translation_gates: 0,
            ..CacheConfig::default()
        });

        // Inactive regions and a zero-sized gate table both refuse writes
        core.run_frame(ExecutionMode::Translate(&mut cache));
        core.run_frame(ExecutionMode::Translate(&mut cache));
        assert_eq!(core.frame(), 2);
        assert!(cache.gates().is_empty());
        assert_eq!(cache.gates().idle_loop_target(), Some(ROM_ENTRY_PC + 0x1C0));
    }

    #[test]
    fn test_restored_backup_marked_dirty() {
        let mut saved = loaded_core();
        saved.run_frame(ExecutionMode::Interpret);
        let mut payload = vec![0u8; 0x20000];
        let used = saved.save_state(&mut payload).unwrap();

        let mut core = loaded_core();
        core.update_input(keys::START);
        core.run_frame(ExecutionMode::Interpret);
        assert!(core.take_backup_dirty());

        core.load_state(&payload[..used]).unwrap();
        assert!(core.take_backup_dirty());
        assert_eq!(core.backup_memory(), saved.backup_memory());

        // Same contents again: nothing to flush
        core.load_state(&payload[..used]).unwrap();
        assert!(!core.take_backup_dirty());
    }

    #[test]
    fn test_truncated_state_rejected() {
        let mut core = loaded_core();
        core.run_frame(ExecutionMode::Interpret);

        let mut payload = vec![0u8; 0x20000];
        let used = core.save_state(&mut payload).unwrap();

        let mut target = loaded_core();
        assert!(target.load_state(&payload[..used - 1]).is_err());
        assert_eq!(target.frame(), 0);
    }
}
