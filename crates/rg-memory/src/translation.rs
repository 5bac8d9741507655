//! Translation cache manager
//!
//! Owns the ROM, RAM and BIOS code regions plus the gate table. Regions only
//! exist between [`TranslationCache::activate`] and
//! [`TranslationCache::teardown`]; while inactive the guest executes through
//! the interpreter.

use crate::region::{CodeRegion, RegionKind};
use rg_core::config::CacheConfig;
use rg_core::error::{EngineError, MemoryError, Result};

/// Legacy encoding of "no idle loop target"
pub const IDLE_LOOP_NONE: u32 = 0xFFFF_FFFF;

/// Guest PCs that must be re-validated before resuming translated code
#[derive(Debug, Clone)]
pub struct GateTable {
    targets: Vec<u32>,
    max_targets: usize,
    idle_loop_target: Option<u32>,
}

impl GateTable {
    /// Create an empty table holding at most `max_targets` entries
    pub fn new(max_targets: usize) -> Self {
        Self {
            targets: Vec::with_capacity(max_targets),
            max_targets,
            idle_loop_target: None,
        }
    }

    /// Record a gate target, returning its index
    pub fn push(&mut self, pc: u32) -> std::result::Result<usize, MemoryError> {
        if self.targets.len() >= self.max_targets {
            return Err(MemoryError::GateTableFull(self.max_targets));
        }
        self.targets.push(pc);
        Ok(self.targets.len() - 1)
    }

    pub fn contains(&self, pc: u32) -> bool {
        self.targets.contains(&pc)
    }

    /// Gate targets in insertion order
    pub fn targets(&self) -> &[u32] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_targets
    }

    /// Set or clear the busy-wait loop target
    pub fn set_idle_loop_target(&mut self, pc: Option<u32>) {
        self.idle_loop_target = pc.filter(|&pc| pc != IDLE_LOOP_NONE);
    }

    pub fn idle_loop_target(&self) -> Option<u32> {
        self.idle_loop_target
    }

    /// Idle loop target in its legacy encoding
    pub fn idle_loop_target_raw(&self) -> u32 {
        self.idle_loop_target.unwrap_or(IDLE_LOOP_NONE)
    }

    pub fn is_idle_loop(&self, pc: u32) -> bool {
        self.idle_loop_target == Some(pc)
    }

    /// Drop every gate target and the idle loop target
    pub fn clear(&mut self) {
        self.targets.clear();
        self.idle_loop_target = None;
    }
}

/// Per-region usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStats {
    pub kind: RegionKind,
    pub used: usize,
    pub capacity: usize,
    pub flushes: u64,
}

/// Usage across the whole cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub active: bool,
    pub regions: Vec<RegionStats>,
    pub gates: usize,
}

/// The three translation regions and their gate table
pub struct TranslationCache {
    config: CacheConfig,
    regions: Option<[CodeRegion; 3]>,
    gates: GateTable,
}

impl TranslationCache {
    /// Create an inactive cache sized by `config`
    pub fn new(config: CacheConfig) -> Self {
        Self {
            gates: GateTable::new(config.max_translation_gates),
            config,
            regions: None,
        }
    }

    fn capacity_of(&self, kind: RegionKind) -> usize {
        match kind {
            RegionKind::Rom => self.config.rom_cache_size,
            RegionKind::Ram => self.config.ram_cache_size,
            RegionKind::Bios => self.config.bios_cache_size,
        }
    }

    /// Map the regions when `enabled`; otherwise stay inactive.
    ///
    /// Returns whether translation is active afterwards. A mapping failure
    /// releases any region already mapped and is reported as fatal.
    pub fn activate(&mut self, enabled: bool) -> Result<bool> {
        if self.regions.is_some() {
            return Err(MemoryError::AlreadyActive.into());
        }

        if !enabled {
            tracing::info!("Dynamic recompiler disabled, using interpreter");
            return Ok(false);
        }

        let rom = CodeRegion::allocate(RegionKind::Rom, self.capacity_of(RegionKind::Rom))?;
        let ram = CodeRegion::allocate(RegionKind::Ram, self.capacity_of(RegionKind::Ram))?;
        let bios = CodeRegion::allocate(RegionKind::Bios, self.capacity_of(RegionKind::Bios))?;

        self.regions = Some([rom, ram, bios]);
        self.gates.clear();

        tracing::info!("Translation cache activated");
        Ok(true)
    }

    /// Whether the regions are mapped
    pub fn is_active(&self) -> bool {
        self.regions.is_some()
    }

    /// Invalidate every translation and gate
    pub fn reset(&mut self) {
        if let Some(regions) = self.regions.as_mut() {
            for region in regions.iter_mut() {
                region.reset();
            }
        }
        self.gates.clear();
        tracing::debug!("Translation cache reset");
    }

    /// Unmap the regions. A no-op when inactive.
    pub fn teardown(&mut self) {
        if self.regions.take().is_some() {
            tracing::info!("Translation cache released");
        }
        self.gates.clear();
    }

    pub fn region(&self, kind: RegionKind) -> Option<&CodeRegion> {
        self.regions.as_ref().map(|regions| &regions[kind.index()])
    }

    pub fn region_mut(&mut self, kind: RegionKind) -> Option<&mut CodeRegion> {
        self.regions.as_mut().map(|regions| &mut regions[kind.index()])
    }

    /// Append code to a region, returning its offset
    pub fn emit(&mut self, kind: RegionKind, code: &[u8]) -> Result<usize> {
        let region = self.region_mut(kind).ok_or(MemoryError::NotActive)?;
        region.emit(code).map_err(EngineError::from)
    }

    pub fn gates(&self) -> &GateTable {
        &self.gates
    }

    pub fn gates_mut(&mut self) -> &mut GateTable {
        &mut self.gates
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Snapshot of region usage
    pub fn stats(&self) -> CacheStats {
        let regions = self
            .regions
            .as_ref()
            .map(|regions| {
                regions
                    .iter()
                    .map(|region| RegionStats {
                        kind: region.kind(),
                        used: region.offset(),
                        capacity: region.capacity(),
                        flushes: region.flush_count(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        CacheStats {
            active: self.is_active(),
            regions,
            gates: self.gates.len(),
        }
    }
}

impl std::fmt::Debug for TranslationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationCache")
            .field("active", &self.is_active())
            .field("gates", &self.gates)
            .finish()
    }
}
