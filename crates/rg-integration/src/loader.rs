//! Content loading
//!
//! Resolves where the BIOS, the game and its backup file live, reads the
//! images and performs the light validation the engine needs before handing
//! them to the guest core.

use crate::host::Host;
use rg_core::config::PathConfig;
use rg_core::error::LoaderError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Size of the system BIOS image
pub const BIOS_SIZE: usize = 0x4000;

/// First byte of the official BIOS (a branch instruction)
pub const BIOS_EXPECTED_FIRST_BYTE: u8 = 0x18;

/// Cartridge header length
pub const GAMEPAK_HEADER_SIZE: usize = 0xC0;

/// Largest game-pak ROM
pub const MAX_GAMEPAK_SIZE: usize = 32 * 1024 * 1024;

/// Backup file extension
pub const BACKUP_EXTENSION: &str = "sav";

/// System BIOS image
#[derive(Clone)]
pub struct BiosImage {
    pub path: PathBuf,
    pub data: Vec<u8>,
}

impl BiosImage {
    /// Whether the image starts like the official BIOS
    pub fn looks_official(&self) -> bool {
        self.data.first() == Some(&BIOS_EXPECTED_FIRST_BYTE)
    }
}

impl std::fmt::Debug for BiosImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiosImage")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Parsed cartridge header fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartridgeHeader {
    /// Up to 12 ASCII characters
    pub title: String,
    /// 4 ASCII characters
    pub game_code: String,
    /// 2 ASCII characters
    pub maker_code: String,
}

impl CartridgeHeader {
    fn ascii_field(bytes: &[u8]) -> String {
        bytes
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Parse the fields at 0xA0..0xB2
    pub fn parse(rom: &[u8]) -> Result<Self, LoaderError> {
        if rom.len() < GAMEPAK_HEADER_SIZE {
            return Err(LoaderError::InvalidGame(format!(
                "image is {} bytes, shorter than the {}-byte header",
                rom.len(),
                GAMEPAK_HEADER_SIZE
            )));
        }

        Ok(Self {
            title: Self::ascii_field(&rom[0xA0..0xAC]),
            game_code: Self::ascii_field(&rom[0xAC..0xB0]),
            maker_code: Self::ascii_field(&rom[0xB0..0xB2]),
        })
    }
}

/// Game-pak ROM image
#[derive(Clone)]
pub struct GameImage {
    pub path: PathBuf,
    pub data: Vec<u8>,
    pub header: CartridgeHeader,
}

impl std::fmt::Debug for GameImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameImage")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .field("header", &self.header)
            .finish()
    }
}

/// Where a loaded game's files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPaths {
    /// Directory holding the game file
    pub main_dir: PathBuf,
    pub bios_path: PathBuf,
    pub save_dir: PathBuf,
    pub backup_path: PathBuf,
}

/// Resolves content paths and reads images
pub struct GameLoader {
    paths: PathConfig,
}

impl GameLoader {
    pub fn new(paths: PathConfig) -> Self {
        Self { paths }
    }

    /// Directory part of `path`, or `.` when it has none
    pub fn content_directory(path: &Path) -> PathBuf {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Work out BIOS, save and backup locations for `game_path`.
    ///
    /// The host's directories win; then the configured fallbacks; then the
    /// game's own directory.
    pub fn resolve_paths<H: Host + ?Sized>(&self, host: &H, game_path: &Path) -> ContentPaths {
        let main_dir = Self::content_directory(game_path);

        let system_dir = host
            .system_directory()
            .or_else(|| self.paths.system_dir.clone())
            .unwrap_or_else(|| main_dir.clone());
        let save_dir = host
            .save_directory()
            .or_else(|| self.paths.save_dir.clone())
            .unwrap_or_else(|| main_dir.clone());

        let mut backup_name = game_path
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "game".into());
        backup_name.push(".");
        backup_name.push(BACKUP_EXTENSION);
        let backup_path = save_dir.join(backup_name);

        let paths = ContentPaths {
            bios_path: system_dir.join(&self.paths.bios_file_name),
            main_dir,
            save_dir,
            backup_path,
        };
        debug!("Resolved content paths: {:?}", paths);
        paths
    }

    /// Read and size-check the BIOS image
    pub fn load_bios(&self, path: &Path) -> Result<BiosImage, LoaderError> {
        let data = fs::read(path).map_err(|source| LoaderError::BiosUnreadable {
            path: path.display().to_string(),
            source,
        })?;

        if data.len() != BIOS_SIZE {
            return Err(LoaderError::InvalidBios {
                expected: BIOS_SIZE,
                actual: data.len(),
            });
        }

        info!("Loaded BIOS: {}", path.display());
        Ok(BiosImage {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Read the game image and parse its header
    pub fn load_gamepak(&self, path: &Path) -> Result<GameImage, LoaderError> {
        let data = fs::read(path).map_err(|source| LoaderError::GameUnreadable {
            path: path.display().to_string(),
            source,
        })?;

        if data.len() > MAX_GAMEPAK_SIZE {
            return Err(LoaderError::InvalidGame(format!(
                "image is {} bytes, larger than {} bytes",
                data.len(),
                MAX_GAMEPAK_SIZE
            )));
        }

        let header = CartridgeHeader::parse(&data)?;
        info!(
            "Loaded game: {} [{}] ({} bytes)",
            header.title,
            header.game_code,
            data.len()
        );

        Ok(GameImage {
            path: path.to_path_buf(),
            data,
            header,
        })
    }

    /// Read an existing backup file, if any
    pub fn read_backup(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist backup memory
    pub fn write_backup(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        debug!("Wrote {} bytes of backup memory to {}", data.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VideoFrame;

    struct DirHost {
        system: Option<PathBuf>,
        save: Option<PathBuf>,
    }

    impl Host for DirHost {
        fn system_directory(&self) -> Option<PathBuf> {
            self.system.clone()
        }

        fn save_directory(&self) -> Option<PathBuf> {
            self.save.clone()
        }

        fn poll_input(&mut self) {}

        fn video_refresh(&mut self, _frame: &VideoFrame<'_>) {}
    }

    fn header_rom(title: &[u8], code: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; GAMEPAK_HEADER_SIZE];
        rom[0xA0..0xA0 + title.len()].copy_from_slice(title);
        rom[0xAC..0xB0].copy_from_slice(code);
        rom[0xB0..0xB2].copy_from_slice(b"01");
        rom
    }

    #[test]
    fn test_content_directory() {
        assert_eq!(
            GameLoader::content_directory(Path::new("/games/gba/zelda.gba")),
            PathBuf::from("/games/gba")
        );
        assert_eq!(
            GameLoader::content_directory(Path::new("zelda.gba")),
            PathBuf::from(".")
        );
    }

    #[test]
    fn test_resolve_paths_prefers_host() {
        let loader = GameLoader::new(PathConfig::default());
        let host = DirHost {
            system: Some(PathBuf::from("/sys")),
            save: Some(PathBuf::from("/saves")),
        };

        let paths = loader.resolve_paths(&host, Path::new("/roms/game.gba"));
        assert_eq!(paths.bios_path, PathBuf::from("/sys/gba_bios.bin"));
        assert_eq!(paths.save_dir, PathBuf::from("/saves"));
        assert_eq!(paths.backup_path, PathBuf::from("/saves/game.sav"));
        assert_eq!(paths.main_dir, PathBuf::from("/roms"));
    }

    #[test]
    fn test_resolve_paths_falls_back_to_game_dir() {
        let loader = GameLoader::new(PathConfig::default());
        let host = DirHost {
            system: None,
            save: None,
        };

        let paths = loader.resolve_paths(&host, Path::new("/roms/game.gba"));
        assert_eq!(paths.bios_path, PathBuf::from("/roms/gba_bios.bin"));
        assert_eq!(paths.backup_path, PathBuf::from("/roms/game.sav"));
    }

    #[test]
    fn test_header_parse() {
        let rom = header_rom(b"POCKET DEMO", b"APDE");
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert_eq!(header.title, "POCKET DEMO");
        assert_eq!(header.game_code, "APDE");
        assert_eq!(header.maker_code, "01");
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            CartridgeHeader::parse(&[0u8; 16]),
            Err(LoaderError::InvalidGame(_))
        ));
    }

    #[test]
    fn test_bios_size_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gba_bios.bin");
        fs::write(&path, vec![0x18u8; 100]).unwrap();

        let loader = GameLoader::new(PathConfig::default());
        assert!(matches!(
            loader.load_bios(&path),
            Err(LoaderError::InvalidBios {
                expected: BIOS_SIZE,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_missing_bios() {
        let loader = GameLoader::new(PathConfig::default());
        assert!(matches!(
            loader.load_bios(Path::new("/nonexistent/gba_bios.bin")),
            Err(LoaderError::BiosUnreadable { .. })
        ));
    }

    #[test]
    fn test_backup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("game.sav");

        assert_eq!(GameLoader::read_backup(&path).unwrap(), None);
        GameLoader::write_backup(&path, &[1, 2, 3]).unwrap();
        assert_eq!(GameLoader::read_backup(&path).unwrap(), Some(vec![1, 2, 3]));
    }
}
