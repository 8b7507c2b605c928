use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_derive::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::audio::AudioSettings;
use crate::error::CoreError;
use crate::registry::CoreRegistry;

/// The main application configuration: the union of the settings sections
/// registered by the subsystems (currently only audio).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "Audio", default)]
    pub audio: AudioSettings,
}

/// The program file currently held by the service.
#[derive(Default)]
struct ProgramFile {
    path: PathBuf,
    sha1: String,
    data: Vec<u8>,
}

/// Resolves and owns the on-disk home of the application: per-core system
/// directories, the main config file, and the currently loaded program file
/// (bytes, path, SHA-1 digest).
pub struct HomeDirManager {
    home_path: PathBuf,
    config_path: PathBuf,
    file: Mutex<ProgramFile>,
    probable_file: Mutex<Option<PathBuf>>,
}

impl HomeDirManager {
    /// Establishes the home directory and returns the service.
    ///
    /// Resolution order: the explicit `override_home`, else the working
    /// directory when `force_portable` is set, else `$HOME/.{app}`. The
    /// directory is created eagerly; failure to do so is fatal to the host.
    ///
    /// # Arguments
    ///
    /// * `override_home` - optional explicit home directory
    /// * `config_name` - file name of the main config inside the home
    /// * `force_portable` - anchor the home next to the executable's cwd
    /// * `_org` / `app` - vendor and application identifiers
    pub fn initialize(
        override_home: Option<&Path>,
        config_name: &str,
        force_portable: bool,
        _org: &str,
        app: &str,
    ) -> Result<Self, CoreError> {
        let home_path = match override_home {
            Some(path) => path.to_path_buf(),
            None if force_portable => env::current_dir()
                .map_err(|_| CoreError::HomeDirUnavailable {
                    path: PathBuf::from("."),
                })?,
            None => {
                let base = env::var_os("HOME")
                    .map(PathBuf::from)
                    .or_else(|| env::current_dir().ok())
                    .ok_or(CoreError::HomeDirUnavailable {
                        path: PathBuf::from("."),
                    })?;
                base.join(format!(".{}", app.to_lowercase()))
            }
        };
        fs::create_dir_all(&home_path).map_err(|_| CoreError::HomeDirUnavailable {
            path: home_path.clone(),
        })?;
        info!("home directory: {}", home_path.display());

        Ok(HomeDirManager {
            config_path: home_path.join(config_name),
            home_path,
            file: Mutex::new(ProgramFile::default()),
            probable_file: Mutex::new(None),
        })
    }

    pub fn home_path(&self) -> &Path {
        &self.home_path
    }

    /// Creates (if needed) and returns `{home}/{sub}/{system}`.
    pub fn add_system_dir(&self, sub: &str, system: &str) -> Result<PathBuf, CoreError> {
        let path = self.home_path.join(sub).join(system);
        fs::create_dir_all(&path).map_err(|_| CoreError::HomeDirUnavailable {
            path: path.clone(),
        })?;
        Ok(path)
    }

    /// Reads a candidate program file, computes its SHA-1 digest, and runs
    /// it through the registry. On acceptance the bytes are cached in the
    /// service for the core constructor; on rejection the cache is cleared.
    pub fn validate_game_file(
        &self,
        game_path: &Path,
        registry: &mut CoreRegistry,
    ) -> Result<bool, CoreError> {
        let metadata = fs::metadata(game_path).map_err(|_| CoreError::FileError {
            path: game_path.to_path_buf(),
        })?;
        if !metadata.is_file() {
            return Err(CoreError::FileError {
                path: game_path.to_path_buf(),
            });
        }
        let data = fs::read(game_path).map_err(|_| CoreError::FileError {
            path: game_path.to_path_buf(),
        })?;

        let extension = game_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let sha1 = sha1_hex(&data);

        if registry.validate_program(&data, &extension, &sha1) {
            let mut file = self.file.lock().unwrap();
            file.path = game_path.to_path_buf();
            file.sha1 = sha1;
            file.data = data;
            Ok(true)
        } else {
            self.clear_cached_file_data();
            Ok(false)
        }
    }

    /// Installs program bytes directly, bypassing the filesystem. Hosts use
    /// [HomeDirManager::validate_game_file]; this is the entry point for
    /// embedded programs and tests.
    pub fn cache_program(&self, name: &str, data: Vec<u8>) {
        let mut file = self.file.lock().unwrap();
        file.path = PathBuf::from(name);
        file.sha1 = sha1_hex(&data);
        file.data = data;
    }

    pub fn clear_cached_file_data(&self) {
        *self.file.lock().unwrap() = ProgramFile::default();
    }

    pub fn file_data(&self) -> Vec<u8> {
        self.file.lock().unwrap().data.clone()
    }

    pub fn file_size(&self) -> usize {
        self.file.lock().unwrap().data.len()
    }

    pub fn file_sha1(&self) -> String {
        self.file.lock().unwrap().sha1.clone()
    }

    pub fn file_path(&self) -> PathBuf {
        self.file.lock().unwrap().path.clone()
    }

    pub fn file_name(&self) -> String {
        self.file
            .lock()
            .unwrap()
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Stores a path the host may want to open next (e.g. from a drop
    /// event or file dialog callback).
    pub fn set_probable_file(&self, path: &Path) {
        *self.probable_file.lock().unwrap() = Some(path.to_path_buf());
    }

    /// Takes the pending probable file, clearing the slot. A returned
    /// `Some` transfers ownership of the pending open to the caller.
    pub fn take_probable_file(&self) -> Option<PathBuf> {
        self.probable_file.lock().unwrap().take()
    }

    /// Loads the main config, falling back to defaults when the file is
    /// absent or unreadable. A malformed file is reported but not fatal.
    pub fn parse_main_app_config(&self) -> AppConfig {
        match fs::read_to_string(&self.config_path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(parse_error) => {
                    warn!(
                        "malformed config '{}': {}",
                        self.config_path.display(),
                        parse_error
                    );
                    AppConfig::default()
                }
            },
            Err(_) => AppConfig::default(),
        }
    }

    /// Serialises and writes the main config file.
    pub fn write_main_app_config(&self, config: &AppConfig) -> Result<(), CoreError> {
        let text = toml::to_string_pretty(config).map_err(|serialize_error| {
            CoreError::ConfigError {
                reason: serialize_error.to_string(),
            }
        })?;
        fs::write(&self.config_path, text).map_err(|_| CoreError::ConfigError {
            reason: format!("cannot write '{}'", self.config_path.display()),
        })
    }
}

/// Uppercase hex SHA-1 digest of a byte buffer; the key for all per-program
/// persisted state.
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn scratch_home() -> PathBuf {
        let unique = format!(
            "cubechip-test-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let path = env::temp_dir().join(unique);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn service(home: &Path) -> HomeDirManager {
        HomeDirManager::initialize(Some(home), "cubechip.toml", false, "CubeChip", "cubechip")
            .unwrap()
    }

    #[test]
    fn test_sha1_hex_reference_vector() {
        // SHA-1("abc")
        assert_eq!(
            sha1_hex(b"abc"),
            "A9993E364706816ABA3E25717850C26C9CD0D89D"
        );
    }

    #[test]
    fn test_add_system_dir_creates_path() {
        let home = scratch_home();
        let hdm = service(&home);
        let dir = hdm.add_system_dir("permaRegs", "CHIP8").unwrap();
        assert!(dir.is_dir());
        assert!(dir.starts_with(&home));
        fs::remove_dir_all(&home).unwrap();
    }

    #[test]
    fn test_config_round_trip_and_absent_default() {
        let home = scratch_home();
        let hdm = service(&home);

        let defaults = hdm.parse_main_app_config();
        assert_eq!(defaults.audio.volume, 0.75);

        let mut config = AppConfig::default();
        config.audio.volume = 0.5;
        config.audio.muted = true;
        hdm.write_main_app_config(&config).unwrap();

        let reloaded = hdm.parse_main_app_config();
        assert_eq!(reloaded.audio.volume, 0.5);
        assert!(reloaded.audio.muted);
        fs::remove_dir_all(&home).unwrap();
    }

    #[test]
    fn test_probable_file_take_clears_slot() {
        let home = scratch_home();
        let hdm = service(&home);
        hdm.set_probable_file(Path::new("/tmp/game.ch8"));
        assert_eq!(
            hdm.take_probable_file(),
            Some(PathBuf::from("/tmp/game.ch8"))
        );
        assert_eq!(hdm.take_probable_file(), None);
        fs::remove_dir_all(&home).unwrap();
    }
}
