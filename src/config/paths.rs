//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings + module catalog):
//!   Windows: %APPDATA%\live-coach\
//!   macOS:   ~/Library/Application Support/live-coach/
//!   Linux:   ~/.config/live-coach/
//!
//! Data dir (session records + feedback log):
//!   Windows: %LOCALAPPDATA%\live-coach\
//!   macOS:   ~/Library/Application Support/live-coach/
//!   Linux:   ~/.local/share/live-coach/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml` and `catalog.json`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Full path to the module/need catalog.
    pub catalog_file: PathBuf,
    /// One JSON record per `(module, session token)` lives here.
    pub sessions_dir: PathBuf,
    /// Append-only interaction log used for similar-fix recall.
    pub feedback_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "live-coach";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self::with_roots(config_dir, data_dir)
    }

    /// Build the layout under explicit roots (useful for tests).
    pub fn with_roots(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            settings_file: config_dir.join("settings.toml"),
            catalog_file: config_dir.join("catalog.json"),
            sessions_dir: data_dir.join("sessions"),
            feedback_file: data_dir.join("feedback.json"),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
