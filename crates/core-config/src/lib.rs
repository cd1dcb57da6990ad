//! Preferences: every toggle the dispatcher can flip, persisted as TOML.
//!
//! One flat record, defaults baked into the type, loaded once at startup
//! and saved on demand (`PREFSAVE`/`PREFLOAD`). Unknown keys are collected
//! and warned about rather than rejected, so a file written by a newer
//! build still loads. Blink and autorepeat times are stored in 10 ms
//! units, matching the historical preference encoding.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "braild.toml";

/// One preference time unit is 10 ms.
pub fn preference_time(units: u8) -> Duration {
    Duration::from_millis(units as u64 * 10)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    #[error("cannot serialise preferences: {0}")]
    Serialise(#[from] toml::ser::Error),
}

/// Where the status cells sit relative to the text window when the device
/// has no separate status region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusPosition {
    #[default]
    None,
    Left,
    Right,
}

/// Separator drawn between the status and text regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusSeparator {
    #[default]
    None,
    Block,
    StatusSide,
    TextSide,
}

/// What a blank-window skip considers "blank".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlankSkipMode {
    /// Skip only the blank tail of the current line.
    #[default]
    EndOfLine,
    /// Skip the rest of the line whenever the window is blank.
    RestOfLine,
    /// Skip every blank window.
    All,
}

/// Fields renderable into status cells, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusField {
    WindowColumn,
    WindowRow,
    CursorColumn,
    CursorRow,
    ScreenNumber,
    /// One cell of mode flags rendered as dots.
    StateDots,
}

fn default_status_fields() -> Vec<StatusField> {
    vec![
        StatusField::WindowColumn,
        StatusField::WindowRow,
        StatusField::CursorColumn,
        StatusField::CursorRow,
        StatusField::StateDots,
    ]
}

fn default_true() -> bool {
    true
}

macro_rules! default_u8 {
    ($name:ident, $value:expr) => {
        fn $name() -> u8 {
            $value
        }
    };
}

default_u8!(default_cursor_visible, 40);
default_u8!(default_cursor_invisible, 40);
default_u8!(default_attributes_visible, 20);
default_u8!(default_attributes_invisible, 60);
default_u8!(default_capitals_visible, 10);
default_u8!(default_capitals_invisible, 30);
default_u8!(default_autorepeat_delay, 50);
default_u8!(default_autorepeat_interval, 10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Preferences {
    // Cursor presentation.
    pub show_cursor: bool,
    pub block_cursor: bool,
    pub blinking_cursor: bool,
    pub cursor_visible_time: u8,
    pub cursor_invisible_time: u8,

    // Attribute underlining.
    pub show_attributes: bool,
    pub blinking_attributes: bool,
    pub attributes_visible_time: u8,
    pub attributes_invisible_time: u8,

    // Capital letter blinking.
    pub blinking_capitals: bool,
    pub capitals_visible_time: u8,
    pub capitals_invisible_time: u8,

    // Text rendition.
    pub six_dot_text: bool,
    pub contracted_braille: bool,

    // Window behaviour.
    pub sliding_window: bool,
    pub eager_sliding_window: bool,
    pub skip_identical_lines: bool,
    pub skip_blank_windows: bool,
    pub blank_windows_skip_mode: BlankSkipMode,
    pub window_follows_pointer: bool,
    pub highlight_window: bool,

    // Autorepeat.
    pub autorepeat: bool,
    pub autorepeat_panning: bool,
    pub autorepeat_delay: u8,
    pub autorepeat_interval: u8,

    // Feedback.
    pub alert_tunes: bool,
    pub autospeak: bool,

    // Status cells.
    pub status_position: StatusPosition,
    pub status_separator: StatusSeparator,
    /// Cells carved out of the window for status when the device has no
    /// status region. Zero leaves the whole window to text.
    pub status_cells: u8,
    pub status_fields: Vec<StatusField>,

    /// Keys we did not understand, kept for the warning and for writing
    /// the file back without dropping them.
    #[serde(flatten)]
    pub unknown: toml::Table,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            show_cursor: default_true(),
            block_cursor: false,
            blinking_cursor: false,
            cursor_visible_time: default_cursor_visible(),
            cursor_invisible_time: default_cursor_invisible(),
            show_attributes: false,
            blinking_attributes: false,
            attributes_visible_time: default_attributes_visible(),
            attributes_invisible_time: default_attributes_invisible(),
            blinking_capitals: false,
            capitals_visible_time: default_capitals_visible(),
            capitals_invisible_time: default_capitals_invisible(),
            six_dot_text: false,
            contracted_braille: false,
            sliding_window: false,
            eager_sliding_window: false,
            skip_identical_lines: false,
            skip_blank_windows: false,
            blank_windows_skip_mode: BlankSkipMode::default(),
            window_follows_pointer: false,
            highlight_window: false,
            autorepeat: default_true(),
            autorepeat_panning: false,
            autorepeat_delay: default_autorepeat_delay(),
            autorepeat_interval: default_autorepeat_interval(),
            alert_tunes: default_true(),
            autospeak: false,
            status_position: StatusPosition::default(),
            status_separator: StatusSeparator::default(),
            status_cells: 0,
            status_fields: default_status_fields(),
            unknown: toml::Table::new(),
        }
    }
}

impl Preferences {
    pub fn autorepeat_delay_time(&self) -> Duration {
        preference_time(self.autorepeat_delay)
    }

    pub fn autorepeat_interval_time(&self) -> Duration {
        preference_time(self.autorepeat_interval)
    }

    /// Clamp values that would misbehave at zero; returns whether
    /// anything was adjusted.
    pub fn sanitise(&mut self) -> bool {
        let mut adjusted = false;
        for (name, value) in [
            ("cursor-visible-time", &mut self.cursor_visible_time),
            ("cursor-invisible-time", &mut self.cursor_invisible_time),
            ("attributes-visible-time", &mut self.attributes_visible_time),
            (
                "attributes-invisible-time",
                &mut self.attributes_invisible_time,
            ),
            ("capitals-visible-time", &mut self.capitals_visible_time),
            ("capitals-invisible-time", &mut self.capitals_invisible_time),
            ("autorepeat-interval", &mut self.autorepeat_interval),
        ] {
            if *value == 0 {
                *value = 1;
                adjusted = true;
                tracing::warn!(target: "config", key = name, "zero time clamped to one unit");
            }
        }
        adjusted
    }

    /// Best-effort config path: the working directory first, then the
    /// platform config directory.
    pub fn discover() -> PathBuf {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return local;
        }
        if let Some(dir) = dirs::config_dir() {
            return dir.join("braild").join(CONFIG_FILE_NAME);
        }
        local
    }

    /// Load from `path` (or the discovered location). A missing file is
    /// the defaults, not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::discover);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(target: "config", path = %path.display(), "no preferences file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let mut prefs: Preferences = toml::from_str(&content).map_err(|source| {
            ConfigError::Parse {
                path: path.clone(),
                source: Box::new(source),
            }
        })?;
        for key in prefs.unknown.keys() {
            tracing::warn!(target: "config", key, "unknown preference ignored");
        }
        prefs.sanitise();
        tracing::info!(target: "config", path = %path.display(), "preferences loaded");
        Ok(prefs)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(target: "config", path = %path.display(), "preferences saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let prefs = Preferences::default();
        assert!(prefs.show_cursor);
        assert!(prefs.autorepeat);
        assert!(!prefs.six_dot_text);
        assert_eq!(prefs.autorepeat_delay_time(), Duration::from_millis(500));
        assert_eq!(prefs.autorepeat_interval_time(), Duration::from_millis(100));
        assert_eq!(prefs.status_fields.len(), 5);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let prefs = Preferences::load(Some(Path::new("/nonexistent/braild.toml"))).unwrap();
        assert_eq!(prefs, Preferences::default());
    }

    #[test]
    fn parses_and_clamps() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "blinking-cursor = true\ncursor-visible-time = 0\nstatus-separator = \"block\"\n",
        )
        .unwrap();
        let prefs = Preferences::load(Some(tmp.path())).unwrap();
        assert!(prefs.blinking_cursor);
        assert_eq!(prefs.cursor_visible_time, 1);
        assert_eq!(prefs.status_separator, StatusSeparator::Block);
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "future-feature = 3\nautospeak = true\n").unwrap();
        let prefs = Preferences::load(Some(tmp.path())).unwrap();
        assert!(prefs.autospeak);
        assert!(prefs.unknown.contains_key("future-feature"));

        let out = tempfile::NamedTempFile::new().unwrap();
        prefs.save(out.path()).unwrap();
        let again = Preferences::load(Some(out.path())).unwrap();
        assert_eq!(prefs, again);
    }

    #[test]
    fn save_load_is_stable() {
        let mut prefs = Preferences::default();
        prefs.sliding_window = true;
        prefs.blank_windows_skip_mode = BlankSkipMode::All;
        prefs.status_fields = vec![StatusField::ScreenNumber, StatusField::StateDots];

        let tmp = tempfile::NamedTempFile::new().unwrap();
        prefs.save(tmp.path()).unwrap();
        let loaded = Preferences::load(Some(tmp.path())).unwrap();
        assert_eq!(loaded, prefs);

        let tmp2 = tempfile::NamedTempFile::new().unwrap();
        loaded.save(tmp2.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(tmp.path()).unwrap(),
            std::fs::read_to_string(tmp2.path()).unwrap()
        );
    }
}
