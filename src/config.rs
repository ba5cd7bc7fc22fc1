//! Configuration management for world-keeper.
//!
//! Settings live in a `key=value` store on disk, loaded once at startup and
//! read-only for the rest of the process lifetime. Every malformed or missing
//! value falls back to a hard-coded default with a warning; configuration
//! problems are never fatal.

use crate::utils::errors::Result;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default timestamp format: DDMMYYYY-HHMMSS.
pub const DEFAULT_DATE_FORMAT: &str = "%d%m%Y-%H%M%S";

const CONFIG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process-wide backup configuration.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Root directory receiving archive entries
    pub backup_dir: PathBuf,

    /// Minutes between scheduled runs; 0 disables periodic triggering.
    /// Also the grace delay for the idle trigger.
    pub interval_minutes: u64,

    /// Retention cap, clamped to at least 1
    pub max_backups: usize,

    /// Compress finished backups into .tar.zst archives
    pub compress: bool,

    /// Pause the host's autonomous flushing while a job runs
    pub pause_autosave: bool,

    /// Also back up the auxiliary directory (plugins/config data)
    pub include_aux: bool,

    /// The auxiliary directory
    pub aux_dir: PathBuf,

    /// One archive entry per job instead of one per target
    pub single_archive: bool,

    /// Target names never backed up (matched case-insensitively)
    pub excluded_targets: Vec<String>,

    /// Broadcast before a job starts; blank suppresses it
    pub start_message: String,

    /// Broadcast after a job completes; blank suppresses it
    pub finish_message: String,

    /// strftime format for archive names; invalid formats fall back to
    /// [`DEFAULT_DATE_FORMAT`] at load time
    pub date_format: String,

    /// Skip scheduled runs while nobody is online
    pub require_participants: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            interval_minutes: 30,
            max_backups: 10,
            compress: true,
            pause_autosave: true,
            include_aux: false,
            aux_dir: PathBuf::from("plugins"),
            single_archive: true,
            excluded_targets: Vec::new(),
            start_message: "Start backing up the worlds...".to_string(),
            finish_message: "Backup finished.".to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            require_participants: false,
        }
    }
}

impl BackupConfig {
    /// Load the configuration from a `key=value` file. A missing file is
    /// replaced with a freshly written default one.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Couldn't find the config, writing a default one");
            write_default(path)?;
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::default();
        let mut stored_version: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line, "Ignoring malformed config line");
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "Version" => stored_version = Some(value.to_string()),
                "BackupDir" => config.backup_dir = PathBuf::from(value),
                "BackupInterval" => {
                    config.interval_minutes =
                        parse_or(value, "BackupInterval", config.interval_minutes)
                }
                "MaximumBackups" => {
                    config.max_backups = parse_or(value, "MaximumBackups", config.max_backups)
                }
                "CompressBackups" => {
                    config.compress = parse_bool_or(value, "CompressBackups", config.compress)
                }
                "PauseAutosave" => {
                    config.pause_autosave =
                        parse_bool_or(value, "PauseAutosave", config.pause_autosave)
                }
                "IncludeAuxiliary" => {
                    config.include_aux =
                        parse_bool_or(value, "IncludeAuxiliary", config.include_aux)
                }
                "AuxiliaryDir" => config.aux_dir = PathBuf::from(value),
                "SingleArchive" => {
                    config.single_archive =
                        parse_bool_or(value, "SingleArchive", config.single_archive)
                }
                "ExcludedTargets" => {
                    config.excluded_targets = value
                        .split(';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                }
                "StartMessage" => config.start_message = value.to_string(),
                "FinishMessage" => config.finish_message = value.to_string(),
                "DateFormat" => config.date_format = value.to_string(),
                "RequireParticipants" => {
                    config.require_participants =
                        parse_bool_or(value, "RequireParticipants", config.require_participants)
                }
                other => warn!(key = other, "Unknown config key, ignoring"),
            }
        }

        match stored_version.as_deref() {
            Some(v) if v == CONFIG_VERSION => {}
            Some(v) => warn!(
                stored = v,
                running = CONFIG_VERSION,
                "Config was written by a different version; consider regenerating it"
            ),
            None => warn!("Config carries no version marker; consider regenerating it"),
        }

        config.sanitize();
        Ok(config)
    }

    /// Interval between scheduled runs; zero means disabled.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// Delay before the idle trigger fires after the last participant leaves.
    pub fn idle_delay(&self) -> Duration {
        self.interval()
    }

    /// Render `now` for use in archive names. The fields are public, so a
    /// bad format can reach this point without ever passing through
    /// [`Self::sanitize`]; it falls back to the default here rather than
    /// costing the backup.
    pub fn format_timestamp(&self, now: DateTime<Local>) -> String {
        if is_valid_date_format(&self.date_format) {
            now.format(&self.date_format).to_string()
        } else {
            warn!(
                format = %self.date_format,
                "Bad date format string, naming this backup with the default"
            );
            now.format(DEFAULT_DATE_FORMAT).to_string()
        }
    }

    /// Enforce invariants, falling back with a warning instead of failing.
    pub fn sanitize(&mut self) {
        if self.max_backups < 1 {
            warn!("MaximumBackups must be at least 1, clamping");
            self.max_backups = 1;
        }
        if !is_valid_date_format(&self.date_format) {
            warn!(
                format = %self.date_format,
                "Bad date format string, falling back to the default"
            );
            self.date_format = DEFAULT_DATE_FORMAT.to_string();
        }
    }
}

fn is_valid_date_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

fn parse_or<T: std::str::FromStr>(value: &str, key: &str, default: T) -> T {
    match value.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value, "Malformed config value, using default");
            default
        }
    }
}

fn parse_bool_or(value: &str, key: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => true,
        "false" | "no" | "off" | "0" => false,
        _ => {
            warn!(key, value, "Malformed config value, using default");
            default
        }
    }
}

fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let defaults = BackupConfig::default();
    let content = format!(
        "// world-keeper configuration\n\
         // Lines starting with // are comments.\n\
         Version={version}\n\
         BackupDir={backup_dir}\n\
         // Minutes between scheduled backups; 0 disables the schedule.\n\
         BackupInterval={interval}\n\
         // How many archive entries to keep before the oldest are deleted.\n\
         MaximumBackups={max_backups}\n\
         CompressBackups={compress}\n\
         PauseAutosave={pause_autosave}\n\
         IncludeAuxiliary={include_aux}\n\
         AuxiliaryDir={aux_dir}\n\
         // One archive per run instead of one per target.\n\
         SingleArchive={single_archive}\n\
         // Semicolon-separated target names to skip.\n\
         ExcludedTargets=\n\
         StartMessage={start_message}\n\
         FinishMessage={finish_message}\n\
         // strftime format used for archive names.\n\
         DateFormat={date_format}\n\
         RequireParticipants={require_participants}\n",
        version = CONFIG_VERSION,
        backup_dir = defaults.backup_dir.display(),
        interval = defaults.interval_minutes,
        max_backups = defaults.max_backups,
        compress = defaults.compress,
        pause_autosave = defaults.pause_autosave,
        include_aux = defaults.include_aux,
        aux_dir = defaults.aux_dir.display(),
        single_archive = defaults.single_archive,
        start_message = defaults.start_message,
        finish_message = defaults.finish_message,
        date_format = defaults.date_format,
        require_participants = defaults.require_participants,
    );
    std::fs::write(path, content)?;
    Ok(())
}
