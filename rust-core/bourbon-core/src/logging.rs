//! # Logging
//!
//! Installs the global `tracing` subscriber from [`LoggingConfig`].
//!
//! The console layer is JSON or human readable; debug mode always gets the
//! human format. With `file_logging` a second JSON layer writes through a
//! [`RotatingFile`] under `storage_path`: the file name follows the rotation
//! period, and a file reaching `max_size` is rolled into a timestamped
//! backup, optionally gzipped, with old backups pruned by count and age.
//! `RUST_LOG` takes precedence over the configured level.

use crate::config::{LogFormat, LoggingConfig, Rotation};
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Build the level filter: `RUST_LOG` if set and valid, else `level`
#[must_use]
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

const LOG_STEM: &str = "app";
const BACKUP_STAMP: &str = "%Y%m%dT%H%M%S%3f";

/// Log file name for `rotation` at time `now`
#[must_use]
pub fn log_file_name(rotation: Rotation, now: DateTime<Utc>) -> String {
    match rotation {
        Rotation::Hourly => format!("{LOG_STEM}-{}.log", now.format("%Y-%m-%d-%H")),
        Rotation::Daily => format!("{LOG_STEM}-{}.log", now.format("%Y-%m-%d")),
        Rotation::Weekly => {
            let week = now.iso_week();
            format!("{LOG_STEM}-{}-W{:02}.log", week.year(), week.week())
        }
        Rotation::None => format!("{LOG_STEM}.log"),
    }
}

/// Size limit and backup retention of a [`RotatingFile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    /// Bytes after which the active file is rolled; 0 never rolls
    pub max_bytes: u64,
    /// Backups older than this are deleted
    pub max_age: Option<Duration>,
    /// Backups kept, newest first; 0 keeps all
    pub max_backups: usize,
    /// Gzip rolled files
    pub compress: bool,
}

impl Retention {
    /// Retention from the `[logging]` section
    #[must_use]
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            max_bytes: config.max_size.saturating_mul(1024 * 1024),
            max_age: i64::try_from(config.max_age)
                .ok()
                .filter(|days| *days > 0)
                .and_then(Duration::try_days),
            max_backups: config.max_backups,
            compress: config.compress,
        }
    }
}

/// A rolled file found in the log directory
#[derive(Debug)]
struct Backup {
    path: PathBuf,
    stamp: String,
    rolled_at: NaiveDateTime,
}

impl Backup {
    /// `app-2024-03-09.20240309T140500123.log[.gz]`
    fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if !name.starts_with(LOG_STEM) {
            return None;
        }
        let name = name.strip_suffix(".gz").unwrap_or(name);
        let (_, stamp) = name.strip_suffix(".log")?.rsplit_once('.')?;
        let rolled_at = NaiveDateTime::parse_from_str(stamp.get(..15)?, "%Y%m%dT%H%M%S").ok()?;
        let stamp = stamp.to_string();
        Some(Self {
            path,
            stamp,
            rolled_at,
        })
    }
}

/// Log file writer with period naming, size rolling and backup pruning
#[derive(Debug)]
pub struct RotatingFile {
    dir: PathBuf,
    rotation: Rotation,
    retention: Retention,
    current: PathBuf,
    file: File,
    size: u64,
}

impl RotatingFile {
    /// Open the file for the current period under `config.storage_path`
    ///
    /// # Errors
    ///
    /// Returns `Error::Logging` if the directory or file cannot be opened.
    pub fn open(config: &LoggingConfig) -> Result<Self> {
        Self::open_at(
            &config.storage_path,
            config.rotation,
            Retention::from_config(config),
            Utc::now(),
        )
    }

    /// Open the file for the period containing `now`
    ///
    /// # Errors
    ///
    /// Returns `Error::Logging` if the directory or file cannot be opened.
    pub fn open_at(
        dir: &Path,
        rotation: Rotation,
        retention: Retention,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::Logging {
            message: format!("cannot create log directory {}: {e}", dir.display()),
        })?;
        let current = dir.join(log_file_name(rotation, now));
        let (file, size) = append(&current).map_err(|e| Error::Logging {
            message: format!("cannot open {}: {e}", current.display()),
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            rotation,
            retention,
            current,
            file,
            size,
        })
    }

    /// Active file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.current
    }

    /// Write `buf` as of `now`, switching period files and rolling first
    /// when needed
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the write, roll or prune.
    pub fn write_at(&mut self, buf: &[u8], now: DateTime<Utc>) -> io::Result<usize> {
        let period = self.dir.join(log_file_name(self.rotation, now));
        if period != self.current {
            self.file.flush()?;
            let (file, size) = append(&period)?;
            self.file = file;
            self.size = size;
            self.current = period;
        }

        let incoming = buf.len() as u64;
        if self.retention.max_bytes > 0
            && self.size > 0
            && self.size + incoming > self.retention.max_bytes
        {
            self.roll(now)?;
        }

        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn roll(&mut self, now: DateTime<Utc>) -> io::Result<()> {
        self.file.flush()?;
        let stem = self
            .current
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(LOG_STEM)
            .to_string();
        let backup = self
            .dir
            .join(format!("{stem}.{}.log", now.format(BACKUP_STAMP)));
        std::fs::rename(&self.current, &backup)?;

        let (file, size) = append(&self.current)?;
        self.file = file;
        self.size = size;

        if self.retention.compress {
            gzip(&backup)?;
        }
        self.prune(now)
    }

    /// Delete backups beyond `max_backups` or older than `max_age`
    fn prune(&self, now: DateTime<Utc>) -> io::Result<()> {
        let mut backups: Vec<Backup> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Backup::parse(entry.path()))
            .collect();
        backups.sort_by(|a, b| b.stamp.cmp(&a.stamp));

        for (i, backup) in backups.iter().enumerate() {
            let too_many = self.retention.max_backups > 0 && i >= self.retention.max_backups;
            let too_old = self
                .retention
                .max_age
                .is_some_and(|age| now.naive_utc() - backup.rolled_at > age);
            if too_many || too_old {
                std::fs::remove_file(&backup.path)?;
            }
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, Utc::now())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

/// Replace `path` with `path.gz`
fn gzip(path: &Path) -> io::Result<()> {
    let data = std::fs::read(path)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&data)?;
    let compressed = encoder.finish()?;

    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    std::fs::write(&target, compressed)?;
    std::fs::remove_file(path)
}

/// Install the global subscriber
///
/// Returns `Ok(false)` when a subscriber was already installed.
///
/// # Errors
///
/// Returns `Error::Logging` if the log directory or file cannot be opened.
pub fn init(config: &LoggingConfig, debug: bool) -> Result<bool> {
    let human = debug || config.format == LogFormat::Text;
    let to_stderr = config.output.eq_ignore_ascii_case("stderr");

    let console: Box<dyn Layer<Registry> + Send + Sync> = match (human, to_stderr) {
        (true, false) => fmt::layer().with_target(false).boxed(),
        (true, true) => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        (false, false) => fmt::layer().json().with_current_span(false).boxed(),
        (false, true) => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let file_layer = if config.file_logging {
        let file = RotatingFile::open(config)?;
        Some(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    Ok(tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(env_filter(&config.level))
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_names() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(log_file_name(Rotation::Daily, now), "app-2024-03-09.log");
        assert_eq!(log_file_name(Rotation::Hourly, now), "app-2024-03-09-14.log");
        assert_eq!(log_file_name(Rotation::Weekly, now), "app-2024-W10.log");
        assert_eq!(log_file_name(Rotation::None, now), "app.log");
    }

    #[test]
    fn test_file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file_logging: true,
            storage_path: dir.path().join("logs"),
            rotation: Rotation::None,
            ..LoggingConfig::default()
        };

        let file = RotatingFile::open(&config).unwrap();
        assert_eq!(file.path(), dir.path().join("logs").join("app.log"));
        assert!(dir.path().join("logs").is_dir());
    }

    fn at(day: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 14, 5, second).unwrap()
    }

    fn retention(max_backups: usize, compress: bool) -> Retention {
        Retention {
            max_bytes: 10,
            max_age: None,
            max_backups,
            compress,
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_size_limit_rolls_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            RotatingFile::open_at(dir.path(), Rotation::None, retention(0, false), at(9, 0)).unwrap();

        file.write_at(b"0123456789", at(9, 1)).unwrap();
        file.write_at(b"abc", at(9, 2)).unwrap();
        file.flush().unwrap();

        assert_eq!(
            file_names(dir.path()),
            vec!["app.20240309T140502000.log", "app.log"]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.20240309T140502000.log")).unwrap(),
            "0123456789"
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("app.log")).unwrap(), "abc");
    }

    #[test]
    fn test_rolled_files_are_compressed() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let mut file =
            RotatingFile::open_at(dir.path(), Rotation::None, retention(0, true), at(9, 0)).unwrap();
        file.write_at(b"first line", at(9, 1)).unwrap();
        file.write_at(b"second", at(9, 2)).unwrap();

        let backup = dir.path().join("app.20240309T140502000.log.gz");
        assert!(backup.is_file());
        assert!(!dir.path().join("app.20240309T140502000.log").exists());

        let mut text = String::new();
        GzDecoder::new(File::open(backup).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "first line");
    }

    #[test]
    fn test_backups_beyond_the_limit_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            RotatingFile::open_at(dir.path(), Rotation::None, retention(2, false), at(9, 0)).unwrap();
        for second in 1..=4 {
            file.write_at(b"0123456789", at(9, second)).unwrap();
        }

        assert_eq!(
            file_names(dir.path()),
            vec![
                "app.20240309T140503000.log",
                "app.20240309T140504000.log",
                "app.log"
            ]
        );
    }

    #[test]
    fn test_backups_older_than_max_age_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let retention = Retention {
            max_age: Some(Duration::days(1)),
            ..retention(0, false)
        };
        let mut file = RotatingFile::open_at(dir.path(), Rotation::None, retention, at(9, 0)).unwrap();
        file.write_at(b"0123456789", at(9, 1)).unwrap();
        file.write_at(b"0123456789", at(9, 2)).unwrap();
        file.write_at(b"0123456789", at(12, 3)).unwrap();

        assert_eq!(
            file_names(dir.path()),
            vec!["app.20240312T140503000.log", "app.log"]
        );
    }

    #[test]
    fn test_period_change_opens_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file =
            RotatingFile::open_at(dir.path(), Rotation::Daily, retention(0, false), at(9, 0)).unwrap();
        file.write_at(b"monday", at(9, 1)).unwrap();
        file.write_at(b"tuesday", at(10, 1)).unwrap();

        assert_eq!(file.path(), dir.path().join("app-2024-03-10.log"));
        assert_eq!(
            file_names(dir.path()),
            vec!["app-2024-03-09.log", "app-2024-03-10.log"]
        );
    }

    #[test]
    fn test_retention_from_config() {
        let retention = Retention::from_config(&LoggingConfig::default());
        assert_eq!(retention.max_bytes, 100 * 1024 * 1024);
        assert_eq!(retention.max_age, Some(Duration::days(30)));
        assert_eq!(retention.max_backups, 10);
        assert!(retention.compress);
    }
}
