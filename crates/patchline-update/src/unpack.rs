//! Archive extraction into the install directory
//!
//! An archive is first read end to end to prove it is intact and to size the
//! work. Entries are then extracted into a fresh staging directory next to the
//! install directory, and the staging directory is renamed into place. The
//! old install directory is parked as `<install>.previous` during the swap
//! and removed afterwards; a run that finds only the parked copy restores it
//! before doing anything else.

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use patchline_core::types::RuntimeConfig;
use patchline_core::CancelFlag;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::error::{Result, UpdateError};
use crate::events::{Event, EventSender, UnpackProgress, UpdateStatus};
use crate::fsutil::parent_dir;
use crate::progress::{percentage, Throttle};

const COPY_BUFFER_SIZE: usize = 64 * 1024;
const BACKUP_SUFFIX: &str = ".previous";

/// Supported archive containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Identify an archive by its leading bytes
    pub fn detect(path: &Utf8Path) -> Result<Self> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path).map_err(|e| UpdateError::from_io(path, e))?;
        let read = read_up_to(&mut file, &mut magic).map_err(|e| UpdateError::from_io(path, e))?;

        match &magic[..read] {
            [b'P', b'K', 3, 4] | [b'P', b'K', 5, 6] => Ok(ArchiveFormat::Zip),
            [0x1f, 0x8b, ..] => Ok(ArchiveFormat::TarGz),
            _ => Err(UpdateError::corrupt(path, "unrecognized archive format")),
        }
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Entry totals gathered by the validation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: u64,
    pub total_bytes: u64,
}

/// Extracts update archives
#[derive(Debug, Clone)]
pub struct Unpacker {
    entry_timeout: Duration,
    emit_interval: Duration,
}

impl Unpacker {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            entry_timeout: config.unpack.entry_timeout(),
            emit_interval: config.progress.emit_interval(),
        }
    }

    pub fn with_entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = timeout;
        self
    }

    /// Replace the contents of `install_dir` with the contents of `archive`
    ///
    /// Emits `unpack:progress` while extracting and `UnpackFinished` once the
    /// new tree is in place. On any error `install_dir` is left as it was.
    pub async fn unpack(
        &self,
        archive: &Utf8Path,
        install_dir: &Utf8Path,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<ArchiveSummary> {
        info!(archive = %archive, install_dir = %install_dir, "unpacking archive");

        let job = UnpackJob {
            archive: archive.to_path_buf(),
            install_dir: install_dir.to_path_buf(),
            entry_timeout: self.entry_timeout,
            emit_interval: self.emit_interval,
            events: events.clone(),
            cancel: cancel.clone(),
        };

        let summary = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| UpdateError::internal(format!("unpack task failed: {}", e)))??;

        info!(
            entries = summary.entries,
            bytes = summary.total_bytes,
            "unpack complete"
        );
        events.emit_status(UpdateStatus::UnpackFinished).await;
        Ok(summary)
    }
}

/// Sibling directory holding the old tree during a swap
pub fn backup_path(install_dir: &Utf8Path) -> Utf8PathBuf {
    let mut name = install_dir.file_name().unwrap_or("install").to_string();
    name.push_str(BACKUP_SUFFIX);
    install_dir.with_file_name(name)
}

/// Put back an install directory that was parked by an interrupted swap.
/// Returns whether anything was restored.
pub fn recover_interrupted_swap(install_dir: &Utf8Path) -> Result<bool> {
    let backup = backup_path(install_dir);
    if install_dir.exists() || !backup.is_dir() {
        return Ok(false);
    }
    warn!(install_dir = %install_dir, "restoring install directory from interrupted swap");
    fs::rename(&backup, install_dir).map_err(|e| UpdateError::from_io(install_dir, e))?;
    Ok(true)
}

struct UnpackJob {
    archive: Utf8PathBuf,
    install_dir: Utf8PathBuf,
    entry_timeout: Duration,
    emit_interval: Duration,
    events: EventSender,
    cancel: CancelFlag,
}

impl UnpackJob {
    fn run(self) -> Result<ArchiveSummary> {
        recover_interrupted_swap(&self.install_dir)?;

        let format = ArchiveFormat::detect(&self.archive)?;
        let summary = match format {
            ArchiveFormat::Zip => self.validate_zip()?,
            ArchiveFormat::TarGz => self.validate_tar_gz()?,
        };
        debug!(?format, entries = summary.entries, bytes = summary.total_bytes, "archive verified");

        let staging = self.create_staging()?;
        let staging_path = utf8(staging.path())?;

        let mut meter = UnpackMeter::new(summary, self.emit_interval, &self.events);
        meter.emit(true);
        match format {
            ArchiveFormat::Zip => self.extract_zip(&staging_path, &mut meter)?,
            ArchiveFormat::TarGz => self.extract_tar_gz(&staging_path, &mut meter)?,
        }

        self.check_cancel()?;
        self.swap_into_place(staging)?;
        meter.finish();
        Ok(summary)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(UpdateError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> UpdateError {
        UpdateError::corrupt(&self.archive, reason.to_string())
    }

    fn open_archive(&self) -> Result<BufReader<File>> {
        File::open(&self.archive)
            .map(BufReader::new)
            .map_err(|e| UpdateError::from_io(&self.archive, e))
    }

    fn validate_zip(&self) -> Result<ArchiveSummary> {
        let mut zip = ZipArchive::new(self.open_archive()?).map_err(|e| self.corrupt(e))?;
        let mut summary = ArchiveSummary::default();

        for index in 0..zip.len() {
            self.check_cancel()?;
            let mut entry = zip.by_index(index).map_err(|e| self.corrupt(e))?;
            let name = entry.name().to_string();
            if entry.enclosed_name().is_none() {
                return Err(self.corrupt(format!("unsafe entry path {:?}", name)));
            }
            if !entry.is_dir() {
                // Reading to the end verifies the entry CRC
                let size = io::copy(&mut entry, &mut io::sink())
                    .map_err(|e| self.corrupt(format!("entry {}: {}", name, e)))?;
                summary.total_bytes += size;
            }
            summary.entries += 1;
        }

        Ok(summary)
    }

    fn validate_tar_gz(&self) -> Result<ArchiveSummary> {
        let mut archive = tar::Archive::new(GzDecoder::new(self.open_archive()?));
        let mut summary = ArchiveSummary::default();

        for entry in archive.entries().map_err(|e| self.corrupt(e))? {
            self.check_cancel()?;
            let mut entry = entry.map_err(|e| self.corrupt(e))?;
            let path = entry.path().map_err(|e| self.corrupt(e))?.into_owned();
            if safe_relative(&path).is_none() {
                return Err(self.corrupt(format!("unsafe entry path {:?}", path)));
            }
            if entry.header().entry_type().is_file() {
                summary.total_bytes += io::copy(&mut entry, &mut io::sink())
                    .map_err(|e| self.corrupt(format!("entry {:?}: {}", path, e)))?;
            }
            summary.entries += 1;
        }

        // Drain the gzip trailer so its CRC is checked
        let mut rest = archive.into_inner();
        io::copy(&mut rest, &mut io::sink()).map_err(|e| self.corrupt(e))?;

        Ok(summary)
    }

    fn create_staging(&self) -> Result<TempDir> {
        let parent = parent_dir(&self.install_dir);
        fs::create_dir_all(parent).map_err(|e| UpdateError::from_io(parent, e))?;

        let prefix = staging_prefix(&self.install_dir);
        remove_stale_staging(parent, &prefix);

        tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(parent)
            .map_err(|e| UpdateError::from_io(parent, e))
    }

    fn extract_zip(&self, staging: &Utf8Path, meter: &mut UnpackMeter<'_>) -> Result<()> {
        let mut zip = ZipArchive::new(self.open_archive()?).map_err(|e| self.corrupt(e))?;

        for index in 0..zip.len() {
            self.check_cancel()?;
            let mut entry = zip.by_index(index).map_err(|e| self.corrupt(e))?;
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| self.corrupt(format!("unsafe entry path {:?}", entry.name())))?;
            let target = staging.join(utf8(&relative)?);

            if entry.is_dir() {
                create_dir(&target)?;
            } else {
                let name = entry.name().to_string();
                self.write_entry(&name, &mut entry, &target, meter)?;
            }
            meter.entry_done();
        }

        Ok(())
    }

    fn extract_tar_gz(&self, staging: &Utf8Path, meter: &mut UnpackMeter<'_>) -> Result<()> {
        let mut archive = tar::Archive::new(GzDecoder::new(self.open_archive()?));

        for entry in archive.entries().map_err(|e| self.corrupt(e))? {
            self.check_cancel()?;
            let mut entry = entry.map_err(|e| self.corrupt(e))?;
            let path = entry.path().map_err(|e| self.corrupt(e))?.into_owned();
            let relative = safe_relative(&path)
                .ok_or_else(|| self.corrupt(format!("unsafe entry path {:?}", path)))?;
            let target = staging.join(&relative);
            let kind = entry.header().entry_type();

            if kind.is_dir() {
                create_dir(&target)?;
            } else if kind.is_file() {
                self.write_entry(relative.as_str(), &mut entry, &target, meter)?;
            } else {
                debug!(entry = %relative, ?kind, "skipping non-regular entry");
            }
            meter.entry_done();
        }

        Ok(())
    }

    /// Copy one entry in chunks, checking cancellation and the entry deadline
    /// between chunks
    fn write_entry(
        &self,
        name: &str,
        reader: &mut impl Read,
        target: &Utf8Path,
        meter: &mut UnpackMeter<'_>,
    ) -> Result<()> {
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        let mut out = File::create(target).map_err(|e| UpdateError::from_io(target, e))?;
        let deadline = Instant::now() + self.entry_timeout;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        loop {
            self.check_cancel()?;
            if Instant::now() > deadline {
                return Err(UpdateError::timeout(format!("unpack of entry {}", name)));
            }

            let read = reader
                .read(&mut buffer)
                .map_err(|e| self.corrupt(format!("entry {}: {}", name, e)))?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])
                .map_err(|e| UpdateError::from_io(target, e))?;
            meter.add_bytes(read as u64);
        }

        out.flush().map_err(|e| UpdateError::from_io(target, e))
    }

    fn swap_into_place(&self, staging: TempDir) -> Result<()> {
        let install_dir = &self.install_dir;
        let backup = backup_path(install_dir);

        if backup.exists() {
            fs::remove_dir_all(&backup).map_err(|e| UpdateError::from_io(&backup, e))?;
        }

        let had_install = install_dir.exists();
        if had_install {
            fs::rename(install_dir, &backup).map_err(|e| UpdateError::from_io(install_dir, e))?;
        }

        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, install_dir) {
            if had_install {
                if let Err(restore) = fs::rename(&backup, install_dir) {
                    error!(error = %restore, backup = %backup, "failed to restore install directory");
                }
            }
            if let Err(cleanup) = fs::remove_dir_all(&staged) {
                warn!(error = %cleanup, "failed to remove staging directory");
            }
            return Err(UpdateError::from_io(install_dir, e));
        }

        if had_install {
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!(error = %e, backup = %backup, "failed to remove previous install");
            }
        }
        Ok(())
    }
}

struct UnpackMeter<'a> {
    summary: ArchiveSummary,
    bytes_done: u64,
    entries_done: u64,
    last_percentage: f64,
    throttle: Throttle,
    events: &'a EventSender,
}

impl<'a> UnpackMeter<'a> {
    fn new(summary: ArchiveSummary, interval: Duration, events: &'a EventSender) -> Self {
        Self {
            summary,
            bytes_done: 0,
            entries_done: 0,
            last_percentage: 0.0,
            throttle: Throttle::new(interval),
            events,
        }
    }

    fn percentage(&self) -> f64 {
        if self.summary.total_bytes > 0 {
            percentage(self.bytes_done, self.summary.total_bytes)
        } else {
            percentage(self.entries_done, self.summary.entries)
        }
    }

    fn add_bytes(&mut self, bytes: u64) {
        self.bytes_done += bytes;
        self.emit(false);
    }

    fn entry_done(&mut self) {
        self.entries_done += 1;
        self.emit(false);
    }

    fn emit(&mut self, force: bool) {
        let percentage = self.percentage().max(self.last_percentage);
        if !self.throttle.ready(Instant::now()) && !force {
            return;
        }
        self.last_percentage = percentage;
        self.events.emit_blocking(Event::Unpack(UnpackProgress { percentage }));
    }

    fn finish(&mut self) {
        self.last_percentage = 100.0;
        self.events
            .emit_blocking(Event::Unpack(UnpackProgress { percentage: 100.0 }));
    }
}

fn staging_prefix(install_dir: &Utf8Path) -> String {
    format!(".{}.staging-", install_dir.file_name().unwrap_or("install"))
}

fn remove_stale_staging(parent: &Utf8Path, prefix: &str) {
    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            debug!(path = ?entry.path(), "removing stale staging directory");
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                warn!(error = %e, "failed to remove stale staging directory");
            }
        }
    }
}

/// Relative path made only of normal components, or `None`
fn safe_relative(path: &Path) -> Option<Utf8PathBuf> {
    let mut clean = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn create_dir(path: &Utf8Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| UpdateError::from_io(path, e))
}

fn utf8(path: &Path) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).map_err(|p| {
        UpdateError::from_io(
            Utf8PathBuf::from(p.to_string_lossy().into_owned()),
            io::Error::new(io::ErrorKind::InvalidData, "path is not valid UTF-8"),
        )
    })
}
