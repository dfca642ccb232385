//! Archive download with progress events, resume and verification
//!
//! Bytes are streamed into `<destination>.part`. The part file is renamed
//! onto the destination only once its size, and its SHA-256 if one is
//! expected, check out.
//!
//! A `<destination>.part.json` record names the remote version and the
//! response validator (`ETag` or `Last-Modified`) the part was started from.
//! A leftover part file is continued with `Range` and `If-Range` only when
//! that record matches the requested version, and the `206` is accepted only
//! if its `Content-Range` starts where the part file ends.

use camino::{Utf8Path, Utf8PathBuf};
use futures_util::StreamExt;
use patchline_core::retry::{ClosurePredicate, RetryExecutor, TracingObserver};
use patchline_core::types::{ProgressConfig, RetryPolicy, RuntimeConfig, OP_DOWNLOAD};
use patchline_core::CancelFlag;
use reqwest::header::{HeaderMap, CONTENT_RANGE, ETAG, IF_RANGE, LAST_MODIFIED, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::events::{DownloadProgress, Event, EventSender, UpdateStatus};
use crate::fsutil::{remove_file_if_exists, write_atomic};
use crate::progress::{human_readable_size, percentage, SpeedMeter, Throttle};
use crate::source::http_client;

const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// What to fetch and where to put it
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    pub destination: &'a Utf8Path,
    pub expected_sha256: Option<&'a str>,
    /// Remote version being fetched; a part file left by another version
    /// is never resumed
    pub version: Option<&'a str>,
}

/// Identity of the download a part file belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub version: Option<String>,
    /// `ETag`, or `Last-Modified` when the server sent no `ETag`
    pub validator: Option<String>,
}

impl PartRecord {
    /// Read the record at `path`. A missing or unreadable record is `None`.
    pub fn load(path: &Utf8Path) -> Option<Self> {
        let raw = std::fs::read(path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn store(&self, path: &Utf8Path) -> Result<()> {
        let json = serde_json::to_vec(self)
            .map_err(|e| UpdateError::internal(format!("encoding part record: {}", e)))?;
        write_atomic(path, &json)
    }

    fn matches(&self, version: Option<&str>) -> bool {
        self.version.as_deref() == version
    }
}

/// Parsed `Content-Range: bytes <start>-<end>/<total>` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let ranged = value.trim().strip_prefix("bytes ")?;
        let (range, total) = ranged.split_once('/')?;
        let (start, end) = range.split_once('-')?;
        let start = start.trim().parse().ok()?;
        let end = end.trim().parse().ok()?;
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        (start <= end).then_some(Self { start, end, total })
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }
}

/// Result of a download operation
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub file_path: Utf8PathBuf,
    pub file_size: u64,
    pub checksum: String,
    pub resumed: bool,
    pub attempts: u32,
}

/// Streams update archives to disk
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    read_timeout: Duration,
    progress: ProgressConfig,
    jitter: bool,
}

impl Downloader {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Ok(Self::with_client(http_client(&config.network)?, config))
    }

    pub fn with_client(client: reqwest::Client, config: &RuntimeConfig) -> Self {
        Self {
            client,
            retry_policy: config.policy_for(OP_DOWNLOAD),
            read_timeout: config.network.read_timeout(),
            progress: config.progress.clone(),
            jitter: true,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Download `request.url` to `request.destination`
    ///
    /// Transient failures are retried per the `download` retry policy.
    /// `DownloadFinished` is emitted once the archive is in place.
    pub async fn download(
        &self,
        request: &DownloadRequest<'_>,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<DownloadResult> {
        info!(url = %request.url, destination = %request.destination, "downloading archive");

        let executor = RetryExecutor::new(self.retry_policy.clone())
            .with_predicate(ClosurePredicate::new(UpdateError::is_transient))
            .with_observer(TracingObserver::new(OP_DOWNLOAD))
            .with_jitter(self.jitter)
            .with_cancel(cancel.clone());

        let mut attempt = 0;
        let mut result = executor
            .execute(|| {
                attempt += 1;
                self.download_once(request, attempt, events, cancel)
            })
            .await
            .map_err(UpdateError::from)?;

        result.attempts = attempt;
        info!(
            file = %result.file_path,
            size = %human_readable_size(result.file_size),
            resumed = result.resumed,
            "download complete"
        );
        events.emit_status(UpdateStatus::DownloadFinished).await;
        Ok(result)
    }

    async fn download_once(
        &self,
        request: &DownloadRequest<'_>,
        attempt: u32,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<DownloadResult> {
        let destination = request.destination;
        let part_path = part_path(destination);
        let file_name = destination.file_name().unwrap_or("archive").to_string();

        if let Some(parent) = destination.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdateError::from_io(parent, e))?;
        }

        let record_path = part_record_path(destination);
        let mut existing = part_len(&part_path).await?;
        let mut validator = None;
        if existing > 0 {
            match PartRecord::load(&record_path) {
                Some(record) if record.matches(request.version) => validator = record.validator,
                record => {
                    info!(
                        part = %part_path,
                        recorded = ?record.and_then(|r| r.version),
                        wanted = ?request.version,
                        "discarding part file from another download"
                    );
                    discard_part(&part_path, &record_path)?;
                    existing = 0;
                }
            }
        }

        let mut get = self.client.get(request.url);
        if existing > 0 {
            debug!(offset = existing, validator = ?validator, "requesting resume");
            get = get.header(RANGE, format!("bytes={}-", existing));
            if let Some(validator) = &validator {
                get = get.header(IF_RANGE, validator.as_str());
            }
        }

        let response = get.send().await?;
        let status = response.status();

        if !status.is_success() {
            if status == StatusCode::RANGE_NOT_SATISFIABLE {
                discard_part(&part_path, &record_path)?;
            }
            return Err(UpdateError::network(format!(
                "GET {} returned {}",
                request.url, status
            )));
        }

        let resumed = existing > 0 && status == StatusCode::PARTIAL_CONTENT;
        let total = if resumed {
            let range = ContentRange::from_headers(response.headers());
            match range {
                Some(range) if range.start == existing => range
                    .total
                    .or_else(|| response.content_length().map(|len| len + existing)),
                _ => {
                    warn!(
                        offset = existing,
                        content_range = ?range,
                        "resume does not continue the part file"
                    );
                    discard_part(&part_path, &record_path)?;
                    return Err(UpdateError::network(format!(
                        "GET {} answered a resume from byte {} with range {:?}",
                        request.url, existing, range
                    )));
                }
            }
        } else {
            PartRecord {
                version: request.version.map(str::to_string),
                validator: response_validator(response.headers()),
            }
            .store(&record_path)?;
            response.content_length()
        };
        let start = if resumed { existing } else { 0 };

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(&part_path)
            .await
            .map_err(|e| UpdateError::from_io(&part_path, e))?;

        debug!(attempt, start, total = ?total, "streaming archive");

        let mut downloaded = start;
        let mut throttle = Throttle::new(self.progress.emit_interval());
        let mut speed = SpeedMeter::new(self.progress.speed_window());
        let mut stream = std::pin::pin!(response.bytes_stream());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    file.flush()
                        .await
                        .map_err(|e| UpdateError::from_io(&part_path, e))?;
                    return Err(UpdateError::Cancelled);
                }
                next = tokio::time::timeout(self.read_timeout, stream.next()) => {
                    next.map_err(|_| UpdateError::timeout("archive download read"))?
                }
            };

            let Some(chunk) = next else { break };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => match total {
                    Some(expected) if downloaded < expected => {
                        drop(file);
                        warn!(
                            expected,
                            actual = downloaded,
                            error = %err,
                            "body ended before declared length"
                        );
                        discard_part(&part_path, &record_path)?;
                        return Err(UpdateError::SizeMismatch {
                            expected,
                            actual: downloaded,
                        });
                    }
                    _ => return Err(err.into()),
                },
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::from_io(&part_path, e))?;
            downloaded += chunk.len() as u64;

            let now = Instant::now();
            let bytes_per_sec = speed.record(now, downloaded);
            if throttle.ready(now) {
                events
                    .emit(Event::Download(DownloadProgress {
                        file_name: file_name.clone(),
                        download_bytes: downloaded,
                        percentage: total.map_or(0.0, |t| percentage(downloaded, t)),
                        speed_bytes_per_sec: bytes_per_sec,
                    }))
                    .await;
            }
        }

        file.flush()
            .await
            .map_err(|e| UpdateError::from_io(&part_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| UpdateError::from_io(&part_path, e))?;
        drop(file);

        if let Some(expected) = total {
            if downloaded != expected {
                warn!(expected, actual = downloaded, "discarding truncated download");
                discard_part(&part_path, &record_path)?;
                return Err(UpdateError::SizeMismatch {
                    expected,
                    actual: downloaded,
                });
            }
        }

        let checksum = sha256_file(&part_path).await?;
        if let Some(expected) = request.expected_sha256 {
            if !checksum.eq_ignore_ascii_case(expected) {
                warn!(expected, actual = %checksum, "discarding download with bad checksum");
                discard_part(&part_path, &record_path)?;
                return Err(UpdateError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: checksum,
                });
            }
        }

        events
            .emit(Event::Download(DownloadProgress {
                file_name,
                download_bytes: downloaded,
                percentage: 100.0,
                speed_bytes_per_sec: speed.record(Instant::now(), downloaded),
            }))
            .await;

        remove_file_if_exists(destination)?;
        fs::rename(&part_path, destination)
            .await
            .map_err(|e| UpdateError::from_io(destination, e))?;
        remove_file_if_exists(&record_path)?;

        Ok(DownloadResult {
            file_path: destination.to_path_buf(),
            file_size: downloaded,
            checksum,
            resumed,
            attempts: attempt,
        })
    }
}

/// Temporary path a download streams into
pub fn part_path(destination: &Utf8Path) -> Utf8PathBuf {
    let mut name = destination.file_name().unwrap_or("archive").to_string();
    name.push_str(".part");
    destination.with_file_name(name)
}

/// Sidecar recording which download `part_path(destination)` belongs to
pub fn part_record_path(destination: &Utf8Path) -> Utf8PathBuf {
    let mut name = destination.file_name().unwrap_or("archive").to_string();
    name.push_str(".part.json");
    destination.with_file_name(name)
}

async fn part_len(part_path: &Utf8Path) -> Result<u64> {
    match fs::metadata(part_path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(UpdateError::from_io(part_path, e)),
    }
}

fn discard_part(part_path: &Utf8Path, record_path: &Utf8Path) -> Result<()> {
    remove_file_if_exists(part_path)?;
    remove_file_if_exists(record_path)
}

fn response_validator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Hex SHA-256 of a file, computed off the async runtime
pub async fn sha256_file(path: &Utf8Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = File::open(&owned).map_err(|e| UpdateError::from_io(&owned, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| UpdateError::from_io(&owned, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| UpdateError::internal(format!("checksum task failed: {}", e)))?
}
