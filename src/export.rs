use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;

use crate::archive::{build_archive, ArchiveEntry};
use crate::data::DownloadService;
use crate::item::{MediaItem, MediaKind};

const MAX_RETRIES: usize = 2;

#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on worker threads; the effective count is also capped
    /// at half the machine's parallelism.
    pub workers: usize,
    pub retry_backoff: Duration,
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            retry_backoff: Duration::from_millis(500),
            batch_size: 25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub name: String,
    pub url: String,
    pub modified: DateTime<Utc>,
}

/// What one batch produced: the finished archive plus the names that made
/// it in and the count of downloads that exhausted their retries.
pub struct BatchOutcome {
    pub archive: Vec<u8>,
    pub names: Vec<String>,
    pub failed: usize,
}

/// Downloads batches of media and packs each batch into one store-only
/// archive. Parallel within a batch, sequential across batches so only
/// one batch's uncompressed bytes are ever buffered at once.
pub struct Exporter {
    downloader: Arc<dyn DownloadService>,
    cfg: Config,
    cancel: Arc<AtomicBool>,
}

impl Exporter {
    pub fn new(downloader: Arc<dyn DownloadService>, cfg: Config) -> Self {
        Self {
            downloader,
            cfg,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag for cooperative cancellation: setting it stops new
    /// downloads from being scheduled while in-flight ones finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn export_batch(&self, jobs: &[DownloadJob]) -> Result<BatchOutcome> {
        let workers = effective_workers(self.cfg.workers);
        let (job_tx, job_rx) = unbounded::<(usize, DownloadJob)>();
        let (done_tx, done_rx) = unbounded::<(usize, DownloadJob, Result<Vec<u8>>)>();
        for (index, job) in jobs.iter().enumerate() {
            let _ = job_tx.send((index, job.clone()));
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let downloader = self.downloader.clone();
                let cancel = self.cancel.clone();
                let backoff = self.cfg.retry_backoff;
                scope.spawn(move || {
                    while let Ok((index, job)) = job_rx.recv() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let result =
                            download_with_retry(downloader.as_ref(), &job, backoff, &cancel);
                        let _ = done_tx.send((index, job, result));
                    }
                });
            }
        });
        drop(done_tx);

        if self.cancel.load(Ordering::Relaxed) {
            bail!("export cancelled");
        }

        let mut slots: Vec<Option<ArchiveEntry>> = Vec::new();
        slots.resize_with(jobs.len(), || None);
        let mut failed = 0usize;
        for (index, job, result) in done_rx.iter() {
            match result {
                Ok(bytes) => {
                    slots[index] = Some(ArchiveEntry {
                        name: job.name,
                        bytes,
                        modified: job.modified,
                    });
                }
                Err(_) => failed += 1,
            }
        }

        let entries: Vec<ArchiveEntry> = slots.into_iter().flatten().collect();
        let names = entries.iter().map(|entry| entry.name.clone()).collect();
        let archive = build_archive(&entries);
        Ok(BatchOutcome {
            archive,
            names,
            failed,
        })
    }

    /// Run every batch in turn; each outcome's archive is complete before
    /// the next batch starts downloading.
    pub fn export_batches(&self, jobs: Vec<DownloadJob>) -> Result<Vec<BatchOutcome>> {
        let batch_size = self.cfg.batch_size.max(1);
        let mut outcomes = Vec::new();
        for batch in jobs.chunks(batch_size) {
            outcomes.push(self.export_batch(batch)?);
        }
        Ok(outcomes)
    }
}

fn download_with_retry(
    downloader: &dyn DownloadService,
    job: &DownloadJob,
    backoff: Duration,
    cancel: &AtomicBool,
) -> Result<Vec<u8>> {
    let mut attempt = 0usize;
    loop {
        match downloader.fetch_bytes(&job.url) {
            Ok(bytes) => return Ok(bytes),
            Err(err) => {
                if attempt >= MAX_RETRIES || cancel.load(Ordering::Relaxed) {
                    return Err(err);
                }
                attempt += 1;
                thread::sleep(backoff);
            }
        }
    }
}

fn effective_workers(cap: usize) -> usize {
    let half_parallelism = thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1);
    cap.max(1).min(half_parallelism.max(1))
}

/// Turn one page of items into download jobs. Names are prefixed with a
/// running index so the archive keeps page order even when basenames
/// collide.
pub fn jobs_from_items(items: &[MediaItem]) -> Vec<DownloadJob> {
    items
        .iter()
        .filter(|item| !item.media_url.is_empty())
        .enumerate()
        .map(|(index, item)| DownloadJob {
            name: format!("{:03}-{}", index + 1, entry_name(item)),
            url: item.media_url.clone(),
            modified: item.created_at,
        })
        .collect()
}

fn entry_name(item: &MediaItem) -> String {
    let basename = item
        .media_url
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string);
    basename.unwrap_or_else(|| {
        let extension = match item.kind {
            MediaKind::Video => "mp4",
            MediaKind::Image => "jpg",
        };
        format!("media.{}", extension)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockDownloadService;
    use parking_lot::Mutex;

    fn job(name: &str, url: &str) -> DownloadJob {
        DownloadJob {
            name: name.into(),
            url: url.into(),
            modified: crate::item::parse_timestamp(Some("2024-03-15T10:30:42Z")),
        }
    }

    fn config() -> Config {
        Config {
            workers: 2,
            retry_backoff: Duration::from_millis(1),
            batch_size: 2,
        }
    }

    #[test]
    fn batch_downloads_and_archives_everything() {
        let exporter = Exporter::new(Arc::new(MockDownloadService), config());
        let outcome = exporter
            .export_batch(&[job("a.bin", "AB"), job("b.bin", "CD")])
            .unwrap();
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.names, vec!["a.bin", "b.bin"]);
        // The mock serves the URL itself as content, so entry "a.bin"
        // holds the bytes "AB" with the known CRC.
        let crc = crate::archive::crc32(b"AB");
        assert_eq!(crc, 0x3069_4C07);
        let needle = crc.to_le_bytes();
        assert!(outcome
            .archive
            .windows(4)
            .any(|window| window == needle.as_slice()));
    }

    struct FlakyDownloader {
        failures_left: Mutex<usize>,
    }

    impl DownloadService for FlakyDownloader {
        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                bail!("socket closed");
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    #[test]
    fn transient_failures_are_retried() {
        let exporter = Exporter::new(
            Arc::new(FlakyDownloader {
                failures_left: Mutex::new(2),
            }),
            config(),
        );
        let outcome = exporter.export_batch(&[job("a.bin", "AB")]).unwrap();
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.names, vec!["a.bin"]);
    }

    struct BrokenDownloader;

    impl DownloadService for BrokenDownloader {
        fn fetch_bytes(&self, _: &str) -> Result<Vec<u8>> {
            bail!("404")
        }
    }

    #[test]
    fn permanent_failure_is_counted_and_export_continues() {
        struct HalfBroken;
        impl DownloadService for HalfBroken {
            fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
                if url.contains("bad") {
                    bail!("404")
                }
                Ok(url.as_bytes().to_vec())
            }
        }
        let exporter = Exporter::new(Arc::new(HalfBroken), config());
        let outcome = exporter
            .export_batch(&[job("good.bin", "AB"), job("bad.bin", "bad")])
            .unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.names, vec!["good.bin"]);
        // Still a valid archive with the one surviving entry.
        assert!(outcome.archive.len() > 22);
    }

    #[test]
    fn everything_failing_still_yields_an_empty_archive() {
        let exporter = Exporter::new(Arc::new(BrokenDownloader), config());
        let outcome = exporter.export_batch(&[job("a.bin", "AB")]).unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.archive.len(), 22);
    }

    #[test]
    fn batches_split_by_configured_size() {
        let exporter = Exporter::new(Arc::new(MockDownloadService), config());
        let jobs = vec![job("a", "A"), job("b", "B"), job("c", "C")];
        let outcomes = exporter.export_batches(jobs).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].names.len(), 2);
        assert_eq!(outcomes[1].names.len(), 1);
    }

    #[test]
    fn cancellation_stops_the_batch() {
        let exporter = Exporter::new(Arc::new(MockDownloadService), config());
        exporter.cancel_flag().store(true, Ordering::Relaxed);
        assert!(exporter.export_batch(&[job("a.bin", "AB")]).is_err());
    }

    #[test]
    fn jobs_take_names_from_the_url_path() {
        let mut item = crate::item::MediaItem {
            identity: "content:x".into(),
            media_url: "https://media.example/abc/source.mp4?sig=1".into(),
            poster_url: None,
            record_id: None,
            lineage_id: None,
            prompt: None,
            has_metadata: None,
            created_at: DateTime::UNIX_EPOCH,
            kind: MediaKind::Video,
        };
        let jobs = jobs_from_items(std::slice::from_ref(&item));
        assert_eq!(jobs[0].name, "001-source.mp4");

        item.media_url = "https://media.example/".into();
        let jobs = jobs_from_items(std::slice::from_ref(&item));
        assert_eq!(jobs[0].name, "001-media.mp4");

        item.media_url = String::new();
        assert!(jobs_from_items(std::slice::from_ref(&item)).is_empty());
    }
}
