//! Batch download of selected chapters into one zip archive.
//!
//! A run walks the selection snapshot strictly in order: every manifest is
//! fetched first, then every image, one request at a time. The first failure
//! ends the run and nothing is delivered. Progress is published on a
//! `watch` channel so the UI can poll it every frame.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use super::archive::{ArchiveBuilder, Compression};
use super::fetcher::ResourceFetcher;
use super::mangadex::ChapterImageManifest;
use super::selection::SelectionEntry;
use crate::error::{Error, Result};

pub const ARCHIVE_EXTENSION: &str = "zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadProgress {
    pub in_progress: bool,
    pub completed: usize,
    pub total: usize,
}

impl DownloadProgress {
    pub const IDLE: DownloadProgress = DownloadProgress {
        in_progress: false,
        completed: 0,
        total: 0,
    };

    /// Whole percent of images archived; 100 only once all of them are.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (self.completed * 100 / self.total) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Empty selection, or another run was already active
    Skipped,
    Delivered(PathBuf),
}

/// Receives the finished archive.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn deliver(&self, file_name: &str, bytes: Vec<u8>) -> Result<PathBuf>;
}

/// Writes archives into a directory, never overwriting an existing file.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArchiveSink for DirectorySink {
    async fn deliver(&self, file_name: &str, bytes: Vec<u8>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let (path, mut file) = create_unique(&self.dir, file_name).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(path)
    }
}

/// Creates `file_name` in `dir`, or the first free `name (n).ext` after it.
/// Each candidate is claimed with `create_new`, so concurrent deliveries of
/// the same name end up in different files.
async fn create_unique(dir: &Path, file_name: &str) -> Result<(PathBuf, tokio::fs::File)> {
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (file_name, String::new()),
    };

    let mut n = 0;
    loop {
        let candidate = if n == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{} ({}){}", stem, n, ext))
        };
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// `<label>.zip`, with characters most filesystems reject replaced by `_`.
pub fn archive_file_name(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let base = if cleaned.is_empty() {
        "manga"
    } else {
        cleaned.as_str()
    };
    format!("{}.{}", base, ARCHIVE_EXTENSION)
}

pub struct DownloadOrchestrator {
    fetcher: Arc<dyn ResourceFetcher>,
    sink: Arc<dyn ArchiveSink>,
    compression: Compression,
    active: AtomicBool,
    progress: watch::Sender<DownloadProgress>,
}

/// Returns the orchestrator to idle however the run ends, including when
/// the task running it is dropped.
struct ActiveRun<'a> {
    orchestrator: &'a DownloadOrchestrator,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.orchestrator.progress.send_replace(DownloadProgress::IDLE);
        self.orchestrator.active.store(false, Ordering::Release);
    }
}

impl DownloadOrchestrator {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        sink: Arc<dyn ArchiveSink>,
        compression: Compression,
    ) -> Self {
        let (progress, _) = watch::channel(DownloadProgress::IDLE);
        Self {
            fetcher,
            sink,
            compression,
            active: AtomicBool::new(false),
            progress,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> DownloadProgress {
        *self.progress.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Downloads every selected chapter into `<label>.zip`.
    ///
    /// Returns `Skipped` without touching any state when the selection is
    /// empty or a run is already active.
    pub async fn run(&self, selection: Vec<SelectionEntry>, label: &str) -> Result<RunOutcome> {
        if selection.is_empty() {
            debug!("download requested with empty selection");
            return Ok(RunOutcome::Skipped);
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("download already in progress, ignoring request");
            return Ok(RunOutcome::Skipped);
        }
        let _run = ActiveRun { orchestrator: self };

        self.progress.send_replace(DownloadProgress {
            in_progress: true,
            completed: 0,
            total: 0,
        });
        info!(
            "starting download of {} chapter(s) for \"{}\"",
            selection.len(),
            label
        );

        let result = self.download(&selection, label).await;
        match &result {
            Ok(path) => info!("archive delivered to {}", path.display()),
            Err(e) => warn!("download of \"{}\" failed: {}", label, e),
        }
        result.map(RunOutcome::Delivered)
    }

    async fn download(&self, selection: &[SelectionEntry], label: &str) -> Result<PathBuf> {
        let manifests = self.fetch_manifests(selection).await?;
        let total = manifests.iter().map(|(_, m)| m.filenames.len()).sum();
        self.progress.send_modify(|p| p.total = total);

        let archive = self.collect_images(&manifests, total).await?;

        let bytes = tokio::task::spawn_blocking(move || archive.finalize())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("archive task failed: {}", e))))??;

        self.sink.deliver(&archive_file_name(label), bytes).await
    }

    async fn fetch_manifests<'s>(
        &self,
        selection: &'s [SelectionEntry],
    ) -> Result<Vec<(&'s SelectionEntry, ChapterImageManifest)>> {
        let mut manifests = Vec::with_capacity(selection.len());
        for entry in selection {
            let manifest = self.fetcher.fetch_manifest(&entry.chapter_id).await?;
            debug!(
                "chapter {} ({}): {} image(s)",
                entry.chapter_id,
                entry.folder_name,
                manifest.filenames.len()
            );
            manifests.push((entry, manifest));
        }
        Ok(manifests)
    }

    async fn collect_images(
        &self,
        manifests: &[(&SelectionEntry, ChapterImageManifest)],
        total: usize,
    ) -> Result<ArchiveBuilder> {
        let mut archive = ArchiveBuilder::new(self.compression);
        let mut completed = 0;

        for (entry, manifest) in manifests {
            let mut folder = archive.add_folder(&entry.folder_name);
            debug!("archiving {} image(s) into \"{}\"", manifest.filenames.len(), folder.name());
            for filename in &manifest.filenames {
                let bytes = self.fetcher.fetch_bytes(&manifest.image_url(filename)).await?;
                folder.add_entry(filename, bytes);

                completed += 1;
                self.progress.send_replace(DownloadProgress {
                    in_progress: true,
                    completed,
                    total,
                });
            }
        }

        Ok(archive)
    }
}
