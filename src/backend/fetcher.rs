//! Seams between the download engine and the network.
//!
//! The orchestrator and the chapter registry only talk to these traits, so
//! tests can drive them with in-memory fakes and the production client can
//! be swapped for anything that knows how to fetch a URL.

use async_trait::async_trait;

use super::mangadex::{ChapterImageManifest, ChapterPage};
use crate::error::Result;

/// Fetches chapter image manifests and raw image bytes.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_manifest(&self, chapter_id: &str) -> Result<ChapterImageManifest>;

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// Paginated chapter listing for one manga.
#[async_trait]
pub trait ChapterSource: Send + Sync {
    async fn fetch_chapters(&self, manga_id: &str, offset: usize, limit: usize)
    -> Result<ChapterPage>;
}
