use async_trait::async_trait;
use image::DynamicImage;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

use super::fetcher::{ChapterSource, ResourceFetcher};
use crate::config::Config;
use crate::error::{Error, Result};

/// Chapter number shown for chapters the feed leaves unnumbered
pub const ONESHOT: &str = "Oneshot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    pub chapter: String,
    pub title: Option<String>,
    pub volume: Option<String>,
    pub pages: usize,
}

/// One page of a manga's chapter feed plus the feed's total size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterPage {
    pub chapters: Vec<Chapter>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    data: Vec<ChapterData>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    volume: Option<String>,
    #[serde(default)]
    pages: usize,
}

impl From<ChapterData> for Chapter {
    fn from(c: ChapterData) -> Self {
        Chapter {
            id: c.id,
            chapter: c
                .attributes
                .chapter
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| ONESHOT.to_string()),
            title: c.attributes.title.filter(|t| !t.trim().is_empty()),
            volume: c.attributes.volume,
            pages: c.attributes.pages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageQuality {
    #[default]
    Data,
    DataSaver,
}

impl ImageQuality {
    pub fn path_segment(self) -> &'static str {
        match self {
            ImageQuality::Data => "data",
            ImageQuality::DataSaver => "data-saver",
        }
    }
}

/// Where the images of one chapter live on the at-home network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterImageManifest {
    pub base_url: String,
    pub hash: String,
    pub filenames: Vec<String>,
    pub quality: ImageQuality,
}

impl ChapterImageManifest {
    pub fn image_url(&self, filename: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.quality.path_segment(),
            self.hash,
            filename
        )
    }
}

#[derive(Debug, Deserialize)]
struct AtHomeResponse {
    result: String,
    #[serde(rename = "baseUrl", default)]
    base_url: String,
    chapter: Option<AtHomeChapter>,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    data: Vec<String>,
    #[serde(rename = "dataSaver", default)]
    data_saver: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Manga {
    pub id: String,
    pub title: String,
    pub author: String,
    pub artist: String,
    pub status: String,
    pub description: String,
    pub cover_url: String,
}

#[derive(Debug, Deserialize)]
struct MangaResponse {
    data: Vec<MangaData>,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    title: HashMap<String, String>,
    status: Option<String>,
    description: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
struct RelationshipAttributes {
    name: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

fn parse_manga_list(response: MangaResponse, uploads_base_url: &str) -> Vec<Manga> {
    response
        .data
        .into_iter()
        .map(|m| {
            let mut author = String::new();
            let mut artist = String::new();
            let mut cover_filename = String::new();

            for rel in &m.relationships {
                let Some(attrs) = &rel.attributes else {
                    continue;
                };
                match rel.rel_type.as_str() {
                    "author" => author = attrs.name.clone().unwrap_or_default(),
                    "artist" => artist = attrs.name.clone().unwrap_or_default(),
                    "cover_art" => cover_filename = attrs.file_name.clone().unwrap_or_default(),
                    _ => {}
                }
            }

            let cover_url = if !cover_filename.is_empty() {
                format!("{}/covers/{}/{}", uploads_base_url, m.id, cover_filename)
            } else {
                String::new()
            };

            let title = m
                .attributes
                .title
                .get("en")
                .or_else(|| m.attributes.title.values().next())
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string());

            let description = m
                .attributes
                .description
                .as_ref()
                .and_then(|d| d.get("en").or_else(|| d.values().next()))
                .cloned()
                .unwrap_or_default();

            Manga {
                id: m.id,
                title,
                author,
                artist,
                status: m.attributes.status.unwrap_or_else(|| "Unknown".to_string()),
                description,
                cover_url,
            }
        })
        .collect()
}

/// MangaDex API client. Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct MangaDexClient {
    http: reqwest::Client,
    api_base_url: String,
    uploads_base_url: String,
    language: String,
    quality: ImageQuality,
}

impl MangaDexClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            uploads_base_url: config.uploads_base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            quality: config.image_quality,
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(url, format!("HTTP {}", status)));
        }

        let bytes = response.bytes().await.map_err(|e| Error::fetch(url, e))?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::decode(url, e))
    }

    pub async fn search_manga(&self, query: &str) -> Result<Vec<Manga>> {
        let url = format!(
            "{}/manga?title={}&includes[]=author&includes[]=artist&includes[]=cover_art&limit=20",
            self.api_base_url,
            urlencoding::encode(query)
        );

        let response: MangaResponse = self.get_json(&url).await?;
        Ok(parse_manga_list(response, &self.uploads_base_url))
    }

    pub async fn get_popular_now(&self) -> Result<Vec<Manga>> {
        let url = format!(
            "{}/manga?includes[]=author&includes[]=artist&includes[]=cover_art&order[followedCount]=desc&limit=20",
            self.api_base_url
        );

        let response: MangaResponse = self.get_json(&url).await?;
        Ok(parse_manga_list(response, &self.uploads_base_url))
    }

    pub async fn fetch_cover_image(&self, cover_url: &str) -> Option<DynamicImage> {
        if cover_url.is_empty() {
            return None;
        }

        // Use thumbnail size (256px) for faster loading
        let thumb_url = format!("{}.256.jpg", cover_url);
        let bytes = match self.get_bytes(&thumb_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("cover fetch failed: {}", e);
                return None;
            }
        };

        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()
    }
}

#[async_trait]
impl ChapterSource for MangaDexClient {
    async fn fetch_chapters(
        &self,
        manga_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<ChapterPage> {
        let url = format!(
            "{}/manga/{}/feed?order[chapter]=asc&translatedLanguage[]={}&limit={}&offset={}",
            self.api_base_url, manga_id, self.language, limit, offset
        );

        debug!("fetching chapter feed {}", url);
        let response: ChapterResponse = self.get_json(&url).await?;

        Ok(ChapterPage {
            chapters: response.data.into_iter().map(Chapter::from).collect(),
            total: response.total,
        })
    }
}

#[async_trait]
impl ResourceFetcher for MangaDexClient {
    async fn fetch_manifest(&self, chapter_id: &str) -> Result<ChapterImageManifest> {
        let url = format!("{}/at-home/server/{}", self.api_base_url, chapter_id);
        let response: AtHomeResponse = self.get_json(&url).await?;

        if response.result != "ok" {
            return Err(Error::fetch(&url, format!("result \"{}\"", response.result)));
        }
        let chapter = response
            .chapter
            .ok_or_else(|| Error::decode(&url, "missing chapter field"))?;

        let filenames = match self.quality {
            ImageQuality::Data => chapter.data,
            ImageQuality::DataSaver => chapter.data_saver,
        };

        Ok(ChapterImageManifest {
            base_url: response.base_url,
            hash: chapter.hash,
            filenames,
            quality: self.quality,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url).await
    }
}
