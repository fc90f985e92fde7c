use log::debug;

use super::fetcher::ChapterSource;
use super::mangadex::{Chapter, ChapterPage};
use crate::error::Result;

pub const PAGE_SIZE: usize = 10;
/// Pages shown on each side of the current one in the navigator
const PAGES_PADDING: usize = 2;

pub fn total_pages(total: usize) -> usize {
    total.div_ceil(PAGE_SIZE)
}

/// Fetches one page of a manga's chapter feed.
pub async fn load_page(
    source: &dyn ChapterSource,
    manga_id: &str,
    page_index: usize,
) -> Result<ChapterPage> {
    debug!("loading chapter page {} of manga {}", page_index, manga_id);
    source
        .fetch_chapters(manga_id, page_index * PAGE_SIZE, PAGE_SIZE)
        .await
}

/// The chapter page currently on screen for one manga.
#[derive(Debug, Clone, Default)]
pub struct ChapterRegistry {
    /// Most recently requested page
    page: usize,
    /// Page whose chapters are in `chapters`
    shown: usize,
    total: usize,
    chapters: Vec<Chapter>,
    loading: bool,
    loaded_once: bool,
}

impl ChapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.total)
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Moves to `page_index` if it exists, returning the index to fetch.
    /// Page 0 is always accepted until the first page has arrived.
    pub fn request_page(&mut self, page_index: usize) -> Option<usize> {
        let in_range = if self.loaded_once {
            page_index < self.total_pages()
        } else {
            page_index == 0
        };
        if !in_range {
            return None;
        }

        self.page = page_index;
        self.loading = true;
        Some(page_index)
    }

    /// Installs a fetched page. Responses for a page the user has already
    /// navigated away from are dropped; returns whether the page was used.
    pub fn apply(&mut self, page_index: usize, page: ChapterPage) -> bool {
        if page_index != self.page {
            debug!(
                "dropping stale chapter page {} (showing {})",
                page_index, self.page
            );
            return false;
        }

        self.chapters = page.chapters;
        self.shown = page_index;
        self.total = page.total;
        self.loading = false;
        self.loaded_once = true;
        true
    }

    /// Clears the loading flag after a failed fetch of the current page and
    /// goes back to the page still on screen.
    pub fn fail(&mut self, page_index: usize) {
        if page_index == self.page {
            debug!(
                "chapter page {} failed, staying on {}",
                page_index, self.shown
            );
            self.page = self.shown;
            self.loading = false;
        }
    }

    pub fn navigator(&self) -> Vec<PageSlot> {
        page_window(self.page, self.total_pages())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    Prev { enabled: bool },
    Page { index: usize, active: bool },
    Gap,
    Next { enabled: bool },
}

/// Page navigator layout: first page, a window of `PAGES_PADDING` pages on
/// either side of `page`, last page, with gaps where pages are skipped.
pub fn page_window(page: usize, total_pages: usize) -> Vec<PageSlot> {
    let mut slots = vec![PageSlot::Prev { enabled: page > 0 }];

    if page > PAGES_PADDING {
        slots.push(PageSlot::Page {
            index: 0,
            active: false,
        });
    }
    if page > PAGES_PADDING + 1 {
        slots.push(PageSlot::Gap);
    }

    let start = page.saturating_sub(PAGES_PADDING);
    let end = (page + PAGES_PADDING).min(total_pages.saturating_sub(1));
    if total_pages > 0 {
        for index in start..=end {
            slots.push(PageSlot::Page {
                index,
                active: index == page,
            });
        }
    }

    if page + PAGES_PADDING + 2 < total_pages {
        slots.push(PageSlot::Gap);
    }
    if page + PAGES_PADDING + 1 < total_pages {
        slots.push(PageSlot::Page {
            index: total_pages - 1,
            active: false,
        });
    }

    slots.push(PageSlot::Next {
        enabled: page + 1 < total_pages,
    });
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn chapters(range: std::ops::Range<usize>) -> Vec<Chapter> {
        range
            .map(|n| Chapter {
                id: format!("c-{n}"),
                chapter: n.to_string(),
                title: None,
                volume: None,
                pages: 1,
            })
            .collect()
    }

    struct FakeFeed {
        total: usize,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    #[async_trait]
    impl ChapterSource for FakeFeed {
        async fn fetch_chapters(
            &self,
            _manga_id: &str,
            offset: usize,
            limit: usize,
        ) -> Result<ChapterPage> {
            self.calls.lock().unwrap().push((offset, limit));
            let end = (offset + limit).min(self.total);
            Ok(ChapterPage {
                chapters: chapters(offset + 1..end + 1),
                total: self.total,
            })
        }
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0), 0);
        assert_eq!(total_pages(10), 1);
        assert_eq!(total_pages(25), 3);
    }

    #[tokio::test]
    async fn load_page_uses_page_offset() {
        let feed = FakeFeed {
            total: 25,
            calls: Mutex::new(Vec::new()),
        };

        let page = load_page(&feed, "m", 2).await.unwrap();
        assert_eq!(page.chapters.len(), 5);
        assert_eq!(page.chapters[0].chapter, "21");
        assert_eq!(*feed.calls.lock().unwrap(), vec![(20, 10)]);
    }

    #[test]
    fn request_page_respects_bounds() {
        let mut registry = ChapterRegistry::new();
        assert_eq!(registry.request_page(1), None);
        assert_eq!(registry.request_page(0), Some(0));
        registry.apply(
            0,
            ChapterPage {
                chapters: chapters(1..11),
                total: 25,
            },
        );

        assert_eq!(registry.total_pages(), 3);
        assert_eq!(registry.request_page(2), Some(2));
        assert!(registry.is_loading());
        assert_eq!(registry.request_page(3), None);
        assert_eq!(registry.page(), 2);
    }

    #[test]
    fn stale_page_is_dropped() {
        let mut registry = ChapterRegistry::new();
        registry.request_page(0);
        registry.apply(
            0,
            ChapterPage {
                chapters: chapters(1..11),
                total: 25,
            },
        );
        registry.request_page(1);
        registry.request_page(2);

        let stale = ChapterPage {
            chapters: chapters(11..21),
            total: 25,
        };
        assert!(!registry.apply(1, stale));
        assert_eq!(registry.chapters()[0].chapter, "1");
        assert!(registry.is_loading());

        let fresh = ChapterPage {
            chapters: chapters(21..26),
            total: 25,
        };
        assert!(registry.apply(2, fresh));
        assert_eq!(registry.chapters().len(), 5);
        assert!(!registry.is_loading());
    }

    #[test]
    fn failed_page_falls_back_to_shown_page() {
        let mut registry = ChapterRegistry::new();
        registry.request_page(0);
        registry.apply(
            0,
            ChapterPage {
                chapters: chapters(1..11),
                total: 25,
            },
        );

        registry.request_page(1);
        registry.fail(1);

        assert_eq!(registry.page(), 0);
        assert!(!registry.is_loading());
        assert_eq!(registry.chapters()[0].chapter, "1");
        assert!(registry
            .navigator()
            .contains(&PageSlot::Page { index: 0, active: true }));

        // a late failure for a page already left changes nothing
        registry.request_page(2);
        registry.fail(1);
        assert_eq!(registry.page(), 2);
        assert!(registry.is_loading());
    }

    #[test]
    fn window_near_start() {
        assert_eq!(
            page_window(0, 3),
            vec![
                PageSlot::Prev { enabled: false },
                PageSlot::Page { index: 0, active: true },
                PageSlot::Page { index: 1, active: false },
                PageSlot::Page { index: 2, active: false },
                PageSlot::Next { enabled: true },
            ]
        );
    }

    #[test]
    fn window_in_middle_has_gaps() {
        assert_eq!(
            page_window(5, 12),
            vec![
                PageSlot::Prev { enabled: true },
                PageSlot::Page { index: 0, active: false },
                PageSlot::Gap,
                PageSlot::Page { index: 3, active: false },
                PageSlot::Page { index: 4, active: false },
                PageSlot::Page { index: 5, active: true },
                PageSlot::Page { index: 6, active: false },
                PageSlot::Page { index: 7, active: false },
                PageSlot::Gap,
                PageSlot::Page { index: 11, active: false },
                PageSlot::Next { enabled: true },
            ]
        );
    }

    #[test]
    fn window_without_pages() {
        assert_eq!(
            page_window(0, 0),
            vec![
                PageSlot::Prev { enabled: false },
                PageSlot::Next { enabled: false },
            ]
        );
    }
}
