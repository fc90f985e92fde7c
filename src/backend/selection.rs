use super::mangadex::Chapter;

/// Archive folder for a chapter: its number, plus `": title"` when it has one.
pub fn folder_name(chapter: &Chapter) -> String {
    match chapter.title.as_deref() {
        Some(title) if !title.is_empty() => format!("{}: {}", chapter.chapter, title),
        _ => chapter.chapter.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEntry {
    pub chapter_id: String,
    pub folder_name: String,
}

/// Chapters picked for download, in the order they were picked.
///
/// Entries survive page navigation: a chapter selected on page 1 stays
/// selected while the user browses page 3.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    entries: Vec<SelectionEntry>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the chapter is selected afterwards.
    pub fn toggle(&mut self, chapter: &Chapter) -> bool {
        if let Some(pos) = self.position(&chapter.id) {
            self.entries.remove(pos);
            false
        } else {
            self.insert(chapter);
            true
        }
    }

    /// Selects every chapter on the page, or clears the whole set when the
    /// page is already fully selected. Selections made on other pages are
    /// kept when selecting and dropped when clearing.
    pub fn toggle_all_on_page(&mut self, chapters: &[Chapter]) {
        if self.all_selected(chapters) {
            self.entries.clear();
            return;
        }

        for chapter in chapters {
            if !self.has(&chapter.id) {
                self.insert(chapter);
            }
        }
    }

    /// False for an empty page, so "select all" is offered there.
    pub fn all_selected(&self, chapters: &[Chapter]) -> bool {
        !chapters.is_empty() && chapters.iter().all(|c| self.has(&c.id))
    }

    pub fn has(&self, chapter_id: &str) -> bool {
        self.position(chapter_id).is_some()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SelectionEntry> {
        self.entries.iter()
    }

    /// Owned copy handed to a download run; later toggles do not affect it.
    pub fn snapshot(&self) -> Vec<SelectionEntry> {
        self.entries.clone()
    }

    fn insert(&mut self, chapter: &Chapter) {
        self.entries.push(SelectionEntry {
            chapter_id: chapter.id.clone(),
            folder_name: folder_name(chapter),
        });
    }

    fn position(&self, chapter_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.chapter_id == chapter_id)
    }
}
