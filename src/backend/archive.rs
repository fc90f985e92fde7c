use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

impl From<Compression> for CompressionMethod {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// Keeps a folder name a single path component inside the archive.
pub fn sanitize_folder_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

#[derive(Debug, Default)]
struct Folder {
    name: String,
    entries: Vec<(String, Vec<u8>)>,
}

/// In-memory collection of folders and files, written out as one zip.
///
/// A builder is good for exactly one archive: `finalize` consumes it.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    folders: Vec<Folder>,
    compression: Compression,
}

pub struct FolderHandle<'a> {
    folder: &'a mut Folder,
}

impl FolderHandle<'_> {
    pub fn name(&self) -> &str {
        &self.folder.name
    }

    /// Stores `bytes` as `filename`; a repeated filename replaces the
    /// earlier entry.
    pub fn add_entry(&mut self, filename: &str, bytes: Vec<u8>) {
        if let Some(existing) = self
            .folder
            .entries
            .iter_mut()
            .find(|(name, _)| name == filename)
        {
            existing.1 = bytes;
        } else {
            self.folder.entries.push((filename.to_string(), bytes));
        }
    }
}

impl ArchiveBuilder {
    pub fn new(compression: Compression) -> Self {
        Self {
            folders: Vec::new(),
            compression,
        }
    }

    /// Returns the folder called `name`, creating it on first use.
    pub fn add_folder(&mut self, name: &str) -> FolderHandle<'_> {
        let name = sanitize_folder_name(name);
        let index = match self.folders.iter().position(|f| f.name == name) {
            Some(index) => index,
            None => {
                self.folders.push(Folder {
                    name,
                    entries: Vec::new(),
                });
                self.folders.len() - 1
            }
        };

        FolderHandle {
            folder: &mut self.folders[index],
        }
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn entry_count(&self) -> usize {
        self.folders.iter().map(|f| f.entries.len()).sum()
    }

    /// Writes every folder and entry into a zip and returns its bytes.
    pub fn finalize(self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(self.compression.into());

        for folder in &self.folders {
            writer.add_directory(format!("{}/", folder.name), options)?;
            for (filename, bytes) in &folder.entries {
                writer.start_file(format!("{}/{}", folder.name, filename), options)?;
                writer.write_all(bytes)?;
            }
        }

        let bytes = writer.finish()?.into_inner();
        debug!(
            "finalized archive: {} folders, {} entries, {} bytes",
            self.folder_count(),
            self.entry_count(),
            bytes.len()
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_back(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut files = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            files.push((file.name().to_string(), content));
        }
        files
    }

    #[test]
    fn finalize_writes_folders_in_order() {
        let mut archive = ArchiveBuilder::new(Compression::Deflated);
        let mut first = archive.add_folder("1: Start");
        first.add_entry("a.png", b"aaa".to_vec());
        first.add_entry("b.png", b"bbb".to_vec());
        archive.add_folder("2").add_entry("c.png", b"ccc".to_vec());

        let files = read_back(archive.finalize().unwrap());
        let names: Vec<_> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["1: Start/", "1: Start/a.png", "1: Start/b.png", "2/", "2/c.png"]
        );
        assert_eq!(files[2].1, b"bbb");
    }

    #[test]
    fn add_folder_is_idempotent() {
        let mut archive = ArchiveBuilder::new(Compression::Stored);
        archive.add_folder("1").add_entry("a.png", vec![1]);
        archive.add_folder("1").add_entry("b.png", vec![2]);

        assert_eq!(archive.folder_count(), 1);
        assert_eq!(archive.entry_count(), 2);
    }

    #[test]
    fn duplicate_entry_last_write_wins() {
        let mut archive = ArchiveBuilder::new(Compression::Stored);
        let mut folder = archive.add_folder("1");
        folder.add_entry("a.png", vec![1]);
        folder.add_entry("a.png", vec![2]);

        let files = read_back(archive.finalize().unwrap());
        assert_eq!(files, vec![("1/".to_string(), vec![]), ("1/a.png".to_string(), vec![2])]);
    }

    #[test]
    fn separators_in_folder_names_are_flattened() {
        let mut archive = ArchiveBuilder::new(Compression::Stored);
        let folder = archive.add_folder("3: Either/Or");
        assert_eq!(folder.name(), "3: Either_Or");
    }

    #[test]
    fn empty_folder_still_listed() {
        let mut archive = ArchiveBuilder::new(Compression::Deflated);
        archive.add_folder("Oneshot");
        let files = read_back(archive.finalize().unwrap());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "Oneshot/");
    }
}
