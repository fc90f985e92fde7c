pub mod archive;
pub mod download;
pub mod fetcher;
pub mod mangadex;
pub mod registry;
pub mod selection;
