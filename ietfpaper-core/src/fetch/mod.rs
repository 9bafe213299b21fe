//! Download-stage fetchers: plain HTTP, the datatracker API and the IMAP
//! mail archive.

pub mod datatracker;
pub mod http;
pub mod mail;

pub use datatracker::{DatatrackerClient, HttpPageSource, PageSource};
pub use http::HttpFetcher;
pub use mail::{
    ArchivedMessage, FolderDump, FolderList, ImapArchive, MailArchive, mirror_folder,
    mirror_folder_list,
};
