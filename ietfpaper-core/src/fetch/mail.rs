//! Mirror of the IETF mail archive over IMAP.
//!
//! The archive exposes every mailing list as a folder in a shared namespace.
//! [`FolderList`] is written to `lists.json` and drives the per-folder
//! downloads; each folder is stored as a [`FolderDump`] with base64 message
//! bodies.

use crate::artifact::write_json;
use crate::config::MailConfig;
use crate::error::{FetchError, PaperError};
use async_imap::types::NameAttribute;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tracing::{debug, info};

/// Folder listing of the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderList {
    pub fetched: String,
    pub imap_prefix: String,
    pub imap_separator: String,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    pub uid: u32,
    /// Raw RFC 822 message, base64 encoded.
    pub msg: String,
}

/// Every message in one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderDump {
    pub fetched: String,
    pub folder: String,
    pub uidvalidity: u32,
    pub msgs: Vec<ArchivedMessage>,
}

/// Read access to a mail archive.
#[async_trait]
pub trait MailArchive: Send + Sync {
    async fn list_folders(&self) -> Result<FolderList, FetchError>;
    async fn fetch_folder(&self, folder: &str) -> Result<FolderDump, FetchError>;
}

/// Fetch the folder list and write it to `dest`.
pub async fn mirror_folder_list(
    archive: &dyn MailArchive,
    dest: &Path,
) -> Result<FolderList, PaperError> {
    let list = archive.list_folders().await?;
    write_json(dest, &list).await?;
    info!(folders = list.folders.len(), dest = %dest.display(), "Wrote mail folder list");
    Ok(list)
}

/// Fetch one folder and write it to `dest`.
pub async fn mirror_folder(
    archive: &dyn MailArchive,
    folder: &str,
    dest: &Path,
) -> Result<usize, PaperError> {
    let dump = archive.fetch_folder(folder).await?;
    write_json(dest, &dump).await?;
    info!(folder, messages = dump.msgs.len(), "Wrote mail folder");
    Ok(dump.msgs.len())
}

/// Local time in the format the archive files carry.
pub fn fetched_now() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Joins the levels of a nested folder name. Folder names become file
/// names, so they never carry the IMAP separator.
const NESTED_FOLDER_JOIN: &str = ".";

/// Split listed mailbox names into the shared prefix (including the trailing
/// separator), the separator and the folder names below that prefix. Nested
/// mailboxes keep every level below the prefix, joined with `.`. The result
/// is index-aligned with `names`; `\Noselect` entries must already be
/// filtered out.
pub fn split_folder_names(names: &[(String, Option<String>)]) -> (String, String, Vec<String>) {
    let separator = names
        .iter()
        .find_map(|(_, d)| d.clone())
        .unwrap_or_else(|| "/".to_string());
    let sep = separator.as_str();

    let mut prefix = names.first().map_or("", |(name, _)| parent_of(name, sep));
    for (name, _) in names {
        while !name.starts_with(prefix) {
            prefix = parent_of(&prefix[..prefix.len() - sep.len()], sep);
        }
    }

    let folders = names
        .iter()
        .map(|(name, _)| {
            name[prefix.len()..]
                .split(sep)
                .collect::<Vec<_>>()
                .join(NESTED_FOLDER_JOIN)
        })
        .collect();
    (prefix.to_string(), separator, folders)
}

/// The mailbox whose folder name is `folder`, as assigned by
/// [`split_folder_names`].
pub fn mailbox_for_folder(names: &[(String, Option<String>)], folder: &str) -> Option<String> {
    let (_, _, folders) = split_folder_names(names);
    folders
        .iter()
        .position(|f| f == folder)
        .map(|i| names[i].0.clone())
}

/// `name` up to and including its last separator, or `""`.
fn parent_of<'a>(name: &'a str, sep: &str) -> &'a str {
    name.rfind(sep).map_or("", |i| &name[..i + sep.len()])
}

type ImapSession = async_imap::Session<TlsStream<TcpStream>>;

/// [`MailArchive`] over IMAP with TLS.
pub struct ImapArchive {
    host: String,
    port: u16,
    username: String,
    password: String,
    fetch_chunk: usize,
}

impl ImapArchive {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            host: config.imap_host.clone(),
            port: config.imap_port,
            username: config.username.clone(),
            password: config.password.clone(),
            fetch_chunk: config.fetch_chunk.max(1),
        }
    }

    async fn connect(&self) -> Result<ImapSession, FetchError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| imap_error(format!("TCP connect error: {e}")))?;

        let native_tls_connector = native_tls::TlsConnector::new()
            .map_err(|e| imap_error(format!("TLS connector error: {e}")))?;
        let tls_connector = tokio_native_tls::TlsConnector::from(native_tls_connector);
        let tls_stream = tls_connector
            .connect(&self.host, tcp)
            .await
            .map_err(|e| imap_error(format!("TLS connect error: {e}")))?;

        let mut client = async_imap::Client::new(tls_stream);
        client
            .read_response()
            .await
            .map_err(|e| imap_error(format!("IMAP greeting read error: {e}")))?
            .ok_or_else(|| imap_error("IMAP server closed connection before greeting"))?;

        let session = client
            .login(&self.username, &self.password)
            .await
            .map_err(|e| imap_error(format!("IMAP login error: {}", e.0)))?;
        debug!(host = %self.host, "IMAP session open");
        Ok(session)
    }

    /// Selectable mailboxes as `(name, delimiter)` pairs.
    async fn list_mailboxes(
        session: &mut ImapSession,
        pattern: &str,
    ) -> Result<Vec<(String, Option<String>)>, FetchError> {
        let names: Vec<_> = session
            .list(Some(""), Some(pattern))
            .await
            .map_err(|e| imap_error(format!("IMAP list error: {e}")))?
            .try_collect()
            .await
            .map_err(|e| imap_error(format!("IMAP stream error: {e}")))?;
        Ok(names
            .iter()
            .filter(|n| !n.attributes().iter().any(|a| matches!(a, NameAttribute::NoSelect)))
            .map(|n| (n.name().to_string(), n.delimiter().map(str::to_string)))
            .collect())
    }
}

#[async_trait]
impl MailArchive for ImapArchive {
    async fn list_folders(&self) -> Result<FolderList, FetchError> {
        let mut session = self.connect().await?;
        let names = Self::list_mailboxes(&mut session, "*").await?;
        let _ = session.logout().await;

        let (imap_prefix, imap_separator, folders) = split_folder_names(&names);
        Ok(FolderList {
            fetched: fetched_now(),
            imap_prefix,
            imap_separator,
            folders,
        })
    }

    async fn fetch_folder(&self, folder: &str) -> Result<FolderDump, FetchError> {
        let mut session = self.connect().await?;

        let names = Self::list_mailboxes(&mut session, "*").await?;
        let mailbox =
            mailbox_for_folder(&names, folder).ok_or_else(|| FetchError::FolderNotFound {
                folder: folder.to_string(),
            })?;
        debug!(folder, mailbox = %mailbox, "Resolved mailbox");

        let info = session
            .examine(&mailbox)
            .await
            .map_err(|e| imap_error(format!("IMAP examine error: {e}")))?;
        let uidvalidity = info.uid_validity.unwrap_or(0);

        let mut uids: Vec<u32> = session
            .uid_search("NOT DELETED")
            .await
            .map_err(|e| imap_error(format!("IMAP search error: {e}")))?
            .into_iter()
            .collect();
        uids.sort_unstable();

        let mut msgs = Vec::with_capacity(uids.len());
        for chunk in uids.chunks(self.fetch_chunk) {
            let set = chunk
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let fetched: Vec<_> = session
                .uid_fetch(&set, "RFC822")
                .await
                .map_err(|e| imap_error(format!("IMAP fetch error: {e}")))?
                .try_collect()
                .await
                .map_err(|e| imap_error(format!("IMAP stream error: {e}")))?;
            for msg in &fetched {
                if let (Some(uid), Some(body)) = (msg.uid, msg.body()) {
                    msgs.push(ArchivedMessage {
                        uid,
                        msg: STANDARD.encode(body),
                    });
                }
            }
            debug!(folder, fetched = msgs.len(), total = uids.len(), "Fetched messages");
        }
        let _ = session.logout().await;

        Ok(FolderDump {
            fetched: fetched_now(),
            folder: folder.to_string(),
            uidvalidity,
            msgs,
        })
    }
}

fn imap_error(message: impl Into<String>) -> FetchError {
    FetchError::Imap {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockArchive;

    #[async_trait]
    impl MailArchive for MockArchive {
        async fn list_folders(&self) -> Result<FolderList, FetchError> {
            Ok(FolderList {
                fetched: "2024-05-01T10:00:00.000000".into(),
                imap_prefix: "Shared Folders/".into(),
                imap_separator: "/".into(),
                folders: vec!["ietf".into(), "quic".into()],
            })
        }

        async fn fetch_folder(&self, folder: &str) -> Result<FolderDump, FetchError> {
            if folder != "quic" {
                return Err(FetchError::FolderNotFound {
                    folder: folder.into(),
                });
            }
            Ok(FolderDump {
                fetched: "2024-05-01T10:00:00.000000".into(),
                folder: folder.into(),
                uidvalidity: 7,
                msgs: vec![ArchivedMessage {
                    uid: 1,
                    msg: STANDARD.encode("Subject: hi\r\n\r\nbody"),
                }],
            })
        }
    }

    #[test]
    fn test_split_folder_names() {
        let names = vec![
            ("Shared Folders/ietf".to_string(), Some("/".to_string())),
            ("Shared Folders/quic".to_string(), Some("/".to_string())),
        ];
        let (prefix, sep, folders) = split_folder_names(&names);
        assert_eq!(prefix, "Shared Folders/");
        assert_eq!(sep, "/");
        assert_eq!(folders, vec!["ietf", "quic"]);
    }

    #[test]
    fn test_split_folder_names_flat() {
        let names = vec![("ietf".to_string(), Some(".".to_string()))];
        let (prefix, sep, folders) = split_folder_names(&names);
        assert_eq!(prefix, "");
        assert_eq!(sep, ".");
        assert_eq!(folders, vec!["ietf"]);
    }

    #[test]
    fn test_split_folder_names_keeps_nested_levels() {
        let names: Vec<_> = [
            "Shared Folders/ietf",
            "Shared Folders/ietf/announce",
            "Shared Folders/iab/announce",
            "Shared Folders/quic",
        ]
        .iter()
        .map(|n| (n.to_string(), Some("/".to_string())))
        .collect();
        let (prefix, _, folders) = split_folder_names(&names);
        assert_eq!(prefix, "Shared Folders/");
        assert_eq!(folders, vec!["ietf", "ietf.announce", "iab.announce", "quic"]);

        assert_eq!(
            mailbox_for_folder(&names, "iab.announce").as_deref(),
            Some("Shared Folders/iab/announce")
        );
        assert_eq!(
            mailbox_for_folder(&names, "ietf").as_deref(),
            Some("Shared Folders/ietf")
        );
        assert_eq!(mailbox_for_folder(&names, "announce"), None);
    }

    #[test]
    fn test_split_folder_names_prefix_is_shared_by_all() {
        let names = vec![
            ("Shared Folders/ietf/announce".to_string(), Some("/".to_string())),
            ("Shared Folders/quic".to_string(), Some("/".to_string())),
        ];
        let (prefix, _, folders) = split_folder_names(&names);
        assert_eq!(prefix, "Shared Folders/");
        assert_eq!(folders, vec!["ietf.announce", "quic"]);

        let names = vec![
            ("Shared/ab".to_string(), Some("/".to_string())),
            ("Shared/a/b".to_string(), Some("/".to_string())),
            ("Other/c".to_string(), Some("/".to_string())),
        ];
        let (prefix, _, folders) = split_folder_names(&names);
        assert_eq!(prefix, "");
        assert_eq!(folders, vec!["Shared.ab", "Shared.a.b", "Other.c"]);
    }

    #[tokio::test]
    async fn test_mirror_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let lists = dir.path().join("ietf-ma/lists.json");
        let list = mirror_folder_list(&MockArchive, &lists).await.unwrap();
        assert_eq!(list.folders.len(), 2);
        let read: FolderList = serde_json::from_str(&std::fs::read_to_string(&lists).unwrap()).unwrap();
        assert_eq!(read, list);

        let quic = dir.path().join("ietf-ma/lists/quic.json");
        assert_eq!(mirror_folder(&MockArchive, "quic", &quic).await.unwrap(), 1);
        let dump: FolderDump = serde_json::from_str(&std::fs::read_to_string(&quic).unwrap()).unwrap();
        assert_eq!(dump.uidvalidity, 7);
    }

    #[tokio::test]
    async fn test_missing_folder_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nope.json");
        assert!(mirror_folder(&MockArchive, "nope", &dest).await.is_err());
        assert!(!dest.exists());
    }
}
