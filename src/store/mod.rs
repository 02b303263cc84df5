pub mod jmap;
#[cfg(test)]
pub mod memory;

use crate::jmap::client::JmapError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Keyword the server sets once a message has been read.
pub const SEEN: &str = "$seen";

/// Backend-assigned message id. Only meaningful together with the folder it
/// was observed in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(String);

impl Uid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Uid(s.to_string())
    }
}

impl From<String> for Uid {
    fn from(s: String) -> Self {
        Uid(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: Uid,
    pub folder: String,
    pub raw: Vec<u8>,
    pub flags: BTreeSet<String>,
    pub received_at: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot connect to mail store: {0}")]
    Connection(String),
    #[error("not connected to mail store")]
    NotConnected,
    #[error("folder '{0}' does not exist")]
    FolderNotFound(String),
    #[error("no folder selected")]
    NoFolderSelected,
    #[error("message {uid} not found in '{folder}'")]
    MessageNotFound { uid: Uid, folder: String },
    #[error(transparent)]
    Transport(#[from] JmapError),
}

/// A mail backend: folders of messages carrying keyword flags.
///
/// Every search selects the folder it names. `fetch_raw`, `add_tag` and
/// `move_message` operate on uids from the currently selected folder.
pub trait MailStore {
    fn connect(&mut self) -> Result<(), StoreError>;

    /// Release the session. Safe to call when not connected.
    fn disconnect(&mut self);

    fn folder_exists(&mut self, folder: &str) -> Result<bool, StoreError>;

    fn search_unseen(&mut self, folder: &str) -> Result<BTreeSet<Uid>, StoreError>;

    fn search_by_tag(&mut self, folder: &str, tag: &str) -> Result<BTreeSet<Uid>, StoreError>;

    fn search_all(&mut self, folder: &str) -> Result<BTreeSet<Uid>, StoreError>;

    /// Raw content for the requested uids. Messages that vanished or could
    /// not be downloaded are missing from the result.
    fn fetch_raw(
        &mut self,
        uids: &BTreeSet<Uid>,
    ) -> Result<BTreeMap<Uid, FetchedMessage>, StoreError>;

    /// Idempotent: tagging an already tagged message changes nothing.
    fn add_tag(&mut self, uid: &Uid, tag: &str) -> Result<(), StoreError>;

    fn move_message(&mut self, uid: &Uid, destination: &str) -> Result<(), StoreError>;
}
