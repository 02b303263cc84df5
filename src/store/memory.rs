use super::{FetchedMessage, MailStore, StoreError, Uid, SEEN};
use crate::jmap::client::JmapError;
use std::collections::{BTreeMap, BTreeSet};

/// A mutating call the engine made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    AddTag { uid: Uid, tag: String },
    Move { uid: Uid, folder: String },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    raw: Vec<u8>,
    flags: BTreeSet<String>,
}

/// Deterministic in-process store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    folders: BTreeMap<String, BTreeMap<Uid, StoredMessage>>,
    selected: Option<String>,
    connected: bool,
    pub calls: Vec<StoreCall>,
    pub connects: usize,
    pub disconnects: usize,
    pub fail_connect: bool,
    pub fail_searches: bool,
    pub fail_mutations_for: BTreeSet<Uid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_folders(names: &[&str]) -> Self {
        let mut store = MemoryStore::new();
        for name in names {
            store.add_folder(name);
        }
        store
    }

    pub fn add_folder(&mut self, name: &str) {
        self.folders.entry(name.to_string()).or_default();
    }

    pub fn add_message(&mut self, folder: &str, uid: impl Into<Uid>, raw: &[u8], flags: &[&str]) {
        self.folders.entry(folder.to_string()).or_default().insert(
            uid.into(),
            StoredMessage {
                raw: raw.to_vec(),
                flags: flags.iter().map(|f| f.to_string()).collect(),
            },
        );
    }

    pub fn uids_in(&self, folder: &str) -> Vec<Uid> {
        self.folders
            .get(folder)
            .map(|msgs| msgs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn flags_of(&self, folder: &str, uid: &Uid) -> Option<&BTreeSet<String>> {
        self.folders.get(folder)?.get(uid).map(|m| &m.flags)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn check_connected(&self) -> Result<(), StoreError> {
        if self.connected {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    fn search(
        &mut self,
        folder: &str,
        keep: impl Fn(&StoredMessage) -> bool,
    ) -> Result<BTreeSet<Uid>, StoreError> {
        self.check_connected()?;
        if self.fail_searches {
            return Err(JmapError::Http("search refused".to_string()).into());
        }
        let messages = self
            .folders
            .get(folder)
            .ok_or_else(|| StoreError::FolderNotFound(folder.to_string()))?;
        let uids = messages
            .iter()
            .filter(|(_, m)| keep(m))
            .map(|(uid, _)| uid.clone())
            .collect();
        self.selected = Some(folder.to_string());
        Ok(uids)
    }

    fn selected_message(&mut self, uid: &Uid) -> Result<(String, &mut StoredMessage), StoreError> {
        self.check_connected()?;
        let folder = self.selected.clone().ok_or(StoreError::NoFolderSelected)?;
        if self.fail_mutations_for.contains(uid) {
            return Err(JmapError::Api(format!("{} is locked", uid)).into());
        }
        let message = self
            .folders
            .get_mut(&folder)
            .and_then(|msgs| msgs.get_mut(uid))
            .ok_or_else(|| StoreError::MessageNotFound {
                uid: uid.clone(),
                folder: folder.clone(),
            })?;
        Ok((folder, message))
    }
}

impl MailStore for MemoryStore {
    fn connect(&mut self) -> Result<(), StoreError> {
        self.connects += 1;
        if self.fail_connect {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
        self.selected = None;
    }

    fn folder_exists(&mut self, folder: &str) -> Result<bool, StoreError> {
        self.check_connected()?;
        Ok(self.folders.contains_key(folder))
    }

    fn search_unseen(&mut self, folder: &str) -> Result<BTreeSet<Uid>, StoreError> {
        self.search(folder, |m| !m.flags.contains(SEEN))
    }

    fn search_by_tag(&mut self, folder: &str, tag: &str) -> Result<BTreeSet<Uid>, StoreError> {
        self.search(folder, |m| m.flags.contains(tag))
    }

    fn search_all(&mut self, folder: &str) -> Result<BTreeSet<Uid>, StoreError> {
        self.search(folder, |_| true)
    }

    fn fetch_raw(
        &mut self,
        uids: &BTreeSet<Uid>,
    ) -> Result<BTreeMap<Uid, FetchedMessage>, StoreError> {
        self.check_connected()?;
        let folder = self.selected.clone().ok_or(StoreError::NoFolderSelected)?;
        let Some(messages) = self.folders.get(&folder) else {
            return Ok(BTreeMap::new());
        };
        Ok(uids
            .iter()
            .filter_map(|uid| {
                let m = messages.get(uid)?;
                Some((
                    uid.clone(),
                    FetchedMessage {
                        uid: uid.clone(),
                        folder: folder.clone(),
                        raw: m.raw.clone(),
                        flags: m.flags.clone(),
                        received_at: None,
                    },
                ))
            })
            .collect())
    }

    fn add_tag(&mut self, uid: &Uid, tag: &str) -> Result<(), StoreError> {
        let (_, message) = self.selected_message(uid)?;
        message.flags.insert(tag.to_string());
        self.calls.push(StoreCall::AddTag {
            uid: uid.clone(),
            tag: tag.to_string(),
        });
        Ok(())
    }

    fn move_message(&mut self, uid: &Uid, destination: &str) -> Result<(), StoreError> {
        if !self.folders.contains_key(destination) {
            self.check_connected()?;
            return Err(StoreError::FolderNotFound(destination.to_string()));
        }
        let (folder, _) = self.selected_message(uid)?;
        if let Some(message) = self.folders.get_mut(&folder).and_then(|m| m.remove(uid)) {
            self.folders
                .entry(destination.to_string())
                .or_default()
                .insert(uid.clone(), message);
        }
        self.calls.push(StoreCall::Move {
            uid: uid.clone(),
            folder: destination.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_selects_folder() {
        let mut store = MemoryStore::with_folders(&["INBOX", "Archive"]);
        store.add_message("INBOX", "1", b"one", &[]);
        store.add_message("INBOX", "2", b"two", &[SEEN]);
        store.add_message("Archive", "3", b"three", &["Work"]);
        store.connect().unwrap();

        let unseen = store.search_unseen("INBOX").unwrap();
        assert_eq!(unseen, BTreeSet::from([Uid::from("1")]));
        let fetched = store.fetch_raw(&unseen).unwrap();
        assert_eq!(fetched[&Uid::from("1")].raw, b"one");
        assert_eq!(fetched[&Uid::from("1")].folder, "INBOX");

        // uid 3 lives in Archive, not the selected INBOX
        let other = BTreeSet::from([Uid::from("3")]);
        assert!(store.fetch_raw(&other).unwrap().is_empty());
    }

    #[test]
    fn test_move_and_tag_are_recorded() {
        let mut store = MemoryStore::with_folders(&["Archive", "WorkFolder"]);
        store.add_message("Archive", "7", b"seven", &["Work"]);
        store.connect().unwrap();

        store.search_by_tag("Archive", "Work").unwrap();
        store.add_tag(&Uid::from("7"), "Work").unwrap();
        store.move_message(&Uid::from("7"), "WorkFolder").unwrap();

        assert_eq!(store.uids_in("WorkFolder"), vec![Uid::from("7")]);
        assert!(store.uids_in("Archive").is_empty());
        assert_eq!(store.calls.len(), 2);
        assert!(matches!(
            store.move_message(&Uid::from("7"), "Nowhere"),
            Err(StoreError::FolderNotFound(_))
        ));
    }

    #[test]
    fn test_requires_connection() {
        let mut store = MemoryStore::with_folders(&["INBOX"]);
        assert!(matches!(
            store.search_all("INBOX"),
            Err(StoreError::NotConnected)
        ));
        store.fail_connect = true;
        assert!(matches!(store.connect(), Err(StoreError::Connection(_))));
        assert!(!store.is_connected());
    }
}
