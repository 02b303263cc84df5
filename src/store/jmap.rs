use super::{FetchedMessage, MailStore, StoreError, Uid, SEEN};
use crate::jmap::client::JmapClient;
use crate::jmap::types::Mailbox;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// [`MailStore`] over a JMAP account.
pub struct JmapStore {
    well_known_url: String,
    username: String,
    password: String,
    client: Option<JmapClient>,
    mailboxes: Vec<Mailbox>,
    /// `(folder name, mailbox id)` of the last searched folder.
    selected: Option<(String, String)>,
}

impl JmapStore {
    pub fn new(well_known_url: &str, username: &str, password: String) -> Self {
        JmapStore {
            well_known_url: well_known_url.to_string(),
            username: username.to_string(),
            password,
            client: None,
            mailboxes: Vec::new(),
            selected: None,
        }
    }

    /// Probe the session and reconnect once if the probe fails.
    fn live_client(&mut self) -> Result<&JmapClient, StoreError> {
        let healthy = match &self.client {
            None => return Err(StoreError::NotConnected),
            Some(client) => match client.echo() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Liveness probe failed, reconnecting");
                    false
                }
            },
        };
        if !healthy {
            self.connect()?;
        }
        self.client.as_ref().ok_or(StoreError::NotConnected)
    }

    fn refresh_mailboxes(&mut self) -> Result<(), StoreError> {
        let client = self.client.as_ref().ok_or(StoreError::NotConnected)?;
        self.mailboxes = client.get_mailboxes()?;
        Ok(())
    }

    fn mailbox_id(&mut self, folder: &str) -> Result<String, StoreError> {
        if let Some(id) = resolve_mailbox_id(folder, &self.mailboxes) {
            return Ok(id);
        }
        // the folder may have been created since we last looked
        self.refresh_mailboxes()?;
        resolve_mailbox_id(folder, &self.mailboxes)
            .ok_or_else(|| StoreError::FolderNotFound(folder.to_string()))
    }

    fn select(&mut self, folder: &str) -> Result<String, StoreError> {
        let id = self.mailbox_id(folder)?;
        self.selected = Some((folder.to_string(), id.clone()));
        Ok(id)
    }

    fn selected(&self) -> Result<(String, String), StoreError> {
        self.selected.clone().ok_or(StoreError::NoFolderSelected)
    }

    fn query(&mut self, folder: &str, filter: serde_json::Value) -> Result<BTreeSet<Uid>, StoreError> {
        self.live_client()?;
        let mailbox_id = self.select(folder)?;

        let mut filter = filter;
        filter["inMailbox"] = json!(mailbox_id);

        let client = self.client.as_ref().ok_or(StoreError::NotConnected)?;
        let ids = client.query_all(filter)?;
        Ok(ids.into_iter().map(Uid::from).collect())
    }
}

impl MailStore for JmapStore {
    fn connect(&mut self) -> Result<(), StoreError> {
        let (_session, client) =
            JmapClient::discover(&self.well_known_url, &self.username, &self.password)
                .map_err(|e| StoreError::Connection(e.to_string()))?;
        self.mailboxes = client
            .get_mailboxes()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::info!(
            account = client.account_id(),
            mailboxes = self.mailboxes.len(),
            "Connected"
        );
        self.client = Some(client);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.client.take().is_some() {
            tracing::info!("Disconnected");
        }
        self.mailboxes.clear();
        self.selected = None;
    }

    fn folder_exists(&mut self, folder: &str) -> Result<bool, StoreError> {
        self.live_client()?;
        self.refresh_mailboxes()?;
        Ok(resolve_mailbox_id(folder, &self.mailboxes).is_some())
    }

    fn search_unseen(&mut self, folder: &str) -> Result<BTreeSet<Uid>, StoreError> {
        self.query(folder, json!({ "notKeyword": SEEN }))
    }

    fn search_by_tag(&mut self, folder: &str, tag: &str) -> Result<BTreeSet<Uid>, StoreError> {
        self.query(folder, json!({ "hasKeyword": tag }))
    }

    fn search_all(&mut self, folder: &str) -> Result<BTreeSet<Uid>, StoreError> {
        self.query(folder, json!({}))
    }

    fn fetch_raw(
        &mut self,
        uids: &BTreeSet<Uid>,
    ) -> Result<BTreeMap<Uid, FetchedMessage>, StoreError> {
        if uids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let (folder, mailbox_id) = self.selected()?;
        let client = self.live_client()?;

        let ids: Vec<String> = uids.iter().map(|u| u.as_str().to_string()).collect();
        let metas = client.get_email_meta(&ids)?;

        let mut fetched = BTreeMap::new();
        for meta in metas {
            let uid = Uid::from(meta.id.as_str());
            if !meta.mailbox_ids.get(&mailbox_id).copied().unwrap_or(false) {
                tracing::debug!(%uid, %folder, "Message left the folder, skipping");
                continue;
            }
            let Some(blob_id) = meta.blob_id.as_deref() else {
                tracing::warn!(%uid, %folder, "Message has no blob id, skipping");
                continue;
            };
            let raw = match client.download_blob(blob_id, "email.eml", "message/rfc822") {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(%uid, %folder, error = %e, "Failed to download message");
                    continue;
                }
            };
            let flags = meta
                .keywords
                .iter()
                .filter(|(_, set)| **set)
                .map(|(k, _)| k.clone())
                .collect();

            fetched.insert(
                uid.clone(),
                FetchedMessage {
                    uid,
                    folder: folder.clone(),
                    raw,
                    flags,
                    received_at: meta.received_at,
                },
            );
        }
        Ok(fetched)
    }

    fn add_tag(&mut self, uid: &Uid, tag: &str) -> Result<(), StoreError> {
        let (folder, _) = self.selected()?;
        let client = self.live_client()?;
        client.add_keyword(uid.as_str(), tag)?;
        tracing::debug!(%uid, %folder, tag, "Tagged");
        Ok(())
    }

    fn move_message(&mut self, uid: &Uid, destination: &str) -> Result<(), StoreError> {
        let (folder, mailbox_id) = self.selected()?;
        self.live_client()?;
        let destination_id = self.mailbox_id(destination)?;
        let client = self.client.as_ref().ok_or(StoreError::NotConnected)?;

        // A uid only names a message while it is still in the folder it was
        // observed in.
        let still_here = client
            .get_email_meta(&[uid.as_str().to_string()])?
            .iter()
            .any(|meta| meta.mailbox_ids.get(&mailbox_id).copied().unwrap_or(false));
        if !still_here {
            return Err(StoreError::MessageNotFound {
                uid: uid.clone(),
                folder,
            });
        }

        client.move_email(uid.as_str(), &destination_id)?;
        tracing::debug!(%uid, from = %folder, to = destination, "Moved");
        Ok(())
    }
}

/// Find a mailbox id by exact name, then by role (e.g. "archive"), then by
/// a `Parent/Child` path.
pub fn resolve_mailbox_id(name: &str, mailboxes: &[Mailbox]) -> Option<String> {
    if let Some(mbox) = mailboxes.iter().find(|m| m.name == name) {
        return Some(mbox.id.clone());
    }

    let lower = name.to_lowercase();
    if let Some(mbox) = mailboxes
        .iter()
        .find(|m| m.role.as_deref().map(str::to_lowercase).as_deref() == Some(lower.as_str()))
    {
        tracing::debug!(folder = name, id = %mbox.id, "Resolved mailbox by role");
        return Some(mbox.id.clone());
    }

    if let Some((_, leaf)) = name.rsplit_once('/') {
        let by_id: HashMap<&str, &Mailbox> =
            mailboxes.iter().map(|m| (m.id.as_str(), m)).collect();

        for mbox in mailboxes.iter().filter(|m| m.name == leaf) {
            let mut path = vec![mbox.name.as_str()];
            let mut current = mbox;
            // bounded so a parent cycle cannot spin forever
            while path.len() <= mailboxes.len() {
                let Some(parent) = current
                    .parent_id
                    .as_deref()
                    .and_then(|pid| by_id.get(pid).copied())
                else {
                    break;
                };
                path.push(parent.name.as_str());
                current = parent;
            }
            path.reverse();
            if path.join("/") == name {
                tracing::debug!(folder = name, id = %mbox.id, "Resolved mailbox by path");
                return Some(mbox.id.clone());
            }
        }
    }

    None
}
