use crate::classifier::Classifier;
use crate::config::Config;
use crate::corpus::TrainingCorpusBuilder;
use crate::store::{MailStore, StoreError, Uid};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Training,
    Idle,
    Classifying,
    Archiving,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("initial connection failed: {0}")]
    Connection(#[source] StoreError),
    #[error("{op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub tagged: usize,
    pub skipped: usize,
    pub moved: usize,
    pub unmapped: usize,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tagged {}, skipped {}, moved {}, unmapped {}",
            self.tagged, self.skipped, self.moved, self.unmapped
        )
    }
}

/// Keeps the inbox classified and the archive filed.
///
/// Each cycle tags unseen inbox messages with a predicted category, then
/// moves archive messages carrying a category tag into that category's
/// folder. Per-message failures are logged and skipped; a failure reading a
/// whole folder ends the cycle with an [`EngineError`].
pub struct ReconciliationEngine<'a, S: MailStore> {
    config: &'a Config,
    store: S,
    classifier: Classifier,
    state: EngineState,
    cycles: u64,
}

impl<'a, S: MailStore> ReconciliationEngine<'a, S> {
    pub fn new(config: &'a Config, store: S, classifier: Classifier) -> Self {
        ReconciliationEngine {
            config,
            store,
            classifier,
            state: EngineState::Uninitialized,
            cycles: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Connect, then load the saved model or train a new one. Only the
    /// connection is fatal; without a model the engine runs with
    /// classification disabled.
    pub fn initialize(&mut self, force_retrain: bool) -> Result<(), EngineError> {
        self.state = EngineState::Initializing;
        if let Err(e) = self.store.connect() {
            self.state = EngineState::Stopped;
            return Err(EngineError::Connection(e));
        }

        let loaded = !force_retrain && self.classifier.load();
        if !loaded {
            self.retrain();
        }

        self.state = EngineState::Idle;
        Ok(())
    }

    /// Rebuild the corpus from the category folders and fit a new model.
    /// Failures are logged and the previous model, if any, stays in use.
    pub fn retrain(&mut self) -> bool {
        let previous = self.state;
        self.state = EngineState::Training;

        let trained = match TrainingCorpusBuilder::new(&self.config.tags).build(&mut self.store) {
            Ok(samples) => match self.classifier.train(&samples) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(samples = samples.len(), error = %e, "Training failed");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Could not collect training messages");
                false
            }
        };

        self.state = previous;
        trained
    }

    /// One pass over the inbox and the archive, plus a retrain when due.
    pub fn run_cycle(&mut self) -> Result<CycleReport, EngineError> {
        self.cycles += 1;
        let mut report = CycleReport::default();

        self.state = EngineState::Classifying;
        let classified = self.classify_inbox(&mut report);

        let result = classified.and_then(|()| {
            self.state = EngineState::Archiving;
            let found = self.scan_archive()?;
            self.file_tagged(&found, &mut report);
            Ok(())
        });

        self.state = EngineState::Idle;
        result?;

        let every = u64::from(self.config.mail.retrain_every_cycles);
        if every > 0 && self.cycles % every == 0 {
            tracing::info!(cycle = self.cycles, "Periodic retraining");
            self.retrain();
        }

        tracing::info!(cycle = self.cycles, %report, "Cycle complete");
        Ok(report)
    }

    fn classify_inbox(&mut self, report: &mut CycleReport) -> Result<(), EngineError> {
        if !self.classifier.is_trained() {
            tracing::info!("No trained model, skipping classification");
            return Ok(());
        }

        let config = self.config;
        let inbox = config.mail.inbox_folder.as_str();
        let unseen = self
            .store
            .search_unseen(inbox)
            .map_err(|source| EngineError::Store {
                op: "inbox search",
                source,
            })?;
        if unseen.is_empty() {
            tracing::debug!(folder = inbox, "No unseen messages");
            return Ok(());
        }

        let messages = self
            .store
            .fetch_raw(&unseen)
            .map_err(|source| EngineError::Store {
                op: "inbox fetch",
                source,
            })?;

        for message in messages.values() {
            let uid = &message.uid;
            if message.raw.is_empty() {
                tracing::debug!(%uid, folder = %message.folder, "Empty message, leaving for next cycle");
                report.skipped += 1;
                continue;
            }
            if let Some(existing) = message
                .flags
                .iter()
                .find(|flag| config.tags.contains_label(flag))
            {
                tracing::debug!(%uid, folder = %message.folder, tag = %existing, "Already tagged");
                report.skipped += 1;
                continue;
            }

            let Some(label) = self.classifier.predict(&message.raw) else {
                report.skipped += 1;
                continue;
            };

            match self.store.add_tag(uid, &label) {
                Ok(()) => {
                    tracing::info!(
                        %uid,
                        folder = %message.folder,
                        received_at = message.received_at.as_deref().unwrap_or("-"),
                        tag = %label,
                        "Tagged message"
                    );
                    report.tagged += 1;
                }
                Err(e) => {
                    tracing::warn!(%uid, folder = %message.folder, tag = %label, error = %e, "Failed to tag message");
                    report.skipped += 1;
                }
            }
        }

        let missing = unseen.len().saturating_sub(messages.len());
        if missing > 0 {
            tracing::debug!(folder = inbox, missing, "Unseen messages not fetched");
            report.skipped += missing;
        }
        Ok(())
    }

    /// Every `(uid, tag)` in the archive for each known tag. A uid carrying
    /// two tags appears twice.
    pub fn scan_archive(&mut self) -> Result<Vec<(Uid, String)>, EngineError> {
        let config = self.config;
        let archive = config.mail.archive_folder.as_str();
        let mut found = Vec::new();
        let mut seen: BTreeMap<Uid, String> = BTreeMap::new();

        for tag in config.tags.labels() {
            let uids = self
                .store
                .search_by_tag(archive, tag)
                .map_err(|source| EngineError::Store {
                    op: "archive search",
                    source,
                })?;
            for uid in uids {
                if let Some(first) = seen.get(&uid) {
                    tracing::warn!(
                        %uid,
                        folder = archive,
                        first = %first,
                        second = tag,
                        "Message carries more than one category tag"
                    );
                } else {
                    seen.insert(uid.clone(), tag.to_string());
                }
                found.push((uid, tag.to_string()));
            }
        }

        Ok(found)
    }

    /// Move each tagged archive message to its tag's folder. Unknown tags
    /// and failed moves leave the message where it is.
    pub fn file_tagged(&mut self, found: &[(Uid, String)], report: &mut CycleReport) {
        let config = self.config;
        let archive = config.mail.archive_folder.as_str();

        for (uid, tag) in found {
            let Some(folder) = config.tags.folder_for(tag) else {
                tracing::warn!(%uid, folder = archive, tag = %tag, "No folder mapped for tag, leaving in place");
                report.unmapped += 1;
                continue;
            };

            match self.store.move_message(uid, folder) {
                Ok(()) => {
                    tracing::info!(%uid, from = archive, to = folder, tag = %tag, "Filed message");
                    report.moved += 1;
                }
                Err(e) => {
                    tracing::warn!(%uid, from = archive, to = folder, error = %e, "Failed to file message");
                }
            }
        }
    }

    /// Release the store. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state != EngineState::Stopped {
            self.store.disconnect();
            self.state = EngineState::Stopped;
            tracing::info!(cycles = self.cycles, "Stopped");
        }
    }
}
