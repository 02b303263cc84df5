use crate::classifier::Sample;
use crate::store::{MailStore, StoreError};
use crate::tags::TagMapping;

/// Collects training samples from the category folders: every message in a
/// mapped folder is one sample labelled with that folder's tag.
pub struct TrainingCorpusBuilder<'a> {
    tags: &'a TagMapping,
}

impl<'a> TrainingCorpusBuilder<'a> {
    pub fn new(tags: &'a TagMapping) -> Self {
        TrainingCorpusBuilder { tags }
    }

    /// Walk every mapped folder. Folders missing from the store are skipped
    /// with a warning; store failures while reading a folder propagate.
    pub fn build<S: MailStore>(&self, store: &mut S) -> Result<Vec<Sample>, StoreError> {
        let mut samples = Vec::new();

        for (folder, label) in self.tags.by_folder() {
            if !store.folder_exists(folder)? {
                tracing::warn!(folder, tag = label, "Training folder does not exist, skipping");
                continue;
            }

            let uids = store.search_all(folder)?;
            let messages = store.fetch_raw(&uids)?;
            if messages.len() < uids.len() {
                tracing::debug!(
                    folder,
                    found = uids.len(),
                    fetched = messages.len(),
                    "Some messages could not be fetched"
                );
            }
            tracing::info!(folder, tag = label, count = messages.len(), "Collected training messages");

            // label by the folder each message was observed in
            samples.extend(messages.into_values().filter_map(|message| {
                let label = self.tags.label_for(&message.folder)?;
                Some(Sample::new(message.raw, label))
            }));
        }

        Ok(samples)
    }
}
