mod persist;
pub mod tfidf;
pub mod tree;

use crate::extract::extract;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tfidf::TfidfVectorizer;
use tree::DecisionTree;

pub const MAX_FEATURES: usize = 5000;

/// One labelled training message, still in raw form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub raw: Vec<u8>,
    pub label: String,
}

impl Sample {
    pub fn new(raw: impl Into<Vec<u8>>, label: impl Into<String>) -> Self {
        Sample {
            raw: raw.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("no training samples")]
    EmptyCorpus,
    #[error("training samples contain no usable terms")]
    EmptyVocabulary,
    #[error("fitting failed: {0}")]
    Fit(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("model database: {0}")]
    Database(#[from] redb::Error),
    #[error("model encoding: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("model format version {found} is not supported (expected {expected})")]
    Incompatible { found: u32, expected: u32 },
    #[error("model is inconsistent: {0}")]
    Inconsistent(String),
    #[error("no trained model to save")]
    NotTrained,
}

/// Fitted state: vectorizer, tree, and the label each tree class stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    labels: Vec<String>,
    vectorizer: TfidfVectorizer,
    tree: DecisionTree,
}

impl Pipeline {
    fn fit(samples: &[Sample]) -> Result<Self, TrainingError> {
        if samples.is_empty() {
            return Err(TrainingError::EmptyCorpus);
        }

        let labels: Vec<String> = samples
            .iter()
            .map(|s| s.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if labels.is_empty() {
            return Err(TrainingError::Fit("no labels".to_string()));
        }

        let docs: Vec<String> = samples.iter().map(|s| extract(&s.raw)).collect();
        let targets: Vec<usize> = samples
            .iter()
            .map(|s| labels.binary_search(&s.label).unwrap_or(0))
            .collect();

        let (vectorizer, rows) = TfidfVectorizer::fit_transform(&docs, MAX_FEATURES)?;
        let tree = DecisionTree::fit(&rows, &targets, labels.len())?;

        Ok(Pipeline {
            labels,
            vectorizer,
            tree,
        })
    }

    /// Structural checks for a pipeline read back from disk.
    fn validate(&self) -> Result<(), ModelError> {
        if self.labels.is_empty() {
            return Err(ModelError::Inconsistent("no labels".to_string()));
        }
        self.vectorizer
            .validate()
            .and_then(|()| self.tree.validate(self.labels.len()))
            .map_err(ModelError::Inconsistent)
    }

    fn predict(&self, raw: &[u8]) -> &str {
        let row = self.vectorizer.transform(&extract(raw));
        let class = self.tree.predict(&row);
        self.labels.get(class).map(String::as_str).unwrap_or_default()
    }
}

/// Trainable message-to-label model with on-disk persistence.
///
/// Starts untrained. [`Classifier::train`] and [`Classifier::load`] replace
/// the fitted pipeline wholesale, and only when they succeed.
pub struct Classifier {
    model_path: PathBuf,
    pipeline: Option<Pipeline>,
}

impl Classifier {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Classifier {
            model_path: model_path.into(),
            pipeline: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn labels(&self) -> &[String] {
        self.pipeline
            .as_ref()
            .map(|p| p.labels.as_slice())
            .unwrap_or_default()
    }

    /// Fit a fresh pipeline and persist it. On error the previous pipeline
    /// stays in place. A failed save is logged and does not undo the fit.
    pub fn train(&mut self, samples: &[Sample]) -> Result<(), TrainingError> {
        let pipeline = Pipeline::fit(samples)?;
        tracing::info!(
            samples = samples.len(),
            labels = pipeline.labels.len(),
            vocabulary = pipeline.vectorizer.vocabulary_len(),
            nodes = pipeline.tree.node_count(),
            depth = pipeline.tree.depth(),
            "Trained classifier"
        );
        self.pipeline = Some(pipeline);

        if let Err(e) = self.save() {
            tracing::warn!(
                path = %self.model_path.display(),
                error = %e,
                "Failed to save trained model"
            );
        }
        Ok(())
    }

    /// `None` when untrained; otherwise the most likely label, however weak.
    pub fn predict(&self, raw: &[u8]) -> Option<String> {
        let pipeline = self.pipeline.as_ref()?;
        Some(pipeline.predict(raw).to_string())
    }

    pub fn save(&self) -> Result<(), ModelError> {
        let pipeline = self.pipeline.as_ref().ok_or(ModelError::NotTrained)?;
        persist::write(&self.model_path, pipeline)?;
        tracing::debug!(path = %self.model_path.display(), "Saved model");
        Ok(())
    }

    /// Restore a saved pipeline. Returns `false` when nothing usable is on
    /// disk; unreadable data is logged rather than returned.
    pub fn load(&mut self) -> bool {
        match persist::read(&self.model_path) {
            Ok(Some(pipeline)) => {
                tracing::info!(
                    path = %self.model_path.display(),
                    labels = ?pipeline.labels,
                    "Loaded model"
                );
                self.pipeline = Some(pipeline);
                true
            }
            Ok(None) => {
                tracing::debug!(path = %self.model_path.display(), "No saved model");
                false
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.model_path.display(),
                    error = %e,
                    "Ignoring unreadable model"
                );
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn message(subject: &str, body: &str) -> Vec<u8> {
        format!(
            "From: someone@example.com\r\nSubject: {}\r\nContent-Type: text/plain\r\n\r\n{}\r\n",
            subject, body
        )
        .into_bytes()
    }

    pub(crate) fn corpus() -> Vec<Sample> {
        vec![
            Sample::new(message("Project meeting", "agenda for the project meeting"), "Work"),
            Sample::new(message("Re: meeting", "project deadline meeting moved"), "Work"),
            Sample::new(message("Quarterly project", "meeting notes project review"), "Work"),
            Sample::new(message("Weekend party", "party at the beach this weekend"), "Personal"),
            Sample::new(message("Birthday", "birthday party on the weekend"), "Personal"),
            Sample::new(message("Plans", "weekend party plans with friends"), "Personal"),
        ]
    }

    fn model_path(dir: &TempDir) -> PathBuf {
        dir.path().join("model.redb")
    }

    #[test]
    fn test_untrained_predicts_nothing() {
        let dir = TempDir::new().unwrap();
        let clf = Classifier::new(model_path(&dir));
        assert!(!clf.is_trained());
        assert_eq!(clf.predict(&message("Project meeting", "agenda")), None);
        assert_eq!(clf.predict(b""), None);
        assert_eq!(clf.predict(b"\xff\x00garbage"), None);
        assert!(matches!(clf.save(), Err(ModelError::NotTrained)));
    }

    #[test]
    fn test_separates_disjoint_vocabulary() {
        let dir = TempDir::new().unwrap();
        let mut clf = Classifier::new(model_path(&dir));
        clf.train(&corpus()).unwrap();
        assert!(clf.is_trained());
        assert_eq!(clf.labels(), ["Personal", "Work"]);
        assert_eq!(
            clf.predict(&message("project meeting", "")).as_deref(),
            Some("Work")
        );
        assert_eq!(
            clf.predict(&message("weekend party", "")).as_deref(),
            Some("Personal")
        );
    }

    #[test]
    fn test_train_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let mut clf = Classifier::new(model_path(&dir));
        clf.train(&corpus()).unwrap();
        assert!(model_path(&dir).exists());

        let mut fresh = Classifier::new(model_path(&dir));
        assert!(fresh.load());
        assert!(fresh.is_trained());
        assert_eq!(fresh.pipeline, clf.pipeline);

        let inputs = [
            message("project meeting", ""),
            message("weekend party", ""),
            message("unrelated", "nothing in common"),
            Vec::new(),
        ];
        for input in &inputs {
            assert_eq!(fresh.predict(input), clf.predict(input));
        }
    }

    #[test]
    fn test_save_overwrites_previous_model() {
        let dir = TempDir::new().unwrap();
        let mut clf = Classifier::new(model_path(&dir));
        clf.train(&corpus()[..4]).unwrap();
        clf.train(&corpus()).unwrap();

        let mut fresh = Classifier::new(model_path(&dir));
        assert!(fresh.load());
        assert_eq!(fresh.pipeline, clf.pipeline);
    }

    #[test]
    fn test_failed_training_keeps_previous_model() {
        let dir = TempDir::new().unwrap();
        let mut clf = Classifier::new(model_path(&dir));
        clf.train(&corpus()).unwrap();
        let before = clf.pipeline.clone();

        assert!(matches!(clf.train(&[]), Err(TrainingError::EmptyCorpus)));
        let stop_words_only = [Sample::new(message("the", "and of to"), "Work")];
        assert!(matches!(
            clf.train(&stop_words_only),
            Err(TrainingError::EmptyVocabulary)
        ));

        assert!(clf.is_trained());
        assert_eq!(clf.pipeline, before);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut clf = Classifier::new(model_path(&dir));
        assert!(!clf.load());
        assert!(!clf.is_trained());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(model_path(&dir), b"definitely not a database").unwrap();
        let mut clf = Classifier::new(model_path(&dir));
        assert!(!clf.load());
        assert!(!clf.is_trained());

        // training replaces the unreadable file
        clf.train(&corpus()).unwrap();
        let mut fresh = Classifier::new(model_path(&dir));
        assert!(fresh.load());
    }

    #[test]
    fn test_load_rejects_other_versions_and_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = model_path(&dir);

        persist::write_raw(&path, br#"{"version": 99, "pipeline": null}"#);
        let mut clf = Classifier::new(&path);
        assert!(!clf.load());
        assert!(matches!(
            persist::read(&path),
            Err(ModelError::Incompatible { found: 99, .. })
        ));

        persist::write_raw(&path, b"{not json");
        assert!(!clf.load());
        assert!(!clf.is_trained());
    }

    #[test]
    fn test_load_rejects_inconsistent_pipeline() {
        let dir = TempDir::new().unwrap();
        let path = model_path(&dir);
        let mut clf = Classifier::new(&path);

        // idf weights missing for the one term
        persist::write_raw(
            &path,
            br#"{"version":1,"pipeline":{"labels":["A"],"vectorizer":{"vocabulary":["project"],"idf":[]},"tree":{"nodes":[{"Leaf":{"class":0}}]}}}"#,
        );
        assert!(!clf.load());
        assert!(matches!(persist::read(&path), Err(ModelError::Inconsistent(_))));
        assert_eq!(clf.predict(&message("project", "")), None);

        // split pointing back at the root
        persist::write_raw(
            &path,
            br#"{"version":1,"pipeline":{"labels":["A","B"],"vectorizer":{"vocabulary":["project"],"idf":[1.0]},"tree":{"nodes":[{"Split":{"feature":0,"threshold":0.5,"left":0,"right":1}},{"Leaf":{"class":1}}]}}}"#,
        );
        assert!(!clf.load());
        assert!(matches!(persist::read(&path), Err(ModelError::Inconsistent(_))));

        // leaf class beyond the label list
        persist::write_raw(
            &path,
            br#"{"version":1,"pipeline":{"labels":["A"],"vectorizer":{"vocabulary":["project"],"idf":[1.0]},"tree":{"nodes":[{"Leaf":{"class":3}}]}}}"#,
        );
        assert!(!clf.load());
        assert!(!clf.is_trained());
    }

    #[test]
    fn test_locked_model_file_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let path = model_path(&dir);
        let mut clf = Classifier::new(&path);
        clf.train(&corpus()).unwrap();
        let saved = clf.pipeline.clone();

        {
            let _held = redb::Database::open(&path).unwrap();
            // the fit succeeds; the save fails on the lock and is only logged
            clf.train(&corpus()[..4]).unwrap();
            assert!(matches!(
                clf.save(),
                Err(ModelError::Database(redb::Error::DatabaseAlreadyOpen))
            ));
        }

        let mut fresh = Classifier::new(&path);
        assert!(fresh.load());
        assert_eq!(fresh.pipeline, saved);
    }
}
