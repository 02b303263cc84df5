use std::collections::BTreeMap;
use std::fmt;

/// Association between category labels (stored on messages as keywords) and
/// the folders those categories are filed into.
///
/// Each label maps to exactly one folder and no folder is shared between
/// labels; [`TagMapping::new`] rejects mappings that break this. The
/// folder-to-label direction is derived on every lookup rather than stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMapping {
    folders_by_label: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("tag label must not be empty")]
    EmptyLabel,
    #[error("folder for tag '{0}' must not be empty")]
    EmptyFolder(String),
    #[error("tag '{0}' is not a valid keyword (no whitespace, control characters or ( ) {{ ] % * \" \\)")]
    InvalidKeyword(String),
    #[error("folder '{folder}' is mapped from both '{first}' and '{second}'")]
    DuplicateFolder {
        folder: String,
        first: String,
        second: String,
    },
}

impl TagMapping {
    pub fn new<I, L, F>(pairs: I) -> Result<Self, MappingError>
    where
        I: IntoIterator<Item = (L, F)>,
        L: Into<String>,
        F: Into<String>,
    {
        let mut folders_by_label = BTreeMap::new();
        let mut labels_by_folder: BTreeMap<String, String> = BTreeMap::new();

        for (label, folder) in pairs {
            let label = label.into();
            let folder = folder.into();

            if label.is_empty() {
                return Err(MappingError::EmptyLabel);
            }
            if !is_valid_keyword(&label) {
                return Err(MappingError::InvalidKeyword(label));
            }
            if folder.trim().is_empty() {
                return Err(MappingError::EmptyFolder(label));
            }
            if let Some(first) = labels_by_folder.get(&folder) {
                return Err(MappingError::DuplicateFolder {
                    folder,
                    first: first.clone(),
                    second: label,
                });
            }

            labels_by_folder.insert(folder.clone(), label.clone());
            folders_by_label.insert(label, folder);
        }

        Ok(TagMapping { folders_by_label })
    }

    pub fn folder_for(&self, label: &str) -> Option<&str> {
        self.folders_by_label.get(label).map(String::as_str)
    }

    pub fn label_for(&self, folder: &str) -> Option<&str> {
        self.folders_by_label
            .iter()
            .find(|(_, f)| f.as_str() == folder)
            .map(|(label, _)| label.as_str())
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.folders_by_label.keys().map(String::as_str)
    }

    /// `(folder, label)` pairs, recomputed from the forward mapping.
    pub fn by_folder(&self) -> BTreeMap<&str, &str> {
        self.folders_by_label
            .iter()
            .map(|(label, folder)| (folder.as_str(), label.as_str()))
            .collect()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.folders_by_label.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.folders_by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders_by_label.is_empty()
    }
}

impl fmt::Display for TagMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No tags mapped.");
        }
        for (label, folder) in &self.folders_by_label {
            writeln!(f, "{} -> {}", label, folder)?;
        }
        Ok(())
    }
}

/// Keywords travel as protocol atoms, so they cannot carry whitespace or the
/// atom-special characters.
fn is_valid_keyword(label: &str) -> bool {
    label
        .chars()
        .all(|c| !c.is_whitespace() && !c.is_control() && !"(){]%*\"\\".contains(c))
}
