use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Folder and media path keys falling into one orphan category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanSets {
    pub folders: BTreeSet<String>,
    pub medias: BTreeSet<String>,
}

impl OrphanSets {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.medias.is_empty()
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.medias.len()
    }
}

/// Drift between disk and metadata, as found by a reconciliation scan.
///
/// The JSON shape is consumed by diagnostics UIs; `filesConfigured` lists
/// files present on disk that have no metadata record yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    pub metadata_without_files: OrphanSets,
    #[serde(rename = "filesConfigured")]
    pub files_without_metadata: OrphanSets,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.metadata_without_files.is_empty()
            && self.files_without_metadata.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_collaborator_key_names() {
        let mut report = OrphanReport::default();
        report
            .metadata_without_files
            .medias
            .insert("gone.jpg".into());
        report
            .files_without_metadata
            .folders
            .insert("fresh".into());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "metadataWithoutFiles": {"folders": [], "medias": ["gone.jpg"]},
                "filesConfigured": {"folders": ["fresh"], "medias": []},
            })
        );
        assert!(!report.is_clean());
    }
}
