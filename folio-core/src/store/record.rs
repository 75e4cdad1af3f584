use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use folio_model::{
    FolderMetadata, MediaMetadata, MetadataBundle, MetadataKind, ModelResult,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{LibraryError, Result};

/// A metadata record kind stored in one of the two path-keyed documents.
pub trait Record:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + Send + Sync
{
    const KIND: MetadataKind;

    fn entries(bundle: &MetadataBundle) -> &BTreeMap<String, Self>;
    fn entries_mut(bundle: &mut MetadataBundle) -> &mut BTreeMap<String, Self>;

    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
    fn set_timestamps(&mut self, created: DateTime<Utc>, updated: DateTime<Utc>);

    fn check(&self) -> ModelResult<()>;

    /// Recompute derived fields after an edit.
    fn normalize(&mut self) {}

    /// Set `createdAt` if missing and move `updatedAt` strictly forward.
    fn touch(&mut self) {
        let updated = next_timestamp(self.updated_at());
        let created = self.created_at().unwrap_or(updated);
        self.set_timestamps(created, updated);
    }
}

impl Record for FolderMetadata {
    const KIND: MetadataKind = MetadataKind::Folder;

    fn entries(bundle: &MetadataBundle) -> &BTreeMap<String, Self> {
        &bundle.folders
    }

    fn entries_mut(bundle: &mut MetadataBundle) -> &mut BTreeMap<String, Self> {
        &mut bundle.folders
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_timestamps(&mut self, created: DateTime<Utc>, updated: DateTime<Utc>) {
        self.created_at = Some(created);
        self.updated_at = Some(updated);
    }

    fn check(&self) -> ModelResult<()> {
        self.validate()
    }

    fn normalize(&mut self) {
        self.sync_positions();
    }
}

impl Record for MediaMetadata {
    const KIND: MetadataKind = MetadataKind::Media;

    fn entries(bundle: &MetadataBundle) -> &BTreeMap<String, Self> {
        &bundle.medias
    }

    fn entries_mut(bundle: &mut MetadataBundle) -> &mut BTreeMap<String, Self> {
        &mut bundle.medias
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_timestamps(&mut self, created: DateTime<Utc>, updated: DateTime<Utc>) {
        self.created_at = Some(created);
        self.updated_at = Some(updated);
    }

    fn check(&self) -> ModelResult<()> {
        self.validate()
    }
}

/// Wall clock, bumped by a microsecond when it has not moved past
/// `previous`.
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if now <= previous => {
            previous + TimeDelta::microseconds(1)
        }
        _ => now,
    }
}

/// Apply a JSON patch object to `existing`.
///
/// With `merge` the patch is laid over the existing fields; otherwise it
/// replaces them. A `null` value deletes the field. Timestamps in the patch
/// are ignored: `createdAt` survives both modes and `updatedAt` is always
/// refreshed.
pub(crate) fn apply_patch<R: Record>(
    existing: Option<&R>,
    patch: &Value,
    merge: bool,
) -> Result<R> {
    let Value::Object(patch) = patch else {
        return Err(LibraryError::Validation(format!(
            "{} metadata patch must be a JSON object",
            R::KIND
        )));
    };

    let mut fields = match existing {
        Some(record) if merge => match serde_json::to_value(record)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        },
        _ => Map::new(),
    };
    merge_fields(&mut fields, patch);
    fields.remove("createdAt");
    fields.remove("updatedAt");

    let mut record: R = serde_json::from_value(Value::Object(fields))
        .map_err(|err| {
            LibraryError::Validation(format!("invalid {} metadata: {err}", R::KIND))
        })?;
    record.normalize();
    if let Some(previous) = existing {
        let created = previous.created_at();
        let updated = previous.updated_at();
        if let (Some(created), Some(updated)) = (created, updated) {
            record.set_timestamps(created, updated);
        } else if let Some(created) = created {
            record.set_timestamps(created, created);
        }
    }
    record.touch();
    record.check()?;
    Ok(record)
}

/// Lay `patch` over `fields`, deleting keys mapped to `null`.
pub(crate) fn merge_fields(fields: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        if value.is_null() {
            fields.remove(key);
        } else {
            fields.insert(key.clone(), value.clone());
        }
    }
}
