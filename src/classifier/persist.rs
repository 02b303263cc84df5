use super::{ModelError, Pipeline};
use redb::{Database, DatabaseError, StorageError, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;

const MODEL: TableDefinition<&str, &[u8]> = TableDefinition::new("model");
const PIPELINE_KEY: &str = "pipeline";

/// Bumped whenever the serialized pipeline layout changes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    pipeline: &'a Pipeline,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    pipeline: Pipeline,
}

/// Write the pipeline in one transaction. A file that is not a readable
/// redb database is discarded and recreated; any other open failure (a lock
/// held elsewhere, permissions) is returned and the file is left alone.
pub fn write(path: &Path, pipeline: &Pipeline) -> Result<(), ModelError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let bytes = serde_json::to_vec(&EnvelopeRef {
        version: FORMAT_VERSION,
        pipeline,
    })?;

    let db = match Database::create(path) {
        Ok(db) => db,
        Err(e) if !is_unreadable(&e) => return Err(redb::Error::from(e).into()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Replacing unreadable model file");
            std::fs::remove_file(path)?;
            Database::create(path).map_err(redb::Error::from)?
        }
    };

    let txn = db.begin_write().map_err(redb::Error::from)?;
    {
        let mut table = txn.open_table(MODEL).map_err(redb::Error::from)?;
        table
            .insert(PIPELINE_KEY, bytes.as_slice())
            .map_err(redb::Error::from)?;
    }
    txn.commit().map_err(redb::Error::from)?;
    Ok(())
}

/// Errors meaning the file holds something other than a usable database.
fn is_unreadable(err: &DatabaseError) -> bool {
    match err {
        DatabaseError::UpgradeRequired(_) => true,
        DatabaseError::Storage(StorageError::Corrupted(_)) => true,
        DatabaseError::Storage(StorageError::Io(io)) => io.kind() == ErrorKind::InvalidData,
        _ => false,
    }
}

/// Read a stored pipeline. `Ok(None)` when there is no file or nothing
/// stored in it.
pub fn read(path: &Path) -> Result<Option<Pipeline>, ModelError> {
    if !path.exists() {
        return Ok(None);
    }

    let db = Database::open(path).map_err(redb::Error::from)?;
    let txn = db.begin_read().map_err(redb::Error::from)?;
    let table = match txn.open_table(MODEL) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(redb::Error::from(e).into()),
    };
    let Some(value) = table.get(PIPELINE_KEY).map_err(redb::Error::from)? else {
        return Ok(None);
    };

    let bytes = value.value();
    let header: Header = serde_json::from_slice(bytes)?;
    if header.version != FORMAT_VERSION {
        return Err(ModelError::Incompatible {
            found: header.version,
            expected: FORMAT_VERSION,
        });
    }
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    envelope.pipeline.validate()?;
    Ok(Some(envelope.pipeline))
}

#[cfg(test)]
pub(crate) fn write_raw(path: &Path, bytes: &[u8]) {
    let db = Database::create(path).unwrap();
    let txn = db.begin_write().unwrap();
    {
        let mut table = txn.open_table(MODEL).unwrap();
        table.insert(PIPELINE_KEY, bytes).unwrap();
    }
    txn.commit().unwrap();
}
