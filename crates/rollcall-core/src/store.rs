//! Encoding store: enrolled identities plus a nearest-neighbour index.
//!
//! On disk the store is a JSON object of three positionally aligned arrays
//! (`encodings`, `names`, `ids`). In memory it is a single sequence of
//! [`IdentityRecord`]s; the k-d tree is derived from it and never persisted.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::kdtree::KdTree;
use crate::types::{Embedding, IdentityRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid store contents: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store sequences are misaligned: {encodings} encodings, {names} names, {ids} ids")]
    Misaligned {
        encodings: usize,
        names: usize,
        ids: usize,
    },
    #[error("duplicate identity id {0} in store")]
    DuplicateId(i64),
    #[error("embedding dimension mismatch: store holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding is empty")]
    EmptyEmbedding,
}

/// Serialized form, kept compatible with the attendance app's face data file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
    ids: Vec<i64>,
}

/// Closest enrolled identity to a query embedding.
#[derive(Debug, Clone, Copy)]
pub struct StoreNeighbor<'a> {
    pub distance: f32,
    pub record: &'a IdentityRecord,
}

/// What [`EncodingStore::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default)]
pub struct EncodingStore {
    records: Vec<IdentityRecord>,
    index: KdTree,
}

impl EncodingStore {
    /// An empty store: no known identities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records, validating ids and dimensions.
    pub fn from_records(records: Vec<IdentityRecord>) -> Result<Self, StoreError> {
        let mut seen = HashSet::with_capacity(records.len());
        let expected = records.first().map(|r| r.embedding.dim());
        for record in &records {
            if record.embedding.dim() == 0 {
                return Err(StoreError::EmptyEmbedding);
            }
            if let Some(expected) = expected {
                if record.embedding.dim() != expected {
                    return Err(StoreError::DimensionMismatch {
                        expected,
                        actual: record.embedding.dim(),
                    });
                }
            }
            if !seen.insert(record.id) {
                return Err(StoreError::DuplicateId(record.id));
            }
        }

        let mut store = Self {
            records,
            index: KdTree::default(),
        };
        store.reindex();
        Ok(store)
    }

    /// Load a store, degrading to an empty one if the file is missing or
    /// unreadable. An empty population means nobody is recognized, which is
    /// not a fault.
    pub fn load(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "encoding store unreadable; using empty store");
                Self::new()
            }
        }
    }

    /// Load a store strictly. A missing or zero-byte file is an empty store;
    /// anything unparsable is an error, so writers never clobber a damaged file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "encoding store not found; starting empty");
            return Ok(Self::new());
        }

        let data = fs::read(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if data.is_empty() {
            return Ok(Self::new());
        }

        let file: StoreFile = serde_json::from_slice(&data)?;
        if file.encodings.len() != file.names.len() || file.names.len() != file.ids.len() {
            return Err(StoreError::Misaligned {
                encodings: file.encodings.len(),
                names: file.names.len(),
                ids: file.ids.len(),
            });
        }

        let records = file
            .ids
            .into_iter()
            .zip(file.names)
            .zip(file.encodings)
            .map(|((id, label), values)| IdentityRecord {
                id,
                label,
                embedding: Embedding::new(values),
            })
            .collect();

        let store = Self::from_records(records)?;
        tracing::info!(path = %path.display(), records = store.len(), "loaded encoding store");
        Ok(store)
    }

    /// Persist the records atomically (write to a sibling temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;

        let file = StoreFile {
            encodings: self.records.iter().map(|r| r.embedding.values.clone()).collect(),
            names: self.records.iter().map(|r| r.label.clone()).collect(),
            ids: self.records.iter().map(|r| r.id).collect(),
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &file)?;
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|err| write_err(err.error))?;

        tracing::debug!(path = %path.display(), records = self.records.len(), "saved encoding store");
        Ok(())
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding dimension of the population, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dim())
    }

    pub fn get(&self, id: i64) -> Option<&IdentityRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Reject a query whose dimension cannot be compared with this store.
    pub fn check_dimension(&self, embedding: &Embedding) -> Result<(), StoreError> {
        if embedding.dim() == 0 {
            return Err(StoreError::EmptyEmbedding);
        }
        match self.dim() {
            Some(expected) if expected != embedding.dim() => Err(StoreError::DimensionMismatch {
                expected,
                actual: embedding.dim(),
            }),
            _ => Ok(()),
        }
    }

    /// Closest record by L2 distance, `None` when the store is empty.
    ///
    /// No threshold is applied here.
    pub fn nearest(&self, query: &Embedding) -> Result<Option<StoreNeighbor<'_>>, StoreError> {
        self.nearest_where(query, |_| true)
    }

    /// Closest record whose id is not `excluded`.
    pub fn nearest_excluding(
        &self,
        query: &Embedding,
        excluded: i64,
    ) -> Result<Option<StoreNeighbor<'_>>, StoreError> {
        self.nearest_where(query, |record| record.id != excluded)
    }

    fn nearest_where<F>(&self, query: &Embedding, accept: F) -> Result<Option<StoreNeighbor<'_>>, StoreError>
    where
        F: Fn(&IdentityRecord) -> bool,
    {
        if self.is_empty() {
            return Ok(None);
        }
        self.check_dimension(query)?;
        Ok(self
            .index
            .nearest_where(&query.values, |i| accept(&self.records[i]))
            .map(|n| StoreNeighbor {
                distance: n.distance,
                record: &self.records[n.index],
            }))
    }

    /// Replace the record for `id` in place, or append a new one.
    pub fn upsert(&mut self, id: i64, label: &str, embedding: Embedding) -> Result<Upsert, StoreError> {
        self.check_dimension(&embedding)?;

        if let Some(pos) = self.records.iter().position(|r| r.id == id) {
            let record = &mut self.records[pos];
            record.label = label.to_string();
            record.embedding = embedding;
            self.reindex();
            return Ok(Upsert::Updated);
        }

        self.index.insert(embedding.values.clone());
        self.records.push(IdentityRecord {
            id,
            label: label.to_string(),
            embedding,
        });
        Ok(Upsert::Inserted)
    }

    /// Remove the record for `id`, returning it if present.
    pub fn remove(&mut self, id: i64) -> Option<IdentityRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        let removed = self.records.remove(pos);
        self.reindex();
        Some(removed)
    }

    fn reindex(&mut self) {
        self.index = KdTree::build(self.records.iter().map(|r| r.embedding.values.clone()).collect());
    }
}
