use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{self, ClassSession, ClassType, Enrollment, Subject, User};

/// Local mirror of the hosted document database: one JSON array file per
/// collection under the workspace directory. All reads go through a typed
/// snapshot that is decoded once per store generation; every write bumps the
/// generation and invalidates the snapshot, so independent screens compute
/// over one consistent view instead of N separate fetches.
pub struct DocumentStore {
    workspace: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    generation: u64,
    collections: HashMap<String, Vec<Value>>,
    snapshot: Option<Arc<Snapshot>>,
}

/// Fully decoded view of all collections at one generation. Consumers keep
/// the `Arc` for the duration of a computation; `DocumentStore::is_current`
/// tells a caller whether a result computed from it has been superseded by
/// a write and should be discarded rather than applied.
pub struct Snapshot {
    pub generation: u64,
    pub users: Vec<User>,
    pub subjects: Vec<Subject>,
    pub class_types: Vec<ClassType>,
    pub classes: Vec<ClassSession>,
    pub enrollments: Vec<Enrollment>,
}

/// Mutation view handed to `with_documents_mut` closures. Tracks which
/// collections were touched so only those files are rewritten, and so the
/// generation only advances when something actually changed.
pub struct Tx<'a> {
    collections: &'a mut HashMap<String, Vec<Value>>,
    dirty: BTreeSet<String>,
}

impl Tx<'_> {
    pub fn docs(&self, collection: &str) -> &[Value] {
        self.collections
            .get(collection)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn insert(&mut self, collection: &str, doc: Value) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        self.dirty.insert(collection.to_string());
    }

    /// Sets one field on the document with the given id. Returns false when
    /// no such document exists.
    pub fn set_field(&mut self, collection: &str, id: &str, key: &str, value: Value) -> bool {
        let Some(docs) = self.collections.get_mut(collection) else {
            return false;
        };
        for doc in docs.iter_mut() {
            if doc.get("id").and_then(|v| v.as_str()) == Some(id) {
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert(key.to_string(), value);
                    self.dirty.insert(collection.to_string());
                    return true;
                }
            }
        }
        false
    }

    /// Removes the document with the given id. Returns false when absent.
    pub fn remove(&mut self, collection: &str, id: &str) -> bool {
        let Some(docs) = self.collections.get_mut(collection) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|doc| doc.get("id").and_then(|v| v.as_str()) != Some(id));
        if docs.len() != before {
            self.dirty.insert(collection.to_string());
            true
        } else {
            false
        }
    }
}

impl DocumentStore {
    /// Opens (or initializes) a workspace. Missing collection files are
    /// created empty; present ones must parse as JSON arrays.
    pub fn open(workspace: &Path) -> anyhow::Result<DocumentStore> {
        std::fs::create_dir_all(workspace)
            .with_context(|| format!("create workspace at {}", workspace.display()))?;

        let mut collections = HashMap::new();
        for name in model::ALL_COLLECTIONS {
            let path = collection_path(workspace, name);
            let docs: Vec<Value> = if path.is_file() {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("read collection file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parse collection file {}", path.display()))?
            } else {
                std::fs::write(&path, "[]")
                    .with_context(|| format!("create collection file {}", path.display()))?;
                Vec::new()
            };
            tracing::debug!(collection = name, documents = docs.len(), "loaded collection");
            collections.insert(name.to_string(), docs);
        }

        tracing::info!(workspace = %workspace.display(), "document store opened");
        Ok(DocumentStore {
            workspace: workspace.to_path_buf(),
            inner: Mutex::new(Inner {
                generation: 0,
                collections,
                snapshot: None,
            }),
        })
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// True while no write has superseded the given snapshot. Callers that
    /// finished a long computation can use this to discard stale results
    /// instead of presenting them.
    pub fn is_current(&self, snapshot: &Snapshot) -> bool {
        self.lock().generation == snapshot.generation
    }

    /// Read-through cached snapshot: decoded at most once per generation.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let mut inner = self.lock();
        if let Some(snap) = &inner.snapshot {
            return Arc::clone(snap);
        }
        let snap = Arc::new(decode_snapshot(inner.generation, &inner.collections));
        inner.snapshot = Some(Arc::clone(&snap));
        snap
    }

    pub fn insert(&self, collection: &str, doc: Value) -> Result<(), CoreError> {
        self.with_documents_mut(|tx| {
            tx.insert(collection, doc);
            Ok(())
        })
    }

    pub fn set_field(
        &self,
        collection: &str,
        id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        self.with_documents_mut(|tx| {
            if tx.set_field(collection, id, key, value) {
                Ok(())
            } else {
                Err(CoreError::not_found(collection, id))
            }
        })
    }

    pub fn remove(&self, collection: &str, id: &str) -> Result<(), CoreError> {
        self.with_documents_mut(|tx| {
            if tx.remove(collection, id) {
                Ok(())
            } else {
                Err(CoreError::not_found(collection, id))
            }
        })
    }

    /// Runs a closure against the raw documents under the store lock, then
    /// persists whichever collections it touched. Check-then-act sequences
    /// (capacity check + enrollment insert) stay atomic with respect to
    /// every other writer going through this store.
    pub fn with_documents_mut<T>(
        &self,
        f: impl FnOnce(&mut Tx<'_>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let mut tx = Tx {
            collections: &mut inner.collections,
            dirty: BTreeSet::new(),
        };
        let out = f(&mut tx)?;
        let dirty = tx.dirty;

        if !dirty.is_empty() {
            // Invalidate before persisting: even if the file write fails,
            // readers must not see a cached snapshot of pre-write documents.
            inner.generation += 1;
            inner.snapshot = None;
            for name in &dirty {
                persist_collection(
                    &self.workspace,
                    name,
                    inner.collections.get(name).map(|v| v.as_slice()).unwrap_or(&[]),
                )?;
            }
            tracing::debug!(
                generation = inner.generation,
                collections = ?dirty,
                "store mutated"
            );
        }
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a previous writer panicked mid-closure; the
        // in-memory data is still structurally valid JSON, so keep serving.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn collection_path(workspace: &Path, name: &str) -> PathBuf {
    workspace.join(format!("{name}.json"))
}

fn persist_collection(workspace: &Path, name: &str, docs: &[Value]) -> Result<(), CoreError> {
    let path = collection_path(workspace, name);
    let body = serde_json::to_string_pretty(docs)
        .with_context(|| format!("serialize collection {name}"))
        .map_err(CoreError::RemoteOperationFailed)?;
    std::fs::write(&path, body)
        .with_context(|| format!("write collection file {}", path.display()))
        .map_err(CoreError::RemoteOperationFailed)
}

fn decode_snapshot(generation: u64, collections: &HashMap<String, Vec<Value>>) -> Snapshot {
    fn decode_all<T>(
        collections: &HashMap<String, Vec<Value>>,
        name: &str,
        decode: impl Fn(&Value) -> Option<T>,
    ) -> Vec<T> {
        let docs = collections.get(name).map(|v| v.as_slice()).unwrap_or(&[]);
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            match decode(doc) {
                Some(entity) => out.push(entity),
                None => tracing::warn!(collection = name, "skipping undecodable document"),
            }
        }
        out
    }

    Snapshot {
        generation,
        users: decode_all(collections, model::COLLECTION_USERS, model::decode_user),
        subjects: decode_all(collections, model::COLLECTION_SUBJECTS, model::decode_subject),
        class_types: decode_all(
            collections,
            model::COLLECTION_CLASS_TYPES,
            model::decode_class_type,
        ),
        classes: decode_all(collections, model::COLLECTION_CLASSES, model::decode_class),
        enrollments: decode_all(
            collections,
            model::COLLECTION_ENROLMENTS,
            model::decode_enrollment,
        ),
    }
}
