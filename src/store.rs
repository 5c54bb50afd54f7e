//! File-backed record store.
//!
//! All records live in one pretty-printed JSON document, grouped by kind and
//! keyed by `"<LOCALE>/<ASIN>"`:
//!
//! ```json
//! { "products": { "US/B000X1": { ... } }, "competitors": { "US/B000X1": { ... } } }
//! ```
//!
//! Every [`RecordStore::upsert`] rewrites the whole document through a temp
//! file and a rename, and only then updates the in-memory copy. A failed write
//! therefore leaves the previously committed state untouched on disk and in
//! memory.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{CompetitorSet, Product, ProductKey};

/// Top-level sections of the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    Products,
    Competitors,
}

/// A kind of record held by the store.
pub trait RecordKind {
    const SECTION: SectionId;
    /// Name used in logs and error messages.
    const NAME: &'static str;
    type Record: Serialize + DeserializeOwned;
}

pub struct Products;

impl RecordKind for Products {
    const SECTION: SectionId = SectionId::Products;
    const NAME: &'static str = "products";
    type Record = Product;
}

pub struct CompetitorSets;

impl RecordKind for CompetitorSets {
    const SECTION: SectionId = SectionId::Competitors;
    const NAME: &'static str = "competitors";
    type Record = CompetitorSet;
}

type Section = BTreeMap<String, Value>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    products: Section,
    #[serde(default)]
    competitors: Section,
}

impl Document {
    fn section(&self, id: SectionId) -> &Section {
        match id {
            SectionId::Products => &self.products,
            SectionId::Competitors => &self.competitors,
        }
    }

    fn section_mut(&mut self, id: SectionId) -> &mut Section {
        match id {
            SectionId::Products => &mut self.products,
            SectionId::Competitors => &mut self.competitors,
        }
    }
}

pub struct RecordStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl RecordStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Document::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AppError::Storage(format!("{} is corrupt: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => {
                return Err(AppError::Storage(format!("cannot read {}: {}", path.display(), e)));
            }
        };
        debug!(
            path = %path.display(),
            products = doc.products.len(),
            competitor_sets = doc.competitors.len(),
            "Opened record store"
        );
        Ok(RecordStore {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn get<K: RecordKind>(&self, key: &ProductKey) -> Result<Option<K::Record>> {
        let doc = self.lock()?;
        doc.section(K::SECTION)
            .get(&key.to_string())
            .map(|value| decode::<K>(value.clone()))
            .transpose()
    }

    /// Inserts `record` under `key`, replacing whatever was stored there.
    /// Returns once the new document is durably on disk.
    pub fn upsert<K: RecordKind>(&self, key: &ProductKey, record: &K::Record) -> Result<()> {
        let value = serde_json::to_value(record)
            .map_err(|e| AppError::Storage(format!("cannot encode {}: {}", K::NAME, e)))?;

        let mut doc = self.lock()?;
        let mut next = doc.clone();
        let replaced = next.section_mut(K::SECTION).insert(key.to_string(), value).is_some();
        self.persist(&next)?;
        *doc = next;

        debug!(kind = K::NAME, key = %key, replaced, "Upserted record");
        Ok(())
    }

    /// Snapshot of every record of kind `K`, in key order.
    pub fn list<K: RecordKind>(&self) -> Result<Records<K>> {
        let doc = self.lock()?;
        Ok(Records {
            values: doc.section(K::SECTION).values().cloned().collect(),
            kind: PhantomData,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Document>> {
        self.doc
            .lock()
            .map_err(|_| AppError::Storage("record store lock poisoned".to_string()))
    }

    fn persist(&self, doc: &Document) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| AppError::Storage(format!("cannot encode store: {}", e)))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| write_error(dir, e))?;
        }

        let tmp = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            // Best effort; the backing file itself was never touched.
            let _ = fs::remove_file(&tmp);
            write_error(&self.path, e)
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_error(path: &Path, err: std::io::Error) -> AppError {
    AppError::Storage(format!("cannot write {}: {}", path.display(), err))
}

fn decode<K: RecordKind>(value: Value) -> Result<K::Record> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Storage(format!("corrupt {} record: {}", K::NAME, e)))
}

/// Point-in-time listing of one record kind.
///
/// Records are decoded as they are iterated. Iterating by reference can be
/// repeated and always starts from the first record.
pub struct Records<K: RecordKind> {
    values: Vec<Value>,
    kind: PhantomData<K>,
}

impl<K: RecordKind> Records<K> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<K::Record>> + '_ {
        self.values.iter().map(|v| decode::<K>(v.clone()))
    }
}

impl<K: RecordKind> IntoIterator for Records<K> {
    type Item = Result<K::Record>;
    type IntoIter = std::iter::Map<std::vec::IntoIter<Value>, fn(Value) -> Result<K::Record>>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter().map(decode::<K> as fn(Value) -> Result<K::Record>)
    }
}
