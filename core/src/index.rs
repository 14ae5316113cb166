use crate::persist::FORMAT_VERSION;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type DocId = String;

/// Sparse term -> weight mapping. Absent terms weigh 0.
pub type TermVector = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }
}

/// Immutable search index: documents in ingestion order plus derived weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub version: u32,
    pub documents: Vec<Document>,
    pub idf: BTreeMap<String, f64>,
    pub doc_vectors: BTreeMap<DocId, TermVector>,
    pub doc_norms: BTreeMap<DocId, f64>,
}

impl Default for Index {
    /// An empty index at the current format version.
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            documents: Vec::new(),
            idf: BTreeMap::new(),
            doc_vectors: BTreeMap::new(),
            doc_norms: BTreeMap::new(),
        }
    }
}

impl Index {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn num_docs(&self) -> usize {
        self.documents.len()
    }

    pub fn num_terms(&self) -> usize {
        self.idf.len()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn idf_of(&self, term: &str) -> f64 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }
}

/// Euclidean norm of a vector, summed in key order so the result is reproducible.
pub fn vector_norm(vector: &TermVector) -> f64 {
    vector.values().map(|w| w * w).sum::<f64>().sqrt()
}

/// Shared, read-mostly handle to the currently served index.
///
/// Readers take a cheap `Arc` snapshot; a rebuild swaps the whole value so a
/// query never observes a half-replaced index.
#[derive(Clone, Default)]
pub struct SharedIndex {
    inner: Arc<RwLock<Arc<Index>>>,
}

impl SharedIndex {
    pub fn new(index: Index) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(index))) }
    }

    pub fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&self.inner.read())
    }

    /// Replace the served index, returning the previous one.
    pub fn replace(&self, index: Index) -> Arc<Index> {
        let next = Arc::new(index);
        std::mem::replace(&mut *self.inner.write(), next)
    }
}
