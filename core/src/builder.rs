use crate::error::{Error, Result};
use crate::index::{vector_norm, Document, Index, TermVector};
use crate::persist::FORMAT_VERSION;
use crate::tokenizer::tokenize;
use std::collections::{BTreeMap, HashSet};

/// Smoothed IDF: `ln((N + 1) / (df + 1)) + 1`, finite and >= 1 whenever df <= N.
pub fn smoothed_idf(num_docs: usize, df: usize) -> f64 {
    ((1.0 + num_docs as f64) / (1.0 + df as f64)).ln() + 1.0
}

/// Build a TF-IDF index from an ordered corpus.
///
/// Output document order matches input order. Weights depend only on the
/// corpus contents, never on processing order. An empty corpus yields an
/// empty index.
pub fn build_index(corpus: Vec<Document>) -> Result<Index> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(corpus.len());
    for doc in &corpus {
        if !seen.insert(doc.id.as_str()) {
            return Err(Error::DuplicateDocument { id: doc.id.clone() });
        }
    }

    // Raw term frequencies per document
    let mut tf_per_doc: Vec<BTreeMap<String, u32>> = Vec::with_capacity(corpus.len());
    let mut df: BTreeMap<String, usize> = BTreeMap::new();
    for doc in &corpus {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokenize(&doc.text) {
            *counts.entry(token).or_insert(0) += 1;
        }
        for term in counts.keys() {
            *df.entry(term.clone()).or_insert(0) += 1;
        }
        tf_per_doc.push(counts);
    }

    let n = corpus.len();
    let idf: BTreeMap<String, f64> = df
        .into_iter()
        .map(|(term, df_t)| {
            let w = smoothed_idf(n, df_t);
            (term, w)
        })
        .collect();

    let mut doc_vectors = BTreeMap::new();
    let mut doc_norms = BTreeMap::new();
    for (doc, counts) in corpus.iter().zip(tf_per_doc) {
        let vector: TermVector = counts
            .into_iter()
            .map(|(term, tf)| {
                let w = tf as f64 * idf[&term];
                (term, w)
            })
            .collect();
        doc_norms.insert(doc.id.clone(), vector_norm(&vector));
        doc_vectors.insert(doc.id.clone(), vector);
    }

    tracing::info!(num_docs = n, num_terms = idf.len(), "built index");
    Ok(Index { version: FORMAT_VERSION, documents: corpus, idf, doc_vectors, doc_norms })
}
