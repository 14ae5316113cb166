use crate::index::{DocId, TermVector};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

/// Score descending, then doc id ascending. A total order over finite scores.
pub fn rank_order(a: &ScoredDoc, b: &ScoredDoc) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Cosine similarity from an accumulated dot product; a zero norm on either side scores 0.
pub fn cosine(dot: f64, query_norm: f64, doc_norm: f64) -> f64 {
    if query_norm == 0.0 || doc_norm == 0.0 {
        return 0.0;
    }
    dot / (query_norm * doc_norm)
}

/// Add the contribution of `terms` to a running dot product.
pub fn accumulate_dot<'a>(
    running: f64,
    terms: impl IntoIterator<Item = &'a str>,
    query_vector: &BTreeMap<String, f64>,
    doc_vector: &TermVector,
) -> f64 {
    terms.into_iter().fold(running, |acc, term| {
        match (query_vector.get(term), doc_vector.get(term)) {
            (Some(q), Some(d)) => acc + q * d,
            _ => acc,
        }
    })
}

/// Sort into rank order, dropping non-positive scores.
pub fn rank(mut scored: Vec<ScoredDoc>) -> Vec<ScoredDoc> {
    scored.retain(|s| s.score > 0.0);
    scored.sort_by(rank_order);
    scored
}

/// Turn `(doc_id, accumulated dot, doc_norm)` triples into ranked hits.
///
/// Ids are only copied for documents with a positive dot product.
pub fn finalize<'a>(query_norm: f64, accumulated: impl IntoIterator<Item = (&'a str, f64, f64)>) -> Vec<ScoredDoc> {
    let scored = accumulated
        .into_iter()
        .filter(|(_, dot, _)| *dot > 0.0)
        .map(|(doc_id, dot, doc_norm)| ScoredDoc { doc_id: doc_id.to_string(), score: cosine(dot, query_norm, doc_norm) })
        .collect();
    rank(scored)
}

/// Non-incremental form: score every candidate against the full query vector
/// in one pass and rank the result.
pub fn score<'a>(
    query_vector: &BTreeMap<String, f64>,
    candidates: impl IntoIterator<Item = (&'a DocId, &'a TermVector, f64)>,
) -> Vec<ScoredDoc> {
    let query_norm = query_vector.values().map(|w| w * w).sum::<f64>().sqrt();
    let accumulated = candidates.into_iter().map(|(doc_id, vector, doc_norm)| {
        let dot = accumulate_dot(0.0, query_vector.keys().map(String::as_str), query_vector, vector);
        (doc_id.as_str(), dot, doc_norm)
    });
    finalize(query_norm, accumulated)
}
