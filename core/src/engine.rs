//! Query orchestration: plan, then score block by block under a resource guard.

use crate::config::ResourceLimits;
use crate::guard::{Checkpoint, Clock, Progress, ResourceGuard, StopReason};
use crate::index::{Index, TermVector};
use crate::planner::{self, QueryPlan};
use crate::scorer::{self, ScoredDoc};
use crate::tokenizer::tokenize;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::mem::size_of;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<ScoredDoc>,
    pub stop_reason: StopReason,
    /// Documents with a positive score before `top_k` was applied.
    pub total_hits: usize,
    pub blocks_scored: usize,
    pub blocks_planned: usize,
}

impl SearchOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.stop_reason.is_completed()
    }
}

/// Run a governed query against a read-only index.
pub fn search(index: &Index, query: &str, top_k: usize, limits: &ResourceLimits) -> SearchOutcome {
    search_with_guard(index, query, top_k, ResourceGuard::start(limits))
}

/// One document under consideration for the current query.
struct Candidate<'a> {
    id: &'a str,
    vector: Option<&'a TermVector>,
    norm: f64,
}

/// Like [`search`], with a caller-started guard (e.g. one driven by a manual clock).
pub fn search_with_guard<C: Clock>(index: &Index, query: &str, top_k: usize, mut guard: ResourceGuard<C>) -> SearchOutcome {
    let limits = guard.limits().clone();
    let tokens = tokenize(query);
    let plan = planner::plan(&tokens, &index.idf, &limits);
    if plan.truncated {
        guard.note_term_truncation();
    }

    let cap = limits.max_docs.unwrap_or(usize::MAX);
    let candidates: Vec<Candidate<'_>> = index
        .documents
        .iter()
        .take(cap)
        .map(|d| Candidate {
            id: d.id.as_str(),
            vector: index.doc_vectors.get(&d.id),
            norm: index.doc_norms.get(&d.id).copied().unwrap_or(0.0),
        })
        .collect();
    if candidates.len() < index.documents.len() {
        guard.note_candidate_cap();
    }

    let query_vector = build_query_vector(&tokens, &plan, index);
    let query_norm = query_vector.values().map(|w| w * w).sum::<f64>().sqrt();

    // Running dot products, one slot per candidate, carried across blocks.
    let mut acc = vec![0.0f64; candidates.len()];
    let working = WorkingSet { tokens: &tokens, plan: &plan, query_vector: &query_vector, candidates: &candidates };
    let mut progress = Progress { docs_scored: 0, terms_scored: 0, working_bytes: working.bytes(&acc) };

    let mut blocks_scored = 0;
    let mut halted = matches!(guard.checkpoint(&progress), Checkpoint::Stop(_));
    for block in &plan.blocks {
        if halted {
            break;
        }
        for (slot, candidate) in acc.iter_mut().zip(&candidates) {
            if let Some(vector) = candidate.vector {
                *slot = scorer::accumulate_dot(*slot, block.iter().map(String::as_str), &query_vector, vector);
            }
        }
        blocks_scored += 1;
        progress.docs_scored = candidates.len();
        progress.terms_scored += block.len();
        progress.working_bytes = working.bytes(&acc);
        halted = matches!(guard.checkpoint(&progress), Checkpoint::Stop(_));
    }

    let checkpoints = guard.checkpoints();
    let peak_bytes = guard.peak_bytes();
    let stop_reason = guard.finish();
    if !stop_reason.is_completed() {
        tracing::warn!(
            %stop_reason,
            blocks_scored,
            blocks_planned = plan.blocks.len(),
            checkpoints,
            peak_bytes,
            "query degraded"
        );
    }

    let accumulated = candidates.iter().zip(&acc).map(|(c, dot)| (c.id, *dot, c.norm));
    let mut results = scorer::finalize(query_norm, accumulated);
    let total_hits = results.len();
    results.truncate(top_k);

    SearchOutcome { results, stop_reason, total_hits, blocks_scored, blocks_planned: plan.blocks.len() }
}

/// `tf_q * idf` over the planned terms only; dropped terms never weigh in.
fn build_query_vector(tokens: &[String], plan: &QueryPlan, index: &Index) -> BTreeMap<String, f64> {
    let planned: HashSet<&str> = plan.terms().collect();
    let mut tf: BTreeMap<String, f64> = BTreeMap::new();
    for token in tokens.iter().filter(|t| planned.contains(t.as_str())) {
        *tf.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    tf.into_iter()
        .map(|(term, count)| {
            let w = count * index.idf_of(&term);
            (term, w)
        })
        .collect()
}

/// The query's own allocations, measured from the live structures at each checkpoint.
struct WorkingSet<'q, 'a> {
    tokens: &'q [String],
    plan: &'q QueryPlan,
    query_vector: &'q BTreeMap<String, f64>,
    candidates: &'q [Candidate<'a>],
}

impl WorkingSet<'_, '_> {
    /// Bytes held now, plus the hits the accumulators would materialize if
    /// the query finalized at this point.
    fn bytes(&self, acc: &[f64]) -> u64 {
        let tokens: usize =
            self.tokens.len() * size_of::<String>() + self.tokens.iter().map(String::len).sum::<usize>();
        let plan: usize = self.plan.blocks.len() * size_of::<Vec<String>>()
            + self.plan.terms().map(|t| t.len() + size_of::<String>()).sum::<usize>();
        let query_vector: usize =
            self.query_vector.keys().map(|t| t.len() + size_of::<String>() + size_of::<f64>()).sum();
        let candidates = self.candidates.len() * size_of::<Candidate<'_>>();
        let accumulators = acc.len() * size_of::<f64>();
        let hits: usize = self
            .candidates
            .iter()
            .zip(acc)
            .filter(|(_, dot)| **dot > 0.0)
            .map(|(c, _)| size_of::<ScoredDoc>() + c.id.len())
            .sum();
        (tokens + plan + query_vector + candidates + accumulators + hits) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_index;
    use crate::guard::ManualClock;
    use crate::index::Document;

    fn corpus() -> Index {
        build_index(vec![
            Document::new("a", "alpha beta gamma"),
            Document::new("b", "alpha beta"),
            Document::new("c", "gamma delta"),
        ])
        .unwrap()
    }

    #[test]
    fn ranks_closest_document_first() {
        let out = search(&corpus(), "alpha beta", 2, &ResourceLimits::unlimited());
        assert_eq!(out.stop_reason, StopReason::Completed);
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].doc_id, "b");
        assert!(out.results[0].score >= out.results[1].score);
    }

    #[test]
    fn doc_budget_caps_candidates() {
        let index = build_index(vec![Document::new("a", "alpha beta gamma"), Document::new("b", "alpha beta")]).unwrap();
        let out = search(&index, "alpha beta", 5, &ResourceLimits::default().with_max_docs(1));
        assert_eq!(out.stop_reason, StopReason::MaxDocs);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].doc_id, "a");
    }

    #[test]
    fn doc_budget_covering_corpus_is_not_a_breach() {
        let out = search(&corpus(), "alpha", 5, &ResourceLimits::default().with_max_docs(3));
        assert_eq!(out.stop_reason, StopReason::Completed);
    }

    #[test]
    fn time_budget_stops_between_blocks() {
        let clock = ManualClock::new();
        let limits = ResourceLimits::default().with_max_seconds(1.0).with_term_block_size(1);
        let guard = ResourceGuard::start_with_clock(&limits, &clock);
        // Clock never moves, so every block runs.
        let out = search_with_guard(&corpus(), "delta alpha beta", 5, guard);
        assert_eq!(out.stop_reason, StopReason::Completed);
        assert_eq!(out.blocks_scored, 3);

        let guard = ResourceGuard::start_with_clock(&limits.clone().with_max_seconds(0.0), &clock);
        let out = search_with_guard(&corpus(), "delta alpha beta", 5, guard);
        assert_eq!(out.stop_reason, StopReason::MaxSeconds);
        assert_eq!(out.blocks_scored, 0);
        assert!(out.results.is_empty());
    }

    #[test]
    fn top_k_zero_returns_nothing() {
        let out = search(&corpus(), "alpha", 0, &ResourceLimits::unlimited());
        assert!(out.results.is_empty());
        assert_eq!(out.total_hits, 2);
    }

    #[test]
    fn query_without_tokens_completes_empty() {
        let out = search(&corpus(), " ,,, ", 5, &ResourceLimits::unlimited());
        assert!(out.results.is_empty());
        assert_eq!(out.stop_reason, StopReason::Completed);
        assert_eq!(out.blocks_planned, 0);
    }

    #[test]
    fn working_set_counts_candidates_and_accumulators() {
        let index = corpus();
        let candidates: Vec<Candidate<'_>> =
            index.documents.iter().map(|d| Candidate { id: &d.id, vector: None, norm: 0.0 }).collect();
        let plan = QueryPlan::default();
        let query_vector = BTreeMap::new();
        let working = WorkingSet { tokens: &[], plan: &plan, query_vector: &query_vector, candidates: &candidates };
        let base = (3 * size_of::<Candidate<'_>>() + 3 * size_of::<f64>()) as u64;
        assert_eq!(working.bytes(&[0.0; 3]), base);
        // One scored candidate adds the hit it would become.
        assert_eq!(working.bytes(&[0.0, 1.5, 0.0]), base + (size_of::<ScoredDoc>() + 1) as u64);
    }

    #[test]
    fn memory_budget_covers_per_candidate_state() {
        let docs: Vec<Document> = (0..64).map(|i| Document::new(format!("doc{i:02}"), "alpha beta")).collect();
        let index = build_index(docs).unwrap();
        // Generous for the accumulators alone, too small for the candidate table.
        let budget = (64 * size_of::<f64>() * 2) as u64;
        let out = search(&index, "alpha", 5, &ResourceLimits::default().with_max_memory_bytes(budget));
        assert_eq!(out.stop_reason, StopReason::MaxMemoryBytes);
        assert_eq!(out.blocks_scored, 0);

        let out = search(&index, "alpha", 5, &ResourceLimits::unlimited());
        assert_eq!(out.stop_reason, StopReason::Completed);
        assert_eq!(out.total_hits, 64);
    }

    #[test]
    fn memory_is_sampled_after_each_block() {
        let index = corpus();
        let limits = ResourceLimits::default().with_term_block_size(1);
        let tokens = tokenize("delta alpha");
        let plan = planner::plan(&tokens, &index.idf, &limits);
        let candidates: Vec<Candidate<'_>> =
            index.documents.iter().map(|d| Candidate { id: &d.id, vector: None, norm: 0.0 }).collect();
        let query_vector = build_query_vector(&tokens, &plan, &index);
        let working = WorkingSet { tokens: &tokens, plan: &plan, query_vector: &query_vector, candidates: &candidates };
        let before = working.bytes(&[0.0; 3]);

        // Allow the first checkpoint but not the growth from scoring "delta".
        let guard = ResourceGuard::start(&limits.clone().with_max_memory_bytes(before + 1));
        let out = search_with_guard(&index, "delta alpha", 5, guard);
        assert_eq!(out.stop_reason, StopReason::MaxMemoryBytes);
        assert_eq!(out.blocks_scored, 1);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].doc_id, "c");
    }
}
