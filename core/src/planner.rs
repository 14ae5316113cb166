use crate::config::ResourceLimits;
use std::collections::{BTreeMap, HashSet};

/// Ordered term blocks for one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPlan {
    pub blocks: Vec<Vec<String>>,
    /// True when `max_query_terms` removed at least one term.
    pub truncated: bool,
    pub dropped_terms: usize,
}

impl QueryPlan {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn num_terms(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().flatten().map(String::as_str)
    }
}

/// Order unique query terms by IDF descending, ties by first query position,
/// truncate to `max_query_terms`, and chunk into `term_block_size` blocks.
///
/// Terms missing from the IDF table plan with IDF 0 and land last.
pub fn plan(query_tokens: &[String], idf: &BTreeMap<String, f64>, limits: &ResourceLimits) -> QueryPlan {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut unique: Vec<(&str, usize, f64)> = Vec::new();
    for (pos, token) in query_tokens.iter().enumerate() {
        if !seen.insert(token.as_str()) {
            continue;
        }
        let weight = idf.get(token).copied().unwrap_or(0.0);
        unique.push((token.as_str(), pos, weight));
    }

    unique.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.1.cmp(&b.1)));

    let mut dropped_terms = 0;
    if let Some(max) = limits.max_query_terms {
        if unique.len() > max {
            dropped_terms = unique.len() - max;
            unique.truncate(max);
        }
    }

    let block_size = limits.term_block_size.get();
    let blocks: Vec<Vec<String>> = unique
        .chunks(block_size)
        .map(|chunk| chunk.iter().map(|(term, _, _)| term.to_string()).collect())
        .collect();

    QueryPlan { blocks, truncated: dropped_terms > 0, dropped_terms }
}
