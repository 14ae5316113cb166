use notso_core::guard::ManualClock;
use notso_core::persist::{decode, encode, load_index, save_index};
use notso_core::{build_index, search, search_with_guard, Document, Index, ResourceGuard, ResourceLimits, StopReason};

fn docs(pairs: &[(&str, &str)]) -> Vec<Document> {
    pairs.iter().map(|(id, text)| Document::new(*id, *text)).collect()
}

fn library() -> Index {
    build_index(docs(&[
        ("rust-book", "Rust is a systems programming language focused on safety and speed"),
        ("python-intro", "Python is a programming language that lets you work quickly"),
        ("fox", "The quick brown fox jumps over the lazy dog"),
        ("search-notes", "A search engine ranks documents by relevance to a query"),
        ("tfidf", "TF-IDF weighting ranks rare terms above common terms in search"),
        ("borrow", "The Rust borrow checker enforces memory safety without garbage collection"),
    ]))
    .unwrap()
}

#[test]
fn empty_corpus_returns_empty_completed() {
    let index = build_index(vec![]).unwrap();
    let out = search(&index, "anything", 10, &ResourceLimits::unlimited());
    assert!(out.results.is_empty());
    assert_eq!(out.stop_reason, StopReason::Completed);
}

#[test]
fn higher_term_frequency_ranks_first() {
    let index = build_index(docs(&[("d1", "cat dog"), ("d2", "dog dog dog")])).unwrap();
    let out = search(&index, "dog", 10, &ResourceLimits::unlimited());
    let ids: Vec<&str> = out.results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["d2", "d1"]);
    assert!(out.results[0].score > out.results[1].score);
}

#[test]
fn repeated_searches_are_identical() {
    let index = library();
    for query in ["rust safety", "programming language", "search ranks rare terms", "zzz"] {
        let a = search(&index, query, 10, &ResourceLimits::unlimited());
        let b = search(&index, query, 10, &ResourceLimits::unlimited());
        assert_eq!(a, b);
        let bits_a: Vec<u64> = a.results.iter().map(|r| r.score.to_bits()).collect();
        let bits_b: Vec<u64> = b.results.iter().map(|r| r.score.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }
}

#[test]
fn results_are_sorted_with_id_tie_break() {
    let index = build_index(docs(&[("b", "same words"), ("a", "same words"), ("c", "same words")])).unwrap();
    let out = search(&index, "same", 10, &ResourceLimits::unlimited());
    let ids: Vec<&str> = out.results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn tiny_memory_budget_degrades_then_recovers() {
    let index = library();
    let starved = search(&index, "rust safety", 10, &ResourceLimits::default().with_max_memory_bytes(1));
    assert_eq!(starved.stop_reason, StopReason::MaxMemoryBytes);
    assert!(starved.results.len() <= 10);

    let next = search(&index, "quick brown fox", 10, &ResourceLimits::unlimited());
    assert_eq!(next.stop_reason, StopReason::Completed);
    assert_eq!(next.results[0].doc_id, "fox");
}

#[test]
fn shrinking_time_budget_eventually_stops() {
    let index = library();
    let clock = ManualClock::new();
    let generous = ResourceLimits::default().with_max_seconds(60.0).with_term_block_size(1);
    let out = search_with_guard(&index, "rust borrow safety", 5, ResourceGuard::start_with_clock(&generous, &clock));
    assert_eq!(out.stop_reason, StopReason::Completed);

    let exhausted = generous.clone().with_max_seconds(0.0);
    let out = search_with_guard(&index, "rust borrow safety", 5, ResourceGuard::start_with_clock(&exhausted, &clock));
    assert_eq!(out.stop_reason, StopReason::MaxSeconds);
}

#[test]
fn rare_terms_dominate_under_term_budget() {
    let index = library();
    let query = "programming borrow";
    let full = search(&index, query, 5, &ResourceLimits::unlimited());
    let tight = search(&index, query, 5, &ResourceLimits::default().with_max_query_terms(1));
    assert_eq!(tight.stop_reason, StopReason::MaxQueryTerms);
    assert_eq!(full.stop_reason, StopReason::Completed);
    // "borrow" is rarer than "programming", so it is the one kept.
    assert_eq!(tight.results[0].doc_id, "borrow");
    assert_eq!(full.results[0].doc_id, tight.results[0].doc_id);
}

#[test]
fn zero_term_budget_stops_with_no_results() {
    let out = search(&library(), "rust", 5, &ResourceLimits::default().with_max_query_terms(0));
    assert_eq!(out.stop_reason, StopReason::MaxQueryTerms);
    assert!(out.results.is_empty());
}

#[test]
fn search_never_mutates_index() {
    let index = library();
    let before = index.clone();
    let _ = search(&index, "rust safety", 3, &ResourceLimits::default().with_max_memory_bytes(1));
    let _ = search(&index, "rust safety", 3, &ResourceLimits::unlimited());
    assert_eq!(index, before);
}

#[test]
fn persisted_index_answers_identically() {
    let index = library();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.nsix");
    save_index(&path, &index).unwrap();
    let loaded = load_index(&path).unwrap();
    assert_eq!(decode(&encode(&index).unwrap()).unwrap(), index);
    assert_eq!(
        search(&index, "search engine", 3, &ResourceLimits::unlimited()),
        search(&loaded, "search engine", 3, &ResourceLimits::unlimited()),
    );
}
