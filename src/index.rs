//! In-memory inverted index over wiki documents
//!
//! Keeps a primary entry map plus two derived back-reference maps
//! (keyword -> entry ids, domain -> entry ids). The derived maps never own
//! entries; every mutation keeps all three structures consistent under one
//! lock. Search combines substring, exact-keyword, and bounded-Levenshtein
//! fuzzy scoring.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{PerfError, Result};

/// Common English words excluded from keyword extraction
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one",
        "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "off", "she",
        "too", "use", "that", "with", "have", "this", "will", "your", "from", "they", "been",
        "were", "said", "each", "which", "their", "time", "into", "only", "some", "could",
        "them", "than", "then", "also", "when", "what", "over", "such", "more", "very",
        "just", "about", "after", "before", "between", "under", "while", "these", "those",
        "there", "where", "would", "should",
    ]
    .into_iter()
    .collect()
});

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Keywords kept per entry, ranked by frequency
    pub max_keywords: usize,
    /// Documents processed per rebuild batch before yielding
    pub rebuild_batch_size: usize,
    /// Candidate count above which search scoring runs on the rayon pool
    pub parallel_chunk_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_keywords: 50,
            rebuild_batch_size: 100,
            parallel_chunk_size: 1_000,
        }
    }
}

/// An indexed wiki document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Deterministic id derived from the URL, stable across content updates
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    /// Frequency-ranked keywords, capped at `max_keywords`
    pub keywords: Vec<String>,
    pub last_modified: DateTime<Utc>,
    /// Content byte length
    pub size: usize,
    /// Content fingerprint, recomputed only when content changes
    pub hash: String,
}

/// Input document for `add_entry` and `rebuild`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub url: String,
    pub title: String,
    pub content: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl IndexDocument {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }
}

/// Partial update for an existing entry
#[derive(Debug, Clone, Default)]
pub struct IndexUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl IndexUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }
}

/// Result ordering for search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    Date,
    Title,
}

/// Predicate filters applied before scoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to entries whose URL host matches exactly
    pub domain: Option<String>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
}

impl SearchFilters {
    fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(after) = self.modified_after {
            if entry.last_modified < after {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if entry.last_modified > before {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if entry.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if entry.size > max {
                return false;
            }
        }
        true
    }
}

/// Search options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    pub offset: usize,
    /// Tolerate small misspellings via bounded edit distance
    pub fuzzy: bool,
    /// Keep the `content` field on returned entries
    pub include_content: bool,
    pub sort_by: SortBy,
    pub filters: SearchFilters,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            fuzzy: false,
            include_content: false,
            sort_by: SortBy::Relevance,
            filters: SearchFilters::default(),
        }
    }
}

/// Pagination info for a result page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// A page of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub entries: Vec<IndexEntry>,
    /// Match count before pagination
    pub total: usize,
    pub took_ms: u64,
    pub pagination: Pagination,
}

/// Aggregate index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_entries: usize,
    pub total_size: usize,
    pub average_size: usize,
    pub domains: Vec<String>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Progress event published after each rebuild batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildProgress {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub done: bool,
}

/// Outcome of a completed rebuild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<String, IndexEntry>,
    keywords: HashMap<String, HashSet<String>>,
    domains: HashMap<String, HashSet<String>>,
}

impl IndexState {
    fn link(&mut self, entry: &IndexEntry, domain: &str) {
        for keyword in &entry.keywords {
            self.keywords
                .entry(keyword.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(entry.id.clone());
    }

    /// Retract every derived reference to an entry, dropping emptied buckets
    fn unlink(&mut self, entry: &IndexEntry) {
        self.retract_keywords(entry);
        if let Ok(domain) = host_of(&entry.url) {
            if let Some(ids) = self.domains.get_mut(&domain) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.domains.remove(&domain);
                }
            }
        }
    }

    fn retract_keywords(&mut self, entry: &IndexEntry) {
        for keyword in &entry.keywords {
            if let Some(ids) = self.keywords.get_mut(keyword) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.keywords.remove(keyword);
                }
            }
        }
    }
}

/// In-memory full-text index manager
pub struct IndexManager {
    config: IndexConfig,
    state: RwLock<IndexState>,
    rebuilding: AtomicBool,
    progress_tx: watch::Sender<RebuildProgress>,
}

impl IndexManager {
    pub fn new(config: IndexConfig) -> Self {
        let (progress_tx, _) = watch::channel(RebuildProgress::default());
        Self {
            config,
            state: RwLock::new(IndexState::default()),
            rebuilding: AtomicBool::new(false),
            progress_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(IndexConfig::default())
    }

    /// Subscribe to rebuild progress events
    pub fn progress(&self) -> watch::Receiver<RebuildProgress> {
        self.progress_tx.subscribe()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::SeqCst)
    }

    /// Index a document, returning its id
    ///
    /// Re-adding a URL replaces the previous entry and retracts its old
    /// derived references first.
    pub async fn add_entry(&self, doc: IndexDocument) -> Result<String> {
        let domain = host_of(&doc.url)?;
        let id = entry_id(&doc.url);
        let hash = fingerprint(&doc.content);
        let keywords = extract_keywords(&doc.title, &doc.content, self.config.max_keywords);

        let entry = IndexEntry {
            id: id.clone(),
            url: doc.url,
            title: doc.title,
            size: doc.content.len(),
            content: doc.content,
            keywords,
            last_modified: doc.last_modified.unwrap_or_else(Utc::now),
            hash,
        };

        let mut state = self.state.write().await;
        if let Some(old) = state.entries.remove(&id) {
            state.unlink(&old);
        }
        state.link(&entry, &domain);
        state.entries.insert(id.clone(), entry);
        Ok(id)
    }

    /// Merge a partial update into an existing entry
    ///
    /// Hash, size, and keywords are recomputed only when the content
    /// fingerprint actually changed; identical content is a no-op for the
    /// keyword index. Returns false if the id is unknown.
    pub async fn update_entry(&self, id: &str, patch: IndexUpdate) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(mut entry) = state.entries.remove(id) else {
            return Ok(false);
        };

        let mut reindex = false;
        if let Some(content) = patch.content {
            let new_hash = fingerprint(&content);
            if new_hash != entry.hash {
                entry.hash = new_hash;
                entry.size = content.len();
                entry.content = content;
                reindex = true;
            }
        }
        if let Some(title) = patch.title {
            entry.title = title;
        }
        if let Some(last_modified) = patch.last_modified {
            entry.last_modified = last_modified;
        }

        if reindex {
            state.retract_keywords(&entry);
            entry.keywords =
                extract_keywords(&entry.title, &entry.content, self.config.max_keywords);
            for keyword in &entry.keywords {
                state
                    .keywords
                    .entry(keyword.clone())
                    .or_default()
                    .insert(entry.id.clone());
            }
        }

        state.entries.insert(id.to_string(), entry);
        Ok(true)
    }

    /// Remove an entry and every derived reference to it
    pub async fn remove_entry(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.entries.remove(id) {
            Some(entry) => {
                state.unlink(&entry);
                true
            }
            None => false,
        }
    }

    pub async fn get_entry(&self, id: &str) -> Option<IndexEntry> {
        self.state.read().await.entries.get(id).cloned()
    }

    /// Ranked search over the index
    ///
    /// Filters narrow the candidate set first (the domain filter goes through
    /// the domain map), then every surviving entry is scored against the
    /// query terms. Zero-score entries are dropped whenever the query is
    /// non-empty.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchResults {
        let start = Instant::now();
        let state = self.state.read().await;

        let candidates: Vec<&IndexEntry> = match &options.filters.domain {
            Some(domain) => state
                .domains
                .get(domain)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.entries.get(id))
                        .filter(|e| options.filters.matches(e))
                        .collect()
                })
                .unwrap_or_default(),
            None => state
                .entries
                .values()
                .filter(|e| options.filters.matches(e))
                .collect(),
        };

        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut scored: Vec<(i64, &IndexEntry)> = if terms.is_empty() {
            candidates.into_iter().map(|e| (0, e)).collect()
        } else {
            let fuzzy = options.fuzzy;
            let scored: Vec<(i64, &IndexEntry)> =
                if candidates.len() >= self.config.parallel_chunk_size {
                    candidates
                        .par_iter()
                        .map(|e| (score_entry(e, &terms, fuzzy), *e))
                        .collect()
                } else {
                    candidates
                        .iter()
                        .map(|e| (score_entry(e, &terms, fuzzy), *e))
                        .collect()
                };
            scored.into_iter().filter(|(score, _)| *score > 0).collect()
        };

        match options.sort_by {
            SortBy::Relevance => scored.sort_by(|a, b| b.0.cmp(&a.0)),
            SortBy::Date => scored.sort_by(|a, b| b.1.last_modified.cmp(&a.1.last_modified)),
            SortBy::Title => scored.sort_by(|a, b| a.1.title.cmp(&b.1.title)),
        }

        let total = scored.len();
        let entries: Vec<IndexEntry> = scored
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .map(|(_, entry)| {
                let mut out = entry.clone();
                if !options.include_content {
                    out.content = String::new();
                }
                out
            })
            .collect();

        debug!(query, total, took_ms = start.elapsed().as_millis() as u64, "search completed");

        SearchResults {
            entries,
            total,
            took_ms: start.elapsed().as_millis() as u64,
            pagination: Pagination {
                limit: options.limit,
                offset: options.offset,
                has_more: options.offset + options.limit < total,
            },
        }
    }

    /// Rebuild the whole index from scratch
    ///
    /// Clears all three structures, then repopulates in batches, yielding to
    /// the scheduler and publishing a progress event after each batch.
    /// Documents that fail to index are skipped, not fatal. A second rebuild
    /// while one is running fails fast.
    pub async fn rebuild(&self, docs: Vec<IndexDocument>) -> Result<RebuildSummary> {
        if self.rebuilding.swap(true, Ordering::SeqCst) {
            return Err(PerfError::RebuildInProgress);
        }
        let result = self.rebuild_inner(docs).await;
        self.rebuilding.store(false, Ordering::SeqCst);
        result
    }

    async fn rebuild_inner(&self, docs: Vec<IndexDocument>) -> Result<RebuildSummary> {
        let total = docs.len();
        info!(total, "index rebuild started");

        {
            let mut state = self.state.write().await;
            state.entries.clear();
            state.keywords.clear();
            state.domains.clear();
        }

        let mut indexed = 0usize;
        let mut skipped = 0usize;
        let batch_size = self.config.rebuild_batch_size.max(1);

        let mut iter = docs.into_iter().peekable();
        while iter.peek().is_some() {
            for doc in iter.by_ref().take(batch_size) {
                match self.add_entry(doc).await {
                    Ok(_) => indexed += 1,
                    Err(err) => {
                        warn!(%err, "skipping document during rebuild");
                        skipped += 1;
                    }
                }
            }
            let done = iter.peek().is_none();
            self.progress_tx.send_replace(RebuildProgress {
                total,
                indexed,
                skipped,
                done,
            });
            tokio::task::yield_now().await;
        }

        info!(indexed, skipped, "index rebuild finished");
        Ok(RebuildSummary {
            total,
            indexed,
            skipped,
        })
    }

    /// Aggregate statistics over the current index contents
    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        let total_entries = state.entries.len();
        let total_size: usize = state.entries.values().map(|e| e.size).sum();
        let mut domains: Vec<String> = state.domains.keys().cloned().collect();
        domains.sort();

        IndexStats {
            total_entries,
            total_size,
            average_size: if total_entries > 0 {
                total_size / total_entries
            } else {
                0
            },
            domains,
            oldest_entry: state.entries.values().map(|e| e.last_modified).min(),
            newest_entry: state.entries.values().map(|e| e.last_modified).max(),
        }
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Deterministic entry id from a URL
fn entry_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&digest[..12])
}

/// Content fingerprint used to detect no-op updates
fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(&digest[..16])
}

/// Extract the URL host for the domain index
fn host_of(url: &str) -> Result<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| PerfError::InvalidUrl(url.to_string()))
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 2)
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(word.as_str()))
}

/// Top keywords from title + content, ranked by frequency
///
/// Ties on frequency keep first-occurrence order from the token stream.
fn extract_keywords(title: &str, content: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, word) in tokenize(title).chain(tokenize(content)).enumerate() {
        let slot = counts.entry(word).or_insert((0, position));
        slot.0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(max).map(|(word, _)| word).collect()
}

fn score_entry(entry: &IndexEntry, terms: &[String], fuzzy: bool) -> i64 {
    let title = entry.title.to_lowercase();
    let content = entry.content.to_lowercase();
    let mut score = 0;

    for term in terms {
        if title.contains(term.as_str()) {
            score += 10;
        }
        if content.contains(term.as_str()) {
            score += 1;
        }
        for keyword in &entry.keywords {
            if keyword == term {
                score += 5;
            } else if fuzzy {
                let max_len = keyword.chars().count().max(term.chars().count());
                let threshold = (0.3 * max_len as f64).floor() as usize;
                if levenshtein(keyword, term) <= threshold {
                    score += 2;
                }
            }
        }
    }
    score
}

/// Levenshtein edit distance, two-row dynamic programming
fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev_row: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(url: &str, title: &str, content: &str) -> IndexDocument {
        IndexDocument::new(url, title, content)
    }

    #[tokio::test]
    async fn test_add_and_search_roundtrip() {
        let index = IndexManager::with_defaults();
        let id = index
            .add_entry(doc(
                "https://wiki.example.com/rust",
                "Rust async patterns",
                "Practical patterns for writing async Rust services.",
            ))
            .await
            .unwrap();

        let results = index
            .search("Rust async patterns", &SearchOptions::default())
            .await;
        assert_eq!(results.total, 1);
        assert_eq!(results.entries[0].id, id);
    }

    #[tokio::test]
    async fn test_entry_id_stable_across_content() {
        let index = IndexManager::with_defaults();
        let id1 = index
            .add_entry(doc("https://wiki.example.com/page", "First", "one"))
            .await
            .unwrap();
        let id2 = index
            .add_entry(doc("https://wiki.example.com/page", "Second", "two"))
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let stats = index.stats().await;
        assert_eq!(stats.total_entries, 1, "same URL must replace, not duplicate");
    }

    #[tokio::test]
    async fn test_remove_retracts_all_references() {
        let index = IndexManager::with_defaults();
        let id = index
            .add_entry(doc(
                "https://wiki.example.com/gc",
                "Garbage collection",
                "Tracing garbage collection walks the object graph.",
            ))
            .await
            .unwrap();

        assert!(index.remove_entry(&id).await);

        let results = index
            .search("garbage collection", &SearchOptions::default())
            .await;
        assert_eq!(results.total, 0);

        let state = index.state.read().await;
        assert!(state.keywords.is_empty(), "no keyword bucket may survive");
        assert!(state.domains.is_empty(), "no domain bucket may survive");
    }

    #[tokio::test]
    async fn test_fuzzy_search_tolerates_typo() {
        let index = IndexManager::with_defaults();
        index
            .add_entry(doc(
                "https://wiki.example.com/ts",
                "typescript typescript typescript",
                "typescript guide",
            ))
            .await
            .unwrap();

        let options = SearchOptions {
            fuzzy: true,
            ..Default::default()
        };
        let results = index.search("typescrit", &options).await;
        assert_eq!(results.total, 1);

        let strict = index.search("typescrit", &SearchOptions::default()).await;
        assert_eq!(strict.total, 0, "non-fuzzy search must not match the typo");
    }

    #[tokio::test]
    async fn test_update_reindexes_only_on_content_change() {
        let index = IndexManager::with_defaults();
        let id = index
            .add_entry(doc(
                "https://wiki.example.com/kafka",
                "Kafka",
                "partition rebalancing",
            ))
            .await
            .unwrap();
        let before = index.get_entry(&id).await.unwrap();

        // Same content: hash and keywords untouched
        index
            .update_entry(&id, IndexUpdate::new().with_content("partition rebalancing"))
            .await
            .unwrap();
        let unchanged = index.get_entry(&id).await.unwrap();
        assert_eq!(unchanged.hash, before.hash);
        assert_eq!(unchanged.keywords, before.keywords);

        // New content: old keyword links retracted, new ones live
        index
            .update_entry(&id, IndexUpdate::new().with_content("consumer offsets"))
            .await
            .unwrap();
        let results = index.search("rebalancing", &SearchOptions::default()).await;
        assert!(results.entries.iter().all(|e| e.id != id));
        let results = index.search("offsets", &SearchOptions::default()).await;
        assert_eq!(results.total, 1);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let index = IndexManager::with_defaults();
        let err = index
            .add_entry(doc("not a url", "Title", "content"))
            .await
            .unwrap_err();
        assert!(matches!(err, PerfError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_domain_filter_uses_host() {
        let index = IndexManager::with_defaults();
        index
            .add_entry(doc("https://alpha.example.com/a", "shared term", "alpha body"))
            .await
            .unwrap();
        index
            .add_entry(doc("https://beta.example.com/b", "shared term", "beta body"))
            .await
            .unwrap();

        let options = SearchOptions {
            filters: SearchFilters {
                domain: Some("alpha.example.com".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let results = index.search("shared", &options).await;
        assert_eq!(results.total, 1);
        assert!(results.entries[0].url.contains("alpha"));
    }

    #[tokio::test]
    async fn test_pagination_and_content_stripping() {
        let index = IndexManager::with_defaults();
        for i in 0..5 {
            index
                .add_entry(doc(
                    &format!("https://wiki.example.com/page{}", i),
                    &format!("pagination demo {}", i),
                    "pagination body text",
                ))
                .await
                .unwrap();
        }

        let options = SearchOptions {
            limit: 2,
            offset: 2,
            ..Default::default()
        };
        let results = index.search("pagination", &options).await;
        assert_eq!(results.total, 5);
        assert_eq!(results.entries.len(), 2);
        assert!(results.pagination.has_more);
        assert!(results.entries.iter().all(|e| e.content.is_empty()));

        let with_content = index
            .search(
                "pagination",
                &SearchOptions {
                    include_content: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(!with_content.entries[0].content.is_empty());
    }

    #[tokio::test]
    async fn test_sort_by_title() {
        let index = IndexManager::with_defaults();
        index
            .add_entry(doc("https://w.example.com/b", "banana sorting", "sorting"))
            .await
            .unwrap();
        index
            .add_entry(doc("https://w.example.com/a", "apple sorting", "sorting"))
            .await
            .unwrap();

        let options = SearchOptions {
            sort_by: SortBy::Title,
            ..Default::default()
        };
        let results = index.search("sorting", &options).await;
        assert!(results.entries[0].title.starts_with("apple"));
    }

    #[tokio::test]
    async fn test_rebuild_skips_bad_documents() {
        let index = IndexManager::with_defaults();
        index
            .add_entry(doc("https://old.example.com/stale", "stale", "stale entry"))
            .await
            .unwrap();

        let mut progress = index.progress();
        let docs = vec![
            doc("https://wiki.example.com/one", "one", "first document"),
            doc("broken url", "bad", "unparseable"),
            doc("https://wiki.example.com/two", "two", "second document"),
        ];
        let summary = index.rebuild(docs).await.unwrap();
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.skipped, 1);

        // Old contents were cleared before repopulating
        let stats = index.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert!(!stats.domains.contains(&"old.example.com".to_string()));

        progress.changed().await.unwrap();
        let last = progress.borrow().clone();
        assert!(last.done);
        assert_eq!(last.indexed, 2);
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let index = IndexManager::with_defaults();
        index
            .add_entry(doc("https://a.example.com/x", "x", "1234"))
            .await
            .unwrap();
        index
            .add_entry(doc("https://b.example.com/y", "y", "12345678"))
            .await
            .unwrap();

        let stats = index.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_size, 12);
        assert_eq!(stats.average_size, 6);
        assert_eq!(stats.domains, vec!["a.example.com", "b.example.com"]);
        assert!(stats.oldest_entry.is_some());
    }

    #[test]
    fn test_keyword_ranking_is_stable() {
        let keywords = extract_keywords("alpha beta", "beta gamma alpha delta", 3);
        // alpha and beta both appear twice; alpha was seen first
        assert_eq!(keywords[0], "alpha");
        assert_eq!(keywords[1], "beta");
        assert_eq!(keywords.len(), 3);
    }

    #[test]
    fn test_keyword_extraction_filters() {
        let keywords = extract_keywords("The and for", "it is an the rust rust", 10);
        assert_eq!(keywords, vec!["rust"]);
    }

    #[test]
    fn test_keyword_cap() {
        let content: String = (0..100).map(|i| format!("word{} ", i)).collect();
        let keywords = extract_keywords("", &content, 50);
        assert_eq!(keywords.len(), 50);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein("hello", "hello"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("typescript", "typescrit"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }
}
