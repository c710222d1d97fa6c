//! Retrieval engine: query expansion, dedup, reranking, and diversity
//! filtering on top of a [`VectorStore`].
//!
//! The pipeline for a single query:
//!
//! 1. Expand the query into variants (lowercasing plus a fixed synonym
//!    table) and search the store with each one.
//! 2. Merge results, keeping the higher-scored occurrence of each
//!    document in its first-seen position.
//! 3. Rerank with a title boost: +0.1 per query term found in the
//!    title.
//! 4. Apply a diversity filter so near-duplicate titles and
//!    over-represented packages don't crowd out the rest.
//! 5. Truncate to `max_results` and assign 1-based ranks.
//!
//! Every step is deterministic: sorts are stable and use total
//! orderings, so equal scores keep their incoming order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::models::{RetrievalOptions, ScoredDocument};
use crate::store::VectorStore;

/// Score bonus per query term found in the document title.
const TITLE_BOOST_PER_TERM: f64 = 0.1;

/// Results scoring above this always survive the diversity filter.
const ALWAYS_KEEP_SCORE: f64 = 0.8;

/// Titles overlapping a kept title by at least this much (Jaccard over
/// words) are filtered as near-duplicates.
const TITLE_OVERLAP_LIMIT: f64 = 0.6;

/// Kept results per package before further ones are filtered.
const PACKAGE_KEEP_LIMIT: usize = 2;

/// Fixed synonym table for query expansion.
const QUERY_SYNONYMS: &[(&str, &[&str])] = &[
    ("validate", &["check", "verify"]),
    ("customer", &["user", "client"]),
];

/// Deterministic retrieval pipeline over a [`VectorStore`].
pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    expand_queries: bool,
    rerank: bool,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            expand_queries: true,
            rerank: true,
        }
    }

    pub fn with_query_expansion(mut self, enabled: bool) -> Self {
        self.expand_queries = enabled;
        self
    }

    pub fn with_reranking(mut self, enabled: bool) -> Self {
        self.rerank = enabled;
        self
    }

    /// Run the full retrieval pipeline for `query`.
    ///
    /// An error from the original query propagates; errors from
    /// expanded variants are logged and skipped, since the original
    /// results still stand on their own.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<ScoredDocument>> {
        let variants = if self.expand_queries {
            expand_query(query)
        } else {
            vec![query.to_string()]
        };

        let mut merged: Vec<ScoredDocument> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (vi, variant) in variants.iter().enumerate() {
            let results = match self.store.search(variant, options).await {
                Ok(results) => results,
                Err(err) if vi == 0 => return Err(err),
                Err(err) => {
                    warn!(variant = %variant, error = %err, "expanded query failed, skipping");
                    continue;
                }
            };
            for result in results {
                match seen.get(&result.document.id) {
                    Some(&at) => {
                        // replace the whole occurrence, keeping its
                        // first-seen position
                        if result.score > merged[at].score {
                            merged[at] = result;
                        }
                    }
                    None => {
                        seen.insert(result.document.id.clone(), merged.len());
                        merged.push(result);
                    }
                }
            }
        }

        if self.rerank {
            rerank_by_title(query, &mut merged);
        }
        let mut kept = diversity_filter(merged, options.max_results);
        kept.truncate(options.max_results);
        for (i, result) in kept.iter_mut().enumerate() {
            result.rank = i + 1;
        }
        debug!(
            query,
            variants = variants.len(),
            results = kept.len(),
            "retrieval complete"
        );
        Ok(kept)
    }
}

/// Expand a query into search variants.
///
/// Always starts with the original query; adds the lowercased form
/// when it differs, then one variant per synonym substitution from the
/// fixed table. Duplicates are dropped.
pub fn expand_query(query: &str) -> Vec<String> {
    let mut variants = vec![query.to_string()];
    let lower = query.to_lowercase();
    if lower != query {
        variants.push(lower.clone());
    }
    for (term, synonyms) in QUERY_SYNONYMS {
        if !lower.contains(term) {
            continue;
        }
        for synonym in *synonyms {
            let variant = lower.replace(term, synonym);
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }
    variants
}

/// Boost scores of documents whose title contains query terms, then
/// re-sort. The boost multiplies the score by `1 + 0.1 × matching
/// terms`, so strong matches stay ahead of weak ones with lucky
/// titles.
fn rerank_by_title(query: &str, results: &mut [ScoredDocument]) {
    let query_lower = query.to_lowercase();
    let terms: Vec<&str> = query_lower.split_whitespace().collect();
    if terms.is_empty() {
        return;
    }
    for result in results.iter_mut() {
        if let Some(title) = &result.document.title {
            let title_lower = title.to_lowercase();
            let matching = terms.iter().filter(|t| title_lower.contains(*t)).count();
            if matching > 0 {
                result.score *= 1.0 + TITLE_BOOST_PER_TERM * matching as f64;
            }
        }
    }
    // stable sort: equal scores keep first-seen order
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Word-level Jaccard overlap between two titles, in `[0.0, 1.0]`.
pub fn jaccard_word_overlap(a: &str, b: &str) -> f64 {
    let words_a: std::collections::HashSet<String> =
        a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let words_b: std::collections::HashSet<String> =
        b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if words_a.is_empty() && words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    intersection / union
}

/// Drop near-duplicate and over-represented results.
///
/// Walks the ranked list in order and filters a result when its
/// package (from `package` metadata) already has two kept results, or
/// its title overlaps a kept title by 60% or more. Exceptions: scores
/// above 0.8 are always kept, and the filter re-admits results rather
/// than returning fewer than half of `max_results`. Lists of three or
/// fewer pass through untouched.
fn diversity_filter(results: Vec<ScoredDocument>, max_results: usize) -> Vec<ScoredDocument> {
    if results.len() <= 3 {
        return results;
    }

    let mut kept: Vec<ScoredDocument> = Vec::new();
    let mut package_counts: HashMap<String, usize> = HashMap::new();
    let mut kept_titles: Vec<String> = Vec::new();

    for result in results {
        let package = result.document.metadata.get("package").cloned();
        let title = result.document.title.clone();

        let mut keep = result.score > ALWAYS_KEEP_SCORE;
        if !keep {
            let package_full = package
                .as_ref()
                .map(|p| package_counts.get(p).copied().unwrap_or(0) >= PACKAGE_KEEP_LIMIT)
                .unwrap_or(false);
            let near_duplicate = title.as_ref().map_or(false, |t| {
                kept_titles
                    .iter()
                    .any(|kt| jaccard_word_overlap(kt, t) >= TITLE_OVERLAP_LIMIT)
            });
            keep = !package_full && !near_duplicate;
        }
        // never starve the result list below half of what was asked for
        if !keep && kept.len() < max_results / 2 {
            keep = true;
        }

        if keep {
            if let Some(p) = package {
                *package_counts.entry(p).or_insert(0) += 1;
            }
            if let Some(t) = title {
                kept_titles.push(t);
            }
            kept.push(result);
        }
    }
    kept
}
