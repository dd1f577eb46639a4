//! Keyword relevance filter
//!
//! Bounds how many services the model sees per query. A query is reduced to
//! content words, each service to a keyword corpus (name, description,
//! commands, enrichment text, known parameter values), and services are
//! ranked by how many query words appear in their corpus.

use crate::interface::{EnricherRegistry, ServiceInterface};
use crate::registry::RegistrySnapshot;
use std::collections::{BTreeSet, HashSet};

/// Default number of services kept per query
pub const DEFAULT_MAX_RESULTS: usize = 3;

/// Closed list of words that carry no signal on their own
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "do", "does", "did", "i", "me", "my",
    "we", "our", "you", "your", "it", "its", "what", "what's", "which", "who", "how", "when",
    "where", "why", "can", "will", "would", "could", "should", "please", "to", "of", "in", "for",
    "at", "by", "with", "from", "and", "or", "but", "not", "if", "then", "than", "that", "this",
    "all", "some", "any", "no", "so",
];

/// Lowercase the query, keep alphanumeric runs, drop stopwords
pub fn tokenize_query(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    lowered
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|w| !w.is_empty())
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Break a compound identifier at case boundaries: lower→Upper
/// ("ZmwLights" → "Zmw Lights") and Upper→Upper-lower ("TVRoom" → "TV Room").
pub fn split_case_boundaries(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            let lower_to_upper = prev.is_lowercase() && c.is_uppercase();
            let acronym_end = prev.is_uppercase()
                && c.is_uppercase()
                && next.map(|n| n.is_lowercase()).unwrap_or(false);
            if lower_to_upper || acronym_end {
                out.push(' ');
            }
        }
        out.push(c);
    }
    out
}

/// Light stemming: strip non-alphanumerics, drop one trailing "s" from
/// words longer than three characters
pub fn normalize_word(word: &str) -> String {
    let mut w: String = word
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if w.len() > 3 && w.ends_with('s') {
        w.pop();
    }
    w
}

/// Normalized word set of a free-text corpus
pub fn keyword_set(corpus: &str) -> HashSet<String> {
    corpus
        .split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect()
}

/// Number of query words present in the keyword set. Repeated query words
/// count each time.
pub fn score_keywords(query_words: &[String], keywords: &HashSet<String>) -> usize {
    query_words
        .iter()
        .filter(|w| keywords.contains(&normalize_word(w)))
        .count()
}

/// Searchable text for one service
pub fn service_keywords(iface: &ServiceInterface, enrichers: &EnricherRegistry) -> String {
    let mut parts = vec![split_case_boundaries(&iface.name).to_lowercase()];

    if !iface.description.is_empty() {
        parts.push(iface.description.to_lowercase());
    }
    for (cmd_name, cmd) in &iface.commands {
        parts.push(
            cmd_name
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { ' ' })
                .collect::<String>()
                .to_lowercase(),
        );
        if !cmd.description.is_empty() {
            parts.push(cmd.description.to_lowercase());
        }
    }
    if let Some(extra) = enrichers.context(iface) {
        parts.push(extra.to_lowercase());
    }
    for values in enrichers.value_domains(iface).values() {
        for value in values {
            parts.push(split_case_boundaries(value).to_lowercase());
        }
    }

    parts.join(" ")
}

#[derive(Debug, Clone)]
pub struct ScoredService {
    pub score: usize,
    pub interface: ServiceInterface,
}

/// Ranks registry snapshots against a free-text query
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    max_results: usize,
    skip_services: BTreeSet<String>,
    enrichers: EnricherRegistry,
}

impl RelevanceFilter {
    pub fn new(enrichers: EnricherRegistry) -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            skip_services: BTreeSet::new(),
            enrichers,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Infrastructure services that are never shown to the model
    pub fn with_skip_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn set_enrichers(&mut self, enrichers: EnricherRegistry) {
        self.enrichers = enrichers;
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn is_skipped(&self, service: &str) -> bool {
        self.skip_services.contains(service)
    }

    /// Score every non-skipped service. Services scoring zero are dropped,
    /// the rest sorted by descending score (stable on ties) and truncated to
    /// `max_results`.
    ///
    /// A query with no content words cannot be ranked: every non-skipped
    /// service is returned with score 0 in registry order.
    pub fn rank(&self, query: &str, snapshot: &RegistrySnapshot) -> Vec<ScoredService> {
        let candidates = snapshot.values().filter(|iface| !self.is_skipped(&iface.name));

        let query_words = tokenize_query(query);
        if query_words.is_empty() {
            return candidates
                .map(|iface| ScoredService {
                    score: 0,
                    interface: iface.clone(),
                })
                .collect();
        }

        let mut scored: Vec<ScoredService> = candidates
            .filter_map(|iface| {
                let keywords = keyword_set(&service_keywords(iface, &self.enrichers));
                let score = score_keywords(&query_words, &keywords);
                (score > 0).then(|| ScoredService {
                    score,
                    interface: iface.clone(),
                })
            })
            .collect();

        // sort_by is stable, ties keep registry order
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored.truncate(self.max_results);
        scored
    }

    /// Interfaces relevant to `query`. Empty means nothing relevant.
    pub fn filter(&self, query: &str, snapshot: &RegistrySnapshot) -> Vec<ServiceInterface> {
        self.rank(query, snapshot)
            .into_iter()
            .map(|s| s.interface)
            .collect()
    }
}
