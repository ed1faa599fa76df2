//! Text-content similarity behind a single seam, so the engine does not care
//! whether the TF-IDF path or the plain word-overlap fallback is active.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::config::ContentScorer;
use crate::models::ScoreBreakdown;

pub trait TextSimilarity: Send + Sync {
    /// Scores two non-empty text bodies. Empty-body handling (neutral 0.5)
    /// belongs to the caller.
    fn score(&self, a: &str, b: &str) -> ScoreBreakdown;
}

pub fn build_scorer(kind: ContentScorer) -> Box<dyn TextSimilarity> {
    match kind {
        ContentScorer::Tfidf => Box::new(TfIdfCosine),
        ContentScorer::WordOverlap => Box::new(WordOverlap),
    }
}

static TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-zA-Z0-9_-]{2,}\b").expect("static regex"));
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("static regex"));

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "has", "have",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will",
    "with",
];

fn terms(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TERM.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Unigrams plus bigrams over the filtered term stream.
fn ngrams(text: &str) -> Vec<String> {
    let unigrams = terms(text);
    let mut grams = Vec::with_capacity(unigrams.len() * 2);
    for pair in unigrams.windows(2) {
        grams.push(format!("{} {}", pair[0], pair[1]));
    }
    grams.extend(unigrams);
    grams
}

/// TF-IDF cosine over 1–2-gram term vectors of the two bodies, with smoothed
/// idf (ln((1+n)/(1+df)) + 1) and L2 normalization.
pub struct TfIdfCosine;

impl TextSimilarity for TfIdfCosine {
    fn score(&self, a: &str, b: &str) -> ScoreBreakdown {
        let grams_a = ngrams(a);
        let grams_b = ngrams(b);
        if grams_a.is_empty() || grams_b.is_empty() {
            return ScoreBreakdown::new(0.3, "no_terms_found");
        }

        let tf_a = term_counts(&grams_a);
        let tf_b = term_counts(&grams_b);

        let vocabulary: HashSet<&String> = tf_a.keys().copied().chain(tf_b.keys().copied()).collect();
        let n_docs = 2.0_f64;

        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        for term in vocabulary {
            let count_a = *tf_a.get(term).unwrap_or(&0) as f64;
            let count_b = *tf_b.get(term).unwrap_or(&0) as f64;
            let df = (count_a > 0.0) as u32 + (count_b > 0.0) as u32;
            let idf = ((1.0 + n_docs) / (1.0 + df as f64)).ln() + 1.0;
            let wa = count_a * idf;
            let wb = count_b * idf;
            dot += wa * wb;
            norm_a += wa * wa;
            norm_b += wb * wb;
        }

        if norm_a == 0.0 || norm_b == 0.0 {
            return ScoreBreakdown::new(0.3, "no_terms_found");
        }
        let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
        ScoreBreakdown::with_detail(
            cosine,
            "tfidf_cosine",
            format!("terms={}/{}", tf_a.len(), tf_b.len()),
        )
    }
}

fn term_counts(grams: &[String]) -> HashMap<&String, u32> {
    let mut counts = HashMap::new();
    for gram in grams {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Word-set Jaccard over simple word-boundary tokens. The fallback path when
/// the vector scorer is disabled.
pub struct WordOverlap;

impl TextSimilarity for WordOverlap {
    fn score(&self, a: &str, b: &str) -> ScoreBreakdown {
        let words_a: HashSet<String> = word_set(a);
        let words_b: HashSet<String> = word_set(b);
        if words_a.is_empty() || words_b.is_empty() {
            return ScoreBreakdown::new(0.3, "no_words_found");
        }
        let intersection = words_a.intersection(&words_b).count();
        let union = words_a.union(&words_b).count();
        ScoreBreakdown::with_detail(
            intersection as f64 / union as f64,
            "word_overlap",
            format!("common={intersection} total={union}"),
        )
    }
}

fn word_set(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tfidf_identical_texts_score_one() {
        let s = TfIdfCosine.score("disk space low on node-3", "disk space low on node-3");
        assert!((s.score - 1.0).abs() < 1e-9);
        assert_eq!(s.method, "tfidf_cosine");
    }

    #[test]
    fn tfidf_disjoint_texts_score_zero() {
        let s = TfIdfCosine.score("disk space warning", "network connectivity issue");
        assert!(s.score < 1e-9);
    }

    #[test]
    fn tfidf_partial_overlap_is_between() {
        let s = TfIdfCosine.score(
            "high cpu usage on prod cluster",
            "cpu usage spike detected prod",
        );
        assert!(s.score > 0.0 && s.score < 1.0);
    }

    #[test]
    fn tfidf_stop_words_only_falls_through() {
        let s = TfIdfCosine.score("the of and", "is at on");
        assert_eq!(s.method, "no_terms_found");
        assert_eq!(s.score, 0.3);
    }

    #[test]
    fn word_overlap_jaccard() {
        let s = WordOverlap.score("alpha beta gamma", "beta gamma delta");
        assert!((s.score - 0.5).abs() < 1e-9);
        assert_eq!(s.method, "word_overlap");
    }

    #[test]
    fn both_paths_share_the_interface() {
        for scorer in [build_scorer(ContentScorer::Tfidf), build_scorer(ContentScorer::WordOverlap)]
        {
            let s = scorer.score("pod restart loop", "pod restart loop");
            assert!(s.score > 0.99);
        }
    }
}
