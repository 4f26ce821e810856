use std::time::Instant;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

use crate::model::{SearchMatch, SearchResponse};
use crate::page_index::PageIndex;

pub mod corpus;

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub term: String,
    pub case_sensitive: bool,
    pub context_chars: usize,
    pub use_regex: bool,
}

impl SearchQuery {
    pub fn literal(term: &str) -> Self {
        Self {
            term: term.to_string(),
            case_sensitive: false,
            context_chars: 100,
            use_regex: false,
        }
    }
}

/// `occurrences * occurrence + tightness / max(1, context_len / length_unit)`
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub occurrence: f64,
    pub tightness: f64,
    pub length_unit: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            occurrence: 10.0,
            tightness: 100.0,
            length_unit: 100.0,
        }
    }
}

pub struct TermMatcher {
    finder: Regex,
    counter: Regex,
}

impl TermMatcher {
    pub fn compile(query: &SearchQuery) -> Result<Option<Self>> {
        if query.term.is_empty() {
            return Ok(None);
        }

        let pattern = if query.use_regex {
            query.term.clone()
        } else {
            regex::escape(&query.term)
        };

        let finder = RegexBuilder::new(&pattern)
            .case_insensitive(!query.case_sensitive)
            .build()
            .with_context(|| format!("invalid search pattern: {}", query.term))?;
        let counter = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid search pattern: {}", query.term))?;

        Ok(Some(Self { finder, counter }))
    }
}

/// Assembled text plus its page index, built once and searched many times.
pub struct LoadedDocument {
    pub document_id: String,
    pub text: String,
    pub index: PageIndex,
}

impl LoadedDocument {
    pub fn new(document_id: &str, text: String) -> Result<Self> {
        let index = PageIndex::build(&text)?;
        Ok(Self {
            document_id: document_id.to_string(),
            text,
            index,
        })
    }

    pub fn search(&self, query: &SearchQuery, weights: ScoreWeights) -> Result<SearchResponse> {
        let started = Instant::now();
        let results = match TermMatcher::compile(query)? {
            Some(matcher) => search_indexed(&self.text, &self.index, &matcher, query, weights),
            None => Vec::new(),
        };

        Ok(SearchResponse {
            document_id: self.document_id.clone(),
            term: query.term.clone(),
            total_matches: results.len(),
            results,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

pub fn search_indexed(
    text: &str,
    index: &PageIndex,
    matcher: &TermMatcher,
    query: &SearchQuery,
    weights: ScoreWeights,
) -> Vec<SearchMatch> {
    if text.is_empty() || index.is_empty() {
        return Vec::new();
    }

    let mut results = Vec::new();
    for found in matcher.finder.find_iter(text) {
        if found.is_empty() {
            continue;
        }

        let Some(page) = index.page_for_offset(found.start()) else {
            continue;
        };

        let (begin, end) = context_bounds(text, found.start(), found.end(), query.context_chars);
        let context = &text[begin..end];

        results.push(SearchMatch {
            page,
            position: found.start(),
            context: context.to_string(),
            snippet: found.as_str().to_string(),
            score: relevance_score(context, &matcher.counter, weights),
        });
    }

    sort_matches(&mut results);
    results
}

pub fn sort_matches(matches: &mut [SearchMatch]) {
    matches.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.position.cmp(&right.position))
    });
}

fn context_bounds(text: &str, start: usize, end: usize, radius: usize) -> (usize, usize) {
    let begin = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(offset, _)| offset)
        .unwrap_or(start);
    let finish = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(offset, _)| end + offset)
        .unwrap_or(text.len());
    (begin, finish)
}

fn relevance_score(context: &str, counter: &Regex, weights: ScoreWeights) -> f64 {
    let occurrences = counter
        .find_iter(context)
        .filter(|found| !found.is_empty())
        .count() as f64;
    let context_len = context.chars().count() as f64;
    occurrences * weights.occurrence + weights.tightness / (context_len / weights.length_unit).max(1.0)
}
