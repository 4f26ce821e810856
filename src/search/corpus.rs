use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use super::{ScoreWeights, SearchQuery, TermMatcher, search_indexed};
use crate::model::{CorpusResponse, CorpusResult, SearchMatch, SkippedDocument};
use crate::page_index::PageIndex;
use crate::store::{TextArtifact, TextStore};

#[derive(Debug, Clone)]
pub struct CorpusOptions {
    pub max_documents: usize,
    pub max_matches_per_document: usize,
    pub workers: usize,
    pub weights: ScoreWeights,
}

impl Default for CorpusOptions {
    fn default() -> Self {
        Self {
            max_documents: 50,
            max_matches_per_document: 20,
            workers: crate::util::default_worker_count(),
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentHits {
    pub document_id: String,
    pub text_path: String,
    pub matches: Vec<SearchMatch>,
}

pub fn search_corpus(
    store: &TextStore,
    query: &SearchQuery,
    options: &CorpusOptions,
) -> Result<CorpusResponse> {
    let started = Instant::now();

    let mut artifacts = store.list_artifacts()?;
    artifacts.truncate(options.max_documents);
    let documents_considered = artifacts.len();

    let Some(matcher) = TermMatcher::compile(query)? else {
        return Ok(CorpusResponse {
            term: query.term.clone(),
            documents_considered,
            documents_matched: 0,
            results: Vec::new(),
            skipped: Vec::new(),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        });
    };

    info!(
        documents = documents_considered,
        workers = options.workers,
        root = %store.root().display(),
        term = %query.term,
        "searching corpus"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .thread_name(|index| format!("corpus-search-{index}"))
        .build()
        .context("failed to build corpus search pool")?;

    let outcomes = pool.install(|| {
        artifacts
            .par_iter()
            .map(|artifact| {
                let outcome = search_artifact(store, artifact, &matcher, query, options.weights);
                (artifact, outcome)
            })
            .collect::<Vec<_>>()
    });

    let mut hits = Vec::new();
    let mut skipped = Vec::new();
    for (artifact, outcome) in outcomes {
        match outcome {
            Ok(found) => hits.push(found),
            Err(error) => {
                warn!(
                    path = %artifact.path.display(),
                    error = %format!("{error:#}"),
                    "skipping document in corpus search"
                );
                skipped.push(SkippedDocument {
                    text_path: artifact.path.display().to_string(),
                    reason: format!("{error:#}"),
                });
            }
        }
    }

    let results = rank_documents(hits, options.max_matches_per_document);

    Ok(CorpusResponse {
        term: query.term.clone(),
        documents_considered,
        documents_matched: results.len(),
        results,
        skipped,
        execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}

fn search_artifact(
    store: &TextStore,
    artifact: &TextArtifact,
    matcher: &TermMatcher,
    query: &SearchQuery,
    weights: ScoreWeights,
) -> Result<DocumentHits> {
    let text = store.read(&artifact.path)?;
    let index = PageIndex::build(&text)?;
    let matches = search_indexed(&text, &index, matcher, query, weights);

    Ok(DocumentHits {
        document_id: artifact.document_id.clone(),
        text_path: artifact.path.display().to_string(),
        matches,
    })
}

/// Drops documents without matches and orders the rest by summed match score,
/// highest first. Equal totals fall back to document id for a stable order.
pub fn rank_documents(hits: Vec<DocumentHits>, max_matches_per_document: usize) -> Vec<CorpusResult> {
    let mut ranked = hits
        .into_iter()
        .filter(|hit| !hit.matches.is_empty())
        .map(|hit| {
            let total_score = hit.matches.iter().map(|found| found.score).sum::<f64>();
            let match_count = hit.matches.len();
            let mut matches = hit.matches;
            matches.truncate(max_matches_per_document);
            CorpusResult {
                document_id: hit.document_id,
                filename: None,
                text_path: hit.text_path,
                total_score,
                match_count,
                matches,
            }
        })
        .collect::<Vec<_>>();

    ranked.sort_by(|left, right| {
        right
            .total_score
            .total_cmp(&left.total_score)
            .then(left.document_id.cmp(&right.document_id))
    });
    ranked
}

/// Fills in the original filename of each ranked document from the registry
/// listing. Documents the registry does not know keep `None`.
pub fn attach_filenames(results: &mut [CorpusResult], filenames: &HashMap<String, String>) {
    for result in results {
        result.filename = filenames.get(&result.document_id).cloned();
    }
}
