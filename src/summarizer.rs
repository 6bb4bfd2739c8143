use crate::backend::{BackendError, CompletionBackend};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound on records per completion call. Spreadsheets with more rows
/// get summarized batch by batch and the partials merged in a final call.
pub const BATCH_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("backend failed on batch {index} of {total}: {source}")]
    Batch {
        index: usize,
        total: usize,
        #[source]
        source: BackendError,
    },

    #[error("backend failed while combining {count} partial summaries: {source}")]
    Combine {
        count: usize,
        #[source]
        source: BackendError,
    },

    #[error("backend request failed: {0}")]
    Backend(#[from] BackendError),

    #[error("backend returned no usable content")]
    EmptyResult,

    #[error("could not serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Splits `records` into contiguous chunks of at most `batch_size`,
/// preserving input order. Empty input yields no batches.
pub fn partition<T>(records: &[T], batch_size: usize) -> Vec<&[T]> {
    records.chunks(batch_size.max(1)).collect()
}

#[derive(Clone)]
pub struct BatchSummarizer {
    backend: Arc<dyn CompletionBackend>,
    system_prompt: String,
    max_tokens: u32,
    concurrency: usize,
}

impl BatchSummarizer {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        system_prompt: String,
        max_tokens: u32,
        concurrency: usize,
    ) -> Self {
        Self {
            backend,
            system_prompt,
            max_tokens,
            concurrency: concurrency.max(1),
        }
    }

    /// Full pipeline: partition, one summary per batch, one reduce call.
    /// The first failing call aborts the run; nothing is retried.
    pub async fn summarize(
        &self,
        instruction: &str,
        records: &[Value],
    ) -> Result<String, SummarizeError> {
        let batches = partition(records, BATCH_SIZE);
        if batches.is_empty() {
            return Ok(String::new());
        }
        let total = batches.len();
        info!(records = records.len(), batches = total, "summarizing record batches");

        let partials: Vec<String> = if self.concurrency == 1 {
            let mut partials = Vec::with_capacity(total);
            for (index, batch) in batches.iter().enumerate() {
                partials.push(self.summarize_batch(instruction, index, total, batch).await?);
            }
            partials
        } else {
            // `buffered` caps in-flight calls and yields results in batch
            // order, so the reduce prompt reads the same as the sequential
            // path; the first error drops the remaining calls. The futures
            // are collected up front so none captures the iterator closure.
            let calls: Vec<_> = batches
                .iter()
                .enumerate()
                .map(|(index, batch)| self.summarize_batch(instruction, index, total, batch))
                .collect();
            stream::iter(calls)
                .buffered(self.concurrency)
                .try_collect()
                .await?
        };

        self.combine(instruction, &partials).await
    }

    async fn summarize_batch(
        &self,
        instruction: &str,
        index: usize,
        total: usize,
        batch: &[Value],
    ) -> Result<String, SummarizeError> {
        let prompt = batch_prompt(instruction, index, total, batch)?;
        debug!(batch = index + 1, total, records = batch.len(), "summarizing batch");
        // An empty partial is tolerated here; only the final result is checked.
        self.backend
            .complete(&self.system_prompt, &prompt, self.max_tokens)
            .await
            .map_err(|source| SummarizeError::Batch {
                index: index + 1,
                total,
                source,
            })
    }

    async fn combine(
        &self,
        instruction: &str,
        partials: &[String],
    ) -> Result<String, SummarizeError> {
        let prompt = combine_prompt(instruction, partials);
        debug!(partials = partials.len(), "combining partial summaries");
        let combined = self
            .backend
            .complete(&self.system_prompt, &prompt, self.max_tokens)
            .await
            .map_err(|source| SummarizeError::Combine {
                count: partials.len(),
                source,
            })?;
        if combined.is_empty() {
            return Err(SummarizeError::EmptyResult);
        }
        Ok(combined)
    }
}

fn batch_prompt(
    instruction: &str,
    index: usize,
    total: usize,
    batch: &[Value],
) -> Result<String, serde_json::Error> {
    let serialized = serde_json::to_string(batch)?;
    Ok(format!(
        "{instruction}\n\nLote {} de {total}. Registros:\n{serialized}",
        index + 1
    ))
}

fn combine_prompt(instruction: &str, partials: &[String]) -> String {
    let sections: Vec<String> = partials
        .iter()
        .enumerate()
        .map(|(i, partial)| format!("Resumen {}:\n{}", i + 1, partial))
        .collect();
    format!(
        "{instruction}\n\nCombina los siguientes {} resúmenes parciales en un único resumen coherente del conjunto completo de registros:\n\n{}",
        partials.len(),
        sections.join("\n\n")
    )
}
