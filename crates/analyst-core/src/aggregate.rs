//! Pulls a finished job's result objects out of blob storage.

use analyst_kernel::ResultStore;
use analyst_protocol::ResultEnvelope;
use flate2::read::GzDecoder;
use futures_util::stream::{self, Stream, TryStreamExt};
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::blob::{BlobStore, ObjectSummary};
use crate::error::{AggregateError, BlobError};

pub fn job_prefix(job_id: &str) -> String {
    format!("{job_id}/")
}

/// Gunzip and decode one result object.
pub fn decode_envelope(key: &str, raw: &[u8]) -> Result<ResultEnvelope, AggregateError> {
    let mut json = Vec::with_capacity(raw.len() * 4);
    GzDecoder::new(raw)
        .read_to_end(&mut json)
        .map_err(|source| AggregateError::Gzip {
            key: key.to_string(),
            source,
        })?;
    serde_json::from_slice(&json).map_err(|source| AggregateError::Decode {
        key: key.to_string(),
        source,
    })
}

/// Listing pages under the job prefix, following truncation markers until
/// the listing is drained.
pub fn pages<'a>(
    blobs: &'a dyn BlobStore,
    job_id: &str,
) -> impl Stream<Item = Result<Vec<ObjectSummary>, AggregateError>> + Send + 'a {
    let prefix = job_prefix(job_id);
    // `None` once the last page has been read.
    let start: Option<Option<String>> = Some(None);
    stream::try_unfold(start, move |state| {
        let prefix = prefix.clone();
        async move {
            let Some(marker) = state else {
                return Ok::<_, AggregateError>(None);
            };
            let listing = blobs.list(&prefix, marker.as_deref()).await?;
            let next = if listing.truncated {
                let marker = listing
                    .next_marker
                    .clone()
                    .or_else(|| listing.objects.last().map(|o| o.key.clone()))
                    .ok_or_else(|| {
                        BlobError::Backend(format!("truncated listing of `{prefix}` without marker"))
                    })?;
                Some(Some(marker))
            } else {
                None
            };
            debug!(
                target: "analyst::aggregate",
                prefix = %prefix,
                count = listing.objects.len(),
                truncated = listing.truncated,
                "listed result page"
            );
            Ok(Some((listing.objects, next)))
        }
    })
}

/// Every envelope of `job_id`, fetched lazily in listing order. One pass;
/// start a new stream to retry.
pub fn envelopes<'a>(
    blobs: &'a dyn BlobStore,
    job_id: &str,
) -> impl Stream<Item = Result<ResultEnvelope, AggregateError>> + Send + 'a {
    pages(blobs, job_id)
        .map_ok(|objects| stream::iter(objects.into_iter().map(Ok::<_, AggregateError>)))
        .try_flatten()
        .and_then(move |obj| async move {
            let raw = blobs.get(&obj.key).await?;
            decode_envelope(&obj.key, &raw)
        })
}

/// Fetch, decode and store every envelope of `job_id`. Objects of one page
/// are fetched `concurrency` at a time; decoding and the store write run on
/// the blocking pool. Returns the number of objects ingested.
pub async fn aggregate_into(
    blobs: &dyn BlobStore,
    store: Arc<ResultStore>,
    job_id: &str,
    concurrency: usize,
) -> Result<u64, AggregateError> {
    let started = Instant::now();
    let mut ingested: u64 = 0;
    let mut listing = std::pin::pin!(pages(blobs, job_id));
    while let Some(objects) = listing.try_next().await? {
        let count = objects.len() as u64;
        stream::iter(objects.into_iter().map(Ok::<_, AggregateError>))
            .try_for_each_concurrent(concurrency.max(1), |obj| {
                let store = store.clone();
                async move {
                    let raw = blobs.get(&obj.key).await?;
                    tokio::task::spawn_blocking(move || {
                        let env = decode_envelope(&obj.key, &raw)?;
                        store.store(&env).map_err(AggregateError::Store)
                    })
                    .await
                    .map_err(|e| AggregateError::Join(e.to_string()))?
                }
            })
            .await?;
        ingested += count;
    }
    info!(
        target: "analyst::aggregate",
        job_id,
        count = ingested,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "aggregated results"
    );
    Ok(ingested)
}
