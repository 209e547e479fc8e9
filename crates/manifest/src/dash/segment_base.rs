use std::{future::Future, sync::Arc};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{
    context::Context,
    mpd::{SegmentBase, UrlType},
};
use crate::{
    error::{ManifestError, ManifestResult},
    index::SegmentIndex,
    segment::{fixed_uris, InitSegmentReference, SegmentReference},
    uri::{parse_byte_range, resolve_uris},
};

/// A segment index stored in the media itself (`sidx`, `Cues`), waiting to be fetched and
/// parsed by a container-aware collaborator.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub uris: Vec<Url>,
    pub start_byte: u64,
    /// Inclusive.
    pub end_byte: Option<u64>,
    pub init_segment: Option<Arc<InitSegmentReference>>,
    pub scaled_presentation_time_offset: f64,
    pub timestamp_offset: f64,
    pub append_window_start: f64,
    pub append_window_end: f64,
    pub mime_type: Option<String>,
}

/// Fetches and parses the index described by an [IndexRequest].
pub trait IndexFetcher {
    fn fetch_index(
        &self,
        request: &IndexRequest,
    ) -> impl Future<Output = ManifestResult<Vec<SegmentReference>>> + Send;
}

/// Builds an initialization reference from an `Initialization` element.
///
/// Without `@sourceURL` the initialization data lives in the representation's own media.
pub fn create_init_segment(
    context: &Context,
    initialization: Option<&UrlType>,
) -> ManifestResult<Option<Arc<InitSegmentReference>>> {
    let Some(initialization) = initialization else {
        return Ok(None);
    };

    let relatives: Vec<String> = initialization.source_url.iter().cloned().collect();
    let uris = resolve_uris(&context.base_uris, &relatives);
    let (start_byte, end_byte) = match initialization.range.as_deref() {
        Some(range) => parse_byte_range(range)?,
        None => (0, None),
    };

    Ok(Some(Arc::new(
        InitSegmentReference::new(fixed_uris(uris), start_byte, end_byte)
            .with_quality(context.quality()),
    )))
}

pub(crate) fn index_request(
    context: &Context,
    uris: Vec<Url>,
    range: Option<(u64, Option<u64>)>,
    init_segment: Option<Arc<InitSegmentReference>>,
) -> IndexRequest {
    let (start_byte, end_byte) = range.unwrap_or((0, None));
    let scaled_presentation_time_offset = context.scaled_presentation_time_offset();
    IndexRequest {
        uris,
        start_byte,
        end_byte,
        init_segment,
        scaled_presentation_time_offset,
        timestamp_offset: context.period.start - scaled_presentation_time_offset,
        append_window_start: context.period.start,
        append_window_end: context.period.end(),
        mime_type: context.mime_type.clone(),
    }
}

/// Describes the index of a `SegmentBase` representation.
pub fn index_request_from_base(context: &Context, base: &SegmentBase) -> ManifestResult<IndexRequest> {
    let representation_index = base.representation_index.as_ref();
    let range = representation_index
        .and_then(|index| index.range.as_deref())
        .or(base.index_range.as_deref());
    let source_url = representation_index.and_then(|index| index.source_url.clone());

    if range.is_none() && source_url.is_none() {
        tracing::error!(
            representation = ?context.representation_id,
            "SegmentBase does not contain sufficient segment information: the SegmentBase does not contain @indexRange or a RepresentationIndex element"
        );
        return Err(ManifestError::NoSegmentInfo(context.representation_id.clone()));
    }

    let uris = resolve_uris(&context.base_uris, &source_url.into_iter().collect::<Vec<_>>());
    let range = range.map(parse_byte_range).transpose()?;
    let init_segment = create_init_segment(context, base.initialization.as_ref())?;

    Ok(index_request(context, uris, range, init_segment))
}

/// Fetches an index and clips it to the request's append window.
///
/// Cancelling `cancel` resolves to [ManifestError::IndexFetchAborted] without waiting for the
/// fetch to finish.
pub async fn load_indexed_references<F: IndexFetcher>(
    fetcher: &F,
    request: &IndexRequest,
    cancel: &CancellationToken,
) -> ManifestResult<SegmentIndex> {
    let references = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(uris = ?request.uris, "Segment index fetch aborted");
            return Err(ManifestError::IndexFetchAborted);
        }
        result = fetcher.fetch_index(request) => result?,
    };

    let mut index = SegmentIndex::new(references);
    index.fit(request.append_window_start, request.append_window_end, true);
    Ok(index)
}

/// Fetches an index and merges it into `index`.
///
/// `index` is only locked once the fetch succeeded, so an aborted or failed fetch leaves it
/// exactly as it was.
pub async fn refresh_index<F: IndexFetcher>(
    fetcher: &F,
    request: &IndexRequest,
    cancel: &CancellationToken,
    index: &Mutex<SegmentIndex>,
) -> ManifestResult<()> {
    let fresh = load_indexed_references(fetcher, request, cancel).await?;
    index.lock().await.merge(fresh.into_references());
    Ok(())
}
