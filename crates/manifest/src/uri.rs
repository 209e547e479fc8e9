use url::Url;

use crate::error::{ManifestError, ManifestResult};

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
        || s.starts_with("data:")
}

/// Joins `relative` onto `base`, carrying the query of `base` over when the result has none.
///
/// merge_base_uri(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
///   https://example.com/video42.mp4?auth=secret
pub fn merge_base_uri(base: &Url, relative: &str) -> ManifestResult<Url> {
    if is_absolute_url(relative) {
        return Ok(Url::parse(relative)?);
    }

    let mut merged = base.join(relative)?;
    if merged.query().is_none() {
        merged.set_query(base.query());
    }
    Ok(merged)
}

/// Resolves every relative URI against every base URI.
///
/// The result is ordered base-major, so consumers can fail over to the next base. An empty
/// `relatives` keeps the bases unchanged.
pub fn resolve_uris(bases: &[Url], relatives: &[String]) -> Vec<Url> {
    if relatives.is_empty() {
        return bases.to_vec();
    }

    if bases.is_empty() {
        return relatives
            .iter()
            .filter_map(|relative| match Url::parse(relative) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(uri = %relative, error = %e, "Dropping relative URI without a base");
                    None
                }
            })
            .collect();
    }

    let mut resolved = Vec::with_capacity(bases.len() * relatives.len());
    for base in bases {
        for relative in relatives {
            match merge_base_uri(base, relative) {
                Ok(url) => resolved.push(url),
                Err(e) => {
                    tracing::warn!(base = %base, uri = %relative, error = %e, "Failed to resolve URI")
                }
            }
        }
    }
    resolved
}

/// Parses a `first-last` byte range (RFC 7233 byte-range-spec). `last` is inclusive and may
/// be omitted.
pub fn parse_byte_range(s: &str) -> ManifestResult<(u64, Option<u64>)> {
    let invalid = || ManifestError::invalid_attribute("range", s);

    let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
    let first_byte_pos = start.trim().parse::<u64>().map_err(|_| invalid())?;
    let last_byte_pos = match end.trim() {
        "" => None,
        end => Some(end.parse::<u64>().map_err(|_| invalid())?),
    };

    if last_byte_pos.is_some_and(|last| last < first_byte_pos) {
        return Err(invalid());
    }
    Ok((first_byte_pos, last_byte_pos))
}
