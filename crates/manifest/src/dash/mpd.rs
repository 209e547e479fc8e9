//! Typed view of the MPD elements the segment generators consume.
//!
//! Only the attributes that affect segment addressing, timing or content protection are
//! modelled. Content-protection descriptors are kept as raw element trees since their
//! payload depends on the key system.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use iso8601_duration::Duration as IsoDuration;

use super::xml::{parse_document, XmlNode};
use crate::{
    error::{ManifestError, ManifestResult},
    timeline::clock::parse_xs_datetime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MpdType {
    #[default]
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Default)]
pub struct Mpd {
    pub mpd_type: MpdType,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub media_presentation_duration: Option<f64>,
    pub minimum_update_period: Option<f64>,
    pub time_shift_buffer_depth: Option<f64>,
    pub suggested_presentation_delay: Option<f64>,
    pub max_segment_duration: Option<f64>,
    pub min_buffer_time: Option<f64>,
    pub base_urls: Vec<String>,
    /// `(schemeIdUri, value)` of every `UTCTiming` element.
    pub utc_timings: Vec<(String, Option<String>)>,
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, Default)]
pub struct Period {
    pub id: Option<String>,
    pub start: Option<f64>,
    pub duration: Option<f64>,
    pub base_urls: Vec<String>,
    pub addressing: SegmentAddressing,
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptationSet {
    pub id: Option<String>,
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub lang: Option<String>,
    pub base_urls: Vec<String>,
    pub addressing: SegmentAddressing,
    pub content_protections: Vec<XmlNode>,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default)]
pub struct Representation {
    pub id: Option<String>,
    pub bandwidth: Option<u64>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub base_urls: Vec<String>,
    pub addressing: SegmentAddressing,
    pub content_protections: Vec<XmlNode>,
}

/// Segment information declared directly on one level of the hierarchy.
#[derive(Debug, Clone, Default)]
pub struct SegmentAddressing {
    pub segment_base: Option<SegmentBase>,
    pub segment_list: Option<SegmentList>,
    pub segment_template: Option<SegmentTemplate>,
}

/// `Initialization` or `RepresentationIndex` URL with an optional byte range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlType {
    pub source_url: Option<String>,
    pub range: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentBase {
    pub timescale: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub index_range: Option<String>,
    pub initialization: Option<UrlType>,
    pub representation_index: Option<UrlType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineSegment {
    /// `S@t`
    pub time: Option<u64>,
    /// `S@d`
    pub duration: u64,
    /// `S@r`. Negative repeats run to the next `S@t` or the period end.
    pub repeat_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentUrl {
    pub media: Option<String>,
    pub media_range: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentList {
    pub timescale: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub duration: Option<u64>,
    pub start_number: Option<u64>,
    pub initialization: Option<UrlType>,
    pub timeline: Option<Vec<TimelineSegment>>,
    pub segment_urls: Vec<SegmentUrl>,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentTemplate {
    pub timescale: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub duration: Option<u64>,
    pub start_number: Option<u64>,
    pub media: Option<String>,
    pub index: Option<String>,
    /// `@initialization`, or the `sourceURL` of an `Initialization` child.
    pub initialization: Option<String>,
    pub timeline: Option<Vec<TimelineSegment>>,
}

fn parse_attr<T: FromStr>(node: &XmlNode, name: &str) -> ManifestResult<Option<T>> {
    match node.attribute(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ManifestError::invalid_attribute(name, value)),
        None => Ok(None),
    }
}

/// Parses an `xs:duration` attribute into seconds.
///
/// Unparseable durations are dropped with a warning, as players commonly do.
fn parse_duration_attr(node: &XmlNode, name: &str) -> Option<f64> {
    let value = node.attribute(name)?;
    let parsed = IsoDuration::parse(value.trim())
        .ok()
        .and_then(|duration| duration.to_std());
    if parsed.is_none() {
        tracing::warn!(attribute = name, value, "Ignoring invalid duration");
    }
    parsed.map(|duration| duration.as_secs_f64())
}

fn string_attr(node: &XmlNode, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

fn base_urls(node: &XmlNode) -> Vec<String> {
    node.children_named("BaseURL")
        .filter_map(XmlNode::non_empty_text)
        .map(str::to_string)
        .collect()
}

fn url_type(node: &XmlNode) -> UrlType {
    UrlType {
        source_url: string_attr(node, "sourceURL"),
        range: string_attr(node, "range"),
    }
}

fn segment_timeline(node: &XmlNode) -> ManifestResult<Option<Vec<TimelineSegment>>> {
    let Some(timeline) = node.child("SegmentTimeline") else {
        return Ok(None);
    };

    let mut segments = Vec::new();
    for s in timeline.children_named("S") {
        let duration = parse_attr::<u64>(s, "d")?.unwrap_or(0);
        if duration == 0 {
            tracing::warn!("\"S\" element must have a duration: ignoring this element");
            continue;
        }
        segments.push(TimelineSegment {
            time: parse_attr(s, "t")?,
            duration,
            repeat_count: parse_attr(s, "r")?.unwrap_or(0),
        });
    }
    Ok(Some(segments))
}

impl SegmentBase {
    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        Ok(Self {
            timescale: parse_attr(node, "timescale")?,
            presentation_time_offset: parse_attr(node, "presentationTimeOffset")?,
            index_range: string_attr(node, "indexRange"),
            initialization: node.child("Initialization").map(url_type),
            representation_index: node.child("RepresentationIndex").map(url_type),
        })
    }
}

impl SegmentList {
    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        Ok(Self {
            timescale: parse_attr(node, "timescale")?,
            presentation_time_offset: parse_attr(node, "presentationTimeOffset")?,
            duration: parse_attr(node, "duration")?,
            start_number: parse_attr(node, "startNumber")?,
            initialization: node.child("Initialization").map(url_type),
            timeline: segment_timeline(node)?,
            segment_urls: node
                .children_named("SegmentURL")
                .map(|url| SegmentUrl {
                    media: string_attr(url, "media"),
                    media_range: string_attr(url, "mediaRange"),
                })
                .collect(),
        })
    }
}

impl SegmentTemplate {
    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        Ok(Self {
            timescale: parse_attr(node, "timescale")?,
            presentation_time_offset: parse_attr(node, "presentationTimeOffset")?,
            duration: parse_attr(node, "duration")?,
            start_number: parse_attr(node, "startNumber")?,
            media: string_attr(node, "media"),
            index: string_attr(node, "index"),
            initialization: string_attr(node, "initialization").or_else(|| {
                node.child("Initialization")
                    .and_then(|init| string_attr(init, "sourceURL"))
            }),
            timeline: segment_timeline(node)?,
        })
    }
}

impl SegmentAddressing {
    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        Ok(Self {
            segment_base: node
                .child("SegmentBase")
                .map(SegmentBase::from_node)
                .transpose()?,
            segment_list: node
                .child("SegmentList")
                .map(SegmentList::from_node)
                .transpose()?,
            segment_template: node
                .child("SegmentTemplate")
                .map(SegmentTemplate::from_node)
                .transpose()?,
        })
    }
}

impl Representation {
    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        Ok(Self {
            id: string_attr(node, "id"),
            bandwidth: parse_attr(node, "bandwidth")?,
            mime_type: string_attr(node, "mimeType"),
            codecs: string_attr(node, "codecs"),
            width: parse_attr(node, "width")?,
            height: parse_attr(node, "height")?,
            base_urls: base_urls(node),
            addressing: SegmentAddressing::from_node(node)?,
            content_protections: node.children_named("ContentProtection").cloned().collect(),
        })
    }
}

impl AdaptationSet {
    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        Ok(Self {
            id: string_attr(node, "id"),
            content_type: string_attr(node, "contentType"),
            mime_type: string_attr(node, "mimeType"),
            codecs: string_attr(node, "codecs"),
            lang: string_attr(node, "lang"),
            base_urls: base_urls(node),
            addressing: SegmentAddressing::from_node(node)?,
            content_protections: node.children_named("ContentProtection").cloned().collect(),
            representations: node
                .children_named("Representation")
                .map(Representation::from_node)
                .collect::<ManifestResult<_>>()?,
        })
    }
}

impl Period {
    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        Ok(Self {
            id: string_attr(node, "id"),
            start: parse_duration_attr(node, "start"),
            duration: parse_duration_attr(node, "duration"),
            base_urls: base_urls(node),
            addressing: SegmentAddressing::from_node(node)?,
            adaptation_sets: node
                .children_named("AdaptationSet")
                .map(AdaptationSet::from_node)
                .collect::<ManifestResult<_>>()?,
        })
    }
}

impl Mpd {
    pub fn parse(xml: &str) -> ManifestResult<Self> {
        let root = parse_document(xml)?;
        if root.local_name() != "MPD" {
            return Err(ManifestError::InvalidXml(format!(
                "expected <MPD> root, found <{}>",
                root.name
            )));
        }
        Self::from_node(&root)
    }

    fn from_node(node: &XmlNode) -> ManifestResult<Self> {
        let mpd_type = match node.attribute("type") {
            Some("dynamic") => MpdType::Dynamic,
            _ => MpdType::Static,
        };
        let availability_start_time = node
            .attribute("availabilityStartTime")
            .map(parse_xs_datetime)
            .transpose()?;

        Ok(Self {
            mpd_type,
            availability_start_time,
            media_presentation_duration: parse_duration_attr(node, "mediaPresentationDuration"),
            minimum_update_period: parse_duration_attr(node, "minimumUpdatePeriod"),
            time_shift_buffer_depth: parse_duration_attr(node, "timeShiftBufferDepth"),
            suggested_presentation_delay: parse_duration_attr(node, "suggestedPresentationDelay"),
            max_segment_duration: parse_duration_attr(node, "maxSegmentDuration"),
            min_buffer_time: parse_duration_attr(node, "minBufferTime"),
            base_urls: base_urls(node),
            utc_timings: node
                .children_named("UTCTiming")
                .filter_map(|timing| {
                    let scheme = string_attr(timing, "schemeIdUri")?;
                    Some((scheme, string_attr(timing, "value")))
                })
                .collect(),
            periods: node
                .children_named("Period")
                .map(Period::from_node)
                .collect::<ManifestResult<_>>()?,
        })
    }

    pub fn is_dynamic(&self) -> bool {
        self.mpd_type == MpdType::Dynamic
    }
}
