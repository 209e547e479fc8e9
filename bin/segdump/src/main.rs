use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use iori_manifest::{
    dash::{DashParser, Manifest, Stream, StreamSegments},
    hls::{parse_playlist, MediaPlaylistTracker, Playlist, PlaylistType},
    InitSegmentReference, ManifestConfig, SegmentIndex, SegmentReference,
};
use serde::Serialize;
use url::Url;

#[derive(Parser, Debug, Clone)]
#[clap(name = "segdump", version, about)]
struct SegdumpArgs {
    /// DASH or HLS manifest to read
    manifest: PathBuf,

    /// Where the manifest was fetched from, used to resolve relative URLs
    #[clap(long, default_value = "http://localhost/manifest")]
    url: Url,

    /// TOML file with parser options
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Print JSON instead of a segment table
    #[clap(long)]
    json: bool,

    /// Let live updates run for this many seconds before printing
    #[clap(long)]
    wait: Option<u64>,

    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,
}

#[derive(Serialize)]
struct ReferenceView {
    start: f64,
    end: f64,
    uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    byte_range: Option<(u64, Option<u64>)>,
}

impl From<&SegmentReference> for ReferenceView {
    fn from(reference: &SegmentReference) -> Self {
        let byte_range = (reference.start_byte > 0 || reference.end_byte.is_some())
            .then_some((reference.start_byte, reference.end_byte));
        Self {
            start: reference.start_time,
            end: reference.end_time,
            uri: reference.uris().first().map(Url::to_string),
            byte_range,
        }
    }
}

fn init_uri(init: Option<&InitSegmentReference>) -> Option<String> {
    init.and_then(|init| init.uris().first().map(Url::to_string))
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SegmentsView {
    Indexed {
        evicted: u64,
        references: Vec<ReferenceView>,
    },
    Deferred {
        index_uri: Option<String>,
        byte_range: (u64, Option<u64>),
    },
}

impl From<&SegmentIndex> for SegmentsView {
    fn from(index: &SegmentIndex) -> Self {
        SegmentsView::Indexed {
            evicted: index.num_evicted(),
            references: index.iter().map(ReferenceView::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct StreamView {
    id: Option<String>,
    content_type: Option<String>,
    mime_type: Option<String>,
    codecs: Option<String>,
    bandwidth: Option<u64>,
    language: Option<String>,
    key_ids: Vec<String>,
    key_systems: Vec<String>,
    init: Option<String>,
    segments: SegmentsView,
}

impl StreamView {
    async fn new(stream: &Stream) -> Self {
        let segments = match &stream.segments {
            StreamSegments::Indexed(index) => SegmentsView::from(&*index.lock().await),
            StreamSegments::Deferred(request) => SegmentsView::Deferred {
                index_uri: request.uris.first().map(Url::to_string),
                byte_range: (request.start_byte, request.end_byte),
            },
        };
        Self {
            id: stream.id.clone(),
            content_type: stream.content_type.clone(),
            mime_type: stream.mime_type.clone(),
            codecs: stream.codecs.clone(),
            bandwidth: stream.bandwidth,
            language: stream.language.clone(),
            key_ids: stream.key_ids.iter().cloned().collect(),
            key_systems: stream
                .drm_infos
                .iter()
                .map(|info| info.key_system.clone().unwrap_or_else(|| "unknown".to_string()))
                .collect(),
            init: init_uri(stream.init_segment.as_deref()),
            segments,
        }
    }
}

#[derive(Serialize)]
struct PeriodView {
    id: Option<String>,
    start: f64,
    duration: Option<f64>,
    streams: Vec<StreamView>,
}

#[derive(Serialize)]
struct VariantView {
    uri: Option<String>,
    bandwidth: Option<String>,
    codecs: Option<String>,
    resolution: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
enum ManifestView {
    Dash {
        dynamic: bool,
        availability_window: (f64, f64),
        periods: Vec<PeriodView>,
    },
    HlsMaster {
        variants: Vec<VariantView>,
    },
    HlsMedia {
        media_sequence: u64,
        ended: bool,
        segments: SegmentsView,
    },
}

async fn dash_view(manifest: &Manifest) -> ManifestView {
    let mut periods = Vec::with_capacity(manifest.periods.len());
    for period in &manifest.periods {
        let mut streams = Vec::with_capacity(period.streams.len());
        for stream in &period.streams {
            streams.push(StreamView::new(stream).await);
        }
        periods.push(PeriodView {
            id: period.id.clone(),
            start: period.start,
            duration: period.duration,
            streams,
        });
    }

    ManifestView::Dash {
        dynamic: manifest.dynamic,
        availability_window: manifest.timeline.lock().await.availability_window(),
        periods,
    }
}

fn hls_view(playlist: &Playlist) -> anyhow::Result<ManifestView> {
    Ok(match playlist.playlist_type {
        PlaylistType::Master => ManifestView::HlsMaster {
            variants: playlist
                .variants()
                .map(|variant| {
                    let attribute = |name: &str| variant.attribute_value(name).map(str::to_string);
                    VariantView {
                        uri: variant
                            .attribute_value("URI")
                            .and_then(|uri| playlist.uri.join(uri).ok())
                            .map(|uri| uri.to_string()),
                        bandwidth: attribute("BANDWIDTH"),
                        codecs: attribute("CODECS"),
                        resolution: attribute("RESOLUTION"),
                    }
                })
                .collect(),
        },
        PlaylistType::Media => {
            let mut tracker = MediaPlaylistTracker::new();
            tracker.update(playlist)?;
            ManifestView::HlsMedia {
                media_sequence: playlist.media_sequence(),
                ended: playlist.has_end_list(),
                segments: SegmentsView::from(tracker.index()),
            }
        }
    })
}

fn print_references(indent: &str, segments: &SegmentsView) {
    match segments {
        SegmentsView::Indexed {
            evicted,
            references,
        } => {
            println!("{indent}{} references, {evicted} evicted", references.len());
            for reference in references {
                let range = reference
                    .byte_range
                    .map(|(start, end)| match end {
                        Some(end) => format!(" [{start}-{end}]"),
                        None => format!(" [{start}-]"),
                    })
                    .unwrap_or_default();
                println!(
                    "{indent}  {:>10.3} {:>10.3}  {}{range}",
                    reference.start,
                    reference.end,
                    reference.uri.as_deref().unwrap_or("-")
                );
            }
        }
        SegmentsView::Deferred {
            index_uri,
            byte_range: (start, end),
        } => {
            let end = end.map(|end| end.to_string()).unwrap_or_default();
            println!(
                "{indent}index in media: {} [{start}-{end}]",
                index_uri.as_deref().unwrap_or("-")
            );
        }
    }
}

fn print_view(view: &ManifestView) {
    match view {
        ManifestView::Dash {
            dynamic,
            availability_window: (start, end),
            periods,
        } => {
            let kind = if *dynamic { "dynamic" } else { "static" };
            println!("DASH ({kind}), available {start:.3} - {end:.3}");
            for period in periods {
                println!(
                    "Period {} @ {:.3}",
                    period.id.as_deref().unwrap_or("-"),
                    period.start
                );
                for stream in &period.streams {
                    println!(
                        "  {} {} {} {}bps",
                        stream.id.as_deref().unwrap_or("-"),
                        stream.content_type.as_deref().unwrap_or("-"),
                        stream.codecs.as_deref().unwrap_or("-"),
                        stream.bandwidth.unwrap_or_default()
                    );
                    if !stream.key_systems.is_empty() {
                        println!(
                            "    drm: {} (kid {})",
                            stream.key_systems.join(", "),
                            stream.key_ids.join(", ")
                        );
                    }
                    if let Some(init) = &stream.init {
                        println!("    init: {init}");
                    }
                    print_references("    ", &stream.segments);
                }
            }
        }
        ManifestView::HlsMaster { variants } => {
            println!("HLS master playlist");
            for variant in variants {
                println!(
                    "  {} {} {}",
                    variant.bandwidth.as_deref().unwrap_or("-"),
                    variant.resolution.as_deref().unwrap_or("-"),
                    variant.uri.as_deref().unwrap_or("-")
                );
            }
        }
        ManifestView::HlsMedia {
            media_sequence,
            ended,
            segments,
        } => {
            let state = if *ended { "ended" } else { "live" };
            println!("HLS media playlist ({state}), media sequence {media_sequence}");
            print_references("  ", segments);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ManifestConfig> {
    let Some(path) = path else {
        return Ok(ManifestConfig::default());
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    Ok(toml::from_str(&data)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SegdumpArgs::parse();

    let default_level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_ref())?;
    let text = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("failed to read manifest {}", args.manifest.display()))?;

    let view = if text.trim_start().starts_with("#EXTM3U") {
        let playlist = parse_playlist(&text, &args.url)?;
        tracing::info!(segments = playlist.segments.len(), "Parsed HLS playlist");
        hls_view(&playlist)?
    } else {
        let mut parser = DashParser::new(args.url.clone(), config);
        let manifest = parser.parse(&text).await?;
        tracing::info!(
            periods = manifest.periods.len(),
            dynamic = manifest.dynamic,
            "Parsed MPD"
        );
        if let Some(wait) = args.wait.filter(|_| manifest.dynamic) {
            tracing::info!(wait, "Waiting for live updates");
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
        let view = dash_view(&manifest).await;
        parser.stop();
        view
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_view(&view);
    }
    Ok(())
}
