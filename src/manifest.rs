use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Session;
use crate::errors::PipelineError;

const PLAYER_SERVICE_PATH: &str = "/PlayerService/PlayerService.svc/json/GetPlayerOptions";
const MANIFEST_FILE_NAME: &str = "manifest.js";

/// The validated view of a presentation manifest: everything later stages
/// need, with the provider's stream layout already checked.
#[derive(Debug, Clone)]
pub struct PresentationManifest {
    pub duration_ms: u64,
    pub video_url: String,
    pub slide_base_url: String,
    pub playback_ticket: String,
    pub transition_times_ms: Vec<u64>,
}

#[derive(Debug, Serialize)]
struct PlayerOptionsRequest<'a> {
    #[serde(rename = "getPlayerOptionsRequest")]
    request: PlayerOptionsRequestBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PlayerOptionsRequestBody<'a> {
    resource_id: &'a str,
    query_string: &'a str,
    use_screen_reader: bool,
}

#[derive(Debug, Deserialize)]
struct PlayerOptionsEnvelope {
    d: PlayerOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PlayerOptions {
    #[serde(default)]
    presentation: Option<RawPresentation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPresentation {
    duration: u64,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawStream {
    slide_base_url: Option<String>,
    slide_playback_ticket_id: Option<String>,
    slides: Option<Vec<RawSlide>>,
    video_urls: Option<Vec<RawVideoUrl>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSlide {
    time: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVideoUrl {
    location: String,
}

/// POST the player-options request for the presentation, persist the raw
/// response body to `manifest.js` in the working directory (always
/// overwritten), and return the parsed, validated manifest.
pub fn fetch_manifest(
    session: &Session,
    presentation_url: &str,
    temp_dir: &Path,
) -> Result<PresentationManifest> {
    let endpoint = player_service_url(presentation_url)?;
    let resource_id = resource_id(presentation_url)?;

    let raw = session
        .client()
        .post(&endpoint)
        .json(&PlayerOptionsRequest {
            request: PlayerOptionsRequestBody {
                resource_id: &resource_id,
                query_string: "",
                use_screen_reader: false,
            },
        })
        .header(ACCEPT, "text/plain")
        .send()
        .with_context(|| format!("failed to call the player service at {endpoint}"))?
        .error_for_status()
        .context("player service returned an error status")?
        .text()
        .context("failed to read the player service response")?;

    let manifest_path = temp_dir.join(MANIFEST_FILE_NAME);
    fs::write(&manifest_path, &raw)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    parse_player_options(&raw)
}

/// Derive the player-service endpoint from the presentation URL by
/// replacing its `/Play/...` suffix, matching case-insensitively.
pub fn player_service_url(presentation_url: &str) -> Result<String> {
    let play_suffix = Regex::new(r"(?i)/Play/.*$").expect("play suffix pattern is valid");
    if !play_suffix.is_match(presentation_url) {
        return Err(PipelineError::ManifestShape {
            reason: format!("presentation URL {presentation_url} has no /Play/ segment"),
        }
        .into());
    }
    Ok(play_suffix
        .replace(presentation_url, PLAYER_SERVICE_PATH)
        .into_owned())
}

/// The presentation's resource identifier is the last path segment of its
/// URL.
pub fn resource_id(presentation_url: &str) -> Result<String> {
    let url = Url::parse(presentation_url)
        .with_context(|| format!("invalid presentation URL {presentation_url}"))?;
    url.path_segments()
        .and_then(|segments| segments.last().map(str::to_owned))
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| {
            anyhow::Error::from(PipelineError::ManifestShape {
                reason: format!("presentation URL {presentation_url} has no resource id segment"),
            })
        })
}

/// Parse the raw player-options body and validate the provider's stream
/// layout: the slide stream first, the video stream second. Violations are
/// reported as distinct shape errors instead of panicking on a missing
/// index.
pub fn parse_player_options(raw: &str) -> Result<PresentationManifest> {
    let envelope: PlayerOptionsEnvelope =
        serde_json::from_str(raw).map_err(|error| PipelineError::ManifestShape {
            reason: format!(
                "invalid player options JSON at line {}, column {}: {error}",
                error.line(),
                error.column()
            ),
        })?;

    let presentation = envelope
        .d
        .presentation
        .ok_or_else(|| shape_error("no Presentation payload"))?;

    let mut streams = presentation.streams.into_iter();
    let slide_stream = streams
        .next()
        .ok_or_else(|| shape_error("no streams; expected the slide stream first"))?;
    let video_stream = streams
        .next()
        .ok_or_else(|| shape_error("a single stream; expected the video stream second"))?;

    let video_url = video_stream
        .video_urls
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|entry| entry.location)
        .filter(|location| !location.is_empty())
        .ok_or_else(|| shape_error("a video stream without VideoUrls entries"))?;

    let transition_times_ms: Vec<u64> = slide_stream
        .slides
        .unwrap_or_default()
        .iter()
        .map(|slide| slide.time)
        .collect();

    // A slideless presentation carries no base URL or ticket; require them
    // only once there is a slide to fetch.
    let (slide_base_url, playback_ticket) = if transition_times_ms.is_empty() {
        (
            slide_stream.slide_base_url.unwrap_or_default(),
            slide_stream.slide_playback_ticket_id.unwrap_or_default(),
        )
    } else {
        (
            slide_stream
                .slide_base_url
                .filter(|value| !value.is_empty())
                .ok_or_else(|| shape_error("a slide stream without SlideBaseUrl"))?,
            slide_stream
                .slide_playback_ticket_id
                .filter(|value| !value.is_empty())
                .ok_or_else(|| shape_error("a slide stream without SlidePlaybackTicketId"))?,
        )
    };

    validate_transition_times(&transition_times_ms, presentation.duration)?;

    Ok(PresentationManifest {
        duration_ms: presentation.duration,
        video_url,
        slide_base_url,
        playback_ticket,
        transition_times_ms,
    })
}

fn validate_transition_times(transition_times_ms: &[u64], duration_ms: u64) -> Result<()> {
    for pair in transition_times_ms.windows(2) {
        if pair[1] < pair[0] {
            return Err(shape_error(&format!(
                "transition times decreasing ({} after {})",
                pair[1], pair[0]
            ))
            .into());
        }
    }
    if let Some(last) = transition_times_ms.last() {
        if *last >= duration_ms {
            return Err(shape_error(&format!(
                "transition time {last} is not below the presentation duration {duration_ms}"
            ))
            .into());
        }
    }
    Ok(())
}

fn shape_error(detail: &str) -> PipelineError {
    PipelineError::ManifestShape {
        reason: format!("manifest has {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_player_options, player_service_url, resource_id};
    use crate::errors::PipelineError;

    const MANIFEST_JSON: &str = r#"{
        "d": {
            "PlayerPresentationStatus": 2,
            "Presentation": {
                "Duration": 4000,
                "Streams": [
                    {
                        "SlideBaseUrl": "https://media.example.edu/slides/abc123/",
                        "SlidePlaybackTicketId": "ticket-42",
                        "Slides": [
                            { "Time": 1000, "Number": 1 },
                            { "Time": 3000, "Number": 2 }
                        ]
                    },
                    {
                        "VideoUrls": [
                            { "Location": "https://media.example.edu/video/abc123.mp4", "MimeType": "video/mp4" }
                        ]
                    }
                ]
            }
        }
    }"#;

    fn shape_reason(error: &anyhow::Error) -> &str {
        match error.downcast_ref::<PipelineError>() {
            Some(PipelineError::ManifestShape { reason }) => reason,
            other => panic!("expected a manifest shape error, got {other:?}"),
        }
    }

    #[test]
    fn player_service_url_replaces_the_play_suffix() {
        let url = player_service_url("https://media.example.edu/Mediasite/Play/abc123")
            .expect("endpoint should derive");
        assert_eq!(
            url,
            "https://media.example.edu/Mediasite/PlayerService/PlayerService.svc/json/GetPlayerOptions"
        );
    }

    #[test]
    fn player_service_url_matches_case_insensitively() {
        let url = player_service_url("https://media.example.edu/Mediasite/play/abc123?x=1")
            .expect("endpoint should derive");
        assert_eq!(
            url,
            "https://media.example.edu/Mediasite/PlayerService/PlayerService.svc/json/GetPlayerOptions"
        );
    }

    #[test]
    fn url_without_play_segment_is_rejected() {
        let error = player_service_url("https://media.example.edu/Mediasite/Watch/abc123")
            .expect_err("non-Play URLs should be rejected");
        assert!(shape_reason(&error).contains("/Play/"));
    }

    #[test]
    fn resource_id_is_the_last_path_segment() {
        let id = resource_id("https://media.example.edu/Mediasite/Play/c03e35ed0575")
            .expect("resource id should derive");
        assert_eq!(id, "c03e35ed0575");
    }

    #[test]
    fn manifest_parses_into_the_validated_view() {
        let manifest = parse_player_options(MANIFEST_JSON).expect("manifest should parse");
        assert_eq!(manifest.duration_ms, 4000);
        assert_eq!(manifest.transition_times_ms, vec![1000, 3000]);
        assert_eq!(manifest.playback_ticket, "ticket-42");
        assert_eq!(
            manifest.video_url,
            "https://media.example.edu/video/abc123.mp4"
        );
    }

    #[test]
    fn invalid_json_reports_the_location() {
        let error = parse_player_options("{not json").expect_err("bad JSON should fail");
        assert!(shape_reason(&error).contains("line 1"));
    }

    #[test]
    fn single_stream_manifest_is_a_shape_error() {
        let json = r#"{"d": {"Presentation": {"Duration": 4000, "Streams": [
            {"SlideBaseUrl": "u", "SlidePlaybackTicketId": "t", "Slides": [{"Time": 100}]}
        ]}}}"#;
        let error = parse_player_options(json).expect_err("one stream should fail");
        assert!(shape_reason(&error).contains("video stream"));
    }

    #[test]
    fn missing_playback_ticket_is_a_shape_error() {
        let json = MANIFEST_JSON.replace("SlidePlaybackTicketId", "SomethingElse");
        let error = parse_player_options(&json).expect_err("missing ticket should fail");
        assert!(shape_reason(&error).contains("SlidePlaybackTicketId"));
    }

    #[test]
    fn decreasing_transition_times_are_rejected() {
        let json = MANIFEST_JSON.replace("\"Time\": 3000", "\"Time\": 500");
        let error = parse_player_options(&json).expect_err("decreasing times should fail");
        assert!(shape_reason(&error).contains("decreasing"));
    }

    #[test]
    fn transition_at_or_past_the_duration_is_rejected() {
        let json = MANIFEST_JSON.replace("\"Time\": 3000", "\"Time\": 4000");
        let error = parse_player_options(&json).expect_err("late transition should fail");
        assert!(shape_reason(&error).contains("duration"));
    }

    #[test]
    fn slideless_manifest_parses_without_slide_fields() {
        let json = r#"{"d": {"Presentation": {"Duration": 4000, "Streams": [
            {},
            {"VideoUrls": [{"Location": "https://media.example.edu/v.mp4"}]}
        ]}}}"#;
        let manifest = parse_player_options(json).expect("slideless manifest should parse");
        assert!(manifest.transition_times_ms.is_empty());
        assert!(manifest.slide_base_url.is_empty());
    }
}
