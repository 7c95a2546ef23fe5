use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::manifest::PresentationManifest;

/// A slide derived from the manifest: where to fetch it and where it lands
/// on disk.
#[derive(Debug, Clone)]
pub struct Slide {
    pub index: usize,
    pub url: String,
    pub path: PathBuf,
}

/// One slide per transition timestamp, numbered from 1. Remote names and
/// local names share the 4-digit zero-padded pattern the provider serves.
pub fn slides_from_manifest(manifest: &PresentationManifest, temp_dir: &Path) -> Vec<Slide> {
    let base = manifest.slide_base_url.trim_end_matches('/');
    (1..=manifest.transition_times_ms.len())
        .map(|index| {
            let file_name = format!("slide_{index:04}.jpg");
            Slide {
                index,
                url: format!(
                    "{base}/{file_name}?playbackTicket={}",
                    manifest.playback_ticket
                ),
                path: temp_dir.join(file_name),
            }
        })
        .collect()
}

/// Expand sparse transition timestamps into one image reference per output
/// frame, spanning `[0, duration_ms]` at the requested frame rate.
///
/// Interval `i` (everything up to and including `transitions[i]`) shows
/// slide `i+1`'s image; the list is padded with the last image once more so
/// the tail past the final transition is covered through the synthetic
/// boundary at the total duration. Elapsed time accumulates in floating
/// point and boundary comparisons are inclusive, so the frame landing on a
/// transition still belongs to the outgoing slide.
///
/// With no transitions the single image covers the whole duration; with no
/// images at all the timeline is empty and the caller decides what that
/// means.
pub fn build_timeline<'a>(
    transition_times_ms: &[u64],
    duration_ms: u64,
    images: &'a [PathBuf],
    fps: f64,
) -> Result<Vec<&'a Path>> {
    if !fps.is_finite() || fps <= 0.0 {
        bail!("slide frame rate must be a positive number, got {fps}");
    }

    let mut boundaries: Vec<u64> = transition_times_ms.to_vec();
    boundaries.push(duration_ms);

    let mut interval_images: Vec<&Path> = images.iter().map(PathBuf::as_path).collect();
    if let Some(last) = interval_images.last().copied() {
        interval_images.push(last);
    }

    let frame_duration_ms = 1000.0 / fps;
    let mut elapsed_ms = 0.0_f64;
    let mut frames = Vec::new();
    for (boundary, image) in boundaries.iter().zip(interval_images) {
        while elapsed_ms <= *boundary as f64 {
            frames.push(image);
            elapsed_ms += frame_duration_ms;
        }
    }
    Ok(frames)
}

/// Serialize the timeline to the frame list the encoder consumes: one local
/// path per line, newline-joined, nothing else.
pub fn write_frame_list(frames: &[&Path], path: &Path) -> Result<()> {
    let lines = frames
        .iter()
        .map(|frame| frame.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, lines).with_context(|| format!("failed to write {}", path.display()))
}
