use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

use crate::auth::Session;
use crate::errors::PipelineError;
use crate::timeline::Slide;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    Downloaded,
    AlreadyPresent,
}

/// Stream one asset to its destination. An existing destination
/// short-circuits before any network call, which is what makes partial
/// re-runs idempotent. A non-success status aborts with an error naming
/// the asset instead of leaving a silent gap for the encoder to trip over.
pub fn fetch_asset(client: &Client, label: &str, url: &str, destination: &Path) -> Result<Fetched> {
    if destination.exists() {
        return Ok(Fetched::AlreadyPresent);
    }

    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to request {label} from {url}"))?;
    if !response.status().is_success() {
        return Err(PipelineError::Download {
            asset: label.to_owned(),
            status: response.status(),
        }
        .into());
    }

    let mut file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    response
        .copy_to(&mut file)
        .with_context(|| format!("failed to stream {label} to {}", destination.display()))?;
    Ok(Fetched::Downloaded)
}

pub fn download_video(session: &Session, video_url: &str, destination: &Path) -> Result<()> {
    if destination.exists() {
        println!("Video already exists ... not downloading.");
        return Ok(());
    }
    println!("Downloading {video_url}");
    fetch_asset(session.client(), "the lecture video", video_url, destination)?;
    Ok(())
}

pub fn download_slides(session: &Session, slides: &[Slide]) -> Result<()> {
    println!("Downloading {} slide JPEGs ...", slides.len());
    for slide in slides {
        let label = format!("slide {}", slide.index);
        fetch_asset(session.client(), &label, &slide.url, &slide.path)?;
    }
    Ok(())
}
