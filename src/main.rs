use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};

use slidecast::auth::{login, Credentials};
use slidecast::download::{download_slides, download_video};
use slidecast::encode::{EncodeJob, Encoder, MencoderBackend, ScalePreset};
use slidecast::manifest::fetch_manifest;
use slidecast::timeline::{build_timeline, slides_from_manifest, write_frame_list};

const DEFAULT_CAS_URL: &str = "https://cas.missouristate.edu";
const ORIGINAL_VIDEO_FILE_NAME: &str = "original.mp4";
const FRAME_LIST_FILE_NAME: &str = "jpg_frames.txt";

#[derive(Debug, Parser)]
#[command(name = "slidecast")]
#[command(about = "Rebuild a slideshow-synchronized video from a Mediasite lecture")]
#[command(group(ArgGroup::new("dimensions").args(["dim1024x768", "dim800x600", "dim640x480"])))]
struct Cli {
    /// Presentation URL, e.g. https://host/Mediasite/Play/<resource id>
    #[arg(short = 'u', long = "url")]
    url: String,

    /// Filename for the resulting video
    #[arg(short = 'o', long = "output-file", default_value = "./lecture.mp4")]
    output_file: PathBuf,

    /// Working directory for the downloaded slides and video
    #[arg(short = 't', long = "temp-dir", default_value = "./slides")]
    temp_dir: PathBuf,

    /// External encoder executable
    #[arg(long = "encoder", default_value = "mencoder")]
    encoder: PathBuf,

    /// Slide track frames per second
    #[arg(long = "slides-fps", default_value_t = 5.0)]
    slides_fps: f64,

    #[arg(long)]
    dim1024x768: bool,

    #[arg(long)]
    dim800x600: bool,

    #[arg(long)]
    dim640x480: bool,

    /// CAS single-sign-on base URL
    #[arg(long = "cas-url", default_value = DEFAULT_CAS_URL)]
    cas_url: String,

    /// CAS username; falls back to SLIDECAST_USERNAME
    #[arg(long)]
    username: Option<String>,

    /// CAS password; falls back to SLIDECAST_PASSWORD
    #[arg(long)]
    password: Option<String>,
}

impl Cli {
    fn scale_preset(&self) -> ScalePreset {
        if self.dim1024x768 {
            ScalePreset::Dim1024x768
        } else if self.dim800x600 {
            ScalePreset::Dim800x600
        } else {
            ScalePreset::Dim640x480
        }
    }
}

/// CLI wins over the environment; neither present is a startup error
/// naming both spellings.
fn resolve_credential(cli_value: Option<String>, env_var: &str, flag: &str) -> Result<String> {
    if let Some(value) = cli_value {
        return Ok(value);
    }
    env::var(env_var).with_context(|| format!("pass --{flag} or set {env_var}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let credentials = Credentials {
        username: resolve_credential(cli.username.clone(), "SLIDECAST_USERNAME", "username")?,
        password: resolve_credential(cli.password.clone(), "SLIDECAST_PASSWORD", "password")?,
    };

    fs::create_dir_all(&cli.temp_dir)
        .with_context(|| format!("failed to create {}", cli.temp_dir.display()))?;

    println!("1/5 Authenticating to {}", cli.cas_url);
    let session = login(&cli.cas_url, &cli.url, &credentials)?;

    println!("2/5 Fetching the presentation manifest ...");
    let manifest = fetch_manifest(&session, &cli.url, &cli.temp_dir)?;

    println!("3/5 Building the slide timeline ...");
    let slides = slides_from_manifest(&manifest, &cli.temp_dir);
    let images: Vec<PathBuf> = slides.iter().map(|slide| slide.path.clone()).collect();
    let frames = build_timeline(
        &manifest.transition_times_ms,
        manifest.duration_ms,
        &images,
        cli.slides_fps,
    )?;
    if frames.is_empty() {
        bail!("presentation has no slides; nothing to encode");
    }
    let frame_list_path = cli.temp_dir.join(FRAME_LIST_FILE_NAME);
    write_frame_list(&frames, &frame_list_path)?;

    println!("4/5 Downloading the video and {} slides ...", slides.len());
    let video_path = cli.temp_dir.join(ORIGINAL_VIDEO_FILE_NAME);
    download_video(&session, &manifest.video_url, &video_path)?;
    download_slides(&session, &slides)?;

    println!(
        "5/5 Building the slides video ({} min) ...",
        manifest.duration_ms / 1000 / 60
    );
    let backend = MencoderBackend::new(cli.encoder.clone());
    backend.encode(&EncodeJob {
        frame_list: frame_list_path,
        audio_source: video_path,
        fps: cli.slides_fps,
        scale: cli.scale_preset(),
        output: cli.output_file.clone(),
    })?;

    println!("Wrote {}", cli.output_file.display());
    Ok(())
}
