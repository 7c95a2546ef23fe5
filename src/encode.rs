use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};

use crate::errors::PipelineError;

/// Output resolution presets. The CLI exposes them as mutually exclusive
/// flags; 640x480 is the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePreset {
    Dim1024x768,
    Dim800x600,
    Dim640x480,
}

impl ScalePreset {
    pub fn scale_filter(self) -> &'static str {
        match self {
            ScalePreset::Dim1024x768 => "scale=1024:768",
            ScalePreset::Dim800x600 => "scale=800:600",
            ScalePreset::Dim640x480 => "scale=640:480",
        }
    }
}

/// Everything one multiplexing run needs: the frame list file driving the
/// video track and the original download supplying the audio track.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub frame_list: PathBuf,
    pub audio_source: PathBuf,
    pub fps: f64,
    pub scale: ScalePreset,
    pub output: PathBuf,
}

/// Seam for the multiplexing step, so backends can be swapped without
/// touching the pipeline.
pub trait Encoder {
    fn encode(&self, job: &EncodeJob) -> Result<()>;
}

/// Drives an mencoder-style external multiplexer: the frame list becomes
/// the JPEG video track, the original video contributes its audio.
pub struct MencoderBackend {
    executable: PathBuf,
}

impl MencoderBackend {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }
}

impl Encoder for MencoderBackend {
    fn encode(&self, job: &EncodeJob) -> Result<()> {
        let args = mencoder_args(job);
        println!("Running {} {}", self.executable.display(), args.join(" "));

        let child = Command::new(&self.executable)
            .args(args.iter().map(String::as_str))
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    anyhow!(
                        "encoder executable not found at {}. Install mencoder or point --encoder at one.",
                        self.executable.display()
                    )
                } else {
                    anyhow!(
                        "failed to spawn encoder {}: {error}",
                        self.executable.display()
                    )
                }
            })?;

        let output = child
            .wait_with_output()
            .context("failed waiting for the encoder process")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Encoder {
                status: output.status,
                stderr_tail: last_n_chars(&stderr, 500),
            }
            .into());
        }
        Ok(())
    }
}

/// The argv vector for one run, kept as a pure function so the invocation
/// shape stays testable.
pub fn mencoder_args(job: &EncodeJob) -> Vec<String> {
    vec![
        format!("mf://@{}", job.frame_list.to_string_lossy()),
        "-mf".to_owned(),
        format!("fps={}:type=jpg", job.fps),
        "-vf".to_owned(),
        job.scale.scale_filter().to_owned(),
        "-ovc".to_owned(),
        "lavc".to_owned(),
        "-oac".to_owned(),
        "mp3lame".to_owned(),
        "-audiofile".to_owned(),
        job.audio_source.to_string_lossy().into_owned(),
        "-o".to_owned(),
        job.output.to_string_lossy().into_owned(),
    ]
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let chars = s.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(max_chars);
    chars[start..].iter().collect::<String>().trim().to_owned()
}
