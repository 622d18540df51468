//! Media backend: opening clips and concatenating them
//!
//! [`MediaBackend`] is the seam between the joiner and the encoder. The
//! production [`FfmpegBackend`] probes with `ffprobe` and encodes with
//! `ffmpeg` using the resolved [`Toolchain`].

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ffmpeg::{FfmpegCommand, FfmpegError};
use crate::resolver::Toolchain;

/// Sample rate of the mixed audio track
const AUDIO_RATE: u32 = 44100;
const FALLBACK_FRAME_RATE: &str = "30";

/// Opens clips and concatenates them into one encoded file
pub trait MediaBackend: Send + Sync {
    type Clip: Send;

    /// Open a decode handle over `path`. Fails for files that are not media.
    fn open_clip(&self, path: &Path) -> Result<Self::Clip, FfmpegError>;

    /// Concatenate `clips` in order into `output`
    fn concatenate(
        &self,
        clips: &[&Self::Clip],
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<(), FfmpegError>;
}

// ============================================================================
// Encode settings
// ============================================================================

/// Every encode pass runs the encoder single-threaded
pub const ENCODE_THREADS: u32 = 1;

/// Codec and threading choices for one encode pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub threads: u32,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub extra_args: Vec<String>,
}

impl EncodeSettings {
    /// Intermediate chunks: always H.264/AAC in MP4
    pub fn intermediate() -> Self {
        Self {
            threads: ENCODE_THREADS,
            video_codec: Some("libx264".to_string()),
            audio_codec: Some("aac".to_string()),
            extra_args: vec!["-preset".to_string(), "medium".to_string()],
        }
    }

    /// Codecs picked from the container extension; unknown containers use
    /// the encoder's defaults
    pub fn for_container(format: &str) -> Self {
        let (video, audio) = match format {
            "mp4" | "mov" | "m4v" | "mkv" => (Some("libx264"), Some("aac")),
            "webm" => (Some("libvpx-vp9"), Some("libopus")),
            "ogv" => (Some("libtheora"), Some("libvorbis")),
            "avi" => (Some("mpeg4"), Some("libmp3lame")),
            _ => (None, None),
        };
        let extra_args = if video == Some("libx264") {
            vec!["-preset".to_string(), "medium".to_string()]
        } else {
            Vec::new()
        };
        Self {
            threads: ENCODE_THREADS,
            video_codec: video.map(str::to_string),
            audio_codec: audio.map(str::to_string),
            extra_args,
        }
    }
}

// ============================================================================
// Probe info
// ============================================================================

/// What opening a clip learns about it
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Rational as reported by ffprobe, e.g. `30000/1001`
    pub frame_rate: String,
    pub has_audio: bool,
}

impl ProbeInfo {
    /// Parse `ffprobe -print_format json -show_format -show_streams` output
    pub fn from_json(parsed: &Value) -> Result<Self, FfmpegError> {
        let streams = parsed.get("streams").and_then(|s| s.as_array());
        let video_stream = streams
            .and_then(|s| s.iter().find(|st| codec_type(st) == Some("video")))
            .ok_or_else(|| FfmpegError::InvalidOutput("no video stream".to_string()))?;
        let has_audio = streams
            .map(|s| s.iter().any(|st| codec_type(st) == Some("audio")))
            .unwrap_or(false);

        let width = video_stream.get("width").and_then(|x| x.as_u64()).unwrap_or(0) as u32;
        let height = video_stream.get("height").and_then(|x| x.as_u64()).unwrap_or(0) as u32;
        if width == 0 || height == 0 {
            return Err(FfmpegError::InvalidOutput("video stream has no dimensions".to_string()));
        }

        let duration = parsed
            .get("format")
            .and_then(|f| f.get("duration"))
            .or_else(|| video_stream.get("duration"))
            .and_then(|d| d.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| FfmpegError::InvalidOutput("unknown duration".to_string()))?;

        let frame_rate = ["r_frame_rate", "avg_frame_rate"]
            .iter()
            .filter_map(|key| video_stream.get(*key).and_then(|r| r.as_str()))
            .find(|r| parse_rational(r).map(|v| v > 0.0).unwrap_or(false))
            .unwrap_or(FALLBACK_FRAME_RATE)
            .to_string();

        Ok(Self {
            duration,
            width,
            height,
            frame_rate,
            has_audio,
        })
    }

    pub fn frame_rate_value(&self) -> f64 {
        parse_rational(&self.frame_rate).unwrap_or(0.0)
    }
}

fn codec_type(stream: &Value) -> Option<&str> {
    stream.get("codec_type").and_then(|t| t.as_str())
}

fn parse_rational(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => s.parse().ok(),
    }
}

// ============================================================================
// Concat filter graph
// ============================================================================

/// Filter graph joining N clips sequentially on a shared canvas
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatPlan {
    pub filter_graph: String,
    /// Durations of generated silent inputs, appended after the clip inputs
    pub silent_inputs: Vec<f64>,
    pub has_audio: bool,
}

/// Build the concat graph. Smaller clips are centred on a canvas of the
/// largest width and height; clips without audio get silence of their own
/// length when any clip has audio.
pub fn build_concat_plan(clips: &[&ProbeInfo]) -> ConcatPlan {
    let width = even(clips.iter().map(|c| c.width).max().unwrap_or(2));
    let height = even(clips.iter().map(|c| c.height).max().unwrap_or(2));
    let fps = clips
        .iter()
        .max_by(|a, b| a.frame_rate_value().total_cmp(&b.frame_rate_value()))
        .map(|c| c.frame_rate.clone())
        .unwrap_or_else(|| FALLBACK_FRAME_RATE.to_string());
    let has_audio = clips.iter().any(|c| c.has_audio);

    let mut parts = Vec::new();
    let mut silent_inputs = Vec::new();
    let mut concat_inputs = String::new();

    for (i, clip) in clips.iter().enumerate() {
        parts.push(format!(
            "[{i}:v:0]pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={fps},format=yuv420p[v{i}]"
        ));
        concat_inputs.push_str(&format!("[v{i}]"));

        if has_audio {
            let source = if clip.has_audio {
                format!("[{i}:a:0]aresample={AUDIO_RATE},")
            } else {
                let input = clips.len() + silent_inputs.len();
                silent_inputs.push(clip.duration);
                format!("[{input}:a]")
            };
            parts.push(format!(
                "{source}aformat=sample_fmts=fltp:sample_rates={AUDIO_RATE}:channel_layouts=stereo[a{i}]"
            ));
            concat_inputs.push_str(&format!("[a{i}]"));
        }
    }

    let n = clips.len();
    if has_audio {
        parts.push(format!("{concat_inputs}concat=n={n}:v=1:a=1[vout][aout]"));
    } else {
        parts.push(format!("{concat_inputs}concat=n={n}:v=1:a=0[vout]"));
    }

    ConcatPlan {
        filter_graph: parts.join(";"),
        silent_inputs,
        has_audio,
    }
}

fn even(v: u32) -> u32 {
    v + (v % 2)
}

// ============================================================================
// FFmpeg backend
// ============================================================================

/// A probed input file
#[derive(Debug, Clone)]
pub struct FfmpegClip {
    pub path: PathBuf,
    pub info: ProbeInfo,
}

pub struct FfmpegBackend {
    toolchain: Toolchain,
}

impl FfmpegBackend {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn probe(&self, path: &Path) -> Result<ProbeInfo, FfmpegError> {
        let output = FfmpegCommand::bare(&self.toolchain.ffprobe)
            .args(&[
                "-v", "error",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
            ])
            .output(path)
            .execute()?;

        let parsed: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| FfmpegError::InvalidOutput(format!("JSON parse error: {}", e)))?;
        ProbeInfo::from_json(&parsed)
    }
}

impl MediaBackend for FfmpegBackend {
    type Clip = FfmpegClip;

    fn open_clip(&self, path: &Path) -> Result<FfmpegClip, FfmpegError> {
        let info = self.probe(path)?;
        debug!(
            "Opened {}: {}x{} @ {} for {:.2}s (audio: {})",
            path.display(),
            info.width,
            info.height,
            info.frame_rate,
            info.duration,
            info.has_audio
        );
        Ok(FfmpegClip {
            path: path.to_path_buf(),
            info,
        })
    }

    fn concatenate(
        &self,
        clips: &[&FfmpegClip],
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<(), FfmpegError> {
        if clips.is_empty() {
            return Err(FfmpegError::InvalidOutput("nothing to concatenate".to_string()));
        }

        let infos: Vec<&ProbeInfo> = clips.iter().map(|c| &c.info).collect();
        let plan = build_concat_plan(&infos);

        let mut cmd = FfmpegCommand::new(&self.toolchain.ffmpeg);
        for clip in clips {
            cmd = cmd.input(&clip.path);
        }
        for seconds in &plan.silent_inputs {
            cmd = cmd.lavfi_input(&format!("anullsrc=r={AUDIO_RATE}:cl=stereo"), *seconds);
        }
        cmd = cmd
            .arg("-filter_complex")
            .arg(plan.filter_graph.as_str())
            .args(&["-map", "[vout]"]);
        if plan.has_audio {
            cmd = cmd.args(&["-map", "[aout]"]);
        }
        if let Some(codec) = &settings.video_codec {
            cmd = cmd.args(&["-c:v", codec.as_str()]);
        }
        if let Some(codec) = &settings.audio_codec {
            if plan.has_audio {
                cmd = cmd.args(&["-c:a", codec.as_str()]);
            }
        }
        for extra in &settings.extra_args {
            cmd = cmd.arg(extra.as_str());
        }
        cmd.args(&["-threads", &settings.threads.to_string()])
            .output(output)
            .execute()?;

        Ok(())
    }
}
