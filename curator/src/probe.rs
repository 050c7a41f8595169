use std::{path::Path, process::Command};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Everything the scan needs to know about a video file in one pass.
#[derive(Debug, Clone, Default)]
pub struct VideoFileInfo {
    pub duration: f64,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub format: Option<String>,
    pub width: i64,
    pub height: i64,
    pub framerate: f64,
    pub bitrate: i64,
    pub size: i64,
    /// Container creation time tag, verbatim, when present.
    pub creation_time: Option<String>,
    pub comment: Option<String>,
}

/// Seam over the external probing tool so the scan pipeline can be tested
/// without ffprobe installed.
pub trait MediaProbe: Send + Sync {
    fn probe_video(&self, path: &Path) -> Result<VideoFileInfo>;
}

pub struct FfprobeRunner {
    ffprobe_path: String,
}

impl FfprobeRunner {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
    tags: Option<FfprobeFormatTags>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormatTags {
    creation_time: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

impl MediaProbe for FfprobeRunner {
    fn probe_video(&self, path: &Path) -> Result<VideoFileInfo> {
        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("stream=codec_type,codec_name,width,height,avg_frame_rate:format=format_name,duration,size,bit_rate:format_tags=creation_time,comment")
            .arg("-of")
            .arg("json")
            .arg(path)
            .output()
            .map_err(|err| Error::probe(path, err.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::probe(
                path,
                format!("ffprobe failed: {}", stderr.trim()),
            ));
        }

        let data: FfprobeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|err| Error::probe(path, err.to_string()))?;

        let mut info = VideoFileInfo::default();

        if let Some(format) = data.format {
            info.duration = format
                .duration
                .as_deref()
                .and_then(|value| value.parse::<f64>().ok())
                .unwrap_or(0.0);
            info.size = format
                .size
                .as_deref()
                .and_then(|value| value.parse::<i64>().ok())
                .unwrap_or(0);
            info.bitrate = format
                .bit_rate
                .as_deref()
                .and_then(|value| value.parse::<i64>().ok())
                .unwrap_or(0);
            info.format = format
                .format_name
                .map(|name| name.split(',').next().unwrap_or(&name).to_string());
            if let Some(tags) = format.tags {
                info.creation_time = tags.creation_time;
                info.comment = tags.comment;
            }
        }

        for stream in data.streams {
            match stream.codec_type.as_deref() {
                Some("video") if info.video_codec.is_none() => {
                    info.video_codec = stream.codec_name;
                    info.width = stream.width.unwrap_or(0);
                    info.height = stream.height.unwrap_or(0);
                    info.framerate = stream
                        .avg_frame_rate
                        .as_deref()
                        .and_then(parse_frame_rate)
                        .unwrap_or(0.0);
                }
                Some("audio") if info.audio_codec.is_none() => {
                    info.audio_codec = stream.codec_name;
                }
                _ => {}
            }
        }

        if info.duration <= 0.0 {
            return Err(Error::probe(path, "no duration reported".to_string()));
        }

        Ok(info)
    }
}

/// ffprobe reports frame rates as a ratio such as "30000/1001".
fn parse_frame_rate(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().ok()?;
            let den = den.parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            Some(num / den)
        }
        None => value.parse::<f64>().ok(),
    }
}

/// Decodes an in-memory image (typically a zip entry) for its dimensions.
pub fn image_dimensions_from_bytes(path: &Path, bytes: &[u8]) -> Result<(u32, u32)> {
    let image = image::load_from_memory(bytes).map_err(|err| Error::probe(path, err.to_string()))?;
    Ok((image.width(), image.height()))
}
