//! Seam to the external media tooling (ffprobe / ffmpeg).
//!
//! The pipeline only talks to [`MediaTool`], so tests can substitute a mock and
//! the real binaries are needed only at runtime. [`Ffmpeg`] is the default
//! implementation and shells out with stream copy only; nothing is re-encoded.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use tracing::{debug, warn};

use crate::error::MediaError;

/// Stream properties of the first video stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

/// Everything sent along with a video unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub duration_secs: u64,
    pub thumbnail: Option<PathBuf>,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait MediaTool: Send + Sync {
    /// Container duration in seconds.
    fn probe_duration(&self, path: &Path) -> Result<f64, MediaError>;

    /// Width, height and duration of the first video stream.
    fn probe_stream(&self, path: &Path) -> Result<StreamInfo, MediaError>;

    /// Grabs a small still near the start of `video` into `output`.
    fn thumbnail(&self, video: &Path, output: &Path) -> Result<(), MediaError>;

    /// Cuts `input` into time-based segments of `segment_secs` using stream copy.
    /// `output_pattern` carries a printf-style index placeholder.
    fn segment(&self, input: &Path, segment_secs: f64, output_pattern: &Path) -> Result<(), MediaError>;
}

/// Path of the thumbnail generated for `video`: `<out_dir>/<stem>_thumb.jpg`.
pub fn thumbnail_path(video: &Path, out_dir: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    out_dir.join(format!("{stem}_thumb.jpg"))
}

/// Stream metadata of one unit, or `None` (with a warning) if the probe fails.
pub fn probe_meta(media: &dyn MediaTool, path: &Path) -> Option<VideoMeta> {
    match media.probe_stream(path) {
        Ok(info) => Some(VideoMeta {
            width: info.width,
            height: info.height,
            duration_secs: info.duration_secs.max(0.0) as u64,
            thumbnail: None,
        }),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "[MEDIA] Metadata probe failed, sending without metadata");
            None
        }
    }
}

/// Probes stream info and grabs a thumbnail for one unit into `thumb_dir`.
///
/// Both steps are best-effort: a failed probe yields empty metadata and a
/// failed thumbnail yields none, each with a warning.
pub fn collect_meta(media: &dyn MediaTool, path: &Path, thumb_dir: &Path) -> VideoMeta {
    let Some(mut meta) = probe_meta(media, path) else {
        return VideoMeta::default();
    };

    if let Err(e) = fs::create_dir_all(thumb_dir) {
        warn!(dir = %thumb_dir.display(), error = %e, "[MEDIA] Thumbnail directory unavailable, sending without");
        return meta;
    }
    let thumb = thumbnail_path(path, thumb_dir);
    match media.thumbnail(path, &thumb) {
        Ok(()) => meta.thumbnail = Some(thumb),
        Err(e) => warn!(file = %path.display(), error = %e, "[MEDIA] Thumbnail generation failed, sending without"),
    }
    meta
}

/// [`MediaTool`] backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Ffmpeg {
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn run(&self, tool: &Path, cmd: &mut Command) -> Result<Output, MediaError> {
        let name = tool.to_string_lossy().into_owned();
        debug!(command = ?cmd, "[MEDIA] Running external tool");
        let output = cmd.output().map_err(|source| MediaError::Launch {
            tool: name.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(MediaError::Failed {
                tool: name,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl MediaTool for Ffmpeg {
    fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let output = self.run(
            &self.ffprobe,
            Command::new(&self.ffprobe)
                .args(["-v", "error", "-show_entries", "format=duration"])
                .args(["-of", "default=noprint_wrappers=1:nokey=1"])
                .arg(path),
        )?;
        parse_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| MediaError::Parse {
            tool: "ffprobe".to_string(),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    fn probe_stream(&self, path: &Path) -> Result<StreamInfo, MediaError> {
        let output = self.run(
            &self.ffprobe,
            Command::new(&self.ffprobe)
                .args(["-v", "error", "-select_streams", "v:0"])
                .args(["-show_entries", "stream=width,height,duration"])
                .args(["-of", "csv=s=x:p=0"])
                .arg(path),
        )?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_stream_info(&stdout).ok_or_else(|| MediaError::Parse {
            tool: "ffprobe".to_string(),
            output: stdout.into_owned(),
        })
    }

    fn thumbnail(&self, video: &Path, output: &Path) -> Result<(), MediaError> {
        self.run(
            &self.ffmpeg,
            Command::new(&self.ffmpeg)
                .arg("-i")
                .arg(video)
                .args(["-ss", "00:00:01", "-vframes", "1", "-vf", "scale=320:-1", "-y"])
                .arg(output),
        )?;
        Ok(())
    }

    fn segment(&self, input: &Path, segment_secs: f64, output_pattern: &Path) -> Result<(), MediaError> {
        self.run(
            &self.ffmpeg,
            Command::new(&self.ffmpeg)
                .arg("-y")
                .arg("-i")
                .arg(input)
                .args(["-c", "copy", "-map", "0", "-f", "segment"])
                .arg("-segment_time")
                .arg(format!("{segment_secs:.2}"))
                .args(["-reset_timestamps", "1"])
                .arg(output_pattern),
        )?;
        Ok(())
    }
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Parses `WIDTHxHEIGHTxDURATION` as printed by `-of csv=s=x:p=0`.
///
/// Some containers report `N/A` for the stream duration; that maps to zero
/// rather than a failure as long as the dimensions are readable.
fn parse_stream_info(stdout: &str) -> Option<StreamInfo> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split('x');
    let width = fields.next()?.trim().parse().ok()?;
    let height = fields.next()?.trim().parse().ok()?;
    let duration_secs = fields.next()?.trim().parse::<f64>().unwrap_or(0.0);
    Some(StreamInfo {
        width,
        height,
        duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_csv() {
        let info = parse_stream_info("1920x1080x300.5\n").unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert!((info.duration_secs - 300.5).abs() < f64::EPSILON);
    }

    #[test]
    fn stream_csv_tolerates_missing_duration() {
        let info = parse_stream_info("1280x720xN/A").unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.duration_secs, 0.0);
        assert!(parse_stream_info("garbage").is_none());
        assert!(parse_stream_info("").is_none());
    }

    #[test]
    fn parses_format_duration() {
        assert_eq!(parse_duration("61.250000\n"), Some(61.25));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("-3"), None);
    }

    #[test]
    fn thumbnail_goes_to_the_output_dir() {
        assert_eq!(
            thumbnail_path(Path::new("/c/m/lesson.mp4"), Path::new("/w/F001")),
            PathBuf::from("/w/F001/lesson_thumb.jpg")
        );
    }

    #[test]
    fn collect_meta_degrades_gracefully() {
        let mut media = MockMediaTool::new();
        media.expect_probe_stream().returning(|_| {
            Ok(StreamInfo {
                width: 640,
                height: 360,
                duration_secs: 12.9,
            })
        });
        media.expect_thumbnail().returning(|_, _| {
            Err(MediaError::Parse {
                tool: "ffmpeg".into(),
                output: String::new(),
            })
        });
        let dir = tempfile::tempdir().unwrap();
        let thumbs = dir.path().join("work/F001");
        let meta = collect_meta(&media, Path::new("/c/a.mp4"), &thumbs);
        assert!(thumbs.is_dir());
        assert_eq!(meta.duration_secs, 12);
        assert_eq!(meta.width, 640);
        assert!(meta.thumbnail.is_none());

        let mut broken = MockMediaTool::new();
        broken.expect_probe_stream().returning(|_| {
            Err(MediaError::Parse {
                tool: "ffprobe".into(),
                output: String::new(),
            })
        });
        broken.expect_thumbnail().never();
        assert_eq!(
            collect_meta(&broken, Path::new("/c/a.mp4"), &thumbs),
            VideoMeta::default()
        );
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let tool = Ffmpeg::with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let err = tool.probe_duration(Path::new("x.mp4")).unwrap_err();
        assert!(matches!(err, MediaError::Launch { .. }));
    }
}
