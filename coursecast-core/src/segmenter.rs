//! Splits oversized videos into time-based segments that fit the unit ceiling.
//!
//! Decisions are made against 95% of the nominal ceiling: remuxing and
//! keyframe-aligned cuts make segments slightly larger than a byte-proportional
//! split would predict.
//!
//! Segments are written to a caller-chosen output directory, never next to the
//! source, so a later scan of the course folder cannot pick them up.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::SegmentError;
use crate::media::MediaTool;
use crate::model::Split;
use crate::natural_sort::natural_cmp;

pub const SAFETY_MARGIN: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitPlan {
    pub part_count: u64,
    pub segment_secs: f64,
}

pub fn safety_threshold(ceiling: u64) -> u64 {
    (ceiling as f64 * SAFETY_MARGIN) as u64
}

/// True when a file of `size` bytes must be segmented under `ceiling`.
pub fn needs_split(size: u64, ceiling: u64) -> bool {
    size > safety_threshold(ceiling)
}

/// Number of parts and target duration per part, or `None` if the file fits.
pub fn plan_split(size: u64, duration_secs: f64, ceiling: u64) -> Option<SplitPlan> {
    if !needs_split(size, ceiling) {
        return None;
    }
    let threshold = safety_threshold(ceiling).max(1);
    let part_count = size / threshold + 1;
    Some(SplitPlan {
        part_count,
        segment_secs: duration_secs / part_count as f64,
    })
}

/// `<out_dir>/<stem>-part-%1d<ext>`, the pattern handed to the segment muxer.
pub fn segment_pattern(video: &Path, out_dir: &Path) -> PathBuf {
    let (stem, ext) = stem_and_ext(video);
    out_dir.join(format!("{stem}-part-%1d{ext}"))
}

fn stem_and_ext(video: &Path) -> (String, String) {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = video
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// Finds the parts generated for `video` in `out_dir`, in generation order.
pub fn resolve_parts(video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, SegmentError> {
    let (stem, ext) = stem_and_ext(video);
    let pattern = format!(
        "{}-part-*{}",
        glob::Pattern::escape(&out_dir.join(&stem).to_string_lossy()),
        glob::Pattern::escape(&ext)
    );

    let mut parts: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "[SEGMENT] Unreadable match while resolving parts");
                None
            }
        })
        .collect();
    parts.sort_by(|a, b| {
        natural_cmp(
            &a.file_name().unwrap_or_default().to_string_lossy(),
            &b.file_name().unwrap_or_default().to_string_lossy(),
        )
    });
    Ok(parts)
}

/// Returns the video untouched when it fits, otherwise cuts it with `media`
/// into `out_dir`. Leftover parts from an interrupted run are removed first.
pub fn segment_video(
    media: &dyn MediaTool,
    video: &Path,
    ceiling: u64,
    out_dir: &Path,
) -> Result<Split, SegmentError> {
    let size = fs::metadata(video)
        .map_err(|source| SegmentError::Stat {
            path: video.to_path_buf(),
            source,
        })?
        .len();
    if !needs_split(size, ceiling) {
        return Ok(Split::Whole(video.to_path_buf()));
    }

    info!(file = %video.display(), bytes = size, "[SEGMENT] Splitting large video");
    let duration = media
        .probe_duration(video)
        .map_err(|source| SegmentError::Probe {
            path: video.to_path_buf(),
            source,
        })?;
    let plan = plan_split(size, duration, ceiling).ok_or_else(|| SegmentError::NoOutput(video.to_path_buf()))?;

    let prepare_err = |source| SegmentError::Prepare {
        path: out_dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(out_dir).map_err(prepare_err)?;
    for stale in resolve_parts(video, out_dir)? {
        warn!(part = %stale.display(), "[SEGMENT] Removing leftover part");
        fs::remove_file(&stale).map_err(prepare_err)?;
    }

    media
        .segment(video, plan.segment_secs, &segment_pattern(video, out_dir))
        .map_err(|source| SegmentError::Tool {
            path: video.to_path_buf(),
            source,
        })?;

    let parts = resolve_parts(video, out_dir)?;
    if parts.is_empty() {
        return Err(SegmentError::NoOutput(video.to_path_buf()));
    }
    info!(
        file = %video.display(),
        planned = plan.part_count,
        produced = parts.len(),
        "[SEGMENT] Video split"
    );
    Ok(Split::Parts(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use crate::media::MockMediaTool;
    use tempfile::tempdir;

    const GIB2: u64 = 2_147_483_648;

    #[test]
    fn threshold_is_95_percent() {
        assert_eq!(safety_threshold(GIB2), 2_040_109_465);
        assert_eq!(safety_threshold(100), 95);
    }

    #[test]
    fn five_gigabytes_need_three_parts() {
        let plan = plan_split(5_000_000_000, 300.0, GIB2).unwrap();
        assert_eq!(plan.part_count, 3);
        assert!((plan.segment_secs - 100.0).abs() < 1e-9);
    }

    #[test]
    fn files_within_margin_are_not_split() {
        assert!(plan_split(2_040_109_465, 10.0, GIB2).is_none());
        assert!(plan_split(2_040_109_466, 10.0, GIB2).is_some());
        // Over the margin but under the hard ceiling still splits.
        assert_eq!(plan_split(2_100_000_000, 10.0, GIB2).unwrap().part_count, 2);
    }

    #[test]
    fn pattern_uses_dash_part_naming() {
        assert_eq!(
            segment_pattern(Path::new("/c/m/big lesson.mp4"), Path::new("/w/F003")),
            PathBuf::from("/w/F003/big lesson-part-%1d.mp4")
        );
    }

    #[test]
    fn parts_resolve_in_numeric_order() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("clip [1].mkv");
        for i in [0, 1, 2, 10] {
            fs::write(dir.path().join(format!("clip [1]-part-{i}.mkv")), b"x").unwrap();
        }
        fs::write(dir.path().join("clip [1]-part-0.mp4"), b"other ext").unwrap();
        let parts = resolve_parts(&video, dir.path()).unwrap();
        let names: Vec<_> = parts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["clip [1]-part-0.mkv", "clip [1]-part-1.mkv", "clip [1]-part-2.mkv", "clip [1]-part-10.mkv"]
        );
    }

    #[test]
    fn small_video_skips_the_tool() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("a.mp4");
        fs::write(&video, vec![0u8; 90]).unwrap();
        let mut media = MockMediaTool::new();
        media.expect_probe_duration().never();
        media.expect_segment().never();
        let out = dir.path().join("work");
        assert_eq!(segment_video(&media, &video, 100, &out).unwrap(), Split::Whole(video));
        assert!(!out.exists());
    }

    #[test]
    fn large_video_is_cut_into_planned_parts() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("b.mp4");
        fs::write(&video, vec![0u8; 300]).unwrap();

        let mut media = MockMediaTool::new();
        media.expect_probe_duration().returning(|_| Ok(60.0));
        media
            .expect_segment()
            .withf(|_, secs, _| (*secs - 15.0).abs() < 1e-9)
            .returning(|_, _, pattern| {
                let pattern = pattern.to_string_lossy().into_owned();
                for i in 0..4 {
                    fs::write(pattern.replace("%1d", &i.to_string()), b"seg").unwrap();
                }
                Ok(())
            });

        // threshold 95 bytes -> 300 / 95 + 1 = 4 parts of 15s
        let out = dir.path().join("work/F002");
        let split = segment_video(&media, &video, 100, &out).unwrap();
        assert_eq!(split.len(), 4);
        assert_eq!(split.paths()[0], out.join("b-part-0.mp4"));
        assert!(!dir.path().join("b-part-0.mp4").exists());
    }

    #[test]
    fn probe_failure_is_reported() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("c.mp4");
        fs::write(&video, vec![0u8; 300]).unwrap();
        let mut media = MockMediaTool::new();
        media.expect_probe_duration().returning(|_| {
            Err(MediaError::Parse {
                tool: "ffprobe".into(),
                output: "N/A".into(),
            })
        });
        media.expect_segment().never();
        assert!(matches!(
            segment_video(&media, &video, 100, dir.path()),
            Err(SegmentError::Probe { .. })
        ));
    }

    #[test]
    fn tool_success_without_output_is_an_error() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("d.mp4");
        fs::write(&video, vec![0u8; 300]).unwrap();
        let mut media = MockMediaTool::new();
        media.expect_probe_duration().returning(|_| Ok(10.0));
        media.expect_segment().returning(|_, _, _| Ok(()));
        assert!(matches!(
            segment_video(&media, &video, 100, &dir.path().join("out")),
            Err(SegmentError::NoOutput(_))
        ));
    }

    #[test]
    fn leftover_parts_are_replaced() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("e.mp4");
        fs::write(&video, vec![0u8; 300]).unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        // An interrupted run with a different plan left more parts behind.
        for i in 0..6 {
            fs::write(out.join(format!("e-part-{i}.mp4")), b"stale").unwrap();
        }

        let mut media = MockMediaTool::new();
        media.expect_probe_duration().returning(|_| Ok(40.0));
        media.expect_segment().returning(|_, _, pattern| {
            let pattern = pattern.to_string_lossy().into_owned();
            for i in 0..4 {
                fs::write(pattern.replace("%1d", &i.to_string()), b"fresh").unwrap();
            }
            Ok(())
        });

        let split = segment_video(&media, &video, 100, &out).unwrap();
        assert_eq!(split.len(), 4);
        for part in split.paths() {
            assert_eq!(fs::read(part).unwrap(), b"fresh");
        }
        assert!(!out.join("e-part-5.mp4").exists());
    }
}
