//! Domain model for a scanned course and the units it is delivered in.

use std::path::{Path, PathBuf};

/// Hard per-unit size ceiling shared by the archive chunker and the video segmenter.
pub const MAX_UNIT_SIZE: u64 = 2 * 1024 * 1024 * 1024;
/// Prefix of video identifiers, e.g. `F001`.
pub const VIDEO_TAG: &str = "F";
/// Prefix of archive part tags, e.g. `Doc001`.
pub const DOC_TAG: &str = "Doc";

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "avi", "mov", "webm"];

/// A course folder: modules of videos plus loose support files.
#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub root: PathBuf,
    pub name: String,
    pub modules: Vec<Module>,
    /// Non-video files, in scan order.
    pub assets: Vec<PathBuf>,
}

impl Course {
    pub fn video_count(&self) -> usize {
        self.modules.iter().map(|m| m.videos.len()).sum()
    }

    pub fn videos(&self) -> impl Iterator<Item = &Video> {
        self.modules.iter().flat_map(|m| m.videos.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() && self.video_count() == 0
    }
}

/// A first-level folder of the course holding at least one video.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub videos: Vec<Video>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub path: PathBuf,
    pub file_name: String,
    /// Raw title; the extension is stripped when captions are rendered.
    pub title: String,
    pub module: String,
    /// Position in the whole course, starting at 1.
    pub sequence: u32,
    pub id: String,
    pub size: u64,
    /// Filled by the delivery metadata step, `None` straight after a scan.
    pub duration_secs: Option<u64>,
}

impl Video {
    pub fn id_for(sequence: u32) -> String {
        format!("{}{:03}", VIDEO_TAG, sequence)
    }
}

pub fn is_video(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Result of splitting a file: either the untouched input or the generated parts.
#[derive(Debug, Clone, PartialEq)]
pub enum Split {
    Whole(PathBuf),
    Parts(Vec<PathBuf>),
}

impl Split {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Split::Whole(p) => vec![p.as_path()],
            Split::Parts(parts) => parts.iter().map(PathBuf::as_path).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Split::Whole(_) => 1,
            Split::Parts(parts) => parts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turns the split into transfer units. Generated parts are always
    /// disposable; the whole file is disposable only when the caller says so.
    pub fn into_units(self, whole_is_disposable: bool) -> Vec<TransferUnit> {
        match self {
            Split::Whole(path) => vec![TransferUnit {
                path,
                disposable: whole_is_disposable,
                index: 1,
                count: 1,
            }],
            Split::Parts(parts) => {
                let count = parts.len();
                parts
                    .into_iter()
                    .enumerate()
                    .map(|(i, path)| TransferUnit {
                        path,
                        disposable: true,
                        index: i + 1,
                        count,
                    })
                    .collect()
            }
        }
    }
}

/// The smallest thing delivered end to end: a whole file or one part of a split.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferUnit {
    pub path: PathBuf,
    /// Generated artifact that may be deleted once delivered.
    pub disposable: bool,
    /// 1-based position within its split.
    pub index: usize,
    pub count: usize,
}

impl TransferUnit {
    pub fn ledger_key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.ledger_key())
    }

    pub fn is_split(&self) -> bool {
        self.count > 1
    }
}
