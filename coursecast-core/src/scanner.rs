//! Builds a [`Course`] from a folder on disk.
//!
//! Every first-level folder is a module, every video found anywhere below it
//! belongs to that module, and every other file (at the root or inside a
//! module) is an asset destined for the support archive. Both levels are
//! ordered with [`natural_cmp`], and video sequence numbers are handed out in
//! the final per-module order so identifiers are stable between runs.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::ScanError;
use crate::model::{is_video, Course, Module, Video};
use crate::natural_sort::natural_cmp;

pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scan(&self) -> Result<Course, ScanError> {
        let root = self.root.as_path();
        if !root.exists() {
            return Err(ScanError::RootMissing(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let children = list_sorted(root)?;

        let mut modules = Vec::new();
        let mut assets = Vec::new();
        let mut next_sequence: u32 = 1;

        for (name, path) in children {
            if !path.is_dir() {
                debug!(path = %path.display(), "[SCAN] Root asset");
                assets.push(path);
                continue;
            }

            let mut videos = Vec::new();
            walk_module(&name, &path, &mut videos, &mut assets)?;
            if videos.is_empty() {
                debug!(module = %name, "[SCAN] Dropping module without videos");
                continue;
            }

            videos.sort_by(|a: &Video, b: &Video| natural_cmp(&a.file_name, &b.file_name));
            for video in &mut videos {
                video.sequence = next_sequence;
                video.id = Video::id_for(next_sequence);
                next_sequence += 1;
            }
            modules.push(Module { name, videos });
        }

        let course = Course {
            root: root.to_path_buf(),
            name: folder_basename(root),
            modules,
            assets,
        };

        info!(
            course = %course.name,
            modules = course.modules.len(),
            videos = course.video_count(),
            assets = course.assets.len(),
            "[SCAN] Course scanned"
        );
        Ok(course)
    }
}

/// Name used for the course: the last component of its folder.
pub fn folder_basename(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "course".to_string())
}

fn list_sorted(dir: &Path) -> Result<Vec<(String, PathBuf)>, ScanError> {
    let list_err = |source| ScanError::List {
        path: dir.to_path_buf(),
        source,
    };
    let mut children = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        children.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    children.sort_by(|a, b| natural_cmp(&a.0, &b.0));
    Ok(children)
}

fn walk_module(
    module: &str,
    dir: &Path,
    videos: &mut Vec<Video>,
    assets: &mut Vec<PathBuf>,
) -> Result<(), ScanError> {
    let walker = WalkDir::new(dir).sort_by(|a, b| {
        natural_cmp(&a.file_name().to_string_lossy(), &b.file_name().to_string_lossy())
    });

    for entry in walker {
        let entry = entry.map_err(|source| ScanError::Walk {
            module: module.to_string(),
            source,
        })?;
        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }

        let path = entry.path().to_path_buf();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !is_video(&file_name) {
            assets.push(path);
            continue;
        }

        let size = fs::metadata(&path)
            .map_err(|source| ScanError::List {
                path: path.clone(),
                source,
            })?
            .len();
        videos.push(Video {
            path,
            title: file_name.clone(),
            file_name,
            module: module.to_string(),
            sequence: 0,
            id: String::new(),
            size,
            duration_secs: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path, bytes: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![7u8; bytes]).unwrap();
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Scanner::new(dir.path().join("nope")).scan().unwrap_err();
        assert!(matches!(err, ScanError::RootMissing(_)));
    }

    #[test]
    fn file_root_is_an_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.mp4");
        touch(&file, 1);
        let err = Scanner::new(&file).scan().unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }

    #[test]
    fn nested_videos_are_sorted_and_numbered_per_module() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("Module 10/a.mp4"), 3);
        touch(&root.join("Module 2/sub/lesson 10.mp4"), 3);
        touch(&root.join("Module 2/lesson 9.MKV"), 3);
        touch(&root.join("Module 2/notes.txt"), 3);

        let course = Scanner::new(root).scan().unwrap();
        let names: Vec<_> = course.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Module 2", "Module 10"]);

        let first = &course.modules[0].videos;
        assert_eq!(first[0].file_name, "lesson 9.MKV");
        assert_eq!(first[0].id, "F001");
        assert_eq!(first[1].file_name, "lesson 10.mp4");
        assert_eq!(first[1].id, "F002");
        assert_eq!(course.modules[1].videos[0].id, "F003");
        assert_eq!(course.assets, vec![root.join("Module 2/notes.txt")]);
    }
}
