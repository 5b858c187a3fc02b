//! Bundles the loose support files of a course into one deflate zip archive.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PackageError;

pub struct AssetPackager {
    root: PathBuf,
}

impl AssetPackager {
    /// `root` is the folder entry names are made relative to.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive entry name for `path`: relative to the root with `/` separators,
    /// or just the file name when the path lies outside the root.
    pub fn entry_name(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        }
    }

    /// Writes `assets` into a new archive at `dest`, streaming each file.
    ///
    /// Returns `Ok(None)` without touching the filesystem when there is nothing to pack.
    /// On failure no partial archive is left at `dest`.
    pub fn package(&self, assets: &[PathBuf], dest: &Path) -> Result<Option<PathBuf>, PackageError> {
        if assets.is_empty() {
            return Ok(None);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| PackageError::Create {
                path: dest.to_path_buf(),
                source,
            })?;
        }
        if let Err(e) = self.write_archive(assets, dest) {
            let _ = fs::remove_file(dest);
            return Err(e);
        }

        info!(archive = %dest.display(), entries = assets.len(), "[PACK] Archive written");
        Ok(Some(dest.to_path_buf()))
    }

    fn write_archive(&self, assets: &[PathBuf], dest: &Path) -> Result<(), PackageError> {
        let create_err = |source| PackageError::Create {
            path: dest.to_path_buf(),
            source,
        };
        let file = File::create(dest).map_err(create_err)?;
        let mut zip = ZipWriter::new(file);

        for asset in assets {
            let read_err = |source| PackageError::Read {
                path: asset.clone(),
                source,
            };
            let mut src = File::open(asset).map_err(read_err)?;
            let size = src.metadata().map_err(read_err)?.len();
            let name = self.entry_name(asset);
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(size >= u32::MAX as u64);

            zip.start_file(name.as_str(), options)
                .map_err(|source| PackageError::Zip {
                    path: asset.clone(),
                    source,
                })?;
            copy_entry(&mut src, &mut zip, asset, dest)?;
            debug!(entry = %name, bytes = size, "[PACK] Added asset");
        }

        let file = zip.finish().map_err(|source| PackageError::Zip {
            path: dest.to_path_buf(),
            source,
        })?;
        file.sync_all().map_err(create_err)
    }
}

/// Streams `src` into `dst`, blaming read failures on `asset` and write
/// failures on the archive at `dest`.
fn copy_entry(src: &mut impl Read, dst: &mut impl Write, asset: &Path, dest: &Path) -> Result<u64, PackageError> {
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(PackageError::Read {
                    path: asset.to_path_buf(),
                    source,
                })
            }
        };
        dst.write_all(&buf[..n]).map_err(|source| PackageError::Create {
            path: dest.to_path_buf(),
            source,
        })?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WriteZero, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_asset_list_writes_nothing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out/Files.zip");
        let packed = AssetPackager::new(dir.path()).package(&[], &dest).unwrap();
        assert!(packed.is_none());
        assert!(!dest.exists());
    }

    #[test]
    fn entries_keep_relative_paths() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("course");
        fs::create_dir_all(root.join("Module 1/docs")).unwrap();
        fs::write(root.join("slides.pdf"), b"pdf bytes").unwrap();
        fs::write(root.join("Module 1/docs/notes.txt"), b"some notes").unwrap();

        let dest = dir.path().join("work/Files.zip");
        let assets = vec![root.join("slides.pdf"), root.join("Module 1/docs/notes.txt")];
        AssetPackager::new(&root).package(&assets, &dest).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(String::from).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"slides.pdf".to_string()));
        assert!(names.contains(&"Module 1/docs/notes.txt".to_string()));

        let mut entry = archive.by_name("Module 1/docs/notes.txt").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        assert_eq!(text, "some notes");
    }

    #[test]
    fn outside_root_falls_back_to_file_name() {
        let packager = AssetPackager::new("/courses/rust");
        assert_eq!(packager.entry_name(Path::new("/elsewhere/cover.jpg")), "cover.jpg");
        assert_eq!(packager.entry_name(Path::new("/courses/rust/a/b.txt")), "a/b.txt");
    }

    #[test]
    fn missing_asset_is_reported() {
        let dir = tempdir().unwrap();
        let err = AssetPackager::new(dir.path())
            .package(&[dir.path().join("gone.pdf")], &dir.path().join("Files.zip"))
            .unwrap_err();
        assert!(matches!(err, PackageError::Read { .. }));
    }

    #[test]
    fn failure_after_first_entry_leaves_no_archive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), b"first").unwrap();
        let dest = dir.path().join("work/Files.zip");

        let err = AssetPackager::new(dir.path())
            .package(&[dir.path().join("a.pdf"), dir.path().join("gone.pdf")], &dest)
            .unwrap_err();
        assert!(matches!(err, PackageError::Read { ref path, .. } if path.ends_with("gone.pdf")));
        assert!(!dest.exists());
    }

    #[test]
    fn write_failures_blame_the_archive() {
        let mut src: &[u8] = b"asset bytes";
        let err = copy_entry(&mut src, &mut FullDisk, Path::new("/c/a.pdf"), Path::new("/w/Files.zip")).unwrap_err();
        match err {
            PackageError::Create { path, source } => {
                assert_eq!(path, Path::new("/w/Files.zip"));
                assert_eq!(source.kind(), io::ErrorKind::WriteZero);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
