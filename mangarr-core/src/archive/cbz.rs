//! Zip packaging of page images plus metadata.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::ArchiveError;
use super::comicinfo::COMICINFO_NAME;
use super::naming::page_name;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Streams pages into a staging archive.
///
/// Dropping the writer before [`finish`](Self::finish) deletes the partial
/// file, so an aborted download never leaves a half-written archive behind.
pub struct CbzWriter {
    path: PathBuf,
    zip: Option<ZipWriter<BufWriter<File>>>,
    total: usize,
    written: usize,
}

impl std::fmt::Debug for CbzWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbzWriter")
            .field("path", &self.path)
            .field("total", &self.total)
            .field("written", &self.written)
            .field("open", &self.zip.is_some())
            .finish()
    }
}

impl CbzWriter {
    pub fn create(path: &Path, total_pages: usize) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let file = File::create(path).map_err(io_err(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            zip: Some(ZipWriter::new(BufWriter::new(file))),
            total: total_pages,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pages_written(&self) -> usize {
        self.written
    }

    /// Appends the next page under its padded 1-based name.
    pub fn add_page(&mut self, bytes: &[u8]) -> Result<String, ArchiveError> {
        let name = page_name(self.written, self.total);
        let zip = self.zip.as_mut().ok_or(ArchiveError::Closed)?;
        zip.start_file(name.as_str(), entry_options())?;
        zip.write_all(bytes).map_err(io_err(&self.path))?;
        self.written += 1;
        Ok(name)
    }

    /// Writes `ComicInfo.xml`, closes the archive and flushes it to disk.
    pub fn finish(mut self, comicinfo: &[u8]) -> Result<PathBuf, ArchiveError> {
        let mut zip = self.zip.take().ok_or(ArchiveError::Closed)?;
        let result = (|| -> Result<(), ArchiveError> {
            zip.start_file(COMICINFO_NAME, entry_options())?;
            zip.write_all(comicinfo).map_err(io_err(&self.path))?;
            let writer = zip.finish()?;
            let file = writer
                .into_inner()
                .map_err(|err| io_err(&self.path)(err.into_error()))?;
            file.sync_all().map_err(io_err(&self.path))
        })();

        match result {
            Ok(()) => Ok(self.path.clone()),
            Err(err) => {
                let _ = fs::remove_file(&self.path);
                Err(err)
            }
        }
    }
}

impl Drop for CbzWriter {
    fn drop(&mut self) {
        if self.zip.take().is_some() {
            if let Err(err) = fs::remove_file(&self.path) {
                tracing::debug!(
                    target: "archive",
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove abandoned archive"
                );
            }
        }
    }
}

/// Unpacks every member except `ComicInfo.xml` into `dest` and returns the
/// member names in archive order.
pub fn extract_pages(src: &Path, dest: &Path) -> Result<Vec<String>, ArchiveError> {
    let file = File::open(src).map_err(io_err(src))?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest).map_err(io_err(dest))?;

    let mut members = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.eq_ignore_ascii_case(COMICINFO_NAME) {
            continue;
        }
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(name.clone()))?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut out = File::create(&target).map_err(io_err(&target))?;
        io::copy(&mut entry, &mut out).map_err(io_err(&target))?;
        members.push(name);
    }
    Ok(members)
}

/// Builds a new archive from `members` found under `dir`, followed by the
/// metadata entry.
pub fn build_archive(
    dst: &Path,
    dir: &Path,
    members: &[String],
    comicinfo: &[u8],
) -> Result<PathBuf, ArchiveError> {
    let mut writer = CbzWriter::create(dst, members.len())?;
    {
        let zip = writer.zip.as_mut().ok_or(ArchiveError::Closed)?;
        for name in members {
            let source = dir.join(name);
            let bytes = fs::read(&source).map_err(io_err(&source))?;
            zip.start_file(name.as_str(), entry_options())?;
            zip.write_all(&bytes).map_err(io_err(dst))?;
        }
    }
    writer.written = members.len();
    writer.finish(comicinfo)
}

/// Names of every member, in archive order.
pub fn list_members(src: &Path) -> Result<Vec<String>, ArchiveError> {
    let file = File::open(src).map_err(io_err(src))?;
    let archive = ZipArchive::new(file)?;
    Ok(archive.file_names().map(str::to_string).collect::<Vec<_>>())
}

/// Reads a single member into memory.
pub fn read_member(src: &Path, name: &str) -> Result<Vec<u8>, ArchiveError> {
    let file = File::open(src).map_err(io_err(src))?;
    let mut archive = ZipArchive::new(file)?;
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    io::copy(&mut entry, &mut bytes).map_err(io_err(src))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pages_and_metadata_are_written_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache").join("a.cbz");

        let mut writer = CbzWriter::create(&path, 10).unwrap();
        for page in 0..10u8 {
            writer.add_page(&[page; 4]).unwrap();
        }
        let finished = writer.finish(b"<ComicInfo/>").unwrap();

        let members = list_members(&finished).unwrap();
        let mut expected: Vec<String> =
            (1..=10).map(|i| format!("{i:02}.png")).collect();
        expected.push(COMICINFO_NAME.to_string());
        assert_eq!(members, expected);
        assert_eq!(read_member(&finished, "03.png").unwrap(), vec![2u8; 4]);
    }

    #[test]
    fn dropping_an_unfinished_writer_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.cbz");
        {
            let mut writer = CbzWriter::create(&path, 3).unwrap();
            writer.add_page(b"one").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn rebuild_preserves_pages_and_replaces_metadata() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("orig.cbz");
        let mut writer = CbzWriter::create(&original, 2).unwrap();
        writer.add_page(b"p1").unwrap();
        writer.add_page(b"p2").unwrap();
        writer.finish(b"old").unwrap();

        let work = dir.path().join("work");
        let members = extract_pages(&original, &work).unwrap();
        assert_eq!(members, vec!["1.png", "2.png"]);

        let rebuilt = dir.path().join("new.cbz");
        build_archive(&rebuilt, &work, &members, b"new").unwrap();

        assert_eq!(read_member(&rebuilt, "2.png").unwrap(), b"p2");
        assert_eq!(read_member(&rebuilt, COMICINFO_NAME).unwrap(), b"new");
    }
}
