use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("Path \"{0}\" escapes the upload directory")]
    InvalidPath(String),
    #[error("File is larger than {} bytes", MAX_UPLOAD_SIZE)]
    TooLarge,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The largest upload accepted, in bytes
pub const MAX_UPLOAD_SIZE: usize = 1024 * 1024 * 1024;

/// Where uploads are written while they are still arriving, relative to the upload directory
pub const SPOOL_DIR: &str = ".spool";

/// The content type of a playable video file, judged by its extension.
/// Anything else is refused on upload.
pub fn mime_for_path(path: &str) -> Option<&'static str> {
    let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();

    match extension.as_str() {
        "mp4" => Some("video/mp4"),
        "avi" => Some("video/x-msvideo"),
        "mov" => Some("video/quicktime"),
        "mkv" => Some("video/x-matroska"),
        "webm" => Some("video/webm"),
        _ => None,
    }
}

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9._-]").unwrap();
}

/// Reduces a client supplied file name to a safe single path segment
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned = UNSAFE_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// An upload that has been written to a scratch file on disk.
///
/// The scratch file is removed on drop, unless a store moved it away first.
#[derive(Debug)]
pub struct SpooledFile {
    path: PathBuf,
    size: u64,
}

impl SpooledFile {
    /// Starts a new scratch file in `dir`
    pub async fn create(dir: &Path) -> Result<SpoolWriter, FileError> {
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(Uuid::new_v4().simple().to_string());
        let file = File::create(&path).await?;

        Ok(SpoolWriter {
            file,
            spooled: Self { path, size: 0 },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for SpooledFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Appends chunks to a [SpooledFile] as they arrive
pub struct SpoolWriter {
    file: File,
    spooled: SpooledFile,
}

impl SpoolWriter {
    /// Fails once the file would grow past [MAX_UPLOAD_SIZE]
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), FileError> {
        let size = self.spooled.size + chunk.len() as u64;

        if size > MAX_UPLOAD_SIZE as u64 {
            return Err(FileError::TooLarge);
        }

        self.file.write_all(chunk).await?;
        self.spooled.size = size;

        Ok(())
    }

    pub async fn finish(self) -> Result<SpooledFile, FileError> {
        let Self { mut file, spooled } = self;
        file.flush().await?;

        Ok(spooled)
    }
}

/// Durable storage for uploaded media. Paths are relative to the store root.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Moves a spooled upload into the store
    async fn save(&self, relative: &str, upload: &SpooledFile) -> Result<(), FileError>;
    /// Deleting a file that doesn't exist succeeds
    async fn delete(&self, relative: &str) -> Result<(), FileError>;
}

/// Stores files on the local disk
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins `relative` onto the root, refusing anything that could leave it
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, FileError> {
        let path = Path::new(relative);

        let is_plain = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        if relative.is_empty() || !is_plain {
            return Err(FileError::InvalidPath(relative.to_string()));
        }

        Ok(self.root.join(path))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, relative: &str, upload: &SpooledFile) -> Result<(), FileError> {
        let path = self.resolve(relative)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // The spool usually sits on the same disk. Copy when it doesn't.
        if tokio::fs::rename(upload.path(), &path).await.is_err() {
            tokio::fs::copy(upload.path(), &path).await?;
        }

        Ok(())
    }

    async fn delete(&self, relative: &str) -> Result<(), FileError> {
        let path = self.resolve(relative)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Drop the per-session directory once it's empty. This fails while other files remain.
        if let Some(parent) = path.parent().filter(|p| *p != self.root) {
            let _ = tokio::fs::remove_dir(parent).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn save_and_delete_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());

        let mut writer = SpooledFile::create(&dir.path().join(SPOOL_DIR)).await.unwrap();
        writer.write(b"frames").await.unwrap();
        let upload = writer.finish().await.unwrap();

        store.save("temp/abc/movie.mp4", &upload).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("temp/abc/movie.mp4")).unwrap(), b"frames");
        assert!(!upload.path().exists(), "the spooled file was moved");

        store.delete("temp/abc/movie.mp4").await.unwrap();
        store
            .delete("temp/abc/movie.mp4")
            .await
            .expect("deleting twice succeeds");

        assert!(!dir.path().join("temp/abc").exists(), "empty session dir is removed");
    }

    #[test]
    fn video_mime_types() {
        assert_eq!(mime_for_path("temp/a/MOVIE.MKV"), Some("video/x-matroska"));
        assert_eq!(mime_for_path("clip.webm"), Some("video/webm"));
        assert_eq!(mime_for_path("notes.txt"), None);
        assert_eq!(mime_for_path("no_extension"), None);
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\videos\\my movie.mp4"), "my_movie.mp4");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(".hidden.mov"), "hidden.mov");
    }

    #[tokio::test]
    async fn spooled_files_are_removed_when_dropped() {
        let dir = tempfile::tempdir().unwrap();

        let mut writer = SpooledFile::create(dir.path()).await.unwrap();
        writer.write(b"half an upload").await.unwrap();
        let upload = writer.finish().await.unwrap();

        let path = upload.path().to_path_buf();
        assert_eq!(upload.size(), 14);
        assert!(path.exists());

        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn rejects_escaping_paths() {
        let store = LocalFileStore::new("/srv/uploads");

        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("temp/../../x").is_err());
        assert!(store.resolve("").is_err());
        assert_eq!(
            store.resolve("temp/a.mp4").unwrap(),
            PathBuf::from("/srv/uploads/temp/a.mp4")
        );
    }
}
