//! Local filesystem implementation of the file seams.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use walkdir::WalkDir;

use super::{FileReader, FileWriter, SaveTarget};
use crate::error::TrzszError;
use crate::protocol::RequestedName;

/// Attempts before giving up on finding a free `name.N`.
const MAX_RENAME_ATTEMPTS: usize = 1000;

fn user_error(what: &str, path: &Path) -> TrzszError {
    TrzszError::User(format!("{what}: {}", path.display()))
}

fn write_error(e: io::Error, path: &Path) -> TrzszError {
    match e.kind() {
        ErrorKind::PermissionDenied => user_error("No permission to write", path),
        ErrorKind::NotFound => user_error("No such file", path),
        _ => TrzszError::Io(e),
    }
}

// ── Reader ───────────────────────────────────────────────────────

/// A file or directory marker on disk, opened on first read.
#[derive(Debug)]
pub struct LocalFileReader {
    path: PathBuf,
    path_id: u32,
    rel_path: Vec<String>,
    is_dir: bool,
    size: u64,
    file: Option<File>,
}

#[async_trait]
impl FileReader for LocalFileReader {
    fn path_id(&self) -> u32 {
        self.path_id
    }

    fn rel_path(&self) -> &[String] {
        &self.rel_path
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.path).await?,
        };
        self.file.insert(file).read(buf).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file = None;
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn check_readable_file(path: &Path) -> Result<u64, TrzszError> {
    let meta = std::fs::metadata(path).map_err(|_| user_error("No such file", path))?;
    if !meta.is_file() {
        return Err(user_error("Not a regular file", path));
    }
    match std::fs::File::open(path) {
        Ok(_) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(user_error("No permission to read", path))
        }
        Err(e) => Err(TrzszError::Io(e)),
    }
}

fn collect_readers(paths: &[PathBuf], directory: bool) -> Result<Vec<LocalFileReader>, TrzszError> {
    let mut readers = Vec::new();
    for (path_id, path) in paths.iter().enumerate() {
        let path_id = u32::try_from(path_id)
            .map_err(|_| TrzszError::User("Too many files".into()))?;
        let path = std::path::absolute(path)?;
        let meta = std::fs::metadata(&path).map_err(|_| user_error("No such file", &path))?;
        let root_name = file_name_of(&path);
        if !meta.is_dir() {
            let size = check_readable_file(&path)?;
            readers.push(LocalFileReader {
                path,
                path_id,
                rel_path: vec![root_name],
                is_dir: false,
                size,
                file: None,
            });
            continue;
        }
        if !directory {
            return Err(user_error("Is a directory", &path));
        }
        for entry in WalkDir::new(&path).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => TrzszError::Io(io),
                None => user_error("Directory loop", &path),
            })?;
            let mut rel_path = vec![root_name.clone()];
            if let Ok(rest) = entry.path().strip_prefix(&path) {
                rel_path.extend(rest.iter().map(|c| c.to_string_lossy().into_owned()));
            }
            let is_dir = entry.file_type().is_dir();
            let size = if is_dir {
                0
            } else {
                check_readable_file(entry.path())?
            };
            readers.push(LocalFileReader {
                path: entry.into_path(),
                path_id,
                rel_path,
                is_dir,
                size,
                file: None,
            });
        }
    }
    debug!(count = readers.len(), "collected files to send");
    Ok(readers)
}

/// Resolve a selection into readers, walking directories when allowed.
///
/// Each directory becomes a marker entry followed by its descendants in
/// name order, all sharing the `path_id` of the top-level selection.
pub async fn check_paths_readable(
    paths: Vec<PathBuf>,
    directory: bool,
) -> Result<Vec<Box<dyn FileReader>>, TrzszError> {
    let readers = tokio::task::spawn_blocking(move || collect_readers(&paths, directory))
        .await
        .map_err(|e| TrzszError::Io(io::Error::other(e)))??;
    Ok(readers
        .into_iter()
        .map(|r| Box::new(r) as Box<dyn FileReader>)
        .collect())
}

// ── Writer ───────────────────────────────────────────────────────

/// A received file or directory on disk.
#[derive(Debug)]
pub struct LocalFileWriter {
    file_name: String,
    local_name: String,
    is_dir: bool,
    file: Option<File>,
}

#[async_trait]
impl FileWriter for LocalFileWriter {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn local_name(&self) -> &str {
        &self.local_name
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.write_all(data).await,
            None => Err(io::Error::other("write to a closed file")),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

// ── Save target ──────────────────────────────────────────────────

/// Saves received entries under one local directory.
#[derive(Debug)]
pub struct LocalSaveTarget {
    root: PathBuf,
    /// Local top-level name chosen for each `path_id` of a directory transfer.
    top_names: HashMap<u32, String>,
}

impl LocalSaveTarget {
    /// Check that `dir` is an existing, writable directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, TrzszError> {
        let root = std::path::absolute(dir.as_ref())?;
        let meta = std::fs::metadata(&root).map_err(|_| user_error("No such directory", &root))?;
        if !meta.is_dir() {
            return Err(user_error("Not a directory", &root));
        }
        if meta.permissions().readonly() {
            return Err(user_error("No permission to write", &root));
        }
        Ok(Self {
            root,
            top_names: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn new_name(&self, name: &str) -> Result<String, TrzszError> {
        if !tokio::fs::try_exists(self.root.join(name)).await? {
            return Ok(name.to_string());
        }
        for i in 0..MAX_RENAME_ATTEMPTS {
            let candidate = format!("{name}.{i}");
            if !tokio::fs::try_exists(self.root.join(&candidate)).await? {
                return Ok(candidate);
            }
        }
        Err(TrzszError::User("Fail to assign new file name".into()))
    }

    async fn create_file(path: &Path) -> Result<File, TrzszError> {
        if tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir()) {
            return Err(user_error("Is a directory", path));
        }
        File::create(path).await.map_err(|e| write_error(e, path))
    }
}

#[async_trait]
impl SaveTarget for LocalSaveTarget {
    fn destination(&self) -> Option<String> {
        Some(self.root.display().to_string())
    }

    async fn open_save_file(
        &mut self,
        name: &RequestedName,
        overwrite: bool,
    ) -> Result<Box<dyn FileWriter>, TrzszError> {
        match name {
            RequestedName::Plain(file_name) => {
                let local_name = if overwrite {
                    file_name.clone()
                } else {
                    self.new_name(file_name).await?
                };
                let file = Self::create_file(&self.root.join(&local_name)).await?;
                Ok(Box::new(LocalFileWriter {
                    file_name: file_name.clone(),
                    local_name,
                    is_dir: false,
                    file: Some(file),
                }))
            }
            RequestedName::Entry(entry) => {
                let local_name = match self.top_names.get(&entry.path_id) {
                    Some(local) => local.clone(),
                    None => {
                        let top = &entry.path_name[0];
                        let local = if overwrite {
                            top.clone()
                        } else {
                            self.new_name(top).await?
                        };
                        self.top_names.insert(entry.path_id, local.clone());
                        local
                    }
                };
                let mut full_path = self.root.join(&local_name);
                full_path.extend(&entry.path_name[1..]);
                let file = if entry.is_dir {
                    if tokio::fs::metadata(&full_path).await.is_ok_and(|m| !m.is_dir()) {
                        return Err(user_error("Not a directory", &full_path));
                    }
                    tokio::fs::create_dir_all(&full_path)
                        .await
                        .map_err(|e| write_error(e, &full_path))?;
                    None
                } else {
                    if let Some(parent) = full_path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| write_error(e, parent))?;
                    }
                    Some(Self::create_file(&full_path).await?)
                };
                Ok(Box::new(LocalFileWriter {
                    file_name: entry.file_name().to_string(),
                    local_name,
                    is_dir: entry.is_dir,
                    file,
                }))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::check_duplicate_names;
    use crate::protocol::NameEntry;

    async fn save(target: &mut LocalSaveTarget, name: &str, overwrite: bool, content: &[u8]) -> String {
        let mut writer = target
            .open_save_file(&RequestedName::Plain(name.into()), overwrite)
            .await
            .unwrap();
        writer.write_chunk(content).await.unwrap();
        writer.close().await.unwrap();
        writer.local_name().to_string()
    }

    #[tokio::test]
    async fn rename_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("save.txt"), b"old").unwrap();
        let mut target = LocalSaveTarget::new(dir.path()).unwrap();

        assert_eq!(save(&mut target, "save.txt", false, b"first").await, "save.txt.0");
        assert_eq!(save(&mut target, "save.txt", false, b"second").await, "save.txt.1");
        assert_eq!(std::fs::read(dir.path().join("save.txt")).unwrap(), b"old");

        assert_eq!(save(&mut target, "save.txt", true, b"new").await, "save.txt");
        assert_eq!(std::fs::read(dir.path().join("save.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn directory_entries_share_top_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("photos")).unwrap();
        let mut target = LocalSaveTarget::new(dir.path()).unwrap();

        let entry = |path: &[&str], is_dir| {
            RequestedName::Entry(NameEntry {
                path_id: 0,
                path_name: path.iter().map(|s| s.to_string()).collect(),
                is_dir,
            })
        };
        let mut marker = target.open_save_file(&entry(&["photos"], true), false).await.unwrap();
        assert_eq!(marker.local_name(), "photos.0");
        assert!(marker.is_dir());
        marker.close().await.unwrap();

        let mut file = target
            .open_save_file(&entry(&["photos", "2024", "a.jpg"], false), false)
            .await
            .unwrap();
        assert_eq!(file.file_name(), "a.jpg");
        assert_eq!(file.local_name(), "photos.0");
        file.write_chunk(b"jpeg").await.unwrap();
        file.close().await.unwrap();

        let saved = dir.path().join("photos.0").join("2024").join("a.jpg");
        assert_eq!(std::fs::read(saved).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn destination_checks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let err = LocalSaveTarget::new(dir.path().join("missing")).unwrap_err();
        assert!(err.to_string().starts_with("No such directory: "));
        let err = LocalSaveTarget::new(&file).unwrap_err();
        assert!(err.to_string().starts_with("Not a directory: "));
    }

    #[tokio::test]
    async fn collect_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("b.txt"), b"bb").unwrap();
        std::fs::write(root.join("sub").join("a.txt"), b"a").unwrap();
        let single = dir.path().join("single.txt");
        std::fs::write(&single, b"single").unwrap();

        let Err(err) = check_paths_readable(vec![root.clone()], false).await else {
            panic!("a directory is not readable without directory mode");
        };
        assert!(err.to_string().starts_with("Is a directory: "));

        let readers = check_paths_readable(vec![single.clone(), root.clone()], true)
            .await
            .unwrap();
        let paths: Vec<(u32, String, bool, u64)> = readers
            .iter()
            .map(|r| (r.path_id(), r.rel_path().join("/"), r.is_dir(), r.size()))
            .collect();
        assert_eq!(
            paths,
            vec![
                (0, "single.txt".into(), false, 6),
                (1, "tree".into(), true, 0),
                (1, "tree/b.txt".into(), false, 2),
                (1, "tree/sub".into(), true, 0),
                (1, "tree/sub/a.txt".into(), false, 1),
            ]
        );
        check_duplicate_names(&readers).unwrap();

        let twice = check_paths_readable(vec![single.clone(), single], false).await.unwrap();
        let err = check_duplicate_names(&twice).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate name: single.txt");
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let Err(err) = check_paths_readable(vec![dir.path().join("nope")], false).await else {
            panic!("missing file was accepted");
        };
        assert!(err.to_string().starts_with("No such file: "));
    }

    #[tokio::test]
    async fn read_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![7u8; 3000]).unwrap();
        let mut readers = check_paths_readable(vec![path], false).await.unwrap();
        let reader = &mut readers[0];
        let mut buf = vec![0u8; 1024];
        let mut total = 0;
        loop {
            let n = reader.read_chunk(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 3000);
        reader.close().await.unwrap();
    }
}
