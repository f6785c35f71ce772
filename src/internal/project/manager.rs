//! Project and file state behind the FileManager and FileExplorer endpoints.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::internal::config::ProjectsConfig;
use crate::internal::message::payload::{DirEntry, FileMetadata, ProjectMetadata};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Not a file: {}", .0.display())]
    NotAFile(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File content plus the modification time it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSnapshot {
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ProjectState {
    active_project: Option<ProjectMetadata>,
    open_files: Vec<FileMetadata>,
    working_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ProjectManager {
    state: RwLock<ProjectState>,
}

impl ProjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ProjectsConfig) -> Self {
        let manager = Self::new();
        if let Some(project) = config.active() {
            tracing::info!(project = %project.name, path = %project.path, "Active project");
            manager.set_active_project(project.clone());
        }
        manager
    }

    fn read(&self) -> RwLockReadGuard<'_, ProjectState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProjectState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active_project(&self) -> Option<ProjectMetadata> {
        self.read().active_project.clone()
    }

    pub fn set_active_project(&self, project: ProjectMetadata) {
        self.write().active_project = Some(project);
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        self.read().working_dir.clone()
    }

    pub fn set_working_dir(&self, path: &str) -> Result<PathBuf, StoreError> {
        let dir = self.resolve(path);
        let metadata = fs::metadata(&dir).map_err(io_error(&dir))?;
        if !metadata.is_dir() {
            return Err(StoreError::NotADirectory(dir));
        }
        self.write().working_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Re-roots the active project at `path`, or starts a project there when
    /// none is active. Open files were relative to the old root and are
    /// dropped.
    pub fn set_project_dir(&self, path: &str) -> Result<PathBuf, StoreError> {
        let dir = self.resolve(path);
        let metadata = fs::metadata(&dir).map_err(io_error(&dir))?;
        if !metadata.is_dir() {
            return Err(StoreError::NotADirectory(dir));
        }

        let root = dir.to_string_lossy().into_owned();
        let mut state = self.write();
        match state.active_project.as_mut() {
            Some(project) => project.path = root,
            None => {
                state.active_project = Some(ProjectMetadata {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: dir
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| root.clone()),
                    path: root,
                })
            }
        }
        state.open_files.clear();
        Ok(dir)
    }

    /// Relative paths are taken from the active project, else the working
    /// directory, else the process directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        let state = self.read();
        match (&state.active_project, &state.working_dir) {
            (Some(project), _) => Path::new(&project.path).join(candidate),
            (None, Some(dir)) => dir.join(candidate),
            (None, None) => candidate.to_path_buf(),
        }
    }

    /// Directories first, then files, each sorted by name.
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        let dir = self.resolve(path);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
            let entry = entry.map_err(io_error(&dir))?;
            let metadata = entry.metadata().map_err(io_error(&entry.path()))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: join_display(path, &entry.file_name().to_string_lossy()),
                is_file: metadata.is_file(),
                timestamp: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        entries.sort_by(|a, b| a.is_file.cmp(&b.is_file).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Returns `None` when the file has not been modified after `since`.
    pub fn read_file(
        &self,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<FileSnapshot>, StoreError> {
        let file = self.resolve(path);
        let timestamp = modified_at(&file)?;
        if let (Some(since), Some(modified)) = (since, timestamp) {
            if modified <= since {
                return Ok(None);
            }
        }
        let content = fs::read_to_string(&file).map_err(io_error(&file))?;
        Ok(Some(FileSnapshot { content, timestamp }))
    }

    pub fn save_file(&self, path: &str, content: &str) -> Result<FileMetadata, StoreError> {
        let file = self.resolve(path);
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&file, content).map_err(io_error(&file))?;
        Ok(self.file_metadata(path, &file))
    }

    /// Stores editor state for `path` beside it, in `.<name>.state.json`.
    pub fn save_state(&self, path: &str, state: &str) -> Result<FileMetadata, StoreError> {
        self.save_file(&state_display(path), state)
    }

    pub fn open_file(&self, path: &str) -> Result<Vec<FileMetadata>, StoreError> {
        let file = self.resolve(path);
        let metadata = fs::metadata(&file).map_err(io_error(&file))?;
        if metadata.is_dir() {
            return Err(StoreError::NotAFile(file));
        }

        let entry = self.file_metadata(path, &file);
        let mut state = self.write();
        if !state.open_files.iter().any(|open| open.path == entry.path) {
            state.open_files.push(entry);
        }
        Ok(state.open_files.clone())
    }

    pub fn close_file(&self, path: &str) -> Vec<FileMetadata> {
        let mut state = self.write();
        state.open_files.retain(|open| open.path != path);
        state.open_files.clone()
    }

    pub fn open_files(&self) -> Vec<FileMetadata> {
        self.read().open_files.clone()
    }

    pub fn create_file(&self, path: &str) -> Result<(), StoreError> {
        let file = self.resolve(path);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file)
            .map_err(io_error(&file))?;
        Ok(())
    }

    pub fn create_dir(&self, path: &str) -> Result<(), StoreError> {
        let dir = self.resolve(path);
        fs::create_dir_all(&dir).map_err(io_error(&dir))
    }

    pub fn delete(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path);
        let metadata = fs::symlink_metadata(&target).map_err(io_error(&target))?;
        if metadata.is_dir() {
            fs::remove_dir_all(&target).map_err(io_error(&target))?;
        } else {
            fs::remove_file(&target).map_err(io_error(&target))?;
        }
        self.write().open_files.retain(|open| open.path != path);
        Ok(())
    }

    fn file_metadata(&self, path: &str, resolved: &Path) -> FileMetadata {
        FileMetadata {
            path: path.to_string(),
            name: resolved
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string()),
            timestamp: modified_at(resolved).ok().flatten(),
        }
    }
}

fn modified_at(path: &Path) -> Result<Option<DateTime<Utc>>, StoreError> {
    let metadata = fs::metadata(path).map_err(io_error(path))?;
    Ok(metadata.modified().ok().map(DateTime::<Utc>::from))
}

/// Child path in the same form the caller used for the parent.
fn join_display(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "." {
        name.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// State file companion of `path`, in the caller's form.
pub fn state_display(path: &str) -> String {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some((parent, name)) => format!("{}/.{}.state.json", parent, name),
        None => format!(".{}.state.json", path),
    }
}

/// Parent of `path` in the caller's form; `"."` for top-level entries.
pub fn parent_display(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => ".".to_string(),
    }
}
