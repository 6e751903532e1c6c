//! Per-request transient workspaces and their cleanup

use crate::sequence::RenderedFrame;
use crate::{Error, Result};
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MANIFEST_FILE: &str = "filelist.txt";
const OUTPUT_FILE: &str = "output.mp4";

/// Allocates workspaces under one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// A relative `root` is resolved against the current directory here, so
    /// every path handed out (and written into manifests) is absolute.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = match std::path::absolute(&root) {
            Ok(abs) => abs,
            Err(e) => {
                warn!("Cannot resolve temp directory {}: {}", root.display(), e);
                root
            }
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if needed.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::StorageUnavailable(format!(
                "Cannot create temp directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Create a fresh, uniquely named workspace directory.
    pub async fn create_workspace(&self) -> Result<Workspace> {
        self.ensure_root().await?;

        // `create_dir` (not `_all`) so that an existing directory is never reused
        for _ in 0..3 {
            let id = Uuid::new_v4();
            let root_path = self.root.join(format!("vid-{}", id));
            match tokio::fs::create_dir(&root_path).await {
                Ok(()) => {
                    debug!("Created workspace {}", root_path.display());
                    return Ok(Workspace::new(id, root_path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(Error::StorageUnavailable(format!(
                        "Cannot create workspace {}: {}",
                        root_path.display(),
                        e
                    )))
                }
            }
        }
        Err(Error::StorageUnavailable(
            "Could not allocate a unique workspace directory".into(),
        ))
    }

    /// Remove `workspace` from disk. Safe on already (partially) removed workspaces.
    pub async fn destroy_workspace(&self, mut workspace: Workspace) -> Result<()> {
        workspace.destroy().await
    }

    /// Best-effort removal of everything under the root, e.g. workspaces left
    /// behind by a crashed process. Returns the number of entries removed.
    ///
    /// Errors are logged, never returned.
    pub async fn sweep_orphans(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Cannot list temp directory {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error while listing {}: {}", self.root.display(), e);
                    break;
                }
            };
            let path = entry.path();
            let res = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            match res {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Error removing {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Temp files cleaned up ({} entries)", removed);
        }
        removed
    }
}

/// Isolated storage for one video request: frames, manifest and output.
///
/// Owned by exactly one request. The directory is removed by
/// [`Workspace::destroy`], or from `Drop` if the request never got that far.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root_path: PathBuf,
    frames: Vec<PathBuf>,
    manifest_path: PathBuf,
    output_path: PathBuf,
    destroyed: bool,
}

impl Workspace {
    fn new(id: Uuid, root_path: PathBuf) -> Self {
        Self {
            id,
            manifest_path: root_path.join(MANIFEST_FILE),
            output_path: root_path.join(OUTPUT_FILE),
            root_path,
            frames: Vec::new(),
            destroyed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Frame files written so far, in sequence order
    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Path of the frame file for `sequence_index`
    pub fn frame_path(&self, sequence_index: usize) -> PathBuf {
        self.root_path.join(format!("frame{}.png", sequence_index))
    }

    /// Persist `frame` and record its path. Frames must arrive with
    /// contiguous indices starting at 0.
    pub async fn write_frame(&mut self, frame: RenderedFrame) -> Result<PathBuf> {
        if frame.sequence_index != self.frames.len() {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "frame {} written out of order (expected {})",
                    frame.sequence_index,
                    self.frames.len()
                ),
            )));
        }

        let path = self.frame_path(frame.sequence_index);
        tokio::fs::write(&path, &frame.image_bytes).await?;
        self.frames.push(path.clone());
        Ok(path)
    }

    /// Recursively remove the workspace directory.
    ///
    /// Idempotent: content that is already gone is not an error, and calls
    /// after the first successful one do nothing.
    pub async fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.root_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.destroyed = true;
        debug!("Removed workspace {}", self.root_path.display());
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        match std::fs::remove_dir_all(&self.root_path) {
            Ok(()) => debug!("Removed workspace {} on drop", self.root_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove workspace {}: {}",
                self.root_path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn frame(index: usize) -> RenderedFrame {
        RenderedFrame {
            sequence_index: index,
            image_bytes: vec![index as u8; 4],
            source_text: format!("text {}", index),
        }
    }

    #[tokio::test]
    async fn create_and_destroy() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path().join("brat-temp"));

        let mut ws = manager.create_workspace().await.unwrap();
        assert!(ws.root_path().is_dir());
        assert!(ws.root_path().starts_with(manager.root()));

        let path = ws.write_frame(frame(0)).await.unwrap();
        assert_eq!(path, ws.root_path().join("frame0.png"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![0u8; 4]);

        ws.destroy().await.unwrap();
        assert!(!ws.root_path().exists());
        assert!(ws.is_destroyed());

        // Second call is a no-op
        ws.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn destroy_tolerates_partial_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());

        let mut ws = manager.create_workspace().await.unwrap();
        let first = ws.write_frame(frame(0)).await.unwrap();
        ws.write_frame(frame(1)).await.unwrap();
        std::fs::remove_file(first).unwrap();

        let root = ws.root_path().to_path_buf();
        manager.destroy_workspace(ws).await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn destroy_tolerates_full_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());

        let mut ws = manager.create_workspace().await.unwrap();
        std::fs::remove_dir_all(ws.root_path()).unwrap();
        ws.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());

        let mut ws = manager.create_workspace().await.unwrap();
        ws.write_frame(frame(0)).await.unwrap();
        let root = ws.root_path().to_path_buf();
        drop(ws);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn frames_must_be_contiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());

        let mut ws = manager.create_workspace().await.unwrap();
        assert!(ws.write_frame(frame(1)).await.is_err());
        ws.write_frame(frame(0)).await.unwrap();
        assert!(ws.write_frame(frame(0)).await.is_err());
        assert_eq!(ws.frames().len(), 1);
    }

    #[tokio::test]
    async fn workspace_ids_are_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());

        let mut seen = HashSet::new();
        let mut keep = Vec::new();
        for _ in 0..32 {
            let ws = manager.create_workspace().await.unwrap();
            assert!(seen.insert(ws.root_path().to_path_buf()));
            keep.push(ws);
        }
    }

    #[tokio::test]
    async fn unwritable_root_is_storage_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let manager = WorkspaceManager::new(file.join("brat-temp"));
        let res = manager.create_workspace().await;
        assert!(matches!(res, Err(Error::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn sweep_removes_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path().join("brat-temp"));

        let mut a = manager.create_workspace().await.unwrap();
        a.write_frame(frame(0)).await.unwrap();
        let b = manager.create_workspace().await.unwrap();
        std::fs::write(manager.root().join("stray.txt"), b"x").unwrap();

        assert_eq!(manager.sweep_orphans().await, 3);
        assert!(!a.root_path().exists());
        assert!(!b.root_path().exists());

        // The owners' own cleanup still succeeds afterwards
        a.destroy().await.unwrap();
        manager.destroy_workspace(b).await.unwrap();
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let manager = WorkspaceManager::new("brat-temp");
        assert!(manager.root().is_absolute());
        assert_eq!(
            manager.root(),
            std::env::current_dir().unwrap().join("brat-temp")
        );
    }

    #[tokio::test]
    async fn frame_paths_are_absolute() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path().join("brat-temp"));

        let mut ws = manager.create_workspace().await.unwrap();
        let path = ws.write_frame(frame(0)).await.unwrap();
        assert!(path.is_absolute());
        assert!(ws.manifest_path().is_absolute());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn sweep_of_missing_root_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path().join("missing"));
        assert_eq!(manager.sweep_orphans().await, 0);
    }
}
