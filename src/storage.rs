// Artifact Store capability: persists raw captures and composed strips

use async_trait::async_trait;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::compositor::encode_png;
use crate::errors::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A single raw frame from the camera.
    Capture,
    /// A composed, printable strip.
    Strip,
}

impl ArtifactKind {
    fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Capture => "photo",
            ArtifactKind::Strip => "final",
        }
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes the image as PNG and returns the location it was saved to.
    async fn save(&self, image: &RgbaImage, kind: ArtifactKind) -> Result<PathBuf, StorageError>;
}

/// Stores artifacts as PNG files: captures under `photos_dir`, strips under
/// `output_dir`.
pub struct FsArtifactStore {
    photos_dir: PathBuf,
    output_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(photos_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            photos_dir: photos_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn dir_for(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Capture => &self.photos_dir,
            ArtifactKind::Strip => &self.output_dir,
        }
    }

    pub async fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [&self.photos_dir, &self.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|_| StorageError::CreateDirectoryFailed {
                    path: dir.display().to_string(),
                })?;
        }
        Ok(())
    }
}

fn file_name(kind: ArtifactKind) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.png",
        kind.prefix(),
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        &id[..8]
    )
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, image: &RgbaImage, kind: ArtifactKind) -> Result<PathBuf, StorageError> {
        let dir = self.dir_for(kind);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|_| StorageError::CreateDirectoryFailed {
                path: dir.display().to_string(),
            })?;

        let image = image.clone();
        let png = tokio::task::spawn_blocking(move || encode_png(&image))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let path = dir.join(file_name(kind));
        tokio::fs::write(&path, &png).await?;

        // readable by the print spooler
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        info!("Saved {:?} artifact to {}", kind, path.display());
        Ok(path)
    }
}
