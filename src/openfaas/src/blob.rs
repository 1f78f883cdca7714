use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::OnboardingError;

/// Blob storage split into a temporary upload container and a permanent one.
pub trait BlobStore: Send + Sync {
    /// (width, height) of an uploaded image
    fn dimensions(&self, blob_name: &str) -> Result<(u32, u32), OnboardingError>;

    /// Copy an uploaded blob into permanent storage under a new name.
    fn copy_blob(&self, source_name: &str, dest_name: &str) -> Result<(), OnboardingError>;

    fn permanent_url(&self, dest_name: &str) -> String;
}

/// Blob containers mounted as local directories.
pub struct LocalBlobStore {
    source_dir: PathBuf,
    destination_dir: PathBuf,
    destination_url: String,
}

fn storage_error(path: &Path, source: std::io::Error) -> OnboardingError {
    OnboardingError::Storage {
        path: path.to_path_buf(),
        source,
    }
}

impl LocalBlobStore {
    pub fn new(
        source_dir: &Path,
        destination_dir: &Path,
        destination_url: &str,
    ) -> Result<Self, OnboardingError> {
        for dir in [source_dir, destination_dir] {
            if !dir.is_dir() {
                return Err(storage_error(
                    dir,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "container directory missing"),
                ));
            }
        }

        Ok(LocalBlobStore {
            source_dir: source_dir.to_path_buf(),
            destination_dir: destination_dir.to_path_buf(),
            destination_url: destination_url.trim_end_matches('/').to_owned(),
        })
    }

    fn source_blob(&self, name: &str) -> Result<PathBuf, OnboardingError> {
        let path = self.source_dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(OnboardingError::UnknownBlob(name.to_owned()))
        }
    }
}

impl BlobStore for LocalBlobStore {
    fn dimensions(&self, blob_name: &str) -> Result<(u32, u32), OnboardingError> {
        let path = self.source_blob(blob_name)?;
        image::image_dimensions(&path).map_err(|e| OnboardingError::InvalidImage {
            name: blob_name.to_owned(),
            reason: e.to_string(),
        })
    }

    fn copy_blob(&self, source_name: &str, dest_name: &str) -> Result<(), OnboardingError> {
        let source = self.source_blob(source_name)?;
        let dest = self.destination_dir.join(dest_name);
        debug!("Copying {} to {}", source.display(), dest.display());

        fs::copy(&source, &dest).map_err(|e| storage_error(&dest, e))?;
        Ok(())
    }

    fn permanent_url(&self, dest_name: &str) -> String {
        format!("{}/{}", self.destination_url, dest_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn copies_between_containers() {
        let tmp = tempfile::tempdir().unwrap();
        let perm = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(12, 7, Rgb([1, 2, 3]))
            .save(tmp.path().join("dog.png"))
            .unwrap();

        let store = LocalBlobStore::new(tmp.path(), perm.path(), "http://blobs/perm/").unwrap();
        assert_eq!(store.dimensions("dog.png").unwrap(), (12, 7));

        store.copy_blob("dog.png", "5.png").unwrap();
        assert_eq!(
            fs::read(perm.path().join("5.png")).unwrap(),
            fs::read(tmp.path().join("dog.png")).unwrap()
        );
        assert_eq!(store.permanent_url("5.png"), "http://blobs/perm/5.png");
    }

    #[test]
    fn unknown_blob_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(tmp.path(), tmp.path(), "http://blobs").unwrap();

        assert!(matches!(
            store.dimensions("missing.jpg"),
            Err(OnboardingError::UnknownBlob(name)) if name == "missing.jpg"
        ));
    }

    #[test]
    fn missing_container_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(LocalBlobStore::new(&tmp.path().join("nope"), tmp.path(), "http://blobs").is_err());
    }
}
