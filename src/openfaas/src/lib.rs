//! Onboarding function: registers freshly uploaded images and moves their
//! blobs from temporary to permanent storage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hyper::body::{Bytes, HttpBody};
use hyper::Body;
use log::{error, info};
use serde::Deserialize;
use tag_pipeline::Timer;
use thiserror::Error;

pub mod blob;
pub mod config;
pub mod registry;

pub use blob::{BlobStore, LocalBlobStore};
pub use config::OnboardingConfig;
pub use registry::{ImageInfo, ImageRegistry, PgRegistry};

/// Largest request body the function buffers.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub const SUCCESS_PREFIX: &str =
    "The following images should now be added to the DB and exist in permanent blob storage: ";

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("Unable to decode POST body")]
    MalformedBody,

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Image '{0}' was not found in temporary storage")]
    UnknownBlob(String),

    #[error("Image '{name}' could not be read: {reason}")]
    InvalidImage { name: String, reason: String },

    #[error("missing environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("blob storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl OnboardingError {
    /// HTTP status reported to the caller.
    pub fn status(&self) -> u16 {
        match self {
            OnboardingError::MalformedBody
            | OnboardingError::InvalidRequest(_)
            | OnboardingError::UnknownBlob(_)
            | OnboardingError::InvalidImage { .. } => 400,
            OnboardingError::BodyTooLarge(_) => 413,
            OnboardingError::MissingEnv(_)
            | OnboardingError::Database(_)
            | OnboardingError::Storage { .. } => 500,
        }
    }
}

#[derive(Deserialize)]
struct OnboardingRequest {
    #[serde(rename = "imageUrls")]
    image_urls: Vec<String>,
}

/// Buffer a request body, refusing anything over `limit` bytes.
pub async fn read_body(mut body: Body, limit: usize) -> Result<Bytes, OnboardingError> {
    if body.size_hint().upper().map_or(false, |upper| upper > limit as u64) {
        return Err(OnboardingError::BodyTooLarge(limit));
    }

    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| {
            error!("Failed to read request body: {}", e);
            OnboardingError::MalformedBody
        })?;
        if buf.len() + chunk.len() > limit {
            return Err(OnboardingError::BodyTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buf))
}

/// Decode `{"imageUrls": [...]}`, rejecting empty lists and repeated URLs.
pub fn parse_request(body: &[u8]) -> Result<Vec<String>, OnboardingError> {
    let request: OnboardingRequest =
        serde_json::from_slice(body).map_err(|_| OnboardingError::MalformedBody)?;

    if request.image_urls.is_empty() {
        return Err(OnboardingError::InvalidRequest("imageUrls is empty".to_owned()));
    }

    let mut seen = HashSet::new();
    for url in &request.image_urls {
        if !seen.insert(url.as_str()) {
            return Err(OnboardingError::InvalidRequest(format!(
                "'{}' is listed more than once",
                url
            )));
        }
    }

    Ok(request.image_urls)
}

/// Blob name of an uploaded image: the last path segment of its URL.
pub fn blob_name(url: &str) -> Result<&str, OnboardingError> {
    let name = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return Err(OnboardingError::InvalidRequest(format!(
            "'{}' does not name an image",
            url
        )));
    }

    Ok(name)
}

/// Permanent blob name: the image id with the original extension.
pub fn permanent_blob_name(image_id: i32, original_name: &str) -> String {
    match Path::new(original_name).extension() {
        Some(ext) => format!("{}.{}", image_id, ext.to_string_lossy()),
        None => image_id.to_string(),
    }
}

pub struct Reply {
    pub status: u16,
    pub body: String,
}

pub struct Onboarding<R, B> {
    registry: R,
    blobs: B,
    user_name: String,
}

impl<R: ImageRegistry, B: BlobStore> Onboarding<R, B> {
    pub fn new(registry: R, blobs: B, user_name: &str) -> Self {
        Onboarding {
            registry,
            blobs,
            user_name: user_name.to_owned(),
        }
    }

    pub async fn handle(&self, body: &[u8]) -> Reply {
        match self.onboard(body).await {
            Ok(urls) => Reply {
                status: 200,
                body: format!("{}{}", SUCCESS_PREFIX, urls.join(", ")),
            },
            Err(err) => {
                error!("Onboarding failed: {}", err);
                Reply {
                    status: err.status(),
                    body: err.to_string(),
                }
            }
        }
    }

    /// Register every image in `body` and return their permanent URLs.
    pub async fn onboard(&self, body: &[u8]) -> Result<Vec<String>, OnboardingError> {
        let urls = parse_request(body)?;
        let mut timer = Timer::start_new("onboarding");

        let mut images = Vec::with_capacity(urls.len());
        for url in &urls {
            let name = blob_name(url)?;
            let (width, height) = self.blobs.dimensions(name)?;
            images.push(ImageInfo {
                original_name: name.to_owned(),
                url: url.clone(),
                height,
                width,
            });
        }

        let user_id = self.registry.create_user(&self.user_name).await?;
        info!("The user id for '{}' is {}", self.user_name, user_id);

        let ids = self.registry.add_new_images(&images, user_id).await?;

        let mut permanent = Vec::with_capacity(ids.len());
        let mut updates = Vec::with_capacity(ids.len());
        for (url, image_id) in ids {
            let name = blob_name(&url)?;
            let new_name = permanent_blob_name(image_id, name);

            info!("Copying {} (image {}) to {}", url, image_id, new_name);
            self.blobs.copy_blob(name, &new_name)?;

            let permanent_url = self.blobs.permanent_url(&new_name);
            permanent.push(permanent_url.clone());
            updates.push((image_id, permanent_url));
        }

        self.registry.update_image_urls(&updates, user_id).await?;
        timer.stop();
        info!("Onboarded {} images", permanent.len());

        Ok(permanent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRegistry {
        users: Mutex<Vec<String>>,
        images: Mutex<Vec<ImageInfo>>,
        locations: Mutex<Vec<(i32, String)>>,
    }

    #[async_trait]
    impl ImageRegistry for MemoryRegistry {
        async fn create_user(&self, user_name: &str) -> Result<i32, OnboardingError> {
            let mut users = self.users.lock().unwrap();
            let idx = match users.iter().position(|u| u == user_name) {
                Some(idx) => idx,
                None => {
                    users.push(user_name.to_owned());
                    users.len() - 1
                }
            };
            Ok(idx as i32 + 1)
        }

        async fn add_new_images(
            &self,
            images: &[ImageInfo],
            _user_id: i32,
        ) -> Result<Vec<(String, i32)>, OnboardingError> {
            let mut stored = self.images.lock().unwrap();
            let mut ids = Vec::new();
            for image in images {
                stored.push(image.clone());
                ids.push((image.url.clone(), stored.len() as i32));
            }
            Ok(ids)
        }

        async fn update_image_urls(
            &self,
            urls: &[(i32, String)],
            _user_id: i32,
        ) -> Result<(), OnboardingError> {
            self.locations.lock().unwrap().extend_from_slice(urls);
            Ok(())
        }
    }

    struct Fixture {
        tmp: tempfile::TempDir,
        perm: tempfile::TempDir,
        onboarding: Onboarding<MemoryRegistry, LocalBlobStore>,
    }

    fn fixture(uploads: &[(&str, u32, u32)]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let perm = tempfile::tempdir().unwrap();
        for (name, width, height) in uploads {
            RgbImage::from_pixel(*width, *height, Rgb([9, 9, 9]))
                .save(tmp.path().join(name))
                .unwrap();
        }

        let blobs = LocalBlobStore::new(tmp.path(), perm.path(), "http://store/perm").unwrap();
        let onboarding = Onboarding::new(MemoryRegistry::default(), blobs, "tester");
        Fixture {
            tmp,
            perm,
            onboarding,
        }
    }

    #[test]
    fn blob_names_come_from_the_last_segment() {
        assert_eq!(blob_name("http://host/tmp/dog.jpg").unwrap(), "dog.jpg");
        assert_eq!(blob_name("dog.jpg").unwrap(), "dog.jpg");
        assert!(blob_name("http://host/tmp/..").is_err());
        assert!(blob_name("").is_err());
        assert_eq!(permanent_blob_name(7, "dog.JPG"), "7.JPG");
        assert_eq!(permanent_blob_name(7, "dog"), "7");
    }

    #[test]
    fn bad_bodies_are_client_errors() {
        for body in [&b"not json"[..], &b"{}"[..], &br#"{"imageUrls": "x"}"#[..]] {
            let err = parse_request(body).unwrap_err();
            assert!(matches!(err, OnboardingError::MalformedBody));
            assert_eq!(err.status(), 400);
        }
        assert!(matches!(
            parse_request(br#"{"imageUrls": []}"#),
            Err(OnboardingError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_request(br#"{"imageUrls": ["a.jpg", "a.jpg"]}"#),
            Err(OnboardingError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn each_image_is_copied_under_its_own_id() {
        let f = fixture(&[("dog.jpg", 10, 5), ("cat.png", 4, 8)]);
        let body = br#"{"imageUrls": ["http://store/tmp/dog.jpg", "http://store/tmp/cat.png"]}"#;

        let reply = f.onboarding.handle(body).await;
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.body,
            format!("{}http://store/perm/1.jpg, http://store/perm/2.png", SUCCESS_PREFIX)
        );

        // each copy is of its own source, not the last URL seen
        assert_eq!(
            fs::read(f.perm.path().join("1.jpg")).unwrap(),
            fs::read(f.tmp.path().join("dog.jpg")).unwrap()
        );
        assert_eq!(
            fs::read(f.perm.path().join("2.png")).unwrap(),
            fs::read(f.tmp.path().join("cat.png")).unwrap()
        );

        let images = f.onboarding.registry.images.lock().unwrap();
        assert_eq!((images[0].width, images[0].height), (10, 5));
        assert_eq!(images[1].original_name, "cat.png");
        let locations = f.onboarding.registry.locations.lock().unwrap();
        assert_eq!(locations[1], (2, "http://store/perm/2.png".to_owned()));
    }

    #[tokio::test]
    async fn missing_upload_is_rejected_before_registration() {
        let f = fixture(&[("dog.jpg", 10, 5)]);
        let body = br#"{"imageUrls": ["http://store/tmp/dog.jpg", "http://store/tmp/ghost.jpg"]}"#;

        let reply = f.onboarding.handle(body).await;
        assert_eq!(reply.status, 400);
        assert!(reply.body.contains("ghost.jpg"));
        assert!(f.onboarding.registry.images.lock().unwrap().is_empty());
        assert!(f.onboarding.registry.users.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let err = read_body(Body::from(vec![b' '; 32]), 16).await.unwrap_err();
        assert_eq!(err.status(), 413);

        // no length up front, so the cap applies while streaming
        let (mut tx, body) = Body::channel();
        tokio::spawn(async move {
            for _ in 0..4 {
                if tx.send_data(Bytes::from(vec![b' '; 8])).await.is_err() {
                    break;
                }
            }
        });
        assert!(matches!(
            read_body(body, 16).await,
            Err(OnboardingError::BodyTooLarge(16))
        ));

        let ok = read_body(Body::from(r#"{"imageUrls": ["a.jpg"]}"#), MAX_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(parse_request(&ok).unwrap(), vec!["a.jpg".to_owned()]);
    }

    #[tokio::test]
    async fn malformed_json_gets_400() {
        let f = fixture(&[]);
        let reply = f.onboarding.handle(b"{imageUrls:").await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.body, "Unable to decode POST body");
    }
}
