//! Content-addressed image ingestion.
//!
//! Uploads are stored as WebP files in one flat directory, named after the
//! SHA-256 of the original bytes or after a caller-supplied stable key. Hash
//! names are written once and reused; stable keys are re-rendered on every
//! upload so the logical slot (profile photo, ...) always shows the latest
//! image.

use crate::models::StoredAsset;
use image::imageops::FilterType;
use image::GenericImageView;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_DIMENSION: u32 = 1200;
pub const WEBP_QUALITY: f32 = 80.0;
pub const ASSET_MIME: &str = "image/webp";

const WRITE_PROBE: &str = ".write-test";
const MAX_STABLE_KEY_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("File size must be less than 5MB (got {size} bytes)")]
    TooLarge { size: usize },
    #[error("Upload directory {path} is not writable: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    EncodeFailure(String),
}

pub struct ImageIngestor {
    dir: PathBuf,
    url_prefix: String,
}

impl ImageIngestor {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.url_prefix, filename)
    }

    /// Stores `bytes` and returns the new asset. When `prior_url` names a
    /// different managed file it is removed once the new file is in place.
    pub fn ingest(
        &self,
        bytes: &[u8],
        content_type: &str,
        prior_url: Option<&str>,
        stable_key: Option<&str>,
    ) -> Result<StoredAsset, IngestError> {
        validate_upload(bytes, content_type)?;

        let content_key = match stable_key {
            Some(key) => {
                validate_stable_key(key)?;
                key.to_string()
            }
            None => sha256_hex(bytes),
        };
        let filename = format!("{content_key}.webp");
        let path = self.dir.join(&filename);
        let url = self.url_for(&filename);

        self.ensure_writable()?;

        if stable_key.is_some() || !path.exists() {
            let encoded = encode_webp(bytes)?;
            write_atomic(&path, &encoded).map_err(|source| IngestError::Write {
                path: path.clone(),
                source,
            })?;
            info!(
                file = %filename,
                bytes_in = bytes.len(),
                bytes_out = encoded.len(),
                "Stored image"
            );
        } else {
            debug!(file = %filename, "Image already stored, skipping encode");
        }

        if let Some(prior) = prior_url.filter(|p| !p.is_empty() && *p != url) {
            match self.release(prior) {
                Ok(true) => info!(prior = %prior, "Removed superseded image"),
                Ok(false) => {}
                Err(e) => warn!(prior = %prior, error = %e, "Failed to remove superseded image"),
            }
        }

        Ok(StoredAsset {
            content_key,
            path,
            mime_type: ASSET_MIME,
            url,
        })
    }

    /// Maps a public URL back to a file inside the managed directory. URLs
    /// outside the prefix, or naming anything but a plain file, map to `None`.
    pub fn managed_path(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        if !is_plain_file_name(name) {
            return None;
        }
        Some(self.dir.join(name))
    }

    /// Deletes the managed file behind `url`. `Ok(false)` when the URL is not
    /// managed or the file is already gone.
    pub fn release(&self, url: &str) -> io::Result<bool> {
        let Some(path) = self.managed_path(url) else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn ensure_writable(&self) -> Result<(), IngestError> {
        let unavailable = |source: io::Error| IngestError::StorageUnavailable {
            path: self.dir.clone(),
            source,
        };

        if !self.dir.exists() {
            info!(dir = %self.dir.display(), "Creating upload directory");
            fs::create_dir_all(&self.dir).map_err(unavailable)?;
        }

        // One probe per call; concurrent ingests must not remove each other's.
        let probe = self
            .dir
            .join(format!("{WRITE_PROBE}.{}", Uuid::new_v4().simple()));
        fs::write(&probe, b"test").map_err(unavailable)?;
        match fs::remove_file(&probe) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(e)),
        }
    }
}

pub fn validate_upload(bytes: &[u8], content_type: &str) -> Result<(), IngestError> {
    if !content_type.starts_with("image/") {
        return Err(IngestError::InvalidInput("File must be an image".to_string()));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(IngestError::TooLarge { size: bytes.len() });
    }
    if bytes.is_empty() {
        return Err(IngestError::InvalidInput("No file uploaded".to_string()));
    }
    Ok(())
}

fn validate_stable_key(key: &str) -> Result<(), IngestError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_STABLE_KEY_LEN
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(IngestError::InvalidInput(format!(
            "Invalid custom filename: {key}"
        )))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Decodes any supported image, shrinks it to fit inside
/// `MAX_DIMENSION`x`MAX_DIMENSION` (never enlarging) and encodes lossy WebP.
pub fn encode_webp(bytes: &[u8]) -> Result<Vec<u8>, IngestError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| IngestError::EncodeFailure(format!("Failed to decode image: {e}")))?;

    let (width, height) = img.dimensions();
    let img = if width > MAX_DIMENSION || height > MAX_DIMENSION {
        img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        img
    };

    let (width, height) = img.dimensions();
    let rgba;
    let rgb;
    let encoder = if img.color().has_alpha() {
        rgba = img.to_rgba8();
        webp::Encoder::from_rgba(&rgba, width, height)
    } else {
        rgb = img.to_rgb8();
        webp::Encoder::from_rgb(&rgb, width, height)
    };

    let encoded = encoder.encode_simple(false, WEBP_QUALITY);
    encoded.map(|memory| memory.to_vec()).map_err(|e| {
        IngestError::EncodeFailure(format!("WebP encode error ({width}x{height}): {e:?}"))
    })
}

/// Writes through a temp file in the same directory so readers never see a
/// partially written image.
fn write_atomic(target: &Path, data: &[u8]) -> io::Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

    fs::write(&tmp, data)?;
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn stored_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn ingestor() -> (ImageIngestor, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ingestor = ImageIngestor::new(temp.path().join("uploads"), "/uploads/");
        (ingestor, temp)
    }

    #[test]
    fn identical_bytes_share_one_file() {
        let (ingestor, _temp) = ingestor();
        let png = png_bytes(40, 30, [200, 10, 10]);

        let first = ingestor.ingest(&png, "image/png", None, None).expect("first");
        let modified = fs::metadata(&first.path).expect("meta").modified().expect("mtime");
        let second = ingestor.ingest(&png, "image/png", None, None).expect("second");

        assert_eq!(first.url, second.url);
        assert_eq!(first.url, format!("/uploads/{}.webp", sha256_hex(&png)));
        assert_eq!(first.mime_type, "image/webp");
        assert_eq!(stored_files(ingestor.dir()), vec![format!("{}.webp", first.content_key)]);
        assert_eq!(
            fs::metadata(&second.path).expect("meta").modified().expect("mtime"),
            modified
        );
    }

    #[test]
    fn rejects_non_images_and_oversize_without_writing() {
        let (ingestor, _temp) = ingestor();

        let err = ingestor
            .ingest(b"plain text", "text/plain", None, None)
            .expect_err("non-image");
        assert!(matches!(err, IngestError::InvalidInput(_)));

        let big = vec![0u8; MAX_UPLOAD_BYTES + 1];
        let err = ingestor
            .ingest(&big, "image/png", None, None)
            .expect_err("oversize");
        assert!(matches!(err, IngestError::TooLarge { .. }));

        assert!(!ingestor.dir().exists() || stored_files(ingestor.dir()).is_empty());
    }

    #[test]
    fn stable_key_overwrites_in_place() {
        let (ingestor, _temp) = ingestor();
        let red = png_bytes(16, 16, [255, 0, 0]);
        let blue = png_bytes(16, 16, [0, 0, 255]);

        let first = ingestor
            .ingest(&red, "image/png", None, Some("profile-42"))
            .expect("first");
        let first_bytes = fs::read(&first.path).expect("read");
        let second = ingestor
            .ingest(&blue, "image/png", Some(&first.url), Some("profile-42"))
            .expect("second");

        assert_eq!(first.url, "/uploads/profile-42.webp");
        assert_eq!(first.url, second.url);
        assert_ne!(fs::read(&second.path).expect("read"), first_bytes);
        assert_eq!(second.path, first.path);
        assert!(second.path.exists());
        assert_eq!(stored_files(ingestor.dir()), vec!["profile-42.webp".to_string()]);
    }

    #[test]
    fn rejects_path_like_stable_keys() {
        let (ingestor, _temp) = ingestor();
        let png = png_bytes(4, 4, [1, 2, 3]);
        for key in ["../escape", ".hidden", "a/b", ""] {
            let err = ingestor
                .ingest(&png, "image/png", None, Some(key))
                .expect_err("bad key");
            assert!(matches!(err, IngestError::InvalidInput(_)), "{key}");
        }
    }

    #[test]
    fn superseded_managed_file_is_removed() {
        let (ingestor, _temp) = ingestor();
        let old = ingestor
            .ingest(&png_bytes(8, 8, [9, 9, 9]), "image/png", None, None)
            .expect("old");
        let new = ingestor
            .ingest(&png_bytes(8, 8, [7, 7, 7]), "image/png", Some(&old.url), None)
            .expect("new");

        assert!(!old.path.exists());
        assert!(new.path.exists());
    }

    #[test]
    fn external_or_same_prior_url_is_left_alone() {
        let (ingestor, _temp) = ingestor();
        let png = png_bytes(8, 8, [5, 5, 5]);
        let first = ingestor.ingest(&png, "image/png", None, None).expect("first");
        let again = ingestor
            .ingest(&png, "image/png", Some(&first.url), None)
            .expect("same");
        assert!(again.path.exists());

        let other = ingestor
            .ingest(
                &png_bytes(8, 8, [6, 6, 6]),
                "image/png",
                Some("https://images.example.com/photo.jpg"),
                None,
            )
            .expect("external prior");
        assert!(other.path.exists());
        assert!(first.path.exists());
    }

    #[test]
    fn concurrent_identical_uploads_all_succeed() {
        let (ingestor, _temp) = ingestor();
        let ingestor = std::sync::Arc::new(ingestor);
        let png = std::sync::Arc::new(png_bytes(24, 24, [90, 60, 30]));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let ingestor = ingestor.clone();
                let png = png.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| ingestor.ingest(&png, "image/png", None, None))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut urls = std::collections::HashSet::new();
        for worker in workers {
            for result in worker.join().expect("worker panicked") {
                urls.insert(result.expect("concurrent ingest").url);
            }
        }

        assert_eq!(urls.len(), 1);
        assert_eq!(stored_files(ingestor.dir()), vec![format!("{}.webp", sha256_hex(&png))]);
    }

    #[test]
    fn managed_path_only_accepts_plain_names() {
        let ingestor = ImageIngestor::new("/srv/uploads", "/uploads");
        assert_eq!(
            ingestor.managed_path("/uploads/abc.webp"),
            Some(PathBuf::from("/srv/uploads/abc.webp"))
        );
        assert_eq!(ingestor.managed_path("/uploads/../etc/passwd"), None);
        assert_eq!(ingestor.managed_path("/uploads/.."), None);
        assert_eq!(ingestor.managed_path("/uploadsabc.webp"), None);
        assert_eq!(ingestor.managed_path("https://cdn.example.com/a.webp"), None);
    }

    #[test]
    fn large_images_are_shrunk_without_upscaling_small_ones() {
        let wide = png_bytes(2400, 600, [10, 20, 30]);
        let encoded = encode_webp(&wide).expect("encode");
        let decoded = image::load_from_memory(&encoded).expect("decode webp");
        assert_eq!(decoded.dimensions(), (1200, 300));

        let small = png_bytes(300, 200, [10, 20, 30]);
        let decoded = image::load_from_memory(&encode_webp(&small).expect("encode"))
            .expect("decode webp");
        assert_eq!(decoded.dimensions(), (300, 200));
    }

    #[test]
    fn keeps_alpha_channel() {
        let img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        let encoded = encode_webp(&out.into_inner()).expect("encode");
        assert!(image::load_from_memory(&encoded).expect("decode").color().has_alpha());
    }

    #[test]
    fn undecodable_image_is_an_encode_failure() {
        let (ingestor, _temp) = ingestor();
        let err = ingestor
            .ingest(b"not really a png", "image/png", None, None)
            .expect_err("garbage");
        assert!(matches!(err, IngestError::EncodeFailure(_)));
    }
}
