use async_trait::async_trait;
use image::DynamicImage;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DownloadConfig, StorageConfig};
use crate::error::{FaceError, FaceResult};

/// Largest remote image we are willing to buffer.
const MAX_DOWNLOAD_BYTES: u64 = 32 * 1024 * 1024;

/// A decoded event snapshot.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub url: String,
    pub image: Arc<DynamicImage>,
    pub width: u32,
    pub height: u32,
}

impl SourceImage {
    pub fn new(url: impl Into<String>, image: DynamicImage) -> FaceResult<Self> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(FaceError::ZeroDimensions);
        }
        Ok(Self {
            url: url.into(),
            image: Arc::new(image),
            width,
            height,
        })
    }
}

/// Resolves an event's image URL to pixels.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn load(&self, image_url: &str) -> FaceResult<SourceImage>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Remote(String),
    Local(PathBuf),
}

/// Loads `/uploads/...` paths from the storage dir, `http(s)://` URLs over the
/// network and anything else as a plain file path.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    uploads_root: PathBuf,
    download_timeout: Duration,
}

impl ImageLoader {
    pub fn new(storage: &StorageConfig, download: &DownloadConfig) -> Self {
        Self {
            uploads_root: storage.base_dir.clone(),
            download_timeout: Duration::from_secs(download.timeout_secs.max(1)),
        }
    }

    fn resolve(&self, image_url: &str) -> FaceResult<Location> {
        if image_url.starts_with("http://") || image_url.starts_with("https://") {
            return Ok(Location::Remote(image_url.to_string()));
        }

        let Some(relative) = image_url.strip_prefix("/uploads/") else {
            return Ok(Location::Local(PathBuf::from(image_url)));
        };

        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(FaceError::ImageLoad {
                url: image_url.to_string(),
                reason: "path escapes the uploads directory".to_string(),
            });
        }

        Ok(Location::Local(self.uploads_root.join(relative)))
    }

    fn download(url: &str, timeout: Duration) -> FaceResult<Vec<u8>> {
        let load_err = |reason: String| FaceError::ImageLoad {
            url: url.to_string(),
            reason,
        };

        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let response = agent.get(url).call().map_err(|e| load_err(e.to_string()))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_DOWNLOAD_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| load_err(e.to_string()))?;

        if bytes.is_empty() {
            return Err(load_err("empty response body".to_string()));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ImageSource for ImageLoader {
    async fn load(&self, image_url: &str) -> FaceResult<SourceImage> {
        let location = self.resolve(image_url)?;
        tracing::debug!(image_url, ?location, "Loading event image");

        let join_err = |e: tokio::task::JoinError| FaceError::ImageLoad {
            url: image_url.to_string(),
            reason: e.to_string(),
        };

        let image = match location {
            Location::Remote(url) => {
                let timeout = self.download_timeout;
                let fetch = tokio::task::spawn_blocking(move || -> FaceResult<DynamicImage> {
                    let bytes = Self::download(&url, timeout)?;
                    Ok(image::load_from_memory(&bytes)?)
                });
                // The agent timeout covers each read; this bounds the whole transfer.
                tokio::time::timeout(timeout * 2, fetch)
                    .await
                    .map_err(|_| FaceError::ImageLoad {
                        url: image_url.to_string(),
                        reason: format!("download timed out after {:?}", timeout * 2),
                    })?
                    .map_err(join_err)??
            }
            Location::Local(path) => {
                if !path.is_file() {
                    return Err(FaceError::ImageLoad {
                        url: image_url.to_string(),
                        reason: format!("{} not found", path.display()),
                    });
                }
                tokio::task::spawn_blocking(move || image::open(path))
                    .await
                    .map_err(join_err)??
            }
        };

        SourceImage::new(image_url, image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn loader(base: &Path) -> ImageLoader {
        let storage = StorageConfig {
            base_dir: base.to_path_buf(),
            cleanup_after_days: 0,
        };
        ImageLoader::new(&storage, &DownloadConfig::default())
    }

    #[test]
    fn test_resolve_locations() {
        let loader = loader(Path::new("/srv/uploads"));

        assert_eq!(
            loader.resolve("/uploads/events/snap.jpg").unwrap(),
            Location::Local(PathBuf::from("/srv/uploads/events/snap.jpg"))
        );
        assert_eq!(
            loader.resolve("https://cam.local/snap.jpg").unwrap(),
            Location::Remote("https://cam.local/snap.jpg".to_string())
        );
        assert_eq!(
            loader.resolve("/tmp/snap.jpg").unwrap(),
            Location::Local(PathBuf::from("/tmp/snap.jpg"))
        );
        assert!(loader.resolve("/uploads/../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_load_from_uploads() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(32, 24).save(dir.path().join("snap.png")).unwrap();

        let source = loader(dir.path()).load("/uploads/snap.png").await.unwrap();
        assert_eq!((source.width, source.height), (32, 24));
        assert_eq!(source.url, "/uploads/snap.png");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = loader(dir.path()).load("/uploads/missing.jpg").await;
        assert!(matches!(result, Err(FaceError::ImageLoad { .. })));
    }

    /// Answers a single HTTP request with `body`.
    fn serve_once(body: Vec<u8>) -> String {
        use std::io::Write;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://{}/snap.png", addr)
    }

    #[tokio::test]
    async fn test_load_remote_image() {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(40, 30))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let url = serve_once(png);

        let dir = tempfile::tempdir().unwrap();
        let source = loader(dir.path()).load(&url).await.unwrap();
        assert_eq!((source.width, source.height), (40, 30));
    }

    #[tokio::test]
    async fn test_remote_garbage_is_a_decode_error() {
        let url = serve_once(b"not an image at all".to_vec());

        let dir = tempfile::tempdir().unwrap();
        let result = loader(dir.path()).load(&url).await;
        assert!(matches!(result, Err(FaceError::Decode(_))));
    }

    #[tokio::test]
    async fn test_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let result = loader(dir.path()).load(path.to_str().unwrap()).await;
        assert!(matches!(result, Err(FaceError::Decode(_))));
    }
}
