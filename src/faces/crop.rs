use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::types::{FaceCrop, NormalizedRegion};
use crate::config::{CropConfig, StorageConfig};
use crate::error::{FaceError, FaceResult};

/// Hands out the directories crops and thumbnails are written to.
pub trait StorageLayout: Send + Sync {
    fn faces_dir(&self) -> FaceResult<PathBuf>;
    fn thumbnails_dir(&self) -> FaceResult<PathBuf>;
}

/// Fixed `faces/` and `thumbnails/` directories under the storage base dir.
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    faces: PathBuf,
    thumbnails: PathBuf,
}

impl DirectoryLayout {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            faces: config.faces_dir(),
            thumbnails: config.thumbnails_dir(),
        }
    }

    /// Create both directories and confirm they accept writes.
    pub fn validate(&self) -> FaceResult<()> {
        for dir in [&self.faces, &self.thumbnails] {
            ensure_dir(dir)?;
            let probe = dir.join(".write_test");
            fs::write(&probe, b"ok").map_err(|source| FaceError::Write {
                path: probe.clone(),
                source,
            })?;
            let _ = fs::remove_file(&probe);
        }
        tracing::debug!(faces = ?self.faces, thumbnails = ?self.thumbnails, "Storage directories ready");
        Ok(())
    }
}

impl StorageLayout for DirectoryLayout {
    fn faces_dir(&self) -> FaceResult<PathBuf> {
        ensure_dir(&self.faces)?;
        Ok(self.faces.clone())
    }

    fn thumbnails_dir(&self) -> FaceResult<PathBuf> {
        ensure_dir(&self.thumbnails)?;
        Ok(self.thumbnails.clone())
    }
}

fn ensure_dir(dir: &Path) -> FaceResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| FaceError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Writes padded face crops and letterboxed thumbnails.
pub struct Cropper {
    config: CropConfig,
    layout: Arc<dyn StorageLayout>,
}

impl Cropper {
    pub fn new(config: CropConfig, layout: Arc<dyn StorageLayout>) -> Self {
        Self { config, layout }
    }

    /// Crop `region` (plus padding) out of `image` and write `{face_id}.jpg`
    /// and `thumb_{face_id}.jpg`.
    pub fn crop(
        &self,
        image: &DynamicImage,
        region: &NormalizedRegion,
        face_id: &str,
    ) -> FaceResult<FaceCrop> {
        let (img_w, img_h) = (image.width(), image.height());
        if img_w == 0 || img_h == 0 {
            return Err(FaceError::ZeroDimensions);
        }

        let (x, y, width, height) = self.padded(region, img_w, img_h);
        let face = image.crop_imm(x, y, width, height).to_rgb8();

        let (crop_path, thumbnail_path) = self.output_paths(face_id)?;

        write_jpeg(&face, &crop_path, self.config.crop_quality)?;
        verify_output(&crop_path)?;

        let thumbnail = self.letterbox(&face);
        let thumb_result = write_jpeg(&thumbnail, &thumbnail_path, self.config.thumbnail_quality)
            .and_then(|_| verify_output(&thumbnail_path));
        if let Err(e) = thumb_result {
            let _ = fs::remove_file(&crop_path);
            return Err(e);
        }

        tracing::debug!(face_id, width, height, path = ?crop_path, "Wrote face crop");

        Ok(FaceCrop {
            face_id: face_id.to_string(),
            crop_path,
            thumbnail_path,
            width,
            height,
        })
    }

    /// Where the crop and thumbnail for `face_id` are written.
    pub fn output_paths(&self, face_id: &str) -> FaceResult<(PathBuf, PathBuf)> {
        let crop_path = self.layout.faces_dir()?.join(format!("{}.jpg", face_id));
        let thumbnail_path = self
            .layout
            .thumbnails_dir()?
            .join(format!("thumb_{}.jpg", face_id));
        Ok((crop_path, thumbnail_path))
    }

    /// Region grown by `padding` of its own size on every side, re-clamped.
    fn padded(&self, region: &NormalizedRegion, img_w: u32, img_h: u32) -> (u32, u32, u32, u32) {
        let padding = self.config.padding.max(0.0);
        let pad_x = (region.width as f32 * padding).round() as u32;
        let pad_y = (region.height as f32 * padding).round() as u32;

        let x0 = region.x.saturating_sub(pad_x).min(img_w - 1);
        let y0 = region.y.saturating_sub(pad_y).min(img_h - 1);
        let x1 = region.right().saturating_add(pad_x).min(img_w).max(x0 + 1);
        let y1 = region.bottom().saturating_add(pad_y).min(img_h).max(y0 + 1);

        (x0, y0, x1 - x0, y1 - y0)
    }

    /// Scale to fit a square canvas, centered on the background color.
    fn letterbox(&self, face: &RgbImage) -> RgbImage {
        let size = self.config.thumbnail_size.max(1);
        let scale = (size as f32 / face.width() as f32).min(size as f32 / face.height() as f32);
        let new_w = ((face.width() as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((face.height() as f32 * scale).round() as u32).clamp(1, size);

        let resized = imageops::resize(face, new_w, new_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(size, size, Rgb(self.config.background));
        let offset_x = (size - new_w) / 2;
        let offset_y = (size - new_h) / 2;
        imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        canvas
    }

    /// Best-effort removal of a face's files.
    pub fn remove_files(&self, crop_path: &Path, thumbnail_path: &Path) {
        self.remove_paths([crop_path, thumbnail_path]);
    }

    /// Best-effort removal; files that are already gone are ignored.
    pub fn remove_paths<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) {
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = ?path, error = %e, "Failed to remove face file");
                }
            }
        }
    }

    /// Remove crops and thumbnails last modified more than `days` ago.
    /// Returns the number of files deleted; `days == 0` keeps everything.
    pub fn cleanup_older_than(&self, days: u32) -> usize {
        if days == 0 {
            return 0;
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
        let mut removed = 0;

        let dirs = [self.layout.faces_dir(), self.layout.thumbnails_dir()];
        for dir in dirs.into_iter().filter_map(|d| d.ok()) {
            for entry in WalkDir::new(&dir)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                let is_jpeg = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
                if !is_jpeg {
                    continue;
                }

                let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                    Some(time) => chrono::DateTime::<chrono::Utc>::from(time),
                    None => continue,
                };
                if modified >= cutoff {
                    continue;
                }

                match fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove old face file"),
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, days, "Cleaned up old face files");
        }
        removed
    }
}

fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> FaceResult<()> {
    let write_err = |source: std::io::Error| FaceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);

    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
    encoder.encode_image(image).map_err(|source| FaceError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    writer.flush().map_err(write_err)?;
    Ok(())
}

/// A written file must exist and be non-empty.
fn verify_output(path: &Path) -> FaceResult<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(FaceError::EmptyOutput(path.to_path_buf())),
    }
}
