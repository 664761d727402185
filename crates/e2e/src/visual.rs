//! Screenshot comparison against stored snapshots

use std::path::{Path, PathBuf};

use image::{GenericImageView, Pixel, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Result of a successful comparison
#[derive(Debug, Clone, PartialEq)]
pub struct VisualDiff {
    /// Number of different pixels
    pub diff_pixels: u64,

    /// Total pixels compared
    pub total_pixels: u64,

    /// Hash of the screenshot
    pub actual_hash: String,
}

/// Compares screenshots with the snapshots stored under `snapshot_dir`.
///
/// A missing snapshot is written from the screenshot and reported as
/// [`E2eError::NewSnapshot`] so the new image gets reviewed. On a mismatch the
/// actual, expected and diff images are written to a per-screenshot
/// directory under `failures_dir`.
pub struct SnapshotComparator {
    snapshot_dir: PathBuf,
    failures_dir: PathBuf,

    /// Default per-channel tolerance (0.0 - 1.0)
    threshold: f64,
}

impl SnapshotComparator {
    pub fn new(config: VisualConfig) -> E2eResult<Self> {
        std::fs::create_dir_all(&config.snapshot_dir)?;
        std::fs::create_dir_all(&config.failures_dir)?;

        Ok(Self {
            snapshot_dir: config.snapshot_dir,
            failures_dir: config.failures_dir,
            threshold: config.threshold,
        })
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{}.png", name))
    }

    fn failure_dir(&self, name: &str) -> PathBuf {
        self.failures_dir.join(name)
    }

    /// Compare screenshot bytes against the stored snapshot for `name`
    pub fn compare(&self, name: &str, actual: &[u8], threshold: Option<f64>) -> E2eResult<VisualDiff> {
        let threshold = threshold.unwrap_or(self.threshold);
        let snapshot_path = self.snapshot_path(name);

        // Leftovers from a previous run would be mistaken for this run's failure
        let failure_dir = self.failure_dir(name);
        if failure_dir.exists() {
            std::fs::remove_dir_all(&failure_dir)?;
        }

        if !snapshot_path.exists() {
            std::fs::write(&snapshot_path, actual)?;
            info!("Created snapshot for '{}' at {}", name, snapshot_path.display());
            return Err(E2eError::NewSnapshot {
                name: name.to_string(),
                path: snapshot_path,
            });
        }

        let expected = std::fs::read(&snapshot_path)?;
        let actual_hash = hash_bytes(actual);

        if actual_hash == hash_bytes(&expected) {
            debug!("Screenshot '{}' matches its snapshot exactly", name);
            let (width, height) = image::load_from_memory(actual)?.dimensions();
            return Ok(VisualDiff {
                diff_pixels: 0,
                total_pixels: width as u64 * height as u64,
                actual_hash,
            });
        }

        let actual_img = image::load_from_memory(actual)?.to_rgba8();
        let expected_img = image::load_from_memory(&expected)?.to_rgba8();

        if actual_img.dimensions() != expected_img.dimensions() {
            warn!(
                "Screenshot dimensions differ: actual {:?} vs snapshot {:?}",
                actual_img.dimensions(),
                expected_img.dimensions()
            );
        }

        let (diff_img, diff_pixels, total_pixels) = pixel_diff(&actual_img, &expected_img, threshold);

        if diff_pixels == 0 {
            return Ok(VisualDiff {
                diff_pixels,
                total_pixels,
                actual_hash,
            });
        }

        std::fs::create_dir_all(&failure_dir)?;
        actual_img.save(failure_dir.join(format!("Actual_{}.png", name)))?;
        expected_img.save(failure_dir.join(format!("Expected_{}.png", name)))?;
        diff_img.save(failure_dir.join(format!("Diff_{}.png", name)))?;

        warn!(
            "Snapshot mismatch for '{}': {} of {} pixels differ",
            name, diff_pixels, total_pixels
        );

        Err(E2eError::SnapshotMismatch {
            name: name.to_string(),
            diff_pixels,
            dir: failure_dir,
        })
    }

    /// Replace the stored snapshot for `name`
    pub fn update_snapshot(&self, name: &str, actual: &[u8]) -> E2eResult<()> {
        std::fs::write(self.snapshot_path(name), actual)?;
        info!("Updated snapshot for '{}'", name);
        Ok(())
    }

    /// Compare a screenshot file written by the browser
    pub fn compare_file(&self, name: &str, path: &Path, threshold: Option<f64>) -> E2eResult<VisualDiff> {
        if !path.exists() {
            return Err(E2eError::FileNotFound(path.to_path_buf()));
        }
        let actual = std::fs::read(path)?;
        self.compare(name, &actual, threshold)
    }
}

/// Pixel-by-pixel comparison. Pixels outside the common area always count
/// as different.
fn pixel_diff(actual: &RgbaImage, expected: &RgbaImage, threshold: f64) -> (RgbaImage, u64, u64) {
    let width = actual.width().max(expected.width());
    let height = actual.height().max(expected.height());
    let tolerance = (threshold.clamp(0.0, 1.0) * 255.0).round() as i32;

    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let in_actual = x < actual.width() && y < actual.height();
            let in_expected = x < expected.width() && y < expected.height();
            let pair = (in_actual && in_expected)
                .then(|| (actual.get_pixel(x, y), expected.get_pixel(x, y)));

            match pair {
                Some((a, e)) if !pixels_differ(a, e, tolerance) => {
                    let channels = a.channels();
                    diff_img.put_pixel(
                        x,
                        y,
                        image::Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128]),
                    );
                }
                _ => {
                    diff_pixels += 1;
                    diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                }
            }
        }
    }

    (diff_img, diff_pixels, width as u64 * height as u64)
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>, tolerance: i32) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > tolerance)
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Configuration for snapshot comparison
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub snapshot_dir: PathBuf,
    pub failures_dir: PathBuf,
    pub threshold: f64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("snapshots"),
            failures_dir: PathBuf::from("test-results/failures"),
            threshold: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba(color));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
        buf.into_inner()
    }

    fn comparator(dir: &Path) -> SnapshotComparator {
        SnapshotComparator::new(VisualConfig {
            snapshot_dir: dir.join("snapshots"),
            failures_dir: dir.join("failures"),
            threshold: 0.1,
        })
        .unwrap()
    }

    #[test]
    fn test_missing_snapshot_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let cmp = comparator(dir.path());
        let img = png(4, 4, [10, 20, 30, 255]);

        let err = cmp.compare("home", &img, None).unwrap_err();
        assert!(matches!(err, E2eError::NewSnapshot { .. }));
        assert_eq!(std::fs::read(cmp.snapshot_path("home")).unwrap(), img);

        let diff = cmp.compare("home", &img, None).unwrap();
        assert_eq!(diff.diff_pixels, 0);
        assert_eq!(diff.total_pixels, 16);
    }

    #[test]
    fn test_small_color_change_within_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let cmp = comparator(dir.path());
        cmp.update_snapshot("home", &png(4, 4, [100, 100, 100, 255])).unwrap();

        let diff = cmp.compare("home", &png(4, 4, [110, 100, 100, 255]), None).unwrap();
        assert_eq!(diff.diff_pixels, 0);
    }

    #[test]
    fn test_mismatch_writes_failure_images() {
        let dir = tempfile::tempdir().unwrap();
        let cmp = comparator(dir.path());
        cmp.update_snapshot("home", &png(4, 4, [0, 0, 0, 255])).unwrap();

        let err = cmp.compare("home", &png(4, 4, [255, 255, 255, 255]), None).unwrap_err();
        match err {
            E2eError::SnapshotMismatch { diff_pixels, dir, .. } => {
                assert_eq!(diff_pixels, 16);
                assert!(dir.join("Actual_home.png").exists());
                assert!(dir.join("Expected_home.png").exists());
                assert!(dir.join("Diff_home.png").exists());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_size_change_counts_uncovered_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let cmp = comparator(dir.path());
        cmp.update_snapshot("home", &png(4, 4, [0, 0, 0, 255])).unwrap();

        let err = cmp.compare("home", &png(4, 5, [0, 0, 0, 255]), None).unwrap_err();
        assert!(matches!(err, E2eError::SnapshotMismatch { diff_pixels: 4, .. }));
    }

    #[test]
    fn test_passing_compare_clears_old_failures() {
        let dir = tempfile::tempdir().unwrap();
        let cmp = comparator(dir.path());
        let img = png(2, 2, [0, 0, 0, 255]);
        cmp.update_snapshot("home", &img).unwrap();
        std::fs::create_dir_all(dir.path().join("failures/home")).unwrap();

        cmp.compare("home", &img, None).unwrap();
        assert!(!dir.path().join("failures/home").exists());
    }
}
