//! Local files the validator depends on: the browser auth state and the
//! STILTS jar

use std::path::{Path, PathBuf};
use std::time::Duration;

use rspval_common::config::AUTH_FILE;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// Smallest acceptable size of a downloaded artifact
pub const MIN_FILE_SIZE: u64 = 15_000_000;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

pub struct FileManager;

impl FileManager {
    /// Path of the browser storage state in `home`, which must exist
    pub fn check_auth_file(home: &Path) -> E2eResult<PathBuf> {
        let path = home.join(AUTH_FILE);
        if !path.exists() {
            return Err(E2eError::FileNotFound(path));
        }
        Ok(path)
    }

    /// Whether `path` is a file of at least `min_size` bytes.
    ///
    /// A missing file is `false`; a file that exists but is too small is a
    /// [`E2eError::FileSize`] error.
    pub fn file_exists_and_valid(path: &Path, min_size: u64) -> E2eResult<bool> {
        if !path.is_file() {
            return Ok(false);
        }

        let actual = std::fs::metadata(path)?.len();
        if actual < min_size {
            return Err(E2eError::FileSize {
                path: path.to_path_buf(),
                actual,
                minimum: min_size,
            });
        }
        Ok(true)
    }

    /// Fetch `url` into `path` unless a valid copy is already there
    pub async fn download_file(url: &str, path: &Path, min_size: u64) -> E2eResult<()> {
        if Self::file_exists_and_valid(path, min_size)? {
            debug!("{} already present", path.display());
            return Ok(());
        }

        info!("Downloading {} to {}", url, path.display());

        let download_error = |e: reqwest::Error| E2eError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        let body = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_error)?
            .bytes()
            .await
            .map_err(download_error)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &body)?;

        info!("Downloaded {} bytes", body.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_file_required() {
        let home = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileManager::check_auth_file(home.path()),
            Err(E2eError::FileNotFound(_))
        ));

        std::fs::write(home.path().join("auth.json"), "{}").unwrap();
        assert_eq!(
            FileManager::check_auth_file(home.path()).unwrap(),
            home.path().join("auth.json")
        );
    }

    #[test]
    fn test_file_validity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stilts.jar");

        assert!(!FileManager::file_exists_and_valid(&path, 10).unwrap());

        std::fs::write(&path, [0u8; 4]).unwrap();
        assert!(matches!(
            FileManager::file_exists_and_valid(&path, 10),
            Err(E2eError::FileSize {
                actual: 4,
                minimum: 10,
                ..
            })
        ));

        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(FileManager::file_exists_and_valid(&path, 10).unwrap());
    }

    #[test]
    fn test_directory_is_not_a_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!FileManager::file_exists_and_valid(dir.path(), 0).unwrap());
    }

    #[tokio::test]
    async fn test_existing_file_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libs/stilts.jar");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, [1u8; 8]).unwrap();

        // Port 9 on localhost is never reached since the file is valid
        FileManager::download_file("http://127.0.0.1:9/stilts.jar", &path, 8)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_url_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libs/stilts.jar");

        let err = FileManager::download_file("http://127.0.0.1:9/stilts.jar", &path, 8)
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::Download { .. }));
        assert!(!path.exists());
    }
}
