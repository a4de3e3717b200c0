use std::path::{Path, PathBuf};
use std::fs;
use std::io;
use std::sync::Arc;
use std::env;
use tokio::sync::Mutex;
use sha2::{Sha256, Digest};

use crate::models::{BuiltinModel, ModelInfo};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Model verification failed")]
    VerificationFailed,
    #[error("Hash mismatch: expected {expected}, got {actual} for {file_type} file")]
    HashMismatch {
        file_type: String,
        expected: String,
        actual: String,
    },
}

/// Local store of backbone graphs and head sidecars, one directory per model.
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("DRISHTI_CACHE") {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("drishti").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("drishti").join("models");
        }

        // 4. If all else fails, use system temp directory
        env::temp_dir().join("drishti").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn get_model_path(&self, model: BuiltinModel) -> PathBuf {
        self.models_dir.join(model.dir_name()).join("model.onnx")
    }

    pub fn get_head_path(&self, model: BuiltinModel) -> PathBuf {
        self.models_dir.join(model.dir_name()).join("head.json")
    }

    pub fn is_model_downloaded(&self, model: BuiltinModel) -> bool {
        let model_path = self.get_model_path(model);
        let head_path = self.get_head_path(model);
        log::debug!("Model path: {:?} (exists: {})", model_path, model_path.exists());
        log::debug!("Head path: {:?} (exists: {})", head_path, head_path.exists());
        model_path.exists() && head_path.exists()
    }

    /// Downloads whichever of the two files is missing or fails verification.
    /// Concurrent calls on clones of one manager are serialized.
    pub async fn download_model(&self, info: &ModelInfo) -> Result<(), ModelError> {
        let _lock = self.download_lock.lock().await;

        let model_dir = self.models_dir.join(info.name());
        log::info!("Creating model directory at {:?}", model_dir);
        fs::create_dir_all(&model_dir)?;

        let model_path = self.get_model_path(info.model);
        let model_result = self
            .fetch_if_invalid(&info.model_url, &model_path, &info.model_hash, "model")
            .await;

        let head_path = self.get_head_path(info.model);
        let head_result = self
            .fetch_if_invalid(&info.head_url, &head_path, &info.head_hash, "head")
            .await;

        match (model_result, head_result) {
            (Ok(()), Ok(())) => {
                log::info!("Model and head ready to use");
                Ok(())
            }
            (Err(e), _) => {
                log::error!("Failed to setup model file: {}", e);
                let _ = self.remove_download(info.model);
                Err(e)
            }
            (_, Err(e)) => {
                log::error!("Failed to setup head file: {}", e);
                let _ = self.remove_download(info.model);
                Err(e)
            }
        }
    }

    async fn fetch_if_invalid(
        &self,
        url: &str,
        path: &Path,
        expected_hash: &str,
        file_type: &str,
    ) -> Result<(), ModelError> {
        if path.exists() {
            log::info!("{} file exists at {:?}, verifying...", file_type, path);
            if self.verify_file(path, expected_hash)? {
                log::info!("Existing {} file verified successfully", file_type);
                return Ok(());
            }
            log::warn!("{} file verification failed, redownloading", file_type);
        }
        self.download_and_verify_file(url, path, expected_hash, file_type).await
    }

    fn verify_file(&self, path: &Path, expected_hash: &str) -> Result<bool, ModelError> {
        let bytes = fs::read(path)?;
        let hash = sha256_hex(&bytes);
        log::debug!("{:?}: {} bytes, sha256 {} (expected {})", path, bytes.len(), hash, expected_hash);
        Ok(hash == expected_hash)
    }

    pub fn verify_model(&self, info: &ModelInfo) -> Result<bool, ModelError> {
        let model_path = self.get_model_path(info.model);
        let head_path = self.get_head_path(info.model);

        if !model_path.exists() || !head_path.exists() {
            log::info!("One or both files do not exist");
            return Ok(false);
        }

        let model_ok = self.verify_file(&model_path, &info.model_hash)?;
        let head_ok = self.verify_file(&head_path, &info.head_hash)?;
        log::info!("Verification results: model {}, head {}", model_ok, head_ok);

        Ok(model_ok && head_ok)
    }

    async fn download_and_verify_file(
        &self,
        url: &str,
        path: &Path,
        expected_hash: &str,
        file_type: &str,
    ) -> Result<(), ModelError> {
        log::info!("Downloading {} file from {} to {:?}", file_type, url, path);
        let response = reqwest::get(url).await?.error_for_status()?;
        let bytes = response.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());

        let hash = sha256_hex(&bytes);
        if hash != expected_hash {
            log::error!("{} hash mismatch: expected {}, got {}", file_type, expected_hash, hash);
            return Err(ModelError::HashMismatch {
                file_type: file_type.to_string(),
                expected: expected_hash.to_string(),
                actual: hash,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;

        if !self.verify_file(path, expected_hash)? {
            return Err(ModelError::VerificationFailed);
        }

        log::info!("{} file downloaded and verified successfully", file_type);
        Ok(())
    }

    pub fn remove_download(&self, model: BuiltinModel) -> Result<(), ModelError> {
        let model_path = self.get_model_path(model);
        let head_path = self.get_head_path(model);

        if model_path.exists() {
            fs::remove_file(&model_path)?;
        }
        if head_path.exists() {
            fs::remove_file(&head_path)?;
        }
        Ok(())
    }

    /// Ensures that a model is downloaded and verified.
    /// If the model doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_model_downloaded(&self, info: &ModelInfo) -> Result<(), ModelError> {
        log::info!("Checking if model {:?} is downloaded...", info.model);
        if !self.is_model_downloaded(info.model) {
            log::info!("Model not found, downloading...");
            self.download_model(info).await?;
        } else if !self.verify_model(info)? {
            log::info!("Model verification failed, re-downloading...");
            self.remove_download(info.model)?;
            self.download_model(info).await?;
        } else {
            log::info!("Model verification successful");
        }
        Ok(())
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_manager(tag: &str) -> ModelManager {
        let dir = env::temp_dir().join(format!("drishti-mm-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        ModelManager::new(dir).unwrap()
    }

    #[test]
    fn test_paths_and_presence() {
        let manager = scratch_manager("paths");
        let model = BuiltinModel::EfficientNetV2S;
        assert!(manager.get_model_path(model).ends_with("efficientnetv2-s-tb/model.onnx"));
        assert!(manager.get_head_path(model).ends_with("efficientnetv2-s-tb/head.json"));
        assert!(!manager.is_model_downloaded(model));

        fs::create_dir_all(manager.get_model_path(model).parent().unwrap()).unwrap();
        fs::write(manager.get_model_path(model), b"graph").unwrap();
        assert!(!manager.is_model_downloaded(model));
        fs::write(manager.get_head_path(model), b"{}").unwrap();
        assert!(manager.is_model_downloaded(model));

        manager.remove_download(model).unwrap();
        assert!(!manager.is_model_downloaded(model));
    }

    #[test]
    fn test_verify_model_hashes() {
        let manager = scratch_manager("verify");
        let model = BuiltinModel::EfficientNetV2S;
        fs::create_dir_all(manager.get_model_path(model).parent().unwrap()).unwrap();
        fs::write(manager.get_model_path(model), b"graph").unwrap();
        fs::write(manager.get_head_path(model), b"head").unwrap();

        let good = ModelInfo::new(model, "", sha256_hex(b"graph"), "", sha256_hex(b"head"));
        assert!(manager.verify_model(&good).unwrap());

        let bad = ModelInfo::new(model, "", sha256_hex(b"graph"), "", sha256_hex(b"other"));
        assert!(!manager.verify_model(&bad).unwrap());
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_unreachable_download_cleans_up() {
        let manager = scratch_manager("unreachable");
        let model = BuiltinModel::EfficientNetV2S;
        let info = ModelInfo::new(model, "http://127.0.0.1:9/model.onnx", "00", "http://127.0.0.1:9/head.json", "00");
        let result = tokio_test::block_on(manager.download_model(&info));
        assert!(matches!(result, Err(ModelError::DownloadError(_))));
        assert!(!manager.is_model_downloaded(model));
    }

    #[test]
    fn test_default_models_dir() {
        env::set_var("DRISHTI_CACHE", "/tmp/test-cache");
        let path = ModelManager::get_default_models_dir();
        assert!(path.to_str().unwrap().contains("/tmp/test-cache/models"));
        env::remove_var("DRISHTI_CACHE");

        let path = ModelManager::get_default_models_dir();
        assert!(path.to_str().unwrap().contains("drishti"));
    }
}
