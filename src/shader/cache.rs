//! On-disk cache of compiled SPIR-V artifacts.
//!
//! Artifacts live at `<dir>/<file name>.<entry>.<hash>.spv`, where the hash covers
//! the source path, stage, entry point and sorted macro definitions. An
//! artifact is only used while it is at least as new as its source file.

use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rustc_hash::FxHasher;

use crate::backend::ShaderStage;
use crate::error::{BindingError, BindingResult};

use super::compiler::{spirv_words, CompileOptions};

/// Directory of cached SPIR-V artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

fn io_error(path: &Path, source: std::io::Error) -> BindingError {
    BindingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn modified(path: &Path) -> BindingResult<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| io_error(path, e))
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic artifact path for one compiled variant.
    pub fn artifact_path(
        &self,
        source: &Path,
        stage: ShaderStage,
        options: &CompileOptions,
    ) -> PathBuf {
        let mut hasher = FxHasher::default();
        source.hash(&mut hasher);
        stage.hash(&mut hasher);
        options.entry_point.hash(&mut hasher);
        options.sorted_defines().hash(&mut hasher);

        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("shader");
        self.dir.join(format!(
            "{}.{}.{:016x}.spv",
            file_name,
            options.entry_point,
            hasher.finish()
        ))
    }

    /// Load a cached artifact if one exists and is not older than `source`.
    pub fn load(
        &self,
        source: &Path,
        stage: ShaderStage,
        options: &CompileOptions,
    ) -> BindingResult<Option<Vec<u32>>> {
        let artifact = self.artifact_path(source, stage, options);
        if !artifact.exists() {
            return Ok(None);
        }

        let source_time = modified(source)?;
        let artifact_time = modified(&artifact)?;
        if artifact_time < source_time {
            log::debug!(
                "Shader artifact '{}' is stale, recompiling",
                artifact.display()
            );
            return Ok(None);
        }

        let bytes = fs::read(&artifact).map_err(|e| io_error(&artifact, e))?;
        match spirv_words(&bytes) {
            Some(words) => {
                log::debug!("Using cached shader artifact '{}'", artifact.display());
                Ok(Some(words))
            }
            None => {
                log::warn!(
                    "Discarding corrupt shader artifact '{}'",
                    artifact.display()
                );
                Ok(None)
            }
        }
    }

    /// Write a freshly compiled artifact, creating the cache directory if needed.
    pub fn store(
        &self,
        source: &Path,
        stage: ShaderStage,
        options: &CompileOptions,
        binary: &[u32],
    ) -> BindingResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let artifact = self.artifact_path(source, stage, options);
        fs::write(&artifact, bytemuck::cast_slice::<u32, u8>(binary))
            .map_err(|e| io_error(&artifact, e))?;
        Ok(artifact)
    }
}
