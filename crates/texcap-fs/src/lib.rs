use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use texcap_core::{CoreError, Dimensions, ReductionBackend, TextureDescriptor};

pub const SIDECAR_SUFFIX: &str = ".texcap.json";

/// Reduction backend for plain image files on disk. A resize re-encodes the
/// pixels; a mip bias cannot touch a loose file (there is no mip chain to
/// bias), so it is recorded in a sidecar next to the texture for whatever
/// pipeline consumes the files to honor.
#[derive(Debug, Clone)]
pub struct LooseFileBackend {
    output_dir: Option<PathBuf>,
    filter: FilterType,
}

impl Default for LooseFileBackend {
    fn default() -> Self {
        Self {
            output_dir: None,
            filter: FilterType::Lanczos3,
        }
    }
}

impl LooseFileBackend {
    pub fn new(output_dir: Option<PathBuf>, filter: FilterType) -> Self {
        Self { output_dir, filter }
    }

    /// Without an output directory the reduced file replaces the input.
    fn output_path_for(&self, input: &Path) -> PathBuf {
        match (&self.output_dir, input.file_name()) {
            (Some(dir), Some(name)) => dir.join(name),
            _ => input.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MipBiasSidecar {
    pub texture: String,
    pub mip_bias_level: u32,
    pub original_dimensions: Dimensions,
    pub effective_dimensions: Dimensions,
}

pub fn sidecar_path(texture_path: &Path) -> PathBuf {
    let mut raw = OsString::from(texture_path.as_os_str());
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

pub fn read_sidecar(texture_path: &Path) -> Result<MipBiasSidecar> {
    let path = sidecar_path(texture_path);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading sidecar {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing sidecar {}", path.display()))
}

fn write_sidecar(texture_path: &Path, sidecar: &MipBiasSidecar) -> Result<()> {
    let path = sidecar_path(texture_path);
    let serialized = serde_json::to_string_pretty(sidecar).context("serializing sidecar")?;
    fs::write(&path, serialized).with_context(|| format!("writing sidecar {}", path.display()))
}

fn resize_file(source: &Path, dest: &Path, target: Dimensions, filter: FilterType) -> Result<()> {
    let img =
        image::open(source).with_context(|| format!("opening texture {}", source.display()))?;
    let reduced = img.resize_exact(target.width, target.height, filter);
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
    }
    reduced
        .save(dest)
        .with_context(|| format!("saving reduced texture {}", dest.display()))
}

impl ReductionBackend for LooseFileBackend {
    fn apply_mip_bias(&self, texture: &TextureDescriptor, bias: u32) -> Result<(), CoreError> {
        let path = texture.path.as_deref().ok_or_else(|| {
            CoreError::Backend(format!("texture {} has no file path", texture.name))
        })?;
        let sidecar = MipBiasSidecar {
            texture: texture.name.clone(),
            mip_bias_level: bias,
            original_dimensions: texture.dimensions,
            effective_dimensions: texture.dimensions.halved(bias),
        };
        write_sidecar(path, &sidecar).map_err(|e| CoreError::Backend(e.to_string()))
    }

    fn apply_resize(
        &self,
        texture: &TextureDescriptor,
        target: Dimensions,
    ) -> Result<(), CoreError> {
        let path = texture.path.as_deref().ok_or_else(|| {
            CoreError::Backend(format!("texture {} has no file path", texture.name))
        })?;
        let source = texture.source_path.as_deref().unwrap_or(path);
        if !source.exists() {
            return Err(CoreError::SourceUnavailable);
        }
        let dest = self.output_path_for(path);
        resize_file(source, &dest, target, self.filter)
            .map_err(|e| CoreError::Backend(e.to_string()))
    }
}
