//! Deployable artifact format: a tar archive carrying its entry metadata at
//! [`METADATA_PATH`].

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path};

use tar::{Archive, Builder, EntryType, Header};
use thiserror::Error;

use crate::primitives::LambdaMetadata;

pub const METADATA_PATH: &str = "META-INF/lambda.json";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact io: {0}")]
    Io(#[from] io::Error),
    #[error("artifact has no {}", METADATA_PATH)]
    MissingMetadata,
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    /// Absolute paths, `..` components, links and device entries.
    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),
}

/// Assembles an artifact in memory.
pub struct ArtifactBuilder {
    builder: Builder<Vec<u8>>,
}

impl ArtifactBuilder {
    pub fn new(metadata: &LambdaMetadata) -> Result<Self, ArtifactError> {
        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| ArtifactError::InvalidMetadata(e.to_string()))?;
        let mut builder = ArtifactBuilder {
            builder: Builder::new(Vec::new()),
        };
        builder.append(METADATA_PATH, &json, false)?;
        Ok(builder)
    }

    /// An artifact with no metadata resource. Only useful to exercise the
    /// failure path of a broken deployment.
    pub fn without_metadata() -> Self {
        ArtifactBuilder {
            builder: Builder::new(Vec::new()),
        }
    }

    pub fn file(mut self, path: &str, contents: &[u8], executable: bool) -> Result<Self, ArtifactError> {
        self.append(path, contents, executable)?;
        Ok(self)
    }

    fn append(&mut self, path: &str, contents: &[u8], executable: bool) -> Result<(), ArtifactError> {
        check_relative(Path::new(path))?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(if executable { 0o755 } else { 0o644 });
        header.set_mtime(0);
        header.set_cksum();
        self.builder.append_data(&mut header, path, contents)?;
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>, ArtifactError> {
        Ok(self.builder.into_inner()?)
    }
}

/// Reads and validates the metadata descriptor without unpacking anything else.
pub fn read_metadata(artifact: &[u8]) -> Result<LambdaMetadata, ArtifactError> {
    let mut archive = Archive::new(artifact);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_metadata = entry.path()? == Path::new(METADATA_PATH);
        if !is_metadata {
            continue;
        }
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw)?;
        let metadata: LambdaMetadata = serde_json::from_slice(&raw)
            .map_err(|e| ArtifactError::InvalidMetadata(e.to_string()))?;
        metadata
            .check_consistency()
            .map_err(ArtifactError::InvalidMetadata)?;
        return Ok(metadata);
    }
    Err(ArtifactError::MissingMetadata)
}

/// Extracts regular files and directories into `dest`, keeping file modes.
pub fn unpack(artifact: &[u8], dest: &Path) -> Result<(), ArtifactError> {
    let mut archive = Archive::new(artifact);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let path = entry.path()?.into_owned();
        match entry_type {
            EntryType::Regular | EntryType::Directory => {}
            _ => return Err(ArtifactError::UnsafeEntry(path.display().to_string())),
        }
        check_relative(&path)?;
        let target = dest.join(&path);
        if entry_type == EntryType::Directory {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
        }
    }
    Ok(())
}

fn check_relative(path: &Path) -> Result<(), ArtifactError> {
    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            _ => return Err(ArtifactError::UnsafeEntry(path.display().to_string())),
        }
    }
    if has_normal {
        Ok(())
    } else {
        Err(ArtifactError::UnsafeEntry(path.display().to_string()))
    }
}
