//! Throwaway image builds.
//!
//! Every build stages its files in a fresh directory named after a random
//! build id and tags the image with the same id. The directory is removed
//! whether or not the engine accepts the build.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::container::{ContainerEngine, ImageHandle};
use crate::error::PlatformError;

pub const DOCKERFILE: &str = "Dockerfile";
pub const TAG_REPOSITORY: &str = "smartlambda";
/// Directory the build context is copied to inside the image.
pub const IMAGE_WORKDIR: &str = "/lambda";

#[derive(Clone)]
struct StagedFile {
    name: String,
    contents: Vec<u8>,
    executable: bool,
}

#[derive(Clone)]
pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
    staging_root: Option<PathBuf>,
    template: Option<String>,
    command: Vec<String>,
    files: Vec<StagedFile>,
}

impl ImageBuilder {
    pub fn new(engine: Arc<dyn ContainerEngine>, staging_root: Option<PathBuf>) -> Self {
        ImageBuilder {
            engine,
            staging_root,
            template: None,
            command: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn set_template(&mut self, template: &str) -> &mut Self {
        self.template = Some(template.to_string());
        self
    }

    /// Whitespace-separated launch command.
    pub fn set_command(&mut self, command: &str) -> &mut Self {
        self.command = command.split_whitespace().map(str::to_string).collect();
        self
    }

    /// Adds a file to the build context root. Names are single path components.
    pub fn store_file(
        &mut self,
        contents: Vec<u8>,
        name: &str,
        executable: bool,
    ) -> Result<&mut Self, PlatformError> {
        let mut components = Path::new(name).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single || name == DOCKERFILE {
            return Err(PlatformError::ImageBuildFailed(format!(
                "invalid build context file name: {:?}",
                name
            )));
        }
        self.files.retain(|f| f.name != name);
        self.files.push(StagedFile {
            name: name.to_string(),
            contents,
            executable,
        });
        Ok(self)
    }

    /// The image descriptor for the current template and command.
    pub fn dockerfile(&self) -> Result<String, PlatformError> {
        let template = self
            .template
            .as_deref()
            .ok_or_else(|| PlatformError::ImageBuildFailed("no runtime template set".into()))?;
        if self.command.is_empty() {
            return Err(PlatformError::ImageBuildFailed("no launch command set".into()));
        }
        let cmd = serde_json::to_string(&self.command)
            .map_err(|e| PlatformError::ImageBuildFailed(e.to_string()))?;
        Ok(format!(
            "FROM {}\nCOPY . {}\nWORKDIR {}\nCMD {}\n",
            template, IMAGE_WORKDIR, IMAGE_WORKDIR, cmd
        ))
    }

    pub fn build(&self) -> Result<ImageHandle, PlatformError> {
        let dockerfile = self.dockerfile()?;
        let build_id = Uuid::new_v4();
        let tag = format!("{}/{}", TAG_REPOSITORY, build_id);

        let prefix = format!("smartlambda-build-{}", build_id);
        let mut staging_builder = tempfile::Builder::new();
        staging_builder.prefix(&prefix).rand_bytes(0);
        let staging = match &self.staging_root {
            Some(root) => staging_builder.tempdir_in(root),
            None => staging_builder.tempdir(),
        }
        .map_err(|e| PlatformError::ImageBuildFailed(format!("create staging directory: {}", e)))?;

        let span = tracing::info_span!("image_build", %tag, files = self.files.len());
        let _enter = span.enter();

        self.stage(staging.path(), &dockerfile)?;
        let result = self.engine.build_image(staging.path(), &tag);
        if let Err(e) = staging.close() {
            tracing::warn!(error = %e, "failed to remove staging directory");
        }
        match &result {
            Ok(image) => tracing::info!(image = %image.id, "image built"),
            Err(e) => tracing::warn!(error = %e, "image build failed"),
        }
        result
    }

    fn stage(&self, dir: &Path, dockerfile: &str) -> Result<(), PlatformError> {
        let io = |what: &str, e: std::io::Error| {
            PlatformError::ImageBuildFailed(format!("stage {}: {}", what, e))
        };
        fs::write(dir.join(DOCKERFILE), dockerfile).map_err(|e| io(DOCKERFILE, e))?;
        for file in &self.files {
            let path = dir.join(&file.name);
            fs::write(&path, &file.contents).map_err(|e| io(file.name.as_str(), e))?;
            if file.executable {
                mark_executable(&path).map_err(|e| io(file.name.as_str(), e))?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
