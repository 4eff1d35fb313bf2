//! Docker engine driven through its CLI.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;

use uuid::Uuid;

use crate::config::DockerConfig;
use crate::container::{ContainerEngine, ImageHandle, RunningContainer};
use crate::error::PlatformError;

#[derive(Debug, Clone)]
pub struct DockerEngine {
    binary: String,
    host: Option<String>,
}

impl DockerEngine {
    pub fn new(config: &DockerConfig) -> Self {
        DockerEngine {
            binary: config.binary.clone(),
            host: config.host.clone(),
        }
    }

    fn command(&self) -> Command {
        docker_command(&self.binary, self.host.as_deref())
    }

    /// Checks that the CLI can reach the engine.
    pub fn ping(&self) -> Result<(), PlatformError> {
        let output = self
            .command()
            .arg("version")
            .arg("--format")
            .arg("{{.Server.Version}}")
            .output()
            .map_err(|e| PlatformError::Container(format!("docker version failed: {}", e)))?;
        check(&output).map_err(|stderr| PlatformError::Container(format!("docker version failed: {}", stderr)))?;
        Ok(())
    }
}

fn docker_command(binary: &str, host: Option<&str>) -> Command {
    let mut command = Command::new(binary);
    if let Some(host) = host {
        command.arg("-H").arg(host);
    }
    command
}

fn check(output: &Output) -> Result<(), String> {
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

impl ContainerEngine for DockerEngine {
    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<ImageHandle, PlatformError> {
        let output = self
            .command()
            .arg("build")
            .arg("--quiet")
            .arg("--tag")
            .arg(tag)
            .arg(context_dir)
            .output()
            .map_err(|e| PlatformError::ImageBuildFailed(format!("docker build failed: {}", e)))?;
        check(&output).map_err(PlatformError::ImageBuildFailed)?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(PlatformError::ImageBuildFailed("docker build returned no image id".into()));
        }
        Ok(ImageHandle {
            id,
            tag: tag.to_string(),
        })
    }

    fn run(&self, image: &ImageHandle) -> Result<Box<dyn RunningContainer>, PlatformError> {
        let name = format!("smartlambda-{}", Uuid::new_v4());
        let mut child = self
            .command()
            .arg("run")
            .arg("--interactive")
            .arg("--name")
            .arg(&name)
            .arg(&image.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlatformError::Container(format!("docker run failed: {}", e)))?;

        // Drain stderr so a chatty entrypoint cannot block on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let container = name.clone();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::debug!(%container, "{}", line);
                }
            });
        }

        tracing::debug!(container = %name, image = %image.tag, "container started");
        Ok(Box::new(DockerContainer {
            name,
            binary: self.binary.clone(),
            host: self.host.clone(),
            child,
            stopped: false,
        }))
    }

    fn remove_image(&self, image: &ImageHandle) -> Result<(), PlatformError> {
        let output = self
            .command()
            .arg("rmi")
            .arg("--force")
            .arg(&image.id)
            .output()
            .map_err(|e| PlatformError::Container(format!("docker rmi failed: {}", e)))?;
        check(&output).map_err(|stderr| PlatformError::Container(format!("docker rmi failed: {}", stderr)))
    }
}

struct DockerContainer {
    name: String,
    binary: String,
    host: Option<String>,
    child: Child,
    stopped: bool,
}

impl RunningContainer for DockerContainer {
    fn id(&self) -> &str {
        &self.name
    }

    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.child
            .stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn Write + Send>)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let removed = docker_command(&self.binary, self.host.as_deref())
            .arg("rm")
            .arg("--force")
            .arg(&self.name)
            .output();
        // The CLI client exits once the container is gone; reap it either way.
        let _ = self.child.kill();
        let _ = self.child.wait();
        let output =
            removed.map_err(|e| PlatformError::Container(format!("docker rm failed: {}", e)))?;
        check(&output).map_err(|stderr| PlatformError::Container(format!("docker rm failed: {}", stderr)))
    }
}
