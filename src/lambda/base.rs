//! The undecorated lambda: lifecycle state, image builds and execution.
//!
//! No authorization happens here; that is the permission layer's job.

use std::sync::Arc;

use crate::container::{ImageBuilder, ImageHandle};
use crate::error::PlatformError;
use crate::execution::artifact::{self, ArtifactError};
use crate::execution::ExecutionOutcome;
use crate::kernel::runtime::Runtime;
use crate::lambda::{AbstractLambda, LambdaServices, PendingExecution};
use crate::primitives::{LambdaRecord, MonitoringEvent, ScheduledEvent};
use crate::types::{LambdaId, Subject, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    New,
    Saved,
    Deleted,
}

pub struct Lambda {
    id: LambdaId,
    name: Option<String>,
    owner: Option<UserId>,
    runtime: Option<Arc<Runtime>>,
    is_async: bool,
    binary: Option<Vec<u8>>,
    /// Binary or runtime changed since the current image was built.
    needs_build: bool,
    image: Option<ImageHandle>,
    version: u64,
    lifecycle: Lifecycle,
    services: LambdaServices,
}

impl Lambda {
    pub(crate) fn new(services: LambdaServices) -> Self {
        Lambda {
            id: LambdaId::new(),
            name: None,
            owner: None,
            runtime: None,
            is_async: false,
            binary: None,
            needs_build: false,
            image: None,
            version: 0,
            lifecycle: Lifecycle::New,
            services,
        }
    }

    pub(crate) fn from_record(record: LambdaRecord, services: LambdaServices) -> Result<Self, PlatformError> {
        let runtime = services.runtimes.require(&record.runtime)?;
        Ok(Lambda {
            id: record.id,
            name: Some(record.name),
            owner: Some(record.owner),
            runtime: Some(runtime),
            is_async: record.is_async,
            binary: Some(record.binary),
            needs_build: false,
            image: record.image,
            version: record.version,
            lifecycle: Lifecycle::Saved,
            services,
        })
    }

    pub fn binary(&self) -> Option<&[u8]> {
        self.binary.as_deref()
    }

    /// Image of the last saved version.
    pub fn image(&self) -> Option<&ImageHandle> {
        self.image.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn not_found(&self) -> PlatformError {
        PlatformError::LambdaNotFound(self.id.to_string())
    }

    fn ensure_not_deleted(&self) -> Result<(), PlatformError> {
        if self.lifecycle == Lifecycle::Deleted {
            return Err(self.not_found());
        }
        Ok(())
    }

    /// Saved by this handle and still present (another handle may have deleted it).
    fn ensure_persisted(&self) -> Result<(), PlatformError> {
        if self.lifecycle != Lifecycle::Saved || !self.services.repository.contains(&self.id) {
            return Err(self.not_found());
        }
        Ok(())
    }

    fn require_runtime(&self) -> Result<&Arc<Runtime>, PlatformError> {
        self.runtime
            .as_ref()
            .ok_or_else(|| PlatformError::InvalidLambdaDefinition("no runtime selected".into()))
    }

    fn require_binary(&self) -> Result<&[u8], PlatformError> {
        self.binary
            .as_deref()
            .ok_or_else(|| PlatformError::InvalidLambdaDefinition("no binary deployed".into()))
    }

    fn build_image(&self) -> Result<ImageHandle, PlatformError> {
        let runtime = self.require_runtime()?;
        let binary = self.require_binary()?;
        let mut builder = ImageBuilder::new(
            self.services.engine.clone(),
            self.services.staging_root.clone(),
        );
        runtime.setup(&mut builder, binary.to_vec())?;
        builder.build()
    }

    fn discard_image(&self, image: &ImageHandle) {
        if let Err(e) = self.services.engine.remove_image(image) {
            tracing::warn!(lambda = %self.id, image = %image.tag, error = %e, "failed to remove image");
        }
    }

    fn record(&self, image: Option<ImageHandle>, version: u64) -> Result<LambdaRecord, PlatformError> {
        let name = self
            .name
            .clone()
            .ok_or_else(|| PlatformError::InvalidLambdaDefinition("no name set".into()))?;
        let owner = self
            .owner
            .ok_or_else(|| PlatformError::InvalidLambdaDefinition("no owner set".into()))?;
        Ok(LambdaRecord {
            id: self.id,
            name,
            owner,
            runtime: self.require_runtime()?.name().to_string(),
            is_async: self.is_async,
            binary: self.require_binary()?.to_vec(),
            image,
            version,
        })
    }

    /// The image of the persisted version, as seen by any handle.
    fn current_image(&self) -> Result<ImageHandle, PlatformError> {
        self.ensure_persisted()?;
        let record = self
            .services
            .repository
            .get(&self.id)
            .ok_or_else(|| self.not_found())?;
        record
            .image
            .ok_or_else(|| PlatformError::InvalidLambdaDefinition("lambda has no image".into()))
    }
}

impl AbstractLambda for Lambda {
    fn id(&self) -> LambdaId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn owner(&self) -> Option<UserId> {
        self.owner
    }

    fn runtime(&self) -> Option<&str> {
        self.runtime.as_ref().map(|r| r.name())
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn is_saved(&self) -> bool {
        self.lifecycle == Lifecycle::Saved
    }

    fn set_name(&mut self, name: &str) -> Result<(), PlatformError> {
        if self.lifecycle != Lifecycle::New {
            return Err(PlatformError::InvalidRequest("a lambda's name cannot change".into()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(PlatformError::InvalidLambdaDefinition("name must not be empty".into()));
        }
        self.name = Some(name.to_string());
        Ok(())
    }

    fn set_owner(&mut self, owner: UserId) -> Result<(), PlatformError> {
        if self.lifecycle != Lifecycle::New {
            return Err(PlatformError::InvalidRequest("a lambda's owner cannot change".into()));
        }
        if self.services.store.user(&owner).is_none() {
            return Err(PlatformError::UserNotFound(owner.to_string()));
        }
        self.owner = Some(owner);
        Ok(())
    }

    fn set_runtime(&mut self, runtime: &str) -> Result<(), PlatformError> {
        self.ensure_not_deleted()?;
        let runtime = self.services.runtimes.require(runtime)?;
        if self.runtime.as_ref().map(|r| r.name()) != Some(runtime.name()) {
            self.needs_build = self.binary.is_some();
            self.runtime = Some(runtime);
        }
        Ok(())
    }

    fn set_async(&mut self, is_async: bool) {
        self.is_async = is_async;
    }

    fn deploy_binary(&mut self, artifact: Vec<u8>) -> Result<(), PlatformError> {
        self.ensure_not_deleted()?;
        if artifact.is_empty() {
            return Err(PlatformError::InvalidLambdaDefinition("artifact is empty".into()));
        }
        // A metadata descriptor that is present must be valid. Artifacts
        // without one are left to the runtime's entrypoint to reject.
        match artifact::read_metadata(&artifact) {
            Err(ArtifactError::InvalidMetadata(reason)) => {
                return Err(PlatformError::InvalidLambdaDefinition(reason));
            }
            Err(e) => tracing::debug!(lambda = %self.id, error = %e, "artifact metadata not checked"),
            Ok(_) => {}
        }
        self.binary = Some(artifact);
        self.needs_build = true;
        Ok(())
    }

    fn save(&mut self) -> Result<(), PlatformError> {
        self.ensure_not_deleted()?;
        if self.lifecycle == Lifecycle::Saved {
            return Err(PlatformError::InvalidRequest(
                "lambda is already saved; use update".into(),
            ));
        }
        // Validate everything before the (expensive) build.
        let draft = self.record(None, 1)?;
        let owner = draft.owner;
        if self.services.store.user(&owner).is_none() {
            return Err(PlatformError::UserNotFound(draft.owner.to_string()));
        }
        if self.services.repository.find(&draft.owner, &draft.name).is_some() {
            return Err(PlatformError::DuplicateLambda {
                owner: draft.owner.to_string(),
                name: draft.name,
            });
        }

        let image = self.build_image()?;
        let record = LambdaRecord {
            image: Some(image.clone()),
            ..draft
        };
        if let Err(e) = self.services.repository.insert(record) {
            self.discard_image(&image);
            return Err(e);
        }
        self.services
            .store
            .register_subject(Subject::Lambda(self.id), owner);
        self.image = Some(image);
        self.version = 1;
        self.needs_build = false;
        self.lifecycle = Lifecycle::Saved;
        tracing::info!(lambda = %self.id, name = ?self.name, "lambda saved");
        Ok(())
    }

    fn update(&mut self) -> Result<(), PlatformError> {
        self.ensure_persisted()?;
        let rebuilt = if self.needs_build {
            Some(self.build_image()?)
        } else {
            None
        };
        let current = self
            .services
            .repository
            .get(&self.id)
            .ok_or_else(|| self.not_found())?;
        let image = rebuilt.clone().or_else(|| current.image.clone());
        let version = current.version + 1;
        let record = self.record(image.clone(), version)?;
        let previous = current.image;
        if let Err(e) = self.services.repository.update(record) {
            if let Some(fresh) = &rebuilt {
                self.discard_image(fresh);
            }
            return Err(e);
        }
        if rebuilt.is_some() {
            if let Some(old) = previous.filter(|old| Some(old) != image.as_ref()) {
                self.discard_image(&old);
            }
        }
        self.image = image;
        self.version = version;
        self.needs_build = false;
        tracing::info!(lambda = %self.id, version = self.version, rebuilt = rebuilt.is_some(), "lambda updated");
        Ok(())
    }

    fn delete(&mut self) -> Result<(), PlatformError> {
        self.ensure_persisted()?;
        let removed = self.services.repository.remove(&self.id);
        self.services.store.forget_subject(&Subject::Lambda(self.id));
        if let Some(image) = removed.and_then(|r| r.image) {
            self.discard_image(&image);
        }
        self.lifecycle = Lifecycle::Deleted;
        self.image = None;
        tracing::info!(lambda = %self.id, "lambda deleted");
        Ok(())
    }

    fn execute_sync(&self, parameters: &str) -> Result<ExecutionOutcome, PlatformError> {
        let image = self.current_image()?;
        Ok(self.services.bridge.execute(&image, parameters))
    }

    fn execute_async(&self, parameters: &str) -> Result<PendingExecution, PlatformError> {
        let image = self.current_image()?;
        let bridge = self.services.bridge.clone();
        let parameters = parameters.to_string();
        PendingExecution::spawn(move || bridge.execute(&image, &parameters))
    }

    fn schedule(&mut self, event: ScheduledEvent) -> Result<(), PlatformError> {
        self.ensure_persisted()?;
        if event.name.trim().is_empty() || event.cron_expression.trim().is_empty() {
            return Err(PlatformError::InvalidRequest(
                "scheduled events need a name and a cron expression".into(),
            ));
        }
        if self.services.store.key(&event.key).is_none() {
            return Err(PlatformError::KeyNotFound(event.key.to_string()));
        }
        tracing::debug!(lambda = %self.id, event = %event.name, "schedule stored");
        self.services.repository.upsert_schedule(self.id, event);
        Ok(())
    }

    fn scheduled_event(&self, name: &str) -> Result<Option<ScheduledEvent>, PlatformError> {
        self.ensure_persisted()?;
        Ok(self.services.repository.schedule(&self.id, name))
    }

    fn scheduled_events(&self) -> Result<Vec<ScheduledEvent>, PlatformError> {
        self.ensure_persisted()?;
        Ok(self.services.repository.schedules(&self.id))
    }

    fn monitoring_events(&self) -> Result<Vec<MonitoringEvent>, PlatformError> {
        self.ensure_persisted()?;
        Ok(self.services.repository.events(&self.id))
    }

    fn undecorated(&self) -> &Lambda {
        self
    }
}
