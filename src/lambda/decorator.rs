//! Cross-cutting layers around a lambda.
//!
//! A [`Decorated`] lambda runs its layer's hooks around every operation and
//! delegates the operation itself to the wrapped lambda, so layers stack:
//! the outermost layer's `before` runs first, the innermost layer observes
//! the outcome first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::access::{AuthorizationService, Session};
use crate::error::PlatformError;
use crate::execution::ExecutionOutcome;
use crate::lambda::{AbstractLambda, Lambda, LambdaRepository, PendingExecution};
use crate::primitives::{now_millis, MonitoringEvent, ScheduledEvent};
use crate::rights::LambdaOperation;
use crate::types::{KeyId, LambdaId, PermissionType, Subject, UserId};

/// One concern applied around a lambda's operations.
pub trait LambdaLayer: Send + Sync {
    /// Runs before `op` is delegated. An error aborts the operation.
    fn before(&self, _op: LambdaOperation, _target: &dyn AbstractLambda) -> Result<(), PlatformError> {
        Ok(())
    }

    /// The key an execution is attributed to. Read before the execution is
    /// delegated and handed to the `observe_*` hooks.
    fn acting_key(&self) -> Option<KeyId> {
        None
    }

    /// Sees the outcome of a synchronous execution that was started.
    fn observe_sync(
        &self,
        _target: &dyn AbstractLambda,
        _acting: Option<KeyId>,
        _started_at_ms: u64,
        _duration: Duration,
        _outcome: &ExecutionOutcome,
    ) {
    }

    /// May attach a continuation to an asynchronous execution.
    fn observe_async(
        &self,
        _target: &dyn AbstractLambda,
        _acting: Option<KeyId>,
        pending: PendingExecution,
    ) -> PendingExecution {
        pending
    }
}

/// A layer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLayer;

impl LambdaLayer for NoopLayer {}

pub struct Decorated<L> {
    inner: Box<dyn AbstractLambda>,
    layer: L,
}

impl<L: LambdaLayer> Decorated<L> {
    pub fn new(inner: Box<dyn AbstractLambda>, layer: L) -> Self {
        Decorated { inner, layer }
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn into_inner(self) -> Box<dyn AbstractLambda> {
        self.inner
    }

    fn check(&self, op: LambdaOperation) -> Result<(), PlatformError> {
        self.layer.before(op, self.inner.as_ref())
    }
}

impl<L: LambdaLayer> AbstractLambda for Decorated<L> {
    fn id(&self) -> LambdaId {
        self.inner.id()
    }

    fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    fn owner(&self) -> Option<UserId> {
        self.inner.owner()
    }

    fn runtime(&self) -> Option<&str> {
        self.inner.runtime()
    }

    fn is_async(&self) -> bool {
        self.inner.is_async()
    }

    fn is_saved(&self) -> bool {
        self.inner.is_saved()
    }

    fn set_name(&mut self, name: &str) -> Result<(), PlatformError> {
        self.inner.set_name(name)
    }

    fn set_owner(&mut self, owner: UserId) -> Result<(), PlatformError> {
        self.inner.set_owner(owner)
    }

    fn set_runtime(&mut self, runtime: &str) -> Result<(), PlatformError> {
        self.inner.set_runtime(runtime)
    }

    fn set_async(&mut self, is_async: bool) {
        self.inner.set_async(is_async)
    }

    fn deploy_binary(&mut self, artifact: Vec<u8>) -> Result<(), PlatformError> {
        self.check(LambdaOperation::DeployBinary)?;
        self.inner.deploy_binary(artifact)
    }

    fn save(&mut self) -> Result<(), PlatformError> {
        self.check(LambdaOperation::Save)?;
        self.inner.save()
    }

    fn update(&mut self) -> Result<(), PlatformError> {
        self.check(LambdaOperation::Update)?;
        self.inner.update()
    }

    fn delete(&mut self) -> Result<(), PlatformError> {
        self.check(LambdaOperation::Delete)?;
        self.inner.delete()
    }

    fn execute_sync(&self, parameters: &str) -> Result<ExecutionOutcome, PlatformError> {
        self.check(LambdaOperation::ExecuteSync)?;
        let acting = self.layer.acting_key();
        let started_at_ms = now_millis();
        let clock = Instant::now();
        let outcome = self.inner.execute_sync(parameters)?;
        self.layer
            .observe_sync(self.inner.as_ref(), acting, started_at_ms, clock.elapsed(), &outcome);
        Ok(outcome)
    }

    fn execute_async(&self, parameters: &str) -> Result<PendingExecution, PlatformError> {
        self.check(LambdaOperation::ExecuteAsync)?;
        let acting = self.layer.acting_key();
        let pending = self.inner.execute_async(parameters)?;
        Ok(self.layer.observe_async(self.inner.as_ref(), acting, pending))
    }

    fn schedule(&mut self, event: ScheduledEvent) -> Result<(), PlatformError> {
        self.check(LambdaOperation::Schedule)?;
        self.inner.schedule(event)
    }

    fn scheduled_event(&self, name: &str) -> Result<Option<ScheduledEvent>, PlatformError> {
        self.check(LambdaOperation::ReadSchedule)?;
        self.inner.scheduled_event(name)
    }

    fn scheduled_events(&self) -> Result<Vec<ScheduledEvent>, PlatformError> {
        self.check(LambdaOperation::ReadSchedule)?;
        self.inner.scheduled_events()
    }

    fn monitoring_events(&self) -> Result<Vec<MonitoringEvent>, PlatformError> {
        self.check(LambdaOperation::ReadMonitoring)?;
        self.inner.monitoring_events()
    }

    fn undecorated(&self) -> &Lambda {
        self.inner.undecorated()
    }
}

// --- Permission -------------------------------------------------------------

/// Requires the session's key to hold the operation's permission.
///
/// Persisted lambdas are checked against the lambda itself, and one deleted
/// through another handle is reported as not found. Before the first
/// save the lambda is not a subject yet, so `save` and `deploy_binary` are
/// checked as CREATE on the owner; everything else is left to the lambda,
/// which reports it as not found.
#[derive(Clone)]
pub struct PermissionLayer {
    auth: AuthorizationService,
    session: Session,
}

impl PermissionLayer {
    pub fn new(auth: AuthorizationService, session: Session) -> Self {
        PermissionLayer { auth, session }
    }
}

impl LambdaLayer for PermissionLayer {
    fn before(&self, op: LambdaOperation, target: &dyn AbstractLambda) -> Result<(), PlatformError> {
        if target.is_saved() {
            let subject = Subject::Lambda(target.id());
            let key = self.auth.require_key(&self.session)?;
            if self.auth.store().owner_of(&subject).is_none() {
                return Err(PlatformError::LambdaNotFound(target.id().to_string()));
            }
            self.auth.store().require(&key, subject, op.required_permission())?;
            return Ok(());
        }
        if !op.allowed_before_save() {
            return Ok(());
        }
        let owner = target
            .owner()
            .ok_or_else(|| PlatformError::InvalidLambdaDefinition("no owner set".into()))?;
        self.auth
            .require(&self.session, Subject::User(owner), PermissionType::Create)?;
        Ok(())
    }
}

// --- Monitoring -------------------------------------------------------------

/// Records one [`MonitoringEvent`] per execution that was started.
#[derive(Clone)]
pub struct MonitoringLayer {
    repository: Arc<LambdaRepository>,
    auth: AuthorizationService,
    session: Session,
}

impl MonitoringLayer {
    pub fn new(repository: Arc<LambdaRepository>, auth: AuthorizationService, session: Session) -> Self {
        MonitoringLayer {
            repository,
            auth,
            session,
        }
    }
}

impl LambdaLayer for MonitoringLayer {
    fn acting_key(&self) -> Option<KeyId> {
        self.auth.current_key(&self.session).map(|k| k.id)
    }

    fn observe_sync(
        &self,
        target: &dyn AbstractLambda,
        acting: Option<KeyId>,
        started_at_ms: u64,
        duration: Duration,
        outcome: &ExecutionOutcome,
    ) {
        self.repository.record_event(MonitoringEvent {
            lambda: target.id(),
            key: acting,
            started_at_ms,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            outcome: outcome.class(),
            asynchronous: false,
        });
    }

    fn observe_async(
        &self,
        target: &dyn AbstractLambda,
        acting: Option<KeyId>,
        pending: PendingExecution,
    ) -> PendingExecution {
        let lambda = target.id();
        let repository = self.repository.clone();
        let started_at_ms = now_millis();
        let clock = Instant::now();
        pending.inspect(move |outcome| {
            repository.record_event(MonitoringEvent {
                lambda,
                key: acting,
                started_at_ms,
                duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
                outcome: outcome.class(),
                asynchronous: true,
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::testing::{fixture, greeter, Fixture};
    use crate::primitives::OutcomeClass;
    use serde_json::json;

    fn chain(f: &Fixture, session: &Session) -> Box<dyn AbstractLambda> {
        let base: Box<dyn AbstractLambda> = Box::new(Lambda::new(f.services.clone()));
        let monitored = Decorated::new(
            base,
            MonitoringLayer::new(f.services.repository.clone(), f.auth.clone(), session.clone()),
        );
        Box::new(Decorated::new(
            Box::new(monitored),
            PermissionLayer::new(f.auth.clone(), session.clone()),
        ))
    }

    fn saved(f: &Fixture, session: &Session) -> Box<dyn AbstractLambda> {
        let mut lambda = chain(f, session);
        lambda.set_name("greeter").unwrap();
        lambda.set_owner(f.owner.id).unwrap();
        lambda.set_runtime("native").unwrap();
        lambda.deploy_binary(greeter()).unwrap();
        lambda.save().unwrap();
        lambda
    }

    #[test]
    fn noop_layer_is_transparent() {
        let f = fixture();
        let mut plain: Box<dyn AbstractLambda> = Box::new(Lambda::new(f.services.clone()));
        let mut wrapped: Box<dyn AbstractLambda> = Box::new(Decorated::new(
            Box::new(Decorated::new(Box::new(Lambda::new(f.services.clone())), NoopLayer)),
            NoopLayer,
        ));
        for (lambda, name) in [(&mut plain, "plain"), (&mut wrapped, "wrapped")] {
            lambda.set_name(name).unwrap();
            lambda.set_owner(f.owner.id).unwrap();
            lambda.set_runtime("native").unwrap();
            lambda.deploy_binary(greeter()).unwrap();
            lambda.save().unwrap();
        }
        assert_eq!(
            plain.execute_sync(r#""a""#).unwrap(),
            wrapped.execute_sync(r#""a""#).unwrap()
        );
        assert_eq!(wrapped.undecorated().id(), wrapped.id());
        assert_eq!(wrapped.undecorated().version(), 1);
        assert!(wrapped.monitoring_events().unwrap().is_empty());
    }

    #[test]
    fn unauthenticated_session_cannot_save() {
        let f = fixture();
        let session = f.auth.begin_session();
        let mut lambda = chain(&f, &session);
        lambda.set_name("greeter").unwrap();
        lambda.set_owner(f.owner.id).unwrap();
        lambda.set_runtime("native").unwrap();
        assert!(matches!(
            lambda.deploy_binary(greeter()),
            Err(PlatformError::NotAuthenticated)
        ));
        assert!(matches!(lambda.save(), Err(PlatformError::NotAuthenticated)));
        assert_eq!(f.engine.builds(), 0);
    }

    #[test]
    fn saving_for_another_user_needs_create_on_them() {
        let f = fixture();
        let (_, stranger) = f.services.store.register_user("stranger").unwrap();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &stranger).unwrap();
        let mut lambda = chain(&f, &session);
        lambda.set_owner(f.owner.id).unwrap();
        assert!(matches!(
            lambda.deploy_binary(greeter()),
            Err(PlatformError::InsufficientPermissions {
                permission: PermissionType::Create,
                ..
            })
        ));

        f.services
            .store
            .grant_permission(&f.owner_key, &stranger.id, Subject::User(f.owner.id), PermissionType::Create)
            .unwrap();
        lambda.set_name("greeter").unwrap();
        lambda.set_runtime("native").unwrap();
        lambda.deploy_binary(greeter()).unwrap();
        lambda.save().unwrap();
        assert_eq!(lambda.owner(), Some(f.owner.id));
    }

    #[test]
    fn unsaved_operations_without_an_owner_are_invalid() {
        let f = fixture();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &f.owner_key).unwrap();
        let mut lambda = chain(&f, &session);
        assert!(matches!(
            lambda.deploy_binary(greeter()),
            Err(PlatformError::InvalidLambdaDefinition(_))
        ));
        assert!(matches!(lambda.execute_sync("{}"), Err(PlatformError::LambdaNotFound(_))));
    }

    #[test]
    fn monitoring_records_each_started_execution() {
        let f = fixture();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &f.owner_key).unwrap();
        let lambda = saved(&f, &session);

        let outcome = lambda.execute_sync(r#""world""#).unwrap();
        assert_eq!(outcome.value(), Some(&json!("hello world")));
        let failed = lambda.execute_sync("not json").unwrap();
        assert!(!failed.is_success());

        let events = lambda.monitoring_events().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.key == Some(f.owner_key.id) && !e.asynchronous));
        assert_eq!(events[0].outcome, OutcomeClass::Success);
        assert_eq!(events[1].outcome, failed.class());
    }

    #[test]
    fn denied_execution_records_nothing() {
        let f = fixture();
        let owner_session = f.auth.begin_session();
        f.auth.authenticate(&owner_session, &f.owner_key).unwrap();
        let lambda = saved(&f, &owner_session);

        let (_, other) = f.services.store.register_user("other").unwrap();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &other).unwrap();
        let base = f.services.repository.get(&lambda.id()).unwrap();
        let foreign: Box<dyn AbstractLambda> = {
            let inner = Lambda::from_record(base, f.services.clone()).unwrap();
            let monitored = Decorated::new(
                Box::new(inner) as Box<dyn AbstractLambda>,
                MonitoringLayer::new(f.services.repository.clone(), f.auth.clone(), session.clone()),
            );
            Box::new(Decorated::new(
                Box::new(monitored),
                PermissionLayer::new(f.auth.clone(), session.clone()),
            ))
        };
        assert!(matches!(
            foreign.execute_sync(r#""x""#),
            Err(PlatformError::InsufficientPermissions {
                permission: PermissionType::Execute,
                ..
            })
        ));
        assert_eq!(f.engine.runs(), 0);
        assert!(lambda.monitoring_events().unwrap().is_empty());
    }

    /// Ends its session once the wrapped execution has produced an outcome.
    struct EndSessionAfterRun(Session);

    impl LambdaLayer for EndSessionAfterRun {
        fn observe_sync(
            &self,
            _target: &dyn AbstractLambda,
            _acting: Option<KeyId>,
            _started_at_ms: u64,
            _duration: Duration,
            _outcome: &ExecutionOutcome,
        ) {
            self.0.end();
        }
    }

    #[test]
    fn execution_is_attributed_to_the_key_it_started_with() {
        let f = fixture();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &f.owner_key).unwrap();
        let id = saved(&f, &session).id();

        let record = f.services.repository.get(&id).unwrap();
        let inner: Box<dyn AbstractLambda> = Box::new(Decorated::new(
            Box::new(Lambda::from_record(record, f.services.clone()).unwrap()),
            EndSessionAfterRun(session.clone()),
        ));
        let lambda = Decorated::new(
            inner,
            MonitoringLayer::new(f.services.repository.clone(), f.auth.clone(), session.clone()),
        );

        assert!(lambda.execute_sync(r#""x""#).unwrap().is_success());
        assert!(!session.is_authenticated());
        let events = f.services.repository.events(&id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, Some(f.owner_key.id));
    }

    #[test]
    fn lambda_deleted_through_another_handle_is_not_found() {
        let f = fixture();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &f.owner_key).unwrap();
        let mut first = saved(&f, &session);

        let record = f.services.repository.get(&first.id()).unwrap();
        let mut second: Box<dyn AbstractLambda> = Box::new(Decorated::new(
            Box::new(Lambda::from_record(record, f.services.clone()).unwrap()),
            PermissionLayer::new(f.auth.clone(), session.clone()),
        ));
        assert!(second.is_saved());

        first.delete().unwrap();
        assert!(matches!(second.execute_sync(r#""x""#), Err(PlatformError::LambdaNotFound(_))));
        assert!(matches!(second.update(), Err(PlatformError::LambdaNotFound(_))));
        assert!(matches!(second.delete(), Err(PlatformError::LambdaNotFound(_))));
        assert_eq!(f.engine.runs(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_execution_is_monitored_after_the_session_ends() {
        let f = fixture();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &f.owner_key).unwrap();
        let lambda = saved(&f, &session);

        let pending = lambda.execute_async(r#""later""#).unwrap();
        session.end();
        assert_eq!(pending.await.value(), Some(&json!("hello later")));

        let events = f.services.repository.events(&lambda.id());
        assert_eq!(events.len(), 1);
        assert!(events[0].asynchronous);
        assert_eq!(events[0].key, Some(f.owner_key.id));
    }
}
