use crate::access::{AuthorizationService, Session};
use crate::error::PlatformError;
use crate::lambda::{
    AbstractLambda, Decorated, Lambda, LambdaServices, MonitoringLayer, PermissionLayer,
};
use crate::primitives::LambdaRecord;
use crate::types::UserId;

/// Hands out lambdas wrapped in the full decorator chain for one session.
#[derive(Clone)]
pub struct LambdaFactory {
    services: LambdaServices,
    auth: AuthorizationService,
    session: Session,
}

impl LambdaFactory {
    pub fn new(services: LambdaServices, auth: AuthorizationService, session: Session) -> Self {
        LambdaFactory {
            services,
            auth,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// A fresh, unsaved lambda.
    pub fn create_lambda(&self) -> Box<dyn AbstractLambda> {
        self.decorate(Lambda::new(self.services.clone()))
    }

    /// Looks a lambda up by its owner and name.
    pub fn lambda_by_owner_and_name(
        &self,
        owner: &UserId,
        name: &str,
    ) -> Result<Option<Box<dyn AbstractLambda>>, PlatformError> {
        self.services
            .repository
            .find(owner, name)
            .map(|record| self.load(record))
            .transpose()
    }

    /// Every lambda owned by `owner`, ordered by name.
    pub fn lambdas_of(&self, owner: &UserId) -> Result<Vec<Box<dyn AbstractLambda>>, PlatformError> {
        self.services
            .repository
            .of_owner(owner)
            .into_iter()
            .map(|record| self.load(record))
            .collect()
    }

    fn load(&self, record: LambdaRecord) -> Result<Box<dyn AbstractLambda>, PlatformError> {
        Ok(self.decorate(Lambda::from_record(record, self.services.clone())?))
    }

    // Permission runs outermost so a denied call never reaches monitoring.
    fn decorate(&self, lambda: Lambda) -> Box<dyn AbstractLambda> {
        let monitored = Decorated::new(
            Box::new(lambda),
            MonitoringLayer::new(
                self.services.repository.clone(),
                self.auth.clone(),
                self.session.clone(),
            ),
        );
        Box::new(Decorated::new(
            Box::new(monitored),
            PermissionLayer::new(self.auth.clone(), self.session.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::testing::{fixture, greeter};

    #[test]
    fn loads_saved_lambdas_behind_the_chain() {
        let f = fixture();
        let session = f.auth.begin_session();
        f.auth.authenticate(&session, &f.owner_key).unwrap();
        let factory = LambdaFactory::new(f.services.clone(), f.auth.clone(), session.clone());

        for name in ["zeta", "alpha"] {
            let mut lambda = factory.create_lambda();
            lambda.set_name(name).unwrap();
            lambda.set_owner(f.owner.id).unwrap();
            lambda.set_runtime("native").unwrap();
            lambda.deploy_binary(greeter()).unwrap();
            lambda.save().unwrap();
        }

        let names: Vec<_> = factory
            .lambdas_of(&f.owner.id)
            .unwrap()
            .iter()
            .map(|l| l.name().map(str::to_string))
            .collect();
        assert_eq!(names, vec![Some("alpha".to_string()), Some("zeta".to_string())]);

        let loaded = factory
            .lambda_by_owner_and_name(&f.owner.id, "alpha")
            .unwrap()
            .unwrap();
        assert!(loaded.is_saved());
        assert!(loaded.execute_sync(r#""x""#).unwrap().is_success());
        assert_eq!(loaded.monitoring_events().unwrap().len(), 1);

        assert!(factory
            .lambda_by_owner_and_name(&f.owner.id, "missing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn loaded_lambdas_enforce_the_loading_session() {
        let f = fixture();
        let owner_session = f.auth.begin_session();
        f.auth.authenticate(&owner_session, &f.owner_key).unwrap();
        let mut lambda =
            LambdaFactory::new(f.services.clone(), f.auth.clone(), owner_session).create_lambda();
        lambda.set_name("greeter").unwrap();
        lambda.set_owner(f.owner.id).unwrap();
        lambda.set_runtime("native").unwrap();
        lambda.deploy_binary(greeter()).unwrap();
        lambda.save().unwrap();

        let anonymous =
            LambdaFactory::new(f.services.clone(), f.auth.clone(), f.auth.begin_session());
        let mut loaded = anonymous
            .lambda_by_owner_and_name(&f.owner.id, "greeter")
            .unwrap()
            .unwrap();
        assert!(matches!(loaded.delete(), Err(PlatformError::NotAuthenticated)));
        assert!(f.services.repository.contains(&lambda.id()));
    }
}
