use crate::status::release;
use crate::{ControlError, ControlResult};
use replset_core::{with_timeout, AdminConnector, AdminSession, Candidate, RoleGrant, Secret};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Application account to provision on the primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUser {
    pub database: String,
    pub username: String,
    pub password: Secret,
    pub roles: Vec<RoleGrant>,
}

impl AppUser {
    /// A user with `readWrite` on its own database.
    pub fn read_write(
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<Secret>,
    ) -> Self {
        let database = database.into();
        Self {
            roles: vec![RoleGrant::new("readWrite", database.clone())],
            database,
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

/// Creates application users, treating "already exists" as success.
pub struct CredentialProvisioner<C> {
    connector: Arc<C>,
    timeout: Duration,
}

impl<C: AdminConnector> CredentialProvisioner<C> {
    pub fn new(connector: Arc<C>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub async fn ensure_user(
        &self,
        target: &Candidate,
        user: &AppUser,
    ) -> ControlResult<ProvisionOutcome> {
        let failed = |source| ControlError::CredentialProvisioning {
            user: user.username.clone(),
            address: target.address.clone(),
            source,
        };

        let mut session = self
            .connector
            .connect(target, self.timeout)
            .await
            .map_err(failed)?;
        let result = with_timeout(
            self.timeout,
            "createUser",
            session.create_user(
                user.database.clone(),
                user.username.clone(),
                user.password.clone(),
                user.roles.clone(),
            ),
        )
        .await;
        release(session).await;

        let outcome = match result {
            Ok(()) => ProvisionOutcome::Created,
            Err(e) if e.is_already_exists() => ProvisionOutcome::AlreadyExists,
            Err(e) => return Err(failed(e)),
        };
        info!(user = %user.username, db = %user.database, ?outcome, "Application user provisioned");
        Ok(outcome)
    }
}
