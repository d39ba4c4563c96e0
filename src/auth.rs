use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::{Actor, Role};

/// Parse the startup user name `"<role>:<ULID>"` into the caller's identity.
/// The upstream identity service has already authenticated the person; we only
/// trust what it forwards.
pub fn actor_from_user(user: &str) -> Option<Actor> {
    let (role, id) = user.trim().split_once(':')?;
    let role = Role::parse(role)?;
    let id = Ulid::from_string(id).ok()?;
    Some(Actor::new(id, role))
}

#[derive(Debug)]
pub struct StaydeskAuthSource {
    password: String,
}

impl StaydeskAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for StaydeskAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().map(|u| u.to_string()).unwrap_or_default();
        if actor_from_user(&user).is_none() {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!(%user, "rejected startup user, expected <role>:<ULID>");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("invalid user {user:?}: expected guest|host|admin:<ULID>"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
