//! The authenticated principal a generation is charged to.

use async_trait::async_trait;
use meshforge_core::types::DbId;

/// Resolves the caller on whose behalf generations run.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, or `None` when nobody is authenticated.
    async fn current_user(&self) -> Option<DbId>;
}

/// Fixed identity, for the worker binary and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity(Option<DbId>);

impl StaticIdentity {
    pub fn user(user_id: DbId) -> Self {
        Self(Some(user_id))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<DbId> {
        self.0
    }
}
