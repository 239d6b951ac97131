// ============================
// crates/backend-lib/src/auth/identity.rs
// ============================
//! Bearer credential verification.
use crate::config::DevIdentity;
use crate::error::AppError;
use async_trait::async_trait;
use campus_safety_common::Actor;
use dashmap::DashMap;

/// Resolves a bearer credential to the actor it belongs to
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<Actor, AppError>;
}

/// Fixed token table, seeded from settings
#[derive(Default)]
pub struct StaticIdentityProvider {
    identities: DashMap<String, Actor>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(identities: &[DevIdentity]) -> Self {
        let provider = Self::new();
        for identity in identities {
            provider.insert(
                &identity.token,
                Actor::new(&identity.id, &identity.name, identity.role),
            );
        }
        provider
    }

    pub fn insert(&self, token: &str, actor: Actor) {
        self.identities.insert(token.to_string(), actor);
    }

    pub fn revoke(&self, token: &str) {
        self.identities.remove(token);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, bearer: &str) -> Result<Actor, AppError> {
        if bearer.is_empty() {
            return Err(AppError::Auth("missing credential".to_string()));
        }
        self.identities
            .get(bearer)
            .map(|actor| actor.clone())
            .ok_or_else(|| AppError::Auth("unknown credential".to_string()))
    }
}
