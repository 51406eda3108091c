//! Capability checks at every entry point.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use narrate_common::{Actor, Capability, ResourceContext};

use crate::config::TokenEntry;
use crate::errors::AuthError;

/// The external authorization collaborator.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        token: &str,
        capability: Capability,
        resource: &ResourceContext,
    ) -> Result<Actor, AuthError>;
}

struct Grant {
    actor: Actor,
    capabilities: HashSet<Capability>,
}

/// Static bearer tokens from `[[auth.tokens]]`.
pub struct TokenAuthorizer {
    grants: HashMap<String, Grant>,
}

impl TokenAuthorizer {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let grants = entries
            .iter()
            .map(|e| {
                (
                    e.token.clone(),
                    Grant {
                        actor: Actor {
                            id: e.actor_id.clone(),
                            company_id: e.company_id.clone(),
                        },
                        capabilities: e.capabilities.iter().copied().collect(),
                    },
                )
            })
            .collect();
        Self { grants }
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(
        &self,
        token: &str,
        capability: Capability,
        _resource: &ResourceContext,
    ) -> Result<Actor, AuthError> {
        let grant = self.grants.get(token).ok_or(AuthError::InvalidToken)?;
        if !grant.capabilities.contains(&capability) {
            return Err(AuthError::Denied {
                actor_id: grant.actor.id.clone(),
                capability,
            });
        }
        Ok(grant.actor.clone())
    }
}
