//! Delegated account access: owner grants a delegate act-on-behalf-of capabilities.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::domain::{Id, Post};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub can_post: bool,
    pub can_message: bool,
    pub can_delete_posts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Post,
    Message,
    DeletePosts,
}

impl Capabilities {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Post => self.can_post,
            Capability::Message => self.can_message,
            Capability::DeletePosts => self.can_delete_posts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub owner_id: Id,
    pub delegate_id: Id,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Active delegations, at most one per (owner, delegate) pair.
#[derive(Debug, Clone, Default)]
pub struct DelegationSet {
    grants: HashMap<(Id, Id), Delegation>,
}

impl DelegationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_grants(grants: impl IntoIterator<Item = Delegation>) -> Self {
        let mut set = Self::new();
        for d in grants {
            set.grant(d);
        }
        set
    }

    /// Insert a grant, replacing any existing one for the same pair.
    pub fn grant(&mut self, delegation: Delegation) -> Option<Delegation> {
        let key = (delegation.owner_id.clone(), delegation.delegate_id.clone());
        self.grants.insert(key, delegation)
    }

    /// Remove the grant entirely; there is no partial revoke.
    pub fn revoke(&mut self, owner_id: &str, delegate_id: &str) -> Option<Delegation> {
        self.grants
            .remove(&(owner_id.to_string(), delegate_id.to_string()))
    }

    pub fn get(&self, owner_id: &str, delegate_id: &str) -> Option<&Delegation> {
        self.grants
            .get(&(owner_id.to_string(), delegate_id.to_string()))
    }

    pub fn permits(&self, owner_id: &str, delegate_id: &str, capability: Capability) -> bool {
        self.get(owner_id, delegate_id)
            .map(|d| d.capabilities.allows(capability))
            .unwrap_or(false)
    }

    pub fn delegates_of(&self, owner_id: &str) -> Vec<Id> {
        let mut out: Vec<Id> = self
            .grants
            .values()
            .filter(|d| d.owner_id == owner_id)
            .map(|d| d.delegate_id.clone())
            .collect();
        out.sort();
        out
    }

    /// Who sees a new post: the owner, whoever created it, and the owner's delegates.
    pub fn post_audience(&self, post: &Post) -> Vec<Id> {
        let mut audience = vec![post.user_id.clone(), post.created_by.clone()];
        audience.extend(self.delegates_of(&post.user_id));
        audience.sort();
        audience.dedup();
        audience
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
