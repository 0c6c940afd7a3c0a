//! A user's posts, newest first.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::DashboardApi;
use crate::error::AppResult;
use crate::models::{EventEnvelope, Id, Post};
use crate::views::{Fold, Resync};

#[derive(Debug, Clone)]
pub struct PostHistory {
    /// Whose posts these are.
    owner: Id,
    posts: Vec<Post>,
}

impl PostHistory {
    pub fn new(owner: impl Into<Id>) -> Self {
        Self {
            owner: owner.into(),
            posts: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// Keeps newest-first by `created_at`; replaces an existing post with the same id.
    pub fn upsert(&mut self, post: Post) -> bool {
        if let Some(idx) = self.posts.iter().position(|p| p.id == post.id) {
            if self.posts[idx] == post {
                return false;
            }
            self.posts.remove(idx);
        }
        let at = self
            .posts
            .iter()
            .position(|p| p.created_at < post.created_at)
            .unwrap_or(self.posts.len());
        self.posts.insert(at, post);
        true
    }

    /// Posts are deleted through REST only; there is no delete event.
    pub fn remove(&mut self, post_id: &str) -> bool {
        let before = self.posts.len();
        self.posts.retain(|p| p.id != post_id);
        self.posts.len() != before
    }

    pub fn replace_all(&mut self, posts: Vec<Post>) {
        self.posts.clear();
        let mut seen = HashSet::new();
        for post in posts {
            if post.user_id == self.owner && seen.insert(post.id.clone()) {
                self.upsert(post);
            }
        }
    }
}

impl Fold for PostHistory {
    fn apply(&mut self, envelope: &EventEnvelope) -> bool {
        match envelope {
            EventEnvelope::NewPost(p) if p.user_id == self.owner => self.upsert(p.clone()),
            _ => false,
        }
    }
}

pub struct PostHistoryResync {
    pub api: Arc<dyn DashboardApi>,
}

#[async_trait]
impl Resync<PostHistory> for PostHistoryResync {
    async fn resync(&self, view: &mut PostHistory) -> AppResult<()> {
        let posts = self.api.get_posts(view.owner()).await?;
        view.replace_all(posts);
        Ok(())
    }
}
