//! Tag Index
//!
//! Bidirectional `tag → keys` / `key → tags` relation stored as sets next
//! to the entries. The two sides are written one after the other, so a
//! concurrent reader can observe a half-applied update.

use std::collections::HashSet;

use tracing::debug;

use crate::backend::KvBackend;
use crate::client::{tag_key, tags_key, CacheClient};
use crate::error::Result;

pub struct TagIndex<B: KvBackend> {
    client: CacheClient<B>,
}

impl<B: KvBackend> Clone for TagIndex<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<B: KvBackend> TagIndex<B> {
    pub fn new(client: CacheClient<B>) -> Self {
        Self { client }
    }

    /// Records `key` under each of `tags`, forward side first.
    pub async fn attach(&self, key: &str, tags: &[String]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.client.add_to_set(&tags_key(key), tags).await?;
        let member = [key.to_string()];
        for tag in tags {
            self.client.add_to_set(&tag_key(tag), &member).await?;
        }
        debug!(key, tags = ?tags, "tags attached");
        Ok(())
    }

    /// Removes `key` from every tag it carries and drops its forward set.
    pub async fn detach(&self, key: &str) -> Result<()> {
        let tags = self.tags_for(key).await?;
        let member = [key.to_string()];
        for tag in &tags {
            self.client.remove_from_set(&tag_key(tag), &member).await?;
        }
        self.client.delete(&tags_key(key)).await?;
        Ok(())
    }

    pub async fn keys_for(&self, tag: &str) -> Result<Vec<String>> {
        self.client.members(&tag_key(tag)).await
    }

    pub async fn tags_for(&self, key: &str) -> Result<HashSet<String>> {
        Ok(self.client.members(&tags_key(key)).await?.into_iter().collect())
    }

    /// Deletes the reverse set of `tag`.
    pub async fn drop_tag(&self, tag: &str) -> Result<()> {
        self.client.delete(&tag_key(tag)).await?;
        Ok(())
    }
}
