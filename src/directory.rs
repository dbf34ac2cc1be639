//! YAML-backed forum directory for the command line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::model::UserId;
use crate::recipients::ForumDirectory;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Snapshot of users and their forum/thread subscriptions.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StaticDirectory {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub forums: HashMap<u64, Vec<UserId>>,
    #[serde(default)]
    pub threads: HashMap<u64, Vec<UserId>>,
}

impl StaticDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("failed to parse directory {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn example() -> &'static str {
        r#"users:
  - id: 1
    email: "ann@example.com"
    display_name: "Ann"
  - id: 2
    email: "bob@example.com"
  - id: 3

forums:
  10: [1, 2, 3]

threads:
  100: [1, 2]
"#
    }
}

#[async_trait]
impl ForumDirectory for StaticDirectory {
    async fn forum_subscribers(&self, forum_id: u64) -> Result<Vec<UserId>> {
        Ok(self.forums.get(&forum_id).cloned().unwrap_or_default())
    }

    async fn thread_subscribers(&self, thread_id: u64) -> Result<Vec<UserId>> {
        Ok(self.threads.get(&thread_id).cloned().unwrap_or_default())
    }

    async fn email_of(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self
            .users
            .iter()
            .find(|user| user.id == user_id)
            .and_then(|user| user.email.clone()))
    }
}
