use super::provider::RecordSource;
use super::types::validate_records;
use crate::domain::records::UserRecords;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// A JSON array of `UserRecords`, read once into memory.
#[derive(Debug, Clone)]
pub struct FileRecordSource {
    users: BTreeMap<String, UserRecords>,
}

impl FileRecordSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read records file {}", path.display()))?;
        let source = Self::from_json(&text)
            .with_context(|| format!("invalid records file {}", path.display()))?;
        tracing::info!(path = %path.display(), users = source.users.len(), "records file loaded");
        Ok(source)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let bundles: Vec<UserRecords> =
            serde_json::from_str(text).context("records must be a JSON array of user bundles")?;
        let mut users = BTreeMap::new();
        for bundle in bundles {
            validate_records(&bundle, &bundle.user_id)?;
            let user_id = bundle.user_id.clone();
            anyhow::ensure!(
                users.insert(user_id.clone(), bundle).is_none(),
                "user {user_id} appears more than once"
            );
        }
        Ok(Self { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait::async_trait]
impl RecordSource for FileRecordSource {
    fn source_name(&self) -> &'static str {
        "file"
    }

    async fn fetch_user_records(&self, user_id: &str) -> Result<UserRecords> {
        self.users
            .get(user_id)
            .cloned()
            .with_context(|| format!("user {user_id} not found in records file"))
    }

    async fn list_users(&self) -> Result<Vec<String>> {
        Ok(self.users.keys().cloned().collect())
    }
}
