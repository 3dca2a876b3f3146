//! Sources of tracked entity identifiers

use async_trait::async_trait;
use parking_lot::RwLock;

use super::checks::CheckError;

/// Supplies the entities to check. Called once per tick.
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn active_entities(&self) -> Result<Vec<String>, CheckError>;
}

/// Fixed, replaceable list of entity IDs
#[derive(Debug, Default)]
pub struct StaticEntitySource {
    entities: RwLock<Vec<String>>,
}

impl StaticEntitySource {
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entities: RwLock::new(entities.into_iter().map(Into::into).collect()),
        }
    }

    /// Parse a comma-separated list, e.g. `CSO-001,CSO-002`
    pub fn from_csv(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        )
    }

    pub fn set_entities(&self, entities: Vec<String>) {
        *self.entities.write() = entities;
    }
}

#[async_trait]
impl EntitySource for StaticEntitySource {
    async fn active_entities(&self) -> Result<Vec<String>, CheckError> {
        Ok(self.entities.read().clone())
    }
}
