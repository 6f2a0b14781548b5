use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A named role. Permissions and members are stored as separate edges.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Group {
    pub group_id: Uuid,
    pub group_name: String,
    pub created_utc: DateTime<Utc>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            group_id: Uuid::new_v4(),
            group_name: name.into(),
            created_utc: Utc::now(),
        }
    }
}
