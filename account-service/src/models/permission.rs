use sqlx::FromRow;
use uuid::Uuid;

/// Reference data: a named privilege on a resource type.
/// `codename` is unique per `resource_type`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Permission {
    pub permission_id: Uuid,
    pub permission_name: String,
    pub codename: String,
    pub resource_type: String,
}

impl Permission {
    pub fn new(
        name: impl Into<String>,
        codename: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            permission_id: Uuid::new_v4(),
            permission_name: name.into(),
            codename: codename.into(),
            resource_type: resource_type.into(),
        }
    }
}
