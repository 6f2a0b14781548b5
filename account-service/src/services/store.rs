use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, Group, Permission};
use crate::services::authz::AccountScope;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; `field` names the API field.
    #[error("{field} already exists")]
    Conflict { field: &'static str },

    /// A referenced record (account, group or permission) does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Persistence for accounts, groups, permissions and their edges.
///
/// Implementations guarantee that set replacements are atomic with respect
/// to readers, and that a reset token is consumed at most once.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Inserts the account together with its initial memberships.
    async fn insert_account(&self, account: &Account, group_ids: &[Uuid])
        -> Result<(), StoreError>;
    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;
    async fn find_account_by_username(&self, username: &str)
        -> Result<Option<Account>, StoreError>;
    /// Case-insensitive.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
    async fn find_account_by_google_id(&self, google_id: &str)
        -> Result<Option<Account>, StoreError>;
    /// Ordered by creation time.
    async fn list_accounts(&self, scope: AccountScope) -> Result<Vec<Account>, StoreError>;
    /// Writes profile fields, `is_verified` and `google_id`. Credential
    /// fields are left alone.
    async fn update_profile(&self, account: &Account) -> Result<(), StoreError>;
    async fn set_password_hash(&self, account_id: Uuid, password_hash: &str)
        -> Result<(), StoreError>;

    /// Overwrites any outstanding reset token.
    async fn set_reset_token(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn find_account_by_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, StoreError>;
    /// Atomically swaps in the new password hash and clears the token,
    /// provided the token matches and has not expired at `now`.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError>;

    /// Ordered by group name.
    async fn groups_for_account(&self, account_id: Uuid) -> Result<Vec<Group>, StoreError>;
    /// Profile write and membership replacement as one unit: either both
    /// land or neither does.
    async fn update_profile_and_groups(
        &self,
        account: &Account,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError>;
    /// Replaces the full membership set. Fails without changes when the
    /// account or any group is missing.
    async fn replace_account_groups(
        &self,
        account_id: Uuid,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError>;

    async fn insert_group(&self, group: &Group) -> Result<(), StoreError>;
    async fn find_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError>;
    async fn find_groups(&self, group_ids: &[Uuid]) -> Result<Vec<Group>, StoreError>;
    async fn list_groups(&self) -> Result<Vec<Group>, StoreError>;
    async fn rename_group(&self, group_id: Uuid, name: &str) -> Result<(), StoreError>;
    /// Returns whether a group was deleted. Memberships and grants go with it.
    async fn delete_group(&self, group_id: Uuid) -> Result<bool, StoreError>;

    async fn insert_permission(&self, permission: &Permission) -> Result<(), StoreError>;
    async fn find_permission(&self, permission_id: Uuid)
        -> Result<Option<Permission>, StoreError>;
    /// Ordered by resource type, then codename.
    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError>;
    async fn permissions_for_group(&self, group_id: Uuid) -> Result<Vec<Permission>, StoreError>;
    /// Replaces the group's full permission set, all or nothing.
    async fn replace_group_permissions(
        &self,
        group_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<(), StoreError>;
    /// Adds a single grant; an existing grant is left as is.
    async fn add_group_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), StoreError>;
    /// Removes grants; ids that are not granted are ignored.
    async fn remove_group_permissions(
        &self,
        group_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<(), StoreError>;
}

/// Sorted, duplicate-free copy of `ids`.
pub(crate) fn distinct_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
