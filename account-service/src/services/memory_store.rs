use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{Account, Group, Permission};
use crate::services::authz::AccountScope;
use crate::services::store::{distinct_ids, AccountStore, StoreError};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    groups: HashMap<Uuid, Group>,
    permissions: HashMap<Uuid, Permission>,
    memberships: HashSet<(Uuid, Uuid)>,
    grants: HashSet<(Uuid, Uuid)>,
}

impl State {
    fn check_account_unique(&self, account: &Account) -> Result<(), StoreError> {
        for other in self.accounts.values() {
            if other.account_id == account.account_id {
                continue;
            }
            if other.username == account.username {
                return Err(StoreError::Conflict { field: "username" });
            }
            if other.email.eq_ignore_ascii_case(&account.email) {
                return Err(StoreError::Conflict { field: "email" });
            }
            if account.google_id.is_some() && other.google_id == account.google_id {
                return Err(StoreError::Conflict { field: "google_id" });
            }
        }
        Ok(())
    }

    fn check_group_name_free(&self, group_id: Uuid, name: &str) -> Result<(), StoreError> {
        if self
            .groups
            .values()
            .any(|g| g.group_id != group_id && g.group_name == name)
        {
            return Err(StoreError::Conflict { field: "name" });
        }
        Ok(())
    }

    fn require_groups(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.iter().all(|id| self.groups.contains_key(id)) {
            Ok(())
        } else {
            Err(StoreError::NotFound("group"))
        }
    }

    fn require_permissions(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.iter().all(|id| self.permissions.contains_key(id)) {
            Ok(())
        } else {
            Err(StoreError::NotFound("permission"))
        }
    }

    fn account_mut(&mut self, account_id: Uuid) -> Result<&mut Account, StoreError> {
        self.accounts
            .get_mut(&account_id)
            .ok_or(StoreError::NotFound("account"))
    }

    fn write_profile(&mut self, account: &Account) -> Result<(), StoreError> {
        self.check_account_unique(account)?;
        let stored = self.account_mut(account.account_id)?;
        stored.username = account.username.clone();
        stored.email = account.email.clone();
        stored.first_name = account.first_name.clone();
        stored.last_name = account.last_name.clone();
        stored.phone_number = account.phone_number.clone();
        stored.bio = account.bio.clone();
        stored.google_id = account.google_id.clone();
        stored.is_verified = account.is_verified;
        stored.updated_utc = Utc::now();
        Ok(())
    }

    fn write_memberships(&mut self, account_id: Uuid, group_ids: &[Uuid]) {
        self.memberships.retain(|(a, _)| *a != account_id);
        for group_id in distinct_ids(group_ids) {
            self.memberships.insert((account_id, group_id));
        }
    }
}

/// Process-local store. A single lock guards all state, so every method is
/// atomic with respect to every other.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("In-memory store poisoned: {}", e)))
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }

    async fn insert_account(
        &self,
        account: &Account,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.accounts.contains_key(&account.account_id) {
            return Err(StoreError::Conflict { field: "id" });
        }
        state.check_account_unique(account)?;
        state.require_groups(group_ids)?;

        state.accounts.insert(account.account_id, account.clone());
        for group_id in group_ids {
            state.memberships.insert((account.account_id, *group_id));
        }
        Ok(())
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state()?.accounts.get(&account_id).cloned())
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state()?
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state()?
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_account_by_google_id(
        &self,
        google_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state()?
            .accounts
            .values()
            .find(|a| a.google_id.as_deref() == Some(google_id))
            .cloned())
    }

    async fn list_accounts(&self, scope: AccountScope) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .state()?
            .accounts
            .values()
            .filter(|a| scope.contains(a.account_id, a.is_superuser))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(accounts)
    }

    async fn update_profile(&self, account: &Account) -> Result<(), StoreError> {
        self.state()?.write_profile(account)
    }

    async fn update_profile_and_groups(
        &self,
        account: &Account,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.require_groups(group_ids)?;
        state.write_profile(account)?;
        state.write_memberships(account.account_id, group_ids);
        Ok(())
    }

    async fn set_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let stored = state.account_mut(account_id)?;
        stored.password_hash = Some(password_hash.to_string());
        stored.updated_utc = Utc::now();
        Ok(())
    }

    async fn set_reset_token(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let stored = state.account_mut(account_id)?;
        stored.reset_token_hash = Some(token_hash.to_string());
        stored.reset_token_expires_utc = Some(expires_utc);
        Ok(())
    }

    async fn find_account_by_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .state()?
            .accounts
            .values()
            .find(|a| a.reset_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut state = self.state()?;
        let Some(account) = state.accounts.values_mut().find(|a| {
            a.reset_token_hash.as_deref() == Some(token_hash)
                && a.reset_token_expires_utc.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };

        account.password_hash = Some(new_password_hash.to_string());
        account.reset_token_hash = None;
        account.reset_token_expires_utc = None;
        account.updated_utc = now;
        Ok(Some(account.account_id))
    }

    async fn groups_for_account(&self, account_id: Uuid) -> Result<Vec<Group>, StoreError> {
        let state = self.state()?;
        let mut groups: Vec<Group> = state
            .memberships
            .iter()
            .filter(|(a, _)| *a == account_id)
            .filter_map(|(_, g)| state.groups.get(g).cloned())
            .collect();
        groups.sort_by(|a, b| a.group_name.cmp(&b.group_name));
        Ok(groups)
    }

    async fn replace_account_groups(
        &self,
        account_id: Uuid,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if !state.accounts.contains_key(&account_id) {
            return Err(StoreError::NotFound("account"));
        }
        state.require_groups(group_ids)?;
        state.write_memberships(account_id, group_ids);
        Ok(())
    }

    async fn insert_group(&self, group: &Group) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.check_group_name_free(group.group_id, &group.group_name)?;
        state.groups.insert(group.group_id, group.clone());
        Ok(())
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError> {
        Ok(self.state()?.groups.get(&group_id).cloned())
    }

    async fn find_groups(&self, group_ids: &[Uuid]) -> Result<Vec<Group>, StoreError> {
        let state = self.state()?;
        let mut groups: Vec<Group> = distinct_ids(group_ids)
            .iter()
            .filter_map(|id| state.groups.get(id).cloned())
            .collect();
        groups.sort_by(|a, b| a.group_name.cmp(&b.group_name));
        Ok(groups)
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let mut groups: Vec<Group> = self.state()?.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.group_name.cmp(&b.group_name));
        Ok(groups)
    }

    async fn rename_group(&self, group_id: Uuid, name: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.check_group_name_free(group_id, name)?;
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or(StoreError::NotFound("group"))?;
        group.group_name = name.to_string();
        Ok(())
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        if state.groups.remove(&group_id).is_none() {
            return Ok(false);
        }
        state.memberships.retain(|(_, g)| *g != group_id);
        state.grants.retain(|(g, _)| *g != group_id);
        Ok(true)
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.permissions.values().any(|p| {
            p.resource_type == permission.resource_type && p.codename == permission.codename
        }) {
            return Err(StoreError::Conflict { field: "codename" });
        }
        state
            .permissions
            .insert(permission.permission_id, permission.clone());
        Ok(())
    }

    async fn find_permission(
        &self,
        permission_id: Uuid,
    ) -> Result<Option<Permission>, StoreError> {
        Ok(self.state()?.permissions.get(&permission_id).cloned())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let mut permissions: Vec<Permission> =
            self.state()?.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| {
            (a.resource_type.as_str(), a.codename.as_str())
                .cmp(&(b.resource_type.as_str(), b.codename.as_str()))
        });
        Ok(permissions)
    }

    async fn permissions_for_group(&self, group_id: Uuid) -> Result<Vec<Permission>, StoreError> {
        let state = self.state()?;
        let mut permissions: Vec<Permission> = state
            .grants
            .iter()
            .filter(|(g, _)| *g == group_id)
            .filter_map(|(_, p)| state.permissions.get(p).cloned())
            .collect();
        permissions.sort_by(|a, b| {
            (a.resource_type.as_str(), a.codename.as_str())
                .cmp(&(b.resource_type.as_str(), b.codename.as_str()))
        });
        Ok(permissions)
    }

    async fn replace_group_permissions(
        &self,
        group_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.require_groups(&[group_id])?;
        state.require_permissions(permission_ids)?;

        state.grants.retain(|(g, _)| *g != group_id);
        for permission_id in distinct_ids(permission_ids) {
            state.grants.insert((group_id, permission_id));
        }
        Ok(())
    }

    async fn add_group_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.require_groups(&[group_id])?;
        state.require_permissions(&[permission_id])?;
        state.grants.insert((group_id, permission_id));
        Ok(())
    }

    async fn remove_group_permissions(
        &self,
        group_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.require_groups(&[group_id])?;
        for permission_id in permission_ids {
            state.grants.remove(&(group_id, *permission_id));
        }
        Ok(())
    }
}
