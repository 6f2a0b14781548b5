//! Account directory: profile reads and writes, listing and group assignment.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::dtos::account::{AccountResponse, AssignGroupsRequest, UpdateAccountRequest};
use crate::models::Account;
use crate::services::authz::{Action, Actor, AuthorizationPolicy, Principal, Target};
use crate::services::credentials::normalize_email;
use crate::services::error::ServiceError;
use crate::services::metrics::record_event;
use crate::services::store::{distinct_ids, AccountStore};
use crate::utils::field_error;

/// Account plus its groups, ordered by name.
pub(crate) async fn account_response(
    store: &dyn AccountStore,
    account: &Account,
) -> Result<AccountResponse, ServiceError> {
    let groups = store.groups_for_account(account.account_id).await?;
    Ok(AccountResponse::new(account, &groups))
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    authz: AuthorizationPolicy,
}

impl AccountService {
    pub fn new(store: Arc<dyn AccountStore>, authz: AuthorizationPolicy) -> Self {
        Self { store, authz }
    }

    /// Capability snapshot for an active account; `None` when the account is
    /// gone or deactivated.
    pub async fn load_principal(&self, account_id: Uuid) -> Result<Option<Principal>, ServiceError> {
        let Some(account) = self
            .store
            .find_account(account_id)
            .await?
            .filter(|a| a.is_active)
        else {
            return Ok(None);
        };

        let groups = self.store.groups_for_account(account_id).await?;
        Ok(Some(Principal {
            account_id,
            username: account.username,
            is_staff: account.is_staff,
            is_superuser: account.is_superuser,
            groups: groups.into_iter().map(|g| g.group_name).collect(),
        }))
    }

    pub async fn me(&self, actor: &Actor) -> Result<AccountResponse, ServiceError> {
        let account_id = actor.account_id().ok_or(ServiceError::Unauthenticated)?;
        let account = self.authorized_account(actor, Action::ViewAccount, account_id).await?;
        account_response(self.store.as_ref(), &account).await
    }

    pub async fn list(&self, actor: &Actor) -> Result<Vec<AccountResponse>, ServiceError> {
        self.authz
            .authorize(actor, Action::ListAccounts, &Target::None)?;
        let scope = self.authz.account_scope(actor)?;

        let accounts = self.store.list_accounts(scope).await?;
        let mut out = Vec::with_capacity(accounts.len());
        for account in &accounts {
            out.push(account_response(self.store.as_ref(), account).await?);
        }
        Ok(out)
    }

    pub async fn view(&self, actor: &Actor, account_id: Uuid) -> Result<AccountResponse, ServiceError> {
        let account = self.authorized_account(actor, Action::ViewAccount, account_id).await?;
        account_response(self.store.as_ref(), &account).await
    }

    pub async fn update_me(
        &self,
        actor: &Actor,
        req: UpdateAccountRequest,
    ) -> Result<AccountResponse, ServiceError> {
        let account_id = actor.account_id().ok_or(ServiceError::Unauthenticated)?;
        self.update(actor, account_id, req).await
    }

    pub async fn update(
        &self,
        actor: &Actor,
        account_id: Uuid,
        req: UpdateAccountRequest,
    ) -> Result<AccountResponse, ServiceError> {
        let mut account = self
            .authorized_account(actor, Action::UpdateAccount, account_id)
            .await?;

        let group_ids = match &req.group_ids {
            Some(ids) => {
                self.authz.authorize(actor, Action::AssignGroups, &target_of(&account))?;
                let ids = distinct_ids(ids);
                self.require_groups_for_field(&ids).await?;
                Some(ids)
            }
            None => None,
        };

        if let Some(username) = req.username {
            account.username = username;
        }
        if let Some(email) = req.email {
            account.email = normalize_email(&email);
        }
        if let Some(first_name) = req.first_name {
            account.first_name = first_name;
        }
        if let Some(last_name) = req.last_name {
            account.last_name = last_name;
        }
        if let Some(phone_number) = req.phone_number {
            account.phone_number = Some(phone_number).filter(|p| !p.trim().is_empty());
        }
        if let Some(bio) = req.bio {
            account.bio = Some(bio).filter(|b| !b.trim().is_empty());
        }
        account.updated_utc = Utc::now();

        match group_ids {
            Some(ids) => {
                self.store
                    .update_profile_and_groups(&account, &ids)
                    .await?
            }
            None => self.store.update_profile(&account).await?,
        }

        record_event("account_updated", "success");
        tracing::info!(
            account_id = %account_id,
            actor = ?actor.account_id(),
            "Account updated"
        );

        account_response(self.store.as_ref(), &account).await
    }

    /// Replaces the account's memberships with exactly `group_ids`.
    pub async fn assign_groups(
        &self,
        actor: &Actor,
        account_id: Uuid,
        req: AssignGroupsRequest,
    ) -> Result<AccountResponse, ServiceError> {
        let account = self
            .authorized_account(actor, Action::AssignGroups, account_id)
            .await?;

        let group_ids = distinct_ids(req.group_ids.as_deref().unwrap_or_default());
        if group_ids.is_empty() {
            return Err(ServiceError::field(
                "group_ids",
                "required",
                "group_ids is required",
            ));
        }

        self.store
            .replace_account_groups(account_id, &group_ids)
            .await?;

        record_event("groups_assigned", "success");
        tracing::info!(
            account_id = %account_id,
            groups = group_ids.len(),
            actor = ?actor.account_id(),
            "Group membership replaced"
        );

        account_response(self.store.as_ref(), &account).await
    }

    /// Loads the target and checks `action` against it. Absent targets are
    /// reported as missing only to actors who may act on other accounts.
    async fn authorized_account(
        &self,
        actor: &Actor,
        action: Action,
        account_id: Uuid,
    ) -> Result<Account, ServiceError> {
        if actor.principal().is_none() {
            return Err(ServiceError::Unauthenticated);
        }

        match self.store.find_account(account_id).await? {
            Some(account) => {
                self.authz.authorize(actor, action, &target_of(&account))?;
                Ok(account)
            }
            None => {
                self.authz.authorize(actor, action, &Target::None)?;
                Err(ServiceError::NotFound("User not found".to_string()))
            }
        }
    }

    async fn require_groups_for_field(&self, ids: &[Uuid]) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let found = self.store.find_groups(ids).await?;
        let mut errors = ValidationErrors::new();
        for id in ids.iter().filter(|id| !found.iter().any(|g| g.group_id == **id)) {
            field_error(
                &mut errors,
                "group_ids",
                "does_not_exist",
                format!("Invalid pk \"{}\" - object does not exist.", id),
            );
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(errors))
        }
    }
}

fn target_of(account: &Account) -> Target {
    Target::Account {
        id: account.account_id,
        is_superuser: account.is_superuser,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Group;
    use crate::services::memory_store::InMemoryStore;

    struct Harness {
        store: Arc<InMemoryStore>,
        service: AccountService,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        Harness {
            service: AccountService::new(store.clone(), AuthorizationPolicy::new("Manager")),
            store,
        }
    }

    async fn account(h: &Harness, username: &str, configure: impl FnOnce(&mut Account)) -> Account {
        let mut account = Account::new(username, format!("{username}@x.com"));
        configure(&mut account);
        h.store.insert_account(&account, &[]).await.unwrap();
        account
    }

    async fn group(h: &Harness, name: &str) -> Uuid {
        let group = Group::new(name);
        h.store.insert_group(&group).await.unwrap();
        group.group_id
    }

    async fn actor(h: &Harness, account: &Account) -> Actor {
        Actor::Authenticated(
            h.service
                .load_principal(account.account_id)
                .await
                .unwrap()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn users_see_only_themselves() {
        let h = harness();
        let alice = account(&h, "alice", |_| {}).await;
        let bob = account(&h, "bob", |_| {}).await;
        let as_alice = actor(&h, &alice).await;

        let listed = h.service.list(&as_alice).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, alice.account_id);

        let err = h.service.view(&as_alice, bob.account_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        // No existence oracle for plain users.
        let err = h.service.view(&as_alice, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn updating_someone_else_is_forbidden() {
        let h = harness();
        let alice = account(&h, "alice", |_| {}).await;
        let bob = account(&h, "bob", |_| {}).await;

        let req = UpdateAccountRequest {
            bio: Some("hacked".into()),
            ..Default::default()
        };
        let err = h
            .service
            .update(&actor(&h, &alice).await, bob.account_id, req)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let unchanged = h.store.find_account(bob.account_id).await.unwrap().unwrap();
        assert_eq!(unchanged.bio, None);
    }

    #[tokio::test]
    async fn managers_cannot_touch_superusers() {
        let h = harness();
        let manager_group = group(&h, "Manager").await;
        let manager = account(&h, "mia", |_| {}).await;
        h.store
            .replace_account_groups(manager.account_id, &[manager_group])
            .await
            .unwrap();
        let root = account(&h, "root", |a| a.is_superuser = true).await;
        let bob = account(&h, "bob", |_| {}).await;
        let as_manager = actor(&h, &manager).await;

        let listed = h.service.list(&as_manager).await.unwrap();
        assert!(listed.iter().all(|a| a.id != root.account_id));
        assert!(listed.iter().any(|a| a.id == bob.account_id));

        let updated = h
            .service
            .update(
                &as_manager,
                bob.account_id,
                UpdateAccountRequest {
                    first_name: Some("Bob".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Bob");

        let err = h.service.view(&as_manager, root.account_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = h.service.view(&as_manager, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn group_ids_in_updates_need_staff() {
        let h = harness();
        let editors = group(&h, "Editors").await;
        let alice = account(&h, "alice", |_| {}).await;

        let err = h
            .service
            .update_me(
                &actor(&h, &alice).await,
                UpdateAccountRequest {
                    group_ids: Some(vec![editors]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn assignment_replaces_the_whole_set() {
        let h = harness();
        let g1 = group(&h, "g1").await;
        let g2 = group(&h, "g2").await;
        let g3 = group(&h, "g3").await;
        let staff = account(&h, "staff", |a| a.is_staff = true).await;
        let alice = account(&h, "alice", |_| {}).await;
        let as_staff = actor(&h, &staff).await;

        let assign = |ids: Vec<Uuid>| AssignGroupsRequest { group_ids: Some(ids) };

        h.service
            .assign_groups(&as_staff, alice.account_id, assign(vec![g1, g2]))
            .await
            .unwrap();
        let after = h
            .service
            .assign_groups(&as_staff, alice.account_id, assign(vec![g3]))
            .await
            .unwrap();

        let ids: Vec<Uuid> = after.groups.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![g3]);

        let err = h
            .service
            .assign_groups(&as_staff, alice.account_id, assign(vec![g1, Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let groups = h.store.groups_for_account(alice.account_id).await.unwrap();
        assert_eq!(groups.len(), 1);

        let err = h
            .service
            .assign_groups(&as_staff, alice.account_id, assign(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_username_on_update_is_a_field_error() {
        let h = harness();
        let alice = account(&h, "alice", |_| {}).await;
        account(&h, "bob", |_| {}).await;

        let err = h
            .service
            .update_me(
                &actor(&h, &alice).await,
                UpdateAccountRequest {
                    username: Some("bob".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.field_errors().contains_key("username"));
    }

    #[tokio::test]
    async fn deactivated_accounts_have_no_principal() {
        let h = harness();
        let ghost = account(&h, "ghost", |a| a.is_active = false).await;
        assert!(h.service.load_principal(ghost.account_id).await.unwrap().is_none());
        assert!(h.service.load_principal(Uuid::new_v4()).await.unwrap().is_none());
    }
}
