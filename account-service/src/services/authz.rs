//! Access decisions for every account, group and permission operation.
//!
//! Everything here is pure: callers resolve the [`Actor`] and the
//! [`Target`] up front and pass them in explicitly. Rules, first match wins:
//!
//! 1. Public entry points (registration, login, session refresh/logout,
//!    password recovery, Google sign-in) are open to any actor. Everything
//!    else requires an authenticated actor.
//! 2. Staff capability (`is_staff` or `is_superuser`) allows everything.
//! 3. Group and permission administration and group assignment require
//!    staff capability, whatever rules 4 and 5 would say.
//! 4. Members of the manager group may list, view and update any account
//!    that is not a superuser.
//! 5. Anyone else may only act on their own account.

use thiserror::Error;
use uuid::Uuid;

/// An authenticated identity with the capability data needed for decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub account_id: Uuid,
    pub username: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    /// Group names, ordered by name.
    pub groups: Vec<String>,
}

impl Principal {
    pub fn has_staff_capability(&self) -> bool {
        self.is_staff || self.is_superuser
    }

    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Actor {
    #[default]
    Anonymous,
    Authenticated(Principal),
}

impl Actor {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Actor::Anonymous => None,
            Actor::Authenticated(p) => Some(p),
        }
    }

    pub fn account_id(&self) -> Option<Uuid> {
        self.principal().map(|p| p.account_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Register,
    Login,
    RefreshSession,
    Logout,
    ForgotPassword,
    ResetPassword,
    OAuthRedirect,
    OAuthCallback,
    ListAccounts,
    ViewAccount,
    UpdateAccount,
    ChangePassword,
    AssignGroups,
    ListGroups,
    ViewGroup,
    CreateGroup,
    UpdateGroup,
    DeleteGroup,
    AssignGroupPermissions,
    RemoveGroupPermissions,
    ListPermissions,
    ViewPermission,
    AssignPermissionToGroup,
    RemovePermissionFromGroup,
}

impl Action {
    pub fn is_public(self) -> bool {
        matches!(
            self,
            Action::Register
                | Action::Login
                | Action::RefreshSession
                | Action::Logout
                | Action::ForgotPassword
                | Action::ResetPassword
                | Action::OAuthRedirect
                | Action::OAuthCallback
        )
    }

    fn requires_staff(self) -> bool {
        matches!(
            self,
            Action::AssignGroups
                | Action::ListGroups
                | Action::ViewGroup
                | Action::CreateGroup
                | Action::UpdateGroup
                | Action::DeleteGroup
                | Action::AssignGroupPermissions
                | Action::RemoveGroupPermissions
                | Action::ListPermissions
                | Action::ViewPermission
                | Action::AssignPermissionToGroup
                | Action::RemovePermissionFromGroup
        )
    }

    fn open_to_managers(self) -> bool {
        matches!(
            self,
            Action::ListAccounts | Action::ViewAccount | Action::UpdateAccount
        )
    }
}

/// The resource instance an action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    None,
    Account { id: Uuid, is_superuser: bool },
    Group(Uuid),
    Permission(Uuid),
}

/// Which accounts an actor may see when listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountScope {
    All,
    ExcludeSuperusers,
    Only(Uuid),
}

impl AccountScope {
    pub fn contains(&self, account_id: Uuid, is_superuser: bool) -> bool {
        match self {
            AccountScope::All => true,
            AccountScope::ExcludeSuperusers => !is_superuser,
            AccountScope::Only(id) => *id == account_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("Authentication credentials were not provided")]
    Unauthenticated,
    #[error("You do not have permission to perform this action")]
    Forbidden,
}

#[derive(Debug, Clone)]
pub struct AuthorizationPolicy {
    manager_group: String,
}

impl AuthorizationPolicy {
    pub fn new(manager_group: impl Into<String>) -> Self {
        Self {
            manager_group: manager_group.into(),
        }
    }

    pub fn can(&self, actor: &Actor, action: Action, target: &Target) -> bool {
        self.authorize(actor, action, target).is_ok()
    }

    pub fn authorize(
        &self,
        actor: &Actor,
        action: Action,
        target: &Target,
    ) -> Result<(), AccessDenied> {
        if action.is_public() {
            return Ok(());
        }

        let principal = actor.principal().ok_or(AccessDenied::Unauthenticated)?;

        if principal.has_staff_capability() {
            return Ok(());
        }

        if action.requires_staff() {
            return Err(AccessDenied::Forbidden);
        }

        if action.open_to_managers() && self.is_manager(principal) {
            match target {
                Target::None => return Ok(()),
                Target::Account {
                    is_superuser: false,
                    ..
                } => return Ok(()),
                _ => {}
            }
        }

        match target {
            Target::Account { id, .. } if *id == principal.account_id => Ok(()),
            // Plain users may list, but only ever see themselves.
            Target::None if action == Action::ListAccounts => Ok(()),
            _ => Err(AccessDenied::Forbidden),
        }
    }

    pub fn account_scope(&self, actor: &Actor) -> Result<AccountScope, AccessDenied> {
        let principal = actor.principal().ok_or(AccessDenied::Unauthenticated)?;

        Ok(if principal.has_staff_capability() {
            AccountScope::All
        } else if self.is_manager(principal) {
            AccountScope::ExcludeSuperusers
        } else {
            AccountScope::Only(principal.account_id)
        })
    }

    fn is_manager(&self, principal: &Principal) -> bool {
        principal.in_group(&self.manager_group)
    }
}
