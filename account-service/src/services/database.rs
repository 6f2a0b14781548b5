//! PostgreSQL implementation of [`AccountStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{Account, Group, Permission};
use crate::services::authz::AccountScope;
use crate::services::store::{distinct_ids, AccountStore, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some("accounts_username_key") => "username",
                Some("accounts_email_key") => "email",
                Some("accounts_google_id_key") => "google_id",
                Some("accounts_reset_token_hash_key") => "reset_token",
                Some("groups_group_name_key") => "name",
                Some("permissions_resource_codename_key") => "codename",
                _ => "id",
            };
            return StoreError::Conflict { field };
        }
        if db_err.is_foreign_key_violation() {
            let entity = match db_err.constraint() {
                Some(c) if c.ends_with("_permission_id_fkey") => "permission",
                Some(c) if c.ends_with("_account_id_fkey") => "account",
                _ => "group",
            };
            return StoreError::NotFound(entity);
        }
    }
    StoreError::Backend(anyhow::Error::new(err))
}

async fn write_profile(conn: &mut PgConnection, account: &Account) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET username = $2, email = $3, first_name = $4, last_name = $5,
            phone_number = $6, bio = $7, google_id = $8, is_verified = $9,
            updated_utc = NOW()
        WHERE account_id = $1
        "#,
    )
    .bind(account.account_id)
    .bind(&account.username)
    .bind(&account.email)
    .bind(&account.first_name)
    .bind(&account.last_name)
    .bind(&account.phone_number)
    .bind(&account.bio)
    .bind(&account.google_id)
    .bind(account.is_verified)
    .execute(&mut *conn)
    .await
    .map_err(map_err)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("account"));
    }
    Ok(())
}

async fn write_memberships(
    conn: &mut PgConnection,
    account_id: Uuid,
    group_ids: &[Uuid],
) -> Result<(), StoreError> {
    let group_ids = distinct_ids(group_ids);

    // Row lock serializes concurrent replacements for the same account.
    let locked: Option<Uuid> = sqlx::query_scalar(
        "SELECT account_id FROM accounts WHERE account_id = $1 FOR UPDATE",
    )
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_err)?;
    if locked.is_none() {
        return Err(StoreError::NotFound("account"));
    }

    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM groups WHERE group_id = ANY($1)")
        .bind(&group_ids)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_err)?;
    if found != group_ids.len() as i64 {
        return Err(StoreError::NotFound("group"));
    }

    sqlx::query("DELETE FROM account_groups WHERE account_id = $1")
        .bind(account_id)
        .execute(&mut *conn)
        .await
        .map_err(map_err)?;

    sqlx::query(
        "INSERT INTO account_groups (account_id, group_id) SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(account_id)
    .bind(&group_ids)
    .execute(&mut *conn)
    .await
    .map_err(map_err)?;
    Ok(())
}

#[async_trait]
impl AccountStore for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn insert_account(
        &self,
        account: &Account,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        sqlx::query(
            r#"
            INSERT INTO accounts (
                account_id, username, email, password_hash, first_name, last_name,
                phone_number, bio, google_id, is_verified, is_active, is_staff,
                is_superuser, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(account.account_id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.phone_number)
        .bind(&account.bio)
        .bind(&account.google_id)
        .bind(account.is_verified)
        .bind(account.is_active)
        .bind(account.is_staff)
        .bind(account.is_superuser)
        .bind(account.created_utc)
        .bind(account.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        let group_ids = distinct_ids(group_ids);
        if !group_ids.is_empty() {
            sqlx::query(
                "INSERT INTO account_groups (account_id, group_id) SELECT $1, UNNEST($2::uuid[])",
            )
            .bind(account.account_id)
            .bind(&group_ids)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        }

        tx.commit().await.map_err(map_err)
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_account_by_google_id(
        &self,
        google_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE google_id = $1")
            .bind(google_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_accounts(&self, scope: AccountScope) -> Result<Vec<Account>, StoreError> {
        let query = match scope {
            AccountScope::All => {
                sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY created_utc, username")
            }
            AccountScope::ExcludeSuperusers => sqlx::query_as::<_, Account>(
                "SELECT * FROM accounts WHERE NOT is_superuser ORDER BY created_utc, username",
            ),
            AccountScope::Only(account_id) => {
                sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = $1")
                    .bind(account_id)
            }
        };

        query.fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn update_profile(&self, account: &Account) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_err)?;
        write_profile(&mut *conn, account).await
    }

    async fn update_profile_and_groups(
        &self,
        account: &Account,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        write_profile(&mut *tx, account).await?;
        write_memberships(&mut *tx, account.account_id, group_ids).await?;
        tx.commit().await.map_err(map_err)
    }

    async fn set_password_hash(
        &self,
        account_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET password_hash = $2, updated_utc = NOW() WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("account"));
        }
        Ok(())
    }

    async fn set_reset_token(
        &self,
        account_id: Uuid,
        token_hash: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET reset_token_hash = $2, reset_token_expires_utc = $3
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(token_hash)
        .bind(expires_utc)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("account"));
        }
        Ok(())
    }

    async fn find_account_by_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE reset_token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE accounts
            SET password_hash = $2, reset_token_hash = NULL,
                reset_token_expires_utc = NULL, updated_utc = $3
            WHERE reset_token_hash = $1 AND reset_token_expires_utc > $3
            RETURNING account_id
            "#,
        )
        .bind(token_hash)
        .bind(new_password_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn groups_for_account(&self, account_id: Uuid) -> Result<Vec<Group>, StoreError> {
        sqlx::query_as::<_, Group>(
            r#"
            SELECT g.* FROM groups g
            JOIN account_groups ag ON ag.group_id = g.group_id
            WHERE ag.account_id = $1
            ORDER BY g.group_name
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn replace_account_groups(
        &self,
        account_id: Uuid,
        group_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        write_memberships(&mut *tx, account_id, group_ids).await?;
        tx.commit().await.map_err(map_err)
    }

    async fn insert_group(&self, group: &Group) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO groups (group_id, group_name, created_utc) VALUES ($1, $2, $3)")
            .bind(group.group_id)
            .bind(&group.group_name)
            .bind(group.created_utc)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError> {
        sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE group_id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn find_groups(&self, group_ids: &[Uuid]) -> Result<Vec<Group>, StoreError> {
        sqlx::query_as::<_, Group>(
            "SELECT * FROM groups WHERE group_id = ANY($1) ORDER BY group_name",
        )
        .bind(distinct_ids(group_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        sqlx::query_as::<_, Group>("SELECT * FROM groups ORDER BY group_name")
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn rename_group(&self, group_id: Uuid, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE groups SET group_name = $2 WHERE group_id = $1")
            .bind(group_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("group"));
        }
        Ok(())
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM groups WHERE group_id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO permissions (permission_id, permission_name, codename, resource_type)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(permission.permission_id)
        .bind(&permission.permission_name)
        .bind(&permission.codename)
        .bind(&permission.resource_type)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn find_permission(
        &self,
        permission_id: Uuid,
    ) -> Result<Option<Permission>, StoreError> {
        sqlx::query_as::<_, Permission>("SELECT * FROM permissions WHERE permission_id = $1")
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        sqlx::query_as::<_, Permission>("SELECT * FROM permissions ORDER BY resource_type, codename")
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn permissions_for_group(&self, group_id: Uuid) -> Result<Vec<Permission>, StoreError> {
        sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.* FROM permissions p
            JOIN group_permissions gp ON gp.permission_id = p.permission_id
            WHERE gp.group_id = $1
            ORDER BY p.resource_type, p.codename
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn replace_group_permissions(
        &self,
        group_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let permission_ids = distinct_ids(permission_ids);
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT group_id FROM groups WHERE group_id = $1 FOR UPDATE")
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
        if locked.is_none() {
            return Err(StoreError::NotFound("group"));
        }

        let found: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM permissions WHERE permission_id = ANY($1)")
                .bind(&permission_ids)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_err)?;
        if found != permission_ids.len() as i64 {
            return Err(StoreError::NotFound("permission"));
        }

        sqlx::query("DELETE FROM group_permissions WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        sqlx::query(
            "INSERT INTO group_permissions (group_id, permission_id) SELECT $1, UNNEST($2::uuid[])",
        )
        .bind(group_id)
        .bind(&permission_ids)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)
    }

    async fn add_group_permission(
        &self,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO group_permissions (group_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn remove_group_permissions(
        &self,
        group_id: Uuid,
        permission_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT group_id FROM groups WHERE group_id = $1 FOR UPDATE")
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
        if locked.is_none() {
            return Err(StoreError::NotFound("group"));
        }

        sqlx::query("DELETE FROM group_permissions WHERE group_id = $1 AND permission_id = ANY($2)")
            .bind(group_id)
            .bind(distinct_ids(permission_ids))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)
    }
}
