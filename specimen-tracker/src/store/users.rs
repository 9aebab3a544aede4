use specimen_common::db::{Identity, UserAuthentication, UserAuthorization};
use specimen_common::{time, Error, ResourceKind, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use super::{assign_external_id, Store};
use crate::tx::begin_write;

/// Status given to users created on first sign-in
pub const PENDING_STATUS: &str = "pending";

const SELECT_AUTHORIZATION: &str = r#"
    SELECT u.id, u.external_id, u.status, u.authorized, u.created_at
    FROM user_authorization u
"#;

fn authorization_from_row(row: &SqliteRow) -> Result<UserAuthorization> {
    let created_at: String = row.get("created_at");
    Ok(UserAuthorization {
        identity: Identity::new(row.get("id"), row.get::<String, _>("external_id")),
        status: row.get("status"),
        authorized: row.get("authorized"),
        created_at: time::from_db(&created_at)?,
    })
}

fn authentication_from_row(row: &SqliteRow) -> UserAuthentication {
    UserAuthentication {
        identity: Identity::new(row.get("id"), row.get::<String, _>("external_id")),
        user_id: row.get("user_id"),
        authenticator: row.get("authenticator"),
        external_uid: row.get("external_uid"),
    }
}

fn identity_key(external_uid: &str, authenticator: &str) -> Result<()> {
    if external_uid.trim().is_empty() || authenticator.trim().is_empty() {
        return Err(Error::InvalidInput(
            "external uid and authenticator must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl Store {
    /// Create a user together with its first authentication identity
    pub async fn add_user(
        &self,
        external_uid: &str,
        authenticator: &str,
        status: &str,
        authorized: bool,
    ) -> Result<UserAuthorization> {
        identity_key(external_uid, authenticator)?;
        let created_at = time::now();

        let mut tx = begin_write(&self.pool, "store::add_user").await?;
        let user_id = sqlx::query(
            "INSERT INTO user_authorization (status, authorized, created_at) VALUES (?, ?, ?)",
        )
        .bind(status)
        .bind(authorized)
        .bind(time::to_db(&created_at))
        .execute(tx.conn())
        .await?
        .last_insert_rowid();
        let external_id = assign_external_id(
            tx.conn(),
            &self.ids,
            ResourceKind::UserAuthorization,
            user_id,
        )
        .await?;

        let authentication_id = sqlx::query(
            "INSERT INTO user_authentication (user_id, authenticator, external_uid) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(authenticator)
        .bind(external_uid)
        .execute(tx.conn())
        .await
        .map_err(|e| {
            Error::from_insert(e, || {
                format!("{} identity {} is already registered", authenticator, external_uid)
            })
        })?
        .last_insert_rowid();
        assign_external_id(
            tx.conn(),
            &self.ids,
            ResourceKind::UserAuthentication,
            authentication_id,
        )
        .await?;
        tx.commit().await?;

        info!("Created user {} for {} identity {}", external_id, authenticator, external_uid);
        Ok(UserAuthorization {
            identity: Identity::new(user_id, external_id),
            status: status.to_string(),
            authorized,
            created_at,
        })
    }

    /// Link another provider identity to an existing user
    pub async fn add_authentication(
        &self,
        user_external_id: &str,
        external_uid: &str,
        authenticator: &str,
    ) -> Result<UserAuthentication> {
        identity_key(external_uid, authenticator)?;
        let user = self.get_user(user_external_id).await?;

        let mut tx = begin_write(&self.pool, "store::add_authentication").await?;
        let id = sqlx::query(
            "INSERT INTO user_authentication (user_id, authenticator, external_uid) VALUES (?, ?, ?)",
        )
        .bind(user.identity.id)
        .bind(authenticator)
        .bind(external_uid)
        .execute(tx.conn())
        .await
        .map_err(|e| {
            Error::from_insert(e, || {
                format!("{} identity {} is already registered", authenticator, external_uid)
            })
        })?
        .last_insert_rowid();
        let external_id =
            assign_external_id(tx.conn(), &self.ids, ResourceKind::UserAuthentication, id).await?;
        tx.commit().await?;

        Ok(UserAuthentication {
            identity: Identity::new(id, external_id),
            user_id: user.identity.id,
            authenticator: authenticator.to_string(),
            external_uid: external_uid.to_string(),
        })
    }

    pub async fn get_user(&self, external_id: &str) -> Result<UserAuthorization> {
        let id = self
            .internal_id(ResourceKind::UserAuthorization, external_id)
            .ok_or_else(|| Error::not_found("user", external_id))?;
        let row = sqlx::query(&format!("{} WHERE u.id = ?", SELECT_AUTHORIZATION))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("user", external_id))?;
        authorization_from_row(&row)
    }

    /// Authorization record behind a provider identity
    pub async fn find_user_authorization(
        &self,
        external_uid: &str,
        authenticator: &str,
    ) -> Result<Option<UserAuthorization>> {
        let row = sqlx::query(&format!(
            "{} JOIN user_authentication a ON a.user_id = u.id
             WHERE a.external_uid = ? AND a.authenticator = ?",
            SELECT_AUTHORIZATION
        ))
        .bind(external_uid)
        .bind(authenticator)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(authorization_from_row).transpose()
    }

    pub async fn get_user_authorization(
        &self,
        external_uid: &str,
        authenticator: &str,
    ) -> Result<UserAuthorization> {
        self.find_user_authorization(external_uid, authenticator)
            .await?
            .ok_or_else(|| Error::not_found("user", format!("{}:{}", authenticator, external_uid)))
    }

    /// Identities linked to a user, oldest first
    pub async fn list_authentications(
        &self,
        user_external_id: &str,
    ) -> Result<Vec<UserAuthentication>> {
        let user = self.get_user(user_external_id).await?;
        let rows = sqlx::query(
            "SELECT id, external_id, user_id, authenticator, external_uid
             FROM user_authentication WHERE user_id = ? ORDER BY id",
        )
        .bind(user.identity.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(authentication_from_row).collect())
    }

    /// Look up a signing-in user, creating an unauthorized pending one the
    /// first time an identity is seen. The flag is true when it was created.
    pub async fn get_or_create_user(
        &self,
        external_uid: &str,
        authenticator: &str,
    ) -> Result<(UserAuthorization, bool)> {
        if let Some(user) = self.find_user_authorization(external_uid, authenticator).await? {
            return Ok((user, false));
        }

        match self
            .add_user(external_uid, authenticator, PENDING_STATUS, false)
            .await
        {
            Ok(user) => Ok((user, true)),
            // another sign-in created it between our lookup and insert
            Err(Error::Integrity(_)) => Ok((
                self.get_user_authorization(external_uid, authenticator).await?,
                false,
            )),
            Err(e) => Err(e),
        }
    }
}
