//! Identity records and the lookup collaborator backed by the user database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::Instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Disabled,
}

impl IdentityStatus {
    /// Anything other than `active` is treated as disabled.
    #[must_use]
    pub fn from_db(status: &str) -> Self {
        if status.eq_ignore_ascii_case("active") {
            Self::Active
        } else {
            Self::Disabled
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

/// Snapshot of a user account as seen by the login layer.
///
/// `password_hash` is never serialized, so cached snapshots carry no secrets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub status: IdentityStatus,
    pub email: String,
}

impl Identity {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}

/// Source of truth for identities. `Ok(None)` means the account does not exist.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>>;
}

#[derive(Clone, Debug)]
pub struct PgIdentityLookup {
    pool: PgPool,
}

impl PgIdentityLookup {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, query: &'static str, bind: Bind<'_>) -> Result<Option<Identity>> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let statement = sqlx::query(query);
        let statement = match bind {
            Bind::Id(id) => statement.bind(id),
            Bind::Username(username) => statement.bind(username),
        };
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup identity")?;

        Ok(row.map(|row| Identity {
            id: row.get("id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            status: IdentityStatus::from_db(row.get::<&str, _>("status")),
            email: row.get("email"),
        }))
    }
}

enum Bind<'a> {
    Id(i64),
    Username(&'a str),
}

#[async_trait]
impl IdentityLookup for PgIdentityLookup {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>> {
        self.find_one(
            "SELECT id, username, password_hash, status::text AS status, email FROM users WHERE username = $1 AND deleted_at IS NULL",
            Bind::Username(username),
        )
        .await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>> {
        self.find_one(
            "SELECT id, username, password_hash, status::text AS status, email FROM users WHERE id = $1 AND deleted_at IS NULL",
            Bind::Id(id),
        )
        .await
    }
}
