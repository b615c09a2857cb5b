use sqlx::{sqlite::SqliteRow, Row};

use kcart_core::domain::user::{User, UserId, UserType};

use super::{parse_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, phone, location, user_type, created_at
             FROM users
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, phone, location, user_type, created_at
             FROM users
             WHERE phone = ?",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, name, phone, location, user_type, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                phone = excluded.phone,
                location = excluded.location,
                user_type = excluded.user_type",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(user.location.as_deref())
        .bind(user.user_type.as_str())
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn user_from_row(row: SqliteRow) -> Result<User, RepositoryError> {
    let user_type_raw = row.try_get::<String, _>("user_type")?;
    let user_type = parse_user_type(&user_type_raw)?;

    Ok(User {
        id: UserId(row.try_get("id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        location: row.try_get("location")?,
        user_type,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_user_type(raw: &str) -> Result<UserType, RepositoryError> {
    match raw {
        "buyer" => Ok(UserType::Buyer),
        "seller" => Ok(UserType::Seller),
        "unknown" => Ok(UserType::Unknown),
        other => Err(RepositoryError::Decode(format!("unknown user type `{other}`"))),
    }
}
