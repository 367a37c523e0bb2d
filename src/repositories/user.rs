use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    error::{AppError, Result},
    models::user::{User, UserType},
};

/// Field values for a new user row.
pub struct NewUser {
    pub name: String,
    pub national_id: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub user_type: UserType,
}

/// Partial changes applied to an existing user. `None` keeps the stored value.
#[derive(Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub national_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub user_type: Option<UserType>,
}

/// Filters for user listing.
#[derive(Default)]
pub struct UserFilter {
    pub user_type: Option<UserType>,
    pub active: Option<bool>,
    /// Matches name, email and national id as a substring.
    pub search: Option<String>,
}

/// Per-role account counts for the statistics endpoint.
#[derive(sqlx::FromRow)]
pub struct TypeCount {
    pub user_type: UserType,
    pub count: i64,
}

/// Finds a user by their ID.
pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Finds a user by their email address, active or not.
pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Finds a user holding the given password-reset token.
pub async fn find_by_reset_token(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE reset_token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Lists users matching the filter, newest page of `per_page` at `page` (1-based),
/// together with the total match count.
pub async fn list(
    pool: &SqlitePool,
    filter: &UserFilter,
    page: i64,
    per_page: i64,
) -> Result<(Vec<User>, i64)> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 100);

    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM users");
    push_filter(&mut query, filter);
    query
        .push(" ORDER BY name ASC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind((page - 1) * per_page);
    let users = query.build_query_as::<User>().fetch_all(pool).await?;

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
    push_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    Ok((users, total))
}

fn push_filter<'a>(query: &mut QueryBuilder<'a, Sqlite>, filter: &'a UserFilter) {
    query.push(" WHERE 1 = 1");
    if let Some(user_type) = filter.user_type {
        query.push(" AND user_type = ").push_bind(user_type.as_str());
    }
    if let Some(active) = filter.active {
        query.push(" AND active = ").push_bind(active);
    }
    if let Some(search) = &filter.search {
        let needle = format!("%{search}%");
        query
            .push(" AND (name LIKE ")
            .push_bind(needle.clone())
            .push(" OR email LIKE ")
            .push_bind(needle.clone())
            .push(" OR national_id LIKE ")
            .push_bind(needle)
            .push(")");
    }
}

/// Creates a new user, rejecting duplicate email or national id with a conflict.
pub async fn create(pool: &SqlitePool, new: &NewUser, now: DateTime<Utc>) -> Result<User> {
    ensure_unique(pool, &new.email, &new.national_id, None).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, national_id, email, password_hash, phone, user_type, active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?)
        RETURNING *
        "#,
    )
    .bind(&new.name)
    .bind(&new.national_id)
    .bind(&new.email)
    .bind(&new.password_hash)
    .bind(&new.phone)
    .bind(new.user_type.as_str())
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

/// Creates a user and, for students, their profile row in one transaction.
pub async fn create_with_profile(
    pool: &SqlitePool,
    new: &NewUser,
    now: DateTime<Utc>,
) -> Result<User> {
    ensure_unique(pool, &new.email, &new.national_id, None).await?;

    let mut tx = pool.begin().await?;
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, national_id, email, password_hash, phone, user_type, active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?)
        RETURNING *
        "#,
    )
    .bind(&new.name)
    .bind(&new.national_id)
    .bind(&new.email)
    .bind(&new.password_hash)
    .bind(&new.phone)
    .bind(new.user_type.as_str())
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    if user.user_type == UserType::Student {
        sqlx::query("INSERT INTO student_profiles (user_id, created_at) VALUES (?, ?)")
            .bind(user.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(user)
}

/// Applies partial changes to a user and returns the updated row.
pub async fn update(
    pool: &SqlitePool,
    id: i64,
    changes: &UserChanges,
    now: DateTime<Utc>,
) -> Result<User> {
    let current = find_by_id(pool, id).await?.ok_or(AppError::NotFound)?;

    let email = changes.email.as_deref().unwrap_or(&current.email);
    let national_id = changes
        .national_id
        .as_deref()
        .unwrap_or(&current.national_id);
    ensure_unique(pool, email, national_id, Some(id)).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET name = ?, national_id = ?, email = ?, phone = ?, user_type = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(changes.name.as_deref().unwrap_or(&current.name))
    .bind(national_id)
    .bind(email)
    .bind(changes.phone.as_deref().or(current.phone.as_deref()))
    .bind(changes.user_type.unwrap_or(current.user_type).as_str())
    .bind(now)
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

/// Updates a user's password and clears any pending reset token.
pub async fn update_password(
    pool: &SqlitePool,
    id: i64,
    password_hash: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let affected = sqlx::query(
        r#"
        UPDATE users
        SET password_hash = ?, reset_token = NULL, reset_token_expiry = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(password_hash)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// Stores a password-reset token and its expiry on the user.
pub async fn save_reset_token(
    pool: &SqlitePool,
    id: i64,
    token: &str,
    expiry: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE users SET reset_token = ?, reset_token_expiry = ? WHERE id = ?")
        .bind(token)
        .bind(expiry)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stamps the user's last successful login.
pub async fn update_last_access(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE users SET last_access_at = ? WHERE id = ?")
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Activates or deactivates an account and returns the updated row.
pub async fn set_active(
    pool: &SqlitePool,
    id: i64,
    active: bool,
    now: DateTime<Utc>,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET active = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(active)
    .bind(now)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(user)
}

/// Deletes a user row. Dependent profile and assignment rows cascade.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    let affected = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// Account counts per role.
pub async fn count_by_type(pool: &SqlitePool) -> Result<Vec<TypeCount>> {
    let counts = sqlx::query_as::<_, TypeCount>(
        "SELECT user_type, COUNT(*) AS count FROM users GROUP BY user_type",
    )
    .fetch_all(pool)
    .await?;
    Ok(counts)
}

/// Counts accounts by active flag.
pub async fn count_active(pool: &SqlitePool, active: bool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE active = ?")
        .bind(active)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Rejects an email or national id already taken by another row.
async fn ensure_unique(
    pool: &SqlitePool,
    email: &str,
    national_id: &str,
    exclude_id: Option<i64>,
) -> Result<()> {
    let exclude = exclude_id.unwrap_or(-1);

    let email_taken: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
            .bind(email)
            .bind(exclude)
            .fetch_one(pool)
            .await?;
    if email_taken > 0 {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let national_id_taken: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE national_id = ? AND id != ?")
            .bind(national_id)
            .bind(exclude)
            .fetch_one(pool)
            .await?;
    if national_id_taken > 0 {
        return Err(AppError::Conflict(
            "National id already registered".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    fn sample(email: &str, national_id: &str, user_type: UserType) -> NewUser {
        NewUser {
            name: "Ana Rojas".to_string(),
            national_id: national_id.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            phone: None,
            user_type,
        }
    }

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let state = AppState::for_tests().await;
        let now = Utc::now();

        let created = create(&state.db, &sample("ana@u.cl", "1-9", UserType::Student), now)
            .await
            .expect("create");
        assert!(created.active);

        let found = find_by_email(&state.db, "ana@u.cl")
            .await
            .expect("query")
            .expect("row");
        assert_eq!(found.id, created.id);
        assert_eq!(found.user_type, UserType::Student);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let state = AppState::for_tests().await;
        let now = Utc::now();

        create(&state.db, &sample("dup@u.cl", "1-9", UserType::Student), now)
            .await
            .expect("create");
        let err = create(&state.db, &sample("dup@u.cl", "2-7", UserType::Admin), now)
            .await
            .expect_err("duplicate");
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_preserves_unset_fields() {
        let state = AppState::for_tests().await;
        let now = Utc::now();
        let created = create(&state.db, &sample("ana@u.cl", "1-9", UserType::Student), now)
            .await
            .expect("create");

        let changes = UserChanges {
            name: Some("Ana María Rojas".to_string()),
            ..Default::default()
        };
        let updated = update(&state.db, created.id, &changes, now)
            .await
            .expect("update");
        assert_eq!(updated.name, "Ana María Rojas");
        assert_eq!(updated.email, "ana@u.cl");
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn list_filters_by_type_and_search() {
        let state = AppState::for_tests().await;
        let now = Utc::now();
        create(&state.db, &sample("ana@u.cl", "1-9", UserType::Student), now)
            .await
            .expect("create");
        create(&state.db, &sample("admin@u.cl", "2-7", UserType::Admin), now)
            .await
            .expect("create");

        let filter = UserFilter {
            user_type: Some(UserType::Student),
            ..Default::default()
        };
        let (users, total) = list(&state.db, &filter, 1, 25).await.expect("list");
        assert_eq!(total, 1);
        assert_eq!(users[0].email, "ana@u.cl");

        let filter = UserFilter {
            search: Some("admin".to_string()),
            ..Default::default()
        };
        let (_, total) = list(&state.db, &filter, 1, 25).await.expect("list");
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn password_update_clears_the_reset_token() {
        let state = AppState::for_tests().await;
        let now = Utc::now();
        let created = create(&state.db, &sample("ana@u.cl", "1-9", UserType::Student), now)
            .await
            .expect("create");

        save_reset_token(&state.db, created.id, "tok", now + chrono::Duration::hours(24))
            .await
            .expect("save token");
        update_password(&state.db, created.id, "$argon2id$new", now)
            .await
            .expect("update password");

        let user = find_by_id(&state.db, created.id)
            .await
            .expect("query")
            .expect("row");
        assert!(user.reset_token.is_none());
        assert!(user.reset_token_expiry.is_none());
        assert_eq!(user.password_hash, "$argon2id$new");
    }

    #[tokio::test]
    async fn delete_of_missing_row_is_not_found() {
        let state = AppState::for_tests().await;
        let err = delete(&state.db, 9999).await.expect_err("missing");
        assert!(matches!(err, AppError::NotFound));
    }
}
