//! Password hashing, session tokens and the login/session lifecycle.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;

use crate::clinic::settings::{bool_setting, number_setting};
use crate::db::document::{from_document, redact, to_document, Document, ListQuery, RecordKey};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{
    checked_add_minutes, log_audit, Actor, AuditAction, LoginResponse, NewUser, Role, Session, User,
    UserResponse,
};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

pub const MIN_PASSWORD_LENGTH: usize = 8;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> StoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random 64-char hex token
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Password rules, read from the `passwordMinLength` and
/// `requireStrongPasswords` settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_strong: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
            require_strong: true,
        }
    }
}

impl PasswordPolicy {
    pub(crate) async fn load(conn: &mut SqliteConnection) -> StoreResult<Self> {
        let min_length =
            number_setting(&mut *conn, "passwordMinLength", MIN_PASSWORD_LENGTH as f64).await?;
        let require_strong = bool_setting(&mut *conn, "requireStrongPasswords", true).await?;
        Ok(Self {
            min_length: min_length.max(1.0) as usize,
            require_strong,
        })
    }
}

/// Validate password strength
/// Returns None if valid, or Some(error_message) if invalid
pub fn validate_password_strength(password: &str, policy: &PasswordPolicy) -> Option<String> {
    if password.chars().count() < policy.min_length {
        return Some(format!(
            "Password must be at least {} characters",
            policy.min_length
        ));
    }
    if !policy.require_strong {
        return None;
    }

    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !has_uppercase {
        return Some("Password must contain at least one uppercase letter".to_string());
    }
    if !has_lowercase {
        return Some("Password must contain at least one lowercase letter".to_string());
    }
    if !has_digit {
        return Some("Password must contain at least one digit".to_string());
    }

    let common_passwords = ["password1", "welcome1", "qwerty123", "letmein1", "admin123", "clinic123"];
    let lower = password.to_lowercase();
    if common_passwords.iter().any(|common| lower.contains(common)) {
        return Some("Password is too common. Please choose a stronger password.".to_string());
    }

    None
}

async fn find_session(
    conn: &mut SqliteConnection,
    token: &str,
) -> StoreResult<Option<(RecordKey, Session, Document)>> {
    let index = Collection::Sessions
        .index("token")
        .ok_or_else(|| StoreError::validation("sessions have no token index"))?;
    let docs = store::fetch_by_index(conn, Collection::Sessions, index, &Value::from(hash_token(token))).await?;

    match docs.into_iter().next() {
        Some(doc) => {
            let key = store::key_of(Collection::Sessions, &doc)
                .ok_or_else(|| StoreError::validation("session without id"))?;
            let session: Session = from_document(doc.clone())?;
            Ok(Some((key, session, doc)))
        }
        None => Ok(None),
    }
}

async fn find_user_by_username(
    conn: &mut SqliteConnection,
    username: &str,
) -> StoreResult<Option<User>> {
    let index = Collection::Users
        .index("username")
        .ok_or_else(|| StoreError::validation("users have no username index"))?;
    let docs = store::fetch_by_index(conn, Collection::Users, index, &Value::from(username)).await?;
    docs.into_iter().next().map(from_document).transpose()
}

/// Unexpired session for `token` whose user is still active
async fn live_session(
    conn: &mut SqliteConnection,
    token: &str,
    now: DateTime<Utc>,
) -> StoreResult<Option<(RecordKey, Session, User)>> {
    let (key, session, _) = match find_session(&mut *conn, token).await? {
        Some(found) => found,
        None => return Ok(None),
    };
    if session.is_expired_at(now) {
        return Ok(None);
    }

    let user: Option<User> =
        store::fetch_as(&mut *conn, Collection::Users, &RecordKey::Int(session.user_id)).await?;
    Ok(match user {
        Some(user) if user.is_active => Some((key, session, user)),
        _ => None,
    })
}

impl ClinicStore {
    /// Checks credentials and opens a session.
    ///
    /// Unknown user, inactive account and wrong password all fail with the
    /// same "Invalid credentials" error.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        device_info: Option<String>,
    ) -> StoreResult<LoginResponse> {
        let mut tx = self.pool.begin().await?;

        let mut user = match find_user_by_username(&mut *tx, username.trim()).await? {
            Some(user) if user.is_active && verify_password(password, &user.password_hash) => user,
            _ => {
                tracing::warn!(username = %username, "Failed login attempt");
                return Err(StoreError::authentication(INVALID_CREDENTIALS));
            }
        };
        let user_id = user
            .id
            .ok_or_else(|| StoreError::authentication(INVALID_CREDENTIALS))?;
        let user_key = RecordKey::Int(user_id);

        if user.role != Role::Admin && bool_setting(&mut *tx, "maintenanceMode", false).await? {
            tracing::warn!(username = %user.username, "Login refused during maintenance");
            return Err(StoreError::authentication(
                "System is in maintenance mode; only administrators can sign in",
            ));
        }

        let ttl_hours = number_setting(
            &mut *tx,
            "sessionTimeoutHours",
            self.auth.session_ttl_hours as f64,
        )
        .await?;
        let now = Utc::now();
        let expiry = checked_add_minutes(now, (ttl_hours * 60.0) as i64).ok_or_else(|| {
            StoreError::validation(format!("sessionTimeoutHours {} is out of range", ttl_hours))
        })?;
        user.last_login = Some(now);
        store::replace(&mut *tx, Collection::Users, &user_key, &to_document(&user)?).await?;

        let token = generate_token();
        let session = Session {
            id: None,
            user_id,
            token: hash_token(&token),
            expiry,
            device_info,
            login_time: now,
        };
        let stored = store::insert(&mut *tx, Collection::Sessions, &to_document(&session)?).await?;

        log_audit(
            &mut *tx,
            Actor::User(user_id),
            AuditAction::Login,
            Collection::Sessions,
            store::key_of(Collection::Sessions, &stored).as_ref(),
            Some(redact(Collection::Sessions, &stored)),
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(user_id = user_id, username = %user.username, "User logged in");
        Ok(LoginResponse {
            token,
            user: user.into(),
        })
    }

    /// Returns the session's user and slides its expiry forward, or `None`
    /// for unknown and expired tokens and inactive users.
    pub async fn validate_session(&self, token: &str) -> StoreResult<Option<UserResponse>> {
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let (key, mut session, user) = match live_session(&mut *tx, token, now).await? {
            Some(found) => found,
            None => return Ok(None),
        };

        let extended = checked_add_minutes(now, self.auth.sliding_window_minutes)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if extended > session.expiry {
            session.expiry = extended;
            store::replace(&mut *tx, Collection::Sessions, &key, &to_document(&session)?).await?;
        }
        tx.commit().await?;

        Ok(Some(user.into()))
    }

    /// The session's user without touching the session, or `None` for unknown
    /// and expired tokens and inactive users
    pub async fn session_user(&self, token: &str) -> StoreResult<Option<UserResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(live_session(&mut *conn, token, Utc::now())
            .await?
            .map(|(_, _, user)| user.into()))
    }

    /// Like [`validate_session`](Self::validate_session) but fails with an
    /// authentication error instead of returning `None`.
    pub async fn authenticate(&self, token: &str) -> StoreResult<UserResponse> {
        self.validate_session(token)
            .await?
            .ok_or_else(|| StoreError::authentication("Invalid or expired session"))
    }

    /// Ends the session for `token`. Returns whether a session was removed;
    /// unknown tokens are a no-op and write no audit entry.
    pub async fn logout(&self, token: &str, actor: Actor) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let (key, session, doc) = match find_session(&mut *tx, token).await? {
            Some(found) => found,
            None => return Ok(false),
        };

        if !store::remove(&mut *tx, Collection::Sessions, &key).await? {
            return Ok(false);
        }
        log_audit(
            &mut *tx,
            actor,
            AuditAction::Logout,
            Collection::Sessions,
            Some(&key),
            None,
            Some(redact(Collection::Sessions, &doc)),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(user_id = session.user_id, "User logged out");
        Ok(true)
    }

    /// Deletes every session whose expiry has passed
    pub async fn sweep_expired_sessions(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut removed = 0;
        for doc in store::fetch_all(&mut *tx, Collection::Sessions).await? {
            let session: Session = from_document(doc)?;
            if !session.is_expired_at(now) {
                continue;
            }
            if let Some(id) = session.id {
                if store::remove(&mut *tx, Collection::Sessions, &RecordKey::Int(id)).await? {
                    removed += 1;
                }
            }
        }
        tx.commit().await?;

        if removed > 0 {
            tracing::info!(removed = removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Creates a user, hashing the password on the way in
    pub async fn create_user(&self, new_user: NewUser, actor: Actor) -> StoreResult<UserResponse> {
        let username = new_user.username.trim().to_string();
        if username.is_empty() {
            return Err(StoreError::validation("Username is required"));
        }
        let email = new_user.email.trim().to_string();
        if !email.contains('@') {
            return Err(StoreError::validation("Invalid email address"));
        }
        let mut tx = self.pool.begin().await?;
        let policy = PasswordPolicy::load(&mut *tx).await?;
        if let Some(error) = validate_password_strength(&new_user.password, &policy) {
            return Err(StoreError::validation(error));
        }

        let user = User {
            id: None,
            username,
            password_hash: hash_password(&new_user.password)?,
            email,
            role: new_user.role,
            full_name: new_user.full_name,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        };

        let stored = store::add_record(&mut *tx, Collection::Users, to_document(&user)?, actor).await?;
        tx.commit().await?;

        let user: User = from_document(stored)?;
        tracing::info!(username = %user.username, role = %user.role, "Created user");
        Ok(user.into())
    }

    /// Changes a user's password after checking the current one
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> StoreResult<()> {
        let key = RecordKey::Int(user_id);
        let mut tx = self.pool.begin().await?;
        let policy = PasswordPolicy::load(&mut *tx).await?;
        if let Some(error) = validate_password_strength(new_password, &policy) {
            return Err(StoreError::validation(error));
        }

        let mut user: User = store::require_as(&mut *tx, Collection::Users, &key).await?;

        if !verify_password(current_password, &user.password_hash) {
            return Err(StoreError::authentication("Current password is incorrect"));
        }

        user.password_hash = hash_password(new_password)?;
        store::update_record(
            &mut *tx,
            Collection::Users,
            &key,
            to_document(&user)?,
            Actor::User(user_id),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(user_id = user_id, "Password changed");
        Ok(())
    }

    /// Active sessions of one user, newest first
    pub async fn sessions_for_user(&self, user_id: i64) -> StoreResult<Vec<Session>> {
        let now = Utc::now();
        let sessions: Vec<Session> = self
            .get_all_as(
                Collection::Sessions,
                &ListQuery::new()
                    .filter("userId", user_id)
                    .sort_by("loginTime", crate::db::SortOrder::Desc),
            )
            .await?;
        Ok(sessions
            .into_iter()
            .filter(|s| !s.is_expired_at(now))
            .collect())
    }
}
