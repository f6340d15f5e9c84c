use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::OsRng;
use uuid::Uuid;

use crate::{
    audit,
    config::JwtConfig,
    dto::auth::{AuthResponse, Claims, LoginRequest, RegisterRequest, UpdateProfileRequest},
    error::{AppError, AppResult},
    models::{ROLE_CUSTOMER, User},
    response::{ApiResponse, Meta},
    state::AppState,
    validation::{normalize_email, optional_text, required_text},
};

const USER_COLUMNS: &str =
    "id, full_name, email, phone, address, role, is_active, created_at";

#[derive(sqlx::FromRow)]
struct Credentials {
    id: Uuid,
    password_hash: String,
    is_active: bool,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

pub fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Sign a token for `user`, returning it with its expiry.
pub fn issue_token(jwt: &JwtConfig, user: &User) -> AppResult<(String, DateTime<Utc>)> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::minutes(jwt.expiration_minutes))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        name: user.full_name.clone(),
        role: user.role.clone(),
        iat: now.timestamp() as usize,
        exp: expiration.timestamp() as usize,
        iss: jwt.issuer.clone(),
        aud: jwt.audience.clone(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok((token, expiration))
}

pub fn decode_token(jwt: &JwtConfig, token: &str) -> AppResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[jwt.issuer.as_str()]);
    validation.set_audience(&[jwt.audience.as_str()]);
    validation.leeway = 0;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))
}

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<AuthResponse>> {
    let email = normalize_email(&payload.email)?;
    let full_name = required_text("full_name", &payload.full_name, 1, 100)?;
    let phone = optional_text("phone", payload.phone.as_deref(), 20)?;
    if payload.password.trim().chars().count() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters".into(),
        ));
    }

    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;
    if exist.is_some() {
        return Err(AppError::BadRequest("Email already exists".to_string()));
    }

    let password_hash = hash_password(&payload.password)?;

    let inserted = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, full_name, email, password_hash, phone, role) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email.as_str())
    .bind(password_hash)
    .bind(phone)
    .bind(ROLE_CUSTOMER)
    .fetch_one(&state.pool)
    .await;

    // Lost a race with a concurrent registration for the same email.
    let user = match inserted {
        Ok(user) => user,
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(AppError::BadRequest("Email already exists".to_string()));
        }
        Err(err) => return Err(err.into()),
    };

    let (token, expires_at) = issue_token(&state.jwt, &user)?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_register",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;
    tracing::info!(user_id = %user.id, "user registered");

    Ok(ApiResponse::success(
        "User created",
        AuthResponse {
            token,
            token_type: "Bearer".into(),
            expires_at,
            user,
        },
        Some(Meta::empty()),
    ))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<AuthResponse>> {
    let invalid = || AppError::Unauthorized("Invalid email or password".into());
    let email = normalize_email(&payload.email).map_err(|_| invalid())?;

    let credentials = sqlx::query_as::<_, Credentials>(
        "SELECT id, password_hash, is_active FROM users WHERE email = $1",
    )
    .bind(email.as_str())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &credentials.password_hash)? {
        return Err(invalid());
    }
    if !credentials.is_active {
        return Err(AppError::Forbidden);
    }

    let user = find_user(state, credentials.id).await?;
    let (token, expires_at) = issue_token(&state.jwt, &user)?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Logged in",
        AuthResponse {
            token,
            token_type: "Bearer".into(),
            expires_at,
            user,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_profile(state: &AppState, user_id: Uuid) -> AppResult<ApiResponse<User>> {
    let user = find_user(state, user_id).await?;
    Ok(ApiResponse::success("Profile", user, None))
}

pub async fn update_profile(
    state: &AppState,
    user_id: Uuid,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>> {
    let full_name = required_text("full_name", &payload.full_name, 1, 100)?;
    let phone = optional_text("phone", payload.phone.as_deref(), 20)?;
    let address = optional_text("address", payload.address.as_deref(), 500)?;

    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET full_name = $2, phone = $3, address = $4 \
         WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
    .bind(user_id)
    .bind(full_name)
    .bind(phone)
    .bind(address)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound)?;

    audit::record(
        &state.pool,
        Some(user_id),
        "profile_update",
        "users",
        serde_json::json!({ "user_id": user_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Profile updated successfully",
        user,
        Some(Meta::empty()),
    ))
}

async fn find_user(state: &AppState, user_id: Uuid) -> AppResult<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-with-enough-entropy".into(),
            issuer: "fashion-store-api".into(),
            audience: "fashion-store-frontend".into(),
            expiration_minutes: 30,
        }
    }

    fn user(role: &str) -> User {
        User {
            id: Uuid::new_v4(),
            full_name: "Customer One".into(),
            email: "customer1@example.com".into(),
            phone: None,
            address: None,
            role: role.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_decodes_to_same_subject_and_role() {
        let jwt = jwt();
        let user = user("admin");
        let (token, expires_at) = issue_token(&jwt, &user).expect("token");
        assert!(expires_at > Utc::now());

        let claims = decode_token(&jwt, &token).expect("claims");
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.email, user.email);
    }

    #[test]
    fn token_from_other_audience_is_rejected() {
        let jwt = jwt();
        let (token, _) = issue_token(&jwt, &user("customer")).expect("token");

        let other = JwtConfig {
            audience: "someone-else".into(),
            ..jwt
        };
        assert!(matches!(
            decode_token(&other, &token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let (token, _) = issue_token(&jwt(), &user("customer")).expect("token");
        let other = JwtConfig {
            secret: "a-different-secret".into(),
            ..jwt()
        };
        assert!(decode_token(&other, &token).is_err());
    }

    #[test]
    fn password_hash_verifies_only_its_password() {
        let hash = hash_password("customer123").expect("hash");
        assert!(verify_password("customer123", &hash).expect("verify"));
        assert!(!verify_password("customer124", &hash).expect("verify"));
    }
}
