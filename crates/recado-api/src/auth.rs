use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use recado_db::Database;
use recado_gateway::dispatcher::Dispatcher;
use recado_types::api::{Claims, LoginRequest, ProfileResponse, RegisterRequest, TokenScope};
use recado_types::models::Role;

pub use recado_types::api::SESSION_COOKIE;

use crate::broadcast::NoteBroadcaster;

/// Browser sessions last for weeks; gateway tokens (see `bridge`) do not.
const SESSION_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub notes: NoteBroadcaster,
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    // Check if username is taken
    if state
        .db
        .get_user_by_username(&req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let user_id = Uuid::new_v4();
    let role = Role::Member;

    state
        .db
        .create_user(
            &user_id.to_string(),
            &req.username,
            &password_hash,
            display_name.as_deref(),
            role.as_str(),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(
        &state.jwt_secret,
        user_id,
        &req.username,
        role,
        TokenScope::Session,
        chrono::Duration::days(SESSION_TTL_DAYS),
    )
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(token)),
        Json(ProfileResponse {
            user_id,
            username: req.username.clone(),
            display_name: display_name.unwrap_or(req.username),
            role,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = state
        .db
        .get_user_by_username(&req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let role = Role::from_db(&user.role);

    let token = create_token(
        &state.jwt_secret,
        user_id,
        &user.username,
        role,
        TokenScope::Session,
        chrono::Duration::days(SESSION_TTL_DAYS),
    )
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        jar.add(session_cookie(token)),
        Json(ProfileResponse {
            user_id,
            display_name: user.display_name().to_string(),
            username: user.username,
            role,
        }),
    ))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let removal = Cookie::build(SESSION_COOKIE).path("/").build();
    (jar.remove(removal), StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ProfileResponse>, StatusCode> {
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(Json(ProfileResponse {
        user_id: claims.sub,
        display_name: user.display_name().to_string(),
        username: user.username,
        role: Role::from_db(&user.role),
    }))
}

pub fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    role: Role,
    scope: TokenScope,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        scope,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// HttpOnly keeps the session out of script reach; expiry is enforced by the
/// JWT itself rather than cookie max-age.
fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}
