pub(crate) use crate::auth::dto::{Claims, JwtKeys, TokenKind};
use crate::{
    auth::dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest},
    config::JwtConfig,
    error::{ApiResult, AppError},
    state::AppState,
};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{async_trait, extract::{FromRef, FromRequestParts}, http::request::Parts};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 128;

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[a-z0-9_.@+-]{3,64}$").unwrap();
}

pub(crate) fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub(crate) fn check_password_policy(password: &str) -> ApiResult<()> {
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        return Err(AppError::invalid_field(
            "password",
            format!("must be at least {PASSWORD_MIN} characters"),
        ));
    }
    if len > PASSWORD_MAX {
        return Err(AppError::invalid_field(
            "password",
            format!("must be at most {PASSWORD_MAX} characters"),
        ));
    }
    Ok(())
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs(ttl_minutes.max(1) as u64 * 60),
            refresh_ttl: Duration::from_secs(refresh_ttl_minutes.max(1) as u64 * 60),
        }
    }
}

impl JwtKeys {
    fn sign_with_kind(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Access)
    }
    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Refresh)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        Ok(claims)
    }

    fn issue(&self, user: PublicUser) -> anyhow::Result<AuthResponse> {
        Ok(AuthResponse {
            access_token: self.sign_access(user.id)?,
            refresh_token: self.sign_refresh(user.id)?,
            token_type: "bearer",
            expires_in: self.access_ttl.as_secs(),
            user,
        })
    }
}

pub async fn register(state: &AppState, req: RegisterRequest) -> ApiResult<AuthResponse> {
    let username = normalize_username(&req.username);
    if !is_valid_username(&username) {
        warn!(%username, "invalid username");
        return Err(AppError::invalid_field(
            "username",
            "must be 3-64 characters of a-z, 0-9, '_', '.', '@', '+', '-'",
        ));
    }
    check_password_policy(&req.password)?;
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if state.users.find_by_username(&username).await?.is_some() {
        warn!(%username, "username already registered");
        return Err(AppError::Conflict("Username already registered".into()));
    }

    let hash = hash_password(&req.password)?;
    // The unique index still guards against a concurrent registration.
    let user = state.users.create(&username, &hash, display_name).await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(JwtKeys::from_ref(state).issue(user.into())?)
}

pub async fn login(state: &AppState, req: LoginRequest) -> ApiResult<AuthResponse> {
    let username = normalize_username(&req.username);

    let Some(user) = state.users.find_by_username(&username).await? else {
        warn!(%username, "login unknown username");
        return Err(AppError::unauthorized("Invalid credentials"));
    };

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(%username, user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    info!(user_id = %user.id, "user logged in");
    Ok(JwtKeys::from_ref(state).issue(user.into())?)
}

pub async fn refresh(state: &AppState, req: RefreshRequest) -> ApiResult<AuthResponse> {
    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_refresh(&req.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::unauthorized("Invalid refresh token")
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    Ok(keys.issue(user.into())?)
}

pub async fn me(state: &AppState, user_id: Uuid) -> ApiResult<PublicUser> {
    state
        .users
        .find_by_id(user_id)
        .await?
        .map(PublicUser::from)
        .ok_or_else(|| {
            error!(user_id = %user_id, "token subject has no user");
            AppError::unauthorized("User not found")
        })
}

/// Authenticated caller, resolved from `Authorization: Bearer <access token>`.
/// Rejects before the handler (and any body extractor) runs.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| AppError::unauthorized("Invalid Authorization header"))?;

        let claims = match keys.verify(token.trim()) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired token");
                return Err(AppError::unauthorized("Invalid or expired token"));
            }
        };

        if claims.kind != TokenKind::Access {
            return Err(AppError::unauthorized("Access token required"));
        }

        Ok(AuthUser(claims.sub))
    }
}
