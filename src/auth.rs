/*!
 * # Authentication Module
 *
 * JWT-based authentication for the dashboard API. Users register and log
 * in with email and password; every analytics route requires a valid
 * bearer token. Passwords are hashed with Argon2 and accounts live in an
 * in-process concurrent map, which is all a single-node dashboard needs.
 */

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const TOKEN_ISSUER: &str = "pharma-insights-api";
const TOKEN_AUDIENCE: &str = "pharma-insights-dashboard";

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // Subject (user ID)
    pub name: String,  // User's display name
    pub email: String, // User's email
    pub jti: String,   // JWT ID (unique identifier for this token)
    pub iat: i64,      // Issued at time
    pub exp: i64,      // Expiration time
    pub iss: String,   // Issuer
    pub aud: String,   // Audience
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub token_id: String,
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub token_expiration: usize,
}

/// A registered account
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: chrono::DateTime<Utc>,
}

/// Public profile view of a user, safe to serialize
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// Registration request payload
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

/// Login request payload
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Successful authentication response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthSession {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: usize,
    pub user: UserProfile,
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message): (StatusCode, &str, String) = match &self {
            Self::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Authentication required".to_string(),
            ),
            Self::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_CREDENTIALS",
                "Invalid credentials".to_string(),
            ),
            Self::EmailTaken => (
                StatusCode::CONFLICT,
                "AUTH_EMAIL_TAKEN",
                "Email already registered".to_string(),
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_TOKEN",
                "Invalid authentication token".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "AUTH_TOKEN_EXPIRED",
                "Token has expired".to_string(),
            ),
            Self::TokenCreation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_TOKEN_CREATION_FAILED",
                msg.clone(),
            ),
            Self::UserNotFound => (
                StatusCode::NOT_FOUND,
                "AUTH_USER_NOT_FOUND",
                "User not found".to_string(),
            ),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, "AUTH_VALIDATION", msg.clone()),
            Self::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_INTERNAL_ERROR",
                "Internal error".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": error_code,
                "message": error_message,
            }
        }));

        (status, body).into_response()
    }
}

/// Authentication service: account registry plus token issue/validate.
pub struct AuthService {
    config: AuthConfig,
    /// Accounts keyed by lowercased email.
    users: DashMap<String, User>,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            users: DashMap::new(),
        }
    }

    /// Register a new account. Emails are unique, case-insensitively.
    pub fn register(&self, request: &RegisterRequest) -> Result<User, AuthError> {
        request.validate()?;
        let key = request.email.to_lowercase();
        if self.users.contains_key(&key) {
            return Err(AuthError::EmailTaken);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(request.password.as_bytes(), &salt)
            .map_err(|e| AuthError::InternalError(format!("password hashing: {}", e)))?
            .to_string();

        let user = User {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            email: request.email.clone(),
            password_hash,
            created_at: Utc::now(),
        };

        // A concurrent register for the same email loses the race here.
        if self.users.insert(key, user.clone()).is_some() {
            return Err(AuthError::EmailTaken);
        }
        debug!(email = %user.email, "registered user");
        Ok(user)
    }

    /// Verify credentials and return the matching account.
    pub fn login(&self, request: &LoginRequest) -> Result<User, AuthError> {
        let key = request.email.to_lowercase();
        let user = self
            .users
            .get(&key)
            .map(|entry| entry.clone())
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| AuthError::InternalError(format!("stored hash: {}", e)))?;
        Argon2::default()
            .verify_password(request.password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)?;

        Ok(user)
    }

    /// Issue a signed access token for `user`.
    pub fn generate_token(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.config.token_expiration as i64,
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a token's signature, expiry, issuer and audience.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_AUDIENCE]);

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;

        Ok(token_data.claims)
    }

    /// Look up a profile by user id.
    pub fn profile(&self, user_id: &str) -> Result<UserProfile, AuthError> {
        self.users
            .iter()
            .find(|entry| entry.id.to_string() == user_id)
            .map(|entry| UserProfile::from(entry.value()))
            .ok_or(AuthError::UserNotFound)
    }

    fn session_for(&self, user: &User) -> Result<AuthSession, AuthError> {
        Ok(AuthSession {
            access_token: self.generate_token(user)?,
            token_type: "Bearer".to_string(),
            expires_in: self.config.token_expiration,
            user: UserProfile::from(user),
        })
    }
}

/// Authentication middleware that extracts and validates bearer tokens
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let headers = request.headers().clone();

    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication service not available",
            )
                .into_response();
        }
    };

    match extract_auth_from_headers(&headers, &auth_service) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "rejected unauthenticated request");
            e.into_response()
        }
    }
}

/// Extract authentication info from request headers
fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_value) = auth_header.to_str() {
            if let Some(token) = auth_value.strip_prefix("Bearer ") {
                let claims = auth_service.validate_token(token.trim())?;
                return Ok(AuthUser {
                    user_id: claims.sub,
                    name: claims.name,
                    email: claims.email,
                    token_id: claims.jti,
                });
            }
        }
    }
    Err(AuthError::MissingAuth)
}

/// Authentication routes
pub fn auth_routes() -> axum::Router<Arc<AuthService>> {
    axum::Router::new()
        .route("/register", axum::routing::post(register_handler))
        .route("/login", axum::routing::post(login_handler))
        .route("/me", axum::routing::get(me_handler))
}

/// Register handler
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created", body = AuthSession),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn register_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<AuthSession>, AuthError> {
    let user = auth_service.register(&request)?;
    Ok(Json(auth_service.session_for(&user)?))
}

/// Login handler
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthSession),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthSession>, AuthError> {
    let user = auth_service.login(&request)?;
    Ok(Json(auth_service.session_for(&user)?))
}

/// Current-user handler
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user profile", body = UserProfile),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me_handler(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, AuthError> {
    let user = extract_auth_from_headers(&headers, &auth_service)?;
    Ok(Json(auth_service.profile(&user.user_id)?))
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(AuthConfig {
            jwt_secret: "test_secret_that_is_long_enough_for_hs256".into(),
            token_expiration: 3600,
        })
    }

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password: "correct horse battery".into(),
        }
    }

    #[test]
    fn register_then_login_roundtrip() {
        let svc = service();
        let user = svc.register(&register_request()).unwrap();
        assert_eq!(user.email, "ada@example.com");

        let logged_in = svc
            .login(&LoginRequest {
                email: "ADA@example.com".into(),
                password: "correct horse battery".into(),
            })
            .unwrap();
        assert_eq!(logged_in.id, user.id);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let svc = service();
        svc.register(&register_request()).unwrap();
        let err = svc.register(&register_request()).unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[test]
    fn wrong_password_is_invalid_credentials() {
        let svc = service();
        svc.register(&register_request()).unwrap();
        let err = svc
            .login(&LoginRequest {
                email: "ada@example.com".into(),
                password: "wrong".into(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn short_password_fails_validation() {
        let svc = service();
        let err = svc
            .register(&RegisterRequest {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password: "short".into(),
            })
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn token_roundtrip_carries_claims() {
        let svc = service();
        let user = svc.register(&register_request()).unwrap();
        let token = svc.generate_token(&user).unwrap();
        let claims = svc.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.iss, TOKEN_ISSUER);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let svc = service();
        let other = AuthService::new(AuthConfig {
            jwt_secret: "a_completely_different_secret_material_here".into(),
            token_expiration: 3600,
        });
        let user = svc.register(&register_request()).unwrap();
        let token = other.generate_token(&user).unwrap();
        assert!(matches!(
            svc.validate_token(&token).unwrap_err(),
            AuthError::InvalidToken
        ));
    }

    #[test]
    fn expired_token_maps_to_token_expired() {
        let svc = service();
        let now = Utc::now().timestamp();
        // Hand-craft a token that expired well outside the default leeway.
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            jti: Uuid::new_v4().to_string(),
            iat: now - 7200,
            exp: now - 3600,
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret("test_secret_that_is_long_enough_for_hs256".as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            svc.validate_token(&token).unwrap_err(),
            AuthError::TokenExpired
        ));
    }

    #[test]
    fn profile_lookup_by_id() {
        let svc = service();
        let user = svc.register(&register_request()).unwrap();
        let profile = svc.profile(&user.id.to_string()).unwrap();
        assert_eq!(profile.email, user.email);
        assert!(matches!(
            svc.profile("not-a-real-id").unwrap_err(),
            AuthError::UserNotFound
        ));
    }
}
