use std::sync::Arc;

use argon2::{
    password_hash::{Encoding, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CollabContext, DatabaseError, NewUser, PrimaryKey, UserData};

pub struct Auth {
    context: CollabContext,
    argon: Argon2<'static>,
    tokens: Arc<dyn TokenValidator>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Email or password is incorrect
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// The token is missing, malformed, expired, or its user is gone
    #[error("Invalid or expired token")]
    InvalidToken,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(#[from] DatabaseError),
    #[error("HashError: {0}")]
    HashError(String),
    #[error("TokenError: {0}")]
    TokenError(String),
}

/// Issues and validates bearer tokens for users
pub trait TokenValidator: Send + Sync {
    fn issue(&self, user_id: PrimaryKey, now: DateTime<Utc>) -> Result<String, AuthError>;
    /// Returns the user the token was issued to
    fn validate(&self, token: &str) -> Result<PrimaryKey, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct UserClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// HS256 json web tokens signed with the configured secret
pub struct JwtTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl JwtTokens {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }
}

impl TokenValidator for JwtTokens {
    fn issue(&self, user_id: PrimaryKey, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = UserClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
        };

        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::TokenError(e.to_string()))
    }

    fn validate(&self, token: &str) -> Result<PrimaryKey, AuthError> {
        let data = jsonwebtoken::decode::<UserClaims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;

        data.claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidToken)
    }
}

impl Auth {
    pub fn new(context: &CollabContext) -> Self {
        let tokens = JwtTokens::new(&context.config.jwt_secret, context.config.token_lifetime);

        Self::with_tokens(context, Arc::new(tokens))
    }

    pub fn with_tokens(context: &CollabContext, tokens: Arc<dyn TokenValidator>) -> Self {
        Self {
            context: context.clone(),
            argon: Argon2::default(),
            tokens,
        }
    }

    /// Logs in a user, returning the user and a new token
    pub async fn login(&self, credentials: Credentials) -> Result<(UserData, String), AuthError> {
        let user = self
            .context
            .database
            .user_by_email(&credentials.email)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidCredentials,
                err => AuthError::Db(err),
            })?;

        let stored_password = PasswordHash::parse(&user.password, Encoding::default())
            .map_err(|e| AuthError::HashError(e.to_string()))?;

        self.argon
            .verify_password(credentials.password.as_bytes(), &stored_password)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let token = self.issue_token(&user)?;

        Ok((user, token))
    }

    /// Creates a user with a hashed password
    pub async fn register(&self, new_user: NewPlainUser) -> Result<UserData, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hashed_password = self
            .argon
            .hash_password(new_user.password.as_bytes(), &salt)
            .map_err(|e| AuthError::HashError(e.to_string()))?
            .to_string();

        let user = self
            .context
            .database
            .create_user(NewUser {
                username: new_user.username,
                email: new_user.email,
                password: hashed_password,
                created_at: self.context.clock.now(),
            })
            .await?;

        Ok(user)
    }

    pub fn issue_token(&self, user: &UserData) -> Result<String, AuthError> {
        self.tokens.issue(user.id, self.context.clock.now())
    }

    /// Resolves a bearer token to its user
    pub async fn user_from_token(&self, token: &str) -> Result<UserData, AuthError> {
        let user_id = self.tokens.validate(token)?;

        self.context
            .database
            .user_by_id(user_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidToken,
                err => AuthError::Db(err),
            })
    }
}

#[derive(Debug)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug)]
pub struct NewPlainUser {
    pub username: String,
    pub email: String,
    pub password: String,
}
