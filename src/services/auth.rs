use crate::{
    config::Config,
    error::{AppError, Result},
    models::user::{ActorSummary, UserId},
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    Extension, RequestPartsExt, TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,            // 用户ID
    pub exp: i64,               // 过期时间
    #[serde(default)]
    pub iat: Option<i64>,       // 签发时间
    #[serde(default)]
    pub name: Option<String>,   // 显示名
    #[serde(default)]
    pub picture: Option<String>,
}

/// Verifies tokens issued by the identity provider. This service never
/// issues sessions of its own outside tests and development tooling.
#[derive(Clone)]
pub struct AuthService {
    config: Config,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn verify_jwt(&self, token: &str) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.config.jwt_secret.as_ref());
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(token_data) => {
                debug!("JWT token verified for user: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::Authentication("Invalid token".to_string()))
            }
        }
    }

    /// Resolve a bearer token to the caller's identity.
    pub fn authenticate(&self, token: &str) -> Result<CurrentUser> {
        let claims = self.verify_jwt(token)?;
        let id: UserId = claims
            .sub
            .parse()
            .map_err(|_| AppError::Authentication("Token subject is not a user id".to_string()))?;

        Ok(CurrentUser {
            id,
            name: claims.name.unwrap_or_else(|| format!("user{}", id)),
            photo: claims.picture,
        })
    }

    pub fn issue_token(&self, user_id: UserId, name: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: Some(now.timestamp()),
            name: Some(name.to_string()),
            picture: None,
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_ref()),
        )?)
    }
}

/// The authenticated caller, passed explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    pub photo: Option<String>,
}

impl CurrentUser {
    pub fn actor(&self) -> ActorSummary {
        ActorSummary {
            id: self.id,
            name: self.name.clone(),
            photo: self.photo.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

async fn auth_service_of(parts: &mut Parts) -> Result<Arc<AuthService>> {
    let Extension(auth_service): Extension<Arc<AuthService>> = parts
        .extract::<Extension<Arc<AuthService>>>()
        .await
        .map_err(|_| AppError::Internal("Auth service not found in request extensions".to_string()))?;
    Ok(auth_service)
}

async fn bearer_token(parts: &mut Parts) -> Option<String> {
    parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .ok()
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
}

// Axum extractor for authentication
#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let auth_service = auth_service_of(parts).await?;
        let token = bearer_token(parts)
            .await
            .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?;

        auth_service.authenticate(&token)
    }
}

/// Caller of the WebSocket upgrade. Browsers cannot set headers on the
/// handshake, so `?token=` is accepted here and nowhere else.
#[derive(Debug, Clone)]
pub struct HandshakeUser(pub CurrentUser);

#[async_trait]
impl<S> FromRequestParts<S> for HandshakeUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let auth_service = auth_service_of(parts).await?;

        // 优先 Authorization 头
        let token = match bearer_token(parts).await {
            Some(token) => token,
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AppError::unauthorized("Missing authorization token"))?,
        };

        auth_service.authenticate(&token).map(HandshakeUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let auth = AuthService::new(&Config::default());
        let token = auth.issue_token(UserId(12), "Jo", Duration::hours(1)).unwrap();

        let user = auth.authenticate(&token).unwrap();
        assert_eq!(user.id, UserId(12));
        assert_eq!(user.actor().name, "Jo");
    }

    #[test]
    fn test_foreign_secret_and_bad_subject_are_rejected() {
        let issuer = AuthService::new(&Config {
            jwt_secret: "someone-else".to_string(),
            ..Config::default()
        });
        let token = issuer.issue_token(UserId(1), "Eve", Duration::hours(1)).unwrap();
        let auth = AuthService::new(&Config::default());
        assert!(matches!(
            auth.authenticate(&token),
            Err(AppError::Authentication(_))
        ));

        let claims = Claims {
            sub: "not-a-number".to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            iat: None,
            name: None,
            picture: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(Config::default().jwt_secret.as_ref()),
        )
        .unwrap();
        assert!(matches!(
            auth.authenticate(&token),
            Err(AppError::Authentication(_))
        ));
    }

    fn parts_for(uri: &str, auth: AuthService) -> Parts {
        let (parts, _) = axum::http::Request::builder()
            .uri(uri)
            .extension(Arc::new(auth))
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn test_query_token_only_accepted_on_handshake() {
        let auth = AuthService::new(&Config::default());
        let token = auth.issue_token(UserId(5), "Kai", Duration::hours(1)).unwrap();
        let uri = format!("/?token={}", token);

        let mut parts = parts_for(&uri, auth.clone());
        let HandshakeUser(user) = HandshakeUser::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(user.id, UserId(5));

        let mut parts = parts_for(&uri, auth);
        assert!(matches!(
            CurrentUser::from_request_parts(&mut parts, &()).await,
            Err(AppError::Authentication(_))
        ));
    }
}
