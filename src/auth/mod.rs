use anyhow::{Context, Result};
use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::AuthConfig;

/// Claims we read from a bearer token. `sub` is the caller id that link
/// ownership is checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
}

pub struct AuthService {
    key: DecodingKey,
    validation: Validation,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = config.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Caller> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .context("token failed signature or claim validation")?;

        if data.claims.sub.trim().is_empty() {
            anyhow::bail!("token has an empty subject");
        }

        Ok(Caller {
            id: data.claims.sub,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing bearer token").into_response();
    };

    match auth_service.validate(token) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(err) => {
            debug!(error = %err, "rejected bearer token");
            (StatusCode::UNAUTHORIZED, "Invalid bearer token").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            issuer: None,
        }
    }

    fn token(secret: &str, sub: &str, exp: u64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp,
            iss: None,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> u64 {
        (chrono::Utc::now().timestamp() + 3600) as u64
    }

    #[test]
    fn test_valid_token_yields_caller() {
        let service = AuthService::new(&config()).unwrap();
        let caller = service
            .validate(&token("test-secret", "user-42", far_future()))
            .unwrap();
        assert_eq!(caller.id, "user-42");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let service = AuthService::new(&config()).unwrap();
        assert!(service
            .validate(&token("other-secret", "user-42", far_future()))
            .is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let service = AuthService::new(&config()).unwrap();
        assert!(service.validate(&token("test-secret", "user-42", 1_000)).is_err());
    }

    #[test]
    fn test_empty_secret_refused() {
        let config = AuthConfig {
            jwt_secret: String::new(),
            issuer: None,
        };
        assert!(AuthService::new(&config).is_err());
    }
}
