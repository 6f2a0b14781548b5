use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;

const ACCESS: &str = "access";
const REFRESH: &str = "refresh";

/// RS256 signer and verifier for session tokens.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Account id
    pub sub: String,
    pub username: String,
    pub token_type: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Account id
    pub sub: String,
    pub token_type: String,
    pub exp: i64,
    pub iat: i64,
    /// Blacklist key
    pub jti: String,
}

impl RefreshTokenClaims {
    /// Seconds until expiry, never negative.
    pub fn remaining_lifetime_seconds(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

/// Session token pair handed to clients after login, refresh or sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds
    #[schema(example = 900)]
    pub expires_in: i64,
}

impl JwtService {
    /// Loads the PEM key pair from the configured paths.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;

        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;

        Self::from_pem(
            private_key_pem.as_bytes(),
            public_key_pem.as_bytes(),
            config.access_token_expiry_minutes,
            config.refresh_token_expiry_days,
        )
    }

    pub fn from_pem(
        private_key_pem: &[u8],
        public_key_pem: &[u8],
        access_token_expiry_minutes: i64,
        refresh_token_expiry_days: i64,
    ) -> Result<Self, anyhow::Error> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        tracing::info!("JWT service initialized with RS256 keys");

        Ok(Self {
            encoding_key,
            decoding_key,
            access_token_expiry_minutes,
            refresh_token_expiry_days,
        })
    }

    pub fn generate_access_token(
        &self,
        account_id: Uuid,
        username: &str,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: account_id.to_string(),
            username: username.to_string(),
            token_type: ACCESS.to_string(),
            exp: (now + Duration::minutes(self.access_token_expiry_minutes)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    pub fn generate_refresh_token(&self, account_id: Uuid) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = RefreshTokenClaims {
            sub: account_id.to_string(),
            token_type: REFRESH.to_string(),
            exp: (now + Duration::days(self.refresh_token_expiry_days)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))
    }

    pub fn generate_token_pair(
        &self,
        account_id: Uuid,
        username: &str,
    ) -> Result<TokenPair, anyhow::Error> {
        Ok(TokenPair {
            access: self.generate_access_token(account_id, username)?,
            refresh: self.generate_refresh_token(account_id)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation())
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?
            .claims;

        if claims.token_type != ACCESS {
            return Err(anyhow::anyhow!("Token is not an access token"));
        }
        Ok(claims)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, anyhow::Error> {
        let claims = decode::<RefreshTokenClaims>(token, &self.decoding_key, &validation())
            .map_err(|e| anyhow::anyhow!("Invalid refresh token: {}", e))?
            .claims;

        if claims.token_type != REFRESH {
            return Err(anyhow::anyhow!("Token is not a refresh token"));
        }
        Ok(claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/jwt_private.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/jwt_public.pem");

    fn service() -> JwtService {
        JwtService::from_pem(PRIVATE_KEY.as_bytes(), PUBLIC_KEY.as_bytes(), 15, 7).unwrap()
    }

    #[test]
    fn loads_keys_from_files() -> Result<(), anyhow::Error> {
        let mut private_file = NamedTempFile::new()?;
        private_file.write_all(PRIVATE_KEY.as_bytes())?;
        let mut public_file = NamedTempFile::new()?;
        public_file.write_all(PUBLIC_KEY.as_bytes())?;

        let config = JwtConfig {
            private_key_path: private_file.path().to_string_lossy().into_owned(),
            public_key_path: public_file.path().to_string_lossy().into_owned(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        };

        let jwt = JwtService::new(&config)?;
        assert_eq!(jwt.access_token_expiry_seconds(), 900);
        Ok(())
    }

    #[test]
    fn missing_key_file_is_reported() {
        let config = JwtConfig {
            private_key_path: "/nonexistent/private.pem".to_string(),
            public_key_path: "/nonexistent/public.pem".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        };
        let err = JwtService::new(&config).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/private.pem"));
    }

    #[test]
    fn access_token_round_trip_carries_identity() {
        let jwt = service();
        let id = Uuid::new_v4();
        let token = jwt.generate_access_token(id, "alice").unwrap();

        let claims = jwt.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.token_type, "access");
    }

    #[test]
    fn token_types_are_not_interchangeable() {
        let jwt = service();
        let pair = jwt.generate_token_pair(Uuid::new_v4(), "alice").unwrap();

        assert!(jwt.validate_refresh_token(&pair.access).is_err());
        assert!(jwt.validate_access_token(&pair.refresh).is_err());
        assert!(jwt.validate_refresh_token(&pair.refresh).is_ok());
    }

    #[test]
    fn refresh_tokens_have_unique_ids() {
        let jwt = service();
        let id = Uuid::new_v4();
        let a = jwt.validate_refresh_token(&jwt.generate_refresh_token(id).unwrap()).unwrap();
        let b = jwt.validate_refresh_token(&jwt.generate_refresh_token(id).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
        assert!(a.remaining_lifetime_seconds() > 6 * 24 * 3600);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let jwt = JwtService::from_pem(PRIVATE_KEY.as_bytes(), PUBLIC_KEY.as_bytes(), -1, -1)
            .unwrap();
        let pair = jwt.generate_token_pair(Uuid::new_v4(), "alice").unwrap();
        assert!(jwt.validate_access_token(&pair.access).is_err());
        assert!(jwt.validate_refresh_token(&pair.refresh).is_err());
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let jwt = service();
        let token = jwt.generate_access_token(Uuid::new_v4(), "alice").unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(jwt.validate_access_token(&tampered).is_err());
        assert!(jwt.validate_access_token("not-a-jwt").is_err());
    }
}
