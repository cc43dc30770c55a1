use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::coalesce::RefreshCoalescer;
use super::domain::{AccessToken, Claims, TokenKind, TokenPair};
use super::errors::AuthError;
use super::{password, token};
use crate::domain::User;
use crate::repository::{StoreError, TenantRepository};

/// Credential manager configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub op_timeout: Duration,
    pub min_password_len: usize,
}

impl AuthConfig {
    pub fn from_settings(s: &configs::AuthSettings) -> Self {
        Self {
            jwt_secret: s.jwt_secret.clone(),
            issuer: s.issuer.clone(),
            access_ttl_secs: s.access_ttl_secs,
            refresh_ttl_secs: s.refresh_ttl_secs,
            op_timeout: Duration::from_millis(s.op_timeout_ms),
            min_password_len: s.min_password_len,
        }
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(AuthError::from),
        Err(_) => Err(AuthError::Unavailable(format!("timed out after {}ms", limit.as_millis()))),
    }
}

/// Issues, verifies, refreshes and revokes session credentials.
///
/// Independent of any web framework. Cloning is cheap and clones share the
/// refresh coalescer.
pub struct CredentialManager<R: TenantRepository + ?Sized> {
    repo: Arc<R>,
    cfg: Arc<AuthConfig>,
    coalescer: Arc<RefreshCoalescer>,
}

impl<R: TenantRepository + ?Sized> Clone for CredentialManager<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone(), cfg: self.cfg.clone(), coalescer: self.coalescer.clone() }
    }
}

impl<R: TenantRepository + ?Sized + 'static> CredentialManager<R> {
    pub fn new(repo: Arc<R>, cfg: AuthConfig) -> Self {
        Self { repo, cfg: Arc::new(cfg), coalescer: Arc::new(RefreshCoalescer::new()) }
    }

    pub fn config(&self) -> &AuthConfig { &self.cfg }

    /// Validate strength and hash a new password.
    pub fn hash_password(&self, plain: &str) -> Result<String, AuthError> {
        password::check_strength(plain, self.cfg.min_password_len)?;
        password::hash_password(plain)
    }

    /// Sign a fresh access/refresh pair for `user` as it is right now.
    pub fn issue(&self, user: &User) -> Result<TokenPair, AuthError> {
        let access = token::claims_for(user, TokenKind::Access, &self.cfg.issuer, self.cfg.access_ttl_secs);
        let refresh = token::claims_for(user, TokenKind::Refresh, &self.cfg.issuer, self.cfg.refresh_ttl_secs);
        Ok(TokenPair {
            access_token: token::encode(&access, &self.cfg.jwt_secret)?,
            refresh_token: token::encode(&refresh, &self.cfg.jwt_secret)?,
            token_type: "Bearer".into(),
            expires_in: self.cfg.access_ttl_secs,
        })
    }

    /// Stateless access token check. Revocation does not reach already issued
    /// access tokens; they live until `exp`.
    pub fn verify(&self, access_token: &str) -> Result<Claims, AuthError> {
        token::decode(access_token, &self.cfg.jwt_secret, &self.cfg.issuer, TokenKind::Access)
    }

    /// Authenticate with email and password and issue a pair.
    #[instrument(skip(self, plain), fields(email = %email))]
    pub async fn login(&self, email: &str, plain: &str) -> Result<(User, TokenPair), AuthError> {
        let limit = self.cfg.op_timeout;
        let user = bounded(limit, self.repo.find_user_by_email(email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let stored = bounded(limit, self.repo.get_password_hash(user.id))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !password::verify_password(plain, &stored)? {
            debug!(user_id = %user.id, "password mismatch");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        bounded(limit, self.repo.touch_last_authenticated(user.id)).await?;
        let pair = self.issue(&user)?;
        info!(user_id = %user.id, role = %user.role, "user_logged_in");
        Ok((user, pair))
    }

    /// Exchange a refresh token for a new access token carrying the user's
    /// current role. Concurrent refreshes of the same token share one result.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, AuthError> {
        let claims = token::decode(refresh_token, &self.cfg.jwt_secret, &self.cfg.issuer, TokenKind::Refresh)?;
        let key = claims.jti.clone();
        let repo = self.repo.clone();
        let cfg = self.cfg.clone();
        self.coalescer
            .run(&key, move || async move { reissue(repo, cfg, claims).await }.boxed())
            .await
    }

    /// Invalidate every outstanding refresh token of `user_id`.
    #[instrument(skip(self))]
    pub async fn revoke(&self, user_id: Uuid) -> Result<u32, AuthError> {
        let version = bounded(self.cfg.op_timeout, self.repo.bump_session_version(user_id)).await?;
        info!(user_id = %user_id, session_version = version, "sessions_revoked");
        Ok(version)
    }
}

async fn reissue<R: TenantRepository + ?Sized>(repo: Arc<R>, cfg: Arc<AuthConfig>, claims: Claims) -> Result<AccessToken, AuthError> {
    let user = bounded(cfg.op_timeout, repo.get_user(claims.sub)).await?.ok_or(AuthError::Revoked)?;
    if user.session_version != claims.ver {
        warn!(user_id = %user.id, "refresh with revoked session");
        return Err(AuthError::Revoked);
    }
    if !user.is_active {
        return Err(AuthError::Inactive);
    }
    let access = token::claims_for(&user, TokenKind::Access, &cfg.issuer, cfg.access_ttl_secs);
    let encoded = token::encode(&access, &cfg.jwt_secret)?;
    debug!(user_id = %user.id, role = %user.role, "access_token_refreshed");
    Ok(AccessToken {
        access_token: encoded,
        token_type: "Bearer".into(),
        expires_in: cfg.access_ttl_secs,
        role: user.role,
    })
}
