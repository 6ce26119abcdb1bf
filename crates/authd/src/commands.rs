//! Operator commands
//!
//! Each command is a thin wrapper over one registry operation so that the CLI
//! and the tests drive the same code.

use crate::file_store::JsonFileStore;
use anyhow::{bail, Context, Result};
use nomlog_core::password::hash_password;
use nomlog_core::{IssuedToken, Registry, User};

/// Hash the password and create the user in the store, then cache it
pub async fn add_user(
    registry: &Registry,
    store: &JsonFileStore,
    name: &str,
    password: &str,
    session_lifetime_secs: i64,
) -> Result<User> {
    let plain = password.to_owned();
    let hash = tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .context("Password hashing task failed")??;

    let user = store.create_user(name, hash, session_lifetime_secs).await?;
    registry.put_user(user.clone()).await;
    tracing::info!("Created user {} ({})", user.id, user.name);
    Ok(user)
}

/// Log in and return the issued token
pub async fn login(registry: &Registry, name: &str, password: &str, user_agent: Option<&str>) -> Result<IssuedToken> {
    match registry.login_with_user_agent(name, password, user_agent).await {
        Ok(issued) => Ok(issued),
        Err(e) if e.is_auth_failure() => bail!("Login failed: {}", e),
        Err(e) => Err(e).context("Login could not be completed"),
    }
}

/// Resolve a token to its user, failing if not authenticated
pub async fn check(registry: &Registry, token: &str) -> Result<User> {
    match registry.check_token(token).await.context("Token check could not be completed")? {
        Some(user) => Ok(user),
        None => bail!("Not authenticated"),
    }
}

/// Revoke a token
pub async fn logout(registry: &Registry, token: &str) -> Result<()> {
    registry.expire_token(token).await.context("Logout could not be completed")
}
