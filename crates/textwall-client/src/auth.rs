//! Authentication against the account service
//!
//! Login is one HTTP POST of form-encoded credentials; the session token
//! comes back in a `Set-Cookie` header. The token can be persisted to a
//! cache file and reused after a lightweight validation GET.

use std::path::{Path, PathBuf};

use regex::Regex;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::redirect::Policy;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Login form endpoint, relative to the service base URL
const LOGIN_PATH: &str = "/accounts/login/";

/// Pattern matching the session token in a `Set-Cookie` value
const TOKEN_PATTERN: &str = "token=([^;]+)";

/// Log in with a username and password, returning the session token.
///
/// Redirects are not followed: a successful login responds with a redirect
/// whose headers carry the cookie we need.
pub async fn login(base_url: &str, username: &str, password: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()?;
    let url = format!("{}{}", base_url.trim_end_matches('/'), LOGIN_PATH);
    let resp = client
        .post(url)
        .form(&[("username", username), ("password", password)])
        .send()
        .await?;

    let cookies: Vec<String> = resp
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    extract_token(cookies.iter().map(String::as_str))
        .ok_or_else(|| Error::auth("login response carried no session token cookie"))
}

/// Check whether a token is still accepted by the service.
///
/// Any non-error HTTP status counts as valid.
pub async fn validate_token(base_url: &str, token: &str) -> Result<bool> {
    let resp = reqwest::Client::new()
        .get(base_url)
        .header(COOKIE, format!("token={token}"))
        .send()
        .await?;
    let status = resp.status();
    Ok(!status.is_client_error() && !status.is_server_error())
}

/// Log in, reusing a cached token when one validates.
///
/// `cache_path` defaults to `token` under the platform cache directory.
pub async fn cached_login(
    base_url: &str,
    username: &str,
    password: &str,
    cache_path: Option<&Path>,
) -> Result<String> {
    let path = match cache_path {
        Some(p) => p.to_path_buf(),
        None => default_cache_path()?,
    };

    if let Ok(cached) = tokio::fs::read_to_string(&path).await {
        let cached = cached.trim().to_string();
        if !cached.is_empty() && validate_token(base_url, &cached).await.unwrap_or(false) {
            debug!("reusing cached session token");
            return Ok(cached);
        }
    }

    let token = login(base_url, username, password).await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &token).await?;
    info!(path = %path.display(), "cached session token");
    Ok(token)
}

/// Pull the session token out of `Set-Cookie` header values
fn extract_token<'a>(cookies: impl Iterator<Item = &'a str>) -> Option<String> {
    let pattern = Regex::new(TOKEN_PATTERN).ok()?;
    for cookie in cookies {
        if let Some(caps) = pattern.captures(cookie) {
            return Some(caps[1].to_string());
        }
    }
    None
}

fn default_cache_path() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|d| d.join("textwall").join("token"))
        .ok_or_else(|| Error::Io("no cache directory available".to_string()))
}
