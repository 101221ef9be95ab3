//! Magic-link login URLs. The link carries an AEAD token of kind
//! [`TokenKind::MagicLink`] whose subject is the normalized email.

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::TokenError;
use crate::token::{TokenKind, TokenService};

/// Path the verification endpoint is mounted at, relative to the app URL.
pub const MAGIC_LINK_PATH: [&str; 2] = ["auth", "magic"];

/// Query parameter carrying the token.
pub const TOKEN_PARAM: &str = "token";

#[derive(Debug, Clone)]
pub struct MagicLink {
    pub url: Url,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Lowercase and trim an email, rejecting anything that is obviously not one.
pub fn normalize_email(raw: &str) -> Result<String, TokenError> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
        }
        None => false,
    };
    if !valid || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(TokenError::InvalidEmail);
    }
    Ok(email)
}

/// `{app_url}/auth/magic?token={token}`, keeping any base path of `app_url`.
pub fn magic_link_url(app_url: &Url, token: &str) -> Url {
    let mut url = app_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(MAGIC_LINK_PATH);
    }
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair(TOKEN_PARAM, token);
    url
}

/// Issue a magic-link token for `email` and build the link around it.
pub fn issue_magic_link(
    tokens: &TokenService,
    app_url: &Url,
    email: &str,
) -> Result<MagicLink, TokenError> {
    let email = normalize_email(email)?;
    let issued = tokens.issue(TokenKind::MagicLink, &email, None)?;
    Ok(MagicLink {
        url: magic_link_url(app_url, &issued.token),
        email,
        expires_at: issued.payload.expires_at,
    })
}
