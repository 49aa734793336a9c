use std::path::Path;

use reqwest::Url;

use crate::error::CoreError;

pub(super) fn resolve_auth(
    user: Option<&str>,
    pass: Option<&str>,
    cookie_file: Option<&Path>,
) -> Result<Option<(String, String)>, CoreError> {
    match (user, pass) {
        (Some(u), Some(p)) => return Ok(Some((u.to_owned(), p.to_owned()))),
        (Some(_), None) | (None, Some(_)) => {
            return Err(CoreError::Config(
                "both rpcuser and rpcpass must be set together".to_owned(),
            ));
        }
        (None, None) => {}
    }

    let Some(cookie_file) = cookie_file else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(cookie_file).map_err(|e| {
        CoreError::Config(format!(
            "failed to read rpc cookie file {}: {e}",
            cookie_file.display()
        ))
    })?;
    let line = content
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| {
            CoreError::Config(format!("rpc cookie file {} is empty", cookie_file.display()))
        })?;

    match line.split_once(':') {
        Some((u, p)) if !u.is_empty() && !p.is_empty() => Ok(Some((u.to_owned(), p.to_owned()))),
        _ => Err(CoreError::Config(format!(
            "rpc cookie file {} must contain non-empty `username:password`",
            cookie_file.display()
        ))),
    }
}

/// Normalize the configured node address into a base URL.
///
/// Bare `host:port` values get `https://`, or `http://` when `no_tls` is set.
/// Explicit schemes are kept. The result never ends in `/`.
pub(super) fn parse_connection(connection: &str, no_tls: bool) -> Result<String, CoreError> {
    let connection = connection.trim();
    let with_scheme = if connection.contains("://") {
        connection.to_owned()
    } else if no_tls {
        format!("http://{connection}")
    } else {
        format!("https://{connection}")
    };

    let parsed = Url::parse(&with_scheme).map_err(|e| {
        CoreError::Config(format!("invalid rpcurl `{connection}`: expected host:port or URL ({e})"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(with_scheme.trim_end_matches('/').to_owned()),
        other => Err(CoreError::Config(format!(
            "unsupported rpcurl scheme `{other}`; expected http or https"
        ))),
    }
}

/// Endpoint for calls scoped to a loaded wallet.
pub(super) fn wallet_url(base: &str, wallet: &str) -> String {
    format!("{base}/wallet/{wallet}")
}
