//! `satbridge.json` loading and validation.

use std::path::{Path, PathBuf};

use eyre::{bail, eyre, WrapErr};
use serde::Deserialize;
use time::macros::format_description;
use time::Date;

use satbridge_core::checkpoint::search_dirs;
use satbridge_core::node::WALLET_NAME;
use satbridge_core::rpc::RpcEndpoint;
use satbridge_core::types::DEFAULT_BIRTHDAY;
use satbridge_core::AccountConfig;

pub const CONFIG_FILE_NAME: &str = "satbridge.json";

// ==============================================================================
// File Format
// ==============================================================================

#[derive(Debug, Deserialize)]
struct RawConfig {
    rpcurl: Option<String>,
    rpcuser: Option<String>,
    rpcpass: Option<String>,
    rpccookiefile: Option<PathBuf>,
    #[serde(default)]
    notls: bool,
    #[serde(default)]
    accounts: Vec<AccountEntry>,
}

/// An account as written in the configuration file or sent to the control
/// API.
#[derive(Debug, Deserialize)]
pub(crate) struct AccountEntry {
    external: Option<String>,
    internal: Option<String>,
    depth: Option<u32>,
    /// `YYYY/MM/DD`.
    birthday: Option<String>,
}

// ==============================================================================
// Validated Configuration
// ==============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub rpc_user: Option<String>,
    pub rpc_pass: Option<String>,
    pub rpc_cookie_file: Option<PathBuf>,
    pub no_tls: bool,
    pub accounts: Vec<AccountConfig>,
}

impl Config {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("read configuration file {}", path.display()))?;
        Self::parse(&raw).wrap_err_with(|| format!("invalid configuration in {}", path.display()))
    }

    pub fn parse(raw: &str) -> eyre::Result<Self> {
        let raw: RawConfig = serde_json::from_str(raw).wrap_err("parse configuration JSON")?;

        let rpc_url = match raw.rpcurl {
            Some(url) if !url.trim().is_empty() => url.trim().to_owned(),
            _ => bail!("missing key: rpcurl"),
        };
        match (&raw.rpcuser, &raw.rpcpass) {
            (Some(_), None) => bail!("rpcuser is set but rpcpass is missing"),
            (None, Some(_)) => bail!("rpcpass is set but rpcuser is missing"),
            _ => {}
        }

        let accounts = raw
            .accounts
            .into_iter()
            .enumerate()
            .map(|(index, account)| account.validate(index))
            .collect::<eyre::Result<Vec<_>>>()?;

        Ok(Self {
            rpc_url,
            rpc_user: raw.rpcuser,
            rpc_pass: raw.rpcpass,
            rpc_cookie_file: raw.rpccookiefile,
            no_tls: raw.notls,
            accounts,
        })
    }

    pub fn endpoint(&self, requests_per_second: Option<u32>, batch_chunk_size: usize) -> RpcEndpoint {
        RpcEndpoint {
            url: self.rpc_url.clone(),
            no_tls: self.no_tls,
            user: self.rpc_user.clone(),
            pass: self.rpc_pass.clone(),
            cookie_file: self.rpc_cookie_file.clone(),
            wallet: WALLET_NAME.to_owned(),
            requests_per_second,
            batch_chunk_size,
        }
    }
}

impl AccountEntry {
    pub(crate) fn validate(self, index: usize) -> eyre::Result<AccountConfig> {
        let external = self
            .external
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| eyre!("account #{index}: missing key: external"))?;
        let internal = self
            .internal
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| eyre!("account #{index}: missing key: internal"))?;

        let birthday = match self.birthday.as_deref() {
            None => None,
            Some(date) => {
                let birthday = parse_birthday(date)
                    .wrap_err_with(|| format!("account #{index}: invalid birthday `{date}`"))?;
                if birthday < DEFAULT_BIRTHDAY {
                    tracing::warn!(
                        account = index,
                        birthday = date,
                        "account birthday is older than 2013/09/10"
                    );
                }
                Some(birthday)
            }
        };

        Ok(AccountConfig {
            external,
            internal,
            depth: self.depth,
            birthday,
        })
    }
}

/// Midnight UTC of a `YYYY/MM/DD` date, as UNIX seconds.
pub fn parse_birthday(date: &str) -> eyre::Result<u32> {
    let format = format_description!("[year]/[month]/[day]");
    let date = Date::parse(date, format)?;
    let timestamp = date.midnight().assume_utc().unix_timestamp();
    u32::try_from(timestamp).map_err(|_| eyre!("date is outside the supported range"))
}

// ==============================================================================
// Lookup
// ==============================================================================

/// The explicit path if given, otherwise the first `satbridge.json` found
/// in the search directories.
pub fn resolve_path(explicit: Option<&Path>) -> eyre::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => find_in(&search_dirs()),
    }
}

fn find_in(dirs: &[PathBuf]) -> eyre::Result<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            let searched = dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            eyre!("{CONFIG_FILE_NAME} not found (searched: {searched}); pass --config")
        })
}
