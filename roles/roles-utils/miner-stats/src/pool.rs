//! Pool API endpoint resolution.
//!
//! Solo pools expose per-wallet statistics under different paths depending on
//! the pool software they run. The pool identifier is a `host[:port]` string
//! as entered in the dashboard.

pub const DEFAULT_POOL: &str = "public-pool.io:40557";

/// Port appended to community pool identifiers that carry none.
pub const COMMUNITY_DEFAULT_PORT: u16 = 3333;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolFamily {
    /// public-pool.io style: `https://<pool>/api/client/<wallet>`
    Public,
    /// nerdminers.org style: `http://<pool>:<port>/api/stats/<wallet>`
    Community,
    /// Anything else; assumed to follow the public convention
    Generic,
}

impl PoolFamily {
    pub fn classify(pool: &str) -> Self {
        let pool = pool.to_lowercase();
        if pool.contains("public-pool.io") {
            PoolFamily::Public
        } else if pool.contains("nerdminer") {
            PoolFamily::Community
        } else {
            PoolFamily::Generic
        }
    }
}

/// Build the upstream statistics URL for `wallet` on `pool`.
///
/// The wallet is not validated; a malformed one produces a URL the pool will
/// reject at fetch time.
pub fn resolve_pool_url(wallet: &str, pool: Option<&str>) -> String {
    let pool = pool.unwrap_or(DEFAULT_POOL);

    match PoolFamily::classify(pool) {
        PoolFamily::Public | PoolFamily::Generic => {
            format!("https://{}/api/client/{}", pool, wallet)
        }
        PoolFamily::Community => {
            if pool.contains(':') {
                format!("http://{}/api/stats/{}", pool, wallet)
            } else {
                format!(
                    "http://{}:{}/api/stats/{}",
                    pool, COMMUNITY_DEFAULT_PORT, wallet
                )
            }
        }
    }
}
