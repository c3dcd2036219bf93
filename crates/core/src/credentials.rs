//! Credential Distributor
//!
//! Decides which credentials get typed into which window:
//! - A non-empty account store (`username:password` per line) gives one
//!   credential per account, assigned round-robin by window index
//! - Otherwise the manual username/password is broadcast to every window and
//!   the client count comes from the clamped client amount

use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Fewest clients a single-credential run launches
pub const MIN_CLIENTS: usize = 1;
/// Most clients a single-credential run launches
pub const MAX_CLIENTS: usize = 100;
/// Client count when the configured amount is absent or unparseable
pub const DEFAULT_CLIENTS: usize = 7;

/// A username/password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Keystroke text for the login form: username, TAB to the password field, password
    pub fn login_text(&self) -> String {
        format!("{}\t{}", self.username, self.password)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Credentials for one run and how to apply them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPlan {
    pub credentials: Vec<Credential>,
    /// One account per window (round-robin) instead of one broadcast login
    pub multi_credential: bool,
    /// Number of client processes to spawn
    pub client_count: usize,
}

impl CredentialPlan {
    /// Credential for the window at `index` in discovery order
    pub fn credential_for(&self, index: usize) -> Option<&Credential> {
        if self.credentials.is_empty() {
            return None;
        }
        if self.multi_credential {
            self.credentials.get(index % self.credentials.len())
        } else {
            self.credentials.first()
        }
    }
}

/// Parse account store text; blank lines and `#` comments are skipped
pub fn parse_account_store(contents: &str) -> Vec<Credential> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (user, pass) = line.split_once(':')?;
            let user = user.trim();
            if user.is_empty() {
                return None;
            }
            Some(Credential::new(user, pass))
        })
        .collect()
}

/// Load the account store; a missing or unreadable file yields no accounts
pub fn load_account_store(path: &Path) -> Vec<Credential> {
    if !path.exists() {
        return Vec::new();
    }

    match fs::read_to_string(path) {
        Ok(contents) => parse_account_store(&contents),
        Err(e) => {
            warn!("Failed to read account store {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Clamp the configured client amount to 1..=100, defaulting to 7
pub fn parse_client_amount(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(|n| n.clamp(MIN_CLIENTS as i64, MAX_CLIENTS as i64) as usize)
        .unwrap_or(DEFAULT_CLIENTS)
}

/// Build the credential plan from the account store or the manual login
pub fn plan_credentials(
    accounts: Vec<Credential>,
    manual: Credential,
    client_amount: Option<&str>,
) -> CredentialPlan {
    if !accounts.is_empty() {
        info!("Account store loaded: {} accounts", accounts.len());
        return CredentialPlan {
            client_count: accounts.len(),
            credentials: accounts,
            multi_credential: true,
        };
    }

    let client_count = parse_client_amount(client_amount);
    info!(
        "Single login mode: user={} clients={}",
        manual.username, client_count
    );

    CredentialPlan {
        credentials: vec![manual],
        multi_credential: false,
        client_count,
    }
}
