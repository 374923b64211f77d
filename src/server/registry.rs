//! Account registry — the set of known accounts and their persistence.
//!
//! Accounts live in memory as a vector with the built-in Admin always at
//! index 0. Every mutation is written through to the backing directory: all
//! existing files are removed and one JSON file per non-Admin account is
//! rewritten, filename = username.

use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::wire::Role;

/// The built-in administrator, synthesized at load, never persisted.
pub const ADMIN_USERNAME: &str = "Admin";
const ADMIN_PASSWORD: &str = "gochat";

/// Username format: 5–20 chars, starts alpha, ends alphanumeric, interior
/// may include `_` and `-`.
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z][A-Za-z0-9_-]{3,18}[A-Za-z0-9]$").unwrap());

static HAS_UPPERCASE: LazyLock<Regex> = LazyLock::new(|| Regex::new("[A-Z]").unwrap());
static HAS_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new("[0-9]").unwrap());
static HAS_SPECIAL: LazyLock<Regex> = LazyLock::new(|| Regex::new("[!@#$%?]").unwrap());

/// One account record; the on-disk JSON uses the same field names as the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Role", default)]
    pub role: Role,
    #[serde(rename = "Banned", default)]
    pub banned: bool,
}

/// Why a username was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("Username already taken")]
    Taken,
    #[error("Username has invalid character or formatting")]
    BadFormat,
}

/// Why a password was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Password has invalid character or formatting")]
pub struct PasswordError;

/// In-memory account table with write-through persistence.
#[derive(Debug)]
pub struct Registry {
    dir: PathBuf,
    accounts: Vec<Account>,
}

impl Registry {
    /// Load every account file from `dir` (creating it if absent) and
    /// synthesize the Admin at index 0.
    pub fn load(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut accounts = vec![Account {
            username: ADMIN_USERNAME.into(),
            password: ADMIN_PASSWORD.into(),
            role: Role::Admin,
            banned: false,
        }];

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let contents = fs::read(&path)?;
            match serde_json::from_slice::<Account>(&contents) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(path = %path.display(), "skipping unreadable account file: {e}"),
            }
        }

        info!(count = accounts.len() - 1, "loaded accounts");
        Ok(Self { dir, accounts })
    }

    /// Rewrite the backing directory: remove all files, write one per
    /// non-Admin account.
    pub fn save(&self) -> std::io::Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(path)?;
            }
        }
        for account in self.accounts.iter().filter(|a| a.username != ADMIN_USERNAME) {
            let json = serde_json::to_vec(account)?;
            fs::write(self.dir.join(&account.username), json)?;
        }
        Ok(())
    }

    /// Index of the account with this username.
    pub fn lookup(&self, username: &str) -> Option<usize> {
        self.accounts.iter().position(|a| a.username == username)
    }

    pub fn get(&self, index: usize) -> &Account {
        &self.accounts[index]
    }

    /// Check a candidate username against the format rule and the set of
    /// names already spoken for. `taken_elsewhere` covers names held by live
    /// clients that are not (yet) in the registry.
    pub fn validate_username(
        &self,
        username: &str,
        taken_elsewhere: bool,
    ) -> Result<(), UsernameError> {
        if self.lookup(username).is_some() || taken_elsewhere {
            return Err(UsernameError::Taken);
        }
        if !USERNAME_RE.is_match(username) {
            return Err(UsernameError::BadFormat);
        }
        Ok(())
    }

    /// Check a candidate password: ≥1 uppercase, ≥1 digit, ≥1 of `!@#$%?`,
    /// length ≥7.
    pub fn validate_password(password: &str) -> Result<(), PasswordError> {
        let ok = HAS_UPPERCASE.is_match(password)
            && HAS_DIGIT.is_match(password)
            && HAS_SPECIAL.is_match(password)
            && password.len() >= 7;
        if ok {
            Ok(())
        } else {
            Err(PasswordError)
        }
    }

    /// Add a validated account as Public and persist.
    ///
    /// Callers validate both fields first; registration is a two-step
    /// transaction and nothing lands here until both steps were accepted.
    pub fn register(&mut self, username: &str, password: &str) -> std::io::Result<()> {
        self.accounts.push(Account {
            username: username.into(),
            password: password.into(),
            role: Role::Public,
            banned: false,
        });
        info!(username, "registered account");
        self.save()
    }

    /// Whether this username/password pair matches a registered account.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.lookup(username)
            .is_some_and(|i| self.accounts[i].password == password)
    }

    /// Set an account's role and persist. Authorization is the caller's
    /// responsibility.
    pub fn set_role(&mut self, username: &str, role: Role) -> std::io::Result<()> {
        if let Some(i) = self.lookup(username) {
            self.accounts[i].role = role;
            self.save()?;
        }
        Ok(())
    }

    /// Set an account's banned flag and persist. Authorization is the
    /// caller's responsibility.
    pub fn set_banned(&mut self, username: &str, banned: bool) -> std::io::Result<()> {
        if let Some(i) = self.lookup(username) {
            self.accounts[i].banned = banned;
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fresh() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path()).unwrap();
        (dir, registry)
    }

    // ── Admin bootstrap ──────────────────────────────────────────

    #[test]
    fn admin_present_at_boot() {
        let (_dir, registry) = fresh();
        assert_eq!(registry.lookup("Admin"), Some(0));
        assert_eq!(registry.get(0).role, Role::Admin);
        assert!(registry.verify("Admin", "gochat"));
    }

    #[test]
    fn admin_never_persisted() {
        let (dir, registry) = fresh();
        registry.save().unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(files.is_empty());
    }

    // ── Username validation ──────────────────────────────────────

    #[test]
    fn username_length_boundaries() {
        let (_dir, registry) = fresh();
        // 4 and 21 chars rejected; 5 and 20 accepted.
        assert_eq!(
            registry.validate_username("abcd", false),
            Err(UsernameError::BadFormat)
        );
        assert_eq!(
            registry.validate_username(&format!("a{}", "b".repeat(20)), false),
            Err(UsernameError::BadFormat)
        );
        assert_eq!(registry.validate_username("abcde", false), Ok(()));
        assert_eq!(
            registry.validate_username(&format!("a{}", "b".repeat(19)), false),
            Ok(())
        );
    }

    #[test]
    fn username_must_start_alpha_end_alphanumeric() {
        let (_dir, registry) = fresh();
        assert_eq!(
            registry.validate_username("1alice", false),
            Err(UsernameError::BadFormat)
        );
        assert_eq!(
            registry.validate_username("alice_", false),
            Err(UsernameError::BadFormat)
        );
        assert_eq!(registry.validate_username("a_li-c3", false), Ok(()));
    }

    #[test]
    fn username_taken_by_registry_or_roster() {
        let (_dir, mut registry) = fresh();
        registry.register("alice", "Secret1!").unwrap();
        assert_eq!(
            registry.validate_username("alice", false),
            Err(UsernameError::Taken)
        );
        // A live client holds the name even before it reaches the registry.
        assert_eq!(
            registry.validate_username("brand-new", true),
            Err(UsernameError::Taken)
        );
    }

    // ── Password validation ──────────────────────────────────────

    #[test]
    fn password_rules() {
        assert!(Registry::validate_password("Secret1!").is_ok());
        // Missing uppercase.
        assert!(Registry::validate_password("secret1!").is_err());
        // Missing digit.
        assert!(Registry::validate_password("Secrets!").is_err());
        // Missing special character.
        assert!(Registry::validate_password("Secret11").is_err());
        // Too short (6 chars).
        assert!(Registry::validate_password("Sec1!a").is_err());
        // Exactly 7 is enough.
        assert!(Registry::validate_password("Secre1!").is_ok());
    }

    // ── Mutations and verification ───────────────────────────────

    #[test]
    fn register_then_verify() {
        let (_dir, mut registry) = fresh();
        registry.register("alice", "Secret1!").unwrap();
        assert!(registry.verify("alice", "Secret1!"));
        assert!(!registry.verify("alice", "wrong"));
        assert!(!registry.verify("nobody", "Secret1!"));
        assert_eq!(registry.get(registry.lookup("alice").unwrap()).role, Role::Public);
    }

    #[test]
    fn promote_then_demote_restores_prior_state() {
        let (_dir, mut registry) = fresh();
        registry.register("carol", "Secret1!").unwrap();
        registry.set_role("carol", Role::Moderator).unwrap();
        assert_eq!(
            registry.get(registry.lookup("carol").unwrap()).role,
            Role::Moderator
        );
        registry.set_role("carol", Role::Public).unwrap();
        assert_eq!(
            registry.get(registry.lookup("carol").unwrap()).role,
            Role::Public
        );
    }

    #[test]
    fn ban_flag_round_trip() {
        let (_dir, mut registry) = fresh();
        registry.register("carol", "Secret1!").unwrap();
        registry.set_banned("carol", true).unwrap();
        assert!(registry.get(registry.lookup("carol").unwrap()).banned);
    }

    // ── Persistence ──────────────────────────────────────────────

    #[test]
    fn accounts_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut registry = Registry::load(dir.path()).unwrap();
            registry.register("alice", "Secret1!").unwrap();
            registry.register("carol", "Hunter2?").unwrap();
            registry.set_role("carol", Role::Moderator).unwrap();
            registry.set_banned("alice", true).unwrap();
        }

        let reloaded = Registry::load(dir.path()).unwrap();
        assert!(reloaded.verify("alice", "Secret1!"));
        assert!(reloaded.get(reloaded.lookup("alice").unwrap()).banned);
        assert_eq!(
            reloaded.get(reloaded.lookup("carol").unwrap()).role,
            Role::Moderator
        );
    }

    #[test]
    fn account_file_shape_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        registry.register("carol", "Secret1!").unwrap();
        registry.set_role("carol", Role::Moderator).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("carol")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["Username"], "carol");
        assert_eq!(value["Password"], "Secret1!");
        assert_eq!(value["Role"], 1);
        assert_eq!(value["Banned"], false);
    }
}
