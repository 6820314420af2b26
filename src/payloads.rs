//! Payload and user-agent pools.
//!
//! Pools are loaded once at startup, either from a directory of text files
//! (one entry per line, `#` comments allowed) or from the built-in set, and
//! then shared read-only between sessions.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::UserAgentType;

/// Scanner user agents used when no scanner pool is loaded
pub const FALLBACK_SCANNER_AGENTS: [&str; 3] =
    ["sqlmap/1.0", "Nikto/2.1.6", "nmap-scripting-engine"];

/// Browser user agent used when no legitimate pool is loaded
pub const FALLBACK_LEGITIMATE_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Kind of injected payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackCategory {
    Sql,
    Xss,
    Traversal,
    Command,
}

impl AttackCategory {
    pub const ALL: [AttackCategory; 4] = [Self::Sql, Self::Xss, Self::Traversal, Self::Command];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Xss => "xss",
            Self::Traversal => "traversal",
            Self::Command => "command",
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::Sql => "sql-injection.txt",
            Self::Xss => "xss.txt",
            Self::Traversal => "path-traversal.txt",
            Self::Command => "command-injection.txt",
        }
    }
}

impl fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn agent_file_name(kind: UserAgentType) -> &'static str {
    match kind {
        UserAgentType::Scanner => "scanner-user-agents.txt",
        UserAgentType::Legitimate => "legitimate-user-agents.txt",
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to read payload file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no payloads loaded from {0}")]
    Empty(PathBuf),
}

/// In-memory payload and user-agent pools
#[derive(Debug, Clone, Default)]
pub struct PayloadPools {
    sql: Vec<String>,
    xss: Vec<String>,
    traversal: Vec<String>,
    command: Vec<String>,
    scanner_agents: Vec<String>,
    legitimate_agents: Vec<String>,
}

impl PayloadPools {
    /// Load every known payload file found in `dir`.
    ///
    /// Missing files leave their pool empty. Fails only when nothing at all
    /// could be loaded.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, PayloadError> {
        let dir = dir.as_ref();
        let mut pools = Self::default();

        for category in AttackCategory::ALL {
            if let Some(entries) = read_pool_file(&dir.join(category.file_name()))? {
                pools.set_payloads(category, entries);
            }
        }
        for kind in [UserAgentType::Scanner, UserAgentType::Legitimate] {
            if let Some(entries) = read_pool_file(&dir.join(agent_file_name(kind)))? {
                pools.set_user_agents(kind, entries);
            }
        }

        if pools.total() == 0 {
            return Err(PayloadError::Empty(dir.to_path_buf()));
        }

        info!(
            event = "payloads_loaded",
            dir = %dir.display(),
            sql = pools.sql.len(),
            xss = pools.xss.len(),
            traversal = pools.traversal.len(),
            command = pools.command.len(),
            scanner_agents = pools.scanner_agents.len(),
            legitimate_agents = pools.legitimate_agents.len(),
            "Loaded payload pools"
        );

        Ok(pools)
    }

    /// A small built-in set covering every category
    pub fn builtin() -> Self {
        fn own(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            sql: own(&[
                "' OR '1'='1",
                "' OR 1=1--",
                "1; DROP TABLE users--",
                "' UNION SELECT NULL,NULL--",
                "admin'--",
            ]),
            xss: own(&[
                "<script>alert(1)</script>",
                "<img src=x onerror=alert(1)>",
                "<svg/onload=alert(1)>",
                "javascript:alert(document.cookie)",
            ]),
            traversal: own(&[
                "../../../../etc/passwd",
                "..%2f..%2f..%2fetc%2fpasswd",
                "....//....//etc/passwd",
                "..\\..\\..\\windows\\win.ini",
            ]),
            command: own(&[
                "; cat /etc/passwd",
                "| id",
                "`whoami`",
                "$(uname -a)",
            ]),
            scanner_agents: own(&FALLBACK_SCANNER_AGENTS[..]),
            legitimate_agents: own(&[
                FALLBACK_LEGITIMATE_AGENT,
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
                "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
            ]),
        }
    }

    /// Parse pool text: one entry per line, blanks and `#` comments skipped
    pub fn parse_entries(text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    pub fn set_payloads(&mut self, category: AttackCategory, entries: Vec<String>) {
        *self.pool_mut(category) = entries;
    }

    pub fn set_user_agents(&mut self, kind: UserAgentType, entries: Vec<String>) {
        match kind {
            UserAgentType::Scanner => self.scanner_agents = entries,
            UserAgentType::Legitimate => self.legitimate_agents = entries,
        }
    }

    pub fn payloads(&self, category: AttackCategory) -> &[String] {
        match category {
            AttackCategory::Sql => &self.sql,
            AttackCategory::Xss => &self.xss,
            AttackCategory::Traversal => &self.traversal,
            AttackCategory::Command => &self.command,
        }
    }

    fn pool_mut(&mut self, category: AttackCategory) -> &mut Vec<String> {
        match category {
            AttackCategory::Sql => &mut self.sql,
            AttackCategory::Xss => &mut self.xss,
            AttackCategory::Traversal => &mut self.traversal,
            AttackCategory::Command => &mut self.command,
        }
    }

    /// A uniformly random payload, `None` if the category is empty
    pub fn random_payload(&self, category: AttackCategory) -> Option<&str> {
        self.payloads(category)
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    /// A uniformly random user agent of the given kind, falling back to
    /// built-in literals when the pool is empty
    pub fn random_user_agent(&self, kind: UserAgentType) -> String {
        let mut rng = rand::thread_rng();
        match kind {
            UserAgentType::Scanner => self
                .scanner_agents
                .choose(&mut rng)
                .cloned()
                .or_else(|| FALLBACK_SCANNER_AGENTS.choose(&mut rng).map(|s| s.to_string()))
                .unwrap_or_default(),
            UserAgentType::Legitimate => self
                .legitimate_agents
                .choose(&mut rng)
                .cloned()
                .unwrap_or_else(|| FALLBACK_LEGITIMATE_AGENT.to_string()),
        }
    }

    /// Number of entries across all pools
    pub fn total(&self) -> usize {
        self.sql.len()
            + self.xss.len()
            + self.traversal.len()
            + self.command.len()
            + self.scanner_agents.len()
            + self.legitimate_agents.len()
    }
}

fn read_pool_file(path: &Path) -> Result<Option<Vec<String>>, PayloadError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(PayloadPools::parse_entries(&text))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Payload file not found, skipping");
            Ok(None)
        }
        Err(source) => Err(PayloadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blanks_and_comments() {
        let text = "# SQL payloads\n\n' OR 1=1--\n   \n  admin'--  \n#trailing\n";
        assert_eq!(
            PayloadPools::parse_entries(text),
            vec!["' OR 1=1--".to_string(), "admin'--".to_string()]
        );
    }

    #[test]
    fn load_dir_reads_known_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("xss.txt"), "<b>\n# c\n<i>\n").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "ignored\n").unwrap();

        let pools = PayloadPools::load_dir(dir.path()).unwrap();
        assert_eq!(pools.payloads(AttackCategory::Xss).len(), 2);
        assert!(pools.payloads(AttackCategory::Sql).is_empty());
        assert_eq!(pools.total(), 2);
    }

    #[test]
    fn load_dir_fails_when_nothing_loaded() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PayloadPools::load_dir(dir.path()),
            Err(PayloadError::Empty(_))
        ));
    }

    #[test]
    fn empty_pools_fall_back_to_literals() {
        let pools = PayloadPools::default();
        assert_eq!(pools.random_payload(AttackCategory::Command), None);
        let scanner = pools.random_user_agent(UserAgentType::Scanner);
        assert!(FALLBACK_SCANNER_AGENTS.contains(&scanner.as_str()));
        assert_eq!(
            pools.random_user_agent(UserAgentType::Legitimate),
            FALLBACK_LEGITIMATE_AGENT
        );
    }

    #[test]
    fn builtin_covers_every_category() {
        let pools = PayloadPools::builtin();
        for category in AttackCategory::ALL {
            assert!(pools.random_payload(category).is_some(), "{category} is empty");
        }
    }
}
