use nix::errno::Errno;
use thiserror::Error;

use crate::core::rule::Family;

/// Core error types for nfsnap
#[derive(Debug, Error)]
pub enum Error {
    /// The engine refused to open the table
    #[error("Table '{table}' ({family}) is unavailable: {source}")]
    EngineUnavailable {
        table: String,
        family: Family,
        #[source]
        source: EngineError,
    },

    /// Policy counters were requested for a user-defined chain
    #[error("Chain '{chain}' in table '{table}' is not a built-in chain and has no policy counters")]
    NotBuiltinChain { table: String, chain: String },

    /// A read, zero or commit request was reported unsuccessful by the engine
    #[error("{operation} failed in table '{table}'{}: {source}", chain_suffix(.chain.as_deref()))]
    Engine {
        operation: Operation,
        table: String,
        chain: Option<String>,
        #[source]
        source: EngineError,
    },

    /// A table or chain name the engine cannot represent
    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: NameKind,
        name: String,
        reason: String,
    },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn chain_suffix(chain: Option<&str>) -> String {
    chain.map(|c| format!(", chain '{c}'")).unwrap_or_default()
}

/// Engine request that can fail once a table is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Operation {
    #[strum(serialize = "Reading policy")]
    Policy,
    #[strum(serialize = "Zeroing counters")]
    ZeroCounters,
    #[strum(serialize = "Commit")]
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum NameKind {
    #[strum(serialize = "table")]
    Table,
    #[strum(serialize = "chain")]
    Chain,
}

/// Failure reported by the packet filter engine: errno plus the engine's message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (errno {code})")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn errno(&self) -> Errno {
        Errno::from_raw(self.code)
    }
}

impl From<Errno> for EngineError {
    fn from(errno: Errno) -> Self {
        Self::new(errno as i32, errno.desc())
    }
}

impl Error {
    /// The engine's own failure, if this error came from the engine.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Error::EngineUnavailable { source, .. } | Error::Engine { source, .. } => Some(source),
            _ => None,
        }
    }

    /// User-facing explanation with suggestions.
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            Error::NotBuiltinChain { chain, .. } => ErrorTranslation::new(format!(
                "Chain '{chain}' is user-defined and has no policy counters"
            ))
            .with_suggestion("Only built-in chains (INPUT, FORWARD, OUTPUT, ...) carry a policy"),
            Error::InvalidName { kind, .. } => {
                ErrorTranslation::new(format!("Invalid {kind} name"))
                    .with_suggestion("Names must be non-empty, at most 31 bytes and contain no NUL")
            }
            _ => match self.engine_error() {
                Some(e) => IptcErrorPattern::match_error(&e.message),
                None => ErrorTranslation::new(self.to_string()),
            },
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// Known libiptc messages and their translations
pub struct IptcErrorPattern;

impl IptcErrorPattern {
    /// Matches an engine message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to read firewall tables")
                .with_suggestion("Run as root, e.g. with sudo")
                .with_suggestion("Or grant CAP_NET_ADMIN to the calling process")
                .with_help("https://man7.org/linux/man-pages/man7/capabilities.7.html");
        }

        if lower.contains("table does not exist") || lower.contains("iptables who?") {
            return ErrorTranslation::new("Firewall table does not exist")
                .with_suggestion("Check the table name: filter, nat, mangle, raw, security")
                .with_suggestion("Load the table module: sudo modprobe iptable_filter")
                .with_suggestion("For IPv6: sudo modprobe ip6table_filter")
                .with_help("https://www.netfilter.org/documentation/");
        }

        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Firewall chain not found")
                .with_suggestion("List the table's chains first: nfsnap chains")
                .with_suggestion("Chain names are case-sensitive (INPUT, not input)");
        }

        if lower.contains("wrong version") || lower.contains("incompatible with this kernel") {
            return ErrorTranslation::new("Kernel and libiptc versions do not match")
                .with_suggestion("Update the iptables package to match the running kernel")
                .with_suggestion("On nftables-only systems the legacy tables may be unavailable");
        }

        if lower.contains("memory allocation") || lower.contains("cannot allocate memory") {
            return ErrorTranslation::new("Out of memory while reading the table")
                .with_suggestion("Very large tables need more memory, check system load");
        }

        if lower.contains("resource busy") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("The table was changed concurrently")
                .with_suggestion("Another process committed to the same table, retry the operation")
                .with_suggestion("Check for conflicting firewall managers: systemctl status firewalld ufw");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables works: sudo iptables -L -n -v")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
