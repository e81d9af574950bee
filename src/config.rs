//! Client configuration.
//!
//! Two settings exist: a diagnostic sink and a terminal override applied to
//! every exec and shell channel. Both can be given at connect time through
//! [`ClientConfig`] or changed afterwards on the session.

use serde::Deserialize;
use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::error::{ClientResult, Error};

/// Diagnostic sink called as `(operation, message, is_error)`
pub type Logger = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

pub const DEFAULT_TERM: &str = "bash";
pub const DEFAULT_WIDTH: u32 = 80;
pub const DEFAULT_HEIGHT: u32 = 25;

/// Fully resolved terminal parameters sent with a channel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    pub term: String,
    pub env: BTreeMap<String, String>,
    pub width: u32,
    pub height: u32,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            term: DEFAULT_TERM.to_owned(),
            env: BTreeMap::new(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl TerminalConfig {
    #[must_use]
    pub fn new<T: Into<String>>(term: T, width: u32, height: u32) -> Self {
        Self {
            term: term.into(),
            width,
            height,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Terminal settings that take precedence over per-call arguments.
///
/// Unset fields fall through to the caller's value, then to the defaults
/// (`bash`, 80x25, no environment).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalOverride {
    #[serde(rename = "type")]
    pub term: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TerminalOverride {
    /// Layers the override over `base`
    #[must_use]
    pub fn apply(&self, base: TerminalConfig) -> TerminalConfig {
        TerminalConfig {
            term: self.term.clone().unwrap_or(base.term),
            env: self.env.clone().unwrap_or(base.env),
            width: self.width.unwrap_or(base.width),
            height: self.height.unwrap_or(base.height),
        }
    }
}

/// Value passed to [`ClientConfig::set_option`]
#[derive(Clone)]
pub enum ConfigValue {
    Logger(Logger),
    Terminal(TerminalOverride),
}

impl ConfigValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Logger(_) => "logger",
            Self::Terminal(_) => "terminal",
        }
    }
}

#[derive(Clone, Default)]
pub struct ClientConfig {
    pub logger: Option<Logger>,
    pub terminal: Option<TerminalOverride>,
}

impl ClientConfig {
    pub const LOGGER: &'static str = "logger";
    pub const TERMINAL: &'static str = "terminal";

    #[must_use]
    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str, &str, bool) + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }

    #[must_use]
    pub fn with_terminal(mut self, terminal: TerminalOverride) -> Self {
        self.terminal = Some(terminal);
        self
    }

    /// Sets an option by name. Unknown names and values of the wrong kind
    /// are rejected here rather than when the option is used.
    pub fn set_option(&mut self, name: &str, value: ConfigValue) -> ClientResult<()> {
        match (name, value) {
            (Self::LOGGER, ConfigValue::Logger(logger)) => self.logger = Some(logger),
            (Self::TERMINAL, ConfigValue::Terminal(terminal)) => self.terminal = Some(terminal),
            (Self::LOGGER | Self::TERMINAL, value) => {
                return Err(Error::InvalidOption {
                    name: name.to_owned(),
                    reason: format!("expected a {name}, got a {}", value.kind()),
                })
            }
            (name, _) => return Err(Error::UnknownOption(name.to_owned())),
        }
        Ok(())
    }

    /// Resolves terminal parameters: override, then `base`
    #[must_use]
    pub fn terminal(&self, base: TerminalConfig) -> TerminalConfig {
        match &self.terminal {
            Some(terminal) => terminal.apply(base),
            None => base,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("logger", &self.logger.as_ref().map(|_| "Fn"))
            .field("terminal", &self.terminal)
            .finish()
    }
}
