use std::fmt;

use crate::config::Logger;

/// Sends client events to the `log` facade and to the optional user sink.
#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    logger: Option<Logger>,
}

impl Diagnostics {
    pub fn new(logger: Option<Logger>) -> Self {
        Self { logger }
    }

    pub fn set_logger(&mut self, logger: Option<Logger>) {
        self.logger = logger;
    }

    pub fn info(&self, operation: &str, message: &str) {
        info!("{operation}: {message}");
        self.emit(operation, message, false);
    }

    pub fn error(&self, operation: &str, message: &str) {
        error!("{operation}: {message}");
        self.emit(operation, message, true);
    }

    fn emit(&self, operation: &str, message: &str, is_error: bool) {
        if let Some(logger) = &self.logger {
            logger(operation, message, is_error);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("logger", &self.logger.is_some())
            .finish()
    }
}
