//! Per-request breaker states.

use std::fmt;

/// How the breaker treats one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No service matched, or the breaker is disabled. Nothing is recorded.
    PassThrough,

    /// The service has no open outage. The request runs and is counted.
    Normal,

    /// The service is in an outage whose retry cooldown has elapsed. This
    /// request runs as a recovery test.
    Probe,

    /// The service is in an outage. The request is not sent.
    Blocked,
}

impl State {
    /// Lower-case name, as used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            State::PassThrough => "pass_through",
            State::Normal => "normal",
            State::Probe => "probe",
            State::Blocked => "blocked",
        }
    }

    /// True if the real request is executed in this state.
    pub fn executes_request(self) -> bool {
        !matches!(self, State::Blocked)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
