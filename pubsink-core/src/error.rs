use std::fmt;

use thiserror::Error;
use tonic::Code;

pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by a publisher, canonicalized to a status code.
///
/// Publishers may fail for many reasons (transport, quota, permissions). Every such failure
/// is reduced to a [`Code`] and a message so that per-message and terminal failures can be
/// reported, compared and aggregated uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError {
    code: Code,
    message: String,
}

impl PublishError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Canonicalizes an arbitrary error. gRPC statuses keep their code, anything else is
    /// reported as [`Code::Unknown`].
    pub fn canonical(err: &(dyn std::error::Error + 'static)) -> Self {
        match err.downcast_ref::<tonic::Status>() {
            Some(status) => status.into(),
            None => Self::new(Code::Unknown, err.to_string()),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for PublishError {}

impl From<&tonic::Status> for PublishError {
    fn from(status: &tonic::Status) -> Self {
        Self::new(status.code(), status.message())
    }
}

impl From<tonic::Status> for PublishError {
    fn from(status: tonic::Status) -> Self {
        Self::from(&status)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// One or more messages failed to publish since the previous drain. Every failure is
    /// present exactly once, either as the primary or among the suppressed causes.
    #[error("Publish Error - {primary}{}", suppressed_note(.suppressed))]
    Publish {
        #[source]
        primary: PublishError,
        suppressed: Vec<PublishError>,
    },

    /// The publisher failed permanently, no further publish will be attempted.
    #[error("Publisher Error - {0}")]
    Publisher(PublishError),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("metrics Error - {0}")]
    Metrics(String),
}

impl Error {
    /// All publisher failures carried by this error, primary first.
    pub fn causes(&self) -> Vec<&PublishError> {
        match self {
            Error::Publish {
                primary,
                suppressed,
            } => std::iter::once(primary).chain(suppressed).collect(),
            Error::Publisher(error) => vec![error],
            Error::Config(_) | Error::Metrics(_) => vec![],
        }
    }

    /// Status code of the primary cause, if there is one.
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::Publish { primary, .. } => Some(primary.code()),
            Error::Publisher(error) => Some(error.code()),
            Error::Config(_) | Error::Metrics(_) => None,
        }
    }
}

fn suppressed_note(suppressed: &[PublishError]) -> String {
    match suppressed.len() {
        0 => String::new(),
        n => format!(" ({n} more suppressed)"),
    }
}
