use std::{error, fmt, io, sync::mpsc};

#[derive(Debug)]
pub enum Error {
    InvalidCredentials,
    AccountCreationFailed,
    Unauthenticated,
    SessionExpired,
    UnexpectedResponse,
    BackendError { status: u16, message: String },
    TransportError(Box<dyn error::Error + Send>),
    JsonError(Box<dyn error::Error + Send>),
    IoError(io::Error),
    OAuthError(String),
    ConfigError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid email or password"),
            Self::AccountCreationFailed => write!(f, "Could not create the account"),
            Self::Unauthenticated => write!(f, "Not signed in"),
            Self::SessionExpired => write!(f, "Session has expired"),
            Self::UnexpectedResponse => write!(f, "Unknown server response"),
            Self::BackendError { status, message } => {
                write!(f, "Backend error {status}: {message}")
            }
            Self::TransportError(err) | Self::JsonError(err) => err.fmt(f),
            Self::IoError(err) => err.fmt(f),
            Self::OAuthError(msg) => write!(f, "Authorization failed: {msg}"),
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::JsonError(Box::new(err))
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Error {
        Error::TransportError(Box::new(err))
    }
}

impl From<mpsc::RecvTimeoutError> for Error {
    fn from(err: mpsc::RecvTimeoutError) -> Error {
        Error::OAuthError(err.to_string())
    }
}
