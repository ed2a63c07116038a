use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("SIP parse error: {0}")]
    SipParse(String),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("PTZ parse error: {0}")]
    PtzParse(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
