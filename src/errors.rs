use thiserror::Error;

/// Common result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds the session core recognizes (spec §7). `kind()` is what
/// the service loop and the handshake/auth gates consult to decide whether
/// an error is fatal for the session or recoverable in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Framing,
    Crypto,
    Replay,
    Protocol,
    Auth,
    NotFound,
    Permission,
    ResourceExhausted,
    Executor,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame truncated: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("frame of {0} bytes exceeds the 1 MiB limit")]
    OversizeFrame(usize),

    #[error("unknown message type tag {0}")]
    UnknownType(u8),

    #[error("HMAC trailer mismatch")]
    BadMac,

    #[error("aes_gcm error: {0}")]
    AesGcmError(#[from] aes_gcm::Error),

    #[error("sequence number mismatch: expected {expected}, got {got}")]
    Replay { expected: u32, got: u32 },

    #[error("unexpected message in phase {phase}: {detail}")]
    Protocol { phase: &'static str, detail: String },

    #[error("authentication rejected")]
    AuthRejected,

    #[error("unknown auth type: {0}")]
    UnknownAuthType(String),

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("path escapes user root: {0}")]
    Permission(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("command executor error: {0}")]
    Executor(String),

    #[error("json decoding error: {0}")]
    JsonErr(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("rsa error: {0}")]
    RsaError(#[from] rsa::Error),

    #[error("pkcs8 error: {0}")]
    Pkcs8Error(#[from] pkcs8::Error),

    #[error("uuid error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("server key fingerprint mismatch for {host}: known {expected}, presented {got}")]
    KnownHostMismatch {
        host: String,
        expected: String,
        got: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            Io(_) => ErrorKind::Transport,
            ShortRead { .. } | OversizeFrame(_) | UnknownType(_) => ErrorKind::Framing,
            BadMac | AesGcmError(_) => ErrorKind::Crypto,
            Replay { .. } => ErrorKind::Replay,
            Protocol { .. } => ErrorKind::Protocol,
            AuthRejected | UnknownAuthType(_) | MissingCredential(_) => ErrorKind::Auth,
            NotFound(_) => ErrorKind::NotFound,
            Permission(_) => ErrorKind::Permission,
            ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Executor(_) => ErrorKind::Executor,
            JsonErr(_) | Base64Error(_) | RsaError(_) | Pkcs8Error(_) | UuidError(_)
            | KnownHostMismatch { .. } | Internal(_) => ErrorKind::Protocol,
        }
    }

    /// True if, per spec §7, this error must close the transport outright
    /// rather than being reported in-band with an ERROR message.
    pub fn is_fatal_in_service(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::Framing | ErrorKind::Crypto | ErrorKind::Replay
        )
    }
}
