use thiserror::Error;

pub type TagSyncResult<T> = Result<T, TagSyncError>;

/// WeChat error codes meaning the cached access token is no longer valid.
const TOKEN_INVALID_CODES: [i64; 3] = [40001, 40014, 42001];

/// WeChat "system busy" and API rate-limit codes.
const TRANSIENT_CODES: [i64; 2] = [-1, 45009];

#[derive(Debug, Error)]
pub enum TagSyncError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown official account: {0}")]
    UnknownAccount(String),

    #[error("WeChat API error: {errcode} - {errmsg}")]
    WeChatApi { errcode: i64, errmsg: String },

    #[error("Unexpected HTTP status: {status} - {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Update may not change the identity of record {0}")]
    IdentityChange(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] reconcile::ReconcileError)
}

impl From<validator::ValidationErrors> for TagSyncError {
    fn from(err: validator::ValidationErrors) -> Self {
        TagSyncError::ConfigError(err.to_string())
    }
}

impl TagSyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::DatabaseError(_) | Self::CacheError(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::WeChatApi { errcode, .. } => TRANSIENT_CODES.contains(errcode),
            Self::Reconcile(e) => e.is_retryable(),
            _ => false
        }
    }

    /// True when the access token must be refreshed before retrying.
    pub fn is_token_invalid(&self) -> bool {
        matches!(self, Self::WeChatApi { errcode, .. } if TOKEN_INVALID_CODES.contains(errcode))
    }
}
