use crate::core::constants::PageNum;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid magic number")]
    InvalidMagic,

    #[error("unsupported version {0}")]
    InvalidVersion(u16),

    #[error("page size mismatch: file declares {0}")]
    InvalidPageSize(u32),

    #[error("collection '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("collection '{name}' does not exist")]
    CollectionNotFound { name: String },

    #[error("document not found")]
    NotFound,

    #[error("data corruption in {component}: page={page_num}, {details}")]
    Corruption {
        component: String,
        page_num: PageNum,
        details: String,
    },

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("lock poisoned: {lock_name} (another thread panicked while holding this lock)")]
    LockPoisoned { lock_name: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    pub(crate) fn corruption(component: &str, page_num: PageNum, details: impl Into<String>) -> Self {
        Error::Corruption {
            component: component.to_string(),
            page_num,
            details: details.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::BadInput(format!("JSON error: {}", err))
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(_: std::array::TryFromSliceError) -> Self {
        Error::Corruption {
            component: "binary".to_string(),
            page_num: 0,
            details: "failed to parse binary data".to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned {
            lock_name: "unknown".to_string(),
        }
    }
}

pub trait PoisonedLockExt<'a, T> {
    fn recover_poison(self) -> T;
}

impl<'a, T> PoisonedLockExt<'a, std::sync::RwLockReadGuard<'a, T>> for std::sync::LockResult<std::sync::RwLockReadGuard<'a, T>> {
    fn recover_poison(self) -> std::sync::RwLockReadGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<'a, T> PoisonedLockExt<'a, std::sync::RwLockWriteGuard<'a, T>> for std::sync::LockResult<std::sync::RwLockWriteGuard<'a, T>> {
    fn recover_poison(self) -> std::sync::RwLockWriteGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<'a, T> PoisonedLockExt<'a, std::sync::MutexGuard<'a, T>> for std::sync::LockResult<std::sync::MutexGuard<'a, T>> {
    fn recover_poison(self) -> std::sync::MutexGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
