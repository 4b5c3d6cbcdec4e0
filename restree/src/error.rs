use std::borrow::Cow;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy of the directory core.
///
/// `Validation`, `NotFound` and `Conflict` are synchronous and precede any
/// side effect. `Transport` and `Persistence` never make a triggering CRUD
/// operation fail: the dispatch engine logs them and moves on, except for
/// store failures on the CRUD path itself.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(Cow<'static, str>),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("transport error, {0}")]
    Transport(anyhow::Error),
    #[error("persistence error, {0}")]
    Persistence(anyhow::Error),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Json(serde_json::Error),
    #[error("{0}")]
    Anyhow(anyhow::Error),
}

impl Error {
    #[inline]
    pub fn validation<M: Into<Cow<'static, str>>>(msg: M) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(e: String) -> Self {
        Error::Msg(e)
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(e: &str) -> Self {
        Error::Msg(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        Error::Anyhow(e)
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}
