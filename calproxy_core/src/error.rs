//! Errors of the calendar proxy.

use reqwest::{StatusCode, Url};

use crate::index::IndexError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request {url}: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("response {url}: {status}")]
    Status { url: Url, status: StatusCode },
    #[error("read body {url}: {source}")]
    Body {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("empty locator")]
    EmptyLocator,
    #[error("resolve locator {locator:?}: {source}")]
    Locator {
        locator: String,
        #[source]
        source: url::ParseError,
    },
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("parse calendar: {0}")]
    Parse(#[from] ical::parser::ParserError),
    #[error("merge task: {0}")]
    Merge(#[from] tokio::task::JoinError),
}

impl Error {
    /// The HTTP status of a rejected response, if that is what went wrong.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
