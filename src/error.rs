// ===================== error.rs =====================
//! Errors a single cycle phase can end with. None of them outlives its cycle.

use std::{io, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The medium refused to create, open or read a recording.
    #[error("storage error on \"{name}\": {source}")]
    Storage {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Handshake with the collector failed, or the link broke mid-transfer.
    #[error("connection error ({endpoint}): {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub fn storage(name: &str, source: io::Error) -> Self {
        Error::Storage { name: name.to_owned(), source }
    }

    pub fn connection(endpoint: impl ToString, source: io::Error) -> Self {
        Error::Connection { endpoint: endpoint.to_string(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
