use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not read manifest {}", _0.display())]
    Manifest(#[error(not(source))] PathBuf),
    #[display("container error")]
    Container,
    #[display("fetch error")]
    Fetch,
    #[display("chapter not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("build cancelled; existing container left untouched")]
    Cancelled,
    #[display("I/O error")]
    Io,
}
