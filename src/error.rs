use std::fmt;
use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoopbackError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LoopbackError>;

/// One step of a combined attribute update, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrField {
    Mode,
    Owner,
    Size,
    Times,
    ChangeTime,
    CreationTime,
    BackupTime,
    Flags,
}

impl fmt::Display for AttrField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrField::Mode => "mode",
            AttrField::Owner => "owner",
            AttrField::Size => "size",
            AttrField::Times => "access/modify time",
            AttrField::ChangeTime => "change time",
            AttrField::CreationTime => "creation time",
            AttrField::BackupTime => "backup time",
            AttrField::Flags => "flags",
        };
        f.write_str(name)
    }
}

/// A combined attribute update stopped at `field`. Fields applied before it
/// stay applied.
#[derive(Error, Debug)]
#[error("setting {field} failed: {source}")]
pub struct SetattrError {
    pub field: AttrField,
    #[source]
    pub source: io::Error,
}

impl SetattrError {
    pub fn new(field: AttrField, source: io::Error) -> Self {
        Self { field, source }
    }
}

impl From<SetattrError> for io::Error {
    fn from(e: SetattrError) -> Self {
        e.source
    }
}
