//! Error types for notso-core

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Part of the persisted envelope a decode failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    Documents,
    Idf,
    DocVectors,
    DocNorms,
    Trailer,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Header => "header",
            Section::Documents => "documents",
            Section::Idf => "idf",
            Section::DocVectors => "doc_vectors",
            Section::DocNorms => "doc_norms",
            Section::Trailer => "trailer",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("duplicate document id: {id}")]
    DuplicateDocument { id: String },

    #[error("corrupt index ({section} section): {detail}")]
    CorruptIndex { section: Section, detail: String },

    #[error("unsupported index version {found} (this build understands 1..={supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("invalid search configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(section: Section, detail: impl Into<String>) -> Self {
        Error::CorruptIndex { section, detail: detail.into() }
    }

    /// Section name for `CorruptIndex`, `None` for every other variant.
    pub fn corrupt_section(&self) -> Option<Section> {
        match self {
            Error::CorruptIndex { section, .. } => Some(*section),
            _ => None,
        }
    }
}
