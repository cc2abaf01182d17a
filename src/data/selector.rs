//! Entry- and exit-point selectors.

use std::fmt;

/// Identifies an entry point by stable index or by element name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceSelector {
    Index(usize),
    Name(String),
}

/// Identifies an exit point by stable index or by element name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SinkSelector {
    Index(usize),
    Name(String),
}

impl From<usize> for SourceSelector {
    fn from(index: usize) -> Self {
        SourceSelector::Index(index)
    }
}

impl From<&str> for SourceSelector {
    fn from(name: &str) -> Self {
        SourceSelector::Name(name.to_string())
    }
}

impl From<String> for SourceSelector {
    fn from(name: String) -> Self {
        SourceSelector::Name(name)
    }
}

impl From<usize> for SinkSelector {
    fn from(index: usize) -> Self {
        SinkSelector::Index(index)
    }
}

impl From<&str> for SinkSelector {
    fn from(name: &str) -> Self {
        SinkSelector::Name(name.to_string())
    }
}

impl From<String> for SinkSelector {
    fn from(name: String) -> Self {
        SinkSelector::Name(name)
    }
}

impl fmt::Display for SourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSelector::Index(i) => write!(f, "source #{}", i),
            SourceSelector::Name(n) => write!(f, "source '{}'", n),
        }
    }
}

impl fmt::Display for SinkSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkSelector::Index(i) => write!(f, "sink #{}", i),
            SinkSelector::Name(n) => write!(f, "sink '{}'", n),
        }
    }
}
