//! Addressing into a device's data tree.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical datastore an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Store {
    Configuration,
    Operational,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => f.write_str("CONFIGURATION"),
            Self::Operational => f.write_str("OPERATIONAL"),
        }
    }
}

/// Hierarchical locator into a data tree, e.g. `/interfaces/eth0/mtu`.
///
/// Empty segments are dropped on parse, so `"/a//b/"` and `"/a/b"` are the
/// same path. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Split into the parent path and the last segment. `None` for the root.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        self.segments
            .split_last()
            .map(|(last, parent)| (parent, last.as_str()))
    }
}

impl From<&str> for DataPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for DataPath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<DataPath> for String {
    fn from(path: DataPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// A subtree read from a device, tagged with the path it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNode {
    pub path: DataPath,
    pub data: Value,
}
