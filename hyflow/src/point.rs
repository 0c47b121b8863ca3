//! Identifiers shared by every stage: program points, agents and explored paths.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// A location in the subject program, used to align observations and policies across traces.
///
/// Points are ordered by the program-order stamp first and the site label second; two
/// observations are aligned only when both fields match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramPoint {
    /// Program-order stamp supplied by the explorer.
    pub order: u64,
    /// Free-form label (instruction or line, plus call context).
    pub site: Arc<str>,
}

impl ProgramPoint {
    pub fn new(order: u64, site: impl AsRef<str>) -> Self {
        Self {
            order,
            site: Arc::from(site.as_ref()),
        }
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.site, self.order)
    }
}

macro_rules! define_name_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(name: impl AsRef<str>) -> Self {
                Self(Arc::from(name.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The name as a single path component: bytes outside `[A-Za-z0-9_-]` are
            /// written as `%XX`.
            pub fn file_stem(&self) -> String {
                let mut out = String::with_capacity(self.0.len());
                for byte in self.0.bytes() {
                    if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                        out.push(char::from(byte));
                    } else {
                        out.push_str(&format!("%{byte:02X}"));
                    }
                }
                out
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_name_id!(
    /// A named observer.
    AgentId
);

define_name_id!(
    /// Identifier of one explored path, chosen by the explorer.
    PathId
);
