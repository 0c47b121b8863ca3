//! Input variables and run sides.
//!
//! Role
//! - A [`Variable`] names one symbolic input of the subject program together with its [`Sort`].
//! - The [`Side`] distinguishes the shared trace vocabulary (`Base`) from the two renamed
//!   copies that appear inside an obligation (`Left` for the first run, `Right` for the second).
//!
//! Display
//! - `Base` variables print as their name, `Left` as `name#1` and `Right` as `name#2`.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumIter};

use crate::sort::Sort;

/// Which run a variable belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIs,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Trace-level vocabulary, not yet attached to a run.
    #[default]
    Base,
    /// First run of an obligation.
    Left,
    /// Second run of an obligation.
    Right,
}

impl Side {
    /// The other run; `Base` is its own mirror.
    pub fn mirror(self) -> Self {
        match self {
            Side::Base => Side::Base,
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Side::Base => "",
            Side::Left => "#1",
            Side::Right => "#2",
        }
    }
}

/// A symbolic input variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: Arc<str>,
    pub sort: Sort,
    #[serde(default)]
    pub side: Side,
}

impl Variable {
    /// Create a `Base` variable.
    pub fn new(name: impl AsRef<str>, sort: Sort) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            sort,
            side: Side::Base,
        }
    }

    /// Same variable attached to another run.
    pub fn on_side(&self, side: Side) -> Self {
        Self {
            name: self.name.clone(),
            sort: self.sort,
            side,
        }
    }

    /// The `Base` variable this one was renamed from.
    pub fn base(&self) -> Self {
        self.on_side(Side::Base)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.side.suffix())
    }
}
