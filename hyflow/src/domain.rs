//! Declared input variables and their domains.
//!
//! Inputs are declared in the configuration as `[inputs.<name>]` tables:
//!
//! ```toml
//! [inputs.s]
//! sort = "int"
//! range = [-2, 2]
//!
//! [inputs.mode]
//! sort = "str"
//! values = ["fast", "safe"]
//! ```
//!
//! A domain both constrains obligations (both runs draw their inputs from it) and decides
//! whether the epistemic backend can enumerate worlds: booleans are always finite, other
//! sorts only with a `range` or `values` list.
use std::collections::BTreeMap;

use either::Either;
use hyterm::prelude::*;
use serde::{Deserialize, Serialize};

use crate::utils::error::{FlowError, FlowResult};

/// Domain of one input variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDomain {
    pub sort: Sort,
    /// Inclusive integer bounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[i64; 2]>,
    /// Explicit list of admissible values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

impl InputDomain {
    /// Unconstrained domain of `sort`.
    pub fn of(sort: Sort) -> Self {
        Self {
            sort,
            range: None,
            values: None,
        }
    }

    pub fn range(lo: i64, hi: i64) -> Self {
        Self {
            sort: Sort::Int,
            range: Some([lo, hi]),
            values: None,
        }
    }

    pub fn values(sort: Sort, values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            sort,
            range: None,
            values: Some(values.into_iter().collect()),
        }
    }

    fn validate(&self, name: &str) -> FlowResult<()> {
        if let Some([lo, hi]) = self.range {
            if self.sort != Sort::Int {
                return Err(FlowError::InvalidConfig(format!(
                    "input `{name}`: `range` requires sort int, found {}",
                    self.sort
                )));
            }
            if lo > hi {
                return Err(FlowError::InvalidConfig(format!(
                    "input `{name}`: empty range [{lo}, {hi}]"
                )));
            }
        }
        if let Some(values) = &self.values {
            if values.is_empty() {
                return Err(FlowError::InvalidConfig(format!(
                    "input `{name}`: empty `values` list"
                )));
            }
            if let Some(bad) = values.iter().find(|v| v.sort() != self.sort) {
                return Err(FlowError::InvalidConfig(format!(
                    "input `{name}`: value {bad} is not of sort {}",
                    self.sort
                )));
            }
        }
        Ok(())
    }

    /// Number of admissible values, if finite.
    pub fn cardinality(&self) -> Option<u128> {
        if let Some(values) = &self.values {
            return Some(values.len() as u128);
        }
        match (self.sort, self.range) {
            (_, Some([lo, hi])) => Some((hi as i128 - lo as i128 + 1) as u128),
            (Sort::Bool, None) => Some(2),
            _ => None,
        }
    }

    /// Admissible values in a stable order, if finite.
    pub fn enumerate(&self) -> Option<impl Iterator<Item = Value> + '_> {
        if let Some(values) = &self.values {
            return Some(Either::Left(Either::Left(values.iter().cloned())));
        }
        match (self.sort, self.range) {
            (_, Some([lo, hi])) => Some(Either::Left(Either::Right((lo..=hi).map(Value::Int)))),
            (Sort::Bool, None) => Some(Either::Right(
                [Value::Bool(false), Value::Bool(true)].into_iter(),
            )),
            _ => None,
        }
    }

    /// Constraint restricting `variable` to this domain (`true` when unconstrained).
    pub fn constraint(&self, variable: &Variable) -> Term {
        let v = Term::var(variable.clone());
        if let Some(values) = &self.values {
            return Term::or_any(
                values
                    .iter()
                    .map(|value| v.clone().equals(Term::constant(value.clone()))),
            );
        }
        match self.range {
            Some([lo, hi]) => Term::int(lo).le(v.clone()) & v.le(Term::int(hi)),
            None => Term::bool(true),
        }
    }
}

/// All declared inputs, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputDomains {
    inputs: BTreeMap<String, InputDomain>,
}

impl InputDomains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, domain: InputDomain) -> FlowResult<()> {
        let name = name.into();
        domain.validate(&name)?;
        self.inputs.insert(name, domain);
        Ok(())
    }

    /// Builder-style [`InputDomains::declare`].
    pub fn with(mut self, name: impl Into<String>, domain: InputDomain) -> FlowResult<Self> {
        self.declare(name, domain)?;
        Ok(self)
    }

    pub fn validate(&self) -> FlowResult<()> {
        self.inputs
            .iter()
            .try_for_each(|(name, domain)| domain.validate(name))
    }

    pub fn get(&self, name: &str) -> Option<&InputDomain> {
        self.inputs.get(name)
    }

    /// Signature used to parse terms mentioning the declared inputs.
    pub fn signature(&self) -> Signature {
        let mut signature = Signature::new();
        for (name, domain) in &self.inputs {
            signature.declare(name, domain.sort);
        }
        signature
    }

    /// Domain constraint for one (possibly renamed) variable; `true` if undeclared.
    pub fn constraint(&self, variable: &Variable) -> Term {
        self.get(&variable.name)
            .filter(|domain| domain.sort == variable.sort)
            .map(|domain| domain.constraint(variable))
            .unwrap_or_else(|| Term::bool(true))
    }

    /// Finite domain of `variable`, if any. Booleans are finite even when undeclared.
    pub fn finite(&self, variable: &Variable) -> Option<InputDomain> {
        match self.get(&variable.name) {
            Some(domain) if domain.sort == variable.sort && domain.cardinality().is_some() => {
                Some(domain.clone())
            }
            _ if variable.sort == Sort::Bool => Some(InputDomain::of(Sort::Bool)),
            _ => None,
        }
    }
}
