//! Helpers for `check_changes` and `find` implementations

use crate::error::{Error, Result};
use std::fmt::Display;

/// Fail with [`Error::RequiredField`] if `value` is unset.
///
/// ```ignore
/// if actual.is_none() {
///     required("Name", &expected.name)?;
///     required("CIDR", &expected.cidr)?;
/// }
/// ```
pub fn required<T>(field: &'static str, value: &Option<T>) -> Result<()> {
    match value {
        Some(_) => Ok(()),
        None => Err(Error::RequiredField(field)),
    }
}

/// Fail with [`Error::CannotChangeField`] if `change` is set.
pub fn immutable<T>(field: &'static str, change: &Option<T>) -> Result<()> {
    match change {
        Some(_) => Err(Error::CannotChangeField(field)),
        None => Ok(()),
    }
}

/// Reduce discovery candidates to at most one.
///
/// More than one candidate cannot be converged safely and is an
/// [`Error::AmbiguousMatch`].
pub fn single_match<T>(what: impl Display, mut found: Vec<T>) -> Result<Option<T>> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        count => Err(Error::AmbiguousMatch {
            what: what.to_string(),
            count,
        }),
    }
}
