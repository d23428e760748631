use compact_str::CompactString;
use thiserror::Error;

/// Failure of a single calculation attempt. Every variant except
/// `IncompleteExpression` clears the pending expression when surfaced
/// through a [`Session`](crate::session::Session).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalcError {
    #[error("invalid token '{0}' in expression")]
    MalformedToken(CompactString),
    #[error("expression needs at least two values and one operator")]
    IncompleteExpression,
    #[error("cannot take even root of negative number")]
    ComplexResult,
    #[error("cannot divide by zero")]
    DivisionByZero,
    #[error("result is too large to display")]
    Overflow,
}
