use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    NotEnoughReadings { len: usize, needed: usize },
    NonFiniteReading { index: usize },
    NonFiniteReference,
    StatError(&'static str),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::NotEnoughReadings { len, needed } => {
                write!(f, "not enough readings: got {len}, need at least {needed}")
            },
            EvalError::NonFiniteReading { index } => {
                write!(f, "reading #{} is not a finite number", index + 1)
            },
            EvalError::NonFiniteReference => write!(f, "reference value is not a finite number"),
            EvalError::StatError(msg) => write!(f, "statistical error: {msg}"),
        }
    }
}

impl std::error::Error for EvalError {}

pub type EvalResult<T> = Result<T, EvalError>;
