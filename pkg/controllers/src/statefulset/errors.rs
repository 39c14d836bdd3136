use std::fmt;
use thiserror::Error;

/// A stored revision whose payload no longer decodes into the current schema.
///
/// Retrying cannot fix this; the revision has to be repaired or removed.
#[derive(Debug, Error)]
#[error("revision {revision} has a corrupt {field} payload")]
pub struct RevisionError {
    pub revision: String,
    pub field: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Several independent failures reported together.
#[derive(Debug)]
pub struct AggregateError(Vec<anyhow::Error>);

impl AggregateError {
    pub fn new(errors: Vec<anyhow::Error>) -> Self {
        Self(errors)
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "{:#}", only);
        }
        write!(f, "[")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:#}", err)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateError {}

/// Combine errors into one, flattening nested aggregates.
/// A single error is returned as is.
pub fn aggregate(errors: Vec<anyhow::Error>) -> anyhow::Error {
    let mut flat = Vec::with_capacity(errors.len());
    for err in errors {
        match err.downcast::<AggregateError>() {
            Ok(agg) => flat.extend(agg.0),
            Err(err) => flat.push(err),
        }
    }
    if flat.len() == 1 {
        if let Some(only) = flat.pop() {
            return only;
        }
    }
    AggregateError(flat).into()
}

/// Returned by the slow-start executor when a batch had failures.
#[derive(Debug, Error)]
#[error("{successes} succeeded before failure: {source}")]
pub struct BatchError {
    /// Items from batches that completed without any failure.
    pub successes: usize,
    pub source: AggregateError,
}
