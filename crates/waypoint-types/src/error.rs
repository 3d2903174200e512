use thiserror::Error;

/// Storage-contract faults raised by persistence providers.
///
/// These indicate caller error, store corruption, or backend failure. They are
/// never used to report step-body failures; those are recorded as
/// [`ExecutionError`](crate::workflow::ExecutionError) data instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} '{id}' matched {count} records, expected exactly one")]
    Ambiguous {
        entity: &'static str,
        id: String,
        count: usize,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl PersistenceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether this fault is a "no record with that id" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Outcome of a query that expects exactly one matching record.
///
/// Keeps the three cases of an expect-exactly-one lookup explicit instead of
/// folding "zero" and "many" into a single failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleResult<T> {
    /// Exactly one record matched.
    One(T),
    /// No record matched.
    NotFound,
    /// More than one record matched (the count is carried for diagnostics).
    Ambiguous(usize),
}

impl<T> SingleResult<T> {
    /// Classify an iterator of matches without collecting past the second one
    /// unless there is ambiguity to report.
    pub fn from_matches<I: IntoIterator<Item = T>>(matches: I) -> Self {
        let mut iter = matches.into_iter();
        match iter.next() {
            None => SingleResult::NotFound,
            Some(first) => match iter.next() {
                None => SingleResult::One(first),
                Some(_) => SingleResult::Ambiguous(2 + iter.count()),
            },
        }
    }

    /// Convert into a contract result, mapping zero/many to the matching fault.
    pub fn into_result(
        self,
        entity: &'static str,
        id: impl Into<String>,
    ) -> Result<T, PersistenceError> {
        match self {
            SingleResult::One(value) => Ok(value),
            SingleResult::NotFound => Err(PersistenceError::not_found(entity, id)),
            SingleResult::Ambiguous(count) => Err(PersistenceError::Ambiguous {
                entity,
                id: id.into(),
                count,
            }),
        }
    }

    pub fn is_one(&self) -> bool {
        matches!(self, SingleResult::One(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_display() {
        let err = PersistenceError::not_found("workflow instance", "abc");
        assert_eq!(err.to_string(), "workflow instance 'abc' not found");
        assert!(err.is_not_found());

        let err = PersistenceError::Ambiguous {
            entity: "event subscription",
            id: "s1".to_string(),
            count: 3,
        };
        assert!(err.to_string().contains("matched 3 records"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_single_result_classifies_matches() {
        assert_eq!(SingleResult::<u8>::from_matches(vec![]), SingleResult::NotFound);
        assert_eq!(SingleResult::from_matches(vec![7]), SingleResult::One(7));
        assert_eq!(
            SingleResult::from_matches(vec![1, 2, 3, 4]),
            SingleResult::Ambiguous(4)
        );
    }

    #[test]
    fn test_single_result_into_result() {
        assert_eq!(SingleResult::One(5).into_result("thing", "x"), Ok(5));

        let err = SingleResult::<u8>::NotFound
            .into_result("thing", "x")
            .unwrap_err();
        assert!(err.is_not_found());

        let err = SingleResult::<u8>::Ambiguous(2)
            .into_result("thing", "x")
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Ambiguous { count: 2, .. }));
    }
}
