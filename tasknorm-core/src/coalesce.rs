//! Conflict-aware coalescing
//!
//! The same fact (branch, revision, chunk, product) shows up in several
//! places of a raw task, encoded slightly differently by each producer.
//! The coalescer picks the first non-null candidate and flags, but never
//! resolves, disagreement among the rest.

use tracing::warn;

use crate::error::NormalizeError;

/// One recorded disagreement between candidate sources for a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The logical field being coalesced
    pub field: String,
    /// The value that won (rendered for logging)
    pub selected: String,
    /// The later candidate that disagreed
    pub rejected: String,
}

/// First-non-null selection over ordered candidates, with every recorded
/// conflict kept for the lifetime of one normalization pass
#[derive(Debug)]
pub struct Coalescer {
    source_key: String,
    conflicts: Vec<Conflict>,
}

impl Coalescer {
    /// Creates a coalescer scoped to one batch source key
    pub fn new(source_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            conflicts: Vec::new(),
        }
    }

    /// The source key conflicts are reported against
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Conflicts recorded so far
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Picks the first non-null candidate for `field`.
    ///
    /// Later non-null candidates that differ from the selection are logged
    /// and recorded but never change the outcome. An empty candidate list
    /// is a caller error.
    pub fn pick<T>(
        &mut self,
        field: &str,
        candidates: Vec<Option<T>>,
    ) -> Result<Option<T>, NormalizeError>
    where
        T: PartialEq + std::fmt::Debug,
    {
        if candidates.is_empty() {
            return Err(NormalizeError::EmptyCoalesce {
                field: field.to_string(),
            });
        }

        let mut selected: Option<T> = None;
        for candidate in candidates {
            let Some(value) = candidate else { continue };
            match &selected {
                None => selected = Some(value),
                Some(current) if *current != value => {
                    warn!(
                        "conflicting values for {} while processing {}: kept {:?}, ignored {:?}",
                        field, self.source_key, current, value
                    );
                    self.conflicts.push(Conflict {
                        field: field.to_string(),
                        selected: format!("{current:?}"),
                        rejected: format!("{value:?}"),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_non_null_wins_and_conflict_recorded() {
        let mut coalescer = Coalescer::new("tc.0:123");
        let picked = coalescer
            .pick("field", vec![None, Some("a"), Some("b")])
            .unwrap();
        assert_eq!(picked, Some("a"));
        assert_eq!(coalescer.conflicts().len(), 1);
        assert_eq!(coalescer.conflicts()[0].rejected, "\"b\"");
    }

    #[test]
    fn test_all_null_yields_none_without_conflict() {
        let mut coalescer = Coalescer::new("tc.0:123");
        let picked: Option<String> = coalescer.pick("field", vec![None, None]).unwrap();
        assert_eq!(picked, None);
        assert!(coalescer.conflicts().is_empty());
    }

    #[test]
    fn test_agreeing_candidates_do_not_conflict() {
        let mut coalescer = Coalescer::new("tc.0:123");
        let picked = coalescer
            .pick("field", vec![Some(7u32), None, Some(7u32)])
            .unwrap();
        assert_eq!(picked, Some(7));
        assert!(coalescer.conflicts().is_empty());
    }

    #[test]
    fn test_empty_candidate_list_is_an_error() {
        let mut coalescer = Coalescer::new("tc.0:123");
        let result: Result<Option<u32>, _> = coalescer.pick("field", vec![]);
        assert!(result.is_err());
    }
}
