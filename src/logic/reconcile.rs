use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::IdSet;

/// How a teacher's subject set for one level changes under a bulk replace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSetDiff {
    /// Subjects that gain the teacher.
    pub added: IdSet,
    /// Subjects that lose the teacher.
    pub removed: IdSet,
}

impl SubjectSetDiff {
    pub fn between(previous: &IdSet, next: &IdSet) -> Self {
        Self {
            added: next.difference(previous).cloned().collect(),
            removed: previous.difference(next).cloned().collect(),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "+[{}] -[{}]",
            self.added.iter().join(", "),
            self.removed.iter().join(", ")
        )
    }
}
