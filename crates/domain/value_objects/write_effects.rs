use uuid::Uuid;

/// Result of a conditional write that only changes a row the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEffect {
    Applied,
    AlreadyApplied,
}

impl WriteEffect {
    pub fn from_rows_affected(rows: usize) -> Self {
        if rows > 0 {
            WriteEffect::Applied
        } else {
            WriteEffect::AlreadyApplied
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, WriteEffect::Applied)
    }
}

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    Existing(Uuid),
}

impl InsertOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => *id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}
