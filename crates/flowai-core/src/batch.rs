use serde::Serialize;

/// Overall outcome of a batch operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every item succeeded.
    Created,
    /// At least one item failed.
    MultiStatus,
}

impl BatchStatus {
    /// HTTP-equivalent status code.
    pub fn code(self) -> u16 {
        match self {
            Self::Created => 201,
            Self::MultiStatus => 207,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub error: String,
}

/// Per-item results of a batch, in input order. A batch never fails as a whole.
#[derive(Clone, Debug, Serialize)]
pub struct BatchOutcome<T> {
    pub success: Vec<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BatchFailure>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            success: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    /// Run `op` on every item, collecting successes and indexed failures.
    pub fn collect<I, E, F>(items: I, mut op: F) -> Self
    where
        I: IntoIterator,
        E: std::fmt::Display,
        F: FnMut(I::Item) -> Result<T, E>,
    {
        let mut outcome = Self::default();
        for (index, item) in items.into_iter().enumerate() {
            outcome.record(index, op(item));
        }
        outcome
    }

    pub fn record<E: std::fmt::Display>(&mut self, index: usize, result: Result<T, E>) {
        match result {
            Ok(value) => self.success.push(value),
            Err(e) => self.errors.push(BatchFailure {
                index,
                error: e.to_string(),
            }),
        }
    }

    pub fn status(&self) -> BatchStatus {
        if self.errors.is_empty() {
            BatchStatus::Created
        } else {
            BatchStatus::MultiStatus
        }
    }
}
