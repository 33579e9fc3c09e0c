use crate::{ActorId, StoredRecord};

/// Builder for record queries.
///
/// All filters are optional and combine with AND. Results are ordered by
/// creation time, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Filter by entity type.
    pub entity_type: Option<String>,

    /// Filter by owning actor.
    pub owner: Option<ActorId>,

    /// Filter by whether a lock is held.
    pub locked: Option<bool>,

    /// Filter by status name (any of these).
    pub statuses: Option<Vec<String>>,

    /// Maximum number of records to return.
    pub limit: Option<usize>,

    /// Number of records to skip.
    pub offset: Option<usize>,
}

impl RecordQuery {
    /// Creates an empty query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one entity type.
    pub fn for_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner: ActorId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Keeps only records whose lock presence equals `locked`.
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.statuses = Some(vec![status.into()]);
        self
    }

    pub fn statuses(mut self, statuses: Vec<String>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `record` passes every filter (paging aside).
    pub fn matches(&self, record: &StoredRecord) -> bool {
        if let Some(ref entity_type) = self.entity_type
            && &record.entity_type != entity_type
        {
            return false;
        }
        if let Some(owner) = self.owner
            && record.owner != owner
        {
            return false;
        }
        if let Some(locked) = self.locked
            && record.is_locked() != locked
        {
            return false;
        }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&record.status)
        {
            return false;
        }
        true
    }
}
