//! Construction options for a repository.

/// Initial sizing of the arena and the handle table.
///
/// Both containers grow on demand; the capacities only avoid early
/// reallocation when the expected size is known.
///
/// # Example
///
/// ```
/// use dynamic_memory::{Repository, RepositoryConfig};
///
/// let config = RepositoryConfig::default()
///     .with_value_capacity(64)
///     .with_slot_capacity(192);
/// let repo: Repository<u32> = Repository::with_config(config);
/// assert!(repo.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryConfig {
    /// Number of values the arena can hold before reallocating.
    pub value_capacity: usize,
    /// Number of slots the handle table can hold before reallocating.
    pub slot_capacity: usize,
}

impl RepositoryConfig {
    /// Set the arena capacity.
    pub fn with_value_capacity(mut self, capacity: usize) -> Self {
        self.value_capacity = capacity;
        self
    }

    /// Set the handle-table capacity.
    pub fn with_slot_capacity(mut self, capacity: usize) -> Self {
        self.slot_capacity = capacity;
        self
    }
}
