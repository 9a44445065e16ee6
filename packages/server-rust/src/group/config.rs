//! Configuration input to [`crate::group::PartitionGroupMembershipManager::start`].

use std::collections::BTreeMap;

use super::types::GroupConfig;

/// Static configuration supplied to `start`: an optional system group
/// descriptor and a name-keyed map of data group descriptors.
///
/// Plain `Debug + Clone + Default` struct with public fields and builder
/// methods. No file or environment parsing: this core owns none of that.
#[derive(Debug, Clone, Default)]
pub struct PartitionGroupsConfig {
    pub system_group: Option<GroupConfig>,
    pub groups: BTreeMap<String, GroupConfig>,
}

impl PartitionGroupsConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_system_group(mut self, config: GroupConfig) -> Self {
        self.system_group = Some(config);
        self
    }

    #[must_use]
    pub fn with_group(mut self, config: GroupConfig) -> Self {
        self.groups.insert(config.name().to_string(), config);
        self
    }
}
