//! Next-hop group and group member API.

use crate::error::{SaiResult, SaiStatus};
use crate::types::{NextHopGroupMemberOid, NextHopGroupOid, NextHopOid};
use async_trait::async_trait;

/// Next-hop group type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NextHopGroupType {
    #[default]
    DynamicUnorderedEcmp,
    /// Members are hashed in `sequence_id` order.
    DynamicOrderedEcmp,
    FineGrainEcmp,
}

/// Attributes of a group member to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHopGroupMemberAttrs {
    pub group: NextHopGroupOid,
    pub next_hop: NextHopOid,
    pub weight: Option<u32>,
    pub sequence_id: Option<u32>,
}

impl NextHopGroupMemberAttrs {
    pub fn new(group: NextHopGroupOid, next_hop: NextHopOid) -> Self {
        Self {
            group,
            next_hop,
            weight: None,
            sequence_id: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        if weight > 0 {
            self.weight = Some(weight);
        }
        self
    }

    pub fn with_sequence_id(mut self, sequence_id: u32) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }
}

/// SAI next-hop group API.
#[async_trait]
pub trait NextHopGroupApi: Send + Sync {
    async fn create_next_hop_group(
        &self,
        group_type: NextHopGroupType,
    ) -> SaiResult<NextHopGroupOid>;

    async fn remove_next_hop_group(&self, group: NextHopGroupOid) -> SaiResult<()>;

    /// Creates members in one bulk call. The member id is null for every
    /// entry whose status is not success.
    async fn create_next_hop_group_members(
        &self,
        members: &[NextHopGroupMemberAttrs],
    ) -> Vec<(SaiStatus, NextHopGroupMemberOid)>;

    async fn remove_next_hop_group_members(
        &self,
        members: &[NextHopGroupMemberOid],
    ) -> Vec<SaiStatus>;
}
