//! Work kinds a manager can be handed through its queue

use std::fmt;

use crate::balancer::START_CHILD_INSTANCE_TAG;

const LEAD_MANAGER_TAG: &str = "LeadManager";
const PEER_MANAGER_TAG: &str = "PeerManager";

/// What a claimed manager work item asks for, decoded from its work tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkKind {
    /// Become the lead manager of the cluster
    LeadManager,
    /// Run as a peer manager on a secondary service node
    PeerManager,
    /// Start one adapter instance on behalf of the lead manager
    StartAdditionalChildAdapterInstance,
    /// Any tag this manager does not understand
    Unexpected(String),
}

impl WorkKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            LEAD_MANAGER_TAG => Self::LeadManager,
            PEER_MANAGER_TAG => Self::PeerManager,
            START_CHILD_INSTANCE_TAG => Self::StartAdditionalChildAdapterInstance,
            other => Self::Unexpected(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::LeadManager => LEAD_MANAGER_TAG,
            Self::PeerManager => PEER_MANAGER_TAG,
            Self::StartAdditionalChildAdapterInstance => START_CHILD_INSTANCE_TAG,
            Self::Unexpected(tag) => tag,
        }
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags() {
        assert_eq!(WorkKind::from_tag("LeadManager"), WorkKind::LeadManager);
        assert_eq!(WorkKind::from_tag("PeerManager"), WorkKind::PeerManager);
        assert_eq!(
            WorkKind::from_tag("StartAdditionalChildAdapterInstance"),
            WorkKind::StartAdditionalChildAdapterInstance
        );
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let kind = WorkKind::from_tag("leadmanager");
        assert_eq!(kind, WorkKind::Unexpected("leadmanager".to_string()));
        assert_eq!(kind.to_string(), "leadmanager");
    }
}
