use serde::{Deserialize, Serialize};

/// 内部凭证使用的伪分组 ID
pub const INTERNAL_GROUP_ID: &str = "internal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Enabled,
    Disabled,
    Internal,
}

impl GroupStatus {
    pub fn from_db_value(v: i64) -> Self {
        match v {
            1 => GroupStatus::Enabled,
            3 => GroupStatus::Internal,
            _ => GroupStatus::Disabled,
        }
    }

    pub fn as_db_value(self) -> i64 {
        match self {
            GroupStatus::Enabled => 1,
            GroupStatus::Disabled => 2,
            GroupStatus::Internal => 3,
        }
    }
}

/// 分组（计费/租户单元）。余额由外部账本持有，不在缓存里
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCache {
    pub id: String,
    pub status: GroupStatus,
    pub rpm_ratio: f64,
}

impl GroupCache {
    pub fn internal() -> Self {
        Self {
            id: INTERNAL_GROUP_ID.to_string(),
            status: GroupStatus::Internal,
            rpm_ratio: 1.0,
        }
    }

    /// 只有 enabled / internal 分组可以放行
    pub fn is_admitted(&self) -> bool {
        matches!(self.status, GroupStatus::Enabled | GroupStatus::Internal)
    }

    pub fn bypasses_balance(&self) -> bool {
        self.status == GroupStatus::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_enabled_and_internal_are_admitted() {
        let mut g = GroupCache {
            id: "g1".into(),
            status: GroupStatus::Enabled,
            rpm_ratio: 1.0,
        };
        assert!(g.is_admitted());
        assert!(!g.bypasses_balance());
        g.status = GroupStatus::Disabled;
        assert!(!g.is_admitted());
        assert!(GroupCache::internal().is_admitted());
        assert!(GroupCache::internal().bypasses_balance());
    }

    #[test]
    fn unknown_status_values_are_disabled() {
        assert_eq!(GroupStatus::from_db_value(42), GroupStatus::Disabled);
        assert_eq!(
            GroupStatus::from_db_value(GroupStatus::Internal.as_db_value()),
            GroupStatus::Internal
        );
    }
}
