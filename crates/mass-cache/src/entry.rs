//! 緩存條目
//!
//! 每個被追蹤的組合體對應一個條目：固定貢獻增量維護、
//! 變動貢獻惰性重算，外加保持兩者正確所需的全部訂閱。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mass_core::{ContainerId, PartId, SubscriptionToken};

/// 變動聚合
///
/// 以帶標籤的狀態取代「數值 + 有效旗標」，
/// 使「讀到過期值」在結構上不可能發生。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableAggregate {
    /// 上次計算時所有已知容器計量之和
    Valid(f64),
    /// 自上次計算後有容器內容變更，待下次讀取時重算
    Dirty,
}

impl VariableAggregate {
    /// 有效時返回數值
    pub fn value(&self) -> Option<f64> {
        match *self {
            VariableAggregate::Valid(v) => Some(v),
            VariableAggregate::Dirty => None,
        }
    }

    /// 是否待重算
    pub fn is_dirty(&self) -> bool {
        matches!(self, VariableAggregate::Dirty)
    }
}

/// 條目狀態機：Untracked -> Building -> Tracked -> （淘汰後回到池中）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// 全量建構進行中（短暫、同步）；重入讀取返回目前累計值
    Building,
    /// 建構完成，增量維護中
    Tracked,
}

/// 單一容器的訂閱記錄
#[derive(Debug)]
pub(crate) struct ContainerSub {
    /// 容器所屬零件（零件移除時據此找到要退訂的容器）
    pub part: PartId,
    /// 內容變更訂閱令牌
    pub token: SubscriptionToken,
    /// 已折算進 Valid 聚合的計量（零件移除時據此精確回退）
    pub last_measure: f64,
}

/// 緩存條目
#[derive(Debug)]
pub struct CacheEntry {
    pub(crate) state: EntryState,

    /// 固定貢獻：當前所有零件靜態質量之和，增量維護
    pub(crate) constant_contribution: f64,

    /// 每零件已計入的靜態貢獻（移除時精確扣回，不重查定義目錄）
    pub(crate) part_static: HashMap<PartId, f64>,

    /// 變動貢獻
    pub(crate) variable: VariableAggregate,

    /// 每個已知容器一筆訂閱記錄
    pub(crate) containers: HashMap<ContainerId, ContainerSub>,

    /// 組合體層級的訂閱：零件加入、零件移除、銷毀
    pub(crate) structural_tokens: Vec<SubscriptionToken>,

    /// 最近一次讀取時刻（過期清掃依據）
    pub(crate) last_read_at: DateTime<Utc>,
}

impl CacheEntry {
    /// 創建全新（乾淨）條目
    pub(crate) fn new() -> Self {
        Self {
            state: EntryState::Building,
            constant_contribution: 0.0,
            part_static: HashMap::new(),
            variable: VariableAggregate::Dirty,
            containers: HashMap::new(),
            structural_tokens: Vec::new(),
            last_read_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// 固定貢獻
    pub fn constant_contribution(&self) -> f64 {
        self.constant_contribution
    }

    /// 變動聚合
    pub fn variable(&self) -> VariableAggregate {
        self.variable
    }

    /// 條目狀態
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// 最近讀取時刻
    pub fn last_read_at(&self) -> DateTime<Utc> {
        self.last_read_at
    }

    /// 當前持有的存活訂閱數
    pub fn live_subscriptions(&self) -> usize {
        self.structural_tokens.len() + self.containers.len()
    }

    /// 目前可觀測的總和（Building 重入讀取路徑：缺少的只是尚未掃到的元素）
    pub(crate) fn partial_sum(&self) -> f64 {
        self.constant_contribution + self.variable.value().unwrap_or(0.0)
    }

    /// 重設為乾淨預設值；呼叫前所有訂閱必須已被消耗
    pub(crate) fn reset(&mut self) {
        debug_assert_eq!(
            self.live_subscriptions(),
            0,
            "條目帶著存活訂閱被重設（池契約違規）"
        );
        self.state = EntryState::Building;
        self.constant_contribution = 0.0;
        self.part_static.clear();
        self.variable = VariableAggregate::Dirty;
        self.containers.clear();
        self.structural_tokens.clear();
        self.last_read_at = DateTime::<Utc>::UNIX_EPOCH;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_entry_is_clean() {
        let entry = CacheEntry::new();
        assert_eq!(entry.constant_contribution(), 0.0);
        assert!(entry.variable().is_dirty());
        assert_eq!(entry.live_subscriptions(), 0);
        assert_eq!(entry.last_read_at(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_variable_aggregate_value() {
        assert_eq!(VariableAggregate::Valid(5.0).value(), Some(5.0));
        assert_eq!(VariableAggregate::Dirty.value(), None);
        assert!(!VariableAggregate::Valid(0.0).is_dirty());
    }

    #[test]
    fn test_reset_clears_contributions() {
        let mut entry = CacheEntry::new();
        entry.state = EntryState::Tracked;
        entry.constant_contribution = 42.0;
        entry.part_static.insert(mass_core::PartId(1), 42.0);
        entry.variable = VariableAggregate::Valid(3.0);
        entry.last_read_at = Utc::now();

        entry.reset();

        assert_eq!(entry.state(), EntryState::Building);
        assert_eq!(entry.constant_contribution(), 0.0);
        assert!(entry.part_static.is_empty());
        assert!(entry.variable().is_dirty());
        assert_eq!(entry.last_read_at(), DateTime::<Utc>::UNIX_EPOCH);
    }
}
