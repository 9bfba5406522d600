//! 資源容器
//!
//! 附屬於零件的可變儲存，對外提供當前計量（已換算單位）
//! 與內容變更通知。

use serde::{Deserialize, Serialize};

use crate::events::EventBus;
use crate::structure::{AssemblyId, PartId};

/// 資源容器ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RC-{}", self.0)
    }
}

/// 資源容器
#[derive(Debug)]
pub struct ResourceContainer {
    /// 容器ID
    pub id: ContainerId,

    /// 所屬零件
    pub part: PartId,

    /// 所屬組合體
    pub assembly: AssemblyId,

    /// 當前計量（已換算單位的質量貢獻）
    measure: f64,

    /// 內容變更通知
    pub(crate) on_changed: EventBus,
}

impl ResourceContainer {
    pub(crate) fn new(id: ContainerId, part: PartId, assembly: AssemblyId, measure: f64) -> Self {
        Self {
            id,
            part,
            assembly,
            measure,
            on_changed: EventBus::new(),
        }
    }

    /// 當前計量
    pub fn current_measure(&self) -> f64 {
        self.measure
    }

    pub(crate) fn set_measure(&mut self, measure: f64) {
        self.measure = measure;
    }
}
