//! # Mass Cache
//!
//! 組合體質量的增量聚合緩存：避免每次讀取都全量重算，
//! 在結構變更事件驅動下增量維護，並以週期性清掃回收
//! 久未讀取的條目。

pub mod cache;
pub mod entry;
pub mod pool;

// Re-export 主要類型
pub use cache::AssemblyMassCache;
pub use entry::{CacheEntry, EntryState, VariableAggregate};
pub use pool::MemberPool;

use chrono::Duration;

/// 緩存配置
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// 條目過期窗口：超過此時間未被讀取的條目會在清掃中被淘汰
    pub expiry_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_window: Duration::seconds(60),
        }
    }
}

impl CacheConfig {
    /// 創建預設配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：設置過期窗口
    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }
}

/// 緩存統計
///
/// 計數器供測試與診斷觀測：全量建構、變動聚合重算、
/// 失效、事件套用與淘汰次數。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 全量建構次數
    pub full_builds: u64,
    /// 變動聚合計算次數（含建構時的初始聚合）
    pub variable_recomputes: u64,
    /// 變動聚合失效次數（容器內容變更）
    pub invalidations: u64,
    /// 已套用的結構事件數
    pub events_applied: u64,
    /// 淘汰次數（顯式淘汰與銷毀）
    pub evictions: u64,
    /// 其中因過期清掃而淘汰的次數
    pub expired_evictions: u64,
}
