//! 條目物件池
//!
//! 退役條目的自由清單，避免頻繁查詢/淘汰循環下的配置抖動。
//! 池中永遠不存在帶有存活訂閱的條目。

use crate::entry::CacheEntry;

/// 條目物件池
#[derive(Debug, Default)]
pub struct MemberPool {
    free: Vec<CacheEntry>,
    reused: u64,
    allocated: u64,
}

impl MemberPool {
    /// 創建空池
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出條目：優先重用池中條目，否則新配置
    ///
    /// 取出的條目保證處於乾淨預設狀態：貢獻歸零、變動聚合為
    /// Dirty、訂閱集合為空，前一任使用者不留任何可見殘餘。
    pub fn acquire(&mut self) -> CacheEntry {
        match self.free.pop() {
            Some(entry) => {
                self.reused += 1;
                entry
            }
            None => {
                self.allocated += 1;
                CacheEntry::new()
            }
        }
    }

    /// 歸還條目；條目必須已無存活訂閱
    pub fn release(&mut self, mut entry: CacheEntry) {
        debug_assert_eq!(
            entry.live_subscriptions(),
            0,
            "條目帶著存活訂閱被歸還（池契約違規）"
        );
        entry.reset();
        self.free.push(entry);
    }

    /// 池中可重用條目數
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// 池是否為空
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// 累計重用次數
    pub fn reused(&self) -> u64 {
        self.reused
    }

    /// 累計新配置次數
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryState, VariableAggregate};
    use chrono::Utc;

    #[test]
    fn test_acquire_from_empty_pool_allocates() {
        let mut pool = MemberPool::new();
        let entry = pool.acquire();
        assert_eq!(entry.constant_contribution(), 0.0);
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.reused(), 0);
    }

    #[test]
    fn test_release_then_acquire_reuses_clean_entry() {
        let mut pool = MemberPool::new();
        let mut entry = pool.acquire();

        // 模擬使用過的條目（不帶訂閱）
        entry.state = EntryState::Tracked;
        entry.constant_contribution = 35.0;
        entry.part_static.insert(mass_core::PartId(3), 35.0);
        entry.variable = VariableAggregate::Valid(5.0);
        entry.last_read_at = Utc::now();

        pool.release(entry);
        assert_eq!(pool.len(), 1);

        let reused = pool.acquire();
        assert!(pool.is_empty());
        assert_eq!(pool.reused(), 1);

        // 池重用潔淨性：沒有前一任使用者的殘餘
        assert_eq!(reused.constant_contribution(), 0.0);
        assert!(reused.variable().is_dirty());
        assert_eq!(reused.live_subscriptions(), 0);
    }
}
