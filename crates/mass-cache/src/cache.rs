//! 組合體質量緩存
//!
//! 追蹤表：組合體 -> 緩存條目。讀取時若組合體自身的權威質量
//! 可用則直接返回（多數讀取完全不經過緩存）；否則走增量緩存：
//! 首次讀取全量建構並掛上訂閱，其後固定貢獻由結構事件增量維護、
//! 變動貢獻在失效後的下一次讀取時惰性重算。
//!
//! 監聽器只負責把事件複製進暫存佇列；所有緩存變更都在
//! `get_aggregate` / `evict` / `sweep_expired` 內套用，
//! 回呼絕不重入改動追蹤表。

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use mass_core::{
    AssemblyId, ContainerId, DefinitionCatalog, Listener, PartDefId, Structure, StructureEvent,
};

use crate::entry::{CacheEntry, ContainerSub, EntryState, VariableAggregate};
use crate::pool::MemberPool;
use crate::{CacheConfig, CacheStats};

/// 組合體質量緩存
pub struct AssemblyMassCache {
    /// 追蹤表：每個被追蹤的組合體恰有一個條目
    entries: HashMap<AssemblyId, CacheEntry>,

    /// 退役條目的自由清單
    pool: MemberPool,

    /// 監聽器暫存的待套用事件
    pending: Rc<RefCell<VecDeque<StructureEvent>>>,

    config: CacheConfig,
    stats: CacheStats,
}

impl Default for AssemblyMassCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AssemblyMassCache {
    /// 創建預設配置的緩存
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// 創建指定配置的緩存
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            pool: MemberPool::new(),
            pending: Rc::new(RefCell::new(VecDeque::new())),
            config,
            stats: CacheStats::default(),
        }
    }

    /// 讀取組合體的總質量
    ///
    /// 未追蹤的組合體先全量建構（掛上訂閱）；已追蹤的組合體
    /// 只在變動貢獻失效時重算。先於本次讀取發出的通知
    /// 保證被本次讀取觀測到。
    pub fn get_aggregate(
        &mut self,
        structure: &dyn Structure,
        catalog: &dyn DefinitionCatalog,
        assembly: AssemblyId,
        now: DateTime<Utc>,
    ) -> f64 {
        self.drain_pending(structure, catalog);

        // 權威短路：結構自身已知總質量時完全不經過緩存
        let direct = structure.authoritative_mass(assembly);
        if direct != 0.0 {
            return direct;
        }

        if !self.entries.contains_key(&assembly) {
            return self.full_build(structure, catalog, assembly, now);
        }

        if let Some(entry) = self.entries.get_mut(&assembly) {
            // 重入讀取撞上建構中的條目：返回目前累計值，不新增訂閱
            if entry.state() == EntryState::Building {
                return entry.partial_sum();
            }

            if entry.variable().is_dirty() {
                Self::recompute_variable(structure, entry);
                self.stats.variable_recomputes += 1;
            }

            entry.last_read_at = now;
            entry.constant_contribution + entry.variable().value().unwrap_or(0.0)
        } else {
            0.0
        }
    }

    /// 顯式淘汰：退訂全部令牌、重設條目並歸還物件池
    ///
    /// 冪等：淘汰不存在的組合體是 no-op，返回 false。
    pub fn evict(&mut self, structure: &dyn Structure, assembly: AssemblyId) -> bool {
        let Some(mut entry) = self.entries.remove(&assembly) else {
            return false;
        };

        for token in entry.structural_tokens.drain(..) {
            structure.unsubscribe(token);
        }
        for (_, sub) in entry.containers.drain() {
            structure.unsubscribe(sub.token);
        }

        self.pool.release(entry);
        self.stats.evictions += 1;
        tracing::debug!("淘汰組合體緩存條目: {}", assembly);
        true
    }

    /// 過期清掃：淘汰超過過期窗口未被讀取的條目
    ///
    /// 兩段式：先收集過期鍵，再逐一淘汰，絕不邊迭代邊改動追蹤表。
    /// 返回淘汰的條目數。
    pub fn sweep_expired(
        &mut self,
        structure: &dyn Structure,
        catalog: &dyn DefinitionCatalog,
        now: DateTime<Utc>,
    ) -> usize {
        self.drain_pending(structure, catalog);

        let expired: Vec<AssemblyId> = self
            .entries
            .iter()
            .filter(|(_, entry)| now - entry.last_read_at > self.config.expiry_window)
            .map(|(id, _)| *id)
            .collect();

        for assembly in &expired {
            if self.evict(structure, *assembly) {
                self.stats.expired_evictions += 1;
            }
        }

        if !expired.is_empty() {
            tracing::debug!("過期清掃淘汰 {} 個條目", expired.len());
        }
        expired.len()
    }

    /// 淘汰所有條目（宿主拆卸時呼叫）
    pub fn clear(&mut self, structure: &dyn Structure) {
        let tracked: Vec<AssemblyId> = self.entries.keys().copied().collect();
        for assembly in tracked {
            self.evict(structure, assembly);
        }
    }

    /// 組合體是否已被追蹤
    pub fn is_tracked(&self, assembly: AssemblyId) -> bool {
        self.entries.contains_key(&assembly)
    }

    /// 追蹤中的條目數
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否沒有追蹤中的條目
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 尚未套用的事件數
    pub fn pending_events(&self) -> usize {
        self.pending.borrow().len()
    }

    /// 統計快照
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// 緩存配置
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 物件池（觀測重用情況）
    pub fn pool(&self) -> &MemberPool {
        &self.pool
    }

    /// 所有訂閱共用的監聽器：只把事件複製進暫存佇列
    fn listener(&self) -> Listener {
        let pending = Rc::clone(&self.pending);
        Rc::new(move |event: &StructureEvent| {
            pending.borrow_mut().push_back(*event);
        })
    }

    /// 首次讀取：全量掃描一次並掛上全部訂閱
    ///
    /// 條目先以 Building 狀態進入追蹤表，掃描過程中逐零件累計，
    /// 因此重入讀取看到的永遠是「目前為止的和」而非半初始化值。
    fn full_build(
        &mut self,
        structure: &dyn Structure,
        catalog: &dyn DefinitionCatalog,
        assembly: AssemblyId,
        now: DateTime<Utc>,
    ) -> f64 {
        tracing::debug!("全量建構組合體緩存條目: {}", assembly);
        self.stats.full_builds += 1;

        let mut entry = self.pool.acquire();
        entry.state = EntryState::Building;
        entry.variable = VariableAggregate::Valid(0.0);
        entry.last_read_at = now;
        self.entries.insert(assembly, entry);

        let mut views = Vec::new();
        if let Err(err) = structure.for_each_part(assembly, &mut |view| views.push(view)) {
            tracing::warn!("遍歷組合體失敗: {}: {}", assembly, err);
        }

        let listener = self.listener();
        for view in views {
            let static_c = Self::static_for(catalog, view.def);

            let mut subs = Vec::with_capacity(view.containers.len());
            for container in &view.containers {
                match structure.subscribe_content_changed(*container, Rc::clone(&listener)) {
                    Ok(token) => {
                        let measure = Self::measure_or_zero(structure, *container);
                        subs.push((
                            *container,
                            ContainerSub {
                                part: view.id,
                                token,
                                last_measure: measure,
                            },
                        ));
                    }
                    Err(err) => tracing::warn!("訂閱容器失敗: {}: {}", container, err),
                }
            }

            if let Some(entry) = self.entries.get_mut(&assembly) {
                entry.constant_contribution += static_c;
                entry.part_static.insert(view.id, static_c);
                for (container, sub) in subs {
                    if let VariableAggregate::Valid(v) = entry.variable {
                        entry.variable = VariableAggregate::Valid(v + sub.last_measure);
                    }
                    entry.containers.insert(container, sub);
                }
            } else {
                for (_, sub) in subs {
                    structure.unsubscribe(sub.token);
                }
            }
        }
        self.stats.variable_recomputes += 1;

        let mut structural = Vec::with_capacity(3);
        for subscription in [
            structure.subscribe_part_added(assembly, Rc::clone(&listener)),
            structure.subscribe_part_removed(assembly, Rc::clone(&listener)),
            structure.subscribe_destroyed(assembly, listener),
        ] {
            match subscription {
                Ok(token) => structural.push(token),
                Err(err) => tracing::warn!("訂閱結構通知失敗: {}: {}", assembly, err),
            }
        }

        if let Some(entry) = self.entries.get_mut(&assembly) {
            entry.structural_tokens.extend(structural);
            entry.state = EntryState::Tracked;
            entry.last_read_at = now;
            entry.partial_sum()
        } else {
            for token in structural {
                structure.unsubscribe(token);
            }
            0.0
        }
    }

    /// 套用暫存佇列中的全部事件（讀取與清掃的第一步）
    fn drain_pending(&mut self, structure: &dyn Structure, catalog: &dyn DefinitionCatalog) {
        loop {
            let event = self.pending.borrow_mut().pop_front();
            let Some(event) = event else { break };
            self.apply_event(structure, catalog, event);
        }
    }

    fn apply_event(
        &mut self,
        structure: &dyn Structure,
        catalog: &dyn DefinitionCatalog,
        event: StructureEvent,
    ) {
        self.stats.events_applied += 1;

        match event {
            StructureEvent::PartAdded { assembly, part } => {
                // 未追蹤的組合體（條目已淘汰）：事件直接忽略
                let (variable_valid, duplicate) = match self.entries.get(&assembly) {
                    Some(entry) => (
                        !entry.variable().is_dirty(),
                        entry.part_static.contains_key(&part),
                    ),
                    None => return,
                };
                if duplicate {
                    return;
                }

                let Some(view) = structure.part_view(part) else {
                    // 零件在事件套用前已再度消失；等同加入後立即移除
                    return;
                };

                let static_c = Self::static_for(catalog, view.def);

                let listener = self.listener();
                let mut subs = Vec::with_capacity(view.containers.len());
                for container in &view.containers {
                    match structure.subscribe_content_changed(*container, Rc::clone(&listener)) {
                        Ok(token) => {
                            // 變動聚合失效中則不讀計量，交給下次重算
                            let measure = if variable_valid {
                                Self::measure_or_zero(structure, *container)
                            } else {
                                0.0
                            };
                            subs.push((
                                *container,
                                ContainerSub {
                                    part,
                                    token,
                                    last_measure: measure,
                                },
                            ));
                        }
                        Err(err) => tracing::warn!("訂閱容器失敗: {}: {}", container, err),
                    }
                }

                if let Some(entry) = self.entries.get_mut(&assembly) {
                    entry.constant_contribution += static_c;
                    entry.part_static.insert(part, static_c);
                    for (container, sub) in subs {
                        if let VariableAggregate::Valid(v) = entry.variable {
                            entry.variable = VariableAggregate::Valid(v + sub.last_measure);
                        }
                        entry.containers.insert(container, sub);
                    }
                } else {
                    for (_, sub) in subs {
                        structure.unsubscribe(sub.token);
                    }
                }
            }

            StructureEvent::PartRemoved { assembly, part } => {
                let Some(entry) = self.entries.get_mut(&assembly) else {
                    return;
                };

                let static_c = entry.part_static.remove(&part).unwrap_or(0.0);
                entry.constant_contribution -= static_c;

                let removed: Vec<ContainerId> = entry
                    .containers
                    .iter()
                    .filter(|(_, sub)| sub.part == part)
                    .map(|(container, _)| *container)
                    .collect();
                for container in removed {
                    if let Some(sub) = entry.containers.remove(&container) {
                        // 失效中的聚合沒有可修正的值，留給下次全量重算
                        if let VariableAggregate::Valid(v) = entry.variable {
                            entry.variable = VariableAggregate::Valid(v - sub.last_measure);
                        }
                        structure.unsubscribe(sub.token);
                    }
                }
            }

            StructureEvent::ContainerChanged { assembly, container } => {
                let Some(entry) = self.entries.get_mut(&assembly) else {
                    return;
                };
                // 只標記失效，不立即重算：兩次讀取之間的 N 次變更
                // 合併為一次重算
                if entry.containers.contains_key(&container) && !entry.variable().is_dirty() {
                    entry.variable = VariableAggregate::Dirty;
                    self.stats.invalidations += 1;
                }
            }

            StructureEvent::AssemblyDestroyed { assembly } => {
                self.evict(structure, assembly);
            }
        }
    }

    /// 惰性重算：遍歷條目已知的全部容器重新求和
    fn recompute_variable(structure: &dyn Structure, entry: &mut CacheEntry) {
        let mut sum = 0.0;
        for (container, sub) in entry.containers.iter_mut() {
            let measure = Self::measure_or_zero(structure, *container);
            sub.last_measure = measure;
            sum += measure;
        }
        entry.variable = VariableAggregate::Valid(sum);
    }

    /// 零件的靜態貢獻：無碰撞結構的零件不計入，
    /// 即使定義帶有質量屬性（與權威質量計算的行為一致）
    fn static_for(catalog: &dyn DefinitionCatalog, def: PartDefId) -> f64 {
        match catalog.has_collidable_structure(def) {
            Ok(false) => 0.0,
            Ok(true) => match catalog.static_contribution(def) {
                Ok(mass) => mass,
                Err(err) => {
                    tracing::warn!("讀取零件定義失敗，按零貢獻處理: {}: {}", def, err);
                    0.0
                }
            },
            Err(err) => {
                tracing::warn!("讀取零件定義失敗，按零貢獻處理: {}: {}", def, err);
                0.0
            }
        }
    }

    fn measure_or_zero(structure: &dyn Structure, container: ContainerId) -> f64 {
        match structure.current_measure(container) {
            Ok(measure) => measure,
            Err(err) => {
                tracing::warn!("讀取容器計量失敗，按零處理: {}: {}", container, err);
                0.0
            }
        }
    }
}
