//! 組合體結構模型
//!
//! `StructureWorld` 是記憶體內的結構宿主：持有組合體、零件與
//! 資源容器，所有變更操作同步發出對應事件。緩存子系統只透過
//! [`Structure`] 介面觀察它，不擁有它。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::PartDefId;
use crate::events::{EventBus, Listener, StructureEvent, SubscriptionToken, TokenTarget};
use crate::resource::{ContainerId, ResourceContainer};
use crate::{MassError, Result};

/// 組合體ID（身份句柄：同一存活組合體的兩個句柄相等且雜湊相等）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyId(Uuid);

impl AssemblyId {
    /// 分配新的組合體ID
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for AssemblyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 零件ID（在所屬世界內唯一）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartId(pub u64);

impl std::fmt::Display for PartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// 零件視圖（遍歷與增量維護時的唯讀快照）
#[derive(Debug, Clone)]
pub struct PartView {
    /// 零件ID
    pub id: PartId,
    /// 零件定義
    pub def: PartDefId,
    /// 零件所附的資源容器
    pub containers: Vec<ContainerId>,
}

/// 結構協作者介面
///
/// 緩存透過此介面讀取結構並訂閱變更通知；訂閱／退訂成對，
/// 令牌由訂閱者持有並由同一訂閱者消耗。
pub trait Structure {
    /// 組合體自身的即時權威質量；0.0 表示不可用
    fn authoritative_mass(&self, assembly: AssemblyId) -> f64;

    /// 遍歷組合體當前所有零件（可重啟、有限）
    fn for_each_part(
        &self,
        assembly: AssemblyId,
        visitor: &mut dyn FnMut(PartView),
    ) -> Result<()>;

    /// 讀取單一零件的視圖（零件已不存在時返回 None）
    fn part_view(&self, part: PartId) -> Option<PartView>;

    /// 資源容器的當前計量
    fn current_measure(&self, container: ContainerId) -> Result<f64>;

    /// 訂閱零件加入通知
    fn subscribe_part_added(
        &self,
        assembly: AssemblyId,
        listener: Listener,
    ) -> Result<SubscriptionToken>;

    /// 訂閱零件移除通知
    fn subscribe_part_removed(
        &self,
        assembly: AssemblyId,
        listener: Listener,
    ) -> Result<SubscriptionToken>;

    /// 訂閱組合體銷毀通知
    fn subscribe_destroyed(
        &self,
        assembly: AssemblyId,
        listener: Listener,
    ) -> Result<SubscriptionToken>;

    /// 訂閱容器內容變更通知
    fn subscribe_content_changed(
        &self,
        container: ContainerId,
        listener: Listener,
    ) -> Result<SubscriptionToken>;

    /// 退訂並消耗令牌
    ///
    /// 目標已不存在（組合體已銷毀）時為安全的 no-op，
    /// 令牌仍被消耗；返回是否移除了存活的註冊。
    fn unsubscribe(&self, token: SubscriptionToken) -> bool;
}

#[derive(Debug)]
struct AssemblyRecord {
    /// 當前零件清單（組合體自身的迭代順序）
    parts: Vec<PartId>,
    /// 即時權威質量；0.0 表示未設置
    authoritative_mass: f64,
    on_part_added: EventBus,
    on_part_removed: EventBus,
    on_destroyed: EventBus,
}

impl AssemblyRecord {
    fn new() -> Self {
        Self {
            parts: Vec::new(),
            authoritative_mass: 0.0,
            on_part_added: EventBus::new(),
            on_part_removed: EventBus::new(),
            on_destroyed: EventBus::new(),
        }
    }
}

#[derive(Debug)]
struct PartRecord {
    assembly: AssemblyId,
    def: PartDefId,
    containers: Vec<ContainerId>,
}

/// 記憶體內結構世界
#[derive(Debug, Default)]
pub struct StructureWorld {
    assemblies: HashMap<AssemblyId, AssemblyRecord>,
    parts: HashMap<PartId, PartRecord>,
    containers: HashMap<ContainerId, ResourceContainer>,
    next_part_id: u64,
    next_container_id: u64,
}

impl StructureWorld {
    /// 創建空世界
    pub fn new() -> Self {
        Self::default()
    }

    /// 生成新組合體
    pub fn spawn_assembly(&mut self) -> AssemblyId {
        let id = AssemblyId::new();
        self.assemblies.insert(id, AssemblyRecord::new());
        tracing::debug!("生成組合體: {}", id);
        id
    }

    /// 設置組合體的即時權威質量（0.0 表示不可用）
    pub fn set_authoritative_mass(&mut self, assembly: AssemblyId, mass: f64) -> Result<()> {
        let record = self
            .assemblies
            .get_mut(&assembly)
            .ok_or(MassError::AssemblyNotFound(assembly))?;
        record.authoritative_mass = mass;
        Ok(())
    }

    /// 加入零件（連同其資源容器的初始計量），發出零件加入事件
    pub fn add_part(
        &mut self,
        assembly: AssemblyId,
        def: PartDefId,
        container_measures: &[f64],
    ) -> Result<PartId> {
        if !self.assemblies.contains_key(&assembly) {
            return Err(MassError::AssemblyNotFound(assembly));
        }

        let part = PartId(self.next_part_id);
        self.next_part_id += 1;

        let mut containers = Vec::with_capacity(container_measures.len());
        for &measure in container_measures {
            let cid = ContainerId(self.next_container_id);
            self.next_container_id += 1;
            self.containers
                .insert(cid, ResourceContainer::new(cid, part, assembly, measure));
            containers.push(cid);
        }

        self.parts.insert(
            part,
            PartRecord {
                assembly,
                def,
                containers,
            },
        );

        // contains_key 已驗證存在
        if let Some(record) = self.assemblies.get_mut(&assembly) {
            record.parts.push(part);
            record
                .on_part_added
                .emit(&StructureEvent::PartAdded { assembly, part });
        }

        Ok(part)
    }

    /// 移除零件及其容器，發出零件移除事件
    pub fn remove_part(&mut self, part: PartId) -> Result<()> {
        let record = self
            .parts
            .remove(&part)
            .ok_or(MassError::PartNotFound(part))?;

        for cid in &record.containers {
            self.containers.remove(cid);
        }

        if let Some(assembly) = self.assemblies.get_mut(&record.assembly) {
            assembly.parts.retain(|p| *p != part);
            assembly.on_part_removed.emit(&StructureEvent::PartRemoved {
                assembly: record.assembly,
                part,
            });
        }

        Ok(())
    }

    /// 設置容器計量，發出內容變更事件
    pub fn set_measure(&mut self, container: ContainerId, measure: f64) -> Result<()> {
        let record = self
            .containers
            .get_mut(&container)
            .ok_or(MassError::ContainerNotFound(container))?;
        record.set_measure(measure);

        let event = StructureEvent::ContainerChanged {
            assembly: record.assembly,
            container,
        };
        record.on_changed.emit(&event);
        Ok(())
    }

    /// 銷毀組合體
    ///
    /// 不變式：銷毀通知在任何資源釋放之前發出。
    pub fn destroy_assembly(&mut self, assembly: AssemblyId) -> Result<()> {
        {
            let record = self
                .assemblies
                .get(&assembly)
                .ok_or(MassError::AssemblyNotFound(assembly))?;
            record
                .on_destroyed
                .emit(&StructureEvent::AssemblyDestroyed { assembly });
        }

        if let Some(record) = self.assemblies.remove(&assembly) {
            for part in record.parts {
                if let Some(part_record) = self.parts.remove(&part) {
                    for cid in part_record.containers {
                        self.containers.remove(&cid);
                    }
                }
            }
        }
        tracing::debug!("銷毀組合體: {}", assembly);
        Ok(())
    }

    /// 組合體是否仍存活
    pub fn is_alive(&self, assembly: AssemblyId) -> bool {
        self.assemblies.contains_key(&assembly)
    }

    /// 組合體當前零件數
    pub fn part_count(&self, assembly: AssemblyId) -> usize {
        self.assemblies
            .get(&assembly)
            .map(|r| r.parts.len())
            .unwrap_or(0)
    }

    /// 組合體三個結構通知匯流排上的監聽器總數（測試觀測用）
    pub fn structural_listener_count(&self, assembly: AssemblyId) -> usize {
        self.assemblies
            .get(&assembly)
            .map(|r| r.on_part_added.len() + r.on_part_removed.len() + r.on_destroyed.len())
            .unwrap_or(0)
    }

    /// 容器內容變更匯流排上的監聽器數（測試觀測用）
    pub fn container_listener_count(&self, container: ContainerId) -> usize {
        self.containers
            .get(&container)
            .map(|c| c.on_changed.len())
            .unwrap_or(0)
    }
}

impl Structure for StructureWorld {
    fn authoritative_mass(&self, assembly: AssemblyId) -> f64 {
        self.assemblies
            .get(&assembly)
            .map(|r| r.authoritative_mass)
            .unwrap_or(0.0)
    }

    fn for_each_part(
        &self,
        assembly: AssemblyId,
        visitor: &mut dyn FnMut(PartView),
    ) -> Result<()> {
        let record = self
            .assemblies
            .get(&assembly)
            .ok_or(MassError::AssemblyNotFound(assembly))?;
        for part in &record.parts {
            if let Some(view) = self.part_view(*part) {
                visitor(view);
            }
        }
        Ok(())
    }

    fn part_view(&self, part: PartId) -> Option<PartView> {
        self.parts.get(&part).map(|r| PartView {
            id: part,
            def: r.def,
            containers: r.containers.clone(),
        })
    }

    fn current_measure(&self, container: ContainerId) -> Result<f64> {
        self.containers
            .get(&container)
            .map(|c| c.current_measure())
            .ok_or(MassError::ContainerNotFound(container))
    }

    fn subscribe_part_added(
        &self,
        assembly: AssemblyId,
        listener: Listener,
    ) -> Result<SubscriptionToken> {
        let record = self
            .assemblies
            .get(&assembly)
            .ok_or(MassError::AssemblyNotFound(assembly))?;
        let id = record.on_part_added.subscribe(listener);
        Ok(SubscriptionToken::issue(TokenTarget::PartAdded(assembly), id))
    }

    fn subscribe_part_removed(
        &self,
        assembly: AssemblyId,
        listener: Listener,
    ) -> Result<SubscriptionToken> {
        let record = self
            .assemblies
            .get(&assembly)
            .ok_or(MassError::AssemblyNotFound(assembly))?;
        let id = record.on_part_removed.subscribe(listener);
        Ok(SubscriptionToken::issue(
            TokenTarget::PartRemoved(assembly),
            id,
        ))
    }

    fn subscribe_destroyed(
        &self,
        assembly: AssemblyId,
        listener: Listener,
    ) -> Result<SubscriptionToken> {
        let record = self
            .assemblies
            .get(&assembly)
            .ok_or(MassError::AssemblyNotFound(assembly))?;
        let id = record.on_destroyed.subscribe(listener);
        Ok(SubscriptionToken::issue(TokenTarget::Destroyed(assembly), id))
    }

    fn subscribe_content_changed(
        &self,
        container: ContainerId,
        listener: Listener,
    ) -> Result<SubscriptionToken> {
        let record = self
            .containers
            .get(&container)
            .ok_or(MassError::ContainerNotFound(container))?;
        let id = record.on_changed.subscribe(listener);
        Ok(SubscriptionToken::issue(TokenTarget::Container(container), id))
    }

    fn unsubscribe(&self, mut token: SubscriptionToken) -> bool {
        let removed = match token.target() {
            TokenTarget::PartAdded(assembly) => self
                .assemblies
                .get(&assembly)
                .map(|r| r.on_part_added.unsubscribe(token.listener_id()))
                .unwrap_or(false),
            TokenTarget::PartRemoved(assembly) => self
                .assemblies
                .get(&assembly)
                .map(|r| r.on_part_removed.unsubscribe(token.listener_id()))
                .unwrap_or(false),
            TokenTarget::Destroyed(assembly) => self
                .assemblies
                .get(&assembly)
                .map(|r| r.on_destroyed.unsubscribe(token.listener_id()))
                .unwrap_or(false),
            TokenTarget::Container(container) => self
                .containers
                .get(&container)
                .map(|c| c.on_changed.unsubscribe(token.listener_id()))
                .unwrap_or(false),
        };
        token.disarm();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_listener(log: &Rc<RefCell<Vec<StructureEvent>>>) -> Listener {
        let log = Rc::clone(log);
        Rc::new(move |ev| log.borrow_mut().push(*ev))
    }

    #[test]
    fn test_add_part_emits_event() {
        let mut world = StructureWorld::new();
        let assembly = world.spawn_assembly();

        let log = Rc::new(RefCell::new(Vec::new()));
        let token = world
            .subscribe_part_added(assembly, recording_listener(&log))
            .unwrap();

        let part = world.add_part(assembly, PartDefId(1), &[]).unwrap();

        assert_eq!(
            log.borrow().as_slice(),
            &[StructureEvent::PartAdded { assembly, part }]
        );
        assert_eq!(world.part_count(assembly), 1);

        assert!(world.unsubscribe(token));
    }

    #[test]
    fn test_remove_part_drops_containers() {
        let mut world = StructureWorld::new();
        let assembly = world.spawn_assembly();
        let part = world.add_part(assembly, PartDefId(1), &[5.0, 3.0]).unwrap();

        let view = world.part_view(part).unwrap();
        assert_eq!(view.containers.len(), 2);
        let container = view.containers[0];
        assert_eq!(world.current_measure(container).unwrap(), 5.0);

        world.remove_part(part).unwrap();
        assert!(world.part_view(part).is_none());
        assert!(world.current_measure(container).is_err());
        assert_eq!(world.part_count(assembly), 0);
    }

    #[test]
    fn test_set_measure_emits_container_changed() {
        let mut world = StructureWorld::new();
        let assembly = world.spawn_assembly();
        let part = world.add_part(assembly, PartDefId(1), &[5.0]).unwrap();
        let container = world.part_view(part).unwrap().containers[0];

        let log = Rc::new(RefCell::new(Vec::new()));
        let token = world
            .subscribe_content_changed(container, recording_listener(&log))
            .unwrap();

        world.set_measure(container, 8.0).unwrap();
        assert_eq!(world.current_measure(container).unwrap(), 8.0);
        assert_eq!(
            log.borrow().as_slice(),
            &[StructureEvent::ContainerChanged {
                assembly,
                container
            }]
        );

        assert!(world.unsubscribe(token));
    }

    #[test]
    fn test_destroy_notifies_before_release() {
        let mut world = StructureWorld::new();
        let assembly = world.spawn_assembly();
        world.add_part(assembly, PartDefId(1), &[1.0]).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let token = world
            .subscribe_destroyed(assembly, recording_listener(&log))
            .unwrap();

        world.destroy_assembly(assembly).unwrap();
        assert_eq!(
            log.borrow().as_slice(),
            &[StructureEvent::AssemblyDestroyed { assembly }]
        );
        assert!(!world.is_alive(assembly));

        // 目標已銷毀：退訂是安全的 no-op，令牌仍被消耗
        assert!(!world.unsubscribe(token));
    }

    #[test]
    fn test_for_each_part_iterates_in_order() {
        let mut world = StructureWorld::new();
        let assembly = world.spawn_assembly();
        let a = world.add_part(assembly, PartDefId(1), &[]).unwrap();
        let b = world.add_part(assembly, PartDefId(2), &[1.0]).unwrap();

        let mut seen = Vec::new();
        world
            .for_each_part(assembly, &mut |view| seen.push(view.id))
            .unwrap();
        assert_eq!(seen, vec![a, b]);

        assert!(world
            .for_each_part(AssemblyId::new(), &mut |_| {})
            .is_err());
    }
}
