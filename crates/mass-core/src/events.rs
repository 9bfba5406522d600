//! 結構變更事件與訂閱機制
//!
//! 組合體的每一類變更（零件增減、容器內容變更、組合體銷毀）
//! 透過事件匯流排同步廣播給訂閱者。訂閱返回 move-only 令牌，
//! 退訂時消耗令牌；未退訂即丟棄的令牌會在 debug 建置中被標記。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::resource::ContainerId;
use crate::structure::{AssemblyId, PartId};

/// 結構變更事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureEvent {
    /// 零件加入組合體
    PartAdded { assembly: AssemblyId, part: PartId },

    /// 零件從組合體移除
    PartRemoved { assembly: AssemblyId, part: PartId },

    /// 組合體銷毀（在任何資源釋放之前發出）
    AssemblyDestroyed { assembly: AssemblyId },

    /// 資源容器內容變更
    ContainerChanged {
        assembly: AssemblyId,
        container: ContainerId,
    },
}

impl StructureEvent {
    /// 事件所屬的組合體
    pub fn assembly(&self) -> AssemblyId {
        match *self {
            StructureEvent::PartAdded { assembly, .. }
            | StructureEvent::PartRemoved { assembly, .. }
            | StructureEvent::AssemblyDestroyed { assembly }
            | StructureEvent::ContainerChanged { assembly, .. } => assembly,
        }
    }
}

/// 事件監聽器（單執行緒協作模型，不要求 Send）
pub type Listener = Rc<dyn Fn(&StructureEvent)>;

/// 監聽器ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// 令牌對應的訂閱目標
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTarget {
    /// 組合體的零件加入通知
    PartAdded(AssemblyId),
    /// 組合體的零件移除通知
    PartRemoved(AssemblyId),
    /// 組合體的銷毀通知
    Destroyed(AssemblyId),
    /// 資源容器的內容變更通知
    Container(ContainerId),
}

/// 訂閱令牌
///
/// move-only：退訂時被 [`crate::Structure::unsubscribe`] 消耗。
/// 帶著有效訂閱被丟棄視為洩漏，在 debug 建置中觸發斷言。
#[must_use = "訂閱令牌必須透過 unsubscribe 消耗，否則訂閱會洩漏"]
#[derive(Debug)]
pub struct SubscriptionToken {
    target: TokenTarget,
    id: ListenerId,
    armed: bool,
}

impl SubscriptionToken {
    pub(crate) fn issue(target: TokenTarget, id: ListenerId) -> Self {
        Self {
            target,
            id,
            armed: true,
        }
    }

    /// 訂閱目標
    pub fn target(&self) -> TokenTarget {
        self.target
    }

    pub(crate) fn listener_id(&self) -> ListenerId {
        self.id
    }

    /// 標記令牌已被消耗（退訂完成後呼叫）
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        if self.armed && !std::thread::panicking() {
            tracing::error!("訂閱令牌未退訂即被丟棄: {:?}", self.target);
            debug_assert!(false, "訂閱令牌洩漏: {:?}", self.target);
        }
    }
}

/// 事件匯流排
///
/// 單一通知來源（某組合體的某類變更、或某容器的內容變更）
/// 對應一個匯流排。派發時先複製監聽器清單，
/// 監聽器回呼中發生的訂閱/退訂不影響本輪派發。
#[derive(Default)]
pub struct EventBus {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
}

impl EventBus {
    /// 創建空匯流排
    pub fn new() -> Self {
        Self::default()
    }

    /// 註冊監聽器
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    /// 移除監聽器；返回是否存在對應註冊
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() < before
    }

    /// 同步派發事件
    pub fn emit(&self, event: &StructureEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// 當前監聽器數量
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// 是否沒有監聽器
    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destroyed_event() -> StructureEvent {
        StructureEvent::AssemblyDestroyed {
            assembly: AssemblyId::new(),
        }
    }

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0u32));

        let count_clone = Rc::clone(&count);
        let id = bus.subscribe(Rc::new(move |_| {
            count_clone.set(count_clone.get() + 1);
        }));
        assert_eq!(bus.len(), 1);

        bus.emit(&destroyed_event());
        bus.emit(&destroyed_event());
        assert_eq!(count.get(), 2);

        assert!(bus.unsubscribe(id));
        assert!(bus.is_empty());

        // 退訂後不再收到事件
        bus.emit(&destroyed_event());
        assert_eq!(count.get(), 2);

        // 重複退訂返回 false
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let bus = EventBus::new();
        let a = bus.subscribe(Rc::new(|_| {}));
        let b = bus.subscribe(Rc::new(|_| {}));
        assert_ne!(a, b);

        assert!(bus.unsubscribe(a));
        assert_eq!(bus.len(), 1);
        assert!(bus.unsubscribe(b));
    }

    #[test]
    fn test_token_disarm_suppresses_leak_flag() {
        let mut token =
            SubscriptionToken::issue(TokenTarget::Destroyed(AssemblyId::new()), ListenerId(0));
        // 模擬退訂路徑：disarm 後丟棄不觸發斷言
        token.disarm();
        drop(token);
    }
}
