//! # Assembly Mass
//!
//! 組合體質量的增量聚合緩存。
//!
//! 對呼叫者只有兩個入口：讀取聚合質量
//! （[`AssemblyMassCache::get_aggregate`]）與排程器驅動的
//! 週期清掃（[`AssemblyMassCache::sweep_expired`]）。
//! 其餘皆為被觀察結構的協作者介面。

pub use mass_cache::{
    AssemblyMassCache, CacheConfig, CacheEntry, CacheStats, EntryState, MemberPool,
    VariableAggregate,
};
pub use mass_core::{
    AssemblyId, ContainerId, DefinitionCatalog, EventBus, Listener, ListenerId, MassError,
    PartCatalog, PartDefId, PartDefinition, PartId, PartView, ResourceContainer, Result,
    Structure, StructureEvent, StructureWorld, SubscriptionToken, TokenTarget,
};
