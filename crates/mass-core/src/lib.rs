//! # Mass Core
//!
//! 核心資料模型與協作者介面：組合體、零件、資源容器、
//! 結構變更事件與訂閱機制

pub mod catalog;
pub mod events;
pub mod resource;
pub mod structure;

// Re-export 主要類型
pub use catalog::{DefinitionCatalog, PartCatalog, PartDefId, PartDefinition};
pub use events::{EventBus, Listener, ListenerId, StructureEvent, SubscriptionToken, TokenTarget};
pub use resource::{ContainerId, ResourceContainer};
pub use structure::{AssemblyId, PartId, PartView, Structure, StructureWorld};

/// 質量計算錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum MassError {
    #[error("找不到組合體: {0}")]
    AssemblyNotFound(AssemblyId),

    #[error("找不到零件: {0}")]
    PartNotFound(PartId),

    #[error("找不到資源容器: {0}")]
    ContainerNotFound(ContainerId),

    #[error("找不到零件定義: {0}")]
    DefinitionNotFound(PartDefId),

    #[error("其他錯誤: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MassError>;
