//! 零件定義目錄
//!
//! 零件的靜態屬性（乾質量、是否具有碰撞結構）來自其不可變定義，
//! 與運行期狀態無關。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{MassError, Result};

/// 零件定義ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartDefId(pub u32);

impl std::fmt::Display for PartDefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DEF-{}", self.0)
    }
}

/// 零件定義
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartDefinition {
    /// 定義ID
    pub def_id: PartDefId,

    /// 零件名稱
    pub name: String,

    /// 乾質量（結構質量，已換算單位）
    pub dry_mass: f64,

    /// 是否具有碰撞結構
    ///
    /// 沒有碰撞結構的零件不參與結構質量統計，
    /// 即使定義中帶有質量屬性（與權威質量計算的行為一致）。
    pub collidable: bool,
}

impl PartDefinition {
    /// 創建新的零件定義
    pub fn new(def_id: PartDefId, name: impl Into<String>, dry_mass: f64, collidable: bool) -> Self {
        Self {
            def_id,
            name: name.into(),
            dry_mass,
            collidable,
        }
    }
}

/// 定義目錄協作者介面（唯讀）
pub trait DefinitionCatalog {
    /// 獲取定義的靜態質量貢獻（未經碰撞結構過濾）
    fn static_contribution(&self, def_id: PartDefId) -> Result<f64>;

    /// 檢查定義是否具有碰撞結構
    fn has_collidable_structure(&self, def_id: PartDefId) -> Result<bool>;
}

/// 記憶體內零件定義目錄
#[derive(Debug, Clone, Default)]
pub struct PartCatalog {
    defs: HashMap<PartDefId, PartDefinition>,
}

impl PartCatalog {
    /// 創建空目錄
    pub fn new() -> Self {
        Self::default()
    }

    /// 註冊零件定義
    pub fn insert(&mut self, def: PartDefinition) {
        self.defs.insert(def.def_id, def);
    }

    /// 建構器模式：註冊零件定義
    pub fn with_definition(mut self, def: PartDefinition) -> Self {
        self.insert(def);
        self
    }

    /// 獲取零件定義
    pub fn get(&self, def_id: PartDefId) -> Option<&PartDefinition> {
        self.defs.get(&def_id)
    }

    /// 定義數量
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// 是否為空
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl DefinitionCatalog for PartCatalog {
    fn static_contribution(&self, def_id: PartDefId) -> Result<f64> {
        self.defs
            .get(&def_id)
            .map(|d| d.dry_mass)
            .ok_or(MassError::DefinitionNotFound(def_id))
    }

    fn has_collidable_structure(&self, def_id: PartDefId) -> Result<bool> {
        self.defs
            .get(&def_id)
            .map(|d| d.collidable)
            .ok_or(MassError::DefinitionNotFound(def_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let catalog = PartCatalog::new()
            .with_definition(PartDefinition::new(PartDefId(1), "fuel-tank", 10.0, true))
            .with_definition(PartDefinition::new(PartDefId(2), "strut", 0.5, false));

        assert_eq!(catalog.static_contribution(PartDefId(1)).unwrap(), 10.0);
        assert!(catalog.has_collidable_structure(PartDefId(1)).unwrap());
        assert!(!catalog.has_collidable_structure(PartDefId(2)).unwrap());
    }

    #[test]
    fn test_unknown_definition_is_error() {
        let catalog = PartCatalog::new();

        assert!(matches!(
            catalog.static_contribution(PartDefId(99)),
            Err(MassError::DefinitionNotFound(_))
        ));
        assert!(matches!(
            catalog.has_collidable_structure(PartDefId(99)),
            Err(MassError::DefinitionNotFound(_))
        ));
    }

    #[test]
    fn test_definition_serde_roundtrip() {
        let def = PartDefinition::new(PartDefId(7), "engine", 2.5, true);

        let json = serde_json::to_string(&def).unwrap();
        let back: PartDefinition = serde_json::from_str(&json).unwrap();

        assert_eq!(back.def_id, def.def_id);
        assert_eq!(back.name, def.name);
        assert_eq!(back.dry_mass, def.dry_mass);
        assert_eq!(back.collidable, def.collidable);
    }
}
