//! Fake-object layout tables.
//!
//! Each target type maps to a fixed `field -> offset` table describing its
//! dispatch/metadata header. These are configuration data per target-engine
//! version, not computed layouts: the built-in catalog is a starting point
//! that callers override or extend from JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GroomError, Result};
use crate::registry::offset;

/// Field name → byte offset, ordered by field name.
pub type FakeObjectLayout = BTreeMap<String, usize>;

/// Versioned set of per-type layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutCatalog {
    /// Free-form engine version tag (`"builtin"` for the defaults).
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub types: BTreeMap<String, FakeObjectLayout>,
}

/// Catalog document as supplied by the caller, before offsets are checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLayoutCatalog {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub types: BTreeMap<String, BTreeMap<String, i64>>,
}

fn default_version() -> String {
    "custom".to_string()
}

fn table(fields: &[(&str, usize)]) -> FakeObjectLayout {
    fields
        .iter()
        .map(|&(name, offset)| (name.to_string(), offset))
        .collect()
}

impl Default for LayoutCatalog {
    fn default() -> Self {
        let linear_buffer = table(&[("length", 0x08), ("flags", 0x10), ("backing_store", 0x18)]);
        let typed_view = table(&[
            ("buffer", 0x08),
            ("byte_offset", 0x10),
            ("length", 0x18),
            ("external_pointer", 0x20),
        ]);
        let callable = table(&[("call", 0x00), ("apply", 0x08), ("to_string", 0x10)]);
        let plain_object = table(&[("shape", 0x00), ("slots", 0x08), ("elements", 0x10)]);
        let tree_node = table(&[("parent", 0x08), ("first_child", 0x10), ("next_sibling", 0x18)]);

        let mut types = BTreeMap::new();
        types.insert("ArrayBuffer".to_string(), linear_buffer);
        types.insert("TypedArray".to_string(), typed_view.clone());
        types.insert("DataView".to_string(), typed_view);
        types.insert("JSFunction".to_string(), callable);
        types.insert("JSObject".to_string(), plain_object);
        types.insert("DOMNode".to_string(), tree_node);
        Self {
            version: "builtin".to_string(),
            types,
        }
    }
}

impl LayoutCatalog {
    /// Converts a raw document; negative offsets are invalid input.
    pub fn from_raw(raw: &RawLayoutCatalog) -> Result<Self> {
        let mut types = BTreeMap::new();
        for (object_type, fields) in &raw.types {
            let layout = fields
                .iter()
                .map(|(field, &value)| Ok((field.clone(), offset("layout offset", value)?)))
                .collect::<Result<FakeObjectLayout>>()?;
            types.insert(object_type.clone(), layout);
        }
        let catalog = Self {
            version: raw.version.clone(),
            types,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parses a catalog document and checks it.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawLayoutCatalog = serde_json::from_str(json)?;
        Self::from_raw(&raw)
    }

    /// Field names must be non-empty and unique offsets per type.
    pub fn validate(&self) -> Result<()> {
        for (object_type, layout) in &self.types {
            if object_type.trim().is_empty() {
                return Err(GroomError::invalid_input("layout type", "<empty>"));
            }
            let mut seen = BTreeMap::new();
            for (field, &offset) in layout {
                if field.trim().is_empty() {
                    return Err(GroomError::invalid_input("layout field", object_type));
                }
                if let Some(other) = seen.insert(offset, field) {
                    return Err(GroomError::invalid_input(
                        "layout offset",
                        format!("{object_type}: {other} and {field} both at {offset:#x}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Layout for `object_type`; unknown types get an empty table.
    pub fn layout_for(&self, object_type: &str) -> FakeObjectLayout {
        self.types.get(object_type).cloned().unwrap_or_default()
    }

    /// Replaces or adds the layouts in `overrides`; the override's version wins.
    #[must_use]
    pub fn merged_with(mut self, overrides: LayoutCatalog) -> Self {
        self.version = overrides.version;
        self.types.extend(overrides.types);
        self
    }
}
