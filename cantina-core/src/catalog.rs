//! Menu catalog: items and their categories.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a menu item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// A menu category. Policy allows one item per category per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub slug: String,
    pub name: String,
}

/// A single orderable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "MenuItem::default_active")]
    pub active: bool,
    /// Slug of the owning category. Items without one cannot be ordered.
    #[serde(default)]
    pub category: Option<String>,
}

impl MenuItem {
    const fn default_active() -> bool {
        true
    }
}

/// Complete menu data structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub items: Vec<MenuItem>,
}

impl Catalog {
    /// An empty catalog, for fixtures and hosts that load lazily.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Find an item by ID.
    #[must_use]
    pub fn find_item(&self, id: ItemId) -> Option<&MenuItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Get all items as a flat map by ID.
    #[must_use]
    pub fn items_by_id(&self) -> HashMap<ItemId, &MenuItem> {
        self.items.iter().map(|item| (item.id, item)).collect()
    }

    /// Category record for an item, when the item has one and it exists.
    #[must_use]
    pub fn category_of(&self, item: &MenuItem) -> Option<&Category> {
        let slug = item.category.as_deref()?;
        self.categories.iter().find(|c| c.slug == slug)
    }

    /// Human label for a category slug; falls back to the slug itself for
    /// categories referenced by items but not declared.
    #[must_use]
    pub fn category_label<'a>(&'a self, slug: &'a str) -> &'a str {
        self.categories
            .iter()
            .find(|c| c.slug == slug)
            .map_or(slug, |c| c.name.as_str())
    }
}
