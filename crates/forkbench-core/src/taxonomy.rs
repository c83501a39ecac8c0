use std::collections::HashMap;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Category holding columns that can key a merge.
pub const JOINABLE: &str = "joinable";
/// Category holding low-cardinality columns usable as group/pivot keys.
pub const GROUPABLE: &str = "groupable";
/// Category holding columns that can be aggregated.
pub const NUMERIC: &str = "numeric";
/// Category holding free-text columns.
pub const STRING: &str = "string";

const BUILTIN_TAXONOMY: &str = include_str!("../taxonomy/default.toml");

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    categories: IndexMap<String, Vec<String>>,
}

/// Immutable mapping from semantic categories to the column kinds they
/// contain, with the inverse lookup precomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTaxonomy {
    categories: IndexMap<String, IndexSet<String>>,
    inverse: HashMap<String, Vec<String>>,
}

impl ColumnTaxonomy {
    /// Build a taxonomy from category → kind definitions. Category order is
    /// preserved; duplicate kinds inside one category are collapsed.
    pub fn from_categories<C, K, I>(definitions: I) -> Result<Self>
    where
        I: IntoIterator<Item = (C, Vec<K>)>,
        C: Into<String>,
        K: Into<String>,
    {
        let mut categories: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for (category, kinds) in definitions {
            let category = category.into();
            if category.trim().is_empty() {
                return Err(Error::InvalidTaxonomy(
                    "category names must not be empty".to_string(),
                ));
            }
            let entry = categories.entry(category.clone()).or_default();
            for kind in kinds {
                let kind = kind.into();
                if kind.trim().is_empty() {
                    return Err(Error::InvalidTaxonomy(format!(
                        "category '{category}' lists an empty column kind"
                    )));
                }
                entry.insert(kind);
            }
        }

        let mut inverse: HashMap<String, Vec<String>> = HashMap::new();
        for (category, kinds) in &categories {
            for kind in kinds {
                inverse
                    .entry(kind.clone())
                    .or_default()
                    .push(category.clone());
            }
        }

        Ok(Self {
            categories,
            inverse,
        })
    }

    /// Parse a taxonomy from its TOML form (`[categories] name = [..]`).
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: TaxonomyFile = toml::from_str(source)?;
        Self::from_categories(file.categories)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The taxonomy shipped with forkbench.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TAXONOMY)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn num_categories(&self) -> usize {
        self.categories.len()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    /// Kinds belonging to `category`, in definition order. Unknown
    /// categories yield nothing.
    pub fn kinds_in(&self, category: &str) -> impl Iterator<Item = &str> {
        self.categories
            .get(category)
            .into_iter()
            .flat_map(|kinds| kinds.iter().map(String::as_str))
    }

    /// Categories containing `kind`. A kind listed nowhere is inert.
    pub fn categories_of(&self, kind: &str) -> &[String] {
        self.inverse
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every kind of every category, deduplicated in first-seen order.
    pub fn all_kinds(&self) -> Vec<&str> {
        let mut seen = IndexSet::new();
        for kinds in self.categories.values() {
            for kind in kinds {
                seen.insert(kind.as_str());
            }
        }
        seen.into_iter().collect()
    }
}
