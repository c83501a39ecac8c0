use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::taxonomy::ColumnTaxonomy;

/// Ordered column label → column kind mapping. Insertion order is the
/// creation order of the columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaMap(IndexMap<String, String>);

impl SchemaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, kind: impl Into<String>) {
        self.0.insert(label.into(), kind.into());
    }

    pub fn kind_of(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(label, kind)| (label.as_str(), kind.as_str()))
    }

    /// Keep only `labels`, preserving this schema's order.
    pub fn retain_labels<S: AsRef<str>>(&self, labels: &[S]) -> SchemaMap {
        self.0
            .iter()
            .filter(|(label, _)| labels.iter().any(|keep| keep.as_ref() == label.as_str()))
            .map(|(label, kind)| (label.clone(), kind.clone()))
            .collect()
    }
}

impl FromIterator<(String, String)> for SchemaMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for SchemaMap {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(label, kind)| (label.to_string(), kind.to_string()))
                .collect(),
        )
    }
}

/// Columns of a schema grouped by semantic category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification(IndexMap<String, Vec<String>>);

impl Classification {
    /// Labels in `category`, in schema order. Absent categories are empty.
    pub fn columns(&self, category: &str) -> &[String] {
        self.0
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has(&self, category: &str) -> bool {
        !self.columns(category).is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Classifies schema maps against a taxonomy.
#[derive(Debug, Clone, Copy)]
pub struct SchemaCatalog<'a> {
    taxonomy: &'a ColumnTaxonomy,
}

impl<'a> SchemaCatalog<'a> {
    pub fn new(taxonomy: &'a ColumnTaxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &'a ColumnTaxonomy {
        self.taxonomy
    }

    /// Group the columns of `schema` by category. Categories follow taxonomy
    /// order, labels follow schema order, and only non-empty categories are
    /// present. Columns whose kind is in no category are left out.
    pub fn classify(&self, schema: &SchemaMap) -> Classification {
        let mut by_category: IndexMap<String, Vec<String>> = self
            .taxonomy
            .categories()
            .map(|category| (category.to_string(), Vec::new()))
            .collect();

        for (label, kind) in schema.iter() {
            for category in self.taxonomy.categories_of(kind) {
                if let Some(columns) = by_category.get_mut(category) {
                    columns.push(label.to_string());
                }
            }
        }

        by_category.retain(|_, columns| !columns.is_empty());
        Classification(by_category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{GROUPABLE, NUMERIC, STRING};

    fn taxonomy() -> ColumnTaxonomy {
        ColumnTaxonomy::from_categories([
            ("joinable", vec!["uuid4"]),
            ("groupable", vec!["city", "country"]),
            ("numeric", vec!["random_int"]),
            ("string", vec!["city", "name"]),
        ])
        .expect("taxonomy")
    }

    #[test]
    fn classify_follows_schema_order() {
        let taxonomy = taxonomy();
        let catalog = SchemaCatalog::new(&taxonomy);
        let schema: SchemaMap = [
            ("b__name", "name"),
            ("a__city", "city"),
            ("c__random_int", "random_int"),
            ("d__country", "country"),
        ]
        .into_iter()
        .collect();

        let classes = catalog.classify(&schema);
        assert_eq!(classes.columns(GROUPABLE), ["a__city", "d__country"]);
        assert_eq!(classes.columns(STRING), ["b__name", "a__city"]);
        assert_eq!(classes.columns(NUMERIC), ["c__random_int"]);
        assert!(!classes.has("joinable"));
        let order: Vec<&str> = classes.categories().collect();
        assert_eq!(order, vec!["groupable", "numeric", "string"]);
    }

    #[test]
    fn unknown_kinds_are_inert() {
        let taxonomy = taxonomy();
        let catalog = SchemaCatalog::new(&taxonomy);
        let schema: SchemaMap = [("x__mystery", "mystery")].into_iter().collect();
        assert_eq!(catalog.classify(&schema), Classification::default());
    }

    #[test]
    fn retain_labels_keeps_schema_order() {
        let schema: SchemaMap = [("a", "name"), ("b", "city"), ("c", "random_int")]
            .into_iter()
            .collect();
        let kept = schema.retain_labels(&["c", "a"]);
        let labels: Vec<&str> = kept.labels().collect();
        assert_eq!(labels, vec!["a", "c"]);
    }
}
