use std::path::PathBuf;

use forkbench_core::{ColumnTaxonomy, Error, SchemaCatalog, SchemaMap};

fn temp_file(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("forkbench_taxonomy_{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).expect("write taxonomy");
    path
}

#[test]
fn custom_taxonomy_drives_classification() {
    let path = temp_file(
        r#"
        [categories]
        joinable = ["uuid4"]
        numeric = ["random_int", "price"]
        "#,
    );
    let taxonomy = ColumnTaxonomy::load(&path).expect("load taxonomy");

    let mut schema = SchemaMap::new();
    schema.insert("id", "uuid4");
    schema.insert("city", "city");
    schema.insert("amount", "price");

    let classification = SchemaCatalog::new(&taxonomy).classify(&schema);
    let categories: Vec<&str> = classification.categories().collect();
    assert_eq!(categories, vec!["joinable", "numeric"]);
    assert_eq!(classification.columns("numeric"), ["amount"]);
    assert!(classification.columns("groupable").is_empty());
}

#[test]
fn builtin_kinds_shared_between_categories() {
    let taxonomy = ColumnTaxonomy::builtin().expect("builtin");
    assert_eq!(taxonomy.categories_of("city"), ["groupable", "string"]);
    assert!(taxonomy.all_kinds().contains(&"uuid4"));
}

#[test]
fn malformed_file_is_a_decode_error() {
    let path = temp_file("[categories]\nnumeric = \"random_int\"\n");
    assert!(matches!(
        ColumnTaxonomy::load(&path),
        Err(Error::TomlDecode(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join(format!("forkbench_missing_{}.toml", uuid::Uuid::new_v4()));
    assert!(matches!(ColumnTaxonomy::load(&path), Err(Error::Io(_))));
}
