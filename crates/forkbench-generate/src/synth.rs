//! Schema drawing and column synthesis.
//!
//! Every column kind of the built-in taxonomy has a synthesizer here; kinds
//! are backed by `fake` where it has a matching faker and by plain ranges
//! for the numeric kinds.

use std::collections::HashSet;

use fake::Fake;
use fake::faker::address::en::{CityName, CountryName, StateName, StreetName};
use fake::faker::barcode::en::Isbn13;
use fake::faker::boolean::en::Boolean;
use fake::faker::company::en::{CompanyName, Industry};
use fake::faker::currency::en::CurrencyCode;
use fake::faker::filesystem::en::FileExtension;
use fake::faker::internet::en::{IPv4, SafeEmail, Username};
use fake::faker::job::en::Title;
use fake::faker::lorem::en::{Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::uuid::UUIDv4;
use forkbench_core::{ColumnTaxonomy, SchemaMap, Value};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, RngCore};
use tracing::{debug, warn};

use crate::errors::GenerationError;
use crate::frame::Frame;

/// Length of the random prefix that keeps column labels unique.
pub const PREFIX_SIZE: usize = 5;

const PREFIX_SYMBOLS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

const MAX_LABEL_DRAWS: usize = 64;

/// Column kinds with a synthesizer.
pub const SUPPORTED_KINDS: &[&str] = &[
    "uuid4",
    "isbn13",
    "safe_email",
    "user_name",
    "ipv4",
    "country",
    "city",
    "state",
    "company",
    "job",
    "currency_code",
    "industry",
    "file_extension",
    "day_of_week",
    "boolean",
    "random_int",
    "pyfloat",
    "latitude",
    "longitude",
    "random_digit",
    "price",
    "name",
    "first_name",
    "last_name",
    "street_name",
    "sentence",
    "word",
    "phone_number",
];

const DAYS_OF_WEEK: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Kinds whose synthesizer produces numbers rather than text.
pub const NUMERIC_KINDS: &[&str] = &[
    "random_int",
    "random_digit",
    "pyfloat",
    "latitude",
    "longitude",
    "price",
];

/// Rounds of fresh-key draws before a join partner settles for fewer rows.
const MAX_FRESH_KEY_ROUNDS: usize = 16;

pub fn is_supported(kind: &str) -> bool {
    SUPPORTED_KINDS.contains(&kind)
}

pub fn is_numeric_kind(kind: &str) -> bool {
    NUMERIC_KINDS.contains(&kind)
}

/// Draw a fresh alphanumeric label prefix.
pub fn generate_prefix(rng: &mut dyn RngCore) -> String {
    (0..PREFIX_SIZE)
        .map(|_| PREFIX_SYMBOLS[rng.random_range(0..PREFIX_SYMBOLS.len())] as char)
        .collect()
}

/// Draw a schema of `num_cols` columns labelled `<prefix>__<kind>`.
///
/// With fewer columns than categories, kinds are drawn with replacement from
/// the union of all kinds. Otherwise every non-empty category receives at
/// least one column and the remainder is spread across categories at random.
pub fn draw_schema(
    num_cols: usize,
    taxonomy: &ColumnTaxonomy,
    rng: &mut dyn RngCore,
) -> Result<SchemaMap, GenerationError> {
    draw_schema_avoiding(num_cols, taxonomy, &HashSet::new(), rng)
}

fn draw_schema_avoiding(
    num_cols: usize,
    taxonomy: &ColumnTaxonomy,
    reserved: &HashSet<String>,
    rng: &mut dyn RngCore,
) -> Result<SchemaMap, GenerationError> {
    if num_cols == 0 {
        return Err(GenerationError::InvalidRequest(
            "a schema needs at least one column".to_string(),
        ));
    }

    let populated: Vec<Vec<&str>> = taxonomy
        .categories()
        .map(|category| taxonomy.kinds_in(category).collect::<Vec<_>>())
        .filter(|kinds| !kinds.is_empty())
        .collect();
    if populated.is_empty() {
        return Err(GenerationError::InvalidRequest(
            "taxonomy has no column kinds".to_string(),
        ));
    }

    let mut drawn: Vec<&str> = Vec::with_capacity(num_cols);
    if num_cols < populated.len() {
        let all_kinds = taxonomy.all_kinds();
        for _ in 0..num_cols {
            if let Some(kind) = all_kinds.choose(rng) {
                drawn.push(*kind);
            }
        }
    } else {
        let mut per_category = vec![1usize; populated.len()];
        for _ in populated.len()..num_cols {
            per_category[rng.random_range(0..populated.len())] += 1;
        }
        for (kinds, count) in populated.iter().zip(per_category) {
            for _ in 0..count {
                if let Some(kind) = kinds.choose(rng) {
                    drawn.push(*kind);
                }
            }
        }
    }

    let mut schema = SchemaMap::new();
    for kind in drawn {
        let label = unique_label(kind, &schema, reserved, rng)?;
        schema.insert(label, kind);
    }
    debug!(columns = schema.len(), "drew schema");
    Ok(schema)
}

fn unique_label(
    kind: &str,
    schema: &SchemaMap,
    reserved: &HashSet<String>,
    rng: &mut dyn RngCore,
) -> Result<String, GenerationError> {
    for _ in 0..MAX_LABEL_DRAWS {
        let label = format!("{}__{kind}", generate_prefix(rng));
        if !schema.contains(&label) && !reserved.contains(&label) {
            return Ok(label);
        }
    }
    Err(GenerationError::InvalidRequest(format!(
        "could not draw a unique label for kind '{kind}'"
    )))
}

/// Synthesize `rows` values of column kind `kind`.
pub fn synthesize_column(
    kind: &str,
    rows: usize,
    rng: &mut dyn RngCore,
) -> Result<Vec<Value>, GenerationError> {
    if !is_supported(kind) {
        return Err(GenerationError::UnknownKind(kind.to_string()));
    }
    (0..rows).map(|_| synthesize_value(kind, rng)).collect()
}

fn synthesize_value(kind: &str, rng: &mut dyn RngCore) -> Result<Value, GenerationError> {
    let value = match kind {
        "uuid4" => {
            let id: uuid::Uuid = UUIDv4.fake_with_rng(rng);
            Value::Text(id.to_string())
        }
        "isbn13" => Value::Text(Isbn13().fake_with_rng(rng)),
        "safe_email" => Value::Text(SafeEmail().fake_with_rng(rng)),
        "user_name" => Value::Text(Username().fake_with_rng(rng)),
        "ipv4" => Value::Text(IPv4().fake_with_rng(rng)),
        "country" => Value::Text(CountryName().fake_with_rng(rng)),
        "city" => Value::Text(CityName().fake_with_rng(rng)),
        "state" => Value::Text(StateName().fake_with_rng(rng)),
        "company" => Value::Text(CompanyName().fake_with_rng(rng)),
        "job" => Value::Text(Title().fake_with_rng(rng)),
        "currency_code" => Value::Text(CurrencyCode().fake_with_rng(rng)),
        "industry" => Value::Text(Industry().fake_with_rng(rng)),
        "file_extension" => Value::Text(FileExtension().fake_with_rng(rng)),
        "day_of_week" => {
            let day = DAYS_OF_WEEK[rng.random_range(0..DAYS_OF_WEEK.len())];
            Value::Text(day.to_string())
        }
        "boolean" => {
            let flag: bool = Boolean(50).fake_with_rng(rng);
            Value::Text(if flag { "True" } else { "False" }.to_string())
        }
        "random_int" => Value::Int(rng.random_range(0..=9999)),
        "random_digit" => Value::Int(rng.random_range(0..=9)),
        "pyfloat" => Value::Float(round_to(rng.random_range(-10_000.0..10_000.0), 4)),
        "latitude" => Value::Float(round_to(rng.random_range(-90.0..=90.0), 6)),
        "longitude" => Value::Float(round_to(rng.random_range(-180.0..=180.0), 6)),
        "price" => Value::Float(round_to(rng.random_range(1.0..1_000.0), 2)),
        "name" => Value::Text(Name().fake_with_rng(rng)),
        "first_name" => Value::Text(FirstName().fake_with_rng(rng)),
        "last_name" => Value::Text(LastName().fake_with_rng(rng)),
        "street_name" => Value::Text(StreetName().fake_with_rng(rng)),
        "sentence" => Value::Text(Sentence(3..8).fake_with_rng(rng)),
        "word" => Value::Text(Word().fake_with_rng(rng)),
        "phone_number" => Value::Text(PhoneNumber().fake_with_rng(rng)),
        other => return Err(GenerationError::UnknownKind(other.to_string())),
    };
    Ok(value)
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Synthesize a table with `rows` rows for `schema`.
pub fn synthesize_frame(
    schema: &SchemaMap,
    rows: usize,
    rng: &mut dyn RngCore,
) -> Result<Frame, GenerationError> {
    let columns = schema
        .iter()
        .map(|(_, kind)| synthesize_column(kind, rows, rng))
        .collect::<Result<Vec<_>, _>>()?;
    Frame::new(schema.clone(), columns)
}

/// Synthesize the primary-key side of a PK-FK pair for `source`.
///
/// The partner's first column is `key_col`, a primary key holding distinct
/// values of the source key column; it is followed by a freshly drawn schema
/// of between 2 and the source column count. The row count is `rows` when
/// supplied, otherwise a random count between 1 and the number of distinct
/// keys. Rows beyond the distinct source keys get fresh keys of the same kind
/// that match no source row.
pub fn synthesize_join_partner(
    source: &Frame,
    key_col: &str,
    taxonomy: &ColumnTaxonomy,
    rows: Option<usize>,
    rng: &mut dyn RngCore,
) -> Result<Frame, GenerationError> {
    let key_kind = source.schema().kind_of(key_col).ok_or_else(|| {
        GenerationError::InvalidRequest(format!("join key '{key_col}' is not in the source"))
    })?;
    let values = source.column(key_col).unwrap_or_default();

    let mut seen = HashSet::new();
    let mut distinct: Vec<Value> = values
        .iter()
        .filter(|value| !value.is_null() && seen.insert(value.key()))
        .cloned()
        .collect();
    if distinct.is_empty() {
        return Err(GenerationError::InvalidRequest(format!(
            "join key '{key_col}' has no values"
        )));
    }

    distinct.shuffle(rng);
    let requested = rows.unwrap_or_else(|| rng.random_range(1..=distinct.len()));
    let mut keys: Vec<Value> = distinct.into_iter().take(requested).collect();
    let mut rounds = 0;
    while keys.len() < requested && rounds < MAX_FRESH_KEY_ROUNDS {
        rounds += 1;
        for value in synthesize_column(key_kind, requested - keys.len(), rng)? {
            if !value.is_null() && seen.insert(value.key()) {
                keys.push(value);
            }
        }
    }
    if keys.len() < requested {
        warn!(
            key = key_col,
            requested,
            rows = keys.len(),
            "key kind ran out of fresh values, join partner is shorter"
        );
    }
    let rows = keys.len();

    let upper = (source.column_count() + 1).max(3);
    let new_cols = rng.random_range(2..upper);
    let reserved: HashSet<String> = HashSet::from([key_col.to_string()]);
    let drawn = draw_schema_avoiding(new_cols, taxonomy, &reserved, rng)?;

    let mut partner = Frame::empty(SchemaMap::new());
    partner.push_column(key_col, key_kind, keys)?;
    for (label, kind) in drawn.iter() {
        partner.push_column(label, kind, synthesize_column(kind, rows, rng)?)?;
    }
    debug!(
        key = key_col,
        rows,
        columns = partner.column_count(),
        "synthesized join partner"
    );
    Ok(partner)
}
