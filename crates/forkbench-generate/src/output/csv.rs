use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use forkbench_core::{SchemaMap, Value};

use crate::errors::GenerationError;
use crate::frame::Frame;
use crate::synth::is_numeric_kind;

/// Write a frame as CSV with a header row in schema order.
pub fn write_frame_csv(path: &Path, frame: &Frame) -> Result<(), csv::Error> {
    let writer = BufWriter::new(File::create(path)?);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    let header: Vec<&str> = frame.schema().labels().collect();
    writer.write_record(&header)?;

    for index in 0..frame.row_count() {
        let record: Vec<String> = frame.row(index).into_iter().map(Value::to_csv).collect();
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read a CSV snapshot written by [`write_frame_csv`]. Column kinds come from
/// `schema` and decide how each field is typed; columns present in the file
/// but absent from `schema` keep an empty kind.
pub fn read_frame_csv(path: &Path, schema: &SchemaMap) -> Result<Frame, GenerationError> {
    let reader = BufReader::new(File::open(path)?);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let header = reader.headers()?.clone();
    let file_schema: SchemaMap = header
        .iter()
        .map(|label| {
            (
                label.to_string(),
                schema.kind_of(label).unwrap_or_default().to_string(),
            )
        })
        .collect();
    if file_schema.len() != header.len() {
        return Err(GenerationError::Shape(format!(
            "duplicate column labels in {}",
            path.display()
        )));
    }

    let parsers: Vec<fn(&str) -> Value> =
        file_schema.iter().map(|(_, kind)| field_parser(kind)).collect();
    let mut frame = Frame::empty(file_schema);
    for record in reader.records() {
        let record = record?;
        frame.push_row(
            record
                .iter()
                .zip(&parsers)
                .map(|(raw, parse)| parse(raw))
                .collect(),
        )?;
    }
    Ok(frame)
}

/// Numeric kinds parse back into numbers; every other known kind stays text,
/// so digits in a city or an empty string survive the round trip. Columns
/// without a kind fall back to type sniffing.
fn field_parser(kind: &str) -> fn(&str) -> Value {
    if kind.is_empty() || is_numeric_kind(kind) {
        Value::parse_csv
    } else {
        text_field
    }
}

fn text_field(raw: &str) -> Value {
    Value::Text(raw.to_string())
}
