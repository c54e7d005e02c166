use crate::table::MemTable;
use common::{Attribute, DataType, Field, QueryError, Row, TableSchema};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Parses a typed header cell such as `id:int`. Cells without a type are strings.
fn parse_header(cell: &str) -> Result<Attribute, QueryError> {
    let mut parts = cell.splitn(2, ':');
    let name = parts.next().unwrap_or("").trim();
    if name.is_empty() {
        return Err(QueryError::ValidationError(format!(
            "empty column name in csv header cell '{}'",
            cell
        )));
    }
    let dtype = match parts.next() {
        Some(t) => DataType::parse(t).ok_or_else(|| {
            QueryError::ValidationError(format!("unknown type '{}' for column {}", t, name))
        })?,
        None => DataType::String,
    };
    Ok(Attribute::new(name.to_string(), dtype))
}

fn parse_field(cell: &str, attr: &Attribute, line: usize) -> Result<Field, QueryError> {
    if cell.is_empty() {
        return Ok(Field::Null);
    }
    let bad = || {
        QueryError::ValidationError(format!(
            "line {}: cannot read '{}' as {:?} for column {}",
            line,
            cell,
            attr.dtype(),
            attr.name()
        ))
    };
    match attr.dtype() {
        DataType::Int => cell.trim().parse::<i64>().map(Field::IntField).map_err(|_| bad()),
        DataType::Bool => match cell.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Field::BoolField(true)),
            "false" | "f" | "0" => Ok(Field::BoolField(false)),
            _ => Err(bad()),
        },
        DataType::String | DataType::Any => Ok(Field::StringField(cell.to_string())),
    }
}

/// Reads csv data with a typed header row into rows.
///
/// # Arguments
///
/// * `reader` - Csv text; the first record is the header.
pub fn read_csv<R: Read>(reader: R) -> Result<(TableSchema, Vec<Row>), QueryError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| QueryError::IOError(e.to_string()))?
        .clone();
    let mut attrs = Vec::with_capacity(headers.len());
    for cell in headers.iter() {
        attrs.push(parse_header(cell)?);
    }
    let schema = TableSchema::new(attrs);
    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let rec = result.map_err(|e| QueryError::IOError(e.to_string()))?;
        if rec.len() != schema.size() {
            return Err(QueryError::ValidationError(format!(
                "line {}: {} values for {} columns",
                line,
                rec.len(),
                schema.size()
            )));
        }
        let mut fields = Vec::with_capacity(rec.len());
        for (cell, attr) in rec.iter().zip(schema.attributes()) {
            fields.push(parse_field(cell, attr, line)?);
        }
        rows.push(Row::new(fields));
    }
    Ok((schema, rows))
}

/// Loads a csv file into a table.
///
/// # Arguments
///
/// * `name` - Name of the new table.
/// * `path` - Path to the csv file.
pub fn load_csv<P: AsRef<Path>>(name: &str, path: P) -> Result<MemTable, QueryError> {
    debug!(
        "memstore::csv_utils trying to open file, path: {:?}",
        path.as_ref()
    );
    let file = File::open(path)?;
    let (schema, rows) = read_csv(file)?;
    info!("Num records imported into {}: {:?}", name, rows.len());
    MemTable::new(name, schema, rows)
}
