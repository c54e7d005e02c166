#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io;
pub mod catalog;
pub mod dataflow;
pub mod database;
pub mod expr;
pub mod logical_plan;
pub use expr::{Expr, Operator};
pub use logical_plan::{AggFunc, PredicateOp};
pub mod storage_trait;
pub mod testutil;

/// Custom error type.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// IO Errors.
    IOError(String),
    /// Malformed plans or expressions.
    ValidationError(String),
    /// Failure while evaluating rows.
    ExecutionError(String),
    /// Plan node that neither the interpreter nor the node itself can implement.
    UnsupportedPlan(String),
    /// Aggregate call without an evaluation strategy, or a distinct aggregate.
    InvalidAggregate(String),
    /// A storage entity broke the scan protocol.
    EntityProtocol(String),
    /// A storage entity exposes no scan capability.
    NoScanCapability(String),
    /// Execution was cancelled.
    Interrupted(String),
    /// The interpreter's own bookkeeping is inconsistent.
    InternalError(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                QueryError::ValidationError(s) => format!("Validation Error: {}", s),
                QueryError::ExecutionError(s) => format!("Execution Error: {}", s),
                QueryError::UnsupportedPlan(s) => format!("Unsupported Plan: {}", s),
                QueryError::InvalidAggregate(s) => format!("Invalid Aggregate: {}", s),
                QueryError::EntityProtocol(s) => format!("Entity Protocol Violation: {}", s),
                QueryError::NoScanCapability(s) => {
                    format!("Cannot convert entity to a row sequence: {}", s)
                }
                QueryError::Interrupted(s) => format!("Interrupted: {}", s),
                QueryError::InternalError(s) => format!("Internal Error: {}", s),
                QueryError::IOError(s) => s.to_string(),
            }
        )
    }
}

// Implement std::convert::From for QueryError; from io::Error
impl From<io::Error> for QueryError {
    fn from(error: io::Error) -> Self {
        QueryError::IOError(error.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(error: serde_json::Error) -> Self {
        QueryError::ValidationError(error.to_string())
    }
}

impl Error for QueryError {}

/// Return type for a query result.
pub struct QueryResult {
    result: String,
}

impl QueryResult {
    /// Return a result with string.
    ///
    /// # Arguments
    ///
    /// * `result` - Result to return.
    pub fn new(result: &str) -> Self {
        Self {
            result: result.to_string(),
        }
    }

    /// Get the result.
    pub fn result(&self) -> &str {
        &self.result
    }
}

/// Handle schemas.
#[derive(PartialEq, Clone, Debug)]
pub struct TableSchema {
    /// Attributes of the schema.
    attributes: Vec<Attribute>,
    /// Mapping from attribute name to order in the schema.
    name_map: HashMap<String, usize>,
}

impl Serialize for TableSchema {
    /// Custom serialize to avoid serializing name_map.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.attributes.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TableSchema {
    /// Custom deserialize to avoid serializing name_map.
    fn deserialize<D>(deserializer: D) -> Result<TableSchema, D::Error>
    where
        D: Deserializer<'de>,
    {
        let attrs = Vec::deserialize(deserializer)?;
        Ok(TableSchema::new(attrs))
    }
}

impl TableSchema {
    /// Create a new schema.
    ///
    /// # Arguments
    ///
    /// * `attributes` - Attributes of the schema in the order that they are in the schema.
    pub fn new(attributes: Vec<Attribute>) -> Self {
        let mut name_map = HashMap::new();
        for (i, attr) in attributes.iter().enumerate() {
            name_map.entry(attr.name().to_string()).or_insert(i);
        }
        Self {
            attributes,
            name_map,
        }
    }

    /// Schema with no attributes, e.g. the input shape of a values node.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Create a new schema with the given names and dtypes.
    ///
    /// # Arguments
    ///
    /// * `names` - Names of the new schema.
    /// * `dtypes` - Dypes of the new schema.
    pub fn from_vecs(names: Vec<&str>, dtypes: Vec<DataType>) -> Self {
        let mut attrs = Vec::new();
        for (name, dtype) in names.iter().zip(dtypes.iter()) {
            attrs.push(Attribute::new(name.to_string(), dtype.clone()));
        }
        TableSchema::new(attrs)
    }

    /// Get the attribute from the given index.
    ///
    /// # Arguments
    ///
    /// * `i` - Index of the attribute to look for.
    pub fn get_attribute(&self, i: usize) -> Option<&Attribute> {
        self.attributes.get(i)
    }

    /// Get the index of the attribute. With duplicate names the first one wins.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the attribute to get the index for.
    pub fn get_field_index(&self, name: &str) -> Option<&usize> {
        self.name_map.get(name)
    }

    /// Get an iterator of the attributes.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Merge two schemas into one.
    ///
    /// The other schema is appended to the current schema.
    ///
    /// # Arguments
    ///
    /// * `other` - Other schema to add to current schema.
    pub fn merge(&self, other: &Self) -> Self {
        let mut attrs = self.attributes.clone();
        attrs.append(&mut other.attributes.clone());
        Self::new(attrs)
    }

    /// Schema made of the attributes at `indices`, in that order.
    ///
    /// # Arguments
    ///
    /// * `indices` - Positions of the attributes to keep.
    pub fn project(&self, indices: &[usize]) -> Result<Self, QueryError> {
        let mut attrs = Vec::with_capacity(indices.len());
        for i in indices {
            let attr = self.attributes.get(*i).ok_or_else(|| {
                QueryError::ValidationError(format!(
                    "column {} out of range for schema of width {}",
                    i,
                    self.size()
                ))
            })?;
            attrs.push(attr.clone());
        }
        Ok(Self::new(attrs))
    }

    /// Returns the length of the schema.
    pub fn size(&self) -> usize {
        self.attributes.len()
    }
}

/// Handle attributes. Pairs the name with the dtype.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute dtype.
    pub dtype: DataType,
}

impl Attribute {
    /// Create a new attribute with the given name and dtype.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the attribute.
    /// * `dtype` - Dtype of the attribute.
    pub fn new(name: String, dtype: DataType) -> Self {
        Self { name, dtype }
    }

    /// Returns the name of the attribute.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dtype of the attribute.
    pub fn dtype(&self) -> &DataType {
        &self.dtype
    }
}

/// Enumerate the supported dtypes.
#[derive(PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Debug)]
pub enum DataType {
    Bool,
    Int,
    String,
    /// Untyped nulls and dynamic parameters.
    Any,
}

impl DataType {
    /// Parses the type names used in typed csv headers and plan files.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Some(DataType::Bool),
            "int" | "integer" | "bigint" => Some(DataType::Int),
            "string" | "varchar" | "text" => Some(DataType::String),
            "any" => Some(DataType::Any),
            _ => None,
        }
    }
}

/// Opaque value held by a row. The derived order is total and agrees with equality.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, PartialOrd, Ord, Clone, Hash)]
pub enum Field {
    Null,
    BoolField(bool),
    IntField(i64),
    StringField(String),
}

impl Field {
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// Type of the value; null is untyped.
    pub fn dtype(&self) -> DataType {
        match self {
            Field::Null => DataType::Any,
            Field::BoolField(_) => DataType::Bool,
            Field::IntField(_) => DataType::Int,
            Field::StringField(_) => DataType::String,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Null => write!(f, "NULL"),
            Field::BoolField(x) => write!(f, "{}", x),
            Field::IntField(x) => write!(f, "{}", x),
            Field::StringField(x) => write!(f, "{}", x),
        }
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::IntField(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::StringField(v.to_string())
    }
}

impl From<bool> for Field {
    fn from(v: bool) -> Self {
        Field::BoolField(v)
    }
}

/// Immutable fixed-width row flowing between data-flow nodes.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Hash)]
pub struct Row {
    /// Row data.
    field_vals: Vec<Field>,
}

impl Row {
    /// Create a new row with the given data.
    ///
    /// # Arguments
    ///
    /// * `field_vals` - Field values of the row.
    pub fn new(field_vals: Vec<Field>) -> Self {
        Self { field_vals }
    }

    /// Row of `width` nulls, used to pad outer join results.
    pub fn nulls(width: usize) -> Self {
        Self::new(vec![Field::Null; width])
    }

    /// Get the field at index.
    ///
    /// # Arguments
    ///
    /// * `i` - Index of the field.
    pub fn get_field(&self, i: usize) -> Option<&Field> {
        self.field_vals.get(i)
    }

    /// Returns an iterator over the field values.
    pub fn field_vals(&self) -> impl Iterator<Item = &Field> {
        self.field_vals.iter()
    }

    pub fn values(&self) -> &[Field] {
        &self.field_vals
    }

    pub fn into_values(self) -> Vec<Field> {
        self.field_vals
    }

    /// Return the length of the row.
    pub fn size(&self) -> usize {
        self.field_vals.len()
    }

    /// Append another row with self.
    ///
    /// # Arguments
    ///
    /// * `other` - Other row to append.
    pub fn merge(&self, other: &Self) -> Self {
        let mut fields = Vec::with_capacity(self.size() + other.size());
        fields.extend_from_slice(&self.field_vals);
        fields.extend_from_slice(&other.field_vals);
        Self::new(fields)
    }
}

impl From<Vec<Field>> for Row {
    fn from(field_vals: Vec<Field>) -> Self {
        Row::new(field_vals)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = String::new();
        for field in &self.field_vals {
            res.push_str(&field.to_string());
            res.push('\t');
        }
        write!(f, "{}", res)
    }
}
