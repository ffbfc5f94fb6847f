//! Core data types: values, schemas, rows and locations

/// Logical and physical rows, row locations, output slots
pub mod row;
/// Table schema model
pub mod schema;
/// Column values and types
pub mod value;

pub use row::{PhysicalRow, PhysicalValue, RowLocation, TupleSlot};
pub use schema::{ColumnDef, Schema};
pub use value::{ColumnType, Value};
