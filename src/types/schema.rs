//! Table schema model
//!
//! The host catalog is out of scope; a [`Schema`] is the resolved column
//! list the engine works against. The hidden sequence column is part of
//! the physical schema and is appended automatically at table creation.

use crate::constants::SEQ_COLUMN;
use crate::types::value::ColumnType;
use serde::{Deserialize, Serialize};

/// One column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Column type
    pub ty: ColumnType,
}

impl ColumnDef {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Ordered column list of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Columns in physical order
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    /// Build a schema, appending the hidden sequence column if absent.
    pub fn new(mut columns: Vec<ColumnDef>) -> Self {
        if !columns.iter().any(|c| c.name == SEQ_COLUMN) {
            columns.push(ColumnDef::new(SEQ_COLUMN, ColumnType::Int));
        }
        Self { columns }
    }

    /// Number of columns including the sequence column.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the schema holds no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a column by name.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Position of the hidden sequence column.
    pub fn seq_position(&self) -> Option<usize> {
        self.position_of(SEQ_COLUMN)
    }

    /// Column definition at a position.
    pub fn column(&self, pos: usize) -> &ColumnDef {
        &self.columns[pos]
    }
}
