//! Engine core: the database space and the query-interpreter seam.
//!
//! This crate ties the keyed stores together into a [`db::Db`] (a named
//! directory of tables and columns) and defines the [`ql::QueryInterpreter`]
//! capability that both the standalone REPL and the network server drive.

pub mod db;
pub mod ql;

pub use db::{ColumnType, Db, DbObject, TableFlags, TableKeys, MAX_NAME_LEN};
pub use ql::{BasicInterpreter, QueryInterpreter, BATCHMODE_ON};
