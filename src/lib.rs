//! Read-only access to the persisted state of a MonetDB database — the "BAT
//! buffer pool" its storage layer keeps on disk — without running a server.
//! The pool's directory file is parsed, every column's heaps are loaded or
//! mapped exactly the way the server persisted them, and the SQL catalog the
//! pool stores about itself is walked to give columns back their
//! schema.table.column names.
//!
//! ```rust,no_run
//! use libbbp::{Pool, SqlName};
//!
//! let pool = Pool::open("/var/monetdb5/dbfarm/demo")?;
//! if let Some(index) = pool.find_by_sql_name(&SqlName::new("sys", "t", "a"))? {
//!     let column = pool.at(index)?;
//!     for value in column.values() {
//!         println!("{}", value?);
//!     }
//! }
//! # Ok::<(), libbbp::PoolError>(())
//! ```
//!
//! The pool is opened under the same exclusive lock a server would take, so
//! opening fails fast when a server is running on the database.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate getset;
#[macro_use]
extern crate lazy_static;
extern crate libc;
extern crate memmap;
extern crate pest;
extern crate pest_derive;
#[macro_use]
extern crate quick_error;
#[macro_use]
pub extern crate slog;
extern crate slog_stdlog;
extern crate strum;
#[macro_use]
extern crate strum_macros;
#[cfg(test)]
extern crate tempdir;

// library modules
pub mod atoms;
pub mod heap;
mod log;
pub mod parsers;
pub mod pool;
pub mod utils;

pub use crate::log::GlobalLogger;
pub use crate::pool::{
    Column, OpenOptions, OpenOptionsBuilder, Pool, PoolError, PoolErrorKind, PoolResult,
    SqlName, Value,
};
