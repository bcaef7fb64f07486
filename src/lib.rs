#![warn(missing_docs)]

//! # netcursor
//!
//! Client-side cursor engine for a network database protocol.
//!
//! This crate keeps the client half of server-side cursors: a cached window
//! of rows per cursor, the bookkeeping that maps the application's row
//! position onto the server's, positioned UPDATE/DELETE/INSERT through the
//! cursor, LOB locator lifetimes, and cursor behavior at commit and
//! rollback. The wire protocol itself sits behind the [`Transport`] trait.
//!
//! ## Features
//!
//! - **Async/await** - Built on Tokio; every round trip is an `.await`
//! - **Scrollable cursors** - Insensitive, sensitive static and sensitive
//!   dynamic, with a rowset cache that avoids round trips where it can
//! - **Updatable cursors** - Positioned statements built from result metadata
//! - **In-memory server** - [`MemoryServer`] drives the engine without a database
//!
//! ## Quick Start
//!
//! ```rust
//! use netcursor::{ColumnInfo, Config, Connection, CursorOptions, MemoryServer, Value};
//!
//! #[tokio::main]
//! async fn main() -> netcursor::Result<()> {
//!     let server = MemoryServer::new();
//!     server.add_table(
//!         "SELECT ID, NAME FROM APP.EMP",
//!         vec![
//!             ColumnInfo::new("ID").with_table("APP", "EMP"),
//!             ColumnInfo::new("NAME").with_table("APP", "EMP"),
//!         ],
//!         vec![
//!             vec![Value::Integer(1), Value::from("Alice")],
//!             vec![Value::Integer(2), Value::from("Bob")],
//!         ],
//!     );
//!
//!     let conn = Connection::new(Box::new(server.transport()), Config::new());
//!     let rs = conn
//!         .open_cursor(
//!             "SELECT ID, NAME FROM APP.EMP",
//!             CursorOptions::scroll_insensitive().updatable(),
//!         )
//!         .await?;
//!
//!     rs.last().await?;
//!     rs.update_value(2, "Robert").await?;
//!     rs.update_row().await?;
//!
//!     rs.before_first().await?;
//!     while rs.next().await? {
//!         println!("{:?}", rs.get_value(2).await?);
//!     }
//!     rs.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use netcursor::Config;
//!
//! let config: Config = "autocommit=false;holdability=close;fetchsize=32".parse().unwrap();
//! assert!(!config.auto_commit);
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod fetch;
pub mod lob;
pub mod metadata;
pub mod mutation;
pub mod positioned;
pub mod registry;
pub mod row;
pub mod sensitivity;
pub mod status;
pub mod transport;
pub mod updates;
pub mod window;

// Re-export commonly used types
pub use config::{Config, CursorOptions, StatementContext};
pub use connection::{Connection, ResultSet};
pub use constants::{
    Concurrency, FetchDirection, FetchOrientation, Holdability, ResultSetType, Sensitivity,
};
pub use error::{Error, Result};
pub use lob::{LobKind, LobLocator};
pub use metadata::{ColumnInfo, ResultMetadata};
pub use row::{Row, Value};
pub use sensitivity::SensitivityPolicy;
pub use status::{StatusRecord, Warning};
pub use transport::{MemoryServer, MemoryTransport, Transport};
