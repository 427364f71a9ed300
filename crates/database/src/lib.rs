//! SQLite inspection tools for sqlchat.
//!
//! This crate is the tool side of sqlchat: a handful of read/query
//! operations over a single SQLite file, and an MCP [`Handler`](mcp::Handler)
//! that serves them to a conversation driver.
//!
//! # Overview
//!
//! - [`Database`] wraps a database path. Each operation opens its own
//!   connection, does its work, and returns a text blob meant for a
//!   language model to read.
//! - [`SqlTools`] advertises those operations as MCP tools (`query_data`,
//!   `preview_table`, `column_summary`, `schema_discovery`) plus one prompt
//!   template (`example_prompt`). Database failures never reach the
//!   protocol layer; they come back as `Error: ...` text.
//!
//! # Example
//!
//! ```no_run
//! use database::{Database, SqlTools};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./chinook.db");
//! println!("{}", db.schema_discovery()?);
//!
//! let listener = tokio::net::TcpListener::bind("localhost:8000").await?;
//! mcp::serve(listener, SqlTools::new(db), "/mcp/", async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod database;
mod error;
mod render;
mod tools;

pub use database::{COLUMN_SUMMARY_HEADER, Database};
pub use error::{Error, Result};
pub use tools::{
    COLUMN_SUMMARY, EXAMPLE_PROMPT, PREVIEW_TABLE, QUERY_DATA, SCHEMA_DISCOVERY, SqlTools,
    review_prompt,
};
