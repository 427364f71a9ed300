//! SQLite inspection and query operations.

use std::path::{Path, PathBuf};

use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::types::Value;
use rusqlite::{Batch, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::render;
use crate::{Error, Result};

/// Column header of [`Database::column_summary`].
pub const COLUMN_SUMMARY_HEADER: &str = "Column | Type | NotNull | Default | PK";

const TABLE_INFO_SQL: &str =
    r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1)"#;

/// A SQLite database file.
///
/// Holds only the path; every operation opens its own connection and
/// closes it when done.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    /// Execute one SQL statement and return its rows, one tuple per line.
    ///
    /// The connection is in autocommit mode, so mutations are committed
    /// when the statement completes.
    pub fn query_data(&self, sql: &str) -> Result<String> {
        info!(sql, "executing SQL query");
        let conn = self.connect()?;
        // Blank or comment-only input holds no statement; it yields no rows.
        if Batch::new(&conn, sql).next()?.is_none() {
            debug!("no statement to execute");
            return Ok(String::new());
        }

        let mut stmt = conn.prepare(sql)?;
        let width = stmt.column_count();

        let mut lines = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            lines.push(render::tuple(&values(row, width)?));
        }

        info!(rows = lines.len(), "query executed");
        Ok(lines.join("\n"))
    }

    /// First `limit` rows of a table: a ` | `-joined header, then one line per row.
    pub fn preview_table(&self, table_name: &str, limit: i64) -> Result<String> {
        info!(table = table_name, limit, "previewing table");
        let conn = self.connect()?;
        let table = resolve_table(&conn, table_name)?;

        let sql = format!("SELECT * FROM {} LIMIT ?1", quote_identifier(&table));
        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();

        let mut lines = vec![columns.join(" | ")];
        let mut rows = stmt.query([limit])?;
        while let Some(row) = rows.next()? {
            let cells: Vec<String> = values(row, width)?.iter().map(render::plain).collect();
            lines.push(cells.join(" | "));
        }

        Ok(lines.join("\n"))
    }

    /// Column metadata of a table, one ` | `-delimited line per column.
    pub fn column_summary(&self, table_name: &str) -> Result<String> {
        info!(table = table_name, "summarizing columns");
        let conn = self.connect()?;
        let columns = table_info(&conn, table_name)?;
        if columns.is_empty() {
            return Ok(format!("No columns found for table '{table_name}'."));
        }

        let mut lines = vec![COLUMN_SUMMARY_HEADER.to_string()];
        lines.extend(columns.iter().map(|c| {
            format!(
                "{} | {} | {} | {} | {}",
                c.name,
                c.declared_type,
                c.not_null,
                c.default.as_deref().unwrap_or("None"),
                c.primary_key
            )
        }));
        Ok(lines.join("\n"))
    }

    /// Every table with its columns and declared types.
    pub fn schema_discovery(&self) -> Result<String> {
        info!("discovering database schema");
        let conn = self.connect()?;

        let tables: Vec<String> = {
            let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?
        };
        if tables.is_empty() {
            return Ok("No tables found in the database.".to_string());
        }

        let mut lines = Vec::new();
        for table in &tables {
            lines.push(format!("Table: {table}"));
            for column in table_info(&conn, table)? {
                lines.push(format!("  - {} ({})", column.name, column.declared_type));
            }
        }
        debug!(tables = tables.len(), "schema discovered");
        Ok(lines.join("\n"))
    }
}

/// One row of `pragma_table_info`.
struct ColumnInfo {
    name: String,
    declared_type: String,
    not_null: i64,
    default: Option<String>,
    primary_key: i64,
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(TABLE_INFO_SQL)?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get(2)?,
                default: row.get(3)?,
                primary_key: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(columns)
}

/// Look a table or view up in the schema, returning its stored name.
fn resolve_table(conn: &Connection, name: &str) -> Result<String> {
    conn.query_row(
        "SELECT name FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::NoSuchTable(name.to_string()))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn values(row: &Row<'_>, width: usize) -> Result<Vec<Value>> {
    Ok((0..width)
        .map(|i| row.get::<_, Value>(i))
        .collect::<rusqlite::Result<_>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE artists (
                ArtistId INTEGER PRIMARY KEY,
                Name TEXT NOT NULL DEFAULT 'unknown'
            );
            INSERT INTO artists (ArtistId, Name) VALUES
                (1, 'AC/DC'), (2, 'Accept'), (3, 'Aerosmith');
            CREATE TABLE "odd ""name""" (x REAL);
            INSERT INTO "odd ""name""" VALUES (1.5);
            CREATE VIEW first_artist AS SELECT Name FROM artists WHERE ArtistId = 1;
            "#,
        )
        .unwrap();
        (dir, Database::new(path))
    }

    #[test]
    fn query_data_renders_tuples() {
        let (_dir, db) = fixture();
        let out = db
            .query_data("SELECT ArtistId, Name FROM artists ORDER BY ArtistId LIMIT 2")
            .unwrap();
        assert_eq!(out, "(1, 'AC/DC')\n(2, 'Accept')");

        let count = db.query_data("SELECT COUNT(*) FROM artists").unwrap();
        assert_eq!(count, "(3,)");
    }

    #[test]
    fn query_data_commits_mutations() {
        let (_dir, db) = fixture();
        let out = db
            .query_data("INSERT INTO artists (Name) VALUES ('Alanis Morissette')")
            .unwrap();
        assert_eq!(out, "");
        assert_eq!(db.query_data("SELECT COUNT(*) FROM artists").unwrap(), "(4,)");
    }

    #[test]
    fn query_data_without_a_statement_is_empty() {
        let (_dir, db) = fixture();
        assert_eq!(db.query_data("").unwrap(), "");
        assert_eq!(db.query_data("  \n ").unwrap(), "");
        assert_eq!(db.query_data("-- just a comment").unwrap(), "");
    }

    #[test]
    fn query_data_reports_sql_errors() {
        let (_dir, db) = fixture();
        let err = db.query_data("SELECT * FROM albums").unwrap_err();
        assert!(err.to_string().contains("no such table: albums"), "{err}");
    }

    #[test]
    fn preview_respects_limit() {
        let (_dir, db) = fixture();
        let out = db.preview_table("artists", 2).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec!["ArtistId | Name", "1 | AC/DC", "2 | Accept"]);
    }

    #[test]
    fn preview_resolves_names_case_insensitively() {
        let (_dir, db) = fixture();
        assert_eq!(db.preview_table("ARTISTS", 1).unwrap(), "ArtistId | Name\n1 | AC/DC");
        assert_eq!(db.preview_table("first_artist", 5).unwrap(), "Name\nAC/DC");
        assert_eq!(db.preview_table("odd \"name\"", 5).unwrap(), "x\n1.5");
    }

    #[test]
    fn preview_rejects_unknown_tables() {
        let (_dir, db) = fixture();
        let err = db.preview_table("artists; DROP TABLE artists", 5).unwrap_err();
        assert!(matches!(err, Error::NoSuchTable(_)));
        assert_eq!(err.to_string(), "no such table: artists; DROP TABLE artists");
    }

    #[test]
    fn column_summary_lists_pragma_fields() {
        let (_dir, db) = fixture();
        let out = db.column_summary("artists").unwrap();
        assert_eq!(
            out,
            "Column | Type | NotNull | Default | PK\n\
             ArtistId | INTEGER | 0 | None | 1\n\
             Name | TEXT | 1 | 'unknown' | 0"
        );
    }

    #[test]
    fn column_summary_of_missing_table() {
        let (_dir, db) = fixture();
        assert_eq!(
            db.column_summary("nope").unwrap(),
            "No columns found for table 'nope'."
        );
    }

    #[test]
    fn schema_lists_tables_and_columns() {
        let (_dir, db) = fixture();
        let out = db.schema_discovery().unwrap();
        assert!(out.starts_with("Table: artists\n  - ArtistId (INTEGER)\n  - Name (TEXT)"));
        assert!(out.contains("Table: odd \"name\"\n  - x (REAL)"));
        assert!(!out.contains("first_artist"));
    }

    #[test]
    fn schema_of_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("empty.db"));
        assert_eq!(db.schema_discovery().unwrap(), "No tables found in the database.");
    }
}
