use super::schema::table_exists;
use rusqlite::{Connection, OptionalExtension, Result};
use tracing::info;

/// Bring an existing database up to `DB_VERSION`. Returns the number of
/// migration steps applied. Fresh databases are left to `initiate_tables`.
pub fn migrate_db(conn: &Connection) -> Result<usize> {
    // user_version is 0 by default in SQLite
    let mut version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let mut migrated_steps = 0;

    if !table_exists(conn, "calibration")? {
        return Ok(0);
    }

    // --- Migration 2: scale-only calibrations gain an intercept ---
    if version < 2 {
        if !column_exists(conn, "calibration", "correction_intercept")? {
            info!("Applying migration v2: add calibration.correction_intercept");
            conn.execute(
                "ALTER TABLE calibration ADD COLUMN correction_intercept FLOAT NOT NULL DEFAULT 0;",
                [],
            )?;
        }

        // zero slopes were written by runs that averaged 0
        conn.execute(
            "UPDATE calibration SET correction_slope = 1 WHERE correction_slope = 0 OR correction_slope IS NULL;",
            [],
        )?;

        version = 2;
        migrated_steps += 1;
    }

    if migrated_steps > 0 {
        conn.execute(&format!("PRAGMA user_version = {};", version), [])?;
        info!("Database migrated to version {}", version);
    }

    Ok(migrated_steps)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    // NOTE: the table name has to be a literal in the pragma call.
    fn esc(s: &str) -> String {
        s.replace('\'', "''")
    }

    let sql = format!("SELECT 1 FROM pragma_table_info('{}') WHERE name = ?1 LIMIT 1;", esc(table));
    conn.query_row(&sql, [column], |_| Ok(true)).optional().map(|opt| opt.unwrap_or(false))
}
