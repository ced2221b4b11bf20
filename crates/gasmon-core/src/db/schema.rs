use rusqlite::{Connection, OptionalExtension, Result};

pub const DB_VERSION: i32 = 2; // latest schema version

pub const CALIBRATION_COLUMNS: &[&str] = &[
    "gas_type",
    "reference_value",
    "readings",
    "average",
    "t_value",
    "passed",
    "correction_slope",
    "correction_intercept",
    "updated_at",
];

pub mod calibration_col {
    pub const GAS_TYPE: usize = 0;
    pub const REFERENCE_VALUE: usize = 1;
    pub const READINGS: usize = 2;
    pub const AVERAGE: usize = 3;
    pub const T_VALUE: usize = 4;
    pub const PASSED: usize = 5;
    pub const CORRECTION_SLOPE: usize = 6;
    pub const CORRECTION_INTERCEPT: usize = 7;
    pub const UPDATED_AT: usize = 8;
}

pub fn initiate_tables(conn: &Connection) -> Result<()> {
    conn.execute(&format!("PRAGMA user_version = {};", DB_VERSION), [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS calibration (
            gas_type                TEXT PRIMARY KEY,
            reference_value         FLOAT NOT NULL,
            readings                TEXT NOT NULL,
            average                 FLOAT NOT NULL,
            t_value                 FLOAT,
            passed                  INTEGER,
            correction_slope        FLOAT NOT NULL DEFAULT 1,
            correction_intercept    FLOAT NOT NULL DEFAULT 0,
            updated_at              TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS co2_settings (
            id                  INTEGER PRIMARY KEY CHECK (id = 1),
            use_co2_from_o2     INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute("INSERT OR IGNORE INTO co2_settings (id, use_co2_from_o2) VALUES (1, 0)", [])?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sensor (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            node_name       TEXT NOT NULL,
            co              FLOAT NOT NULL,
            co2             FLOAT NOT NULL,
            o2              FLOAT NOT NULL,
            fan             INTEGER NOT NULL DEFAULT 0,
            compressor      INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_sensor_created_at ON sensor (created_at)", [])?;

    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
        [table],
        |_| Ok(true),
    )
    .optional()
    .map(|opt| opt.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_created_once() {
        let conn = Connection::open_in_memory().unwrap();
        initiate_tables(&conn).unwrap();
        initiate_tables(&conn).unwrap();
        for table in ["calibration", "co2_settings", "sensor"] {
            assert!(table_exists(&conn, table).unwrap(), "{table} missing");
        }
        let rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM co2_settings", [], |row| row.get(0)).unwrap();
        assert_eq!(rows, 1);
        let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0)).unwrap();
        assert_eq!(version, DB_VERSION);
    }

    #[test]
    fn column_list_matches_table() {
        let conn = Connection::open_in_memory().unwrap();
        initiate_tables(&conn).unwrap();
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('calibration')").unwrap();
        let names: Vec<String> =
            stmt.query_map([], |row| row.get(0)).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(names, CALIBRATION_COLUMNS);
    }
}
