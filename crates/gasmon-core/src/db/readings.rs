use super::sqlitestore::query_co2_from_o2;
use crate::reading::{DeviceReading, HistoryRow};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};

/// Store one device post. CO2 lands in percent, derived from O2 when the
/// derivation flag is on. Returns the stored row.
pub fn insert_reading(
    conn: &Connection,
    reading: &DeviceReading,
    recorded_at: DateTime<Utc>,
) -> Result<HistoryRow> {
    let use_co2_from_o2 = query_co2_from_o2(conn)?;
    let row = HistoryRow {
        recorded_at,
        co: reading.co_ppm,
        co2: reading.co2_percent(use_co2_from_o2),
        o2: reading.o2_percent,
    };
    conn.execute(
        "INSERT INTO sensor (node_name, co, co2, o2, fan, compressor, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            reading.node_name,
            row.co,
            row.co2,
            row.o2,
            reading.fan,
            reading.compressor,
            row.recorded_at
        ],
    )?;
    Ok(row)
}

fn history_row(row: &Row) -> Result<HistoryRow> {
    Ok(HistoryRow { recorded_at: row.get(0)?, co: row.get(1)?, co2: row.get(2)?, o2: row.get(3)? })
}

/// Newest `limit` rows, returned oldest first.
pub fn query_history(conn: &Connection, limit: usize) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT created_at, co, co2, o2 FROM sensor
         ORDER BY created_at DESC, id DESC
         LIMIT ?1",
    )?;
    let mut rows = stmt.query_map([limit as i64], history_row)?.collect::<Result<Vec<_>>>()?;
    rows.reverse();
    Ok(rows)
}

pub fn query_latest(conn: &Connection) -> Result<Option<HistoryRow>> {
    conn.query_row(
        "SELECT created_at, co, co2, o2 FROM sensor ORDER BY created_at DESC, id DESC LIMIT 1",
        [],
        history_row,
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlitestore::save_co2_from_o2;
    use crate::db::initiate_tables;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initiate_tables(&conn).unwrap();
        conn
    }

    fn device(co: f64, co2_ppm: f64, o2: f64) -> DeviceReading {
        DeviceReading { co_ppm: co, co2_ppm, o2_percent: o2, ..Default::default() }
    }

    #[test]
    fn co2_is_stored_in_percent() {
        let conn = conn();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let row = insert_reading(&conn, &device(5.0, 400.0, 20.8), t0).unwrap();
        assert_relative_eq!(row.co2, 0.04, epsilon = 1e-12);

        let latest = query_latest(&conn).unwrap().unwrap();
        assert_eq!(latest, row);
    }

    #[test]
    fn co2_derived_when_flag_on() {
        let conn = conn();
        save_co2_from_o2(&conn, true).unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let row = insert_reading(&conn, &device(5.0, 400.0, 20.5), t0).unwrap();
        assert_relative_eq!(row.co2, 0.40, epsilon = 1e-9);
    }

    #[test]
    fn history_is_newest_n_in_chronological_order() {
        let conn = conn();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        for i in 0..10 {
            let at = t0 + Duration::seconds(i * 2);
            insert_reading(&conn, &device(i as f64, 0.0, 20.9), at).unwrap();
        }
        let rows = query_history(&conn, 3).unwrap();
        let cos: Vec<f64> = rows.iter().map(|r| r.co).collect();
        assert_eq!(cos, vec![7.0, 8.0, 9.0]);
        assert!(rows.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
    }

    #[test]
    fn empty_table_has_no_latest() {
        let conn = conn();
        assert!(query_latest(&conn).unwrap().is_none());
        assert!(query_history(&conn, 50).unwrap().is_empty());
    }
}
