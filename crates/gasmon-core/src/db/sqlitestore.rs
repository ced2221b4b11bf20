use super::schema::{calibration_col, table_exists, CALIBRATION_COLUMNS};
use super::{prepare_db, with_connection, SharedConnection};
use crate::calibration::record::{CalibrationRecord, ChannelMap};
use crate::calibration::store::CalibrationStore;
use crate::error::{StoreError, StoreResult};
use crate::gaschannel::GasChannel;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// `CalibrationStore` backed by the `calibration` and `co2_settings` tables.
#[derive(Clone)]
pub struct SqliteStore {
    conn: SharedConnection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> rusqlite::Result<Self> {
        Ok(Self::from_connection(super::open_db(path)?))
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        prepare_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Arc::new(Mutex::new(conn)) }
    }

    pub fn from_shared(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Handle for the other users of the same database.
    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.conn)
    }

    async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        match with_connection(&self.conn, f).await {
            Ok(inner) => inner,
            Err(e) => Err(StoreError::Task(e.to_string())),
        }
    }
}

#[async_trait]
impl CalibrationStore for SqliteStore {
    async fn load_records(&self) -> StoreResult<ChannelMap<CalibrationRecord>> {
        self.call(query_calibrations).await
    }

    async fn upsert_record(&self, record: &CalibrationRecord) -> StoreResult<()> {
        let record = record.clone();
        self.call(move |conn| upsert_calibration(conn, &record)).await
    }

    async fn co2_from_o2(&self) -> StoreResult<bool> {
        self.call(|conn| Ok(query_co2_from_o2(conn)?)).await
    }

    async fn set_co2_from_o2(&self, enabled: bool) -> StoreResult<()> {
        self.call(move |conn| Ok(save_co2_from_o2(conn, enabled)?)).await
    }
}

fn record_from_row(row: &Row) -> rusqlite::Result<(String, String, CalibrationRecord)> {
    let gas_key: String = row.get(calibration_col::GAS_TYPE)?;
    let readings_json: String = row.get(calibration_col::READINGS)?;
    let record = CalibrationRecord {
        channel: GasChannel::default(),
        reference_value: row.get(calibration_col::REFERENCE_VALUE)?,
        readings: Vec::new(),
        average: row.get(calibration_col::AVERAGE)?,
        t_value: row.get(calibration_col::T_VALUE)?,
        passed: row.get(calibration_col::PASSED)?,
        correction_slope: row.get(calibration_col::CORRECTION_SLOPE)?,
        correction_intercept: row.get(calibration_col::CORRECTION_INTERCEPT)?,
        updated_at: row.get(calibration_col::UPDATED_AT)?,
    };
    Ok((gas_key, readings_json, record))
}

/// Every stored record keyed by channel. A missing table reads as empty.
pub fn query_calibrations(conn: &Connection) -> StoreResult<ChannelMap<CalibrationRecord>> {
    let mut records = ChannelMap::default();
    if !table_exists(conn, "calibration")? {
        return Ok(records);
    }

    let sql = format!("SELECT {} FROM calibration", CALIBRATION_COLUMNS.join(", "));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], record_from_row)?;

    for row in rows {
        let (gas_key, readings_json, mut record) = row?;
        let Ok(channel) = gas_key.parse::<GasChannel>() else {
            warn!("skipping calibration row with unknown gas type {gas_key:?}");
            continue;
        };
        record.channel = channel;
        record.readings = serde_json::from_str(&readings_json).unwrap_or_else(|e| {
            warn!("{channel} calibration has unreadable readings: {e}");
            Vec::new()
        });
        records.insert(channel, record);
    }
    Ok(records)
}

/// Insert or fully replace the row of `record.channel`.
pub fn upsert_calibration(conn: &Connection, record: &CalibrationRecord) -> StoreResult<()> {
    let readings = serde_json::to_string(&record.readings)?;
    let placeholders: Vec<String> = (1..=CALIBRATION_COLUMNS.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> =
        CALIBRATION_COLUMNS[1..].iter().map(|col| format!("{col} = excluded.{col}")).collect();
    let sql = format!(
        "INSERT INTO calibration ({}) VALUES ({})
         ON CONFLICT(gas_type) DO UPDATE SET {}",
        CALIBRATION_COLUMNS.join(", "),
        placeholders.join(", "),
        updates.join(", "),
    );
    conn.execute(
        &sql,
        params![
            record.channel.key(),
            record.reference_value,
            readings,
            record.average,
            record.t_value,
            record.passed,
            record.correction_slope,
            record.correction_intercept,
            record.updated_at,
        ],
    )?;
    Ok(())
}

/// Derivation flag, off when no settings row or table exists yet.
pub fn query_co2_from_o2(conn: &Connection) -> rusqlite::Result<bool> {
    if !table_exists(conn, "co2_settings")? {
        return Ok(false);
    }
    let flag: Option<bool> = conn
        .query_row("SELECT use_co2_from_o2 FROM co2_settings WHERE id = 1 LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(flag.unwrap_or(false))
}

pub fn save_co2_from_o2(conn: &Connection, enabled: bool) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO co2_settings (id, use_co2_from_o2) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET use_co2_from_o2 = excluded.use_co2_from_o2",
        [enabled],
    )?;
    Ok(())
}
