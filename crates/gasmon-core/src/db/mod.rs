pub mod migrate;
pub mod readings;
pub mod schema;
pub mod sqlitestore;

pub use migrate::migrate_db;
pub use schema::{initiate_tables, DB_VERSION};
pub use sqlitestore::SqliteStore;

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open (or create) the database and bring its schema up to date.
pub fn open_db<P: AsRef<Path>>(path: P) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    prepare_db(&conn)?;
    Ok(conn)
}

/// Migrate existing tables first, then create whatever is still missing.
pub fn prepare_db(conn: &Connection) -> rusqlite::Result<()> {
    migrate_db(conn)?;
    initiate_tables(conn)?;
    Ok(())
}

/// Run `f` against the shared connection on the blocking pool.
pub async fn with_connection<F, R>(conn: &SharedConnection, f: F) -> Result<R, tokio::task::JoinError>
where
    F: FnOnce(&Connection) -> R + Send + 'static,
    R: Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let conn = conn.lock();
        f(&*conn)
    })
    .await
}
