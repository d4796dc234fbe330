//! SQLite-Backend-Implementierungen fuer alle Repository-Traits

pub mod envelopes;
pub mod pool;
pub mod public_keys;

pub use pool::SqliteDb;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::DbError;
use crate::repository::DbResult;

/// Zeitstempel mit fester Laenge (Nanosekunden, `Z`), damit Vergleiche
/// auf Text-Ebene chronologisch sind
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::intern(format!("Ungueltige Zeitangabe '{s}': {e}")))
}
