use uuid::Uuid;

use flowai_core::Status;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Read the `uuid` column.
pub fn get_uuid(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
) -> Result<Uuid, StoreError> {
    let raw: String = get(row, idx, table, "uuid")?;
    Uuid::parse_str(&raw).map_err(|e| StoreError::CorruptRow {
        table,
        column: "uuid",
        detail: e.to_string(),
    })
}

/// Read the `status` column.
pub fn get_status(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
) -> Result<Status, StoreError> {
    let raw: String = get(row, idx, table, "status")?;
    parse_enum(&raw, table, "status")
}

/// Status filter as a SQL parameter; `None` matches every status.
/// Pair with `(?N IS NULL OR status = ?N)`.
pub fn status_param(status: Option<Status>) -> Option<String> {
    status.map(|s| s.to_string())
}

/// Run a query and map every row.
pub fn query_all<T, P: rusqlite::Params>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: P,
    map: fn(&rusqlite::Row<'_>) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(map(row)?);
    }
    Ok(results)
}

/// Run a query and map the first row, if any.
pub fn query_opt<T, P: rusqlite::Params>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: P,
    map: fn(&rusqlite::Row<'_>) -> Result<T, StoreError>,
) -> Result<Option<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(map(row)?)),
        None => Ok(None),
    }
}
