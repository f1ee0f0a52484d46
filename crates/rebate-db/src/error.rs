use rebate_types::TypeError;

/// Maps a raw `sqlx` error onto the shared error taxonomy: constraint
/// violations are conflicts, anything else is a transient I/O failure
/// (the caller decides whether to retry).
pub fn map_sqlx_err(e: sqlx::Error) -> TypeError {
    match &e {
        sqlx::Error::RowNotFound => TypeError::NotFound("row not found".into()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            TypeError::Conflict(db.message().to_string())
        }
        _ => TypeError::Transient(e.to_string()),
    }
}
