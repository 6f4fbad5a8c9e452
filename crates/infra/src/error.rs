//! SQLx → core error mapping.
//!
//! | SQLx error | SQLSTATE | `CoreError` |
//! |------------|----------|-------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Validation` |
//! | Database (check constraint violation) | `23514` | `Validation` |
//! | Database (other) | any | `Storage` |
//! | `PoolClosed` | — | `Storage` |
//! | `RowNotFound` | — | `NotFound` |
//! | other | — | `Storage` |

use palisade_core::CoreError;

/// Map a SQLx error into the core taxonomy, labeled with the failing
/// operation.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned());
            match code.as_deref() {
                Some("23505") => {
                    CoreError::conflict(format!("duplicate key in {operation}"))
                }
                Some("23503") | Some("23514") => CoreError::validation(format!(
                    "constraint violation in {operation}"
                )),
                _ => CoreError::storage(format!(
                    "database error in {operation}: {}",
                    db_err.message()
                )),
            }
        }
        sqlx::Error::PoolClosed => {
            CoreError::storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => CoreError::NotFound,
        other => CoreError::storage(format!("sqlx error in {operation}: {other}")),
    }
}
