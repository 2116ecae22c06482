use order_intake_core::StoreError;

/// `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";

/// Map a sqlx error into the store taxonomy.
///
/// Connection-level failures are transient and a closed pool is fatal.
/// Data exceptions (class 22) and integrity violations (class 23) other than
/// the unique key are rejections of the values sent, never a lost store.
/// Decode failures mean the stored row is corrupt.
#[must_use]
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    let mapped = match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => StoreError::Fatal(err.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(err.to_string())
        }
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref(), db.message()),
        _ => StoreError::Fatal(err.to_string()),
    };

    metrics::counter!("order_store_errors_total", "kind" => kind(&mapped)).increment(1);
    mapped
}

/// Classify a database error by its SQLSTATE.
fn classify_sqlstate(code: Option<&str>, message: &str) -> StoreError {
    match code {
        Some(UNIQUE_VIOLATION) => StoreError::Duplicate(message.to_string()),
        Some(code) if code.starts_with("22") || code.starts_with("23") => {
            StoreError::Rejected(format!("{message} (SQLSTATE {code})"))
        }
        // Class 08 connection exceptions, 57P0x operator intervention,
        // 40001 serialization failure, 40P01 deadlock.
        Some(code) if code.starts_with("08") || code.starts_with("57P") || code == "40001" || code == "40P01" => {
            StoreError::Unavailable(format!("{message} (SQLSTATE {code})"))
        }
        Some(code) => StoreError::Fatal(format!("{message} (SQLSTATE {code})")),
        None => StoreError::Fatal(message.to_string()),
    }
}

const fn kind(err: &StoreError) -> &'static str {
    match err {
        StoreError::NotFound => "not_found",
        StoreError::Duplicate(_) => "duplicate",
        StoreError::StatusMismatch { .. } => "status_mismatch",
        StoreError::Unavailable(_) => "unavailable",
        StoreError::Rejected(_) => "rejected",
        StoreError::Timeout => "timeout",
        StoreError::Corrupt(_) => "corrupt",
        StoreError::Fatal(_) => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_classified() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(matches!(map_sqlx_error(sqlx::Error::PoolClosed), StoreError::Fatal(_)));
        assert_eq!(map_sqlx_error(sqlx::Error::RowNotFound), StoreError::NotFound);
    }

    #[test]
    fn io_errors_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(map_sqlx_error(sqlx::Error::Io(io)).is_transient());
    }

    #[test]
    fn bad_values_are_rejected_not_fatal() {
        // 22021 invalid byte sequence, 22001 string too long, 23514 check violation
        for code in ["22021", "22001", "23514", "23502"] {
            let err = classify_sqlstate(Some(code), "bad value");
            assert!(matches!(err, StoreError::Rejected(_)), "{code} -> {err:?}");
        }
    }

    #[test]
    fn unique_violation_is_a_duplicate() {
        assert_eq!(
            classify_sqlstate(Some("23505"), "duplicate key"),
            StoreError::Duplicate("duplicate key".to_string())
        );
    }

    #[test]
    fn connection_class_codes_are_transient() {
        for code in ["08006", "57P01", "40001", "40P01"] {
            assert!(classify_sqlstate(Some(code), "gone").is_transient(), "{code}");
        }
    }

    #[test]
    fn unknown_codes_are_fatal() {
        assert!(matches!(
            classify_sqlstate(Some("42P01"), "relation does not exist"),
            StoreError::Fatal(_)
        ));
        assert!(matches!(classify_sqlstate(None, "no code"), StoreError::Fatal(_)));
    }
}
