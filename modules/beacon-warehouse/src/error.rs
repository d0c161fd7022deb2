#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid procedure name: {0}")]
    InvalidProcedure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How the bulk writer should treat a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorClass {
    /// Out of disk or memory on the server. Trips the circuit immediately.
    StorageFull,
    /// Deadlock victim. Retried without advancing the failure counter.
    Deadlock,
    /// Anything else; counted toward the consecutive-failure trip.
    Transient,
}

impl WarehouseError {
    /// Classify by SQLSTATE: `53100` (disk full) and `53200` (out of memory)
    /// are terminal storage conditions, `40P01` is a deadlock.
    pub fn class(&self) -> SqlErrorClass {
        let code = match self {
            WarehouseError::Database(sqlx::Error::Database(db)) => db.code(),
            _ => None,
        };
        match code.as_deref() {
            Some("53100") | Some("53200") => SqlErrorClass::StorageFull,
            Some("40P01") => SqlErrorClass::Deadlock,
            _ => SqlErrorClass::Transient,
        }
    }

    pub fn is_storage_full(&self) -> bool {
        self.class() == SqlErrorClass::StorageFull
    }

    pub fn is_deadlock(&self) -> bool {
        self.class() == SqlErrorClass::Deadlock
    }
}
