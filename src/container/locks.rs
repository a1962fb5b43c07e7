//! Per-container writer serialization.
//!
//! Every read-modify-write of a container runs under that container's
//! mutex. Different containers never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::{HexaError, HexaResult};

/// Registry of writer locks keyed by container name
#[derive(Debug, Default)]
pub struct WriteLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WriteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the writer lock for a container
    pub fn lock_for(&self, name: &str) -> HexaResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| HexaError::internal("write lock registry poisoned"))?;

        Ok(Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    /// Number of containers that have been written through this registry
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_shares_lock() {
        let locks = WriteLocks::new();
        let a = locks.lock_for("users").unwrap();
        let b = locks.lock_for("users").unwrap();
        let c = locks.lock_for("sessions").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }
}
