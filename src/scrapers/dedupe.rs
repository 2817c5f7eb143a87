//! Duplicate filter over the record store's natural key.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::warn;

use crate::store::RecordStore;

#[derive(Clone)]
pub struct DuplicateFilter {
    store: Arc<dyn RecordStore>,
}

impl DuplicateFilter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Whether `(first, last, date)` is already stored.
    ///
    /// A failed lookup is logged and reported as unseen.
    pub async fn seen(&self, first_name: &str, last_name: &str, date: NaiveDate) -> bool {
        match self
            .store
            .exists_by_name_and_date(first_name, last_name, date)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    first_name,
                    last_name,
                    %date,
                    error = %e,
                    "Duplicate lookup failed; treating as new"
                );
                false
            }
        }
    }
}
