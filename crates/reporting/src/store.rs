use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;

use batchline_core::{StockError, StockResult};

use crate::daily::DailyReport;

/// In-memory daily report store, keyed uniquely by date.
///
/// Reports are derived data; saving the same date again overwrites the
/// previous row (idempotent upsert).
#[derive(Debug, Default)]
pub struct ReportStore {
    reports: RwLock<HashMap<NaiveDate, DailyReport>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, report: DailyReport) -> StockResult<()> {
        let mut reports = self
            .reports
            .write()
            .map_err(|_| StockError::validation("report store lock poisoned"))?;
        reports.insert(report.date, report);
        Ok(())
    }

    pub fn get(&self, date: NaiveDate) -> StockResult<Option<DailyReport>> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StockError::validation("report store lock poisoned"))?;
        Ok(reports.get(&date).cloned())
    }
}
