use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use crate::errors::Result;
use crate::models::{Watermark, WatermarkOrigin};
use crate::schema_registry::DataSource;
use crate::warehouse::Warehouse;

/// Resolves the resume point of a source from the destination table itself.
/// Nothing is stored besides the loaded rows.
pub struct WatermarkStore {
    warehouse: Arc<dyn Warehouse>,
    epoch: NaiveDate,
}

impl WatermarkStore {
    pub fn new(warehouse: Arc<dyn Warehouse>, epoch: NaiveDate) -> Self {
        Self { warehouse, epoch }
    }

    /// Reads the watermark for `source` stored in `table`, creating the table
    /// first when it does not exist yet.
    pub fn get_watermark(&self, source: &DataSource, table: &str) -> Result<Watermark> {
        if !self.warehouse.table_exists(table)? {
            log::info!("Table '{}' not found, bootstrapping it", table);
            self.warehouse.create_table(table, source.fields)?;
            return Ok(Watermark {
                date: self.epoch,
                origin: WatermarkOrigin::Epoch,
            });
        }

        match self
            .warehouse
            .max_date(table, source.watermark_field, source.date_encoding)?
        {
            Some(date) => Ok(Watermark {
                date,
                origin: WatermarkOrigin::Loaded,
            }),
            None => {
                log::warn!(
                    "Table '{}' exists but has no '{}' values, falling back to {}",
                    table,
                    source.watermark_field,
                    self.epoch
                );
                Ok(Watermark {
                    date: self.epoch,
                    origin: WatermarkOrigin::EmptyTable,
                })
            }
        }
    }
}

pub fn yesterday(today: NaiveDate) -> NaiveDate {
    today - Duration::days(1)
}

/// Data for the current day is still mutable upstream.
pub fn clamp_to_yesterday(date: NaiveDate, today: NaiveDate) -> NaiveDate {
    date.min(yesterday(today))
}
