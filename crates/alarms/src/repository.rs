//! Alarm repository — one method per alarm operation.
//!
//! Every method builds its statement via [`crate::query`], runs it on the
//! injected [`QueryExecutor`] and maps the records into typed rows.  Single
//! alarm lookups and deletes report `DbError::NotFound` when nothing matched;
//! collection reads return an empty `Vec` instead.

use tracing::{debug, info, instrument};

use crate::executor::{EffectTransaction, QueryExecutor, Record};
use crate::models::{fold_alarms, Alarm, AlarmFilters, AlarmMetricRow, AlarmRow, SubAlarmRow};
use crate::query;
use crate::DbError;

/// Tenant-scoped access to alarms.
pub struct AlarmsRepository<E> {
    executor: E,
}

impl<E: QueryExecutor> AlarmsRepository<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Rows of one alarm, one per linked metric.
    ///
    /// Returns `DbError::NotFound` if the alarm does not exist or belongs to
    /// another tenant.
    #[instrument(skip(self))]
    pub async fn get_alarm(&self, tenant_id: &str, alarm_id: &str) -> Result<Vec<AlarmRow>, DbError> {
        let stmt = query::alarm_by_id(self.executor.dialect(), tenant_id, alarm_id);
        let rows: Vec<AlarmRow> = map_rows(self.executor.fetch_all(&stmt).await?)?;

        if rows.is_empty() {
            info!("alarm not found");
            return Err(DbError::NotFound {
                entity: "alarm",
                id: alarm_id.to_owned(),
            });
        }

        Ok(rows)
    }

    /// All of the tenant's alarms that satisfy every filter, ordered by
    /// alarm id.
    #[instrument(skip(self, filters), fields(filter_args = filters.arg_count()))]
    pub async fn get_alarms(
        &self,
        tenant_id: &str,
        filters: &AlarmFilters,
    ) -> Result<Vec<AlarmRow>, DbError> {
        let stmt = query::compose_alarms_query(self.executor.dialect(), tenant_id, filters);
        let rows: Vec<AlarmRow> = map_rows(self.executor.fetch_all(&stmt).await?)?;
        debug!("matched {} alarm rows", rows.len());
        Ok(rows)
    }

    /// Metrics of one alarm.  The caller is expected to have authorized the
    /// alarm through [`get_alarm`](Self::get_alarm).
    #[instrument(skip(self))]
    pub async fn get_alarm_metrics(&self, alarm_id: &str) -> Result<Vec<AlarmMetricRow>, DbError> {
        let stmt = query::alarm_metrics(self.executor.dialect(), alarm_id);
        map_rows(self.executor.fetch_all(&stmt).await?)
    }

    /// Sub-alarm expressions of one alarm.  An alarm with no sub-alarms
    /// yields an empty `Vec`.
    #[instrument(skip(self))]
    pub async fn get_sub_alarms(
        &self,
        tenant_id: &str,
        alarm_id: &str,
    ) -> Result<Vec<SubAlarmRow>, DbError> {
        let stmt = query::sub_alarms(self.executor.dialect(), tenant_id, alarm_id);
        map_rows(self.executor.fetch_all(&stmt).await?)
    }

    /// Permanently delete an alarm owned by `tenant_id`.
    ///
    /// Returns `DbError::NotFound` (and commits nothing) if no row was deleted.
    #[instrument(skip(self))]
    pub async fn delete_alarm(&self, tenant_id: &str, alarm_id: &str) -> Result<(), DbError> {
        let stmt = query::delete_alarm(self.executor.dialect(), tenant_id, alarm_id);

        let mut tx = self.executor.begin().await?;
        let affected = tx.execute_for_effect(&stmt).await?;

        if affected < 1 {
            info!("alarm not found, nothing deleted");
            return Err(DbError::NotFound {
                entity: "alarm",
                id: alarm_id.to_owned(),
            });
        }

        tx.commit().await?;
        info!("deleted alarm");
        Ok(())
    }

    /// [`get_alarm`](Self::get_alarm), folded into a single `Alarm`.
    pub async fn find_alarm(&self, tenant_id: &str, alarm_id: &str) -> Result<Alarm, DbError> {
        let rows = self.get_alarm(tenant_id, alarm_id).await?;
        fold_alarms(rows).into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "alarm",
            id: alarm_id.to_owned(),
        })
    }

    /// [`get_alarms`](Self::get_alarms), folded into one `Alarm` per id.
    pub async fn find_alarms(
        &self,
        tenant_id: &str,
        filters: &AlarmFilters,
    ) -> Result<Vec<Alarm>, DbError> {
        Ok(fold_alarms(self.get_alarms(tenant_id, filters).await?))
    }
}

fn map_rows<T>(records: Vec<Record>) -> Result<Vec<T>, DbError>
where
    T: for<'r> TryFrom<&'r Record, Error = DbError>,
{
    records.iter().map(|record| <T as TryFrom<&Record>>::try_from(record)).collect()
}
