//! Statement text for every alarm operation, and the filter composer used
//! by alarm listings.
//!
//! Every filter narrows the tenant's alarm set; none of them widen it.  The
//! metric filters are membership tests against a sub-select of alarm ids so
//! they never multiply outer rows.

use crate::models::AlarmFilters;
use crate::statement::{Dialect, Statement, StatementBuilder};

/// Columns and joins shared by `get_alarm` and `get_alarms`.  One row per
/// (alarm, metric, flattened dimensions) triple.
pub fn alarm_select(dialect: Dialect) -> String {
    format!(
        r#"
        SELECT DISTINCT a.id AS alarm_id, a.state,
               ad.id AS alarm_definition_id, ad.name AS alarm_definition_name,
               ad.severity,
               md.name AS metric_name, mdg.dimensions AS metric_dimensions
        FROM alarm AS a
        INNER JOIN alarm_definition AS ad
            ON ad.id = a.alarm_definition_id
        INNER JOIN alarm_metric AS am ON am.alarm_id = a.id
        INNER JOIN metric_definition_dimensions AS mdd
            ON mdd.id = am.metric_definition_dimensions_id
        INNER JOIN metric_definition AS md
            ON md.id = mdd.metric_definition_id
        LEFT JOIN (SELECT dimension_set_id, {concat} AS dimensions
                   FROM metric_dimension GROUP BY dimension_set_id) AS mdg
            ON mdg.dimension_set_id = mdd.metric_dimension_set_id
        "#,
        concat = dialect.dimension_concat(),
    )
}

const ORDER_BY_ALARM_ID: &str = " ORDER BY alarm_id";

/// Alarm-id sub-select prefix shared by both metric filters.
const ALARM_METRIC_SUBSELECT: &str = r#"
        AND a.id IN (SELECT DISTINCT a.id FROM alarm AS a
                     INNER JOIN alarm_metric AS am ON am.alarm_id = a.id
                     INNER JOIN metric_definition_dimensions AS mdd
                         ON mdd.id = am.metric_definition_dimensions_id"#;

/// Build the listing statement for `tenant_id` narrowed by `filters`.
///
/// Filters are applied in a fixed order: alarm definition id, metric name,
/// state, metric dimensions.  Each dimension token adds its own aliased join
/// (`md0`, `md1`, …) onto one shared sub-select, so an alarm qualifies only
/// if a single metric linkage carries every requested pair.
pub fn compose_alarms_query(dialect: Dialect, tenant_id: &str, filters: &AlarmFilters) -> Statement {
    let mut b = StatementBuilder::new(dialect, alarm_select(dialect));

    b.push(" WHERE ad.tenant_id = ").push_bind(tenant_id);

    if let Some(definition_id) = &filters.alarm_definition_id {
        b.push(" AND ad.id = ").push_bind(definition_id.as_str());
    }

    if let Some(metric_name) = &filters.metric_name {
        b.push(ALARM_METRIC_SUBSELECT)
            .push(
                r#"
                     INNER JOIN (SELECT DISTINCT id FROM metric_definition
                                 WHERE name = "#,
            )
            .push_bind(metric_name.as_str())
            .push(
                r#") AS md
                         ON md.id = mdd.metric_definition_id)"#,
            );
    }

    if let Some(state) = filters.state {
        b.push(" AND a.state = ").push_bind(state.to_string());
    }

    if !filters.metric_dimensions.is_empty() {
        b.push(ALARM_METRIC_SUBSELECT);
        for (i, dim) in filters.metric_dimensions.iter().enumerate() {
            b.push(
                r#"
                     INNER JOIN (SELECT DISTINCT dimension_set_id FROM metric_dimension
                                 WHERE name = "#,
            )
            .push_bind(dim.name.as_str())
            .push(" AND value = ")
            .push_bind(dim.value.as_str())
            .push(&format!(
                r#") AS md{i}
                         ON md{i}.dimension_set_id = mdd.metric_dimension_set_id"#
            ));
        }
        b.push(")");
    }

    b.push(ORDER_BY_ALARM_ID);
    b.build()
}

/// A single alarm, scoped to its owning tenant.
pub fn alarm_by_id(dialect: Dialect, tenant_id: &str, alarm_id: &str) -> Statement {
    let mut b = StatementBuilder::new(dialect, alarm_select(dialect));
    b.push(" WHERE ad.tenant_id = ")
        .push_bind(tenant_id)
        .push(" AND a.id = ")
        .push_bind(alarm_id);
    b.build()
}

/// Metrics linked to one alarm.  No tenant scoping: callers authorize via
/// `alarm_by_id` first.
pub fn alarm_metrics(dialect: Dialect, alarm_id: &str) -> Statement {
    let mut b = StatementBuilder::new(
        dialect,
        format!(
            r#"
            SELECT DISTINCT a.id AS alarm_id, md.name AS metric_name,
                   mdg.dimensions AS metric_dimensions
            FROM alarm AS a
            INNER JOIN alarm_metric AS am ON am.alarm_id = a.id
            INNER JOIN metric_definition_dimensions AS mdd
                ON mdd.id = am.metric_definition_dimensions_id
            INNER JOIN metric_definition AS md
                ON md.id = mdd.metric_definition_id
            LEFT JOIN (SELECT dimension_set_id, {concat} AS dimensions
                       FROM metric_dimension GROUP BY dimension_set_id) AS mdg
                ON mdg.dimension_set_id = mdd.metric_dimension_set_id
            WHERE a.id = "#,
            concat = dialect.dimension_concat(),
        ),
    );
    b.push_bind(alarm_id).push(ORDER_BY_ALARM_ID);
    b.build()
}

/// Sub-alarm expressions of one alarm, scoped to its owning tenant.
pub fn sub_alarms(dialect: Dialect, tenant_id: &str, alarm_id: &str) -> Statement {
    let mut b = StatementBuilder::new(
        dialect,
        r#"
        SELECT DISTINCT sa.id AS sub_alarm_id, sa.alarm_id,
               sa.expression, ad.id AS alarm_definition_id
        FROM sub_alarm AS sa
        INNER JOIN alarm AS a
            ON a.id = sa.alarm_id
        INNER JOIN alarm_definition AS ad
            ON ad.id = a.alarm_definition_id
        WHERE ad.tenant_id = "#,
    );
    b.push_bind(tenant_id).push(" AND a.id = ").push_bind(alarm_id);
    b.build()
}

/// Delete an alarm only if it belongs to `tenant_id`.
pub fn delete_alarm(dialect: Dialect, tenant_id: &str, alarm_id: &str) -> Statement {
    let mut b = StatementBuilder::new(
        dialect,
        r#"
        DELETE FROM alarm
        WHERE id IN (SELECT a.id FROM alarm AS a
                     INNER JOIN alarm_definition AS ad
                         ON ad.id = a.alarm_definition_id
                     WHERE ad.tenant_id = "#,
    );
    b.push_bind(tenant_id)
        .push(" AND a.id = ")
        .push_bind(alarm_id)
        .push(")");
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlarmState;

    fn placeholder_count(stmt: &Statement) -> usize {
        // Postgres placeholders are `$N`; the base query contains no other `$`.
        stmt.sql.matches('$').count()
    }

    #[test]
    fn no_filters_degrades_to_all_tenant_alarms() {
        let stmt = compose_alarms_query(Dialect::Postgres, "t1", &AlarmFilters::default());

        assert_eq!(stmt.args, vec!["t1"]);
        assert!(stmt.sql.contains("WHERE ad.tenant_id = $1"));
        assert!(!stmt.sql.contains("a.id IN"));
        assert!(stmt.sql.ends_with(" ORDER BY alarm_id"));
    }

    #[test]
    fn filters_bind_in_fixed_order() {
        let filters = AlarmFilters::default()
            .with_dimension("host", "web1")
            .with_state(AlarmState::Alarm)
            .with_metric_name("cpu.idle_perc")
            .with_alarm_definition_id("def-9");

        let stmt = compose_alarms_query(Dialect::Postgres, "t1", &filters);

        assert_eq!(
            stmt.args,
            vec!["t1", "def-9", "cpu.idle_perc", "ALARM", "host", "web1"]
        );
        let pos = |needle: &str| stmt.sql.find(needle).unwrap();
        assert!(pos("ad.tenant_id = $1") < pos("ad.id = $2"));
        assert!(pos("ad.id = $2") < pos("name = $3"));
        assert!(pos("name = $3") < pos("a.state = $4"));
        assert!(pos("a.state = $4") < pos("name = $5 AND value = $6"));
        assert!(stmt.sql.ends_with(" ORDER BY alarm_id"));
    }

    #[test]
    fn each_dimension_token_gets_its_own_aliased_join() {
        let filters = AlarmFilters::default()
            .with_dimension("host", "a")
            .with_dimension("env", "b")
            .with_dimension("host", "a");

        let stmt = compose_alarms_query(Dialect::Postgres, "t1", &filters);

        for i in 0..3 {
            assert!(stmt.sql.contains(&format!(") AS md{i}")));
            assert!(stmt.sql.contains(&format!("ON md{i}.dimension_set_id = mdd.metric_dimension_set_id")));
        }
        assert!(!stmt.sql.contains("AS md3"));
        // All joins hang off one membership sub-select.
        assert_eq!(stmt.sql.matches("a.id IN").count(), 1);
        assert_eq!(stmt.args, vec!["t1", "host", "a", "env", "b", "host", "a"]);
    }

    #[test]
    fn arg_count_matches_placeholders_and_filter_shape() {
        let cases = [
            AlarmFilters::default(),
            AlarmFilters::default().with_state(AlarmState::Ok),
            AlarmFilters::default().with_metric_name("m").with_alarm_definition_id("d"),
            AlarmFilters::default().with_dimension("a", "1").with_dimension("b", "2"),
            AlarmFilters::default()
                .with_alarm_definition_id("d")
                .with_metric_name("m")
                .with_state(AlarmState::Undetermined)
                .with_dimension("a", "1"),
        ];

        for filters in &cases {
            let stmt = compose_alarms_query(Dialect::Postgres, "t", filters);
            assert_eq!(stmt.args.len(), filters.arg_count(), "{filters:?}");
            assert_eq!(placeholder_count(&stmt), filters.arg_count(), "{filters:?}");

            let sqlite = compose_alarms_query(Dialect::Sqlite, "t", filters);
            assert_eq!(sqlite.sql.matches('?').count(), filters.arg_count());
            assert_eq!(sqlite.args, stmt.args);
        }
    }

    #[test]
    fn empty_dimension_filter_matches_unfiltered_query() {
        let filters = AlarmFilters::from_query_params([("metric_dimensions", "")]).unwrap();
        assert_eq!(
            compose_alarms_query(Dialect::Sqlite, "t1", &filters),
            compose_alarms_query(Dialect::Sqlite, "t1", &AlarmFilters::default()),
        );
    }

    #[test]
    fn metric_name_is_bound_not_interpolated() {
        let filters = AlarmFilters::default().with_metric_name("x' OR '1'='1");
        let stmt = compose_alarms_query(Dialect::Postgres, "t1", &filters);
        assert!(!stmt.sql.contains("OR '1'='1"));
        assert_eq!(stmt.args[1], "x' OR '1'='1");
    }

    #[test]
    fn single_alarm_statements_scope_by_tenant_first() {
        for stmt in [
            alarm_by_id(Dialect::Postgres, "t1", "a1"),
            sub_alarms(Dialect::Postgres, "t1", "a1"),
            delete_alarm(Dialect::Postgres, "t1", "a1"),
        ] {
            assert_eq!(stmt.args, vec!["t1", "a1"]);
            assert!(stmt.sql.contains("ad.tenant_id = $1"));
            assert!(stmt.sql.contains("a.id = $2"));
        }
    }

    #[test]
    fn delete_goes_through_tenant_subselect() {
        let stmt = delete_alarm(Dialect::Sqlite, "t1", "a1");
        assert!(stmt.sql.contains("WHERE id IN (SELECT a.id FROM alarm AS a"));
        assert!(stmt.sql.trim_end().ends_with(')'));
    }

    #[test]
    fn alarm_metrics_has_no_tenant_filter() {
        let stmt = alarm_metrics(Dialect::Postgres, "a1");
        assert_eq!(stmt.args, vec!["a1"]);
        assert!(!stmt.sql.contains("tenant_id"));
        assert!(stmt.sql.contains("string_agg"));
        assert!(stmt.sql.ends_with(" ORDER BY alarm_id"));
    }
}
