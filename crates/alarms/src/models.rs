//! Row structs, filter input, and the folded `Alarm` view.
//!
//! Rows map 1-to-1 onto the columns the queries in [`crate::query`] select.
//! An alarm linked to several metrics comes back as several rows;
//! [`fold_alarms`] reduces them into one [`Alarm`] each.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::executor::Record;
use crate::DbError;

// ---------------------------------------------------------------------------
// alarm state
// ---------------------------------------------------------------------------

/// Possible states of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmState {
    Ok,
    Alarm,
    Undetermined,
}

impl std::fmt::Display for AlarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok           => write!(f, "OK"),
            Self::Alarm        => write!(f, "ALARM"),
            Self::Undetermined => write!(f, "UNDETERMINED"),
        }
    }
}

impl std::str::FromStr for AlarmState {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK"           => Ok(Self::Ok),
            "ALARM"        => Ok(Self::Alarm),
            "UNDETERMINED" => Ok(Self::Undetermined),
            other          => Err(DbError::InvalidState(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// filters
// ---------------------------------------------------------------------------

/// One `name:value` token of a `metric_dimensions` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionFilter {
    pub name: String,
    pub value: String,
}

impl std::str::FromStr for DimensionFilter {
    type Err = DbError;

    /// Splits once on the first `:`; anything after it belongs to the value.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.split_once(':') {
            Some((name, value)) if !name.is_empty() && !value.is_empty() => Ok(Self {
                name: name.to_owned(),
                value: value.to_owned(),
            }),
            _ => Err(DbError::InvalidFilter(format!(
                "metric dimension '{token}' is not of the form name:value"
            ))),
        }
    }
}

/// Parse a comma-separated `name:value` list.
///
/// Empty input, and empty segments between commas, produce no tokens.
/// Duplicate tokens are kept.
pub fn parse_metric_dimensions(raw: &str) -> Result<Vec<DimensionFilter>, DbError> {
    raw.split(',')
        .filter(|token| !token.is_empty())
        .map(str::parse)
        .collect()
}

/// Optional constraints for an alarm listing.  `None` means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmFilters {
    pub alarm_definition_id: Option<String>,
    pub metric_name: Option<String>,
    pub state: Option<AlarmState>,
    pub metric_dimensions: Vec<DimensionFilter>,
}

impl AlarmFilters {
    /// Build filters from string query parameters.  Unrecognised keys are
    /// ignored.
    pub fn from_query_params<'a, I>(params: I) -> Result<Self, DbError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filters = Self::default();
        for (key, value) in params {
            match key {
                "alarm_definition_id" => filters.alarm_definition_id = Some(value.to_owned()),
                "metric_name"         => filters.metric_name = Some(value.to_owned()),
                "state"               => filters.state = Some(value.parse()?),
                "metric_dimensions"   => filters.metric_dimensions = parse_metric_dimensions(value)?,
                other => tracing::debug!("ignoring unknown alarm filter '{}'", other),
            }
        }
        Ok(filters)
    }

    pub fn with_alarm_definition_id(mut self, id: impl Into<String>) -> Self {
        self.alarm_definition_id = Some(id.into());
        self
    }

    pub fn with_metric_name(mut self, name: impl Into<String>) -> Self {
        self.metric_name = Some(name.into());
        self
    }

    pub fn with_state(mut self, state: AlarmState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metric_dimensions.push(DimensionFilter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Number of positional arguments a listing statement will carry.
    pub fn arg_count(&self) -> usize {
        1 + usize::from(self.alarm_definition_id.is_some())
            + usize::from(self.metric_name.is_some())
            + usize::from(self.state.is_some())
            + 2 * self.metric_dimensions.len()
    }
}

// ---------------------------------------------------------------------------
// rows
// ---------------------------------------------------------------------------

/// One (alarm, metric) pairing from the alarm base query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmRow {
    pub alarm_id: String,
    pub state: AlarmState,
    pub alarm_definition_id: String,
    pub alarm_definition_name: String,
    pub severity: String,
    pub metric_name: String,
    /// Flattened `name=value,…`; `None` for a metric with no dimensions.
    pub metric_dimensions: Option<String>,
}

impl TryFrom<&Record> for AlarmRow {
    type Error = DbError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Self {
            alarm_id: record.required("alarm_id")?.to_owned(),
            state: record.required("state")?.parse()?,
            alarm_definition_id: record.required("alarm_definition_id")?.to_owned(),
            alarm_definition_name: record.required("alarm_definition_name")?.to_owned(),
            severity: record.required("severity")?.to_owned(),
            metric_name: record.required("metric_name")?.to_owned(),
            metric_dimensions: record.get("metric_dimensions")?.map(str::to_owned),
        })
    }
}

/// A metric linked to an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmMetricRow {
    pub alarm_id: String,
    pub metric_name: String,
    pub metric_dimensions: Option<String>,
}

impl TryFrom<&Record> for AlarmMetricRow {
    type Error = DbError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Self {
            alarm_id: record.required("alarm_id")?.to_owned(),
            metric_name: record.required("metric_name")?.to_owned(),
            metric_dimensions: record.get("metric_dimensions")?.map(str::to_owned),
        })
    }
}

/// One clause of a compound alarm expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubAlarmRow {
    pub sub_alarm_id: String,
    pub alarm_id: String,
    pub expression: String,
    pub alarm_definition_id: String,
}

impl TryFrom<&Record> for SubAlarmRow {
    type Error = DbError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Self {
            sub_alarm_id: record.required("sub_alarm_id")?.to_owned(),
            alarm_id: record.required("alarm_id")?.to_owned(),
            expression: record.required("expression")?.to_owned(),
            alarm_definition_id: record.required("alarm_definition_id")?.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// folded view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmDefinitionRef {
    pub id: String,
    pub name: String,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricRef {
    pub name: String,
    pub dimensions: BTreeMap<String, String>,
}

impl MetricRef {
    fn new(name: String, dimensions: Option<&str>) -> Self {
        Self {
            name,
            dimensions: dimensions.map(parse_flattened_dimensions).unwrap_or_default(),
        }
    }
}

/// An alarm with all of its metric associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alarm {
    pub id: String,
    pub state: AlarmState,
    pub alarm_definition: AlarmDefinitionRef,
    pub metrics: Vec<MetricRef>,
}

/// Split a flattened `name=value,name=value` string.  Segments without `=`
/// are dropped.
pub fn parse_flattened_dimensions(flat: &str) -> BTreeMap<String, String> {
    flat.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
}

/// Fold rows ordered by alarm id into one `Alarm` per id.
pub fn fold_alarms(rows: Vec<AlarmRow>) -> Vec<Alarm> {
    rows.into_iter().fold(Vec::new(), |mut alarms: Vec<Alarm>, row| {
        let metric = MetricRef::new(row.metric_name, row.metric_dimensions.as_deref());
        match alarms.last_mut() {
            Some(last) if last.id == row.alarm_id => {
                if !last.metrics.contains(&metric) {
                    last.metrics.push(metric);
                }
            }
            _ => alarms.push(Alarm {
                id: row.alarm_id,
                state: row.state,
                alarm_definition: AlarmDefinitionRef {
                    id: row.alarm_definition_id,
                    name: row.alarm_definition_name,
                    severity: row.severity,
                },
                metrics: vec![metric],
            }),
        }
        alarms
    })
}

/// Group metric rows by alarm id, preserving row order.
pub fn fold_alarm_metrics(rows: Vec<AlarmMetricRow>) -> Vec<(String, Vec<MetricRef>)> {
    rows.into_iter().fold(Vec::new(), |mut grouped: Vec<(String, Vec<MetricRef>)>, row| {
        let metric = MetricRef::new(row.metric_name, row.metric_dimensions.as_deref());
        match grouped.last_mut() {
            Some((id, metrics)) if *id == row.alarm_id => metrics.push(metric),
            _ => grouped.push((row.alarm_id, vec![metric])),
        }
        grouped
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(alarm_id: &str, metric: &str, dims: Option<&str>) -> AlarmRow {
        AlarmRow {
            alarm_id: alarm_id.into(),
            state: AlarmState::Alarm,
            alarm_definition_id: "def-1".into(),
            alarm_definition_name: "cpu high".into(),
            severity: "HIGH".into(),
            metric_name: metric.into(),
            metric_dimensions: dims.map(Into::into),
        }
    }

    #[test]
    fn alarm_state_round_trips_through_wire_form() {
        for state in [AlarmState::Ok, AlarmState::Alarm, AlarmState::Undetermined] {
            assert_eq!(state.to_string().parse::<AlarmState>().unwrap(), state);
        }
        assert!(matches!("alarm".parse::<AlarmState>(), Err(DbError::InvalidState(_))));
    }

    #[test]
    fn dimension_token_splits_on_first_colon_only() {
        let dim: DimensionFilter = "url:http://host:80".parse().unwrap();
        assert_eq!(dim.name, "url");
        assert_eq!(dim.value, "http://host:80");
    }

    #[test]
    fn malformed_dimension_tokens_are_rejected() {
        for token in ["hostname", ":a", "host:"] {
            assert!(
                matches!(token.parse::<DimensionFilter>(), Err(DbError::InvalidFilter(_))),
                "{token} should be rejected"
            );
        }
    }

    #[test]
    fn empty_metric_dimensions_yield_no_tokens() {
        assert!(parse_metric_dimensions("").unwrap().is_empty());
        assert_eq!(parse_metric_dimensions("a:1,,b:2").unwrap().len(), 2);
    }

    #[test]
    fn duplicate_dimension_tokens_are_kept() {
        assert_eq!(parse_metric_dimensions("a:1,a:1").unwrap().len(), 2);
    }

    #[test]
    fn query_params_populate_filters_and_ignore_unknown_keys() {
        let filters = AlarmFilters::from_query_params([
            ("state", "ALARM"),
            ("metric_dimensions", "host:a,env:b"),
            ("offset", "10"),
        ])
        .unwrap();

        assert_eq!(filters.state, Some(AlarmState::Alarm));
        assert_eq!(filters.metric_dimensions.len(), 2);
        assert_eq!(filters.alarm_definition_id, None);
        assert_eq!(filters.arg_count(), 1 + 1 + 4);
    }

    #[test]
    fn bad_state_param_is_an_error() {
        let err = AlarmFilters::from_query_params([("state", "BROKEN")]).unwrap_err();
        assert!(matches!(err, DbError::InvalidState(s) if s == "BROKEN"));
    }

    #[test]
    fn rows_sharing_an_alarm_id_fold_into_one_alarm() {
        let alarms = fold_alarms(vec![
            row("a1", "cpu", Some("host=web1,env=prod")),
            row("a1", "mem", None),
            row("a2", "cpu", Some("host=web2")),
        ]);

        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[0].id, "a1");
        assert_eq!(alarms[0].metrics.len(), 2);
        assert_eq!(alarms[0].metrics[0].dimensions["env"], "prod");
        assert!(alarms[0].metrics[1].dimensions.is_empty());
        assert_eq!(alarms[1].metrics[0].dimensions["host"], "web2");
    }

    #[test]
    fn folded_alarm_serializes_with_upper_case_state() {
        let alarms = fold_alarms(vec![row("a1", "cpu", Some("host=web1"))]);
        let json = serde_json::to_value(&alarms[0]).unwrap();
        assert_eq!(json["state"], "ALARM");
        assert_eq!(json["metrics"][0]["dimensions"]["host"], "web1");
    }

    #[test]
    fn metric_rows_group_by_alarm() {
        let grouped = fold_alarm_metrics(vec![
            AlarmMetricRow { alarm_id: "a1".into(), metric_name: "cpu".into(), metric_dimensions: None },
            AlarmMetricRow { alarm_id: "a1".into(), metric_name: "mem".into(), metric_dimensions: None },
        ]);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].1.len(), 2);
    }
}
