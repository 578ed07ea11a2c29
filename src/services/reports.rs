use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{info, instrument};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::injury_report::INJURY_REPORTS_COLLECTION;
use crate::models::{CaseSeverity, InjuryReport, InjuryReportInput};
use crate::store::{to_data, DocumentStore, FieldPath, FieldUpdate, Precondition, Query, StoreError};

const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSort {
    #[default]
    Newest,
    Oldest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFilter {
    pub case_type: Option<CaseSeverity>,
    pub keyword: Option<String>,
    #[serde(default)]
    pub sort: ReportSort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapRow {
    pub location: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityInsight {
    pub case_type: CaseSeverity,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotspot: Option<HeatmapRow>,
    /// Busiest hour of day (UTC) as `H:00`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_hour: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub counts: BTreeMap<CaseSeverity, usize>,
    pub heatmap: Vec<HeatmapRow>,
    pub insights: Vec<SeverityInsight>,
}

fn location_of(report: &InjuryReport) -> &str {
    match report.input.location.trim() {
        "" => UNKNOWN_LOCATION,
        location => location,
    }
}

/// Count per location, busiest first; ties by name.
fn heatmap<'a>(reports: impl IntoIterator<Item = &'a InjuryReport>) -> Vec<HeatmapRow> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for report in reports {
        *counts.entry(location_of(report)).or_default() += 1;
    }
    let mut rows: Vec<HeatmapRow> = counts
        .into_iter()
        .map(|(location, count)| HeatmapRow {
            location: location.to_string(),
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

fn insight(case_type: CaseSeverity, reports: &[&InjuryReport]) -> SeverityInsight {
    let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
    for report in reports {
        if let Some(at) = report.created_at {
            *hours.entry(at.hour()).or_default() += 1;
        }
    }
    // max_by_key keeps the last maximum; iterate in reverse so the earliest hour wins ties.
    let peak_hour = hours
        .iter()
        .rev()
        .max_by_key(|(_, count)| **count)
        .map(|(hour, _)| format!("{}:00", hour));
    SeverityInsight {
        case_type,
        total: reports.len(),
        hotspot: heatmap(reports.iter().copied()).into_iter().next(),
        peak_hour,
    }
}

pub fn summarize(reports: &[InjuryReport]) -> ReportSummary {
    let counts = CaseSeverity::iter()
        .map(|case| {
            (
                case,
                reports.iter().filter(|r| r.input.case_type == case).count(),
            )
        })
        .collect();
    let insights = CaseSeverity::iter()
        .map(|case| {
            let group: Vec<&InjuryReport> =
                reports.iter().filter(|r| r.input.case_type == case).collect();
            insight(case, &group)
        })
        .collect();
    ReportSummary {
        total: reports.len(),
        counts,
        heatmap: heatmap(reports),
        insights,
    }
}

#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn DocumentStore>,
}

impl ReportService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn not_found(id: &str) -> impl FnOnce(StoreError) -> ServiceError + '_ {
        move |e| match e {
            StoreError::NotFound { .. } => {
                ServiceError::not_found(format!("Report {} not found", id))
            }
            other => other.into(),
        }
    }

    #[instrument(skip(self, input), fields(case_type = %input.case_type))]
    pub async fn create(&self, input: InjuryReportInput) -> Result<InjuryReport, ServiceError> {
        input.validate()?;
        let mut report = InjuryReport::new(input);
        report.created_at = Some(Utc::now());
        let doc = self
            .store
            .create(INJURY_REPORTS_COLLECTION, None, to_data(&report)?)
            .await?;
        info!(report_id = %doc.id, "injury report saved");
        Ok(InjuryReport::from_document(&doc)?)
    }

    /// Replaces the report's fields and re-renders its text. The creation
    /// time is kept.
    #[instrument(skip(self, input))]
    pub async fn update(&self, id: &str, input: InjuryReportInput) -> Result<InjuryReport, ServiceError> {
        input.validate()?;
        let current = self.get(id).await?;
        let mut report = InjuryReport::new(input);
        report.created_at = current.created_at;

        let data = to_data(&report)?;
        let updates = data
            .as_object()
            .into_iter()
            .flatten()
            .map(|(key, value)| FieldUpdate::Set(FieldPath::new([key.as_str()]), value.clone()))
            .collect::<Vec<_>>();
        let doc = self
            .store
            .update(INJURY_REPORTS_COLLECTION, id, &updates, Precondition::None)
            .await
            .map_err(Self::not_found(id))?;
        Ok(InjuryReport::from_document(&doc)?)
    }

    pub async fn get(&self, id: &str) -> Result<InjuryReport, ServiceError> {
        let doc = self
            .store
            .get(INJURY_REPORTS_COLLECTION, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Report {} not found", id)))?;
        Ok(InjuryReport::from_document(&doc)?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.store
            .delete(INJURY_REPORTS_COLLECTION, id, Precondition::None)
            .await
            .map_err(Self::not_found(id))?;
        info!(report_id = id, "injury report deleted");
        Ok(())
    }

    async fn all(&self) -> Result<Vec<InjuryReport>, ServiceError> {
        self.store
            .list(&Query::collection(INJURY_REPORTS_COLLECTION))
            .await?
            .iter()
            .map(|doc| InjuryReport::from_document(doc).map_err(ServiceError::from))
            .collect()
    }

    pub async fn list(&self, filter: &ReportFilter) -> Result<Vec<InjuryReport>, ServiceError> {
        let keyword = filter.keyword.as_deref().unwrap_or_default();
        let mut reports: Vec<InjuryReport> = self
            .all()
            .await?
            .into_iter()
            .filter(|r| filter.case_type.map_or(true, |case| r.input.case_type == case))
            .filter(|r| r.matches_keyword(keyword))
            .collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if filter.sort == ReportSort::Newest {
            reports.reverse();
        }
        Ok(reports)
    }

    pub async fn summary(&self) -> Result<ReportSummary, ServiceError> {
        Ok(summarize(&self.all().await?))
    }
}
