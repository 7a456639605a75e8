use axum::{Json, extract::State};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::{ApiPath, ApiQuery};
use crate::audit::{ComplianceCheckResult, ComplianceReport, Framework, IntegrityReport};
use crate::types::timestamp;
use crate::types::{AuditEntry, AuditQuery};
use crate::{LabGuardError, router::LabGuardState};

const DEFAULT_REPORT_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct ReportPeriod {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn list_logs(
    State(state): State<LabGuardState>,
    ApiQuery(query): ApiQuery<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, LabGuardError> {
    Ok(Json(state.audit.list(&query).await?))
}

pub async fn verify(
    State(state): State<LabGuardState>,
) -> Result<Json<IntegrityReport>, LabGuardError> {
    Ok(Json(state.audit.verify_integrity().await?))
}

pub async fn compliance_check(
    State(state): State<LabGuardState>,
) -> Result<Json<ComplianceCheckResult>, LabGuardError> {
    Ok(Json(state.audit.compliance_check(timestamp::now()).await?))
}

/// Period defaults to the last 30 days ending now.
pub async fn compliance_report(
    State(state): State<LabGuardState>,
    ApiPath(framework): ApiPath<String>,
    ApiQuery(period): ApiQuery<ReportPeriod>,
) -> Result<Json<ComplianceReport>, LabGuardError> {
    let framework: Framework = framework.parse()?;
    let now = timestamp::now();
    let (from, to) = period.resolve(now)?;
    Ok(Json(
        state
            .audit
            .generate_report(framework, from, to, now)
            .await?,
    ))
}

impl ReportPeriod {
    fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), LabGuardError> {
        let to = self.to.unwrap_or(now);
        let from = match self.from {
            Some(from) => from,
            None => to
                .checked_sub_signed(Duration::days(DEFAULT_REPORT_DAYS))
                .ok_or_else(|| {
                    LabGuardError::InvalidInput("report period end is out of range".to_string())
                })?,
        };
        Ok((from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_defaults_to_thirty_days_before_end() {
        let now = timestamp::now();
        let (from, to) = ReportPeriod::default().resolve(now).unwrap();
        assert_eq!(to, now);
        assert_eq!(to - from, Duration::days(DEFAULT_REPORT_DAYS));
    }

    #[test]
    fn period_end_near_the_minimum_date_is_invalid_input() {
        let period = ReportPeriod {
            from: None,
            to: Some(DateTime::<Utc>::MIN_UTC),
        };
        let err = period.resolve(timestamp::now()).unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidInput(_)));
    }
}
