//! Read-only portfolio reports

use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use claims_engine::{
    ClaimFilter, ClaimsSummary, ReconciliationDiscrepancy, SecondaryCandidate, StaleSubmission,
};
use serde::Deserialize;

use crate::error::{api_list, api_success, ApiResult};
use crate::server::ClaimsServer;

#[derive(Debug, Default, Deserialize)]
pub struct StaleQuery {
    /// Reference time; defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

pub async fn claims_summary(
    State(server): State<ClaimsServer>,
    Query(filter): Query<ClaimFilter>,
) -> ApiResult<ClaimsSummary> {
    Ok(api_success(server.claims.claims_summary(&filter).await?))
}

pub async fn stale_submissions(
    State(server): State<ClaimsServer>,
    Query(query): Query<StaleQuery>,
) -> ApiResult<Vec<StaleSubmission>> {
    let as_of = query.as_of.unwrap_or_else(Utc::now);
    Ok(api_list(server.claims.find_stale_submissions(as_of).await?))
}

pub async fn secondary_candidates(
    State(server): State<ClaimsServer>,
) -> ApiResult<Vec<SecondaryCandidate>> {
    Ok(api_list(server.claims.find_secondary_candidates().await?))
}

pub async fn discrepancies(
    State(server): State<ClaimsServer>,
) -> ApiResult<Vec<ReconciliationDiscrepancy>> {
    Ok(api_list(server.claims.list_discrepancies().await?))
}
