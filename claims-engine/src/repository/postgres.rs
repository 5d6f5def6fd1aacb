//! PostgreSQL-backed claim repository
//!
//! Each record is kept as a JSONB document beside the columns used for
//! lookups. A commit runs in a single database transaction:
//! - the claim row is updated only when its version still matches
//! - line items are upserted, postings, denials and history written alongside
//! - history rows are protected from UPDATE and DELETE by a trigger

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Executor, Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cob::ReconciliationDiscrepancy;
use crate::denial::ClaimDenial;
use crate::error::{ClaimsError, ClaimsResult};
use crate::history::WorkflowHistoryEntry;
use crate::models::{Claim, ClaimFilter, ClaimLineItem};
use crate::payment::PaymentPosting;
use crate::repository::ClaimRepository;
use crate::transaction::ClaimCommit;

const SCHEMA: &str = include_str!("../../migrations/001_claims.sql");

fn storage(context: &str) -> impl Fn(sqlx::Error) -> ClaimsError + '_ {
    move |e| ClaimsError::Storage(format!("{}: {}", context, e))
}

fn to_db_version(version: u64) -> ClaimsResult<i64> {
    i64::try_from(version).map_err(ClaimsError::storage)
}

/// PostgreSQL-backed claim repository
pub struct PostgresClaimRepository {
    pool: PgPool,
}

impl PostgresClaimRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists
    pub async fn connect(database_url: &str) -> ClaimsResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(storage("Failed to connect"))?;
        let repository = Self::new(pool);
        repository.migrate().await?;
        Ok(repository)
    }

    pub async fn migrate(&self) -> ClaimsResult<()> {
        self.pool
            .execute(SCHEMA)
            .await
            .map_err(storage("Failed to apply schema"))?;
        info!("Claims schema ready");
        Ok(())
    }

    async fn write_claim(
        tx: &mut Transaction<'_, Postgres>,
        commit: &ClaimCommit,
    ) -> ClaimsResult<()> {
        let claim = &commit.claim;
        let mut document = claim.clone();
        document.line_items.clear();

        let rows = match commit.expected_version {
            None => sqlx::query(
                r#"
                INSERT INTO claims (
                    id, claim_number, version, status, patient_ref, payer_id,
                    payer_rank, source_claim_id, document, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(claim.id)
            .bind(&claim.claim_number)
            .bind(to_db_version(claim.version)?)
            .bind(claim.status.as_str())
            .bind(&claim.patient_ref)
            .bind(&claim.payer.payer_id)
            .bind(claim.payer.rank.as_str())
            .bind(claim.cob.as_ref().map(|cob| cob.source_claim_id))
            .bind(Json(&document))
            .bind(claim.audit.created_at)
            .bind(claim.audit.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(storage("Failed to insert claim"))?,
            Some(expected) => sqlx::query(
                r#"
                UPDATE claims
                SET claim_number = $2, version = $3, status = $4, document = $5, updated_at = $6
                WHERE id = $1 AND version = $7
                "#,
            )
            .bind(claim.id)
            .bind(&claim.claim_number)
            .bind(to_db_version(claim.version)?)
            .bind(claim.status.as_str())
            .bind(Json(&document))
            .bind(claim.audit.updated_at)
            .bind(to_db_version(expected)?)
            .execute(&mut **tx)
            .await
            .map_err(storage("Failed to update claim"))?,
        };
        if rows.rows_affected() == 0 {
            return Err(ClaimsError::Conflict {
                claim_id: claim.id,
                expected: commit.expected_version.unwrap_or(0),
            });
        }

        for line in &claim.line_items {
            sqlx::query(
                r#"
                INSERT INTO claim_line_items (id, claim_id, line_number, document)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document
                "#,
            )
            .bind(line.id)
            .bind(claim.id)
            .bind(i32::try_from(line.line_number).map_err(ClaimsError::storage)?)
            .bind(Json(line))
            .execute(&mut **tx)
            .await
            .map_err(storage("Failed to write line item"))?;
        }
        Ok(())
    }

    async fn write_records(
        tx: &mut Transaction<'_, Postgres>,
        commit: &ClaimCommit,
    ) -> ClaimsResult<()> {
        for posting in &commit.postings {
            sqlx::query(
                r#"
                INSERT INTO payment_postings (id, claim_id, trace_number, posted_at, document)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(posting.id)
            .bind(posting.claim_id)
            .bind(&posting.trace_number)
            .bind(posting.posted_at)
            .bind(Json(posting))
            .execute(&mut **tx)
            .await
            .map_err(storage("Failed to write payment posting"))?;
        }

        for denial in &commit.denials {
            sqlx::query(
                r#"
                INSERT INTO claim_denials (id, claim_id, appeal_status, created_at, updated_at, document)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE
                SET appeal_status = EXCLUDED.appeal_status,
                    updated_at = EXCLUDED.updated_at,
                    document = EXCLUDED.document
                "#,
            )
            .bind(denial.id)
            .bind(denial.claim_id)
            .bind(denial.appeal_status.as_str())
            .bind(denial.created_at)
            .bind(denial.updated_at)
            .bind(Json(denial))
            .execute(&mut **tx)
            .await
            .map_err(storage("Failed to write denial"))?;
        }

        for entry in &commit.history {
            sqlx::query(
                r#"
                INSERT INTO claim_workflow_history (
                    id, claim_id, sequence, from_status, to_status, action, actor,
                    performed_at, prev_hash, entry_hash, document
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(entry.id)
            .bind(entry.claim_id)
            .bind(to_db_version(entry.sequence)?)
            .bind(entry.from_status.map(|s| s.as_str()))
            .bind(entry.to_status.as_str())
            .bind(entry.action.as_str())
            .bind(entry.actor.as_str())
            .bind(entry.performed_at)
            .bind(&entry.prev_hash)
            .bind(&entry.entry_hash)
            .bind(Json(entry))
            .execute(&mut **tx)
            .await
            .map_err(storage("Failed to append history"))?;
        }
        Ok(())
    }

    /// Reattach line items to claim documents
    async fn hydrate(&self, rows: Vec<PgRow>) -> ClaimsResult<Vec<Claim>> {
        let mut claims = rows
            .iter()
            .map(|row| {
                row.try_get::<Json<Claim>, _>("document")
                    .map(|doc| doc.0)
                    .map_err(storage("Failed to decode claim"))
            })
            .collect::<ClaimsResult<Vec<Claim>>>()?;
        if claims.is_empty() {
            return Ok(claims);
        }

        let ids: Vec<Uuid> = claims.iter().map(|c| c.id).collect();
        let line_rows = sqlx::query(
            r#"
            SELECT claim_id, document FROM claim_line_items
            WHERE claim_id = ANY($1)
            ORDER BY claim_id, line_number
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to load line items"))?;

        let mut lines: HashMap<Uuid, Vec<ClaimLineItem>> = HashMap::new();
        for row in line_rows {
            let claim_id: Uuid = row
                .try_get("claim_id")
                .map_err(storage("Failed to decode line item"))?;
            let line: Json<ClaimLineItem> = row
                .try_get("document")
                .map_err(storage("Failed to decode line item"))?;
            lines.entry(claim_id).or_default().push(line.0);
        }
        for claim in &mut claims {
            claim.line_items = lines.remove(&claim.id).unwrap_or_default();
        }
        Ok(claims)
    }

    fn decode_documents<T: serde::de::DeserializeOwned>(
        rows: Vec<PgRow>,
        context: &str,
    ) -> ClaimsResult<Vec<T>> {
        rows.iter()
            .map(|row| {
                row.try_get::<Json<T>, _>("document")
                    .map(|doc| doc.0)
                    .map_err(storage(context))
            })
            .collect()
    }
}

#[async_trait]
impl ClaimRepository for PostgresClaimRepository {
    async fn commit_all(&self, commits: Vec<ClaimCommit>) -> ClaimsResult<()> {
        debug!("Committing {} claim change set(s)", commits.len());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;

        for commit in &commits {
            Self::write_claim(&mut tx, commit).await?;
            Self::write_records(&mut tx, commit).await?;
        }

        tx.commit()
            .await
            .map_err(storage("Failed to commit transaction"))?;
        Ok(())
    }

    async fn get_claim(&self, claim_id: Uuid) -> ClaimsResult<Option<Claim>> {
        let rows = sqlx::query("SELECT document FROM claims WHERE id = $1")
            .bind(claim_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Failed to load claim"))?;
        Ok(self.hydrate(rows).await?.into_iter().next())
    }

    async fn list_claims(&self, filter: &ClaimFilter) -> ClaimsResult<Vec<Claim>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM claims
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR patient_ref = $2)
              AND ($3::text IS NULL OR payer_id = $3)
              AND ($4::text IS NULL OR payer_rank = $4)
            ORDER BY created_at
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.patient_ref)
        .bind(&filter.payer_id)
        .bind(filter.rank.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list claims"))?;
        self.hydrate(rows).await
    }

    async fn find_derived_claims(&self, source_claim_id: Uuid) -> ClaimsResult<Vec<Claim>> {
        let rows = sqlx::query(
            "SELECT document FROM claims WHERE source_claim_id = $1 ORDER BY created_at",
        )
        .bind(source_claim_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to load derived claims"))?;
        self.hydrate(rows).await
    }

    async fn list_postings(&self, claim_id: Uuid) -> ClaimsResult<Vec<PaymentPosting>> {
        let rows = sqlx::query(
            "SELECT document FROM payment_postings WHERE claim_id = $1 ORDER BY posted_at",
        )
        .bind(claim_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list postings"))?;
        Self::decode_documents(rows, "Failed to decode posting")
    }

    async fn get_denial(&self, denial_id: Uuid) -> ClaimsResult<Option<ClaimDenial>> {
        let rows = sqlx::query("SELECT document FROM claim_denials WHERE id = $1")
            .bind(denial_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Failed to load denial"))?;
        Ok(Self::decode_documents(rows, "Failed to decode denial")?
            .into_iter()
            .next())
    }

    async fn list_denials(&self, claim_id: Uuid) -> ClaimsResult<Vec<ClaimDenial>> {
        let rows = sqlx::query(
            "SELECT document FROM claim_denials WHERE claim_id = $1 ORDER BY created_at",
        )
        .bind(claim_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list denials"))?;
        Self::decode_documents(rows, "Failed to decode denial")
    }

    async fn history(&self, claim_id: Uuid) -> ClaimsResult<Vec<WorkflowHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT document FROM claim_workflow_history WHERE claim_id = $1 ORDER BY sequence",
        )
        .bind(claim_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to load history"))?;
        Self::decode_documents(rows, "Failed to decode history entry")
    }

    async fn record_discrepancy(
        &self,
        discrepancy: &ReconciliationDiscrepancy,
    ) -> ClaimsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_discrepancies (
                id, trigger_claim_id, source_claim_id, derived_claim_id, detected_at, document
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(discrepancy.id)
        .bind(discrepancy.trigger_claim_id)
        .bind(discrepancy.report.source_claim_id)
        .bind(discrepancy.report.derived_claim_id)
        .bind(discrepancy.detected_at)
        .bind(Json(discrepancy))
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to record discrepancy"))?;
        Ok(())
    }

    async fn list_discrepancies(&self) -> ClaimsResult<Vec<ReconciliationDiscrepancy>> {
        let rows = sqlx::query(
            "SELECT document FROM reconciliation_discrepancies ORDER BY detected_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list discrepancies"))?;
        Self::decode_documents(rows, "Failed to decode discrepancy")
    }
}
