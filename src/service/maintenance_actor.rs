use std::time::Duration;

use chrono::{DateTime, Utc};
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::{ComplianceCheckResult, ComplianceStatus};
use crate::error::LabGuardError;
use crate::service::{AuditService, KeyManager};
use crate::types::KeyMetadata;
use crate::types::timestamp;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub ran_at: DateTime<Utc>,
    pub rotated_keys: Vec<KeyMetadata>,
    pub compliance: ComplianceCheckResult,
}

#[derive(Debug)]
pub enum MaintenanceMessage {
    /// Periodic pass, sent by the actor's own interval timer.
    Tick,
    /// Run a pass immediately and reply with its report.
    RunNow(RpcReplyPort<Result<MaintenanceReport, String>>),
}

/// Handle for the background maintenance actor.
#[derive(Clone)]
pub struct MaintenanceHandle {
    actor: ActorRef<MaintenanceMessage>,
}

impl MaintenanceHandle {
    pub async fn run_now(&self) -> Result<MaintenanceReport, LabGuardError> {
        ractor::call!(self.actor, MaintenanceMessage::RunNow)
            .map_err(|e| LabGuardError::RactorError(format!("RunNow RPC failed: {e}")))?
            .map_err(LabGuardError::RactorError)
    }
}

pub struct MaintenanceArgs {
    pub keys: KeyManager,
    pub audit: AuditService,
    /// Zero disables the periodic timer; `run_now` still works.
    pub interval: Duration,
}

struct MaintenanceState {
    keys: KeyManager,
    audit: AuditService,
    timer: Option<JoinHandle<()>>,
}

struct MaintenanceActor;

#[ractor::async_trait]
impl Actor for MaintenanceActor {
    type Msg = MaintenanceMessage;
    type State = MaintenanceState;
    type Arguments = MaintenanceArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let timer = if args.interval.is_zero() {
            info!("MaintenanceActor started without periodic timer");
            None
        } else {
            info!(
                interval_secs = args.interval.as_secs(),
                "MaintenanceActor started"
            );
            Some(myself.send_interval(args.interval, || MaintenanceMessage::Tick))
        };

        Ok(MaintenanceState {
            keys: args.keys,
            audit: args.audit,
            timer,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            MaintenanceMessage::Tick => {
                if let Err(e) = run_pass(state, timestamp::now()).await {
                    error!("scheduled maintenance failed: {}", e);
                }
            }
            MaintenanceMessage::RunNow(rp) => {
                let result = run_pass(state, timestamp::now())
                    .await
                    .map_err(|e| e.to_string());
                let _ = rp.send(result);
            }
        }
        Ok(())
    }
}

async fn run_pass(
    state: &MaintenanceState,
    now: DateTime<Utc>,
) -> Result<MaintenanceReport, LabGuardError> {
    let rotated_keys = state.keys.rotate_expired(now).await?;
    if !rotated_keys.is_empty() {
        info!(count = rotated_keys.len(), "expired data keys rotated");
    }

    let compliance = state.audit.compliance_check(now).await?;
    if compliance.status == ComplianceStatus::Compliant {
        info!(score = compliance.score, "maintenance pass complete");
    } else {
        warn!(
            score = compliance.score,
            status = ?compliance.status,
            violations = compliance.violations.len(),
            "maintenance pass complete with compliance violations"
        );
    }

    Ok(MaintenanceReport {
        ran_at: now,
        rotated_keys,
        compliance,
    })
}

pub async fn spawn(args: MaintenanceArgs) -> Result<MaintenanceHandle, LabGuardError> {
    // Unnamed: the ractor registry is process-wide and several states may coexist.
    let (actor, _jh) = Actor::spawn(None, MaintenanceActor, args)
        .await
        .map_err(|e| LabGuardError::RactorError(format!("failed to spawn MaintenanceActor: {e}")))?;
    Ok(MaintenanceHandle { actor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::temp_storage;

    #[tokio::test]
    async fn run_now_rotates_and_checks() {
        let (_dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage.clone());
        // Zero-length rotation period: every key is expired on creation.
        let keys = KeyManager::new(
            storage,
            b"maint-secret",
            b"salt",
            1_000,
            chrono::Duration::zero(),
            audit.clone(),
        );
        let first = keys.active_key("pii").await.unwrap();

        let handle = spawn(MaintenanceArgs {
            keys,
            audit,
            interval: Duration::ZERO,
        })
        .await
        .unwrap();

        let report = handle.run_now().await.unwrap();
        assert_eq!(report.rotated_keys.len(), 1);
        assert_ne!(report.rotated_keys[0].key_id, first.key_id);
        assert_eq!(report.compliance.checked_at, report.ran_at);
    }

    #[tokio::test]
    async fn two_actors_coexist_in_one_process() {
        let (_dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage.clone());
        let keys = KeyManager::new(
            storage,
            b"maint-secret",
            b"salt",
            1_000,
            chrono::Duration::days(90),
            audit.clone(),
        );

        let first = spawn(MaintenanceArgs {
            keys: keys.clone(),
            audit: audit.clone(),
            interval: Duration::ZERO,
        })
        .await
        .unwrap();
        let second = spawn(MaintenanceArgs {
            keys,
            audit,
            interval: Duration::ZERO,
        })
        .await
        .unwrap();

        first.run_now().await.unwrap();
        second.run_now().await.unwrap();
    }
}
