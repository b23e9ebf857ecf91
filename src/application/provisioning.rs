use crate::domain::account::AccountId;
use crate::domain::plan::Plan;
use crate::domain::ports::AccessPanelRef;
use crate::domain::provisioning::{ClientSpec, PanelClient, PanelError, ProvisionOutcome};
use crate::domain::subscription::CredentialRef;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Label of the panel identity for one purchase attempt.
///
/// Deterministic in its inputs, so every retry of the same purchase addresses the same
/// identity on the panel.
pub fn identity_label(account: AccountId, plan: &Plan, epoch: &str) -> String {
    format!("{}-{}-{}", account, plan.id, epoch)
}

/// Client UUID derived from the identity label.
pub fn client_id_for(label: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, label.as_bytes())
}

fn classify(err: PanelError) -> ProvisionOutcome {
    match err {
        PanelError::Rejected(msg) => ProvisionOutcome::PermanentFailure(msg),
        PanelError::Unauthorized => {
            ProvisionOutcome::TransientFailure("panel session could not be established".into())
        }
        PanelError::Unreachable(msg) => ProvisionOutcome::TransientFailure(msg),
        PanelError::Timeout => ProvisionOutcome::TransientFailure("panel call timed out".into()),
    }
}

/// Creates access credentials on the panel.
///
/// Owns the panel session: it logs in on first use and logs in again once when a call
/// comes back `Unauthorized`, so callers never see session state.
pub struct ProvisioningClient {
    panel: AccessPanelRef,
    call_timeout: Duration,
    authenticated: Mutex<bool>,
}

impl ProvisioningClient {
    pub fn new(panel: AccessPanelRef, call_timeout: Duration) -> Self {
        Self {
            panel,
            call_timeout,
            authenticated: Mutex::new(false),
        }
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, PanelError>>,
    ) -> Result<T, PanelError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or(Err(PanelError::Timeout))
    }

    async fn ensure_session(&self, force: bool) -> Result<(), PanelError> {
        let mut authenticated = self.authenticated.lock().await;
        if force || !*authenticated {
            *authenticated = false;
            self.timed(self.panel.login()).await?;
            *authenticated = true;
        }
        Ok(())
    }

    /// Runs one panel call inside the session, re-authenticating once if needed.
    async fn call<T, F, Fut>(&self, op: F) -> Result<T, PanelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PanelError>>,
    {
        self.ensure_session(false).await?;
        match self.timed(op()).await {
            Err(PanelError::Unauthorized) => {
                debug!("Panel session expired, logging in again");
                self.ensure_session(true).await?;
                self.timed(op()).await
            }
            other => other,
        }
    }

    async fn select_inbound(&self, plan: &Plan) -> Result<u32, PanelError> {
        if let Some(id) = plan.inbound_id {
            return Ok(id);
        }
        let inbounds = self.call(|| self.panel.list_inbounds()).await?;
        inbounds
            .into_iter()
            .find(|inbound| inbound.enable)
            .map(|inbound| inbound.id)
            .ok_or_else(|| PanelError::Rejected("no enabled inbound available".into()))
    }

    async fn try_provision(
        &self,
        label: &str,
        plan: &Plan,
        expires_at: DateTime<Utc>,
    ) -> Result<(CredentialRef, DateTime<Utc>), PanelError> {
        let client_id = client_id_for(label);
        let credential = |inbound_id| CredentialRef {
            inbound_id,
            label: label.to_string(),
            client_id,
        };

        // A reused identity keeps the expiry it was created with.
        let reuse = |existing: PanelClient| {
            let expiry = existing.expires_at().unwrap_or(expires_at);
            (credential(existing.inbound_id), expiry)
        };

        if let Some(existing) = self.call(|| self.panel.find_client(label)).await? {
            debug!(label, "Identity already provisioned, reusing it");
            return Ok(reuse(existing));
        }

        let inbound_id = self.select_inbound(plan).await?;
        let spec = ClientSpec {
            client_id,
            label: label.to_string(),
            limit_ip: plan.limit_ip,
            expiry_time: expires_at.timestamp_millis(),
            enable: true,
        };

        match self.call(|| self.panel.add_client(inbound_id, &spec)).await {
            Ok(()) => Ok((credential(inbound_id), expires_at)),
            Err(PanelError::Rejected(msg)) => {
                // An earlier attempt whose answer was lost may have created it.
                match self.call(|| self.panel.find_client(label)).await? {
                    Some(existing) => Ok(reuse(existing)),
                    None => Err(PanelError::Rejected(msg)),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Provisions the credential for one purchase attempt identified by `epoch`.
    pub async fn provision(
        &self,
        account: AccountId,
        plan: &Plan,
        epoch: &str,
        expires_at: DateTime<Utc>,
    ) -> ProvisionOutcome {
        let label = identity_label(account, plan, epoch);
        match self.try_provision(&label, plan, expires_at).await {
            Ok((credential, expires_at)) => {
                info!(%account, plan = %plan.id, label = %credential.label, inbound = credential.inbound_id, "Credential provisioned");
                ProvisionOutcome::Provisioned {
                    credential,
                    expires_at,
                }
            }
            Err(err) => {
                warn!(%account, plan = %plan.id, %label, error = %err, "Provisioning attempt failed");
                classify(err)
            }
        }
    }

    /// Reads the panel's current view of a provisioned credential.
    pub async fn lookup(&self, credential: &CredentialRef) -> Result<Option<PanelClient>, PanelError> {
        self.call(|| self.panel.find_client(&credential.label)).await
    }
}
