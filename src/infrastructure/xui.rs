//! 3x-ui panel adapter.
//!
//! The panel authenticates with a session cookie issued by `POST /login`. Redirects are
//! not followed: an expired session answers API calls with a redirect to the login
//! page, which is reported as `PanelError::Unauthorized`.

use crate::domain::ports::AccessPanel;
use crate::domain::provisioning::{ClientSpec, Inbound, PanelClient, PanelError};
use crate::error::{Result, ShopError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, redirect};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Panel connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:2053".to_string(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    msg: String,
    obj: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundRecord {
    id: u32,
    #[serde(default)]
    remark: String,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    enable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientTraffic {
    inbound_id: u32,
    email: String,
    #[serde(default)]
    enable: bool,
    #[serde(default)]
    expiry_time: i64,
    #[serde(default)]
    up: u64,
    #[serde(default)]
    down: u64,
}

fn transport_error(err: reqwest::Error) -> PanelError {
    if err.is_timeout() {
        PanelError::Timeout
    } else {
        PanelError::Unreachable(err.to_string())
    }
}

/// 3x-ui panel client
pub struct XuiPanel {
    config: PanelConfig,
    client: Client,
}

impl XuiPanel {
    pub fn new(config: PanelConfig) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ShopError::Config(e.to_string()))?;

        Ok(Self {
            config: PanelConfig {
                url: config.url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url, path)
    }

    /// Reads the `{success, msg, obj}` envelope the panel wraps every answer in.
    async fn envelope<T: DeserializeOwned>(
        response: Response,
    ) -> std::result::Result<Envelope<T>, PanelError> {
        let status = response.status();
        if status.is_redirection()
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::NOT_FOUND
        {
            return Err(PanelError::Unauthorized);
        }
        if !status.is_success() {
            return Err(PanelError::Unreachable(format!("panel returned {status}")));
        }
        response
            .json::<Envelope<T>>()
            .await
            .map_err(|_| PanelError::Unauthorized)
    }
}

#[async_trait]
impl AccessPanel for XuiPanel {
    async fn login(&self) -> std::result::Result<(), PanelError> {
        let response = self
            .client
            .post(self.endpoint("/login"))
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: Envelope<serde_json::Value> = Self::envelope(response).await?;
        if envelope.success {
            info!(panel = %self.config.url, "Panel session established");
            Ok(())
        } else {
            debug!(msg = %envelope.msg, "Panel login refused");
            Err(PanelError::Unauthorized)
        }
    }

    async fn list_inbounds(&self) -> std::result::Result<Vec<Inbound>, PanelError> {
        let response = self
            .client
            .get(self.endpoint("/panel/api/inbounds/list"))
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: Envelope<Vec<InboundRecord>> = Self::envelope(response).await?;
        if !envelope.success {
            return Err(PanelError::Rejected(envelope.msg));
        }
        Ok(envelope
            .obj
            .unwrap_or_default()
            .into_iter()
            .map(|record| Inbound {
                id: record.id,
                remark: record.remark,
                protocol: record.protocol,
                port: record.port,
                enable: record.enable,
            })
            .collect())
    }

    async fn find_client(&self, label: &str) -> std::result::Result<Option<PanelClient>, PanelError> {
        let response = self
            .client
            .get(self.endpoint(&format!(
                "/panel/api/inbounds/getClientTraffics/{label}"
            )))
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: Envelope<ClientTraffic> = Self::envelope(response).await?;
        if !envelope.success {
            return Err(PanelError::Rejected(envelope.msg));
        }
        Ok(envelope.obj.map(|traffic| PanelClient {
            inbound_id: traffic.inbound_id,
            label: traffic.email,
            enable: traffic.enable,
            expiry_time: traffic.expiry_time,
            up: traffic.up,
            down: traffic.down,
        }))
    }

    async fn add_client(
        &self,
        inbound_id: u32,
        client: &ClientSpec,
    ) -> std::result::Result<(), PanelError> {
        let settings = json!({
            "clients": [{
                "id": client.client_id.to_string(),
                "email": client.label,
                "limitIp": client.limit_ip,
                "totalGB": 0,
                "expiryTime": client.expiry_time,
                "enable": client.enable,
                "subId": client.client_id.simple().to_string(),
            }]
        })
        .to_string();

        let response = self
            .client
            .post(self.endpoint("/panel/api/inbounds/addClient"))
            .form(&[("id", inbound_id.to_string()), ("settings", settings)])
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: Envelope<serde_json::Value> = Self::envelope(response).await?;
        if envelope.success {
            Ok(())
        } else {
            Err(PanelError::Rejected(envelope.msg))
        }
    }
}
