//! Partner exchange client.
//!
//! After a withdrawal tagged for the partner is broadcast, the partner is
//! told about it with a signed query on `POST /api/v1/withdraw/addWithdrawInfo`.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use super::ClientError;
use crate::objects::PartnerWithdrawalNotice;
use crate::signature::sign_params;

pub const WITHDRAW_INFO_PATH: &str = "/api/v1/withdraw/addWithdrawInfo";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PartnerClient {
    http: Client,
    base_url: Url,
    key: String,
    secret: String,
    identify: u32,
}

impl PartnerClient {
    /// * `base_url` – root URL of the partner API.
    /// * `key` / `secret` – issued by the partner; the secret only feeds the signature.
    /// * `identify` – our integrator id on the partner side.
    pub fn new(
        base_url: Url,
        key: impl Into<String>,
        secret: impl Into<String>,
        identify: u32,
    ) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            key: key.into(),
            secret: secret.into(),
            identify,
        })
    }

    /// Signed query parameters for a notice, exactly as they are sent.
    pub fn signed_query(&self, notice: &PartnerWithdrawalNotice) -> Vec<(&'static str, String)> {
        sign_params(notice.to_params(&self.key, self.identify), &self.secret)
    }

    /// `POST /api/v1/withdraw/addWithdrawInfo`
    pub async fn add_withdraw_info(
        &self,
        notice: &PartnerWithdrawalNotice,
    ) -> Result<(), ClientError> {
        let url = self.base_url.join(WITHDRAW_INFO_PATH)?;
        let resp = self
            .http
            .post(url)
            .query(&self.signed_query(notice))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }
        Ok(())
    }
}
