//! Partner exchange notification settings.

#[derive(Debug, Clone)]
pub struct PartnerConfig {
    pub host: url::Url,
    pub key: String,
    pub secret: String,
    /// Our integrator id on the partner side.
    pub identify: u32,
    /// Withdrawals whose memo equals this value are reported to the partner.
    pub memo: String,
}
