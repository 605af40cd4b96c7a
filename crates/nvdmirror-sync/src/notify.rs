//! Webhook delivery of outcome cards.
//!
//! Delivery is best-effort from the caller's point of view: workflows decide
//! what to report, this module only posts it. When notifications are
//! disabled the card is logged and dropped.

use crate::error::{Error, Result};
use nvdmirror_core::{MessageCard, NotifyConfig};
use tracing::{debug, info};

/// Post `card` to the configured webhook.
pub async fn send_card(config: &NotifyConfig, card: &MessageCard) -> Result<()> {
    if !config.enabled {
        debug!(summary = %card.summary, "notifications disabled, dropping card");
        return Ok(());
    }

    let response = reqwest::Client::new()
        .post(&config.connector_url)
        .json(&card.to_json())
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Notify(format!("webhook returned {status}")));
    }

    info!(summary = %card.summary, "sent notification");
    Ok(())
}

/// Report a failed run.
pub async fn send_failure(config: &NotifyConfig, repo: &str, detail: &str) -> Result<()> {
    let card = MessageCard::new(false, "[ERROR] Execution Failed", repo)
        .with_message(detail.to_string());
    send_card(config, &card).await
}
