//! Telegram alerts.
//!
//! Sends one message per opportunity above a profit floor and one when the
//! scanner loses every venue. Bot token and chat id come from env vars
//! named in `config.toml`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use web3::types::U256;

use crate::storage::{OpportunitySink, RecentIds, SinkError};
use crate::types::{Opportunity, RoundReport, RoundStatus};

const TELEGRAM_API: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

pub struct TelegramAlerter {
    http: Client,
    api_base: String,
    bot_token: SecretString,
    chat_id: String,
    min_net_profit: U256,
    sent: Mutex<RecentIds>,
    last_status: Mutex<Option<RoundStatus>>,
}

impl TelegramAlerter {
    pub fn new(bot_token: SecretString, chat_id: String, min_net_profit: U256) -> Result<Self, SinkError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("arbscan/0.1")
            .build()?;
        Ok(Self {
            http,
            api_base: TELEGRAM_API.to_string(),
            bot_token,
            chat_id,
            min_net_profit,
            sent: Mutex::new(RecentIds::default()),
            last_status: Mutex::new(None),
        })
    }

    /// Point at a different Bot API host (self-hosted server or tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    async fn send(&self, text: &str) -> Result<(), SinkError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.bot_token.expose_secret()
        );
        self.http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                disable_web_page_preview: true,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub fn format_opportunity(opp: &Opportunity) -> String {
    let units = |v: Option<rust_decimal::Decimal>| {
        v.map(|d| d.round_dp(4).to_string()).unwrap_or_else(|| "n/a".into())
    };
    format!(
        "ARB {pair}\nBuy on {buy} at {buy_price}, sell on {sell} at {sell_price}\nSize: {size}\nNet profit: {net}\nSpread: {spread}%\nRound: {round}",
        pair = opp.pair,
        buy = opp.buy_venue,
        sell = opp.sell_venue,
        buy_price = opp.buy_price.round_dp(4),
        sell_price = opp.sell_price.round_dp(4),
        size = units(opp.trade_size_units()),
        net = units(opp.net_profit_units()),
        spread = (opp.spread * rust_decimal::Decimal::ONE_HUNDRED).round_dp(3),
        round = opp.round_id,
    )
}

#[async_trait]
impl OpportunitySink for TelegramAlerter {
    async fn publish(&self, opportunity: &Opportunity) -> Result<(), SinkError> {
        if opportunity.net_profit < self.min_net_profit {
            return Ok(());
        }
        if self.sent.lock().await.contains(&opportunity.id) {
            debug!(id = %opportunity.id, "Alert already sent");
            return Ok(());
        }
        self.send(&format_opportunity(opportunity)).await?;
        self.sent.lock().await.insert(opportunity.id.clone());
        info!(id = %opportunity.id, "Telegram alert sent");
        Ok(())
    }

    async fn record_round(&self, report: &RoundReport) -> Result<(), SinkError> {
        // Held across the send: the status only advances once the alert
        // is delivered, so a retried round re-sends a failed outage alert.
        let mut last_status = self.last_status.lock().await;
        let entered_outage = report.status == RoundStatus::AllVenuesFailed
            && *last_status != Some(RoundStatus::AllVenuesFailed);
        if entered_outage {
            self.send(&format!(
                "ARBSCAN: all {} venues failed in round #{}",
                report.venues_total, report.round_number
            ))
            .await?;
        }
        *last_status = Some(report.status);
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
