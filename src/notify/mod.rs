//! Outbound notifications for new opportunities.
//!
//! Defines the `NotificationSink` trait and provides:
//! - `ConsoleSink`: always on, writes the alert to the log
//! - `TelegramSink`: optional, posts to a Telegram chat via the bot API
//!
//! `AlertDispatcher` fans each opportunity out to every sink and flips
//! `alerted` in the store once at least one sink delivered it.

pub mod console;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::storage::ObservationStore;
use crate::types::{DetectionResult, Opportunity};

pub use console::ConsoleSink;
pub use telegram::TelegramSink;

/// A delivery channel for opportunity alerts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logging.
    fn name(&self) -> String;

    async fn deliver(&self, opportunity: &Opportunity) -> Result<()>;
}

/// Human-readable multi-line alert body shared by the sinks.
pub fn format_alert(opp: &Opportunity) -> String {
    let link = opp
        .listing_url
        .clone()
        .unwrap_or_else(|| format!("listing id {}", opp.listing_ref));

    format!(
        "Card: {}\nGrade: {}\nLanguage: {}\n\n\
         Listing: ${:.2}\nFloor: ${:.2} ({} sales)\nDiscount: {:.1}%\n\n\
         Gross profit: ${:.2}\nFees: ${:.2}\nNet profit: ${:.2}\nMargin: {:.1}%\n\n\
         {}",
        opp.identity.name,
        opp.identity.grade.as_deref().unwrap_or("raw"),
        opp.identity.language,
        opp.listing_total_cost,
        opp.floor_price,
        opp.sample_size,
        opp.discount_pct,
        opp.gross_profit,
        opp.marketplace_fees,
        opp.net_profit,
        opp.margin_pct,
        link,
    )
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Counts from one `dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Opportunities at least one sink delivered (now marked alerted).
    pub delivered: usize,
    /// Opportunities no sink could deliver; they stay unalerted.
    pub undelivered: usize,
    /// Opportunities already alerted before this call.
    pub skipped: usize,
}

#[derive(Default)]
pub struct AlertDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Deliver each opportunity to every sink.
    ///
    /// A failing sink is logged and does not stop the others. Only a store
    /// failure while marking `alerted` is returned as an error.
    pub async fn dispatch(
        &self,
        store: &dyn ObservationStore,
        opportunities: &[Opportunity],
    ) -> DetectionResult<DispatchReport> {
        let mut report = DispatchReport::default();

        for opp in opportunities {
            if opp.alerted {
                report.skipped += 1;
                continue;
            }

            let mut delivered = false;
            for sink in &self.sinks {
                match sink.deliver(opp).await {
                    Ok(()) => {
                        debug!(sink = %sink.name(), listing_ref = %opp.listing_ref, "Alert delivered");
                        delivered = true;
                    }
                    Err(e) => {
                        warn!(sink = %sink.name(), listing_ref = %opp.listing_ref, error = %e, "Alert delivery failed");
                    }
                }
            }

            if !delivered {
                report.undelivered += 1;
                continue;
            }
            if let Some(id) = opp.id {
                store.mark_alerted(id).await?;
            }
            report.delivered += 1;
        }

        if !opportunities.is_empty() {
            info!(
                delivered = report.delivered,
                undelivered = report.undelivered,
                skipped = report.skipped,
                "Alerts dispatched"
            );
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
