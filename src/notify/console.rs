//! Console sink: writes the alert to the log. Always enabled.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::{format_alert, NotificationSink};
use crate::types::Opportunity;

const RULE: &str = "============================================================";

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }

    pub fn render(opportunity: &Opportunity) -> String {
        format!(
            "{RULE}\nARBITRAGE OPPORTUNITY\n{RULE}\n{}\n{RULE}",
            format_alert(opportunity)
        )
    }
}

#[async_trait]
impl NotificationSink for ConsoleSink {
    fn name(&self) -> String {
        "console".to_string()
    }

    async fn deliver(&self, opportunity: &Opportunity) -> Result<()> {
        info!(
            listing_ref = %opportunity.listing_ref,
            margin = %format!("{:.1}%", opportunity.margin_pct),
            "\n{}",
            Self::render(opportunity)
        );
        Ok(())
    }
}
