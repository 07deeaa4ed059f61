//! Polling mode: periodically text leads the CRM still lists as uncontacted.
//!
//! Each scan pages through the records in the uncontacted status until it has
//! `batch_size` leads the handler would act on, then runs them through the same
//! [`LeadHandler`] the webhook uses, so the send-then-update ordering holds here
//! too. Records carry their CRM id, so no lookup is needed.
//!
//! Leads that are skipped or rejected keep their status and are listed again on
//! every scan, so they are screened out while paging instead of using up the batch.
//! Nothing is handled until paging is done, which keeps page offsets stable.

use crate::config::PollerConfig;
use relay_core::{CredentialError, CrmError, Lead, LeadHandler, Outcome, Service};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("CRM credential unavailable: {0}")]
    Credential(#[from] CredentialError),
    #[error("listing uncontacted leads failed: {0}")]
    Crm(#[from] CrmError),
}

/// Tally of one scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub scanned: usize,
    pub contacted: usize,
    /// Sent, but the CRM was not updated.
    pub partial: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PollSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.contacted += 1,
            Outcome::PartialSuccess(_) => self.partial += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Rejected(_) | Outcome::Failed { .. } => self.failed += 1,
        }
    }
}

pub struct Poller {
    handler: LeadHandler,
    every: Duration,
    batch_size: usize,
    max_pages: usize,
    uncontacted_status: String,
}

impl Poller {
    pub fn new(handler: LeadHandler, config: &PollerConfig) -> Self {
        Self {
            handler,
            every: Duration::from_secs(config.interval_seconds.max(1)),
            batch_size: config.batch_size.max(1),
            max_pages: config.max_pages.max(1),
            uncontacted_status: config.uncontacted_status.clone(),
        }
    }

    /// Scan once and text up to `batch_size` uncontacted leads.
    pub async fn run_once(&self) -> Result<PollSummary, PollError> {
        let token = self.handler.credentials().get_credential(Service::Crm).await?;

        let mut summary = PollSummary::default();
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut page = 1;
        while batch.len() < self.batch_size && page <= self.max_pages {
            let listed = self
                .handler
                .crm()
                .list_by_status(&token, &self.uncontacted_status, page, self.batch_size)
                .await
                .map_err(|e| {
                    if matches!(e, CrmError::Unauthorized(_)) {
                        self.handler.credentials().invalidate(Service::Crm);
                    }
                    e
                })?;
            debug!(page, records = listed.records.len(), more = listed.more, "listed uncontacted leads");

            for record in listed.records {
                summary.scanned += 1;
                let lead = Lead::from(record);
                if !self.handler.is_actionable(&lead) {
                    // Settles as rejected or skipped without a network call.
                    summary.record(&self.handler.handle(&lead).await);
                } else if batch.len() < self.batch_size {
                    batch.push(lead);
                }
            }
            if !listed.more {
                break;
            }
            page += 1;
        }

        for lead in batch {
            let outcome = self.handler.handle(&lead).await;
            debug!(record = ?lead.crm_id(), ?outcome, "polled lead handled");
            summary.record(&outcome);
        }
        Ok(summary)
    }

    /// Scan forever on a fixed interval. The first scan starts immediately.
    pub async fn run(self) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(every = ?self.every, batch_size = self.batch_size, "CRM poller started");

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(summary) if summary.scanned == 0 => debug!("no uncontacted leads"),
                Ok(summary) => info!(?summary, "poll complete"),
                Err(e @ PollError::Credential(_)) => error!(error = %e, "poll aborted"),
                Err(e) => warn!(error = %e, "poll aborted"),
            }
        }
    }
}
