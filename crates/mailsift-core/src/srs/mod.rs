//! SRS (Sender Rewriting Scheme) check module
//!
//! Rewrites the envelope sender of forwarded mail so the forwarding hop
//! stays SPF-valid, and reverses the rewrite on the return path. Forwarding
//! is inferred by comparing the recipient list against the configured
//! indicator header; the reverse mapping lives in the keyed store for seven
//! days. The check never fails a message: anything it cannot resolve
//! degrades to "no rewrite" plus a debug log line.

use crate::context::CoreContext;
use crate::modules::{CheckModule, EnvelopeActions};
use crate::transport::MappingStore;
use async_trait::async_trait;
use mailsift_common::config::SrsConfig;
use mailsift_common::types::{CheckResult, Determinant, EmailAddress, Message, SuggestedAction};
use mailsift_common::APP_NAME;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Module name reported in results and logs
pub const MODULE_NAME: &str = "srs";

/// Retention of a reverse mapping entry
pub const MAPPING_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Store key for a rewritten (or inbound SRS) address
fn mapping_key(address: &str) -> String {
    format!("{}--srs-entry-{}", APP_NAME, address).to_lowercase()
}

/// SRS envelope rewriter
pub struct SrsModule {
    config: SrsConfig,
    mappings: Arc<dyn MappingStore>,
    pattern: Regex,
}

impl SrsModule {
    pub fn new(ctx: &CoreContext) -> Self {
        Self {
            config: ctx.config.srs.clone(),
            mappings: ctx.mappings.clone(),
            pattern: Regex::new(r"(?i)^SRS[0-9]+=").expect("srs address pattern"),
        }
    }

    /// Recipients whose local part carries an SRS prefix
    fn inbound_srs_recipients(&self, message: &Message) -> Vec<EmailAddress> {
        message
            .rcpt
            .iter()
            .filter(|r| self.pattern.is_match(&r.local))
            .cloned()
            .collect()
    }

    /// A message is forwarded when indicator headers exist and some
    /// recipient does not appear among their values. No indicator headers
    /// at all means forwarding cannot be asserted.
    fn is_forwarded(&self, message: &Message) -> bool {
        for rcpt in &message.rcpt {
            let rcpt_addr = rcpt.to_string();
            let mut count = 0;
            let mut matched = false;

            for header in message.headers_named(&self.config.recipient_header) {
                count += 1;
                if header.value.eq_ignore_ascii_case(&rcpt_addr) {
                    matched = true;
                    break;
                }
            }

            if count == 0 {
                return false;
            }
            if !matched {
                return true;
            }
        }

        false
    }

    /// Pick the domain to rewrite into: indicator header domains, minus any
    /// that already equal a recipient's domain (those were addressed
    /// directly, not forwarded), first remaining candidate wins.
    fn rewrite_domain(&self, message: &Message) -> Option<String> {
        let mut domains: Vec<String> = Vec::new();
        for header in message.headers_named(&self.config.recipient_header) {
            match EmailAddress::parse(header.value.trim().to_lowercase().as_str()) {
                Some(address) => domains.push(address.domain),
                None => debug!(
                    queue_id = %message.queue_id,
                    value = %header.value,
                    "unparseable address in forwarding indicator header"
                ),
            }
        }

        let rcpt_domains: Vec<String> = message
            .rcpt
            .iter()
            .map(|r| r.domain.to_lowercase())
            .collect();
        domains.retain(|d| !rcpt_domains.contains(d));

        if domains.len() > 1 {
            debug!(
                queue_id = %message.queue_id,
                candidates = ?domains,
                "multiple srs rewrite domains, using the first"
            );
        }

        domains.into_iter().next()
    }

    /// Rewritten envelope sender, or empty when no rewrite applies
    fn rewritten_sender(&self, message: &Message) -> String {
        if !self.is_forwarded(message) {
            return String::new();
        }

        let domain = match self.rewrite_domain(message) {
            Some(d) => d,
            None => {
                debug!(queue_id = %message.queue_id, "could not determine srs rewrite domain");
                return String::new();
            }
        };

        format!(
            "SRS0={}={}={}@{}",
            message.queue_id, message.from.domain, message.from.local, domain
        )
    }

    /// Remap inbound SRS recipients back to their original addresses
    async fn swap_recipients(
        &self,
        message: &Message,
        inbound: &[EmailAddress],
        envelope: &dyn EnvelopeActions,
    ) -> HashMap<String, String> {
        let mut mapped = HashMap::new();

        for address in inbound {
            let srs_addr = address.to_string();
            let original = match self.mappings.get(&mapping_key(&srs_addr)).await {
                Ok(Some(original)) => original,
                Ok(None) => {
                    debug!(
                        queue_id = %message.queue_id,
                        recipient = %srs_addr,
                        "no srs mapping for inbound recipient"
                    );
                    continue;
                }
                Err(e) => {
                    debug!(
                        queue_id = %message.queue_id,
                        recipient = %srs_addr,
                        error = %e,
                        "srs mapping lookup failed"
                    );
                    continue;
                }
            };

            if let Err(e) = envelope.remove_recipient(&srs_addr).await {
                debug!(recipient = %srs_addr, error = %e, "could not remove srs recipient");
                continue;
            }
            if let Err(e) = envelope.add_recipient(&original).await {
                debug!(recipient = %original, error = %e, "could not add original recipient");
            }

            mapped.insert(srs_addr, original);
        }

        mapped
    }

    /// Persist the reverse mapping in the background, isolated from the
    /// check's own completion.
    fn persist_mapping(&self, rewritten: &str, original: &EmailAddress) {
        let mappings = self.mappings.clone();
        let key = mapping_key(rewritten);
        let value = original.to_string();

        tokio::spawn(async move {
            if let Err(e) = mappings.put(&key, &value, MAPPING_TTL).await {
                debug!(key = %key, error = %e, "could not persist srs mapping");
            }
        });
    }
}

#[async_trait]
impl CheckModule for SrsModule {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn check(&self, message: &Message, envelope: &dyn EnvelopeActions) -> CheckResult {
        let inbound = self.inbound_srs_recipients(message);

        let mut from = String::new();
        let mut mapped = HashMap::new();

        if !inbound.is_empty() {
            if message.rcpt.len() > 1 {
                warn!(
                    queue_id = %message.queue_id,
                    "more than one recipient alongside an SRS recipient, that's weird"
                );
            }
            mapped = self.swap_recipients(message, &inbound, envelope).await;
        } else {
            from = self.rewritten_sender(message);
            if !from.is_empty() {
                match envelope.replace_sender(&from).await {
                    Ok(()) => self.persist_mapping(&from, &message.from),
                    Err(e) => {
                        debug!(
                            queue_id = %message.queue_id,
                            error = %e,
                            "could not replace envelope sender, skipping rewrite"
                        );
                        from = String::new();
                    }
                }
            }
        }

        let mut determinants = HashMap::new();
        determinants.insert("from".to_string(), Determinant::Text(from));
        determinants.insert(
            "is-forwarded".to_string(),
            Determinant::Flag(self.is_forwarded(message)),
        );
        determinants.insert("mapped".to_string(), Determinant::Mapping(mapped));

        CheckResult {
            module: MODULE_NAME.to_string(),
            suggested_action: SuggestedAction::Permit,
            score: 0.0,
            determinants,
        }
    }
}
