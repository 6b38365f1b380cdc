//! The validate capability: license and duration policy.
//!
//! An item is approved only when its parsed license is in
//! `compliance.allowed` and its duration, when known, lies within
//! `[min_duration_secs, max_duration_secs]`. Everything else is rejected
//! with the reason recorded as the item's last error. `unknown` is never in
//! the default allow list, so unrecognized licenses cannot slip through.

use async_trait::async_trait;
use radio_cortex_core::models::{Capability, Item, ItemPatch};

use super::{Agent, Outcome};
use crate::config::ComplianceConfig;

pub struct ValidatorAgent {
    policy: ComplianceConfig,
}

impl ValidatorAgent {
    pub fn new(policy: ComplianceConfig) -> Self {
        Self { policy }
    }

    /// The first policy violation, if any.
    pub fn check(&self, item: &Item) -> Option<String> {
        if !self.policy.allowed.contains(&item.license_kind) {
            return Some(format!(
                "license '{}' is not allowed",
                item.license_kind.as_str()
            ));
        }
        if let Some(secs) = item.duration_secs {
            let (min, max) = (self.policy.min_duration_secs, self.policy.max_duration_secs);
            if secs < min || secs > max {
                return Some(format!(
                    "duration {}s outside allowed range {}-{}s",
                    secs, min, max
                ));
            }
        }
        None
    }
}

#[async_trait]
impl Agent for ValidatorAgent {
    fn capability(&self) -> Capability {
        Capability::Validate
    }

    async fn process(&self, item: &Item) -> Outcome {
        match self.check(item) {
            Some(reason) => Outcome::Rejected(reason),
            None => Outcome::Success(ItemPatch::default()),
        }
    }
}
