use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};
use vigil_store::EmergencyChannel;
use vigil_types::{EmergencyRecord, FailureStage, NewEntry};

use crate::error::LedgerError;
use crate::health::HealthMonitor;
use crate::retry::bounded;

/// Last-resort recorder for candidates that never reached the primary store.
pub struct EmergencyFallback {
    channel: Arc<dyn EmergencyChannel>,
    health: Arc<HealthMonitor>,
    timeout: Duration,
}

impl EmergencyFallback {
    pub fn new(channel: Arc<dyn EmergencyChannel>, health: Arc<HealthMonitor>, timeout: Duration) -> Self {
        Self {
            channel,
            health,
            timeout,
        }
    }

    /// Record `failure` against `candidate`. Returns whether the record was written.
    ///
    /// Never fails: an unwritable emergency channel is logged and counted,
    /// and the caller still returns its own error.
    pub async fn capture(&self, stage: FailureStage, candidate: &NewEntry, failure: &LedgerError) -> bool {
        let record = EmergencyRecord::capture(stage, candidate, failure.to_string());
        warn!(
            %stage,
            record_id = %record.id,
            error = %failure,
            "entry creation failed; writing emergency record"
        );
        match bounded("emergency_record", self.timeout, self.channel.record(&record)).await {
            Ok(()) => {
                self.health.record_emergency_written();
                true
            }
            Err(e) => {
                self.health.record_emergency_failed();
                error!(
                    channel = self.channel.name(),
                    %stage,
                    original_error = %failure,
                    error = %e,
                    "emergency record write failed; event is not recorded anywhere"
                );
                false
            }
        }
    }

    pub fn channel(&self) -> &Arc<dyn EmergencyChannel> {
        &self.channel
    }
}
