//! Non-blocking audit writer: worker and gateway handlers hand off an
//! [`AuditRow`](crate::store::AuditRow) over an unbounded channel instead of
//! awaiting the insert inline, so a slow or momentarily unavailable
//! database never stalls the hot path that produced the event.
//!
//! Grounded on the donor's `logger.rs`, which ran its own background
//! worker off an `mpsc::UnboundedSender<AuditEvent>`. The donor's hash-chain
//! tamper evidence, event type/severity taxonomy, multi-backend storage
//! trait, query builder, and compliance/report generators are dropped —
//! spec names one append-only row shape and one writer
//! ([`crate::store::AuditRepository`]), not a compliance subsystem.

use tokio::sync::mpsc;

use crate::store::{AuditRepository, AuditRow};

/// Handle used by callers to enqueue audit rows without waiting on the
/// database write.
#[derive(Clone)]
pub struct AuditWriter {
    sender: mpsc::UnboundedSender<AuditRow>,
}

impl AuditWriter {
    /// Spawns the background task that drains the channel into `repo` and
    /// returns a handle for producers.
    pub fn spawn(repo: AuditRepository) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditRow>();

        tokio::spawn(async move {
            while let Some(row) = receiver.recv().await {
                if let Err(e) = repo.append(&row).await {
                    tracing::warn!(
                        error = %e,
                        trace_id = %row.trace_id,
                        "failed to persist audit row"
                    );
                }
            }
        });

        Self { sender }
    }

    /// Enqueues `row` for persistence. Never blocks; silently drops (with a
    /// log line) only if the background task has already exited, which
    /// only happens at process shutdown.
    pub fn record(&self, row: AuditRow) {
        if self.sender.send(row).is_err() {
            tracing::warn!("audit writer channel closed, dropping audit row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_is_cloneable_for_sharing_across_tasks() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuditWriter>();
    }
}
