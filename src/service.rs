//! The main loop (§4.H): one tick is one transaction, driving
//! reader → decoder → reducer → scheduler → writer in that order.

use crate::chain::{ChainReader, ChainWriter, ReceiptStatus};
use crate::db::Store;
use crate::engine::{apply, due_actions, ChainIntent, ReducerConfig};
use crate::error::ServiceError;
use crate::intake;
use crate::metrics;
use crate::signatures::SignatureVerifier;
use crate::transport::Transport;
use crate::types::ScheduledAction;
use alloy::primitives::Address;
use std::time::Duration;
use tokio::sync::watch;

/// Consecutive `StateInvariantViolation` ticks tolerated before the main
/// loop gives up and returns a fatal error (§7: "persistent violation
/// after N retries is fatal"; §6: "non-zero on fatal invariant
/// violation").
const MAX_CONSECUTIVE_INVARIANT_VIOLATIONS: u32 = 3;

pub struct Service {
    store: Store,
    reader: ChainReader,
    writer: ChainWriter,
    verifier: Box<dyn SignatureVerifier>,
    reducer_config: ReducerConfig,
    poll_interval: Duration,
    our_msc_address: Address,
    our_chain_id: u64,
}

impl Service {
    pub fn new(
        store: Store,
        reader: ChainReader,
        writer: ChainWriter,
        verifier: Box<dyn SignatureVerifier>,
        reducer_config: ReducerConfig,
        poll_interval: Duration,
        our_msc_address: Address,
        our_chain_id: u64,
    ) -> Self {
        Self { store, reader, writer, verifier, reducer_config, poll_interval, our_msc_address, our_chain_id }
    }

    /// Drives the tick loop until `shutdown` fires, then completes the
    /// in-flight tick (if any) and returns (§5 "Cancellation"). Returns an
    /// error only when a `StateInvariantViolation` persists for
    /// [`MAX_CONSECUTIVE_INVARIANT_VIOLATIONS`] ticks in a row, which the
    /// caller treats as fatal (non-zero process exit).
    pub async fn run(&self, mut transport: Box<dyn Transport>, mut shutdown: watch::Receiver<bool>) -> Result<(), ServiceError> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut consecutive_invariant_violations = 0u32;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick_chain().await {
                        Ok(()) => consecutive_invariant_violations = 0,
                        Err(err @ ServiceError::StateInvariantViolation(_)) => {
                            consecutive_invariant_violations += 1;
                            tracing::error!(
                                error = %err,
                                consecutive_violations = consecutive_invariant_violations,
                                "tick failed with a state invariant violation",
                            );
                            if consecutive_invariant_violations >= MAX_CONSECUTIVE_INVARIANT_VIOLATIONS {
                                tracing::error!("persistent state invariant violation; exiting");
                                return Err(err);
                            }
                        }
                        Err(err) => {
                            consecutive_invariant_violations = 0;
                            tracing::error!(error = %err, "tick failed; will retry from last committed block");
                        }
                    }
                }
                request = transport.recv() => {
                    match request {
                        Some(request) => self.handle_intake(request).await,
                        None => {
                            tracing::warn!("transport closed; continuing on chain polling alone");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shutdown signal received; exiting after current tick");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn tick_chain(&self) -> Result<(), ServiceError> {
        self.reconcile_in_flight().await?;

        let mut snapshot = self.store.load_snapshot().await?;

        let Some(confirmed_head) = self.reader.confirmed_head().await? else {
            return Ok(());
        };
        if confirmed_head <= snapshot.blockchain_state.latest_confirmed_block {
            return Ok(());
        }

        let mut addresses: Vec<Address> = snapshot.blockchain_state.token_networks.clone();
        addresses.push(snapshot.blockchain_state.token_network_registry_address);
        addresses.push(snapshot.blockchain_state.monitor_contract_address);

        let events = self
            .reader
            .poll(snapshot.blockchain_state.latest_confirmed_block, confirmed_head, &addresses)
            .await?;

        metrics::record_events_processed(events.len() as u64);
        for event in &events {
            apply(&mut snapshot, event, &self.reducer_config)?;
        }

        let fired = due_actions(&mut snapshot, confirmed_head);
        let fired_actions: Vec<ScheduledAction> = fired.iter().map(|(a, _)| a.clone()).collect();

        self.store.commit(&snapshot, &fired_actions).await?;
        metrics::record_tick();
        metrics::record_latest_confirmed_block(confirmed_head);

        // The writer runs only *after* the commit above lands: a crash here
        // leaves the action `in_flight` with no recorded tx hash, which
        // `reconcile_in_flight` picks up and retries on the next tick
        // (§4.H step 4).
        for (action, intent) in fired {
            self.fire(action, intent).await;
        }

        Ok(())
    }

    /// Reconciles in-flight rows left over from a previous tick (§4.E):
    /// one that never reached submission is retried from scratch; one with
    /// a recorded transaction hash is deleted once its receipt confirms
    /// success, or reverted-to-pending if the receipt shows failure. A row
    /// whose transaction is still pending is left untouched.
    async fn reconcile_in_flight(&self) -> Result<(), ServiceError> {
        for action in self.store.load_in_flight_actions().await? {
            match action.submitted_tx_hash {
                None => {
                    tracing::warn!(action_id = %action.id, "in-flight action was never submitted before a restart; retrying");
                    self.store.revert_action_in_flight(&action.id).await?;
                }
                Some(tx_hash) => match self.reader.transaction_receipt(tx_hash).await {
                    Ok(ReceiptStatus::Success) => {
                        tracing::info!(action_id = %action.id, tx_hash = %tx_hash, "action confirmed on-chain");
                        self.store.delete_action(&action.id).await?;
                    }
                    Ok(ReceiptStatus::Reverted) => {
                        tracing::warn!(action_id = %action.id, tx_hash = %tx_hash, "submitted transaction reverted; will resubmit");
                        self.store.revert_action_in_flight(&action.id).await?;
                    }
                    Ok(ReceiptStatus::Pending) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, action_id = %action.id, "failed to look up receipt; will retry next tick");
                    }
                },
            }
        }
        Ok(())
    }

    async fn fire(&self, action: ScheduledAction, intent: ChainIntent) {
        let kind = match &intent {
            ChainIntent::SubmitMonitor { .. } => "monitor",
            ChainIntent::ClaimReward { .. } => "claim",
        };
        match self.writer.submit(&intent).await {
            Ok(tx_hash) => {
                tracing::info!(action_id = %action.id, tx_hash = %tx_hash, "submitted scheduled action; awaiting on-chain confirmation");
                metrics::record_action_fired(kind);
                if let Err(err) = self.store.mark_action_submitted(&action.id, tx_hash).await {
                    tracing::error!(error = %err, action_id = %action.id, "failed to record submitted tx hash");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, action_id = %action.id, "action submission failed; will retry next tick");
                if let Err(revert_err) = self.store.revert_action_in_flight(&action.id).await {
                    tracing::error!(error = %revert_err, action_id = %action.id, "failed to revert in-flight flag");
                }
            }
        }
    }

    async fn handle_intake(&self, request: crate::types::MonitorRequest) {
        let mut snapshot = match self.store.load_snapshot().await {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(error = %err, "failed to load snapshot for intake");
                return;
            }
        };

        match intake::validate_and_upsert(&mut snapshot, request, self.verifier.as_ref(), self.our_msc_address, self.our_chain_id) {
            Ok(()) => {
                if let Err(err) = self.store.commit(&snapshot, &[]).await {
                    tracing::error!(error = %err, "failed to commit intake");
                }
            }
            Err(ServiceError::InvalidRequest(reason)) => {
                tracing::debug!(reason = %reason, "rejected monitor request");
                metrics::record_intake_rejected(reason_tag(&reason));
            }
            Err(err) => {
                tracing::error!(error = %err, "unexpected error validating monitor request");
            }
        }
    }
}

fn reason_tag(reason: &crate::error::InvalidRequestReason) -> &'static str {
    use crate::error::InvalidRequestReason::*;
    match reason {
        Structural(_) => "structural",
        ClosingSignatureInvalid => "closing_signature_invalid",
        NonClosingSignatureInvalid => "non_closing_signature_invalid",
        WrongMonitoringServiceContract => "wrong_monitoring_service_contract",
        WrongChainId { .. } => "wrong_chain_id",
        UnknownChannel(_) => "unknown_channel",
        ChannelSettled => "channel_settled",
        NonceNotIncreasing { .. } => "nonce_not_increasing",
    }
}
