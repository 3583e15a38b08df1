use crate::error::ServiceError;
use crate::types::{
    ActionKind, BlockNumber, BlockchainState, Channel, ChannelKey, ChannelState, MonitorRequest,
    ScheduledAction,
};
use alloy::primitives::{Address, B256, U256};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::str::FromStr;

use super::SCHEMA_VERSION;

/// In-memory view of everything the reducer needs for one tick, loaded
/// from the last committed state and discarded on commit (§5: "shared
/// state lives only in the database; in-memory copies are per-tick
/// snapshots").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub blockchain_state: BlockchainState,
    pub channels: HashMap<ChannelKey, Channel>,
    pub monitor_requests: HashMap<(Address, U256, Address), MonitorRequest>,
    pub scheduled_actions: HashMap<String, ScheduledAction>,
}

impl Snapshot {
    pub fn monitor_request_for(&self, channel: ChannelKey, non_closing_participant: Address) -> Option<&MonitorRequest> {
        self.monitor_requests.get(&(channel.token_network, channel.channel_id, non_closing_participant))
    }

    pub fn actions_for_channel(&self, channel: ChannelKey, kind: ActionKind) -> Option<&ScheduledAction> {
        self.scheduled_actions
            .values()
            .find(|a| a.channel_key == channel && a.kind == kind)
    }
}

/// The embedded SQL store. A thin wrapper over a `sqlx` sqlite pool; every
/// mutating method opens its own transaction and commits or rolls back as
/// a unit, matching the "one tick = one transaction" rule of §4.H.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, ServiceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        store.check_schema_version().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self, ServiceError> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> Result<(), ServiceError> {
        sqlx::query(include_str!("../../migrations/0001_init.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn check_schema_version(&self) -> Result<(), ServiceError> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = 'schema_version'")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => {
                sqlx::query("INSERT INTO meta (key, value) VALUES ('schema_version', ?)")
                    .bind(SCHEMA_VERSION.to_string())
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
            Some(row) => {
                let stored: String = row.try_get("value")?;
                let stored: i64 = stored
                    .parse()
                    .map_err(|_| ServiceError::ConfigMismatch(format!("unparseable schema_version {stored:?}")))?;
                if stored != SCHEMA_VERSION {
                    return Err(ServiceError::ConfigMismatch(format!(
                        "database schema version {stored} does not match expected {SCHEMA_VERSION}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Initializes `blockchain_state` on a fresh database, or validates
    /// that an existing row agrees with the running configuration
    /// (§4, "some sanity checks" in the source; §7 `ConfigMismatch`).
    pub async fn ensure_blockchain_state(
        &self,
        chain_id: u64,
        token_network_registry_address: Address,
        monitor_contract_address: Address,
        monitoring_service_address: Address,
        sync_start_block: BlockNumber,
    ) -> Result<(), ServiceError> {
        let existing = self.load_blockchain_state().await?;
        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO blockchain_state \
                     (id, latest_confirmed_block, chain_id, token_network_registry_address, \
                      monitor_contract_address, monitoring_service_address) \
                     VALUES (0, ?, ?, ?, ?, ?)",
                )
                .bind(sync_start_block as i64)
                .bind(chain_id as i64)
                .bind(addr_to_text(token_network_registry_address))
                .bind(addr_to_text(monitor_contract_address))
                .bind(addr_to_text(monitoring_service_address))
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            Some(state) => {
                if state.chain_id != chain_id {
                    return Err(ServiceError::ConfigMismatch(format!(
                        "chain id {chain_id} does not match persisted {}",
                        state.chain_id
                    )));
                }
                if state.token_network_registry_address != token_network_registry_address {
                    return Err(ServiceError::ConfigMismatch(
                        "registry address does not match persisted state".into(),
                    ));
                }
                if state.monitor_contract_address != monitor_contract_address {
                    return Err(ServiceError::ConfigMismatch(
                        "monitor contract address does not match persisted state".into(),
                    ));
                }
                if state.monitoring_service_address != monitoring_service_address {
                    return Err(ServiceError::ConfigMismatch(
                        "monitoring service address does not match persisted state".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    async fn load_blockchain_state(&self) -> Result<Option<BlockchainState>, ServiceError> {
        let row = sqlx::query("SELECT * FROM blockchain_state WHERE id = 0")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let token_networks = sqlx::query("SELECT address FROM token_networks")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| parse_addr(&r.try_get::<String, _>("address")?))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(BlockchainState {
            latest_confirmed_block: row.try_get::<i64, _>("latest_confirmed_block")? as u64,
            chain_id: row.try_get::<i64, _>("chain_id")? as u64,
            token_network_registry_address: parse_addr(&row.try_get::<String, _>("token_network_registry_address")?)?,
            monitor_contract_address: parse_addr(&row.try_get::<String, _>("monitor_contract_address")?)?,
            monitoring_service_address: parse_addr(&row.try_get::<String, _>("monitoring_service_address")?)?,
            token_networks,
        }))
    }

    /// Loads the full materialized state for the next tick.
    pub async fn load_snapshot(&self) -> Result<Snapshot, ServiceError> {
        let blockchain_state = self.load_blockchain_state().await?.ok_or_else(|| {
            ServiceError::ConfigMismatch("blockchain_state not initialized".into())
        })?;

        let channels = sqlx::query("SELECT * FROM channels")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row_to_channel(&row).map(|c| (c.key, c)))
            .collect::<Result<HashMap<_, _>, ServiceError>>()?;

        let monitor_requests = sqlx::query("SELECT * FROM monitor_requests")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row_to_monitor_request(&row).map(|r| (r.key(), r)))
            .collect::<Result<HashMap<_, _>, ServiceError>>()?;

        let scheduled_actions = sqlx::query("SELECT * FROM scheduled_actions WHERE in_flight = 0")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row_to_action(&row).map(|a| (a.id.clone(), a)))
            .collect::<Result<HashMap<_, _>, ServiceError>>()?;

        Ok(Snapshot { blockchain_state, channels, monitor_requests, scheduled_actions })
    }

    /// Atomically replaces the materialized state with `snapshot` and
    /// marks `fired_action_ids` as completed (removed). This is the single
    /// commit point of §4.H: either the whole tick lands, or none of it
    /// does.
    ///
    /// Rather than tracking a fine-grained diff, each table is rewritten
    /// in full from the snapshot. The service's working set (channels on
    /// a handful of token networks) is small enough that this is cheap,
    /// and it sidesteps an entire class of "forgot to delete a stale row"
    /// bugs that a hand-rolled diff would risk (see DESIGN.md).
    pub async fn commit(&self, snapshot: &Snapshot, fired_this_tick: &[ScheduledAction]) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        write_blockchain_state(&mut tx, &snapshot.blockchain_state).await?;

        for network in &snapshot.blockchain_state.token_networks {
            sqlx::query("INSERT OR IGNORE INTO token_networks (address, created_block) VALUES (?, ?)")
                .bind(addr_to_text(*network))
                .bind(snapshot.blockchain_state.latest_confirmed_block as i64)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM channels").execute(&mut *tx).await?;
        for channel in snapshot.channels.values() {
            write_channel(&mut tx, channel).await?;
        }

        sqlx::query("DELETE FROM monitor_requests").execute(&mut *tx).await?;
        for request in snapshot.monitor_requests.values() {
            write_monitor_request(&mut tx, request).await?;
        }

        sqlx::query("DELETE FROM scheduled_actions").execute(&mut *tx).await?;
        for action in snapshot.scheduled_actions.values() {
            write_action(&mut tx, action, false).await?;
        }
        // Actions the scheduler popped this tick are written back as
        // in-flight rows in the *same* transaction: if the process dies
        // right after this commit but before the chain writer runs, the
        // next tick sees `in_flight = 1` and does not re-fire it (§4.E).
        for action in fired_this_tick {
            write_action(&mut tx, action, true).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Deletes an action once its on-chain effect has been confirmed
    /// (§4.E: "Completion ... deletes the action row").
    pub async fn delete_action(&self, action_id: &str) -> Result<(), ServiceError> {
        sqlx::query("DELETE FROM scheduled_actions WHERE id = ?")
            .bind(action_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reverts an in-flight action back to pending so the next tick's
    /// scheduler pass retries it, clearing any recorded submission so it is
    /// resubmitted from scratch. Used for `SignatureFailure` and
    /// exhausted-retry `TransientRpc` outcomes (§7), and for reconciling a
    /// reverted or orphaned in-flight row on restart (§4.E).
    pub async fn revert_action_in_flight(&self, action_id: &str) -> Result<(), ServiceError> {
        sqlx::query("UPDATE scheduled_actions SET in_flight = 0, submitted_tx_hash = NULL WHERE id = ?")
            .bind(action_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records that an in-flight action's transaction was submitted and
    /// returned `tx_hash`, without yet deleting the row — the writer is not
    /// responsible for receipt confirmation (§4.G); a later tick's
    /// reconciliation pass decides whether to delete or revert it.
    pub async fn mark_action_submitted(&self, action_id: &str, tx_hash: B256) -> Result<(), ServiceError> {
        sqlx::query("UPDATE scheduled_actions SET submitted_tx_hash = ? WHERE id = ?")
            .bind(tx_hash.to_string())
            .bind(action_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Loads every action currently marked in-flight, regardless of
    /// whether it ever got as far as being submitted. A crash between
    /// `commit()` writing the in-flight row and the writer actually running
    /// leaves a row here with `submitted_tx_hash = NULL`; a crash after
    /// submission leaves one with a hash to reconcile against a receipt.
    /// Neither case is visible to `load_snapshot` (§4.E "safely re-checked
    /// on restart").
    pub async fn load_in_flight_actions(&self) -> Result<Vec<ScheduledAction>, ServiceError> {
        sqlx::query("SELECT * FROM scheduled_actions WHERE in_flight = 1")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_action)
            .collect()
    }

    pub async fn load_cursor(&self, address: Address) -> Result<Option<BlockNumber>, ServiceError> {
        let row = sqlx::query("SELECT last_polled_block FROM raw_event_cursors WHERE address = ?")
            .bind(addr_to_text(address))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<i64, _>("last_polled_block")).transpose()?.map(|b| b as u64))
    }

    pub async fn save_cursor(&self, address: Address, block: BlockNumber) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO raw_event_cursors (address, last_polled_block) VALUES (?, ?) \
             ON CONFLICT(address) DO UPDATE SET last_polled_block = excluded.last_polled_block",
        )
        .bind(addr_to_text(address))
        .bind(block as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn write_blockchain_state(tx: &mut Transaction<'_, Sqlite>, state: &BlockchainState) -> Result<(), ServiceError> {
    sqlx::query(
        "UPDATE blockchain_state SET latest_confirmed_block = ?, chain_id = ?, \
         token_network_registry_address = ?, monitor_contract_address = ?, \
         monitoring_service_address = ? WHERE id = 0",
    )
    .bind(state.latest_confirmed_block as i64)
    .bind(state.chain_id as i64)
    .bind(addr_to_text(state.token_network_registry_address))
    .bind(addr_to_text(state.monitor_contract_address))
    .bind(addr_to_text(state.monitoring_service_address))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_channel(tx: &mut Transaction<'_, Sqlite>, channel: &Channel) -> Result<(), ServiceError> {
    sqlx::query(
        "INSERT INTO channels \
         (token_network, channel_id, participant1, participant2, settle_timeout, state, \
          closing_block, closing_participant, closing_tx_hash, onchain_nonce, monitor_tx_hash, \
          claim_tx_hash, ms_submitted) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(addr_to_text(channel.key.token_network))
    .bind(channel.key.channel_id.to_string())
    .bind(addr_to_text(channel.participant1))
    .bind(addr_to_text(channel.participant2))
    .bind(channel.settle_timeout as i64)
    .bind(channel_state_to_text(channel.state))
    .bind(channel.closing_block.map(|b| b as i64))
    .bind(channel.closing_participant.map(addr_to_text))
    .bind(channel.closing_tx_hash.map(|h| h.to_string()))
    .bind(channel.onchain_nonce.map(|n| n.to_string()))
    .bind(channel.monitor_tx_hash.map(|h| h.to_string()))
    .bind(channel.claim_tx_hash.map(|h| h.to_string()))
    .bind(channel.ms_submitted as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_monitor_request(tx: &mut Transaction<'_, Sqlite>, request: &MonitorRequest) -> Result<(), ServiceError> {
    sqlx::query(
        "INSERT INTO monitor_requests \
         (token_network, channel_id, non_closing_participant, nonce, balance_hash, \
          additional_hash, closing_signature, non_closing_signature, reward_amount, \
          monitoring_service_contract_address, chain_id, reward_proof_signature) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(addr_to_text(request.token_network))
    .bind(request.channel_id.to_string())
    .bind(addr_to_text(request.non_closing_participant))
    .bind(request.nonce.to_string())
    .bind(request.balance_hash.to_string())
    .bind(request.additional_hash.to_string())
    .bind(request.closing_signature.clone())
    .bind(request.non_closing_signature.clone())
    .bind(request.reward_amount.to_string())
    .bind(addr_to_text(request.monitoring_service_contract_address))
    .bind(request.chain_id as i64)
    .bind(request.reward_proof_signature.clone())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_action(tx: &mut Transaction<'_, Sqlite>, action: &ScheduledAction, in_flight: bool) -> Result<(), ServiceError> {
    sqlx::query(
        "INSERT INTO scheduled_actions \
         (id, trigger_block, kind, token_network, channel_id, in_flight, submitted_tx_hash) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&action.id)
    .bind(action.trigger_block as i64)
    .bind(action_kind_to_text(action.kind))
    .bind(addr_to_text(action.channel_key.token_network))
    .bind(action.channel_key.channel_id.to_string())
    .bind(in_flight as i64)
    .bind(action.submitted_tx_hash.map(|h| h.to_string()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn row_to_channel(row: &SqliteRow) -> Result<Channel, ServiceError> {
    Ok(Channel {
        key: ChannelKey::new(
            parse_addr(&row.try_get::<String, _>("token_network")?)?,
            parse_u256(&row.try_get::<String, _>("channel_id")?)?,
        ),
        participant1: parse_addr(&row.try_get::<String, _>("participant1")?)?,
        participant2: parse_addr(&row.try_get::<String, _>("participant2")?)?,
        settle_timeout: row.try_get::<i64, _>("settle_timeout")? as u64,
        state: channel_state_from_text(&row.try_get::<String, _>("state")?)?,
        closing_block: row.try_get::<Option<i64>, _>("closing_block")?.map(|b| b as u64),
        closing_participant: row
            .try_get::<Option<String>, _>("closing_participant")?
            .map(|a| parse_addr(&a))
            .transpose()?,
        closing_tx_hash: row
            .try_get::<Option<String>, _>("closing_tx_hash")?
            .map(|h| parse_b256(&h))
            .transpose()?,
        onchain_nonce: row
            .try_get::<Option<String>, _>("onchain_nonce")?
            .map(|n| parse_u256(&n))
            .transpose()?,
        monitor_tx_hash: row
            .try_get::<Option<String>, _>("monitor_tx_hash")?
            .map(|h| parse_b256(&h))
            .transpose()?,
        claim_tx_hash: row
            .try_get::<Option<String>, _>("claim_tx_hash")?
            .map(|h| parse_b256(&h))
            .transpose()?,
        ms_submitted: row.try_get::<i64, _>("ms_submitted")? != 0,
    })
}

fn row_to_monitor_request(row: &SqliteRow) -> Result<MonitorRequest, ServiceError> {
    Ok(MonitorRequest {
        token_network: parse_addr(&row.try_get::<String, _>("token_network")?)?,
        channel_id: parse_u256(&row.try_get::<String, _>("channel_id")?)?,
        non_closing_participant: parse_addr(&row.try_get::<String, _>("non_closing_participant")?)?,
        nonce: parse_u256(&row.try_get::<String, _>("nonce")?)?,
        balance_hash: parse_b256(&row.try_get::<String, _>("balance_hash")?)?,
        additional_hash: parse_b256(&row.try_get::<String, _>("additional_hash")?)?,
        closing_signature: row.try_get("closing_signature")?,
        non_closing_signature: row.try_get("non_closing_signature")?,
        reward_amount: parse_u256(&row.try_get::<String, _>("reward_amount")?)?,
        monitoring_service_contract_address: parse_addr(
            &row.try_get::<String, _>("monitoring_service_contract_address")?,
        )?,
        chain_id: row.try_get::<i64, _>("chain_id")? as u64,
        reward_proof_signature: row.try_get("reward_proof_signature")?,
    })
}

fn row_to_action(row: &SqliteRow) -> Result<ScheduledAction, ServiceError> {
    Ok(ScheduledAction {
        id: row.try_get("id")?,
        trigger_block: row.try_get::<i64, _>("trigger_block")? as u64,
        kind: action_kind_from_text(&row.try_get::<String, _>("kind")?)?,
        channel_key: ChannelKey::new(
            parse_addr(&row.try_get::<String, _>("token_network")?)?,
            parse_u256(&row.try_get::<String, _>("channel_id")?)?,
        ),
        submitted_tx_hash: row
            .try_get::<Option<String>, _>("submitted_tx_hash")?
            .map(|h| parse_b256(&h))
            .transpose()?,
    })
}

fn addr_to_text(address: Address) -> String {
    address.to_string()
}

fn parse_addr(text: &str) -> Result<Address, ServiceError> {
    Address::from_str(text).map_err(|e| ServiceError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn parse_u256(text: &str) -> Result<U256, ServiceError> {
    U256::from_str(text).map_err(|e| ServiceError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn parse_b256(text: &str) -> Result<B256, ServiceError> {
    B256::from_str(text).map_err(|e| ServiceError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn channel_state_to_text(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Opened => "opened",
        ChannelState::Closed => "closed",
        ChannelState::Settled => "settled",
    }
}

fn channel_state_from_text(text: &str) -> Result<ChannelState, ServiceError> {
    match text {
        "opened" => Ok(ChannelState::Opened),
        "closed" => Ok(ChannelState::Closed),
        "settled" => Ok(ChannelState::Settled),
        other => Err(ServiceError::MalformedEvent(format!("unknown channel state {other:?}"))),
    }
}

fn action_kind_to_text(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::MonitoringTriggered => "monitor",
        ActionKind::ClaimRewardTriggered => "claim",
    }
}

fn action_kind_from_text(text: &str) -> Result<ActionKind, ServiceError> {
    match text {
        "monitor" => Ok(ActionKind::MonitoringTriggered),
        "claim" => Ok(ActionKind::ClaimRewardTriggered),
        other => Err(ServiceError::MalformedEvent(format!("unknown action kind {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[tokio::test]
    async fn fresh_database_initializes_blockchain_state() {
        let store = Store::connect_in_memory().await.unwrap();
        let registry = address!("0000000000000000000000000000000000000001");
        let monitor = address!("0000000000000000000000000000000000000002");
        let ms = address!("0000000000000000000000000000000000000003");
        store.ensure_blockchain_state(1, registry, monitor, ms, 0).await.unwrap();

        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.blockchain_state.chain_id, 1);
        assert_eq!(snapshot.blockchain_state.latest_confirmed_block, 0);
        assert!(snapshot.channels.is_empty());
    }

    #[tokio::test]
    async fn chain_id_mismatch_is_config_mismatch() {
        let store = Store::connect_in_memory().await.unwrap();
        let registry = address!("0000000000000000000000000000000000000001");
        let monitor = address!("0000000000000000000000000000000000000002");
        let ms = address!("0000000000000000000000000000000000000003");
        store.ensure_blockchain_state(1, registry, monitor, ms, 0).await.unwrap();

        let err = store.ensure_blockchain_state(2, registry, monitor, ms, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::ConfigMismatch(_)));
    }

    #[tokio::test]
    async fn commit_round_trips_a_channel() {
        let store = Store::connect_in_memory().await.unwrap();
        let registry = address!("0000000000000000000000000000000000000001");
        let monitor = address!("0000000000000000000000000000000000000002");
        let ms = address!("0000000000000000000000000000000000000003");
        store.ensure_blockchain_state(1, registry, monitor, ms, 0).await.unwrap();

        let mut snapshot = store.load_snapshot().await.unwrap();
        let key = ChannelKey::new(registry, U256::from(3u64));
        let c1 = address!("0000000000000000000000000000000000000010");
        let c2 = address!("0000000000000000000000000000000000000020");
        snapshot.channels.insert(key, Channel::new(key, c1, c2, 20));
        snapshot.blockchain_state.latest_confirmed_block = 5;
        store.commit(&snapshot, &[]).await.unwrap();

        let reloaded = store.load_snapshot().await.unwrap();
        assert_eq!(reloaded.blockchain_state.latest_confirmed_block, 5);
        assert_eq!(reloaded.channels.len(), 1);
        assert_eq!(reloaded.channels[&key].settle_timeout, 20);
    }
}
