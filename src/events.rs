//! Blockchain-updates event model and the state machine that folds events
//! into the shared view. `process` turns appends, micro-block appends and
//! rollbacks into storage mutations and an affected-tag delta;
//! `force_rollback_one` undoes the liquid tail when the upstream times out
//! and no authoritative rollback will ever arrive.

use log::{debug, info};

use std::sync::Arc;

use crate::blockchain::SharedBlockchainData;
use crate::common::{
    AccountScriptInfo, Address, Alias, Asset, AssetDescription, AssetId,
    BlockHeader, BlockId, DataEntry, Error, Height, HitSource, LeaseBalance,
    TransferPayload, TxId, TxMeta,
};
use crate::remote::RemoteData;
use crate::storage::AffectedTags;

#[derive(Clone, Debug)]
pub struct BlockchainUpdated {
    pub height: Height,
    pub id: BlockId,
    pub update: Update,
}

#[derive(Clone, Debug)]
pub enum Update {
    Append(Append),
    Rollback(Rollback),
    Empty,
}

#[derive(Clone, Debug)]
pub struct Append {
    pub kind: AppendKind,
    pub state_update: StateUpdate,
    pub tx_state_updates: Vec<StateUpdate>,
    pub transactions: Vec<TxInfo>,
}

#[derive(Clone, Debug)]
pub enum AppendKind {
    Block {
        header: BlockHeader,
        hit_source: Option<HitSource>,
    },
    /// Extends the current block without advancing the height.
    MicroBlock,
}

/// Sub-updates of one append or rollback, grouped per entity. In a rollback
/// these carry the authoritative values *after* the rollback.
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    pub data_entries: Vec<DataEntryUpdate>,
    pub balances: Vec<BalanceUpdate>,
    pub lease_balances: Vec<LeaseBalanceUpdate>,
    pub assets: Vec<AssetUpdate>,
}

#[derive(Clone, Debug)]
pub struct DataEntryUpdate {
    pub address: Address,
    pub key: String,
    /// `None` means the entry is deleted (or was never there, after a
    /// rollback).
    pub entry: Option<DataEntry>,
}

#[derive(Clone, Debug)]
pub struct BalanceUpdate {
    pub address: Address,
    pub asset: Asset,
    pub balance: i64,
}

#[derive(Clone, Debug)]
pub struct LeaseBalanceUpdate {
    pub address: Address,
    pub lease: LeaseBalance,
}

#[derive(Clone, Debug)]
pub struct AssetUpdate {
    pub id: AssetId,
    pub description: Option<AssetDescription>,
}

#[derive(Clone, Debug)]
pub struct TxInfo {
    pub id: TxId,
    pub action: Option<TxAction>,
    pub transfer: Option<TransferPayload>,
}

/// Transactions the processor recognizes beyond their state updates.
#[derive(Clone, Debug)]
pub enum TxAction {
    SetScript {
        sender: Address,
        script: Option<AccountScriptInfo>,
    },
    CreateAlias {
        sender: Address,
        alias: Alias,
    },
}

#[derive(Clone, Debug)]
pub struct Rollback {
    pub state_update: StateUpdate,
    pub removed_tx_ids: Vec<TxId>,
}

/// What accumulated across processed events since the last script round.
#[derive(Debug, Default)]
pub struct ProcessResult {
    pub new_height: Height,
    pub affected_scripts: AffectedTags,
}

pub struct EventProcessor {
    shared: Arc<SharedBlockchainData>,
    accumulated: ProcessResult,
    /// Events since the most recent solid block: one block append plus any
    /// following micro-blocks, in arrival order.
    last_events: Vec<BlockchainUpdated>,
}

impl EventProcessor {
    pub fn new(shared: Arc<SharedBlockchainData>) -> Self {
        let accumulated = ProcessResult {
            new_height: shared.height(),
            affected_scripts: AffectedTags::new(),
        };
        Self {
            shared,
            accumulated,
            last_events: Vec::new(),
        }
    }

    pub fn shared(&self) -> &Arc<SharedBlockchainData> {
        &self.shared
    }

    pub fn accumulated(&self) -> &ProcessResult {
        &self.accumulated
    }

    pub fn affected_mut(&mut self) -> &mut AffectedTags {
        &mut self.accumulated.affected_scripts
    }

    /// Fold one event into the view. All storage mutations land before the
    /// tag delta joins the accumulated set; the per-event write batch is
    /// committed last.
    pub fn process(&mut self, event: &BlockchainUpdated) -> Result<(), Error> {
        match &event.update {
            Update::Empty => return Ok(()),
            Update::Append(append) => self.apply_append(event, append)?,
            Update::Rollback(rollback) => {
                self.apply_rollback(event, rollback)?
            }
        }
        self.shared.db().commit_batch()
    }

    fn apply_append(
        &mut self, event: &BlockchainUpdated, append: &Append,
    ) -> Result<(), Error> {
        let h = event.height;
        self.accumulated.new_height = h;
        let mut affected = AffectedTags::new();
        self.apply_state_update(h, &append.state_update, &mut affected)?;
        for su in &append.tx_state_updates {
            self.apply_state_update(h, su, &mut affected)?;
        }
        for tx in &append.transactions {
            match &tx.action {
                Some(TxAction::SetScript { sender, script }) => {
                    affected.extend(self.shared.account_scripts.append(
                        h,
                        sender,
                        RemoteData::from(script.clone()),
                    )?);
                }
                Some(TxAction::CreateAlias { sender, alias }) => {
                    // later append wins on collision
                    affected.extend(self.shared.aliases.append(
                        h,
                        alias,
                        RemoteData::Cached(sender.clone()),
                    )?);
                }
                None => {}
            }
            affected.extend(self.shared.transactions.append(
                h,
                &tx.id,
                RemoteData::Cached(TxMeta {
                    height: h,
                    transfer: tx.transfer.clone(),
                }),
            )?);
        }
        match &append.kind {
            AppendKind::Block { header, hit_source } => {
                self.shared.headers.record(h, header, hit_source.as_ref());
                self.shared.vrf.record(h, hit_source.clone());
                self.last_events = vec![event.clone()];
            }
            AppendKind::MicroBlock => {
                self.shared.headers.rename_last(&event.id);
                self.last_events.push(event.clone());
            }
        }
        debug!(
            "append at {} affected {} scripts",
            h,
            affected.len()
        );
        self.accumulated.affected_scripts.extend(affected);
        Ok(())
    }

    fn apply_state_update(
        &self, h: Height, su: &StateUpdate, affected: &mut AffectedTags,
    ) -> Result<(), Error> {
        for du in &su.data_entries {
            let key = (du.address.clone(), du.key.clone());
            affected.extend(self.shared.account_data.append(
                h,
                &key,
                RemoteData::from(du.entry.clone()),
            )?);
        }
        for bu in &su.balances {
            let key = (bu.address.clone(), bu.asset.clone());
            affected.extend(self.shared.balances.append(
                h,
                &key,
                RemoteData::Cached(bu.balance),
            )?);
        }
        for lu in &su.lease_balances {
            affected.extend(self.shared.lease_balances.append(
                h,
                &lu.address,
                RemoteData::Cached(lu.lease),
            )?);
        }
        for au in &su.assets {
            affected.extend(self.shared.assets.append(
                h,
                &au.id,
                RemoteData::from(au.description.clone()),
            )?);
        }
        Ok(())
    }

    fn apply_rollback(
        &mut self, event: &BlockchainUpdated, rollback: &Rollback,
    ) -> Result<(), Error> {
        let h_to = event.height;
        self.accumulated.new_height = h_to;
        let mut affected = AffectedTags::new();
        let su = &rollback.state_update;
        for du in &su.data_entries {
            let key = (du.address.clone(), du.key.clone());
            affected.extend(self.shared.account_data.rollback(
                h_to,
                &key,
                RemoteData::from(du.entry.clone()),
            )?);
        }
        for bu in &su.balances {
            let key = (bu.address.clone(), bu.asset.clone());
            affected.extend(self.shared.balances.rollback(
                h_to,
                &key,
                RemoteData::Cached(bu.balance),
            )?);
        }
        for lu in &su.lease_balances {
            affected.extend(self.shared.lease_balances.rollback(
                h_to,
                &lu.address,
                RemoteData::Cached(lu.lease),
            )?);
        }
        for au in &su.assets {
            affected.extend(self.shared.assets.rollback(
                h_to,
                &au.id,
                RemoteData::from(au.description.clone()),
            )?);
        }
        // alias creations and script sets are not rolled back; forward
        // progress reasserts them
        for id in &rollback.removed_tx_ids {
            affected
                .extend(self.shared.transactions.undo_append(h_to + 1, id)?);
        }
        self.shared.vrf.remove_from(h_to + 1);
        self.shared.headers.remove_from(h_to + 1)?;
        self.last_events
            .retain(|e| e.height < h_to || e.id == event.id);
        info!(
            "rollback to {} ({}) affected {} scripts",
            h_to,
            event.id,
            affected.len()
        );
        self.accumulated.affected_scripts.extend(affected);
        Ok(())
    }

    /// Synthetic fork: no rollback event will come, so undo every append of
    /// the liquid tail, newest first, returning the view to the last solid
    /// block. The tags of every touched key join the accumulated set.
    pub fn force_rollback_one(&mut self) -> Result<(), Error> {
        let tail = std::mem::take(&mut self.last_events);
        if tail.is_empty() {
            panic!("synthetic fork requested with an empty liquid tail");
        }
        let tail_height = tail[0].height;
        let mut affected = AffectedTags::new();
        for event in tail.iter().rev() {
            let append = match &event.update {
                Update::Append(append) => append,
                _ => panic!("liquid tail holds a non-append event"),
            };
            self.undo_append_event(event.height, append, &mut affected)?;
        }
        self.shared.vrf.remove_from(tail_height);
        self.shared.headers.remove_from(tail_height)?;
        self.accumulated.new_height = self.shared.height();
        info!(
            "synthetic fork: undid {} events, back at height {}",
            tail.len(),
            self.accumulated.new_height
        );
        self.accumulated.affected_scripts.extend(affected);
        self.shared.db().commit_batch()
    }

    fn undo_append_event(
        &self, h: Height, append: &Append, affected: &mut AffectedTags,
    ) -> Result<(), Error> {
        let undo_su = |su: &StateUpdate,
                       affected: &mut AffectedTags|
         -> Result<(), Error> {
            for du in &su.data_entries {
                let key = (du.address.clone(), du.key.clone());
                affected
                    .extend(self.shared.account_data.undo_append(h, &key)?);
            }
            for bu in &su.balances {
                let key = (bu.address.clone(), bu.asset.clone());
                affected.extend(self.shared.balances.undo_append(h, &key)?);
            }
            for lu in &su.lease_balances {
                affected.extend(
                    self.shared.lease_balances.undo_append(h, &lu.address)?,
                );
            }
            for au in &su.assets {
                affected.extend(self.shared.assets.undo_append(h, &au.id)?);
            }
            Ok(())
        };
        undo_su(&append.state_update, affected)?;
        for su in &append.tx_state_updates {
            undo_su(su, affected)?;
        }
        for tx in &append.transactions {
            match &tx.action {
                Some(TxAction::SetScript { sender, .. }) => {
                    affected.extend(
                        self.shared.account_scripts.undo_append(h, sender)?,
                    );
                }
                Some(TxAction::CreateAlias { alias, .. }) => {
                    affected
                        .extend(self.shared.aliases.undo_append(h, alias)?);
                }
                None => {}
            }
            affected
                .extend(self.shared.transactions.undo_append(h, &tx.id)?);
        }
        Ok(())
    }
}
