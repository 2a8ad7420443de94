//! Construction of batched settlement-chain transactions.

use crate::SettlementError;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use teleport_types::{
	Address, BurnEntry, Id, Settlement, SettlementTx, SettlementType, TxOutput, Utxo,
};

/// One output per settlement, owned by the settlement's recipient.
pub fn build_mint(settlements: &[Settlement]) -> SettlementTx {
	SettlementTx {
		kind: SettlementType::Mint,
		settlement_ids: settlements.iter().map(|s| s.id).collect(),
		inputs: Vec::new(),
		outputs: settlements
			.iter()
			.map(|s| TxOutput {
				asset_id: s.asset_id,
				owner: s.party.clone(),
				amount: s.amount,
			})
			.collect(),
		burns: Vec::new(),
		created_at: Utc::now(),
	}
}

/// Burns every settlement's amount from its sender, spending the sender's
/// UTXOs of that asset and returning change to the sender.
pub fn build_burn(settlements: &[Settlement], utxos: &[Utxo]) -> Result<SettlementTx, SettlementError> {
	let mut needed: BTreeMap<(Address, Id), u64> = BTreeMap::new();
	for s in settlements {
		let entry = needed.entry((s.party.clone(), s.asset_id)).or_default();
		*entry = entry
			.checked_add(s.amount)
			.ok_or_else(|| SettlementError::InvalidRequest("burn amount overflow".into()))?;
	}

	let mut inputs = Vec::new();
	let mut outputs = Vec::new();
	let mut spent = HashSet::new();
	for ((owner, asset_id), need) in &needed {
		let mut have = 0u64;
		for utxo in utxos
			.iter()
			.filter(|u| &u.owner == owner && &u.asset_id == asset_id)
		{
			if have >= *need {
				break;
			}
			if spent.insert(utxo.id) {
				inputs.push(utxo.id);
				have += utxo.amount;
			}
		}
		if have < *need {
			return Err(SettlementError::InsufficientBalance { have, need: *need });
		}
		if have > *need {
			outputs.push(TxOutput {
				asset_id: *asset_id,
				owner: owner.clone(),
				amount: have - need,
			});
		}
	}

	Ok(SettlementTx {
		kind: SettlementType::Burn,
		settlement_ids: settlements.iter().map(|s| s.id).collect(),
		inputs,
		outputs,
		burns: settlements
			.iter()
			.map(|s| BurnEntry {
				asset_id: s.asset_id,
				owner: s.party.clone(),
				amount: s.amount,
			})
			.collect(),
		created_at: Utc::now(),
	})
}
