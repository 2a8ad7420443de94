//! In-process UTXO settlement chain.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use teleport_types::{
	keccak256, Address, ChainError, ChainId, Id, SettlementChainClient, SettlementType,
	SignedSettlementTx, Utxo,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Checks the group signature of a settlement transaction.
pub type SignatureCheck = Arc<dyn Fn(&[u8; 32], &[u8]) -> bool + Send + Sync>;

#[derive(Default)]
struct Ledger {
	utxos: HashMap<Id, Utxo>,
	blocks: Vec<Vec<u8>>,
	issued: Vec<(Id, SignedSettlementTx)>,
	seen: HashSet<Id>,
	fail_next: usize,
	nonce: u64,
}

/// A settlement chain that applies mint and burn transactions to an
/// in-memory UTXO set. Each accepted transaction becomes one block.
pub struct LocalSettlementChain {
	chain_id: ChainId,
	ledger: Mutex<Ledger>,
	signature_check: Option<SignatureCheck>,
}

impl LocalSettlementChain {
	pub fn new(chain_id: ChainId) -> Self {
		Self {
			chain_id,
			ledger: Mutex::new(Ledger::default()),
			signature_check: None,
		}
	}

	/// Rejects transactions whose signature does not pass `check`.
	pub fn with_signature_check(mut self, check: SignatureCheck) -> Self {
		self.signature_check = Some(check);
		self
	}

	/// Creates an output owned by `owner` outside of any transaction.
	pub async fn credit(&self, owner: &Address, asset_id: Id, amount: u64) -> Id {
		let mut ledger = self.ledger.lock().await;
		ledger.nonce += 1;
		let id = Id::hash_of(&[b"genesis", &ledger.nonce.to_be_bytes(), owner.as_bytes()]);
		ledger.utxos.insert(
			id,
			Utxo {
				id,
				asset_id,
				owner: owner.clone(),
				amount,
			},
		);
		id
	}

	/// Makes the next `count` calls to `issue_tx` fail.
	pub async fn fail_next_issues(&self, count: usize) {
		self.ledger.lock().await.fail_next = count;
	}

	/// Transactions accepted so far, in order.
	pub async fn issued(&self) -> Vec<(Id, SignedSettlementTx)> {
		self.ledger.lock().await.issued.clone()
	}

	pub async fn height(&self) -> u64 {
		self.ledger.lock().await.blocks.len() as u64
	}
}

fn apply(ledger: &mut Ledger, tx_id: Id, signed: &SignedSettlementTx) -> Result<(), ChainError> {
	let tx = &signed.tx;
	match tx.kind {
		SettlementType::Mint => {
			if !tx.inputs.is_empty() || !tx.burns.is_empty() {
				return Err(ChainError::Rejected("mint cannot consume or burn".into()));
			}
		}
		SettlementType::Burn => {
			let mut available: HashMap<(Address, Id), u64> = HashMap::new();
			let mut unique = HashSet::new();
			for input in &tx.inputs {
				if !unique.insert(*input) {
					return Err(ChainError::Rejected(format!("input {} spent twice", input)));
				}
				let utxo = ledger
					.utxos
					.get(input)
					.ok_or_else(|| ChainError::Rejected(format!("unknown input {}", input)))?;
				*available
					.entry((utxo.owner.clone(), utxo.asset_id))
					.or_default() += utxo.amount;
			}

			let mut required: HashMap<(Address, Id), u64> = HashMap::new();
			for burn in &tx.burns {
				*required
					.entry((burn.owner.clone(), burn.asset_id))
					.or_default() += burn.amount;
			}
			for out in &tx.outputs {
				*required.entry((out.owner.clone(), out.asset_id)).or_default() += out.amount;
			}
			if available != required {
				return Err(ChainError::Rejected("inputs do not balance outputs".into()));
			}

			for input in &tx.inputs {
				ledger.utxos.remove(input);
			}
		}
	}

	for (index, out) in tx.outputs.iter().enumerate() {
		let id = Id::hash_of(&[&tx_id.0, &(index as u32).to_be_bytes()]);
		ledger.utxos.insert(
			id,
			Utxo {
				id,
				asset_id: out.asset_id,
				owner: out.owner.clone(),
				amount: out.amount,
			},
		);
	}
	Ok(())
}

#[async_trait]
impl SettlementChainClient for LocalSettlementChain {
	fn chain_id(&self) -> &ChainId {
		&self.chain_id
	}

	async fn get_balance(&self, address: &Address, asset_id: &Id) -> Result<u64, ChainError> {
		let ledger = self.ledger.lock().await;
		Ok(ledger
			.utxos
			.values()
			.filter(|u| &u.owner == address && &u.asset_id == asset_id)
			.map(|u| u.amount)
			.sum())
	}

	async fn get_utxos(&self, addresses: &[Address]) -> Result<Vec<Utxo>, ChainError> {
		let ledger = self.ledger.lock().await;
		let mut utxos: Vec<Utxo> = ledger
			.utxos
			.values()
			.filter(|u| addresses.contains(&u.owner))
			.cloned()
			.collect();
		utxos.sort_by_key(|u| u.id);
		Ok(utxos)
	}

	async fn issue_tx(&self, signed_tx: &[u8]) -> Result<Id, ChainError> {
		let signed = SignedSettlementTx::from_bytes(signed_tx)
			.map_err(|e| ChainError::Rejected(format!("malformed transaction: {}", e)))?;
		let tx_id = Id(keccak256(signed_tx));

		let mut ledger = self.ledger.lock().await;
		if ledger.fail_next > 0 {
			ledger.fail_next -= 1;
			warn!(chain = %self.chain_id, "Rejecting transaction {} by injected failure", tx_id);
			return Err(ChainError::Rejected("injected failure".into()));
		}
		if ledger.seen.contains(&tx_id) {
			return Err(ChainError::Rejected(format!("duplicate transaction {}", tx_id)));
		}
		if let Some(check) = &self.signature_check {
			if !check(&signed.tx.signing_hash(), &signed.signature) {
				return Err(ChainError::Rejected("invalid group signature".into()));
			}
		}

		apply(&mut ledger, tx_id, &signed)?;
		ledger.seen.insert(tx_id);
		ledger.blocks.push(signed_tx.to_vec());
		debug!(
			chain = %self.chain_id,
			height = ledger.blocks.len(),
			settlements = signed.tx.settlement_ids.len(),
			"Applied {} transaction", signed.tx.kind
		);
		ledger.issued.push((tx_id, signed));
		info!(chain = %self.chain_id, "Accepted transaction {}", tx_id);
		Ok(tx_id)
	}

	async fn get_block_by_height(&self, height: u64) -> Result<Vec<u8>, ChainError> {
		let ledger = self.ledger.lock().await;
		height
			.checked_sub(1)
			.and_then(|i| ledger.blocks.get(i as usize))
			.cloned()
			.ok_or_else(|| ChainError::NotFound(format!("block at height {}", height)))
	}
}
