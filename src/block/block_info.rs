//! `BlockInfo`: the per-block record owned exclusively by C1
//! (`BlocksMap`), and the UnderConstruction state machine.

use std::collections::BTreeSet;

use crate::ids::{BlockId, GenStamp, NodeId, ReplicaState, StorageId};

/// Lifecycle state of one block:
/// `UnderConstruction -> Committed -> Complete`, with a side branch
/// `UnderConstruction -> UnderRecovery -> UnderConstruction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockUcState {
	Complete,
	Committed,
	UnderConstruction(UnderConstructionState),
	UnderRecovery(UnderConstructionState),
}

impl BlockUcState {
	pub fn is_complete(&self) -> bool {
		matches!(self, BlockUcState::Complete)
	}

	pub fn is_under_construction(&self) -> bool {
		matches!(
			self,
			BlockUcState::UnderConstruction(_) | BlockUcState::UnderRecovery(_)
		)
	}
}

/// State carried only while a block's write pipeline is open: the
/// expected replica locations for the active pipeline, a recovery id,
/// and per-replica reported state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnderConstructionState {
	pub expected_locations: Vec<StorageId>,
	pub recovery_id: u64,
	pub reported: Vec<(StorageId, ReplicaState)>,
}

impl UnderConstructionState {
	pub fn new(expected_locations: Vec<StorageId>) -> Self {
		Self {
			expected_locations,
			recovery_id: 0,
			reported: Vec::new(),
		}
	}

	/// Attach a reported replica to the pipeline's expected-replica
	/// list (the "toUC"/"RECEIVING" transitions).
	pub fn attach_reported(&mut self, storage: StorageId, state: ReplicaState) {
		if let Some(slot) = self.reported.iter_mut().find(|(s, _)| *s == storage) {
			slot.1 = state;
		} else {
			self.reported.push((storage, state));
		}
		if !self.expected_locations.contains(&storage) {
			self.expected_locations.push(storage);
		}
	}
}

/// A block record, owned by C1, linking its owning `BlockCollection`
/// (by id, since the real file handle lives in the out-of-scope
/// namespace tree) and an ordered list of storage references that
/// currently claim a replica.
#[derive(Debug, Clone)]
pub struct BlockInfo {
	pub id: BlockId,
	pub generation_stamp: GenStamp,
	pub len: u64,
	pub owner_file: Option<u64>,
	pub state: BlockUcState,
	/// Storages currently holding (or claiming to hold) a replica of
	/// this block. Kept as an ordered set so that enumeration order is
	/// stable, which matters for deterministic-looking tests even
	/// though source/victim selection itself is randomized elsewhere.
	storages: BTreeSet<StorageId>,
}

impl BlockInfo {
	pub fn new_under_construction(
		id: BlockId,
		owner_file: u64,
		generation_stamp: GenStamp,
		expected_locations: Vec<StorageId>,
	) -> Self {
		BlockInfo {
			id,
			generation_stamp,
			len: 0,
			owner_file: Some(owner_file),
			state: BlockUcState::UnderConstruction(UnderConstructionState::new(expected_locations)),
			storages: BTreeSet::new(),
		}
	}

	pub fn new_complete(
		id: BlockId,
		owner_file: Option<u64>,
		generation_stamp: GenStamp,
		len: u64,
		storages: impl IntoIterator<Item = StorageId>,
	) -> Self {
		BlockInfo {
			id,
			generation_stamp,
			len,
			owner_file,
			state: BlockUcState::Complete,
			storages: storages.into_iter().collect(),
		}
	}

	pub fn storages(&self) -> impl Iterator<Item = StorageId> + '_ {
		self.storages.iter().copied()
	}

	pub fn storage_count(&self) -> usize {
		self.storages.len()
	}

	pub fn has_storage(&self, s: StorageId) -> bool {
		self.storages.contains(&s)
	}

	pub fn add_storage(&mut self, s: StorageId) -> bool {
		self.storages.insert(s)
	}

	pub fn remove_storage(&mut self, s: StorageId) -> bool {
		self.storages.remove(&s)
	}

	pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.storages.iter().map(|s| s.node())
	}

	/// `Committed -> Complete`: at least `min_replication` live
	/// replicas observed, or forced.
	pub fn complete(&mut self, forced: bool, live: usize, min_replication: u16) -> bool {
		if !matches!(self.state, BlockUcState::Committed) {
			return false;
		}
		if forced || live >= min_replication as usize {
			self.state = BlockUcState::Complete;
			true
		} else {
			false
		}
	}

	/// Client "commit last block": set state to `Committed` with the
	/// client-reported length and generation stamp. The reported length
	/// must not be shorter than what's already stored.
	pub fn commit(&mut self, len: u64, generation_stamp: GenStamp) -> Result<(), &'static str> {
		match &self.state {
			BlockUcState::Complete => Err("block already complete"),
			_ if len < self.len => Err("commit length is shorter than stored length"),
			_ => {
				self.len = len;
				self.generation_stamp = generation_stamp;
				self.state = BlockUcState::Committed;
				Ok(())
			}
		}
	}

	/// `* -> UnderRecovery`: pipeline recovery initiated.
	pub fn start_recovery(&mut self, recovery_id: u64) -> Result<(), &'static str> {
		let uc = match std::mem::replace(&mut self.state, BlockUcState::Complete) {
			BlockUcState::UnderConstruction(mut uc) | BlockUcState::UnderRecovery(mut uc) => {
				uc.recovery_id = recovery_id;
				uc
			}
			other @ BlockUcState::Complete | other @ BlockUcState::Committed => {
				self.state = other;
				return Err("cannot recover a block that was never under construction");
			}
		};
		self.state = BlockUcState::UnderRecovery(uc);
		Ok(())
	}

	/// `UnderRecovery -> UnderConstruction`.
	pub fn finish_recovery(&mut self) -> Result<(), &'static str> {
		match std::mem::replace(&mut self.state, BlockUcState::Complete) {
			BlockUcState::UnderRecovery(uc) => {
				self.state = BlockUcState::UnderConstruction(uc);
				Ok(())
			}
			other => {
				self.state = other;
				Err("block is not under recovery")
			}
		}
	}

	/// Reopen a `Complete` block for append via the explicit
	/// `convertLastBlockToUnderConstruction` path. This is the *only*
	/// way a `Complete` block may become `UnderConstruction` again.
	pub fn reopen_for_append(&mut self, expected_locations: Vec<StorageId>) -> Result<(), &'static str> {
		if !matches!(self.state, BlockUcState::Complete) {
			return Err("reopen_for_append requires a Complete block");
		}
		self.state = BlockUcState::UnderConstruction(UnderConstructionState::new(expected_locations));
		Ok(())
	}

	pub fn uc_state_mut(&mut self) -> Option<&mut UnderConstructionState> {
		match &mut self.state {
			BlockUcState::UnderConstruction(uc) | BlockUcState::UnderRecovery(uc) => Some(uc),
			_ => None,
		}
	}

	pub fn uc_state(&self) -> Option<&UnderConstructionState> {
		match &self.state {
			BlockUcState::UnderConstruction(uc) | BlockUcState::UnderRecovery(uc) => Some(uc),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn blk(id: u64) -> BlockInfo {
		BlockInfo::new_under_construction(BlockId(id), 1, GenStamp(1), vec![])
	}

	#[test]
	fn commit_then_complete_requires_min_replicas() {
		let mut b = blk(1);
		b.commit(100, GenStamp(2)).unwrap();
		assert!(!b.complete(false, 1, 3));
		assert!(b.complete(false, 3, 3));
		assert!(b.state.is_complete());
	}

	#[test]
	fn commit_rejects_a_shorter_length() {
		let mut b = blk(1);
		b.commit(100, GenStamp(2)).unwrap();
		assert!(b.commit(50, GenStamp(3)).is_err());
		assert_eq!(b.len, 100);
	}

	#[test]
	fn commit_twice_is_rejected_once_complete() {
		let mut b = blk(1);
		b.commit(100, GenStamp(2)).unwrap();
		b.complete(true, 0, 1);
		assert!(b.commit(200, GenStamp(3)).is_err());
	}

	#[test]
	fn recovery_round_trips() {
		let mut b = blk(1);
		b.start_recovery(7).unwrap();
		assert!(matches!(b.state, BlockUcState::UnderRecovery(_)));
		b.finish_recovery().unwrap();
		assert!(matches!(b.state, BlockUcState::UnderConstruction(_)));
	}

	#[test]
	fn reopen_for_append_only_from_complete() {
		let mut b = blk(1);
		assert!(b.reopen_for_append(vec![]).is_err());
		b.commit(10, GenStamp(2)).unwrap();
		b.complete(true, 0, 1);
		assert!(b.reopen_for_append(vec![]).is_ok());
		assert!(b.state.is_under_construction());
	}
}
