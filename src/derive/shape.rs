//! Shape normalization for election records
//!
//! Older runtimes store seat holders and candidates as `[account, balance]`
//! tuples; newer ones use structured records. Decoding picks the variant
//! (arrays are tuples, objects are records) and the helpers here collapse
//! both into the canonical `(AccountId, Balance)` pair.

use serde::{Deserialize, Serialize};

use crate::chain::{AccountId, Balance};

/// Structured seat holder record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatHolder {
    pub who: AccountId,
    pub stake: Balance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit: Option<Balance>,
}

/// Member or runner-up entry in either storage shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Member {
    Tuple(AccountId, Balance),
    SeatHolder(SeatHolder),
}

impl Member {
    pub fn into_account_tuple(self) -> (AccountId, Balance) {
        match self {
            Member::Tuple(who, stake) => (who, stake),
            Member::SeatHolder(SeatHolder { who, stake, .. }) => (who, stake),
        }
    }
}

/// Candidate entry: a bare account, or an `[account, deposit]` tuple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Candidate {
    Tuple(AccountId, Balance),
    Account(AccountId),
}

impl Candidate {
    pub fn into_account(self) -> AccountId {
        match self {
            Candidate::Tuple(who, _) => who,
            Candidate::Account(who) => who,
        }
    }
}

/// Sort by descending stake. Stable, so equal stakes keep their input order.
pub fn sort_by_stake(accounts: &mut [(AccountId, Balance)]) {
    accounts.sort_by(|(_, a), (_, b)| b.cmp(a));
}

/// Normalize and sort a member list
pub fn seat_holders(members: Vec<Member>) -> Vec<(AccountId, Balance)> {
    let mut accounts: Vec<_> = members.into_iter().map(Member::into_account_tuple).collect();
    sort_by_stake(&mut accounts);
    accounts
}
