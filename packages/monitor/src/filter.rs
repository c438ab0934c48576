//! Token Involvement Filtering
//!
//! Decides whether a transaction touches the monitored token contract.
//! Only involved transactions ever reach the trace fetcher.

use alloy::primitives::{address, Address};

use crate::decoder::{
    decode_transfer, extract_method_id, RawTransaction, TokenTransfer, TRANSFER_SELECTOR,
};

/// Mainnet PYUSD token contract
pub const PYUSD_ADDRESS: Address = address!("6c3ea9036406852006290770BEdFcAbA0e23A0e8");

/// Outcome of filtering a single transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// No sender: the transaction cannot be attributed and is dropped
    MissingSender,
    /// Nothing references the token
    Unrelated,
    /// The token is referenced by `to`, `from` or the calldata
    Involved(Involvement),
}

impl FilterDecision {
    pub fn is_involved(&self) -> bool {
        matches!(self, FilterDecision::Involved(_))
    }
}

/// How a transaction references the token
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Involvement {
    pub via_to: bool,
    pub via_from: bool,
    pub via_input: bool,
    /// Decoded `transfer(address,uint256)` call, when the calldata is one
    pub transfer: Option<TokenTransfer>,
}

/// Filter bound to one token contract
#[derive(Debug, Clone)]
pub struct TokenFilter {
    token: Address,
    /// Lower-case hex of the token address without `0x`
    needle: String,
}

impl TokenFilter {
    pub fn new(token: Address) -> Self {
        Self {
            token,
            needle: hex::encode(token.as_slice()),
        }
    }

    pub fn token(&self) -> Address {
        self.token
    }

    /// Classify a transaction
    ///
    /// # Arguments
    /// * `tx` - The transaction as received from the node
    ///
    /// # Returns
    /// `FilterDecision::Involved` with the matching criteria and, for transfer
    /// calldata, the decoded recipient and amount
    pub fn classify(&self, tx: &RawTransaction) -> FilterDecision {
        let Some(from) = tx.from else {
            return FilterDecision::MissingSender;
        };

        let via_to = tx.to == Some(self.token);
        let via_from = from == self.token;
        let via_input = tx
            .input
            .as_deref()
            .is_some_and(|input| input.to_lowercase().contains(&self.needle));

        if !(via_to || via_from || via_input) {
            return FilterDecision::Unrelated;
        }

        FilterDecision::Involved(Involvement {
            via_to,
            via_from,
            via_input,
            transfer: transfer_call(tx),
        })
    }

    /// Shorthand for `classify(tx).is_involved()`
    pub fn is_involved(&self, tx: &RawTransaction) -> bool {
        self.classify(tx).is_involved()
    }
}

impl Default for TokenFilter {
    fn default() -> Self {
        Self::new(PYUSD_ADDRESS)
    }
}

/// Decode transfer calldata; any failure means "not a decodable transfer"
fn transfer_call(tx: &RawTransaction) -> Option<TokenTransfer> {
    let input = tx.input_bytes()?;
    if extract_method_id(&input)? != TRANSFER_SELECTOR {
        return None;
    }
    decode_transfer(&input).ok()
}
