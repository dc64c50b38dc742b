//! Partially signed transactions (BIP 174), reduced to the key-path
//! Taproot subset this wallet constructs. The container only ever lives
//! in memory between assembly and finalization; interchange with external
//! signers is out of scope.

use super::transaction::{Transaction, TxOut};
use crate::{Result, WalletError};

/// Input-specific PSBT data
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PsbtInput {
    /// The output this input spends, script verbatim.
    pub witness_utxo: Option<TxOut>,
    /// X-only internal key for the taproot key-path spend.
    pub tap_internal_key: Option<[u8; 32]>,
    /// Final witness stack once the input is signed.
    pub final_script_witness: Option<Vec<Vec<u8>>>,
}

/// Partially Signed Bitcoin Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartiallySignedTransaction {
    pub unsigned_tx: Transaction,
    pub inputs: Vec<PsbtInput>,
}

impl PartiallySignedTransaction {
    /// Create a new PSBT from an unsigned transaction
    pub fn new(unsigned_tx: Transaction) -> Result<Self> {
        for input in &unsigned_tx.input {
            if !input.script_sig.is_empty() || !input.witness.is_empty() {
                return Err(WalletError::InvalidInput(
                    "Unsigned transaction must have empty scriptSigs and witnesses".to_string(),
                ));
            }
        }
        let inputs = vec![PsbtInput::default(); unsigned_tx.input.len()];
        Ok(PartiallySignedTransaction {
            unsigned_tx,
            inputs,
        })
    }

    /// Attach the spent output and internal key to an input.
    pub fn set_input_utxo(
        &mut self,
        input_index: usize,
        witness_utxo: TxOut,
        tap_internal_key: [u8; 32],
    ) -> Result<()> {
        let input = self
            .inputs
            .get_mut(input_index)
            .ok_or_else(|| WalletError::InvalidInput("Input index out of bounds".to_string()))?;
        input.witness_utxo = Some(witness_utxo);
        input.tap_internal_key = Some(tap_internal_key);
        Ok(())
    }

    /// The outputs being spent, in input order. Fails if any input is
    /// missing its witness_utxo.
    pub fn spent_outputs(&self) -> Result<Vec<TxOut>> {
        self.inputs
            .iter()
            .map(|input| {
                input.witness_utxo.clone().ok_or_else(|| {
                    WalletError::InvalidInput("Input missing witness_utxo".to_string())
                })
            })
            .collect()
    }

    /// Finalize an input with its witness stack.
    pub fn finalize_input(&mut self, input_index: usize, witness: Vec<Vec<u8>>) -> Result<()> {
        let input = self
            .inputs
            .get_mut(input_index)
            .ok_or_else(|| WalletError::InvalidInput("Input index out of bounds".to_string()))?;
        input.final_script_witness = Some(witness);
        Ok(())
    }

    /// Check if the PSBT is complete (all inputs have final witnesses)
    pub fn is_complete(&self) -> bool {
        self.inputs
            .iter()
            .all(|input| input.final_script_witness.is_some())
    }

    /// Extract the final transaction if the PSBT is complete
    pub fn extract_tx(self) -> Result<Transaction> {
        if !self.is_complete() {
            return Err(WalletError::InvalidInput(
                "PSBT is not complete".to_string(),
            ));
        }

        let mut tx = self.unsigned_tx;
        for (i, input) in self.inputs.into_iter().enumerate() {
            if let Some(witness) = input.final_script_witness {
                tx.input[i].witness = witness;
            }
        }
        Ok(tx)
    }
}
