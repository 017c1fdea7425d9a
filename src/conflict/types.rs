use bitcoin::consensus::deserialize;
use bitcoin::{Network, OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::indexer::Indexer;

/// The unspent output every candidate spends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutpointDescriptor {
    pub txid: Txid,
    pub vout: u32,
    pub value_sat: u64,
    /// Address of the previous output's script
    pub address: String,
    pub network: Network,
}

impl OutpointDescriptor {
    pub fn outpoint(&self) -> OutPoint { OutPoint { txid: self.txid, vout: self.vout } }

    /// Look up value and script address from the indexer's transaction detail
    pub async fn resolve(indexer: &dyn Indexer, txid: Txid, vout: u32, network: Network) -> Result<Self> {
        let tx = indexer.transaction(&txid).await?;
        let out = tx
            .vout
            .get(vout as usize)
            .ok_or_else(|| Error::validation(format!("{}:{} does not exist", txid, vout)))?;
        let address = out
            .scriptpubkey_address
            .clone()
            .ok_or_else(|| Error::validation(format!("{}:{} has no address form", txid, vout)))?;
        Ok(Self { txid, vout, value_sat: out.value, address, network })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeSpec {
    Flat { sat: u64 },
    /// `max(flat_sat, size_estimate × sat_per_vb)`
    Rate {
        sat_per_vb: f64,
        #[serde(default)]
        flat_sat: u64,
    },
    /// Observed network rate, scaled by the configured multiplier and capped
    Smart { observed_sat_per_vb: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub destination: String,
    pub fee: FeeSpec,
    #[serde(default)]
    pub replaceable: bool,
    /// Explicit nSequence; must agree with `replaceable`
    #[serde(default)]
    pub sequence: Option<u32>,
    #[serde(default)]
    pub label: Option<String>,
}

impl CandidateSpec {
    pub fn new(destination: impl Into<String>, fee: FeeSpec) -> Self {
        Self { destination: destination.into(), fee, replaceable: false, sequence: None, label: None }
    }

    pub fn replaceable(mut self) -> Self {
        self.replaceable = true;
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInput {
    pub outpoint: OutPoint,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOutput {
    pub script_hex: String,
    pub value_sat: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateTransaction {
    pub id: Txid,
    pub label: Option<String>,
    pub destination: String,
    pub inputs: Vec<CandidateInput>,
    pub outputs: Vec<CandidateOutput>,
    pub fee_sat: u64,
    pub replaceable: bool,
    pub estimated_vsize: u64,
    pub vsize: u64,
    /// Signed, consensus-serialized transaction
    pub raw_hex: String,
    pub conflicts_with: Vec<Txid>,
}

impl CandidateTransaction {
    pub fn transaction(&self) -> Result<Transaction> {
        let bytes = hex::decode(&self.raw_hex).map_err(|e| Error::validation(format!("raw hex: {}", e)))?;
        deserialize(&bytes).map_err(|e| Error::validation(format!("raw transaction: {}", e)))
    }

    pub fn output_value(&self) -> u64 { self.outputs.iter().map(|o| o.value_sat).sum() }

    /// Actual fee rate of the signed transaction
    pub fn fee_rate(&self) -> f64 {
        if self.vsize == 0 { 0.0 } else { self.fee_sat as f64 / self.vsize as f64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub index: usize,
    pub destination: String,
    pub reason: String,
}

/// Mutually exclusive spends of one outpoint. At most one can ever confirm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictSet {
    pub network: Network,
    pub outpoint: OutPoint,
    pub input_value_sat: u64,
    pub candidates: Vec<CandidateTransaction>,
    pub rejected: Vec<RejectedCandidate>,
}

impl ConflictSet {
    pub fn candidate(&self, id: &Txid) -> Option<&CandidateTransaction> {
        self.candidates.iter().find(|c| &c.id == id)
    }

    /// Outpoints spent by every candidate
    pub fn shared_outpoints(&self) -> Vec<OutPoint> {
        let Some(first) = self.candidates.first() else {
            return vec![];
        };
        first
            .inputs
            .iter()
            .map(|i| i.outpoint)
            .filter(|op| self.candidates.iter().all(|c| c.inputs.iter().any(|i| &i.outpoint == op)))
            .collect()
    }

    /// Candidates that become invalid once `id` confirms
    pub fn invalidated_by(&self, id: &Txid) -> Vec<Txid> {
        self.candidate(id).map(|c| c.conflicts_with.clone()).unwrap_or_default()
    }
}
