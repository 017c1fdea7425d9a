//! Indexer wire types (Esplora / mempool.space JSON)

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

/// Confirmation status attached to utxos and transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
}

/// `GET /address/:addr/utxo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    #[serde(default)]
    pub status: TxStatus,
}

impl UtxoRecord {
    pub fn confirmed(txid: Txid, vout: u32, value: u64, height: u32) -> Self {
        Self { txid, vout, value, status: TxStatus { confirmed: true, block_height: Some(height), block_time: None } }
    }

    pub fn unconfirmed(txid: Txid, vout: u32, value: u64) -> Self {
        Self { txid, vout, value, status: TxStatus::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoutRecord {
    pub scriptpubkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VinRecord {
    pub txid: Txid,
    pub vout: u32,
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout: Option<VoutRecord>,
}

/// `GET /tx/:txid` and the elements of `/address/:addr/txs/mempool`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub txid: Txid,
    #[serde(default)]
    pub vin: Vec<VinRecord>,
    #[serde(default)]
    pub vout: Vec<VoutRecord>,
    pub weight: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub status: TxStatus,
}

impl TxRecord {
    pub fn vsize(&self) -> u64 { self.weight.div_ceil(4) }

    /// BIP125: any input with a sequence below 0xFFFFFFFE opts in.
    pub fn signals_rbf(&self) -> bool {
        self.vin.iter().any(|i| i.sequence < 0xFFFF_FFFE)
    }
}

/// Unconfirmed transaction touching a monitored address, normalized from
/// whatever the indexer returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolTx {
    pub txid: Txid,
    pub fee: u64,
    pub vsize: u64,
    /// `None` when the indexer does not report it
    pub replaceable: Option<bool>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub vout: u32,
    pub address: Option<String>,
    pub value: u64,
}

impl From<TxRecord> for MempoolTx {
    fn from(tx: TxRecord) -> Self {
        let replaceable = if tx.vin.is_empty() { None } else { Some(tx.signals_rbf()) };
        Self {
            txid: tx.txid,
            fee: tx.fee,
            vsize: tx.vsize(),
            replaceable,
            outputs: tx
                .vout
                .into_iter()
                .enumerate()
                .map(|(i, o)| TxOutput { vout: i as u32, address: o.scriptpubkey_address, value: o.value })
                .collect(),
        }
    }
}

/// `GET /v1/fees/recommended` (sat/vB)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: f64,
    pub half_hour_fee: f64,
    pub hour_fee: f64,
    #[serde(default)]
    pub economy_fee: f64,
    #[serde(default)]
    pub minimum_fee: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX_JSON: &str = r#"{
        "txid": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        "version": 2,
        "locktime": 0,
        "vin": [{"txid": "0e3e2357e806b6cdb1f70b54c3a3a17b6714ee1f0e68bebb44a74b1efd512098", "vout": 1, "sequence": 4294967293,
                 "prevout": {"scriptpubkey": "0014", "scriptpubkey_address": "bc1qsender", "value": 60000}}],
        "vout": [
            {"scriptpubkey": "0014aa", "scriptpubkey_address": "bc1qwatched", "value": 20000},
            {"scriptpubkey": "0014bb", "scriptpubkey_address": "bc1qchange", "value": 39000},
            {"scriptpubkey": "6a", "value": 0}
        ],
        "size": 250,
        "weight": 561,
        "fee": 1000,
        "status": {"confirmed": false}
    }"#;

    #[test]
    fn mempool_tx_from_esplora_record() {
        let record: TxRecord = serde_json::from_str(TX_JSON).expect("parse");
        assert_eq!(record.vsize(), 141);
        assert!(record.signals_rbf());

        let tx = MempoolTx::from(record);
        assert_eq!(tx.fee, 1000);
        assert_eq!(tx.replaceable, Some(true));
        assert_eq!(tx.outputs.len(), 3);
        assert_eq!(tx.outputs[1].vout, 1);
        assert_eq!(tx.outputs[1].address.as_deref(), Some("bc1qchange"));
        assert_eq!(tx.outputs[2].address, None);
    }

    #[test]
    fn utxo_record_status_defaults() {
        let json = r#"{"txid": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b", "vout": 0, "value": 5000,
                       "status": {"confirmed": true, "block_height": 800000, "block_time": 1690000000}}"#;
        let utxo: UtxoRecord = serde_json::from_str(json).expect("parse");
        assert!(utxo.status.confirmed);
        assert_eq!(utxo.status.block_height, Some(800_000));
    }

    #[test]
    fn recommended_fees_camel_case() {
        let fees: RecommendedFees =
            serde_json::from_str(r#"{"fastestFee": 21, "halfHourFee": 15, "hourFee": 9, "economyFee": 4, "minimumFee": 1}"#)
                .expect("parse");
        assert_eq!(fees.half_hour_fee, 15.0);
    }
}
