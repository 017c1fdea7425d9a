//! Balance classifier - pure, no I/O

use bitcoin::OutPoint;
use serde::Serialize;
use std::collections::HashSet;

use super::{MempoolEntry, UnspentOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub min_confirmations_spendable: u32,
    pub min_confirmations_safe: u32,
}

impl Default for Thresholds {
    fn default() -> Self { Self { min_confirmations_spendable: 1, min_confirmations_safe: 6 } }
}

/// Derived view, never persisted. All amounts in sat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletBalance {
    /// Σ confirmed outputs (spendable + unspendable)
    pub confirmed: u64,
    /// Σ unconfirmed outputs + incoming mempool amounts not already visible as outputs
    pub pending: u64,
    pub spendable: u64,
    /// Confirmed but below the spendable threshold
    pub unspendable: u64,
    /// Confirmed at or above the safe threshold
    pub safe: u64,
    pub total: u64,
    pub utxo_count: usize,
    pub mempool_tx_count: usize,
}

/// Partition every output into exactly one of spendable / unspendable /
/// pending, then add mempool receive amounts whose outpoints the output set
/// does not already show.
pub fn classify(
    outputs: &[UnspentOutput],
    tip_height: Option<u32>,
    mempool: &[MempoolEntry],
    thresholds: Thresholds,
) -> WalletBalance {
    let mut b = WalletBalance { utxo_count: outputs.len(), mempool_tx_count: mempool.len(), ..Default::default() };

    let mut counted: HashSet<OutPoint> = HashSet::with_capacity(outputs.len());
    for output in outputs {
        if !counted.insert(output.outpoint()) {
            continue;
        }
        let confirmations = output.confirmations(tip_height);
        if output.is_confirmed {
            b.confirmed += output.value;
            if confirmations >= thresholds.min_confirmations_safe {
                b.safe += output.value;
            }
        }
        if confirmations >= thresholds.min_confirmations_spendable {
            b.spendable += output.value;
        } else if output.is_confirmed {
            b.unspendable += output.value;
        } else {
            b.pending += output.value;
        }
    }

    for entry in mempool {
        for &(vout, value) in &entry.receiving_outputs {
            if counted.insert(OutPoint { txid: entry.txid, vout }) {
                b.pending += value;
            }
        }
    }

    b.total = b.spendable + b.unspendable + b.pending;
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Txid;
    use chrono::Utc;
    use std::str::FromStr;

    fn txid(n: u8) -> Txid {
        Txid::from_str(&format!("{:02x}", n).repeat(32)).unwrap()
    }

    fn confirmed(n: u8, vout: u32, value: u64, height: u32) -> UnspentOutput {
        UnspentOutput {
            txid: txid(n),
            vout,
            value,
            confirmation_height: Some(height),
            confirmation_time: None,
            is_confirmed: true,
        }
    }

    fn unconfirmed(n: u8, vout: u32, value: u64) -> UnspentOutput {
        UnspentOutput { txid: txid(n), vout, value, confirmation_height: None, confirmation_time: None, is_confirmed: false }
    }

    fn incoming(n: u8, outputs: Vec<(u32, u64)>) -> MempoolEntry {
        MempoolEntry {
            txid: txid(n),
            fee: 200,
            virtual_size: 140,
            is_replaceable: true,
            observed_at: Utc::now(),
            receive_amount: outputs.iter().map(|(_, v)| v).sum(),
            receiving_outputs: outputs,
        }
    }

    #[test]
    fn confirmed_plus_incoming_mempool() {
        // 50,000 sat with 3 confirmations, 20,000 sat arriving in the mempool
        let outputs = vec![confirmed(1, 0, 50_000, 98)];
        let mempool = vec![incoming(2, vec![(0, 20_000)])];
        let b = classify(&outputs, Some(100), &mempool, Thresholds::default());

        assert_eq!(b.spendable, 50_000);
        assert_eq!(b.pending, 20_000);
        assert_eq!(b.total, 70_000);
        assert_eq!(b.unspendable, 0);
        assert_eq!(b.safe, 0);
        assert_eq!(b.utxo_count, 1);
        assert_eq!(b.mempool_tx_count, 1);
    }

    #[test]
    fn mempool_output_already_in_utxo_set_counts_once() {
        let outputs = vec![unconfirmed(7, 1, 30_000)];
        let mempool = vec![incoming(7, vec![(1, 30_000), (2, 5_000)])];
        let b = classify(&outputs, Some(100), &mempool, Thresholds::default());
        assert_eq!(b.pending, 35_000);
        assert_eq!(b.total, 35_000);
    }

    #[test]
    fn below_threshold_is_unspendable() {
        let thresholds = Thresholds { min_confirmations_spendable: 3, min_confirmations_safe: 6 };
        let outputs = vec![confirmed(1, 0, 10_000, 100), confirmed(2, 0, 20_000, 90), unconfirmed(3, 0, 5_000)];
        let b = classify(&outputs, Some(100), &[], thresholds);
        assert_eq!(b.unspendable, 10_000);
        assert_eq!(b.spendable, 20_000);
        assert_eq!(b.safe, 20_000);
        assert_eq!(b.pending, 5_000);
        assert_eq!(b.confirmed, 30_000);
        assert_eq!(b.total, 35_000);
    }

    #[test]
    fn zero_threshold_makes_unconfirmed_spendable() {
        let thresholds = Thresholds { min_confirmations_spendable: 0, min_confirmations_safe: 6 };
        let b = classify(&[unconfirmed(3, 0, 5_000)], Some(100), &[], thresholds);
        assert_eq!(b.spendable, 5_000);
        assert_eq!(b.pending, 0);
    }

    #[test]
    fn buckets_partition_every_output_once() {
        // Deterministic pseudo-random output sets across thresholds
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        for round in 0..200u32 {
            let n = (next() % 12) as usize;
            let tip = 1_000 + (next() % 10) as u32;
            let outputs: Vec<UnspentOutput> = (0..n)
                .map(|i| {
                    let value = 1 + next() % 1_000_000;
                    if next() % 3 == 0 {
                        unconfirmed(i as u8, round, value)
                    } else {
                        confirmed(i as u8, round, value, tip - (next() % 8) as u32)
                    }
                })
                .collect();
            let thresholds = Thresholds { min_confirmations_spendable: (next() % 4) as u32, min_confirmations_safe: 6 };
            let b = classify(&outputs, Some(tip), &[], thresholds);
            let sum: u64 = outputs.iter().map(|o| o.value).sum();
            assert_eq!(b.spendable + b.unspendable + b.pending, sum);
            assert_eq!(b.total, sum);
            assert!(b.safe <= b.confirmed);
        }
    }

    #[test]
    fn duplicate_outpoints_are_ignored() {
        let o = confirmed(1, 0, 10_000, 99);
        let b = classify(&[o.clone(), o], Some(100), &[], Thresholds::default());
        assert_eq!(b.spendable, 10_000);
    }
}
