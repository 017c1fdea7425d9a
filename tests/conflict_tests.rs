//! Conflict sets built through the monitor, with the spent output resolved
//! from the indexer

mod common;

use bitcoin::consensus::deserialize;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address, CompressedPublicKey, Transaction};
use common::*;
use rbfwatch::indexer::{Indexer, TxRecord, TxStatus, VoutRecord};
use rbfwatch::{CandidateSpec, ConflictSet, Error, FeeSpec, Network, PrivateKey};

fn key(byte: u8) -> PrivateKey {
    PrivateKey::new(SecretKey::from_slice(&[byte; 32]).unwrap(), Network::Regtest)
}

fn wpkh(key: &PrivateKey) -> Address {
    let secp = Secp256k1::signing_only();
    Address::p2wpkh(&CompressedPublicKey::from_private_key(&secp, key).unwrap(), Network::Regtest)
}

/// Funding transaction paying 100,000 sat to the signer at vout 1
fn fund(indexer: &FakeIndexer, signer: &PrivateKey) {
    let to_signer = wpkh(signer);
    let record = TxRecord {
        txid: txid(7),
        vin: Vec::new(),
        vout: vec![
            VoutRecord { scriptpubkey: "6a".into(), scriptpubkey_address: None, value: 0 },
            VoutRecord {
                scriptpubkey: to_signer.script_pubkey().to_hex_string(),
                scriptpubkey_address: Some(to_signer.to_string()),
                value: 100_000,
            },
        ],
        weight: 561,
        fee: 200,
        status: TxStatus { confirmed: true, block_height: Some(90), block_time: None },
    };
    indexer.txs.lock().unwrap().insert(txid(7), record);
}

#[tokio::test]
async fn resolved_outpoint_yields_two_signed_conflicts() {
    let indexer = FakeIndexer::new(100);
    let signer = key(1);
    fund(&indexer, &signer);
    let monitor = monitor_with(test_config(), indexer, FakeFeed::new(0));

    let prev = monitor.resolve_outpoint(txid(7), 1, Network::Regtest).await.unwrap();
    assert_eq!(prev.value_sat, 100_000);
    assert_eq!(prev.address, wpkh(&signer).to_string());

    let specs = vec![
        CandidateSpec::new(wpkh(&key(2)).to_string(), FeeSpec::Rate { sat_per_vb: 15.0, flat_sat: 0 }).with_label("slow"),
        CandidateSpec::new(wpkh(&key(3)).to_string(), FeeSpec::Rate { sat_per_vb: 22.5, flat_sat: 0 })
            .replaceable()
            .with_label("fast"),
    ];
    let set = monitor.build_conflict_set(&prev, &signer, &specs).unwrap();

    assert_eq!(set.candidates.len(), 2);
    assert_eq!(set.candidates[0].output_value(), 97_750);
    assert_eq!(set.candidates[1].output_value(), 96_625);
    assert_eq!(set.candidates[0].label.as_deref(), Some("slow"));

    for candidate in &set.candidates {
        let tx: Transaction = deserialize(&hex::decode(&candidate.raw_hex).unwrap()).unwrap();
        assert_eq!(tx.compute_txid(), candidate.id);
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].previous_output, prev.outpoint());
        assert_eq!(tx.input[0].witness.len(), 2);
        assert_eq!(tx.output[0].value.to_sat(), candidate.output_value());
    }
    assert!(!set.candidates[0].transaction().unwrap().input[0].sequence.is_rbf());
    assert!(set.candidates[1].transaction().unwrap().input[0].sequence.is_rbf());
}

#[tokio::test]
async fn conflict_set_survives_json() {
    let indexer = FakeIndexer::new(100);
    let signer = key(1);
    fund(&indexer, &signer);
    let fees = indexer.recommended_fees().await.unwrap();
    let monitor = monitor_with(test_config(), indexer, FakeFeed::new(0));
    let prev = monitor.resolve_outpoint(txid(7), 1, Network::Regtest).await.unwrap();

    let specs: Vec<CandidateSpec> = serde_json::from_value(serde_json::json!([
        {"destination": wpkh(&key(2)).to_string(), "fee": {"kind": "flat", "sat": 1000}},
        {"destination": wpkh(&key(3)).to_string(), "fee": {"kind": "smart", "observed_sat_per_vb": fees.half_hour_fee}, "replaceable": true},
    ]))
    .unwrap();
    assert_eq!(specs[1].fee, FeeSpec::smart_from(&fees));

    let set = monitor.build_conflict_set(&prev, &signer, &specs).unwrap();
    // 15 sat/vB observed, scaled by 1.5 over a 150 vB estimate
    assert_eq!(set.candidates[1].fee_sat, 3_375);

    let json = serde_json::to_string(&set).unwrap();
    let back: ConflictSet = serde_json::from_str(&json).unwrap();
    assert_eq!(back.candidates.len(), 2);
    assert_eq!(back.candidates[0].id, set.candidates[0].id);
    assert_eq!(back.candidates[1].raw_hex, set.candidates[1].raw_hex);
    assert_eq!(back.shared_outpoints(), vec![prev.outpoint()]);
}

#[tokio::test]
async fn missing_output_is_rejected() {
    let indexer = FakeIndexer::new(100);
    fund(&indexer, &key(1));
    let monitor = monitor_with(test_config(), indexer, FakeFeed::new(0));

    let no_address = monitor.resolve_outpoint(txid(7), 0, Network::Regtest).await.unwrap_err();
    assert!(matches!(no_address, Error::Validation(_)));
    let out_of_range = monitor.resolve_outpoint(txid(7), 5, Network::Regtest).await.unwrap_err();
    assert!(matches!(out_of_range, Error::Validation(_)));
    let unknown = monitor.resolve_outpoint(txid(8), 0, Network::Regtest).await.unwrap_err();
    assert!(matches!(unknown, Error::Upstream(_)));
}
