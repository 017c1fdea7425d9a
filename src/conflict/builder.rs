//! Conflicting transaction builder
//!
//! Produces N signed transactions that all spend the same outpoint, so at
//! most one can ever confirm. Nothing here touches the network.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::ecdsa::Signature as EcdsaSignature;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Message, Secp256k1, SignOnly};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, NetworkKind, PrivateKey, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use tracing::{debug, info, warn};

use super::fee::resolve_fee;
use super::{
    CandidateInput, CandidateOutput, CandidateSpec, CandidateTransaction, ConflictSet, OutpointDescriptor,
    RejectedCandidate,
};
use crate::error::{Error, Result};
use crate::monitor::ConflictConfig;
use crate::wallet::parse_address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpendKind {
    P2wpkh,
    P2pkh,
}

/// One validated candidate, ready to sign
struct Plan {
    index: usize,
    label: Option<String>,
    destination: String,
    script: ScriptBuf,
    fee: u64,
    value: u64,
    sequence: Sequence,
    replaceable: bool,
}

pub fn build_conflict_set(
    policy: &ConflictConfig,
    prev: &OutpointDescriptor,
    key: &PrivateKey,
    specs: &[CandidateSpec],
) -> Result<ConflictSet> {
    if specs.len() < 2 {
        return Err(Error::Usage(format!("{} candidate spec(s) given, a conflict needs at least two", specs.len())));
    }

    let prev_script = parse_address(&prev.address, prev.network)?.script_pubkey();
    if key.network != NetworkKind::from(prev.network) {
        return Err(Error::validation(format!("signing key is not a {} key", prev.network)));
    }
    let kind = spend_kind(&Secp256k1::signing_only(), key, &prev_script)?;

    let mut plans: Vec<Plan> = Vec::with_capacity(specs.len());
    let mut rejected = Vec::new();
    let mut first_shortfall: Option<Error> = None;

    for (index, spec) in specs.iter().enumerate() {
        let script = parse_address(&spec.destination, prev.network)?.script_pubkey();
        let fee = resolve_fee(&spec.fee, policy)?;
        let sequence = resolve_sequence(spec)?;

        if plans.iter().any(|p| p.script == script && p.fee == fee && p.sequence == sequence) {
            debug!(index, "duplicate_candidate_collapsed");
            continue;
        }

        let value = match output_value(prev.value_sat, fee, &script) {
            Ok(value) => value,
            Err(e) => {
                warn!(index, destination = %spec.destination, error = %e, "candidate_rejected");
                rejected.push(RejectedCandidate { index, destination: spec.destination.clone(), reason: e.to_string() });
                first_shortfall.get_or_insert(e);
                continue;
            }
        };

        plans.push(Plan {
            index,
            label: spec.label.clone(),
            destination: spec.destination.clone(),
            script,
            fee,
            value,
            sequence,
            replaceable: sequence.is_rbf(),
        });
    }

    if plans.len() < 2 {
        return Err(first_shortfall.unwrap_or_else(|| {
            Error::Usage(format!("{} distinct candidate(s) after collapsing duplicates", plans.len()))
        }));
    }

    let mut candidates = plans
        .iter()
        .map(|plan| CandidateBuilder::new().build(policy, prev, &prev_script, kind, plan, key))
        .collect::<Result<Vec<_>>>()?;

    let ids: Vec<Txid> = candidates.iter().map(|c| c.id).collect();
    for candidate in candidates.iter_mut() {
        candidate.conflicts_with = ids.iter().copied().filter(|id| *id != candidate.id).collect();
    }

    info!(
        outpoint = %prev.outpoint(),
        candidates = candidates.len(),
        rejected = rejected.len(),
        "conflict_set_built"
    );

    Ok(ConflictSet {
        network: prev.network,
        outpoint: prev.outpoint(),
        input_value_sat: prev.value_sat,
        candidates,
        rejected,
    })
}

/// Which of the key's scripts locks the previous output
fn spend_kind(secp: &Secp256k1<SignOnly>, key: &PrivateKey, script: &Script) -> Result<SpendKind> {
    if let Ok(compressed) = CompressedPublicKey::from_private_key(secp, key) {
        if script == ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash()).as_script() {
            return Ok(SpendKind::P2wpkh);
        }
    }
    if script == ScriptBuf::new_p2pkh(&key.public_key(secp).pubkey_hash()).as_script() {
        return Ok(SpendKind::P2pkh);
    }
    Err(Error::validation("signing key does not control the previous output script"))
}

/// 0xFFFFFFFF when final, 0xFFFFFFFD when replaceable. A final candidate
/// only takes 0xFFFFFFFF. A replaceable override must signal RBF and keep
/// the relative lock-time disable flag set, or BIP68 would hold the spend.
fn resolve_sequence(spec: &CandidateSpec) -> Result<Sequence> {
    match (spec.sequence.map(Sequence), spec.replaceable) {
        (None, true) => Ok(Sequence::ENABLE_RBF_NO_LOCKTIME),
        (None, false) => Ok(Sequence::MAX),
        (Some(sequence), false) if sequence == Sequence::MAX => Ok(sequence),
        (Some(sequence), true) if sequence.is_rbf() && !sequence.is_relative_lock_time() => Ok(sequence),
        (Some(sequence), replaceable) => Err(Error::validation(format!(
            "sequence {:#010x} contradicts replaceable={}",
            sequence.0, replaceable
        ))),
    }
}

fn output_value(input_sat: u64, fee_sat: u64, script: &Script) -> Result<u64> {
    if fee_sat >= input_sat {
        return Err(Error::InsufficientFunds { input_sat, fee_sat, reason: "fee consumes the whole input".into() });
    }
    let value = input_sat - fee_sat;
    let dust = script.minimal_non_dust().to_sat();
    if value < dust {
        return Err(Error::InsufficientFunds {
            input_sat,
            fee_sat,
            reason: format!("output {} sat is below the {} sat dust limit", value, dust),
        });
    }
    Ok(value)
}

/// Signs exactly one candidate with its own context
struct CandidateBuilder {
    secp: Secp256k1<SignOnly>,
}

impl CandidateBuilder {
    fn new() -> Self { Self { secp: Secp256k1::signing_only() } }

    fn build(
        &self,
        policy: &ConflictConfig,
        prev: &OutpointDescriptor,
        prev_script: &Script,
        kind: SpendKind,
        plan: &Plan,
        key: &PrivateKey,
    ) -> Result<CandidateTransaction> {
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: prev.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: plan.sequence,
                witness: Witness::default(),
            }],
            output: vec![TxOut { value: Amount::from_sat(plan.value), script_pubkey: plan.script.clone() }],
        };

        match kind {
            SpendKind::P2wpkh => {
                let sighash = SighashCache::new(&tx)
                    .p2wpkh_signature_hash(0, prev_script, Amount::from_sat(prev.value_sat), EcdsaSighashType::All)
                    .map_err(|e| Error::Signing(e.to_string()))?;
                let signature = self.sign_digest(sighash.to_byte_array(), key);
                let compressed = CompressedPublicKey::from_private_key(&self.secp, key)
                    .map_err(|e| Error::Signing(e.to_string()))?;
                tx.input[0].witness = Witness::p2wpkh(&signature, &compressed.0);
            }
            SpendKind::P2pkh => {
                let sighash = SighashCache::new(&tx)
                    .legacy_signature_hash(0, prev_script, EcdsaSighashType::All.to_u32())
                    .map_err(|e| Error::Signing(e.to_string()))?;
                let signature = self.sign_digest(sighash.to_byte_array(), key);
                let push = PushBytesBuf::try_from(signature.to_vec()).map_err(|e| Error::Signing(e.to_string()))?;
                tx.input[0].script_sig =
                    ScriptBuf::builder().push_slice(push).push_key(&key.public_key(&self.secp)).into_script();
            }
        }

        let id = tx.compute_txid();
        debug!(index = plan.index, txid = %id, fee = plan.fee, sequence = plan.sequence.0, "candidate_signed");

        Ok(CandidateTransaction {
            id,
            label: plan.label.clone(),
            destination: plan.destination.clone(),
            inputs: vec![CandidateInput { outpoint: prev.outpoint(), sequence: plan.sequence.0 }],
            outputs: vec![CandidateOutput { script_hex: hex::encode(plan.script.as_bytes()), value_sat: plan.value }],
            fee_sat: plan.fee,
            replaceable: plan.replaceable,
            estimated_vsize: policy.size_estimate_vbytes,
            vsize: tx.vsize() as u64,
            raw_hex: serialize_hex(&tx),
            conflicts_with: Vec::new(),
        })
    }

    fn sign_digest(&self, digest: [u8; 32], key: &PrivateKey) -> EcdsaSignature {
        let message = Message::from_digest(digest);
        EcdsaSignature { signature: self.secp.sign_ecdsa(&message, &key.inner), sighash_type: EcdsaSighashType::All }
    }
}
