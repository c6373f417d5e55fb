use std::result::Result;
use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::bip32::{DerivationPath, Fingerprint};
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, psbt, Amount, CompressedPublicKey, OutPoint, Psbt, PublicKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use once_cell::sync::{Lazy, OnceCell};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub type BoxError = Box<dyn std::error::Error + 'static>;

static INIT_TRACING: OnceCell<()> = OnceCell::new();

pub fn init_tracing() {
    INIT_TRACING.get_or_init(|| {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global default subscriber");
    });
}

/// From the BIP-78 test vector
pub const ORIGINAL_PSBT: &str = "cHNidP8BAHMCAAAAAY8nutGgJdyYGXWiBEb45Hoe9lWGbkxh/6bNiOJdCDuDAAAAAAD+////AtyVuAUAAAAAF6kUHehJ8GnSdBUOOv6ujXLrWmsJRDCHgIQeAAAAAAAXqRR3QJbbz0hnQ8IvQ0fptGn+votneofTAAAAAAEBIKgb1wUAAAAAF6kU3k4ekGHKWRNbA1rV5tR5kEVDVNCHAQcXFgAUx4pFclNVgo1WWAdN1SYNX8tphTABCGsCRzBEAiB8Q+A6dep+Rz92vhy26lT0AjZn4PRLi8Bf9qoB/CMk0wIgP/Rj2PWZ3gEjUkTlhDRNAQ0gXwTO7t9n+V14pZ6oljUBIQMVmsAaoNWHVMS02LfTSe0e388LNitPa1UQZyOihY+FFgABABYAFEb2Giu6c4KO5YW0pfw3lGp9jMUUAAA=";

/// From the BIP-174 test vector
pub const INVALID_PSBT: &str = "AgAAAAEmgXE3Ht/yhek3re6ks3t4AAwFZsuzrWRkFxPKQhcb9gAAAABqRzBEAiBwsiRRI+a/R01gxbUMBD1MaRpdJDXwmjSnZiqdwlF5CgIgATKcqdrPKAvfMHQOwDkEIkIsgctFg5RXrrdvwS7dlbMBIQJlfRGNM1e44PTCzUbbezn22cONmnCry5st5dyNv+TOMf7///8C09/1BQAAAAAZdqkU0MWZA8W6woaHYOkP1SGkZlqnZSCIrADh9QUAAAAAF6kUNUXm4zuDLEcFDyTT7rk8nAOUi8eHsy4TAA&#61;&#61;";

/// From the BIP-78 test vector
pub const PAYJOIN_PROPOSAL: &str = "cHNidP8BAJwCAAAAAo8nutGgJdyYGXWiBEb45Hoe9lWGbkxh/6bNiOJdCDuDAAAAAAD+////jye60aAl3JgZdaIERvjkeh72VYZuTGH/ps2I4l0IO4MBAAAAAP7///8CJpW4BQAAAAAXqRQd6EnwadJ0FQ46/q6NcutaawlEMIcACT0AAAAAABepFHdAltvPSGdDwi9DR+m0af6+i2d6h9MAAAAAAQEgqBvXBQAAAAAXqRTeTh6QYcpZE1sDWtXm1HmQRUNU0IcAAQEggIQeAAAAAAAXqRTI8sv5ymFHLIjkZNRrNXSEXZHY1YcBBxcWABRfgGZV5ZJMkgTC1RvlOU9L+e2iEAEIawJHMEQCIGe7e0DfJaVPRYEKWxddL2Pr0G37BoKz0lyNa02O2/tWAiB7ZVgBoF4s8MHocYWWmo4Q1cyV2wl7MX0azlqa8NBENAEhAmXWPPW0G3yE3HajBOb7gO7iKzHSmZ0o0w0iONowcV+tAAAA";

/// From the BIP-78 test vector
pub const PAYJOIN_PROPOSAL_WITH_SENDER_INFO: &str = "cHNidP8BAJwCAAAAAo8nutGgJdyYGXWiBEb45Hoe9lWGbkxh/6bNiOJdCDuDAAAAAAD+////jye60aAl3JgZdaIERvjkeh72VYZuTGH/ps2I4l0IO4MBAAAAAP7///8CJpW4BQAAAAAXqRQd6EnwadJ0FQ46/q6NcutaawlEMIcACT0AAAAAABepFHdAltvPSGdDwi9DR+m0af6+i2d6h9MAAAAAAQEgqBvXBQAAAAAXqRTeTh6QYcpZE1sDWtXm1HmQRUNU0IcBBBYAFMeKRXJTVYKNVlgHTdUmDV/LaYUwIgYDFZrAGqDVh1TEtNi300ntHt/PCzYrT2tVEGcjooWPhRYYSFzWUDEAAIABAACAAAAAgAEAAAAAAAAAAAEBIICEHgAAAAAAF6kUyPLL+cphRyyI5GTUazV0hF2R2NWHAQcXFgAUX4BmVeWSTJIEwtUb5TlPS/ntohABCGsCRzBEAiBnu3tA3yWlT0WBClsXXS9j69Bt+waCs9JcjWtNjtv7VgIge2VYAaBeLPDB6HGFlpqOENXMldsJezF9Gs5amvDQRDQBIQJl1jz1tBt8hNx2owTm+4Du4isx0pmdKNMNIjjaMHFfrQABABYAFEb2Giu6c4KO5YW0pfw3lGp9jMUUIgICygvBWB5prpfx61y1HDAwo37kYP3YRJBvAjtunBAur3wYSFzWUDEAAIABAACAAAAAgAEAAAABAAAAAAA=";

pub static PARSED_ORIGINAL_PSBT: Lazy<Psbt> =
    Lazy::new(|| Psbt::from_str(ORIGINAL_PSBT).expect("known psbt should parse"));

pub static PARSED_PAYJOIN_PROPOSAL: Lazy<Psbt> =
    Lazy::new(|| Psbt::from_str(PAYJOIN_PROPOSAL).expect("known psbt should parse"));

pub static PARSED_PAYJOIN_PROPOSAL_WITH_SENDER_INFO: Lazy<Psbt> = Lazy::new(|| {
    Psbt::from_str(PAYJOIN_PROPOSAL_WITH_SENDER_INFO).expect("known psbt should parse")
});

// Values of the synthetic negotiation: one 0.2 BTC sender input paying 1 120 000 sats with
// 18 870 000 sats of change and a 10 000 sat fee.
pub const ORIGINAL_INPUT_VALUE: Amount = Amount::from_sat(20_000_000);
pub const ORIGINAL_PAYMENT_VALUE: Amount = Amount::from_sat(1_120_000);
pub const ORIGINAL_CHANGE_VALUE: Amount = Amount::from_sat(18_870_000);
pub const ORIGINAL_FEE: Amount = Amount::from_sat(10_000);
pub const RECEIVER_INPUT_VALUE: Amount = Amount::from_sat(9_900_000);
pub const ORIGINAL_SEQUENCE: Sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;

/// Spending conditions the fixtures know how to build and sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputScript {
    P2wpkh,
    P2shP2wpkh,
    P2pkh,
}

fn secret_key(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).expect("32 bytes, within curve order")
}

pub fn sender_key() -> SecretKey { secret_key(0x11) }

pub fn receiver_key() -> SecretKey { secret_key(0x22) }

fn payee_key() -> SecretKey { secret_key(0x33) }

fn change_key() -> SecretKey { secret_key(0x44) }

pub fn public_key(secret_key: &SecretKey) -> PublicKey {
    PublicKey::new(secret_key.public_key(&Secp256k1::new()))
}

fn p2wpkh_program(secret_key: &SecretKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&CompressedPublicKey(public_key(secret_key).inner).wpubkey_hash())
}

/// The script the key behind `secret_key` is paid to under `kind`.
pub fn script_pubkey(kind: InputScript, secret_key: &SecretKey) -> ScriptBuf {
    match kind {
        InputScript::P2wpkh => p2wpkh_program(secret_key),
        InputScript::P2shP2wpkh => ScriptBuf::new_p2sh(&p2wpkh_program(secret_key).script_hash()),
        InputScript::P2pkh => ScriptBuf::new_p2pkh(&public_key(secret_key).pubkey_hash()),
    }
}

/// Payment output of the synthetic negotiation, owned by the receiver.
pub fn payee_script() -> ScriptBuf { p2wpkh_program(&payee_key()) }

pub fn change_script(kind: InputScript) -> ScriptBuf { script_pubkey(kind, &change_key()) }

fn key_source(index: u32) -> (Fingerprint, DerivationPath) {
    let path = DerivationPath::from_str(&format!("m/84'/1'/0'/0/{index}"))
        .expect("static derivation path");
    (Fingerprint::from([0xde, 0xad, 0xbe, 0xef]), path)
}

/// A sender Original PSBT the way a wallet hands it out before finalization: one input spending
/// `kind` with its UTXO, redeem script, key origin and a valid partial signature, a payment
/// output to [`payee_script`] and a change output carrying its key origin.
pub fn original_psbt(kind: InputScript) -> Psbt {
    let sender = sender_key();
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint { txid: Txid::from_byte_array([0xaa; 32]), vout: 1 },
            script_sig: ScriptBuf::new(),
            sequence: ORIGINAL_SEQUENCE,
            witness: Witness::new(),
        }],
        output: vec![
            TxOut { value: ORIGINAL_PAYMENT_VALUE, script_pubkey: payee_script() },
            TxOut { value: ORIGINAL_CHANGE_VALUE, script_pubkey: change_script(kind) },
        ],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).expect("unsigned transaction");
    let input = &mut psbt.inputs[0];
    input.witness_utxo =
        Some(TxOut { value: ORIGINAL_INPUT_VALUE, script_pubkey: script_pubkey(kind, &sender) });
    if kind == InputScript::P2shP2wpkh {
        input.redeem_script = Some(p2wpkh_program(&sender));
    }
    input.bip32_derivation.insert(public_key(&sender).inner, key_source(0));
    psbt.outputs[1].bip32_derivation.insert(public_key(&change_key()).inner, key_source(1));
    sign_input(&mut psbt, 0, &sender);
    psbt
}

/// Add a SIGHASH_ALL partial signature for the p2wpkh or p2sh-p2wpkh input at `index`.
pub fn sign_input(psbt: &mut Psbt, index: usize, secret_key: &SecretKey) {
    let secp = Secp256k1::new();
    let input = &psbt.inputs[index];
    let utxo = input.witness_utxo.clone().expect("segwit input carries its witness utxo");
    let script_code = match &input.redeem_script {
        Some(redeem_script) => redeem_script.clone(),
        None => utxo.script_pubkey.clone(),
    };
    let sighash = SighashCache::new(&psbt.unsigned_tx)
        .p2wpkh_signature_hash(index, &script_code, utxo.value, EcdsaSighashType::All)
        .expect("p2wpkh script code");
    let msg = Message::from_digest(sighash.to_byte_array());
    let signature = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, secret_key));
    psbt.inputs[index].partial_sigs.insert(public_key(secret_key), signature);
}

/// Sign every input of `psbt` that has UTXO info but no final scripts with `secret_key`.
pub fn sign_unfinalized_inputs(psbt: &mut Psbt, secret_key: &SecretKey) {
    for index in 0..psbt.inputs.len() {
        let input = &psbt.inputs[index];
        if input.final_script_sig.is_none()
            && input.final_script_witness.is_none()
            && input.witness_utxo.is_some()
        {
            sign_input(psbt, index, secret_key);
        }
    }
}

fn dummy_signature(secret_key: &SecretKey) -> PushBytesBuf {
    let sig = Secp256k1::new().sign_ecdsa(&Message::from_digest([0x42; 32]), secret_key);
    PushBytesBuf::try_from(ecdsa::Signature::sighash_all(sig).to_vec())
        .expect("signature fits a push")
}

/// A finalized receiver input of `kind` worth `value`, as a receiver would contribute it.
pub fn receiver_input(kind: InputScript, value: Amount, sequence: Sequence) -> (TxIn, psbt::Input) {
    let receiver = receiver_key();
    let pubkey = public_key(&receiver);
    let script_pubkey = script_pubkey(kind, &receiver);
    let mut psbtin = psbt::Input::default();
    let previous_output = match kind {
        InputScript::P2wpkh | InputScript::P2shP2wpkh => {
            psbtin.witness_utxo = Some(TxOut { value, script_pubkey });
            let witness = Witness::from_slice(&[
                dummy_signature(&receiver).as_bytes().to_vec(),
                pubkey.to_bytes(),
            ]);
            psbtin.final_script_witness = Some(witness);
            if kind == InputScript::P2shP2wpkh {
                let redeem = PushBytesBuf::try_from(p2wpkh_program(&receiver).to_bytes())
                    .expect("redeem script fits a push");
                psbtin.final_script_sig = Some(ScriptBuf::builder().push_slice(redeem).into_script());
            }
            OutPoint { txid: Txid::from_byte_array([0xbb; 32]), vout: 0 }
        }
        InputScript::P2pkh => {
            let previous_tx = Transaction {
                version: Version::ONE,
                lock_time: LockTime::ZERO,
                input: vec![TxIn {
                    previous_output: OutPoint { txid: Txid::from_byte_array([0xcc; 32]), vout: 0 },
                    ..Default::default()
                }],
                output: vec![TxOut { value, script_pubkey }],
            };
            psbtin.final_script_sig = Some(
                ScriptBuf::builder()
                    .push_slice(dummy_signature(&receiver))
                    .push_key(&pubkey)
                    .into_script(),
            );
            let txid = previous_tx.compute_txid();
            psbtin.non_witness_utxo = Some(previous_tx);
            OutPoint { txid, vout: 0 }
        }
    };
    let txin = TxIn { previous_output, sequence, ..Default::default() };
    (txin, psbtin)
}

/// Reshape the PSBT a sender posted into the proposal a BIP78 receiver answers with: the sender
/// inputs lose their UTXO data and final scripts, then `inputs` are appended.
pub fn receiver_proposal(sent: &Psbt, inputs: Vec<(TxIn, psbt::Input)>) -> Psbt {
    let mut proposal = sent.clone();
    for input in proposal.inputs.iter_mut() {
        *input = psbt::Input::default();
    }
    for (txin, psbtin) in inputs {
        proposal.unsigned_tx.input.push(txin);
        proposal.inputs.push(psbtin);
    }
    proposal
}
