// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reference in-process wallet driver.
//!
//! `DevWallet` implements the gateway contract with deterministic
//! secp256k1 tweak derivation from a 32-byte root secret and minimal
//! transaction assembly, without any chain access. Two `DevWallet`s can
//! pay and verify each other, which is what the node's tests and local
//! deployments need; production nodes wrap a real wallet library instead.

use async_trait::async_trait;
use claw_core::{IdentityKey, ProtocolId};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SECP256K1, Scalar, SecretKey};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::envelope::parse_tx_envelope;
use crate::gateway::{
    ActionRecord, BroadcastResult, InternalizeResult, PaymentOutput, WalletError, WalletGateway,
};

/// In-process reference driver over a single root secret.
pub struct DevWallet {
    root: SecretKey,
    identity: IdentityKey,
    actions: Mutex<Vec<ActionRecord>>,
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Invocation-key tweak for a signing protocol.
///
/// Shared by sign and verify: both sides hash the same protocol string, so
/// a verifier can derive the signer's invocation public key from the
/// signer's identity key alone.
fn protocol_tweak(protocol_id: ProtocolId, key_id: &str) -> Result<Scalar, WalletError> {
    let material = format!("{} {} {}", protocol_id.0, protocol_id.1, key_id);
    Scalar::from_be_bytes(sha256(material.as_bytes()))
        .map_err(|_| WalletError::Derivation("protocol tweak out of field range".into()))
}

/// Per-payment tweak from the derivation salts.
fn payment_tweak(prefix: &str, suffix: &str) -> Result<Scalar, WalletError> {
    let material = format!("payment {prefix} {suffix}");
    Scalar::from_be_bytes(sha256(material.as_bytes()))
        .map_err(|_| WalletError::Derivation("payment tweak out of field range".into()))
}

fn parse_pubkey(key: &IdentityKey) -> Result<PublicKey, WalletError> {
    PublicKey::from_slice(&key.to_bytes())
        .map_err(|e| WalletError::Verification(format!("bad public key: {e}")))
}

/// P2PK locking script: `<33-byte pubkey> OP_CHECKSIG`.
fn p2pk_script(pubkey: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(35);
    script.push(33);
    script.extend_from_slice(&pubkey.serialize());
    script.push(0xac);
    script
}

fn push_varint(buf: &mut Vec<u8>, v: u64) {
    if v < 0xfd {
        buf.push(v as u8);
    } else if v <= u64::from(u16::MAX) {
        buf.push(0xfd);
        buf.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= u64::from(u32::MAX) {
        buf.push(0xfe);
        buf.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

impl DevWallet {
    /// Construct from a 64-char hex root secret.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Derivation`] on bad hex or an out-of-range
    /// scalar.
    pub fn from_root_hex(root_hex: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(root_hex.trim())
            .map_err(|e| WalletError::Derivation(format!("root key hex: {e}")))?;
        let root = SecretKey::from_slice(&bytes)
            .map_err(|e| WalletError::Derivation(format!("root key: {e}")))?;
        let pubkey = PublicKey::from_secret_key(SECP256K1, &root);
        let identity = IdentityKey::parse(&hex::encode(pubkey.serialize()))
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        Ok(Self {
            root,
            identity,
            actions: Mutex::new(Vec::new()),
        })
    }

    /// Generate a fresh random root secret (node creation, tests).
    #[must_use]
    pub fn generate() -> Self {
        let (root, pubkey) = SECP256K1.generate_keypair(&mut rand::thread_rng());
        let identity = IdentityKey::parse(&hex::encode(pubkey.serialize()))
            .expect("serialized compressed point is a valid identity");
        Self {
            root,
            identity,
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Hex form of the root secret, for persisting a created node.
    #[must_use]
    pub fn root_hex(&self) -> String {
        hex::encode(self.root.secret_bytes())
    }

    fn invocation_secret(&self, tweak: Scalar) -> Result<SecretKey, WalletError> {
        self.root
            .add_tweak(&tweak)
            .map_err(|e| WalletError::Derivation(format!("secret tweak: {e}")))
    }

    fn record_action(&self, txid: &str, description: &str, labels: &[String], satoshis: u64) {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut actions = self.actions.lock().expect("action log poisoned");
        actions.push(ActionRecord {
            txid: txid.to_string(),
            description: description.to_string(),
            labels: labels.to_vec(),
            satoshis,
            created_at,
        });
    }
}

#[async_trait]
impl WalletGateway for DevWallet {
    fn identity_key(&self) -> IdentityKey {
        self.identity.clone()
    }

    async fn sign(
        &self,
        data: &[u8],
        protocol_id: ProtocolId,
        key_id: &str,
        _counterparty: Option<&IdentityKey>,
    ) -> Result<Vec<u8>, WalletError> {
        let tweak = protocol_tweak(protocol_id, key_id)?;
        let sk = self.invocation_secret(tweak)?;
        let msg = Message::from_digest(sha256(data));
        let sig = SECP256K1.sign_ecdsa(&msg, &sk);
        Ok(sig.serialize_compact().to_vec())
    }

    async fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        protocol_id: ProtocolId,
        key_id: &str,
        counterparty: &IdentityKey,
    ) -> Result<bool, WalletError> {
        let sig = match Signature::from_compact(signature) {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
        let tweak = protocol_tweak(protocol_id, key_id)?;
        let signer_pk = parse_pubkey(counterparty)?
            .add_exp_tweak(SECP256K1, &tweak)
            .map_err(|e| WalletError::Derivation(format!("public tweak: {e}")))?;
        let msg = Message::from_digest(sha256(data));
        Ok(SECP256K1.verify_ecdsa(&msg, &sig, &signer_pk).is_ok())
    }

    async fn derive_payment_script(
        &self,
        recipient: &IdentityKey,
        derivation_prefix: &str,
        derivation_suffix: &str,
    ) -> Result<Vec<u8>, WalletError> {
        let tweak = payment_tweak(derivation_prefix, derivation_suffix)?;
        let derived = parse_pubkey(recipient)?
            .add_exp_tweak(SECP256K1, &tweak)
            .map_err(|e| WalletError::Derivation(format!("payment key: {e}")))?;
        Ok(p2pk_script(&derived))
    }

    async fn build_and_broadcast_payment(
        &self,
        outputs: &[PaymentOutput],
        description: &str,
        labels: &[String],
    ) -> Result<BroadcastResult, WalletError> {
        if outputs.is_empty() {
            return Err(WalletError::Broadcast("no outputs".into()));
        }
        // One fake funding input; the dev driver has no chain to spend from.
        let mut tx = Vec::new();
        tx.extend_from_slice(&1u32.to_le_bytes());
        push_varint(&mut tx, 1);
        tx.extend_from_slice(&[0u8; 32]);
        tx.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        push_varint(&mut tx, 0);
        tx.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        push_varint(&mut tx, outputs.len() as u64);
        for out in outputs {
            tx.extend_from_slice(&out.satoshis.to_le_bytes());
            push_varint(&mut tx, out.locking_script.len() as u64);
            tx.extend_from_slice(&out.locking_script);
        }
        tx.extend_from_slice(&0u32.to_le_bytes());

        let mut digest = sha256d(&tx);
        digest.reverse();
        let txid = hex::encode(digest);

        let total: u64 = outputs.iter().map(|o| o.satoshis).sum();
        self.record_action(&txid, description, labels, total);

        Ok(BroadcastResult { raw_tx: tx, txid })
    }

    async fn internalize_payment(
        &self,
        raw_tx: &[u8],
        output_index: u32,
        derivation_prefix: &str,
        derivation_suffix: &str,
        sender: &IdentityKey,
        description: &str,
    ) -> Result<InternalizeResult, WalletError> {
        let layout = parse_tx_envelope(raw_tx).map_err(|e| WalletError::Internalize {
            reason: format!("unparseable transaction: {e}"),
        })?;
        let output = layout
            .outputs
            .get(output_index as usize)
            .ok_or_else(|| WalletError::Internalize {
                reason: format!("no output at index {output_index}"),
            })?;

        let expected = self
            .derive_payment_script(&self.identity, derivation_prefix, derivation_suffix)
            .await?;
        if output.script != expected {
            return Err(WalletError::Internalize {
                reason: "output does not pay this wallet under the given derivation".into(),
            });
        }

        let mut digest = sha256d(raw_tx);
        digest.reverse();
        self.record_action(
            &hex::encode(digest),
            description,
            &["incoming".to_string(), format!("from:{sender}")],
            output.satoshis,
        );

        Ok(InternalizeResult {
            accepted_sats: output.satoshis,
        })
    }

    fn list_actions(&self) -> Vec<ActionRecord> {
        self.actions.lock().expect("action log poisoned").clone()
    }
}

/// Base64 helpers for signatures on the wire.
pub mod wire {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;

    /// Encode signature bytes for a JSON field.
    #[must_use]
    pub fn encode_signature(sig: &[u8]) -> String {
        BASE64.encode(sig)
    }

    /// Decode a JSON signature field; `None` on bad base64.
    #[must_use]
    pub fn decode_signature(sig: &str) -> Option<Vec<u8>> {
        BASE64.decode(sig).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claw_core::{SHARING_KEY_ID, SHARING_PROTOCOL};

    #[tokio::test]
    async fn sign_verify_round_trip_across_wallets() {
        let alice = DevWallet::generate();
        let bob = DevWallet::generate();

        let sig = alice
            .sign(b"hello claw", SHARING_PROTOCOL, SHARING_KEY_ID, None)
            .await
            .unwrap();
        // Bob verifies against Alice's identity.
        let ok = bob
            .verify(
                b"hello claw",
                &sig,
                SHARING_PROTOCOL,
                SHARING_KEY_ID,
                &alice.identity_key(),
            )
            .await
            .unwrap();
        assert!(ok);

        // Tampered message fails.
        let bad = bob
            .verify(
                b"hello claws",
                &sig,
                SHARING_PROTOCOL,
                SHARING_KEY_ID,
                &alice.identity_key(),
            )
            .await
            .unwrap();
        assert!(!bad);

        // Wrong signer identity fails.
        let wrong = bob
            .verify(
                b"hello claw",
                &sig,
                SHARING_PROTOCOL,
                SHARING_KEY_ID,
                &bob.identity_key(),
            )
            .await
            .unwrap();
        assert!(!wrong);
    }

    #[tokio::test]
    async fn garbage_signature_is_false_not_error() {
        let w = DevWallet::generate();
        let ok = w
            .verify(
                b"data",
                b"not-a-signature",
                SHARING_PROTOCOL,
                SHARING_KEY_ID,
                &w.identity_key(),
            )
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn pay_and_internalize_between_wallets() {
        let payer = DevWallet::generate();
        let provider = DevWallet::generate();

        let script = payer
            .derive_payment_script(&provider.identity_key(), "prefix-1", "clawsats")
            .await
            .unwrap();
        let broadcast = payer
            .build_and_broadcast_payment(
                &[PaymentOutput {
                    satoshis: 10,
                    locking_script: script,
                    note: "call echo".into(),
                }],
                "paid call",
                &[],
            )
            .await
            .unwrap();

        let accepted = provider
            .internalize_payment(
                &broadcast.raw_tx,
                0,
                "prefix-1",
                "clawsats",
                &payer.identity_key(),
                "echo payment",
            )
            .await
            .unwrap();
        assert_eq!(accepted.accepted_sats, 10);
    }

    #[tokio::test]
    async fn internalize_rejects_wrong_derivation() {
        let payer = DevWallet::generate();
        let provider = DevWallet::generate();

        let script = payer
            .derive_payment_script(&provider.identity_key(), "prefix-1", "clawsats")
            .await
            .unwrap();
        let broadcast = payer
            .build_and_broadcast_payment(
                &[PaymentOutput {
                    satoshis: 10,
                    locking_script: script,
                    note: String::new(),
                }],
                "paid call",
                &[],
            )
            .await
            .unwrap();

        let err = provider
            .internalize_payment(
                &broadcast.raw_tx,
                0,
                "prefix-other",
                "clawsats",
                &payer.identity_key(),
                "echo payment",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Internalize { .. }));
    }

    #[tokio::test]
    async fn internalize_rejects_missing_output_index() {
        let payer = DevWallet::generate();
        let provider = DevWallet::generate();
        let script = payer
            .derive_payment_script(&provider.identity_key(), "p", "clawsats")
            .await
            .unwrap();
        let broadcast = payer
            .build_and_broadcast_payment(
                &[PaymentOutput {
                    satoshis: 5,
                    locking_script: script,
                    note: String::new(),
                }],
                "x",
                &[],
            )
            .await
            .unwrap();
        let err = provider
            .internalize_payment(
                &broadcast.raw_tx,
                7,
                "p",
                "clawsats",
                &payer.identity_key(),
                "x",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Internalize { .. }));
    }

    #[test]
    fn root_hex_round_trip() {
        let w = DevWallet::generate();
        let again = DevWallet::from_root_hex(&w.root_hex()).unwrap();
        assert_eq!(w.identity_key(), again.identity_key());
    }

    #[tokio::test]
    async fn broadcast_records_action() {
        let w = DevWallet::generate();
        let script = w
            .derive_payment_script(&w.identity_key(), "p", "s")
            .await
            .unwrap();
        w.build_and_broadcast_payment(
            &[PaymentOutput {
                satoshis: 42,
                locking_script: script,
                note: String::new(),
            }],
            "test action",
            &["label-a".into()],
        )
        .await
        .unwrap();
        let actions = w.list_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].satoshis, 42);
        assert_eq!(actions[0].description, "test action");
    }
}
