// ABOUTME: Ed25519 signing key sets per owner with bootstrap, rotation with grace, signing and verification
// ABOUTME: Seeds are sealed under the signing master key; decoded keys are cached per owner
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! # Keystore
//!
//! Each [`KeyOwner`] (the global set or one tenant) has at most one `active`
//! key that signs new tokens. Rotation demotes it to `grace` with a
//! `not_after` deadline; grace keys keep verifying and stay in the JWKS until
//! then. Sets are bootstrapped lazily on first use.
//!
//! Private seeds are stored as secret-box ciphertext and only decrypted into
//! an [`EncodingKey`] held in memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::jwks::{Jwk, Jwks};
use crate::cluster::ClusterMutation;
use crate::crypto::{MasterKey, SecretBox};
use crate::errors::{AppError, AppResult};
use crate::models::{KeyOwner, KeyStatus, SigningKeyRecord, KEY_ALG_EDDSA};
use crate::storage::ControlPlane;

/// Clock skew tolerated on `exp`/`nbf`
const LEEWAY_SECS: u64 = 30;

/// Minimum age of a cached key set before an unknown `kid` may reload it
const UNKNOWN_KID_RELOAD_INTERVAL: StdDuration = StdDuration::from_secs(10);

struct KeySet {
    records: Vec<SigningKeyRecord>,
    signer: Option<(String, EncodingKey)>,
    verifiers: HashMap<String, DecodingKey>,
    loaded_at: Instant,
}

/// What a verifier must check besides the signature
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions<'a> {
    /// Expected `iss`
    pub issuer: Option<&'a str>,
    /// Expected `aud`
    pub audience: Option<&'a str>,
}

/// Signing keys of every owner
pub struct Keystore {
    control: Arc<ControlPlane>,
    sealer: SecretBox,
    sets: RwLock<HashMap<KeyOwner, Arc<KeySet>>>,
    write_lock: Mutex<()>,
    reload_interval: StdDuration,
}

fn generate_record() -> (SigningKeyRecord, [u8; 32]) {
    let mut seed = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    let public = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
    let mut kid = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut kid);
    (
        SigningKeyRecord {
            kid: hex::encode(kid),
            alg: KEY_ALG_EDDSA.to_owned(),
            private_key_enc: String::new(),
            public_key: URL_SAFE_NO_PAD.encode(public),
            status: KeyStatus::Active,
            created_at: Utc::now(),
            not_after: None,
        },
        seed,
    )
}

fn token_error(err: &jsonwebtoken::errors::Error) -> AppError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AppError::invalid_token("token expired"),
        ErrorKind::InvalidIssuer => AppError::invalid_token("issuer mismatch"),
        ErrorKind::InvalidAudience => AppError::invalid_token("audience mismatch"),
        ErrorKind::ImmatureSignature => AppError::invalid_token("token not yet valid"),
        _ => AppError::invalid_token("invalid token"),
    }
}

impl Keystore {
    /// Keystore over the control-plane key repository
    #[must_use]
    pub fn new(control: Arc<ControlPlane>, signing_master_key: &MasterKey) -> Self {
        Self {
            control,
            sealer: SecretBox::new(signing_master_key),
            sets: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            reload_interval: UNKNOWN_KID_RELOAD_INTERVAL,
        }
    }

    /// Override how stale a key set must be before an unknown `kid` reloads it
    #[must_use]
    pub const fn with_reload_interval(mut self, interval: StdDuration) -> Self {
        self.reload_interval = interval;
        self
    }

    fn build_set(&self, records: Vec<SigningKeyRecord>) -> AppResult<KeySet> {
        let mut signer = None;
        let mut verifiers = HashMap::new();
        for record in &records {
            if record.status == KeyStatus::Revoked {
                continue;
            }
            let decoding = DecodingKey::from_ed_components(&record.public_key)
                .map_err(|e| AppError::internal(format!("bad public key {}: {e}", record.kid)))?;
            verifiers.insert(record.kid.clone(), decoding);
            if record.status == KeyStatus::Active {
                let seed_b64 = self.sealer.open(&record.private_key_enc)?;
                let seed: [u8; 32] = URL_SAFE_NO_PAD
                    .decode(seed_b64)
                    .ok()
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| AppError::internal(format!("corrupt seed for key {}", record.kid)))?;
                let der = SigningKey::from_bytes(&seed)
                    .to_pkcs8_der()
                    .map_err(|e| AppError::internal(format!("encode signing key: {e}")))?;
                signer = Some((record.kid.clone(), EncodingKey::from_ed_der(der.as_bytes())));
            }
        }
        Ok(KeySet {
            records,
            signer,
            verifiers,
            loaded_at: Instant::now(),
        })
    }

    async fn load(&self, owner: &KeyOwner) -> AppResult<Arc<KeySet>> {
        let cached = self.sets.read().await.get(owner).cloned();
        match cached {
            Some(set) => Ok(set),
            None => self.reload(owner).await,
        }
    }

    async fn reload(&self, owner: &KeyOwner) -> AppResult<Arc<KeySet>> {
        let records = self.control.keys()?.load_keys(owner).await?;
        let set = Arc::new(self.build_set(records)?);
        self.sets.write().await.insert(owner.clone(), Arc::clone(&set));
        Ok(set)
    }

    /// Key set with an active key, bootstrapping one if needed
    async fn active_set(&self, owner: &KeyOwner) -> AppResult<Arc<KeySet>> {
        let set = self.load(owner).await?;
        if set.signer.is_some() {
            return Ok(set);
        }
        let _guard = self.write_lock.lock().await;
        let set = self.reload(owner).await?;
        if set.signer.is_some() {
            return Ok(set);
        }
        self.control
            .cluster()
            .apply(&ClusterMutation::RotateKeys {
                owner: owner.storage_name().to_owned(),
            })
            .await?;
        let mut records = set.records.clone();
        let (mut record, seed) = generate_record();
        record.private_key_enc = self.sealer.seal(&URL_SAFE_NO_PAD.encode(seed))?;
        info!(%owner, kid = %record.kid, "bootstrapped signing key");
        records.push(record);
        self.control.keys()?.save_keys(owner, &records).await?;
        self.reload(owner).await
    }

    /// Kid of the active key for `owner`
    ///
    /// # Errors
    ///
    /// Storage and crypto failures; `NotLeader` when a key must be bootstrapped on a follower.
    pub async fn active_kid(&self, owner: &KeyOwner) -> AppResult<String> {
        let set = self.active_set(owner).await?;
        set.signer
            .as_ref()
            .map(|(kid, _)| kid.clone())
            .ok_or_else(|| AppError::internal("no active signing key"))
    }

    /// Generate a new active key and demote the current one to grace
    ///
    /// # Errors
    ///
    /// `NotLeader` on followers; storage and crypto failures.
    pub async fn rotate(&self, owner: &KeyOwner, grace_seconds: i64) -> AppResult<String> {
        self.control
            .cluster()
            .apply(&ClusterMutation::RotateKeys {
                owner: owner.storage_name().to_owned(),
            })
            .await?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut records = self.control.keys()?.load_keys(owner).await?;
        for record in &mut records {
            match record.status {
                KeyStatus::Active => {
                    record.status = KeyStatus::Grace;
                    record.not_after = Some(now + Duration::seconds(grace_seconds.max(0)));
                }
                KeyStatus::Grace if !record.is_published(now) => record.status = KeyStatus::Revoked,
                _ => {}
            }
        }
        let (mut record, seed) = generate_record();
        record.private_key_enc = self.sealer.seal(&URL_SAFE_NO_PAD.encode(seed))?;
        let kid = record.kid.clone();
        records.push(record);
        self.control.keys()?.save_keys(owner, &records).await?;
        self.reload(owner).await?;
        info!(%owner, kid = %kid, grace_seconds, "rotated signing key");
        Ok(kid)
    }

    /// Rotate the key set of one tenant
    ///
    /// # Errors
    ///
    /// Same as [`Keystore::rotate`].
    pub async fn rotate_for(&self, slug: &str, grace_seconds: i64) -> AppResult<String> {
        self.rotate(&KeyOwner::Tenant(slug.to_owned()), grace_seconds).await
    }

    /// Published keys: the active one and unexpired grace keys
    ///
    /// # Errors
    ///
    /// Storage and crypto failures.
    pub async fn jwks(&self, owner: &KeyOwner) -> AppResult<Jwks> {
        let set = self.active_set(owner).await?;
        let now = Utc::now();
        let mut published: Vec<&SigningKeyRecord> =
            set.records.iter().filter(|r| r.is_published(now)).collect();
        published.sort_by_key(|r| (r.status != KeyStatus::Active, std::cmp::Reverse(r.created_at)));
        Ok(Jwks {
            keys: published
                .into_iter()
                .map(|r| Jwk {
                    kty: "OKP".to_owned(),
                    crv: "Ed25519".to_owned(),
                    kid: r.kid.clone(),
                    alg: r.alg.clone(),
                    use_: "sig".to_owned(),
                    x: r.public_key.clone(),
                    status: r.status,
                })
                .collect(),
        })
    }

    /// Sign `claims` with the active key of `owner`, returning the JWT and its kid
    ///
    /// # Errors
    ///
    /// Storage, crypto and serialization failures.
    pub async fn sign<T: Serialize + Sync>(&self, owner: &KeyOwner, claims: &T) -> AppResult<(String, String)> {
        let set = self.active_set(owner).await?;
        let (kid, key) = set
            .signer
            .as_ref()
            .ok_or_else(|| AppError::internal("no active signing key"))?;
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(kid.clone());
        let token = jsonwebtoken::encode(&header, claims, key)
            .map_err(|e| AppError::internal(format!("sign token: {e}")))?;
        Ok((token, kid.clone()))
    }

    /// Verify a JWT signed by any published key of `owner`
    ///
    /// # Errors
    ///
    /// `invalid_token` for unknown kids, bad signatures, expiry, or issuer
    /// and audience mismatches.
    pub async fn verify<T: DeserializeOwned>(
        &self,
        owner: &KeyOwner,
        token: &str,
        options: VerifyOptions<'_>,
    ) -> AppResult<T> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| token_error(&e))?;
        if header.alg != Algorithm::EdDSA {
            return Err(AppError::invalid_token("unsupported algorithm"));
        }
        let kid = header
            .kid
            .ok_or_else(|| AppError::invalid_token("missing kid"))?;

        let mut set = self.load(owner).await?;
        if !set.verifiers.contains_key(&kid) {
            if set.loaded_at.elapsed() < self.reload_interval {
                debug!(%owner, kid = %kid, "unknown kid, key set reloaded recently");
                return Err(AppError::invalid_token("unknown signing key"));
            }
            debug!(%owner, kid = %kid, "unknown kid, reloading key set");
            set = self.reload(owner).await?;
        }
        let now = Utc::now();
        let published = set
            .records
            .iter()
            .any(|r| r.kid == kid && r.is_published(now));
        let Some(key) = set.verifiers.get(&kid).filter(|_| published) else {
            warn!(%owner, kid = %kid, "token signed with unpublished key");
            return Err(AppError::invalid_token("unknown signing key"));
        };

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = LEEWAY_SECS;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(issuer) = options.issuer {
            validation.set_issuer(&[issuer]);
        }
        match options.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        jsonwebtoken::decode::<T>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| token_error(&e))
    }

    /// Forget cached sets so the next use reloads from storage
    pub async fn invalidate(&self, owner: &KeyOwner) {
        self.sets.write().await.remove(owner);
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::cluster::{NoopClusterHook, StaticClusterHook};
    use crate::storage::fs::FsConnection;

    #[derive(Debug, Serialize, Deserialize)]
    struct Claims {
        iss: String,
        sub: String,
        exp: i64,
    }

    async fn keystore(dir: &tempfile::TempDir, leader: bool) -> Keystore {
        let conn = FsConnection::open(dir.path().to_path_buf()).await.unwrap();
        let cluster: Arc<dyn crate::cluster::ClusterHook> = if leader {
            Arc::new(NoopClusterHook)
        } else {
            Arc::new(StaticClusterHook::new(false))
        };
        let control = ControlPlane::new(
            Arc::new(conn),
            SecretBox::new(&MasterKey::from_bytes([1; 32])),
            cluster,
        );
        Keystore::new(Arc::new(control), &MasterKey::from_bytes([2; 32]))
    }

    fn claims(iss: &str) -> Claims {
        Claims {
            iss: iss.to_owned(),
            sub: "u1".to_owned(),
            exp: Utc::now().timestamp() + 300,
        }
    }

    #[tokio::test]
    async fn rotation_keeps_grace_key_verifying() {
        let dir = tempfile::tempdir().unwrap();
        let ks = keystore(&dir, true).await;
        let owner = KeyOwner::Tenant("acme".to_owned());

        let (old_token, old_kid) = ks.sign(&owner, &claims("https://id.test/t/acme")).await.unwrap();
        let new_kid = ks.rotate(&owner, 3600).await.unwrap();
        assert_ne!(old_kid, new_kid);

        let (new_token, signed_kid) = ks.sign(&owner, &claims("https://id.test/t/acme")).await.unwrap();
        assert_eq!(signed_kid, new_kid);

        let opts = VerifyOptions {
            issuer: Some("https://id.test/t/acme"),
            audience: None,
        };
        let verified: Claims = ks.verify(&owner, &old_token, opts).await.unwrap();
        assert_eq!(verified.sub, "u1");
        ks.verify::<Claims>(&owner, &new_token, opts).await.unwrap();

        let jwks = ks.jwks(&owner).await.unwrap();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid, new_kid);
        assert_eq!(jwks.keys[0].status, KeyStatus::Active);
        assert_eq!(jwks.keys[1].status, KeyStatus::Grace);
    }

    #[tokio::test]
    async fn zero_grace_drops_old_key() {
        let dir = tempfile::tempdir().unwrap();
        let ks = keystore(&dir, true).await;
        let owner = KeyOwner::Global;
        let (old_token, _) = ks.sign(&owner, &claims("https://id.test")).await.unwrap();
        ks.rotate(&owner, 0).await.unwrap();
        let err = ks
            .verify::<Claims>(&owner, &old_token, VerifyOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error, Some("invalid_token"));
        assert_eq!(ks.jwks(&owner).await.unwrap().keys.len(), 1);
    }

    #[tokio::test]
    async fn issuer_and_owner_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let ks = keystore(&dir, true).await;
        let acme = KeyOwner::Tenant("acme".to_owned());
        let (token, _) = ks.sign(&acme, &claims("https://id.test/t/acme")).await.unwrap();

        let wrong_iss = VerifyOptions {
            issuer: Some("https://id.test/t/other"),
            audience: None,
        };
        assert!(ks.verify::<Claims>(&acme, &token, wrong_iss).await.is_err());
        let other = KeyOwner::Tenant("other".to_owned());
        assert!(ks
            .verify::<Claims>(&other, &token, VerifyOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn followers_cannot_rotate() {
        let dir = tempfile::tempdir().unwrap();
        let ks = keystore(&dir, false).await;
        let err = ks.rotate_for("acme", 60).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.detail.as_deref(), Some("not_leader"));
    }

    #[tokio::test]
    async fn seeds_are_sealed_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let ks = keystore(&dir, true).await;
        ks.active_kid(&KeyOwner::Global).await.unwrap();
        let records = ks.control.keys().unwrap().load_keys(&KeyOwner::Global).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].private_key_enc.starts_with("GCMV1:"));
    }

    #[tokio::test]
    async fn unknown_kids_reload_at_most_once_per_interval() {
        let dir = tempfile::tempdir().unwrap();
        let owner = KeyOwner::Tenant("acme".to_owned());
        let signer = keystore(&dir, true).await;
        let (first, _) = signer.sign(&owner, &claims("https://id.test/t/acme")).await.unwrap();

        let throttled = keystore(&dir, true).await;
        let eager = keystore(&dir, true)
            .await
            .with_reload_interval(StdDuration::ZERO);
        throttled.verify::<Claims>(&owner, &first, VerifyOptions::default()).await.unwrap();
        eager.verify::<Claims>(&owner, &first, VerifyOptions::default()).await.unwrap();

        signer.rotate(&owner, 3600).await.unwrap();
        let (second, _) = signer.sign(&owner, &claims("https://id.test/t/acme")).await.unwrap();

        assert!(throttled
            .verify::<Claims>(&owner, &second, VerifyOptions::default())
            .await
            .is_err());
        eager.verify::<Claims>(&owner, &second, VerifyOptions::default()).await.unwrap();
    }
}
