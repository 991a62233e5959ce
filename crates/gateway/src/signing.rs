use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use data_model::JobSpec;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;

/// Fields that never take part in the signed payload.
const UNSIGNED_FIELDS: [&str; 4] = ["id", "created_at", "signature", "public_key"];

/// Prepares a job spec for submission.
pub trait JobSigner: Send + Sync {
    fn sign(&self, spec: JobSpec) -> Result<JobSpec>;
}

/// Passes specs through untouched, for gateways that attach credentials
/// themselves.
pub struct UnsignedSubmission;

impl JobSigner for UnsignedSubmission {
    fn sign(&self, spec: JobSpec) -> Result<JobSpec> {
        Ok(spec)
    }
}

pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Accepts a base64 encoded 32 byte secret key.
    pub fn from_base64(secret: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(secret.trim())
            .context("signing key is not valid base64")?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("signing key must be 32 bytes, got {}", bytes.len()))?;
        Ok(Self::new(SigningKey::from_bytes(&key)))
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }
}

impl JobSigner for Ed25519Signer {
    fn sign(&self, mut spec: JobSpec) -> Result<JobSpec> {
        let payload = signable_payload(&spec)?;
        let signature = self.signing_key.sign(payload.as_bytes());
        spec.signature = Some(BASE64.encode(signature.to_bytes()));
        spec.public_key = Some(self.public_key_base64());
        Ok(spec)
    }
}

/// Canonical form of the spec: sorted keys, no whitespace, identity and
/// signature fields stripped.
pub fn signable_payload(spec: &JobSpec) -> Result<String> {
    let mut value = serde_json::to_value(spec)?;
    if let Value::Object(map) = &mut value {
        for field in UNSIGNED_FIELDS {
            map.remove(field);
        }
    }
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Checks the signature a spec carries against its own public key.
pub fn verify_spec(spec: &JobSpec) -> Result<()> {
    let (Some(signature), Some(public_key)) = (&spec.signature, &spec.public_key) else {
        return Err(anyhow!("job spec is not signed"));
    };
    let key_bytes: [u8; 32] = BASE64
        .decode(public_key)?
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("public key must be 32 bytes"))?;
    let sig_bytes: [u8; 64] = BASE64
        .decode(signature)?
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("signature must be 64 bytes"))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(signable_payload(spec)?.as_bytes(), &signature)
        .context("job spec signature does not match")
}
