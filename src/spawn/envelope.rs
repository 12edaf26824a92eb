//! Truncation-resistant envelope for spawn hand-off.
//!
//! Spawn prompts travel through channels that silently truncate (clipboard
//! buffers, model contexts). The envelope makes truncation detectable: both
//! sentinels must be present, and the payload must hash to the recorded
//! checksum.
//!
//! Wire format (LF line endings):
//!
//! ```text
//! -----BEGIN LUMENFLOW SPAWN-----
//! <YAML payload>
//! checksum: sha256:<hex>
//! -----END LUMENFLOW SPAWN-----
//! ```

use sha2::{Digest, Sha256};

use crate::errors::LumenError;

use super::SpawnRecord;

const BEGIN_SENTINEL: &str = "-----BEGIN LUMENFLOW SPAWN-----";
const END_SENTINEL: &str = "-----END LUMENFLOW SPAWN-----";
const CHECKSUM_PREFIX: &str = "checksum: sha256:";

/// A spawn record wrapped for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnEnvelope {
    pub record: SpawnRecord,
}

impl SpawnEnvelope {
    pub fn new(record: SpawnRecord) -> Self {
        Self { record }
    }

    pub fn serialize(&self) -> anyhow::Result<String> {
        let payload = serde_yaml::to_string(&self.record)?;
        let digest = hex_digest(payload.as_bytes());
        let mut out = String::new();
        out.push_str(BEGIN_SENTINEL);
        out.push('\n');
        out.push_str(&payload);
        if !payload.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(CHECKSUM_PREFIX);
        out.push_str(&digest);
        out.push('\n');
        out.push_str(END_SENTINEL);
        out.push('\n');
        Ok(out)
    }

    /// Parse an envelope out of `input`, enforcing sentinels, checksum, and
    /// schema. Leading/trailing noise around the sentinels is tolerated;
    /// anything wrong inside them is not.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let begin = input.find(BEGIN_SENTINEL).ok_or_else(|| envelope_err(
            "missing begin sentinel (input truncated at the front?)",
        ))?;
        let after_begin = begin + BEGIN_SENTINEL.len();
        let end_rel = input[after_begin..]
            .find(END_SENTINEL)
            .ok_or_else(|| envelope_err("missing end sentinel (input truncated?)"))?;
        let body = input[after_begin..after_begin + end_rel].trim_matches('\n');

        let (payload, checksum_line) = body
            .rsplit_once('\n')
            .ok_or_else(|| envelope_err("envelope body has no checksum line"))?;
        let declared = checksum_line
            .strip_prefix(CHECKSUM_PREFIX)
            .ok_or_else(|| envelope_err("last body line is not a sha256 checksum"))?
            .trim();

        // The payload hash covers the exact serialized bytes, newline included
        let mut payload_bytes = payload.to_string();
        payload_bytes.push('\n');
        let actual = hex_digest(payload_bytes.as_bytes());
        if declared != actual {
            return Err(envelope_err(&format!(
                "checksum mismatch: declared {declared}, computed {actual}"
            )));
        }

        let record: SpawnRecord = serde_yaml::from_str(payload)
            .map_err(|e| envelope_err(&format!("payload schema invalid: {e}")))?;
        Ok(Self { record })
    }
}

fn envelope_err(reason: &str) -> anyhow::Error {
    LumenError::YamlParse {
        path: std::path::PathBuf::from("<spawn envelope>"),
        detail: reason.to_string(),
    }
    .into()
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wu::WuId;

    fn sample() -> SpawnEnvelope {
        let mut record = SpawnRecord::new(WuId(12), WuId(34), "Framework: Core");
        record.id = "spawn-beef".into();
        record.spawned_at = "2024-06-01T12:00:00Z".into();
        SpawnEnvelope::new(record.with_intent("extract the parser"))
    }

    #[test]
    fn roundtrip() {
        let envelope = sample();
        let wire = envelope.serialize().unwrap();
        assert!(wire.starts_with(BEGIN_SENTINEL));
        assert!(wire.trim_end().ends_with(END_SENTINEL));
        let parsed = SpawnEnvelope::parse(&wire).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn surrounding_noise_tolerated() {
        let wire = sample().serialize().unwrap();
        let noisy = format!("Here is your hand-off:\n\n{wire}\nGood luck!\n");
        assert!(SpawnEnvelope::parse(&noisy).is_ok());
    }

    #[test]
    fn truncation_detected() {
        let wire = sample().serialize().unwrap();
        // Drop the tail - the end sentinel disappears
        let truncated = &wire[..wire.len() - 20];
        let err = SpawnEnvelope::parse(truncated).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn tampering_detected() {
        let wire = sample().serialize().unwrap();
        let tampered = wire.replace("WU-34", "WU-35");
        let err = SpawnEnvelope::parse(&tampered).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn garbage_payload_rejected() {
        let payload = "just: [unbalanced";
        let digest = hex_digest(format!("{payload}\n").as_bytes());
        let wire = format!(
            "{BEGIN_SENTINEL}\n{payload}\n{CHECKSUM_PREFIX}{digest}\n{END_SENTINEL}\n"
        );
        let err = SpawnEnvelope::parse(&wire).unwrap_err();
        assert!(err.to_string().contains("schema invalid"));
    }
}
