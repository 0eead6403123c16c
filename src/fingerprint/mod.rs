//! Fingerprint engine
//!
//! Computes a SHA-256 digest of a unit's exported filesystem. The export is
//! consumed in fixed-size chunks straight from the runtime, never written to
//! disk, so memory use does not depend on the size of the unit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::error::{Result, RuntimeError, WardenError};
use crate::runtime::Runtime;

/// Bytes read from the export stream per chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// 256-bit filesystem digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Result of fingerprinting one unit
#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub digest: Digest,
    /// Length of the export stream that was hashed
    pub bytes: u64,
}

/// Hash a stream to its end in `CHUNK_SIZE` pieces
pub async fn digest_stream<S>(stream: &mut S) -> std::io::Result<Fingerprint>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        bytes += n as u64;
    }

    Ok(Fingerprint {
        digest: Digest(hasher.finalize().into()),
        bytes,
    })
}

/// Computes unit fingerprints through the runtime, bounded by a timeout
#[derive(Clone)]
pub struct FingerprintEngine {
    runtime: Arc<dyn Runtime>,
    timeout: Duration,
}

impl FingerprintEngine {
    pub fn new(runtime: Arc<dyn Runtime>, timeout: Duration) -> Self {
        Self { runtime, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fingerprint `unit`. Any failure to produce or fully consume the
    /// export, including the timeout elapsing, is `Unreadable`.
    pub async fn fingerprint(&self, unit: &str) -> Result<Fingerprint> {
        let outcome = tokio::time::timeout(self.timeout, self.compute(unit))
            .await
            .unwrap_or(Err(RuntimeError::Timeout(self.timeout)));

        match outcome {
            Ok(fingerprint) => {
                info!(
                    unit,
                    digest = %fingerprint.digest.short(),
                    size = %bytesize::ByteSize(fingerprint.bytes),
                    "computed fingerprint"
                );
                Ok(fingerprint)
            }
            Err(e) => Err(WardenError::Unreadable {
                unit: unit.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn compute(&self, unit: &str) -> std::result::Result<Fingerprint, RuntimeError> {
        debug!(unit, "starting export");
        let mut stream = self.runtime.export_stream(unit).await?;
        let fingerprint = digest_stream(&mut stream).await?;
        stream.finish().await?;
        Ok(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::ScriptedRuntime;

    fn engine(runtime: ScriptedRuntime) -> (Arc<ScriptedRuntime>, FingerprintEngine) {
        let runtime = Arc::new(runtime);
        let engine = FingerprintEngine::new(runtime.clone(), Duration::from_secs(5));
        (runtime, engine)
    }

    #[tokio::test]
    async fn test_fingerprint_is_deterministic() {
        let (_, engine) = engine(ScriptedRuntime::new().with_unit("web1", b"layer-contents"));
        let first = engine.fingerprint("web1").await.unwrap();
        let second = engine.fingerprint("web1").await.unwrap();
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.bytes, 14);
    }

    #[tokio::test]
    async fn test_fingerprint_detects_content_change() {
        let (runtime, engine) = engine(ScriptedRuntime::new().with_unit("web1", b"index.html v1"));
        let before = engine.fingerprint("web1").await.unwrap();
        runtime.set_contents("web1", b"index.html v2");
        let after = engine.fingerprint("web1").await.unwrap();
        assert_ne!(before.digest, after.digest);
    }

    #[tokio::test]
    async fn test_empty_stream_is_computable() {
        let (_, engine) = engine(ScriptedRuntime::new().with_unit("empty", b""));
        let fingerprint = engine.fingerprint("empty").await.unwrap();
        assert_eq!(fingerprint.bytes, 0);
        assert_eq!(
            fingerprint.digest.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_large_stream_spans_chunks() {
        let contents = vec![7u8; CHUNK_SIZE * 3 + 17];
        let (_, engine) = engine(ScriptedRuntime::new().with_unit("big", &contents));
        let fingerprint = engine.fingerprint("big").await.unwrap();
        assert_eq!(fingerprint.bytes, contents.len() as u64);

        let expected: [u8; 32] = Sha256::digest(&contents).into();
        assert_eq!(fingerprint.digest, Digest::from_bytes(expected));
    }

    #[tokio::test]
    async fn test_absent_unit_is_unreadable() {
        let (_, engine) = engine(ScriptedRuntime::new());
        let err = engine.fingerprint("ghost").await.unwrap_err();
        assert!(matches!(err, WardenError::Unreadable { ref unit, .. } if unit == "ghost"));
    }

    #[tokio::test]
    async fn test_failed_producer_is_unreadable() {
        let (runtime, engine) = engine(ScriptedRuntime::new().with_unit("web1", b"partial"));
        runtime.make_truncated("web1");
        let err = engine.fingerprint("web1").await.unwrap_err();
        assert!(err.to_string().contains("unexpected EOF"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_export_times_out() {
        let (runtime, engine) = engine(ScriptedRuntime::new().with_unit("web1", b"x"));
        runtime.make_hanging("web1");
        let err = engine.fingerprint("web1").await.unwrap_err();
        match err {
            WardenError::Unreadable { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_digest_formatting() {
        let digest = Digest::from_bytes([0xab; 32]);
        assert_eq!(digest.to_hex().len(), 64);
        assert_eq!(digest.short(), "abababababab");
        assert_eq!(format!("{:?}", digest), "Digest(abababababab)");
    }
}
