//! Binary snapshot of a session for persistence between requests.
//!
//! Layout: magic bytes `QSS\0`, a little-endian `u16` format version, a
//! little-endian `u64` payload length, the session state as JSON, then a
//! SHA-256 over everything before it.

use qti_core::AssessmentTest;
use qti_plan::PlanError;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::state::TestSessionState;

/// Magic bytes identifying a snapshot: "QSS\0"
pub const MAGIC: [u8; 4] = [0x51, 0x53, 0x53, 0x00];

/// Bumped whenever the JSON shape of [`TestSessionState`] changes.
pub const FORMAT_VERSION: u16 = 1;

/// 4 (magic) + 2 (format version) + 8 (payload length)
const HEADER_SIZE: usize = 14;

const HASH_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid magic bytes: expected QSS\\0")]
    InvalidMagic,

    #[error("unsupported snapshot format {0} (this build reads {FORMAT_VERSION})")]
    UnsupportedVersion(u16),

    #[error("content hash mismatch: snapshot is corrupted")]
    HashMismatch,

    #[error("snapshot does not belong to this test: {0}")]
    PlanMismatch(#[from] PlanError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("data too small to be a valid snapshot")]
    TooSmall,
}

/// A persisted session state.
#[derive(Debug)]
pub struct SessionSnapshot {
    pub state: TestSessionState,
}

impl SessionSnapshot {
    pub fn new(state: TestSessionState) -> Self {
        Self { state }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let payload = serde_json::to_vec(&self.state)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + HASH_SIZE);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&payload);
        let hash: [u8; HASH_SIZE] = Sha256::digest(&buf).into();
        buf.extend_from_slice(&hash);
        Ok(buf)
    }

    /// Decode and integrity-check a snapshot without looking at the test.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        if data.len() < HEADER_SIZE + HASH_SIZE {
            return Err(SnapshotError::TooSmall);
        }
        if data[0..4] != MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let len_bytes: [u8; 8] = data[6..HEADER_SIZE]
            .try_into()
            .map_err(|_| SnapshotError::TooSmall)?;
        let payload_end = usize::try_from(u64::from_le_bytes(len_bytes))
            .ok()
            .and_then(|len| HEADER_SIZE.checked_add(len))
            .ok_or(SnapshotError::TooSmall)?;
        if data.len() != payload_end.saturating_add(HASH_SIZE) {
            return Err(SnapshotError::TooSmall);
        }

        let computed: [u8; HASH_SIZE] = Sha256::digest(&data[..payload_end]).into();
        if computed[..] != data[payload_end..] {
            return Err(SnapshotError::HashMismatch);
        }

        let state = serde_json::from_slice(&data[HEADER_SIZE..payload_end])
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        Ok(Self { state })
    }

    /// Decode a snapshot and check that its plan still resolves, node by
    /// node, against `test`.
    pub fn load(data: &[u8], test: &AssessmentTest) -> Result<TestSessionState, SnapshotError> {
        let snapshot = Self::from_bytes(data)?;
        snapshot.state.plan.check_against(test)?;
        Ok(snapshot.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qti_core::builder::{ItemRefBuilder, TestBuilder, TestPartBuilder};
    use qti_plan::{IdentityResolver, TestPlanner};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_with(first: &str, second: &str) -> AssessmentTest {
        TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .item(ItemRefBuilder::new(first, "q1"))
                    .item(ItemRefBuilder::new(second, "q2")),
            )
            .build()
            .unwrap()
    }

    fn sample_state(test: &AssessmentTest) -> TestSessionState {
        let plan = TestPlanner::new(test, &IdentityResolver)
            .plan(&mut StdRng::seed_from_u64(1))
            .unwrap();
        let mut state = TestSessionState::new(plan);
        state.reset(test);
        state
    }

    #[test]
    fn round_trip() {
        let test = test_with("Q1", "Q2");
        let state = sample_state(&test);
        let bytes = SessionSnapshot::new(state.clone()).to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"QSS\0");
        assert_eq!(SessionSnapshot::from_bytes(&bytes).unwrap().state, state);
        assert_eq!(SessionSnapshot::load(&bytes, &test).unwrap(), state);
    }

    #[test]
    fn load_rejects_an_edited_test() {
        let bytes = SessionSnapshot::new(sample_state(&test_with("Q1", "Q2")))
            .to_bytes()
            .unwrap();
        let err = SessionSnapshot::load(&bytes, &test_with("X9", "Y8")).unwrap_err();
        assert!(matches!(err, SnapshotError::PlanMismatch(PlanError::PartMismatch { .. })));
        assert!(err.to_string().starts_with("snapshot does not belong to this test"));
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = SessionSnapshot::new(sample_state(&test_with("Q1", "Q2")))
            .to_bytes()
            .unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            SessionSnapshot::from_bytes(&bytes),
            Err(SnapshotError::InvalidMagic)
        ));
    }

    #[test]
    fn corrupted_payload_rejected() {
        let mut bytes = SessionSnapshot::new(sample_state(&test_with("Q1", "Q2")))
            .to_bytes()
            .unwrap();
        bytes[HEADER_SIZE + 10] ^= 0xff;
        assert!(matches!(
            SessionSnapshot::from_bytes(&bytes),
            Err(SnapshotError::HashMismatch)
        ));
    }

    #[test]
    fn other_format_version_rejected() {
        let mut bytes = SessionSnapshot::new(sample_state(&test_with("Q1", "Q2")))
            .to_bytes()
            .unwrap();
        bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        let err = SessionSnapshot::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion(2)));
        assert_eq!(
            err.to_string(),
            "unsupported snapshot format 2 (this build reads 1)"
        );
    }

    #[test]
    fn truncated_rejected() {
        assert!(matches!(
            SessionSnapshot::from_bytes(&[0u8; 10]),
            Err(SnapshotError::TooSmall)
        ));
        let bytes = SessionSnapshot::new(sample_state(&test_with("Q1", "Q2")))
            .to_bytes()
            .unwrap();
        assert!(matches!(
            SessionSnapshot::from_bytes(&bytes[..bytes.len() - 1]),
            Err(SnapshotError::TooSmall)
        ));
    }
}
