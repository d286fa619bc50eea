//! Administrative records: status reports and custody signals.
//!
//! Records travel as the payload of administrative bundles, encoded as CBOR.

use super::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to encode administrative record: {0}")]
    Encode(String),

    #[error("Failed to decode administrative record: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StatusFlag {
    Received,
    CustodyAccepted,
    Forwarded,
    Delivered,
    Deleted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StatusReason {
    #[default]
    NoAdditionalInfo,
    LifetimeExpired,
    ForwardedUnidirectional,
    TransmissionCancelled,
    DepletedStorage,
    DestEidUnintelligible,
    NoRouteToDest,
    NoTimelyContact,
    BlockUnintelligible,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CustodySignalReason {
    #[default]
    NoAdditionalInfo,
    RedundantReception,
    DepletedStorage,
    DestEidUnintelligible,
    NoRouteToDest,
    NoTimelyContact,
    BlockUnintelligible,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusReport {
    pub flag: StatusFlag,
    pub reason: StatusReason,
    pub orig: bundle::GbofId,
    /// Seconds since the DTN epoch.
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CustodySignal {
    pub succeeded: bool,
    pub reason: CustodySignalReason,
    pub orig: bundle::GbofId,
    /// Seconds since the DTN epoch.
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AdminRecord {
    StatusReport(StatusReport),
    CustodySignal(CustodySignal),
}

impl AdminRecord {
    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| Error::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        ciborium::de::from_reader(data).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Seconds since the DTN epoch.
pub(crate) fn now() -> u64 {
    (time::OffsetDateTime::now_utc() - bundle::dtn_epoch())
        .whole_seconds()
        .max(0) as u64
}
