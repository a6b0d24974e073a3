//! Message framing for one burst
//!
//! A transmitted burst is always five messages in a fixed order:
//! `meta`, `dt`, `x`, `y`, `z`. Each is a self-describing CBOR map tagged with
//! the run identity, so a receiver can regroup them without a shared schema:
//!
//! | message | keys |
//! |---------|------|
//! | meta | `type id dev ip ntp epoch_s iso t0_us n fs dt_fmt a_fmt` |
//! | dt   | `type id idx parts dt` (u16 LE µs) |
//! | x/y/z | `type id idx parts a` (i16 LE mg) |

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::burst::{BurstConfig, SampleBurst};
use crate::clock::US_PER_SECOND;
use crate::codec::{from_cbor, pack_i16_le, pack_u16_le, to_cbor, unpack_i16_le, unpack_u16_le, CodecError};
use crate::error::{NodeError, Result};

/// Byte layout tag of the interval blob
pub const DT_FORMAT: &str = "u16le_us";

/// Byte layout tag of the axis blobs
pub const AXIS_FORMAT: &str = "i16le_mg";

/// Parts per channel under the current (unsplit) policy
pub const PARTS_PER_CHANNEL: u16 = 1;

/// Tag correlating all messages of one burst
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentity(String);

impl RunIdentity {
    /// `<client_id>-<low 32 bits of t0_wall_us>`
    pub fn derive(client_id: &str, t0_wall_us: u64) -> Self {
        let low = t0_wall_us & 0xFFFF_FFFF;
        Self(format!("{}-{}", client_id, low))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw channel carried by a blob message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Dt,
    X,
    Y,
    Z,
}

impl ChannelKind {
    /// Emission order of the channel blobs
    pub const ALL: [ChannelKind; 4] = [ChannelKind::Dt, ChannelKind::X, ChannelKind::Y, ChannelKind::Z];

    /// Value of the `type` key
    pub fn type_tag(&self) -> &'static str {
        match self {
            ChannelKind::Dt => "dt",
            ChannelKind::X => "x",
            ChannelKind::Y => "y",
            ChannelKind::Z => "z",
        }
    }

    /// Key holding the byte payload
    pub fn payload_key(&self) -> &'static str {
        match self {
            ChannelKind::Dt => "dt",
            _ => "a",
        }
    }

    fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            "dt" => Some(ChannelKind::Dt),
            "x" => Some(ChannelKind::X),
            "y" => Some(ChannelKind::Y),
            "z" => Some(ChannelKind::Z),
            _ => None,
        }
    }
}

/// Scalar metadata of one burst
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaMessage {
    pub id: String,
    pub device: String,
    /// Network address of the transmitting node
    pub address: String,
    /// Wall clock was synchronised when the burst was taken
    pub time_valid: bool,
    /// Whole seconds of `t0_wall_us`
    pub epoch_s: u64,
    /// ISO-8601 UTC rendering of `t0_wall_us` with microseconds
    pub iso: String,
    pub t0_wall_us: u64,
    pub sample_count: u16,
    pub target_rate_hz: u16,
    pub dt_format: String,
    pub axis_format: String,
}

/// One raw channel, or one part of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBlob {
    pub kind: ChannelKind,
    pub id: String,
    /// Zero-based part index
    pub part_index: u16,
    pub part_count: u16,
    pub payload: Vec<u8>,
}

/// One message of the publish protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishMessage {
    Meta(MetaMessage),
    Channel(ChannelBlob),
}

impl PublishMessage {
    /// Run identity carried by the message
    pub fn id(&self) -> &str {
        match self {
            PublishMessage::Meta(m) => &m.id,
            PublishMessage::Channel(c) => &c.id,
        }
    }

    /// Value of the `type` key
    pub fn type_tag(&self) -> &'static str {
        match self {
            PublishMessage::Meta(_) => "meta",
            PublishMessage::Channel(c) => c.kind.type_tag(),
        }
    }

    /// Serialise to a single CBOR map
    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, CodecError> {
        match self {
            PublishMessage::Meta(m) => to_cbor(&MetaWire::from(m)),
            PublishMessage::Channel(c) => to_cbor(&BlobWire::from(c)),
        }
    }

    /// Parse a message produced by [`PublishMessage::to_bytes`]
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, CodecError> {
        let TypeTag { type_tag } = from_cbor(bytes)?;

        if type_tag == "meta" {
            let wire: MetaWire = from_cbor(bytes)?;
            return Ok(PublishMessage::Meta(wire.into()));
        }

        let kind = ChannelKind::from_type_tag(&type_tag).ok_or(CodecError::UnknownType(type_tag))?;
        let wire: BlobWire = from_cbor(bytes)?;
        let payload = match kind {
            ChannelKind::Dt => wire.dt,
            _ => wire.a,
        }
        .ok_or_else(|| CodecError::Malformed(format!("missing key '{}'", kind.payload_key())))?;

        Ok(PublishMessage::Channel(ChannelBlob {
            kind,
            id: wire.id,
            part_index: wire.idx,
            part_count: wire.parts,
            payload: payload.into_vec(),
        }))
    }
}

/// Only the `type` key, read first to pick the message shape
#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    type_tag: String,
}

/// Meta message as it appears on the wire; field order is key order
#[derive(Serialize, Deserialize)]
struct MetaWire {
    #[serde(rename = "type")]
    type_tag: String,
    id: String,
    dev: String,
    ip: String,
    ntp: u8,
    epoch_s: u64,
    iso: String,
    t0_us: u64,
    n: u16,
    fs: u16,
    dt_fmt: String,
    a_fmt: String,
}

impl From<&MetaMessage> for MetaWire {
    fn from(m: &MetaMessage) -> Self {
        Self {
            type_tag: "meta".to_string(),
            id: m.id.clone(),
            dev: m.device.clone(),
            ip: m.address.clone(),
            ntp: u8::from(m.time_valid),
            epoch_s: m.epoch_s,
            iso: m.iso.clone(),
            t0_us: m.t0_wall_us,
            n: m.sample_count,
            fs: m.target_rate_hz,
            dt_fmt: m.dt_format.clone(),
            a_fmt: m.axis_format.clone(),
        }
    }
}

impl From<MetaWire> for MetaMessage {
    fn from(w: MetaWire) -> Self {
        Self {
            id: w.id,
            device: w.dev,
            address: w.ip,
            time_valid: w.ntp != 0,
            epoch_s: w.epoch_s,
            iso: w.iso,
            t0_wall_us: w.t0_us,
            sample_count: w.n,
            target_rate_hz: w.fs,
            dt_format: w.dt_fmt,
            axis_format: w.a_fmt,
        }
    }
}

/// Channel blob on the wire: the payload sits under `dt` or `a`
#[derive(Serialize, Deserialize)]
struct BlobWire {
    #[serde(rename = "type")]
    type_tag: String,
    id: String,
    idx: u16,
    parts: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dt: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    a: Option<ByteBuf>,
}

impl From<&ChannelBlob> for BlobWire {
    fn from(c: &ChannelBlob) -> Self {
        let payload = Some(ByteBuf::from(c.payload.clone()));
        let (dt, a) = match c.kind {
            ChannelKind::Dt => (payload, None),
            _ => (None, payload),
        };
        Self {
            type_tag: c.kind.type_tag().to_string(),
            id: c.id.clone(),
            idx: c.part_index,
            parts: c.part_count,
            dt,
            a,
        }
    }
}

/// ISO-8601 UTC with microseconds, e.g. `2023-11-14T22:13:20.123456Z`
pub fn iso8601_utc_us(epoch_us: u64) -> String {
    let secs = (epoch_us / US_PER_SECOND) as i64;
    let micros = (epoch_us % US_PER_SECOND) as u32;
    match Utc.timestamp_opt(secs, micros * 1000).single() {
        Some(t) => t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        None => format!("@{}.{:06}Z", secs, micros),
    }
}

/// Device-level fields stamped on every meta message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEncoder {
    device_id: String,
    address: String,
    time_valid: bool,
}

impl FrameEncoder {
    pub fn new(device_id: impl Into<String>, address: impl Into<String>, time_valid: bool) -> Self {
        Self {
            device_id: device_id.into(),
            address: address.into(),
            time_valid,
        }
    }

    /// Frame a burst as the five messages `meta, dt, x, y, z`
    ///
    /// All timestamps come from `burst.t0_wall_us()`, never from the time of
    /// sending.
    pub fn encode(&self, burst: &SampleBurst, identity: &RunIdentity, config: &BurstConfig) -> Vec<PublishMessage> {
        let t0 = burst.t0_wall_us();
        let mut messages = Vec::with_capacity(1 + ChannelKind::ALL.len());

        messages.push(PublishMessage::Meta(MetaMessage {
            id: identity.as_str().to_string(),
            device: self.device_id.clone(),
            address: self.address.clone(),
            time_valid: self.time_valid,
            epoch_s: t0 / US_PER_SECOND,
            iso: iso8601_utc_us(t0),
            t0_wall_us: t0,
            sample_count: config.sample_count,
            target_rate_hz: config.target_rate_hz,
            dt_format: DT_FORMAT.to_string(),
            axis_format: AXIS_FORMAT.to_string(),
        }));

        for kind in ChannelKind::ALL {
            let payload = match kind {
                ChannelKind::Dt => pack_u16_le(burst.inter_sample_us()),
                ChannelKind::X => pack_i16_le(burst.accel_x_mg()),
                ChannelKind::Y => pack_i16_le(burst.accel_y_mg()),
                ChannelKind::Z => pack_i16_le(burst.accel_z_mg()),
            };
            messages.push(PublishMessage::Channel(ChannelBlob {
                kind,
                id: identity.as_str().to_string(),
                part_index: 0,
                part_count: PARTS_PER_CHANNEL,
                payload,
            }));
        }

        messages
    }
}

/// A burst rebuilt from received messages
#[derive(Debug, Clone)]
pub struct DecodedRun {
    pub meta: MetaMessage,
    pub burst: SampleBurst,
}

/// Messages of a run that never became a complete burst
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteRun {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct PendingRun {
    id: String,
    meta: Option<MetaMessage>,
    channels: Vec<(ChannelKind, Vec<Option<Vec<u8>>>)>,
}

impl PendingRun {
    fn add_part(&mut self, blob: ChannelBlob) {
        let count = usize::from(blob.part_count.max(1));
        let slot = match self.channels.iter().position(|(k, _)| *k == blob.kind) {
            Some(i) => i,
            None => {
                self.channels.push((blob.kind, vec![None; count]));
                self.channels.len() - 1
            }
        };
        let parts = &mut self.channels[slot].1;
        if parts.len() < count {
            parts.resize(count, None);
        }
        let index = usize::from(blob.part_index);
        if index < parts.len() {
            parts[index] = Some(blob.payload);
        }
    }

    fn channel_bytes(&self, kind: ChannelKind) -> Result<Vec<u8>> {
        let (_, parts) = self
            .channels
            .iter()
            .find(|(k, _)| *k == kind)
            .ok_or_else(|| NodeError::Capture(format!("missing {} blob", kind.type_tag())))?;
        let mut out = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            let part = part
                .as_ref()
                .ok_or_else(|| NodeError::Capture(format!("missing {} part {}", kind.type_tag(), i)))?;
            out.extend_from_slice(part);
        }
        Ok(out)
    }

    fn build(self) -> Result<DecodedRun> {
        let meta = self
            .meta
            .clone()
            .ok_or_else(|| NodeError::Capture("missing meta message".to_string()))?;
        let dt = unpack_u16_le(&self.channel_bytes(ChannelKind::Dt)?)?;
        let x = unpack_i16_le(&self.channel_bytes(ChannelKind::X)?)?;
        let y = unpack_i16_le(&self.channel_bytes(ChannelKind::Y)?)?;
        let z = unpack_i16_le(&self.channel_bytes(ChannelKind::Z)?)?;
        if x.len() != usize::from(meta.sample_count) {
            return Err(NodeError::Capture(format!(
                "meta announces {} samples, blobs carry {}",
                meta.sample_count,
                x.len()
            )));
        }
        let burst = SampleBurst::from_parts(meta.t0_wall_us, x, y, z, dt)?;
        Ok(DecodedRun { meta, burst })
    }
}

/// Regroups received messages into bursts by run identity
#[derive(Debug, Default)]
pub struct RunAssembler {
    pending: Vec<PendingRun>,
}

impl RunAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: PublishMessage) {
        let id = message.id().to_string();
        let run = match self.pending.iter().position(|r| r.id == id) {
            Some(i) => &mut self.pending[i],
            None => {
                self.pending.push(PendingRun {
                    id,
                    ..PendingRun::default()
                });
                let last = self.pending.len() - 1;
                &mut self.pending[last]
            }
        };
        match message {
            PublishMessage::Meta(meta) => run.meta = Some(meta),
            PublishMessage::Channel(blob) => run.add_part(blob),
        }
    }

    /// Complete runs in arrival order, plus the ones that could not be rebuilt
    pub fn finish(self) -> (Vec<DecodedRun>, Vec<IncompleteRun>) {
        let mut complete = Vec::new();
        let mut incomplete = Vec::new();
        for run in self.pending {
            let id = run.id.clone();
            match run.build() {
                Ok(decoded) => complete.push(decoded),
                Err(e) => incomplete.push(IncompleteRun {
                    id,
                    reason: e.to_string(),
                }),
            }
        }
        (complete, incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_123_456;

    fn sample_burst() -> SampleBurst {
        SampleBurst::from_parts(
            T0,
            vec![1, -1, 32767, -32768],
            vec![0, 10, 20, 30],
            vec![1000, 1001, 999, 1000],
            vec![1000, 65535, 0],
        )
        .unwrap()
    }

    fn encode() -> Vec<PublishMessage> {
        let encoder = FrameEncoder::new("node-a", "192.168.1.20", true);
        let identity = RunIdentity::derive("node-a", T0);
        encoder.encode(&sample_burst(), &identity, &BurstConfig::new(4, 1000, 9.0))
    }

    #[test]
    fn test_run_identity() {
        let id = RunIdentity::derive("node-a", T0);
        assert_eq!(id.as_str(), format!("node-a-{}", T0 & 0xFFFF_FFFF));
        assert_eq!(RunIdentity::derive("n", 0x1_0000_0005).as_str(), "n-5");
    }

    #[test]
    fn test_iso_from_t0() {
        assert_eq!(iso8601_utc_us(T0), "2023-11-14T22:13:20.123456Z");
        assert_eq!(iso8601_utc_us(0), "1970-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_five_messages_in_order() {
        let messages = encode();
        let tags: Vec<&str> = messages.iter().map(|m| m.type_tag()).collect();
        assert_eq!(tags, vec!["meta", "dt", "x", "y", "z"]);
        let first = messages[0].id().to_string();
        assert!(messages.iter().all(|m| m.id() == first));
    }

    #[test]
    fn test_meta_fields_come_from_t0() {
        let messages = encode();
        let PublishMessage::Meta(meta) = &messages[0] else {
            panic!("first message is not meta");
        };
        assert_eq!(meta.epoch_s, 1_700_000_000);
        assert_eq!(meta.t0_wall_us, T0);
        assert_eq!(meta.iso, "2023-11-14T22:13:20.123456Z");
        assert_eq!(meta.sample_count, 4);
        assert_eq!(meta.target_rate_hz, 1000);
        assert_eq!(meta.dt_format, "u16le_us");
        assert_eq!(meta.axis_format, "i16le_mg");
        assert!(meta.time_valid);
        assert_eq!(meta.address, "192.168.1.20");
    }

    #[test]
    fn test_blob_payloads() {
        let messages = encode();
        let PublishMessage::Channel(dt) = &messages[1] else {
            panic!("second message is not a blob");
        };
        assert_eq!(dt.payload.len(), 3 * 2);
        assert_eq!(dt.payload, vec![0xE8, 0x03, 0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!((dt.part_index, dt.part_count), (0, 1));

        let PublishMessage::Channel(x) = &messages[2] else {
            panic!("third message is not a blob");
        };
        assert_eq!(x.payload, vec![0x01, 0x00, 0xFF, 0xFF, 0xFF, 0x7F, 0x00, 0x80]);
    }

    fn map_keys(bytes: &[u8]) -> Vec<String> {
        let value: ciborium::Value = from_cbor(bytes).unwrap();
        let ciborium::Value::Map(entries) = value else {
            panic!("message is not a map");
        };
        entries
            .into_iter()
            .map(|(k, _)| match k {
                ciborium::Value::Text(k) => k,
                other => panic!("non-text key {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_wire_shape() {
        let messages = encode();
        let meta_bytes = messages[0].to_bytes().unwrap();
        assert_eq!(meta_bytes[0], 0xAC); // map of 12
        assert_eq!(
            map_keys(&meta_bytes),
            vec!["type", "id", "dev", "ip", "ntp", "epoch_s", "iso", "t0_us", "n", "fs", "dt_fmt", "a_fmt"]
        );

        let dt_bytes = messages[1].to_bytes().unwrap();
        assert_eq!(dt_bytes[0], 0xA5); // map of 5
        assert_eq!(map_keys(&dt_bytes), vec!["type", "id", "idx", "parts", "dt"]);

        let blob_bytes = messages[2].to_bytes().unwrap();
        assert_eq!(blob_bytes[0], 0xA5);
        assert_eq!(map_keys(&blob_bytes), vec!["type", "id", "idx", "parts", "a"]);
    }

    #[test]
    fn test_payload_is_a_byte_string() {
        let messages = encode();
        let value: ciborium::Value = from_cbor(&messages[2].to_bytes().unwrap()).unwrap();
        let ciborium::Value::Map(entries) = value else {
            panic!("message is not a map");
        };
        assert_eq!(
            entries[4].1,
            ciborium::Value::Bytes(vec![0x01, 0x00, 0xFF, 0xFF, 0xFF, 0x7F, 0x00, 0x80])
        );
        assert_eq!(entries[2].1, ciborium::Value::Integer(0.into()));
    }

    #[test]
    fn test_decode_matches_encode() {
        for message in encode() {
            let decoded = PublishMessage::decode(&message.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let map = ciborium::Value::Map(vec![(
            ciborium::Value::Text("type".to_string()),
            ciborium::Value::Text("gyro".to_string()),
        )]);
        let err = PublishMessage::decode(&to_cbor(&map).unwrap()).unwrap_err();
        assert_eq!(err, CodecError::UnknownType("gyro".to_string()));
    }

    #[test]
    fn test_decode_blob_without_payload() {
        let map = ciborium::Value::Map(vec![
            (ciborium::Value::Text("type".to_string()), ciborium::Value::Text("x".to_string())),
            (ciborium::Value::Text("id".to_string()), ciborium::Value::Text("n-1".to_string())),
            (ciborium::Value::Text("idx".to_string()), ciborium::Value::Integer(0.into())),
            (ciborium::Value::Text("parts".to_string()), ciborium::Value::Integer(1.into())),
        ]);
        let err = PublishMessage::decode(&to_cbor(&map).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(ref m) if m.contains("'a'")), "{:?}", err);
    }

    #[test]
    fn test_assembler_rebuilds_burst() {
        let mut assembler = RunAssembler::new();
        for message in encode() {
            assembler.push(message);
        }
        let (complete, incomplete) = assembler.finish();
        assert!(incomplete.is_empty());
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].burst, sample_burst());
    }

    #[test]
    fn test_assembler_reports_partial_run() {
        let mut assembler = RunAssembler::new();
        for (i, message) in encode().into_iter().enumerate() {
            if i != 1 {
                assembler.push(message);
            }
        }
        let (complete, incomplete) = assembler.finish();
        assert!(complete.is_empty());
        assert_eq!(incomplete.len(), 1);
        assert!(incomplete[0].reason.contains("dt"));
    }

    #[test]
    fn test_assembler_joins_parts() {
        let id = "n-1".to_string();
        let mut assembler = RunAssembler::new();
        let meta = match &encode()[0] {
            PublishMessage::Meta(m) => MetaMessage {
                id: id.clone(),
                sample_count: 2,
                ..m.clone()
            },
            PublishMessage::Channel(_) => unreachable!(),
        };
        assembler.push(PublishMessage::Meta(meta));
        let blob = |kind, part_index, payload: Vec<u8>| {
            PublishMessage::Channel(ChannelBlob {
                kind,
                id: id.clone(),
                part_index,
                part_count: 2,
                payload,
            })
        };
        // Parts arrive out of order.
        assembler.push(blob(ChannelKind::X, 1, vec![0x02, 0x00]));
        assembler.push(blob(ChannelKind::X, 0, vec![0x01, 0x00]));
        assembler.push(blob(ChannelKind::Y, 0, vec![0x03, 0x00]));
        assembler.push(blob(ChannelKind::Y, 1, vec![0x04, 0x00]));
        assembler.push(blob(ChannelKind::Z, 0, vec![0x05, 0x00]));
        assembler.push(blob(ChannelKind::Z, 1, vec![0x06, 0x00]));
        assembler.push(blob(ChannelKind::Dt, 0, vec![0xE8, 0x03]));
        assembler.push(blob(ChannelKind::Dt, 1, vec![]));

        let (complete, incomplete) = assembler.finish();
        assert!(incomplete.is_empty(), "{:?}", incomplete);
        assert_eq!(complete[0].burst.accel_x_mg(), &[1, 2]);
        assert_eq!(complete[0].burst.accel_z_mg(), &[5, 6]);
        assert_eq!(complete[0].burst.inter_sample_us(), &[1000]);
    }
}
