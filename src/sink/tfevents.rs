//! TensorBoard event-file records.
//!
//! An event file is a sequence of records, each framed as
//!
//! ```text
//! u64 length (LE) | u32 masked crc32 of length | payload | u32 masked crc32 of payload
//! ```
//!
//! where the payload is a protobuf-encoded `Event`. Only the fields this
//! crate writes are declared; field numbers follow TensorBoard's
//! `event.proto` and `summary.proto`.

use std::io::Write;

use chrono::{DateTime, Utc};
use crc32fast::Hasher as Crc32;
use prost::Message;

use super::{HistogramRecord, StatisticRecord};
use crate::{Error, Result};

/// Version marker written as the first event of every file.
pub const FILE_VERSION: &str = "brain.Event:2";

const HEADER_LEN: usize = 12;
const FOOTER_LEN: usize = 4;

#[derive(Clone, PartialEq, Message)]
pub struct Event {
    #[prost(double, tag = "1")]
    pub wall_time: f64,
    #[prost(int64, tag = "2")]
    pub step: i64,
    #[prost(oneof = "EventKind", tags = "3, 5")]
    pub what: Option<EventKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum EventKind {
    #[prost(string, tag = "3")]
    FileVersion(String),
    #[prost(message, tag = "5")]
    Summary(Summary),
}

#[derive(Clone, PartialEq, Message)]
pub struct Summary {
    #[prost(message, repeated, tag = "1")]
    pub value: Vec<SummaryValue>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SummaryValue {
    #[prost(string, tag = "1")]
    pub tag: String,
    #[prost(oneof = "ValueKind", tags = "2, 5")]
    pub value: Option<ValueKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ValueKind {
    #[prost(float, tag = "2")]
    SimpleValue(f32),
    #[prost(message, tag = "5")]
    Histo(HistogramProto),
}

#[derive(Clone, PartialEq, Message)]
pub struct HistogramProto {
    #[prost(double, tag = "1")]
    pub min: f64,
    #[prost(double, tag = "2")]
    pub max: f64,
    #[prost(double, tag = "3")]
    pub num: f64,
    #[prost(double, tag = "4")]
    pub sum: f64,
    #[prost(double, tag = "5")]
    pub sum_squares: f64,
    #[prost(double, repeated, tag = "6")]
    pub bucket_limit: Vec<f64>,
    #[prost(double, repeated, tag = "7")]
    pub bucket: Vec<f64>,
}

impl Event {
    /// The version event that opens a file.
    pub fn file_version() -> Self {
        Self {
            wall_time: seconds(Utc::now()),
            step: 0,
            what: Some(EventKind::FileVersion(FILE_VERSION.to_string())),
        }
    }

    /// One event per run of consecutive records sharing step and wall time.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_scalars(records: &[StatisticRecord]) -> Vec<Self> {
        let mut events: Vec<Self> = Vec::new();
        for record in records {
            let value = SummaryValue {
                tag: record.tag().to_string(),
                value: Some(ValueKind::SimpleValue(record.value() as f32)),
            };
            let wall_time = seconds(record.wall_time());
            let step = step_to_i64(record.step());
            match events.last_mut() {
                Some(Self {
                    wall_time: w,
                    step: s,
                    what: Some(EventKind::Summary(summary)),
                }) if *s == step && w.to_bits() == wall_time.to_bits() => summary.value.push(value),
                _ => events.push(Self {
                    wall_time,
                    step,
                    what: Some(EventKind::Summary(Summary { value: vec![value] })),
                }),
            }
        }
        events
    }

    /// A single-value histogram event.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_histogram(record: &HistogramRecord) -> Self {
        let histo = HistogramProto {
            min: record.min(),
            max: record.max(),
            num: record.num() as f64,
            sum: record.sum(),
            sum_squares: record.sum_squares(),
            bucket_limit: record.bucket_limits().to_vec(),
            bucket: record.bucket_counts().iter().map(|&c| c as f64).collect(),
        };
        Self {
            wall_time: seconds(record.wall_time()),
            step: step_to_i64(record.step()),
            what: Some(EventKind::Summary(Summary {
                value: vec![SummaryValue {
                    tag: record.tag().to_string(),
                    value: Some(ValueKind::Histo(histo)),
                }],
            })),
        }
    }

    /// Scalar records carried by this event, in order.
    pub fn scalars(&self) -> Vec<StatisticRecord> {
        self.values()
            .iter()
            .filter_map(|v| match &v.value {
                Some(ValueKind::SimpleValue(x)) => Some(
                    StatisticRecord::builder(v.tag.clone(), f64::from(*x), self.step_u64())
                        .wall_time(date_time(self.wall_time))
                        .build(),
                ),
                _ => None,
            })
            .collect()
    }

    /// Histogram records carried by this event, in order.
    pub fn histograms(&self) -> Vec<HistogramRecord> {
        self.values()
            .iter()
            .filter_map(|v| match &v.value {
                Some(ValueKind::Histo(h)) => Some(HistogramRecord::from_distribution(
                    v.tag.clone(),
                    self.step_u64(),
                    date_time(self.wall_time),
                    h,
                )),
                _ => None,
            })
            .collect()
    }

    fn values(&self) -> &[SummaryValue] {
        match &self.what {
            Some(EventKind::Summary(summary)) => &summary.value,
            _ => &[],
        }
    }

    #[allow(clippy::cast_sign_loss)]
    const fn step_u64(&self) -> u64 {
        if self.step < 0 {
            0
        } else {
            self.step as u64
        }
    }
}

/// Append one framed record to `out`.
pub fn write_record(out: &mut impl Write, event: &Event) -> Result<()> {
    let data = event.encode_to_vec();
    let len = (data.len() as u64).to_le_bytes();
    out.write_all(&len)?;
    out.write_all(&masked_crc32(&len).to_le_bytes())?;
    out.write_all(&data)?;
    out.write_all(&masked_crc32(&data).to_le_bytes())?;
    Ok(())
}

/// Decode every record of an event file, checking both checksums.
pub fn read_records(bytes: &[u8]) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let header = bytes
            .get(pos..pos + HEADER_LEN)
            .ok_or_else(|| corrupt(pos, "truncated record header"))?;
        let (len_bytes, len_crc) = header.split_at(8);
        if masked_crc32(len_bytes) != read_u32(len_crc) {
            return Err(corrupt(pos, "length checksum mismatch"));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(len_bytes);
        let len = usize::try_from(u64::from_le_bytes(len))
            .map_err(|_| corrupt(pos, "record length overflows"))?;

        let start = pos + HEADER_LEN;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| corrupt(pos, "truncated record payload"))?;
        let data = &bytes[start..end];
        let footer = bytes
            .get(end..end + FOOTER_LEN)
            .ok_or_else(|| corrupt(pos, "truncated record checksum"))?;
        if masked_crc32(data) != read_u32(footer) {
            return Err(corrupt(pos, "payload checksum mismatch"));
        }

        let event = Event::decode(data)
            .map_err(|e| Error::Serialization(format!("event at byte {pos}: {e}")))?;
        events.push(event);
        pos = end + FOOTER_LEN;
    }
    Ok(events)
}

fn masked_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let crc = hasher.finalize();
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn corrupt(pos: usize, what: &str) -> Error {
    Error::Serialization(format!("{what} at byte {pos}"))
}

fn step_to_i64(step: u64) -> i64 {
    i64::try_from(step).unwrap_or(i64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1e6
}

#[allow(clippy::cast_possible_truncation)]
fn date_time(seconds: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros((seconds * 1e6).round() as i64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(events: &[Event]) -> Vec<u8> {
        let mut buf = Vec::new();
        for event in events {
            write_record(&mut buf, event).unwrap();
        }
        buf
    }

    #[test]
    fn test_masked_crc_known_value() {
        // crc32("") == 0, so the mask alone remains
        assert_eq!(masked_crc32(b""), 0xa282_ead8);
    }

    #[test]
    fn test_scalars_grouped_per_step() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let records = vec![
            StatisticRecord::builder("a", 1.0, 1).wall_time(at).build(),
            StatisticRecord::builder("b", 2.0, 1).wall_time(at).build(),
            StatisticRecord::builder("a", 3.0, 2).wall_time(at).build(),
        ];
        let events = Event::from_scalars(&records);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].scalars().len(), 2);
        assert_eq!(events[1].step, 2);
    }

    #[test]
    fn test_framing_decodes_back() {
        let at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let record = StatisticRecord::builder("w/mean/value", 0.5, 7).wall_time(at).build();
        let histogram = HistogramRecord::from_values("w/value", 7, &[1.0, 2.0, 3.0], 2);

        let mut events = vec![Event::file_version()];
        events.extend(Event::from_scalars(&[record.clone()]));
        events.push(Event::from_histogram(&histogram));

        let decoded = read_records(&encode(&events)).unwrap();
        assert_eq!(decoded, events);
        assert_eq!(decoded[0].what, Some(EventKind::FileVersion(FILE_VERSION.to_string())));
        assert_eq!(decoded[1].scalars(), vec![record]);

        let back = decoded[2].histograms();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].bucket_counts(), histogram.bucket_counts());
        assert_eq!(back[0].num(), 3);
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = encode(&[Event::file_version()]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = read_records(&bytes).unwrap_err();
        assert!(err.to_string().contains("payload checksum mismatch"));

        let truncated = encode(&[Event::file_version()]);
        assert!(read_records(&truncated[..truncated.len() - 2]).is_err());
        assert!(read_records(&[]).unwrap().is_empty());
    }
}
