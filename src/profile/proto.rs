// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decoder for the pprof protobuf format.
//!
//! The message layout follows `profile.proto` from the pprof project. Only
//! the fields this crate reads are declared; prost skips the rest.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use prost::Message;
use thiserror::Error;

use super::{Function, Line, Location, Mapping, Profile, Sample, ValueType};

/// Why a profile could not be decoded.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// Corrupt gzip stream.
    #[error("gzip error: {0}")]
    Gzip(#[from] std::io::Error),
    /// Corrupt protobuf message.
    #[error("protobuf error: {0}")]
    Protobuf(#[from] prost::DecodeError),
    /// Well-formed protobuf with inconsistent contents, e.g. a dangling id.
    #[error("malformed profile: {0}")]
    Malformed(String),
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ProfileProto {
    #[prost(message, repeated, tag = "1")]
    pub sample_type: Vec<ValueTypeProto>,
    #[prost(message, repeated, tag = "2")]
    pub sample: Vec<SampleProto>,
    #[prost(message, repeated, tag = "3")]
    pub mapping: Vec<MappingProto>,
    #[prost(message, repeated, tag = "4")]
    pub location: Vec<LocationProto>,
    #[prost(message, repeated, tag = "5")]
    pub function: Vec<FunctionProto>,
    #[prost(string, repeated, tag = "6")]
    pub string_table: Vec<String>,
    #[prost(int64, tag = "9")]
    pub time_nanos: i64,
    #[prost(int64, tag = "10")]
    pub duration_nanos: i64,
    #[prost(message, optional, tag = "11")]
    pub period_type: Option<ValueTypeProto>,
    #[prost(int64, tag = "12")]
    pub period: i64,
    #[prost(int64, repeated, tag = "13")]
    pub comment: Vec<i64>,
    #[prost(int64, tag = "14")]
    pub default_sample_type: i64,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ValueTypeProto {
    #[prost(int64, tag = "1")]
    pub r#type: i64,
    #[prost(int64, tag = "2")]
    pub unit: i64,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct SampleProto {
    #[prost(uint64, repeated, tag = "1")]
    pub location_id: Vec<u64>,
    #[prost(int64, repeated, tag = "2")]
    pub value: Vec<i64>,
    #[prost(message, repeated, tag = "3")]
    pub label: Vec<LabelProto>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct LabelProto {
    #[prost(int64, tag = "1")]
    pub key: i64,
    #[prost(int64, tag = "2")]
    pub str: i64,
    #[prost(int64, tag = "3")]
    pub num: i64,
    #[prost(int64, tag = "4")]
    pub num_unit: i64,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct MappingProto {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub memory_start: u64,
    #[prost(uint64, tag = "3")]
    pub memory_limit: u64,
    #[prost(uint64, tag = "4")]
    pub file_offset: u64,
    #[prost(int64, tag = "5")]
    pub filename: i64,
    #[prost(int64, tag = "6")]
    pub build_id: i64,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct LocationProto {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub mapping_id: u64,
    #[prost(uint64, tag = "3")]
    pub address: u64,
    #[prost(message, repeated, tag = "4")]
    pub line: Vec<LineProto>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct LineProto {
    #[prost(uint64, tag = "1")]
    pub function_id: u64,
    #[prost(int64, tag = "2")]
    pub line: i64,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct FunctionProto {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(int64, tag = "2")]
    pub name: i64,
    #[prost(int64, tag = "3")]
    pub system_name: i64,
    #[prost(int64, tag = "4")]
    pub filename: i64,
    #[prost(int64, tag = "5")]
    pub start_line: i64,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decodes a profile, gunzipping it first if needed.
pub fn decode(data: &[u8]) -> Result<Profile, DecodeError> {
    let proto = if data.starts_with(&GZIP_MAGIC) {
        let mut raw = Vec::new();
        GzDecoder::new(data).read_to_end(&mut raw)?;
        ProfileProto::decode(raw.as_slice())?
    } else {
        ProfileProto::decode(data)?
    };
    from_proto(proto)
}

fn malformed(msg: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(msg.into())
}

struct Strings(Vec<String>);

impl Strings {
    fn get(&self, index: i64) -> Result<String, DecodeError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.0.get(i))
            .cloned()
            .ok_or_else(|| malformed(format!("string index {index} out of range")))
    }

    fn value_type(&self, vt: &ValueTypeProto) -> Result<ValueType, DecodeError> {
        Ok(ValueType {
            r#type: self.get(vt.r#type)?,
            unit: self.get(vt.unit)?,
        })
    }
}

fn from_proto(proto: ProfileProto) -> Result<Profile, DecodeError> {
    if proto.string_table.first().map(String::as_str) != Some("") {
        return Err(malformed("string table must start with an empty string"));
    }
    let strings = Strings(proto.string_table);

    let sample_types = proto
        .sample_type
        .iter()
        .map(|vt| strings.value_type(vt))
        .collect::<Result<Vec<_>, _>>()?;

    let mut mapping_index = HashMap::new();
    let mut mappings = Vec::with_capacity(proto.mapping.len());
    for m in &proto.mapping {
        if m.id == 0 || mapping_index.insert(m.id, mappings.len()).is_some() {
            return Err(malformed(format!("invalid or duplicate mapping id {}", m.id)));
        }
        mappings.push(Mapping {
            id: m.id,
            start: m.memory_start,
            limit: m.memory_limit,
            offset: m.file_offset,
            file: strings.get(m.filename)?,
            build_id: strings.get(m.build_id)?,
        });
    }

    let mut function_index = HashMap::new();
    let mut functions = Vec::with_capacity(proto.function.len());
    for f in &proto.function {
        if f.id == 0 || function_index.insert(f.id, functions.len()).is_some() {
            return Err(malformed(format!("invalid or duplicate function id {}", f.id)));
        }
        functions.push(Function {
            id: f.id,
            name: strings.get(f.name)?,
            system_name: strings.get(f.system_name)?,
            filename: strings.get(f.filename)?,
            start_line: f.start_line,
        });
    }

    let mut location_index = HashMap::new();
    let mut locations = Vec::with_capacity(proto.location.len());
    for l in &proto.location {
        if l.id == 0 || location_index.insert(l.id, locations.len()).is_some() {
            return Err(malformed(format!("invalid or duplicate location id {}", l.id)));
        }
        let mapping = match l.mapping_id {
            0 => None,
            id => Some(
                *mapping_index
                    .get(&id)
                    .ok_or_else(|| malformed(format!("location {} has unknown mapping {id}", l.id)))?,
            ),
        };
        let lines = l
            .line
            .iter()
            .map(|line| {
                let function = match line.function_id {
                    0 => None,
                    id => Some(*function_index.get(&id).ok_or_else(|| {
                        malformed(format!("location {} has unknown function {id}", l.id))
                    })?),
                };
                Ok(Line {
                    function,
                    line: line.line,
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;
        locations.push(Location {
            id: l.id,
            mapping,
            address: l.address,
            lines,
        });
    }

    let mut samples = Vec::with_capacity(proto.sample.len());
    for s in proto.sample {
        if s.value.len() != sample_types.len() {
            return Err(malformed(format!(
                "sample has {} values, expected {}",
                s.value.len(),
                sample_types.len()
            )));
        }
        let locations = s
            .location_id
            .iter()
            .map(|id| {
                location_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| malformed(format!("sample references unknown location {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut sample = Sample {
            locations,
            values: s.value,
            ..Default::default()
        };
        for label in &s.label {
            let key = strings.get(label.key)?;
            if label.str != 0 {
                sample
                    .labels
                    .entry(key)
                    .or_default()
                    .push(strings.get(label.str)?);
            } else {
                sample.num_labels.entry(key.clone()).or_default().push(label.num);
                sample
                    .num_units
                    .entry(key)
                    .or_default()
                    .push(strings.get(label.num_unit)?);
            }
        }
        samples.push(sample);
    }

    Ok(Profile {
        sample_types,
        samples,
        locations,
        functions,
        mappings,
        default_sample_type: strings.get(proto.default_sample_type)?,
        comments: proto
            .comment
            .iter()
            .map(|&c| strings.get(c))
            .collect::<Result<_, _>>()?,
        period_type: proto
            .period_type
            .as_ref()
            .map(|vt| strings.value_type(vt))
            .transpose()?,
        period: proto.period,
        time_nanos: proto.time_nanos,
        duration_nanos: proto.duration_nanos,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    use super::*;
    use crate::profile::fixture::ProfileBuilder;

    fn two_frame_builder() -> ProfileBuilder {
        let mut b = ProfileBuilder::new(&[("samples", "count"), ("cpu", "nanoseconds")]);
        b.mapping("/bin/app");
        let main = b.function("main.main", "main.go");
        let work = b.function("main.work", "work.go");
        let l1 = b.location(0x1000, &[(work, 12)]);
        let l2 = b.location(0x2000, &[(main, 5)]);
        b.sample(&[l1, l2], &[1, 10_000_000]).label("thread", "worker-1");
        b
    }

    #[test]
    fn test_decode_plain() {
        let p = decode(&two_frame_builder().encode()).unwrap();
        assert_eq!(p.sample_types.len(), 2);
        assert_eq!(p.sample_types[1].r#type, "cpu");
        assert_eq!(p.samples.len(), 1);
        let sample = &p.samples[0];
        assert_eq!(sample.values, vec![1, 10_000_000]);
        assert_eq!(sample.labels["thread"], vec!["worker-1".to_owned()]);
        let leaf = &p.locations[sample.locations[0]];
        assert_eq!(leaf.address, 0x1000);
        assert_eq!(p.function(&leaf.lines[0]).unwrap().name, "main.work");
        assert_eq!(p.mapping(leaf).unwrap().file, "/bin/app");
    }

    #[test]
    fn test_decode_gzip() {
        let raw = two_frame_builder().encode();
        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(&raw).unwrap();
        let gz = gz.finish().unwrap();
        assert_eq!(decode(&gz).unwrap(), decode(&raw).unwrap());
    }

    #[test]
    fn test_decode_bad_string_index() {
        let mut proto = two_frame_builder().build();
        proto.function[0].name = 999;
        let err = decode(&proto.encode_to_vec()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)), "{err}");
    }

    #[test]
    fn test_decode_unknown_location() {
        let mut proto = two_frame_builder().build();
        proto.sample[0].location_id.push(42);
        let err = decode(&proto.encode_to_vec()).unwrap_err();
        assert!(err.to_string().contains("unknown location 42"), "{err}");
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode(b"\xff\xff\xff\xff").is_err());
    }
}
