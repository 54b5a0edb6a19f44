// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Builders for test profiles.

use prost::Message;

use super::proto::{
    FunctionProto, LabelProto, LineProto, LocationProto, MappingProto, ProfileProto, SampleProto,
    ValueTypeProto,
};
use super::Profile;

pub(crate) struct ProfileBuilder {
    proto: ProfileProto,
}

pub(crate) struct SampleRef<'a> {
    builder: &'a mut ProfileBuilder,
    index: usize,
}

impl SampleRef<'_> {
    pub fn label(self, key: &str, value: &str) -> Self {
        let key = self.builder.intern(key);
        let str = self.builder.intern(value);
        self.builder.proto.sample[self.index].label.push(LabelProto {
            key,
            str,
            ..Default::default()
        });
        self
    }

    pub fn num_label(self, key: &str, num: i64, unit: &str) -> Self {
        let key = self.builder.intern(key);
        let num_unit = self.builder.intern(unit);
        self.builder.proto.sample[self.index].label.push(LabelProto {
            key,
            num,
            num_unit,
            ..Default::default()
        });
        self
    }
}

impl ProfileBuilder {
    pub fn new(sample_types: &[(&str, &str)]) -> Self {
        let mut builder = ProfileBuilder {
            proto: ProfileProto {
                string_table: vec![String::new()],
                ..Default::default()
            },
        };
        for (ty, unit) in sample_types {
            let vt = ValueTypeProto {
                r#type: builder.intern(ty),
                unit: builder.intern(unit),
            };
            builder.proto.sample_type.push(vt);
        }
        builder
    }

    fn intern(&mut self, s: &str) -> i64 {
        let table = &mut self.proto.string_table;
        let index = match table.iter().position(|t| t == s) {
            Some(i) => i,
            None => {
                table.push(s.to_owned());
                table.len() - 1
            }
        };
        index as i64
    }

    pub fn mapping(&mut self, file: &str) -> u64 {
        let id = self.proto.mapping.len() as u64 + 1;
        let filename = self.intern(file);
        self.proto.mapping.push(MappingProto {
            id,
            memory_start: 0x400000,
            memory_limit: 0x800000,
            filename,
            ..Default::default()
        });
        id
    }

    pub fn function(&mut self, name: &str, file: &str) -> u64 {
        let id = self.proto.function.len() as u64 + 1;
        let name = self.intern(name);
        let filename = self.intern(file);
        self.proto.function.push(FunctionProto {
            id,
            name,
            system_name: name,
            filename,
            start_line: 1,
        });
        id
    }

    /// Adds a location; `lines` are `(function id, line)` pairs, innermost
    /// first. The location is attached to the first mapping, if any.
    pub fn location(&mut self, address: u64, lines: &[(u64, i64)]) -> u64 {
        let id = self.proto.location.len() as u64 + 1;
        let mapping_id = self.proto.mapping.first().map_or(0, |m| m.id);
        self.proto.location.push(LocationProto {
            id,
            mapping_id,
            address,
            line: lines
                .iter()
                .map(|&(function_id, line)| LineProto { function_id, line })
                .collect(),
        });
        id
    }

    /// Adds a sample; `locations` are location ids, leaf first.
    pub fn sample(&mut self, locations: &[u64], values: &[i64]) -> SampleRef<'_> {
        self.proto.sample.push(SampleProto {
            location_id: locations.to_vec(),
            value: values.to_vec(),
            label: vec![],
        });
        let index = self.proto.sample.len() - 1;
        SampleRef {
            builder: self,
            index,
        }
    }

    pub fn build(self) -> ProfileProto {
        self.proto
    }

    pub fn encode(self) -> Vec<u8> {
        self.proto.encode_to_vec()
    }

    pub fn profile(self) -> Profile {
        super::decode(&self.encode()).expect("fixture profile must decode")
    }
}

/// Three 100ns cpu samples with stacks A→B, A→C and A→B.
pub(crate) fn abc_profile_bytes() -> Vec<u8> {
    let mut b = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
    b.mapping("/usr/bin/abc");
    let a = b.function("A", "abc.go");
    let fb = b.function("B", "abc.go");
    let c = b.function("C", "abc.go");
    let la = b.location(0x401000, &[(a, 10)]);
    let lb = b.location(0x402000, &[(fb, 20)]);
    let lc = b.location(0x403000, &[(c, 30)]);
    b.sample(&[lb, la], &[100]);
    b.sample(&[lc, la], &[100]);
    b.sample(&[lb, la], &[100]);
    b.encode()
}

pub(crate) fn abc_profile() -> Profile {
    super::decode(&abc_profile_bytes()).expect("fixture profile must decode")
}
