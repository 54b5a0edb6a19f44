// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sample filters: focus/ignore/hide/show on frame names, show_from, and
//! label based tag filters.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use super::{Location, Profile, Sample};

/// Which name filters matched at least one location.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NameMatches {
    /// `focus` matched.
    pub focus: bool,
    /// `ignore` matched.
    pub ignore: bool,
    /// `hide` matched.
    pub hide: bool,
    /// `show` or `show_from` matched.
    pub show: bool,
}

impl Profile {
    fn location_matches(&self, loc: &Location, re: &Regex) -> bool {
        let by_line = loc.lines.iter().any(|line| {
            self.function(line)
                .is_some_and(|f| re.is_match(&f.name) || re.is_match(&f.filename))
        });
        by_line || self.mapping(loc).is_some_and(|m| re.is_match(&m.file))
    }

    fn line_matches(&self, line: &super::Line, re: &Regex) -> bool {
        self.function(line)
            .is_some_and(|f| re.is_match(&f.name) || re.is_match(&f.filename))
    }

    /// Keeps samples with a location matching `focus` and none matching
    /// `ignore`; removes frames matching `hide`, and frames not matching
    /// `show`.
    pub fn filter_samples_by_name(
        &mut self,
        focus: Option<&Regex>,
        ignore: Option<&Regex>,
        hide: Option<&Regex>,
        show: Option<&Regex>,
    ) -> NameMatches {
        let mut matches = NameMatches::default();
        let mut focus_or_ignore: HashMap<usize, bool> = HashMap::new();
        let mut hidden: HashSet<usize> = HashSet::new();

        for i in 0..self.locations.len() {
            let loc = &self.locations[i];
            if ignore.is_some_and(|re| self.location_matches(loc, re)) {
                matches.ignore = true;
                focus_or_ignore.insert(i, false);
            } else if focus.map_or(true, |re| self.location_matches(loc, re)) {
                matches.focus = true;
                focus_or_ignore.insert(i, true);
            }

            let mut lines = loc.lines.clone();
            if let Some(re) = hide {
                if self.location_matches(loc, re) {
                    matches.hide = true;
                    lines.retain(|l| !self.line_matches(l, re));
                    if lines.is_empty() {
                        hidden.insert(i);
                    }
                }
            }
            if let Some(re) = show {
                lines.retain(|l| self.line_matches(l, re));
                if lines.is_empty() {
                    hidden.insert(i);
                } else {
                    matches.show = true;
                }
            }
            self.locations[i].lines = lines;
        }

        self.samples.retain_mut(|sample| {
            if !focused_and_not_ignored(&sample.locations, &focus_or_ignore) {
                return false;
            }
            if !hidden.is_empty() {
                sample.locations.retain(|l| !hidden.contains(l));
            }
            !sample.locations.is_empty()
        });
        matches
    }

    /// Drops every frame above the outermost frame matching `show_from`,
    /// and samples with no matching frame at all.
    pub fn show_from(&mut self, show_from: &Regex) -> bool {
        let mut matched_locations = HashSet::new();
        for i in 0..self.locations.len() {
            let loc = &self.locations[i];
            if self.mapping(loc).is_some_and(|m| show_from.is_match(&m.file)) {
                matched_locations.insert(i);
                continue;
            }
            // lines are innermost first, so the last match is the outermost
            let last = loc
                .lines
                .iter()
                .rposition(|l| self.line_matches(l, show_from));
            if let Some(last) = last {
                self.locations[i].lines.truncate(last + 1);
                matched_locations.insert(i);
            }
        }

        self.samples.retain_mut(|sample| {
            match sample
                .locations
                .iter()
                .rposition(|l| matched_locations.contains(l))
            {
                Some(i) => {
                    sample.locations.truncate(i + 1);
                    true
                }
                None => false,
            }
        });
        !matched_locations.is_empty()
    }

    /// Keeps samples accepted by `focus` (if any) and not rejected by
    /// `ignore` (if any). Returns whether each filter matched anything.
    pub fn filter_samples_by_tag(
        &mut self,
        focus: Option<&TagFilter>,
        ignore: Option<&TagFilter>,
    ) -> (bool, bool) {
        let (mut focus_matched, mut ignore_matched) = (false, false);
        self.samples.retain(|s| {
            let focused = focus.map_or(true, |f| f.matches(s));
            let ignored = ignore.is_some_and(|f| f.matches(s));
            focus_matched |= focused;
            ignore_matched |= ignored;
            focused && !ignored
        });
        (focus_matched, ignore_matched)
    }
}

fn focused_and_not_ignored(locations: &[usize], focus_or_ignore: &HashMap<usize, bool>) -> bool {
    let mut focused = false;
    for loc in locations {
        match focus_or_ignore.get(loc) {
            Some(false) => return false,
            Some(true) => focused = true,
            None => {}
        }
    }
    focused
}

/// A label filter of the form `regex` or `key=regex`.
///
/// String labels are matched by value. Numeric labels are matched against
/// their value followed by the unit of their key, e.g. `512bytes`.
#[derive(Debug, Clone)]
pub struct TagFilter {
    key: Option<String>,
    re: Regex,
    num_units: HashMap<String, String>,
}

impl TagFilter {
    /// Parses `spec`. `num_units` maps numeric label keys to their units.
    pub fn new(
        spec: &str,
        num_units: &std::collections::BTreeMap<String, String>,
    ) -> Result<Self, regex::Error> {
        let (key, pattern) = match spec.split_once('=') {
            Some((key, pattern)) if !key.is_empty() && !key.contains(['(', '[', '|']) => {
                (Some(key.to_owned()), pattern)
            }
            _ => (None, spec),
        };
        Ok(TagFilter {
            key,
            re: Regex::new(pattern)?,
            num_units: num_units.clone().into_iter().collect(),
        })
    }

    /// Whether any label of `sample` matches.
    pub fn matches(&self, sample: &Sample) -> bool {
        let wanted = |k: &str| self.key.as_deref().map_or(true, |want| want == k);
        let by_string = sample
            .labels
            .iter()
            .filter(|(k, _)| wanted(k.as_str()))
            .any(|(_, vals)| vals.iter().any(|v| self.re.is_match(v)));
        by_string
            || sample
                .num_labels
                .iter()
                .filter(|(k, _)| wanted(k.as_str()))
                .any(|(k, vals)| {
                    let unit = self.num_units.get(k).map(String::as_str).unwrap_or("");
                    vals.iter().any(|v| self.re.is_match(&format!("{v}{unit}")))
                })
    }
}
