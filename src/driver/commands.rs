// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! View kinds and the parameters each view forces.

use std::fmt;

use thiserror::Error;

use super::vars::{VarError, Variables};

/// The views a snapshot can be rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewKind {
    /// Call graph rendered by the diagram backend.
    Graph,
    /// Flat and cumulative table.
    Top,
    /// Annotated disassembly.
    Disasm,
    /// Annotated source.
    Source,
    /// Callers and callees of matching functions.
    Peek,
    /// Flame graph as JSON.
    FlameGraph,
}

impl ViewKind {
    /// Every view, in menu order.
    pub const ALL: [ViewKind; 6] = [
        ViewKind::Graph,
        ViewKind::Top,
        ViewKind::Disasm,
        ViewKind::Source,
        ViewKind::Peek,
        ViewKind::FlameGraph,
    ];

    /// Route and page name.
    pub fn name(self) -> &'static str {
        match self {
            ViewKind::Graph => "graph",
            ViewKind::Top => "top",
            ViewKind::Disasm => "disasm",
            ViewKind::Source => "source",
            ViewKind::Peek => "peek",
            ViewKind::FlameGraph => "flamegraph",
        }
    }

    /// Whether the view takes a symbol regexp (the `f` query parameter).
    pub fn takes_symbol(self) -> bool {
        matches!(self, ViewKind::Disasm | ViewKind::Source | ViewKind::Peek)
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters a view forces regardless of the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewOverrides {
    /// The view these overrides apply to.
    pub view: ViewKind,
    /// Set on top of the request's values.
    pub presets: &'static [(&'static str, &'static str)],
    /// `Some(false)` disables trimming; `None` honors the `trim` parameter.
    pub trim: Option<bool>,
    /// Whether tag filters from the request apply.
    pub tag_filter: bool,
    /// Whether focus/ignore/hide/show from the request apply.
    pub filter: bool,
    /// Granularity switch forced on, if any.
    pub granularity: Option<&'static str>,
    /// Replaces a `nodecount` of -1.
    pub default_node_count: Option<i64>,
}

const FULL: ViewOverrides = ViewOverrides {
    view: ViewKind::Graph,
    presets: &[],
    trim: None,
    tag_filter: true,
    filter: true,
    granularity: None,
    default_node_count: None,
};

/// One entry per [`ViewKind`]. Checked at startup by [`check_view_overrides`].
pub const VIEW_OVERRIDES: &[ViewOverrides] = &[
    ViewOverrides {
        view: ViewKind::Graph,
        default_node_count: Some(80),
        ..FULL
    },
    ViewOverrides {
        view: ViewKind::Top,
        presets: &[("nodecount", "500")],
        default_node_count: Some(0),
        ..FULL
    },
    ViewOverrides {
        view: ViewKind::Disasm,
        trim: Some(false),
        granularity: Some("addressnoinlines"),
        ..FULL
    },
    ViewOverrides {
        view: ViewKind::Source,
        trim: Some(false),
        granularity: Some("addressnoinlines"),
        ..FULL
    },
    ViewOverrides {
        view: ViewKind::Peek,
        presets: &[("lines", "t")],
        trim: Some(false),
        tag_filter: false,
        filter: false,
        ..FULL
    },
    ViewOverrides {
        view: ViewKind::FlameGraph,
        trim: Some(false),
        ..FULL
    },
];

/// A view is missing from the override table or listed twice.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("view override table lists {view} {count} times, want exactly once")]
pub struct OverrideTableError {
    /// The offending view.
    pub view: ViewKind,
    /// How many entries name it.
    pub count: usize,
}

/// Checks that every view kind has exactly one override entry.
pub fn check_view_overrides() -> Result<(), OverrideTableError> {
    check_table(VIEW_OVERRIDES)
}

fn check_table(table: &[ViewOverrides]) -> Result<(), OverrideTableError> {
    for view in ViewKind::ALL {
        let count = table.iter().filter(|o| o.view == view).count();
        if count != 1 {
            return Err(OverrideTableError { view, count });
        }
    }
    Ok(())
}

/// The override entry for `view`.
pub fn overrides_for(view: ViewKind) -> Option<&'static ViewOverrides> {
    VIEW_OVERRIDES.iter().find(|o| o.view == view)
}

impl ViewOverrides {
    /// Returns `vars` with this view's forced values applied.
    pub fn apply(&self, vars: &Variables) -> Result<Variables, VarError> {
        let mut v = vars.with_overrides(self.presets.iter().copied())?;
        if let Some(granularity) = self.granularity {
            v.set(granularity, "t")?;
        }
        if let Some(n) = self.default_node_count {
            if v.int_value("nodecount") == -1 {
                v.set("nodecount", &n.to_string())?;
            }
        }
        if !self.trim.unwrap_or_else(|| v.bool_value("trim")) {
            v.set("nodecount", "0")?;
            v.set("nodefraction", "0")?;
            v.set("edgefraction", "0")?;
        }
        if !self.tag_filter {
            v.set("tagfocus", "")?;
            v.set("tagignore", "")?;
        }
        if !self.filter {
            for name in ["focus", "ignore", "hide", "show", "show_from"] {
                v.set(name, "")?;
            }
        }
        Ok(v)
    }
}
