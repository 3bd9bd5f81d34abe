//! Catalog of statistics views.
//!
//! A [`View`] describes how a statistics view is queried and diffed: which
//! template to render for a given server version, how many leading columns
//! identify a row, and which columns carry cumulative counters.
//! [`configure_views`] resolves the catalog against detected capabilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::query::{Options, TemplateError, format, templates};
use crate::stat::DiffRange;

/// Oldest server version any view supports.
pub const MIN_SERVER_VERSION: i32 = 90400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Databases,
    Activity,
    Replication,
    Tables,
    Indexes,
    Sizes,
    Functions,
    Statements,
    ProgressVacuum,
}

impl ViewKind {
    pub const ALL: [ViewKind; 9] = [
        ViewKind::Databases,
        ViewKind::Activity,
        ViewKind::Replication,
        ViewKind::Tables,
        ViewKind::Indexes,
        ViewKind::Sizes,
        ViewKind::Functions,
        ViewKind::Statements,
        ViewKind::ProgressVacuum,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ViewKind::Databases => "databases",
            ViewKind::Activity => "activity",
            ViewKind::Replication => "replication",
            ViewKind::Tables => "tables",
            ViewKind::Indexes => "indexes",
            ViewKind::Sizes => "sizes",
            ViewKind::Functions => "functions",
            ViewKind::Statements => "statements",
            ViewKind::ProgressVacuum => "progress_vacuum",
        }
    }

    /// Static description of this view.
    pub fn view(self) -> &'static View {
        match self {
            ViewKind::Databases => &DATABASES,
            ViewKind::Activity => &ACTIVITY,
            ViewKind::Replication => &REPLICATION,
            ViewKind::Tables => &TABLES,
            ViewKind::Indexes => &INDEXES,
            ViewKind::Sizes => &SIZES,
            ViewKind::Functions => &FUNCTIONS,
            ViewKind::Statements => &STATEMENTS,
            ViewKind::ProgressVacuum => &PROGRESS_VACUUM,
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ViewKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViewKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = ViewKind::ALL.iter().map(|k| k.name()).collect();
                format!("unknown view '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

/// Template used from `min_version` on.
#[derive(Debug)]
pub struct Variant {
    pub min_version: i32,
    pub template: &'static str,
    pub diff: DiffRange,
}

#[derive(Debug)]
pub struct View {
    pub kind: ViewKind,
    /// Leading columns identifying a row across snapshots.
    pub key_columns: usize,
    /// Column sorted on when the user picks none.
    pub order_column: usize,
    pub order_desc: bool,
    pub requires_pgss: bool,
    /// Newest first.
    pub variants: &'static [Variant],
}

impl View {
    pub fn min_version(&self) -> i32 {
        self.variants
            .last()
            .map_or(i32::MAX, |variant| variant.min_version)
    }

    /// Newest variant supported by `version`.
    pub fn variant(&self, version: i32) -> Option<&'static Variant> {
        self.variants.iter().find(|v| version >= v.min_version)
    }
}

static DATABASES: View = View {
    kind: ViewKind::Databases,
    key_columns: 1,
    order_column: 1,
    order_desc: true,
    requires_pgss: false,
    variants: &[Variant {
        min_version: MIN_SERVER_VERSION,
        template: templates::DATABASES,
        diff: DiffRange::new(1, 15),
    }],
};

static ACTIVITY: View = View {
    kind: ViewKind::Activity,
    key_columns: 1,
    order_column: 0,
    order_desc: true,
    requires_pgss: false,
    variants: &[
        Variant {
            min_version: 100000,
            template: templates::ACTIVITY,
            diff: DiffRange::NONE,
        },
        Variant {
            min_version: 90600,
            template: templates::ACTIVITY_96,
            diff: DiffRange::NONE,
        },
    ],
};

static REPLICATION: View = View {
    kind: ViewKind::Replication,
    key_columns: 1,
    order_column: 0,
    order_desc: true,
    requires_pgss: false,
    variants: &[
        Variant {
            min_version: 100000,
            template: templates::REPLICATION,
            diff: DiffRange::new(6, 1),
        },
        Variant {
            min_version: MIN_SERVER_VERSION,
            template: templates::REPLICATION_95,
            diff: DiffRange::new(6, 1),
        },
    ],
};

static TABLES: View = View {
    kind: ViewKind::Tables,
    key_columns: 1,
    order_column: 1,
    order_desc: true,
    requires_pgss: false,
    variants: &[Variant {
        min_version: MIN_SERVER_VERSION,
        template: templates::TABLES,
        diff: DiffRange::new(1, 14),
    }],
};

static INDEXES: View = View {
    kind: ViewKind::Indexes,
    key_columns: 1,
    order_column: 1,
    order_desc: true,
    requires_pgss: false,
    variants: &[Variant {
        min_version: MIN_SERVER_VERSION,
        template: templates::INDEXES,
        diff: DiffRange::new(1, 5),
    }],
};

static SIZES: View = View {
    kind: ViewKind::Sizes,
    key_columns: 1,
    order_column: 5,
    order_desc: true,
    requires_pgss: false,
    variants: &[Variant {
        min_version: MIN_SERVER_VERSION,
        template: templates::SIZES,
        diff: DiffRange::new(5, 4),
    }],
};

static FUNCTIONS: View = View {
    kind: ViewKind::Functions,
    key_columns: 1,
    order_column: 1,
    order_desc: true,
    requires_pgss: false,
    variants: &[Variant {
        min_version: MIN_SERVER_VERSION,
        template: templates::FUNCTIONS,
        diff: DiffRange::new(1, 3),
    }],
};

static STATEMENTS: View = View {
    kind: ViewKind::Statements,
    key_columns: 1,
    order_column: 3,
    order_desc: true,
    requires_pgss: true,
    variants: &[
        Variant {
            min_version: 170000,
            template: templates::STATEMENTS,
            diff: DiffRange::new(3, 11),
        },
        Variant {
            min_version: 130000,
            template: templates::STATEMENTS_13,
            diff: DiffRange::new(3, 11),
        },
        Variant {
            min_version: MIN_SERVER_VERSION,
            template: templates::STATEMENTS_LEGACY,
            diff: DiffRange::new(3, 8),
        },
    ],
};

static PROGRESS_VACUUM: View = View {
    kind: ViewKind::ProgressVacuum,
    key_columns: 1,
    order_column: 0,
    order_desc: true,
    requires_pgss: false,
    variants: &[Variant {
        min_version: 90600,
        template: templates::PROGRESS_VACUUM,
        diff: DiffRange::new(7, 2),
    }],
};

/// A view resolved against one server: rendered SQL plus diff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredView {
    pub kind: ViewKind,
    /// `None` when the server cannot serve this view.
    pub sql: Option<String>,
    pub key_columns: usize,
    pub diff: DiffRange,
    pub order_column: usize,
    pub order_desc: bool,
}

impl ConfiguredView {
    pub fn is_available(&self) -> bool {
        self.sql.is_some()
    }
}

/// Resolves one view for the given server.
pub fn configure_view(
    kind: ViewKind,
    version: i32,
    pgss_available: bool,
    opts: &Options,
) -> Result<ConfiguredView, TemplateError> {
    let view = kind.view();
    let variant = view
        .variant(version)
        .filter(|_| pgss_available || !view.requires_pgss);

    let (sql, diff) = match variant {
        Some(variant) => (Some(format(variant.template, opts)?), variant.diff),
        None => (None, DiffRange::NONE),
    };

    Ok(ConfiguredView {
        kind,
        sql,
        key_columns: view.key_columns,
        diff,
        order_column: view.order_column,
        order_desc: view.order_desc,
    })
}

/// Resolves the whole catalog, in [`ViewKind::ALL`] order.
pub fn configure_views(
    version: i32,
    pgss_available: bool,
    opts: &Options,
) -> Result<Vec<ConfiguredView>, TemplateError> {
    ViewKind::ALL
        .into_iter()
        .map(|kind| configure_view(kind, version, pgss_available, opts))
        .collect()
}
