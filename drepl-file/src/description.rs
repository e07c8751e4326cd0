//! The JSON description document.
//!
//! A document names the dataset's variables and their types, the views that lay those variables
//! out, and the replicas that store the materialized views:
//!
//! ```json
//! {
//!   "constants": { "N": 4 },
//!   "dataset": {
//!     "variables": [
//!       { "name": "points", "dtype": { "array": { "dims": ["N"], "element": {
//!         "struct": { "fields": [{ "name": "x", "dtype": "int32" },
//!                                { "name": "y", "dtype": "int32" }] } } } } }
//!     ]
//!   },
//!   "views": [
//!     { "name": "aos", "default": true, "variables": [{ "name": "points" }] },
//!     { "name": "soa", "variables": [
//!       { "name": "xs", "of": "points", "layout": { "array": { "element": {
//!         "struct": { "fields": [{ "name": "x" }] } } } } },
//!       { "name": "ys", "of": "points", "layout": { "array": { "element": {
//!         "struct": { "fields": [{ "name": "y" }] } } } } }
//!     ] }
//!   ],
//!   "replicas": [{ "name": "main", "file": "main.bin", "views": ["aos"] }]
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use drepl_dtype::PType;
use drepl_error::{DreplResult, drepl_err};
use drepl_graph::{ElementOrder, ReplicationOptions};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Description {
    /// Named integers usable as extents and in index expressions.
    #[serde(default)]
    pub constants: BTreeMap<String, i64>,
    pub dataset: DatasetDesc,
    #[serde(default)]
    pub views: Vec<ViewDesc>,
    #[serde(default)]
    pub replicas: Vec<ReplicaDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ReplicationOptions>,
}

impl Description {
    pub fn from_json(json: &str) -> DreplResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> DreplResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            drepl_err!(IOError: e).with_context(format!("reading {}", path.display()))
        })?;
        Self::from_json(&json).map_err(|e| e.with_context(format!("parsing {}", path.display())))
    }

    pub fn to_json(&self) -> DreplResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDesc> {
        self.dataset.variables.iter().find(|v| v.name == name)
    }

    pub fn view(&self, name: &str) -> Option<&ViewDesc> {
        self.views.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetDesc {
    pub variables: Vec<VariableDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDesc {
    pub name: String,
    pub dtype: DTypeDesc,
}

/// A dataset type: a primitive name such as `"int32"`, or one of the compound forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DTypeDesc {
    Primitive(PType),
    Compound(CompoundDesc),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundDesc {
    Array(ArrayDesc),
    Struct(StructDesc),
    /// A fixed-length string, stored as one more signed byte than its length.
    String(Extent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrayDesc {
    pub dims: Vec<Extent>,
    pub element: Box<DTypeDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructDesc {
    pub fields: Vec<FieldDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDesc {
    pub name: String,
    pub dtype: DTypeDesc,
}

/// An array extent, either literal or the name of a constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extent {
    Literal(u64),
    Named(String),
}

impl Display for Extent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Extent::Literal(n) => write!(f, "{n}"),
            Extent::Named(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewDesc {
    pub name: String,
    #[serde(default)]
    pub order: ElementOrder,
    #[serde(default)]
    pub readonly: bool,
    /// Unmaterialized views read from the view marked default.
    #[serde(default)]
    pub default: bool,
    pub variables: Vec<ViewVariableDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewVariableDesc {
    /// Name within the view.
    pub name: String,
    /// The dataset variable, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub of: Option<String>,
    /// Omitted when the view lays the variable out exactly as its dataset type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutDesc>,
}

impl ViewVariableDesc {
    pub fn variable(&self) -> &str {
        self.of.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutDesc {
    Array(ArrayLayoutDesc),
    Struct(StructLayoutDesc),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrayLayoutDesc {
    /// Defaults to the dataset extents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<Vec<Extent>>,
    /// `index[n]` gives dataset index `n` in terms of `v0, v1, ...`; defaults to `vn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<LayoutDesc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructLayoutDesc {
    pub fields: Vec<FieldLayoutDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldLayoutDesc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaDesc {
    pub name: String,
    /// Backing file, relative to the document.
    pub file: PathBuf,
    /// Hosted views, in storage order.
    pub views: Vec<String>,
}
