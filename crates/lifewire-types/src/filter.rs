//! Read operations and the static configuration of the filtering access layer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::subscription::ParseLabelError;

/// A read operation that can be issued against the access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Fetch an object's body.
    GetObject,
    /// Fetch an object's metadata.
    HeadObject,
    /// List keys (v1 listing).
    ListObjects,
    /// List keys (v2 listing).
    ListObjectsV2,
}

impl OperationKind {
    /// Returns the canonical operation name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetObject => "GetObject",
            Self::HeadObject => "HeadObject",
            Self::ListObjects => "ListObjects",
            Self::ListObjectsV2 => "ListObjectsV2",
        }
    }

    /// Returns `true` for the two listing operations.
    pub fn is_list(self) -> bool {
        matches!(self, Self::ListObjects | Self::ListObjectsV2)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GetObject" => Ok(Self::GetObject),
            "HeadObject" => Ok(Self::HeadObject),
            "ListObjects" => Ok(Self::ListObjects),
            "ListObjectsV2" => Ok(Self::ListObjectsV2),
            _ => Err(ParseLabelError {
                kind: "operation",
                value: s.to_string(),
            }),
        }
    }
}

/// Optional request features the access layer may permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessFeature {
    /// `GetObject` with a byte range.
    #[serde(rename = "GetObject-Range")]
    GetObjectRange,
    /// `GetObject` with a part number.
    #[serde(rename = "GetObject-PartNumber")]
    GetObjectPartNumber,
    /// `HeadObject` with a byte range.
    #[serde(rename = "HeadObject-Range")]
    HeadObjectRange,
    /// `HeadObject` with a part number.
    #[serde(rename = "HeadObject-PartNumber")]
    HeadObjectPartNumber,
}

impl AccessFeature {
    /// Every feature; the default allowance.
    pub const ALL: [AccessFeature; 4] = [
        Self::GetObjectRange,
        Self::GetObjectPartNumber,
        Self::HeadObjectRange,
        Self::HeadObjectPartNumber,
    ];

    /// Returns the canonical feature name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetObjectRange => "GetObject-Range",
            Self::GetObjectPartNumber => "GetObject-PartNumber",
            Self::HeadObjectRange => "HeadObject-Range",
            Self::HeadObjectPartNumber => "HeadObject-PartNumber",
        }
    }

    /// The range feature for `operation`, if ranges apply to it.
    pub fn range_for(operation: OperationKind) -> Option<Self> {
        match operation {
            OperationKind::GetObject => Some(Self::GetObjectRange),
            OperationKind::HeadObject => Some(Self::HeadObjectRange),
            _ => None,
        }
    }

    /// The part-number feature for `operation`, if part numbers apply to it.
    pub fn part_number_for(operation: OperationKind) -> Option<Self> {
        match operation {
            OperationKind::GetObject => Some(Self::GetObjectPartNumber),
            OperationKind::HeadObject => Some(Self::HeadObjectPartNumber),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccessFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of which reads on a location are transformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfiguration {
    /// The location the access layer fronts.
    pub supporting_location: String,
    /// Operations routed through the content filter.
    pub intercepted_operations: BTreeSet<OperationKind>,
    /// Name of the content filter to apply.
    pub transform_ref: String,
    /// Request features callers may use.
    pub allowed_features: BTreeSet<AccessFeature>,
}

impl FilterConfiguration {
    /// Returns `true` if `operation` is routed through the filter.
    pub fn intercepts(&self, operation: OperationKind) -> bool {
        self.intercepted_operations.contains(&operation)
    }

    /// Returns `true` if callers may use `feature`.
    pub fn allows(&self, feature: AccessFeature) -> bool {
        self.allowed_features.contains(&feature)
    }
}
