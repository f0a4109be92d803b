//! Bug descriptors and the vulnerable-object registry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bucket::{BucketClassifier, BucketSize};
use crate::error::{GroomError, Result};
use crate::model::Address;

/// Memory-safety bug classes the engine can groom for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BugKind {
    Overflow,
    Underflow,
    UseAfterFree,
}

impl BugKind {
    pub const ALL: [BugKind; 3] = [Self::Overflow, Self::Underflow, Self::UseAfterFree];

    /// Strict parse of a descriptor's `kind` field.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "overflow" => Ok(Self::Overflow),
            "underflow" => Ok(Self::Underflow),
            "use-after-free" | "use_after_free" | "uaf" => Ok(Self::UseAfterFree),
            _ => Err(GroomError::UnsupportedBugKind(raw.to_string())),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overflow => "overflow",
            Self::Underflow => "underflow",
            Self::UseAfterFree => "use-after-free",
        }
    }
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bug descriptor as supplied by the caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBugDescriptor {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow_size: Option<i64>,
    pub target_size: i64,
}

/// Validated, immutable bug descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugDescriptor {
    pub kind: BugKind,
    /// Bytes written past (or before) the buffer, for overflow/underflow.
    pub overflow_size: Option<usize>,
    pub target_size: usize,
}

impl BugDescriptor {
    pub fn new(kind: BugKind, target_size: usize) -> Result<Self> {
        if target_size == 0 {
            return Err(GroomError::invalid_input("target_size", target_size));
        }
        Ok(Self {
            kind,
            overflow_size: None,
            target_size,
        })
    }

    pub fn with_overflow_size(mut self, overflow_size: usize) -> Result<Self> {
        if overflow_size == 0 {
            return Err(GroomError::invalid_input("overflow_size", overflow_size));
        }
        self.overflow_size = Some(overflow_size);
        Ok(self)
    }

    pub fn parse(raw: &RawBugDescriptor) -> Result<Self> {
        let kind = BugKind::parse(&raw.kind)?;
        let target_size = positive("target_size", raw.target_size)?;
        let descriptor = Self::new(kind, target_size)?;
        match raw.overflow_size {
            Some(size) => descriptor.with_overflow_size(positive("overflow_size", size)?),
            None => Ok(descriptor),
        }
    }
}

fn positive(what: &'static str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| GroomError::invalid_input(what, value))
}

/// Non-negative offset into an object.
pub(crate) fn offset(what: &'static str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| GroomError::invalid_input(what, value))
}

/// Registry entry as supplied by the caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObjectDescriptor {
    #[serde(rename = "type", alias = "object_type")]
    pub object_type: String,
    pub size: i64,
    #[serde(default)]
    pub corruptible_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtable_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtable_address: Option<Address>,
}

/// Registry entry describing one object type's exposure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerableObjectDescriptor {
    #[serde(rename = "type", alias = "object_type")]
    pub object_type: String,
    pub size: usize,
    /// Recomputed with the engine's classifier when a registry is built.
    #[serde(default)]
    pub bucket_size: BucketSize,
    #[serde(default)]
    pub corruptible_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtable_offset: Option<usize>,
    /// Vtable pointer observed in live instances of this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtable_address: Option<Address>,
}

impl VulnerableObjectDescriptor {
    pub fn new(
        object_type: impl Into<String>,
        size: usize,
        classifier: &BucketClassifier,
    ) -> Result<Self> {
        Ok(Self {
            object_type: object_type.into(),
            size,
            bucket_size: classifier.bucket_of(size)?,
            corruptible_fields: Vec::new(),
            vtable_offset: None,
            vtable_address: None,
        })
    }

    /// Validates a raw entry: `size` must be positive, `vtable_offset`
    /// non-negative.
    pub fn parse(raw: &RawObjectDescriptor, classifier: &BucketClassifier) -> Result<Self> {
        if raw.object_type.trim().is_empty() {
            return Err(GroomError::invalid_input("type", "<empty>"));
        }
        let mut object = Self::new(&raw.object_type, positive("size", raw.size)?, classifier)?
            .with_fields(raw.corruptible_fields.iter().cloned());
        object.vtable_offset = raw
            .vtable_offset
            .map(|value| offset("vtable_offset", value))
            .transpose()?;
        object.vtable_address = raw.vtable_address;
        Ok(object)
    }

    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.corruptible_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_vtable_offset(mut self, offset: usize) -> Self {
        self.vtable_offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_vtable_address(mut self, address: Address) -> Self {
        self.vtable_address = Some(address);
        self
    }
}

/// Read-only, ordered registry of vulnerable object types.
///
/// Iteration order is insertion order; entries are assumed distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectRegistry {
    objects: Vec<VulnerableObjectDescriptor>,
}

impl ObjectRegistry {
    /// Builds a registry, recomputing every bucket with `classifier`.
    pub fn new(
        objects: Vec<VulnerableObjectDescriptor>,
        classifier: &BucketClassifier,
    ) -> Result<Self> {
        let objects = objects
            .into_iter()
            .map(|mut object| {
                object.bucket_size = classifier.bucket_of(object.size)?;
                Ok(object)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { objects })
    }

    /// Validates raw entries in order; the first bad entry fails the registry.
    pub fn from_raw(raw: &[RawObjectDescriptor], classifier: &BucketClassifier) -> Result<Self> {
        let objects = raw
            .iter()
            .map(|entry| VulnerableObjectDescriptor::parse(entry, classifier))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { objects })
    }

    /// Parses a JSON array of descriptors.
    pub fn from_json(json: &str, classifier: &BucketClassifier) -> Result<Self> {
        let raw: Vec<RawObjectDescriptor> = serde_json::from_str(json)?;
        Self::from_raw(&raw, classifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VulnerableObjectDescriptor> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Bug kind → eligible object types, in preference order.
///
/// The first entry for a kind is the default payload type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityTable {
    kinds: BTreeMap<BugKind, Vec<String>>,
}

impl EligibilityTable {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn eligible(&self, kind: BugKind) -> &[String] {
        self.kinds.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_eligible(&self, kind: BugKind, object_type: &str) -> bool {
        self.eligible(kind).iter().any(|t| t == object_type)
    }

    /// Default payload type for `kind`.
    pub fn default_payload(&self, kind: BugKind) -> Option<&str> {
        self.eligible(kind).first().map(String::as_str)
    }
}

impl Default for EligibilityTable {
    fn default() -> Self {
        let linear_buffers: Vec<String> = ["ArrayBuffer", "TypedArray", "DataView"]
            .into_iter()
            .map(String::from)
            .collect();
        let reference_holders: Vec<String> = ["JSFunction", "JSObject", "DOMNode"]
            .into_iter()
            .map(String::from)
            .collect();
        let mut kinds = BTreeMap::new();
        kinds.insert(BugKind::Overflow, linear_buffers.clone());
        kinds.insert(BugKind::Underflow, linear_buffers);
        kinds.insert(BugKind::UseAfterFree, reference_holders);
        Self { kinds }
    }
}
