//! A corpus of canonical memory defects and the harness that triggers them.
//!
//! Every testcase is a small simulator that performs exactly one kind of
//! invalid memory access (uninitialized read, use-after-return,
//! use-after-free, leak, or out-of-bounds access on static, stack or heap
//! memory). The [`Catalog`] maps stable ids to those simulators, the
//! [`Dispatcher`] runs them one at a time, and the [`Harness`] brackets the
//! whole session with the sanitizer's reporting mode.
//!
//! Running a testcase is supposed to misbehave. Outside a sanitizer build the
//! effects are whatever the hardware and allocator make of them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod config;
pub mod dispatcher;
mod error;
pub mod harness;
pub mod heap;
pub mod sanitizer;
pub mod simulators;

pub use config::HarnessConfig;
pub use dispatcher::Dispatcher;
pub use error::HarnessError;
pub use harness::Harness;
pub use heap::{AccountingHeap, Heap, HeapStats, SystemHeap};
pub use sanitizer::{HostSanitizer, ModeController, ModeState, ReportMode, SanitizerRuntime};
pub use simulators::SimContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    UninitializedRead,
    UseAfterReturn,
    UseAfterFree,
    MemoryLeak,
    OutOfBounds,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::UninitializedRead => "uninitialized-read",
            Category::UseAfterReturn => "use-after-return",
            Category::UseAfterFree => "use-after-free",
            Category::MemoryLeak => "memory-leak",
            Category::OutOfBounds => "out-of-bounds",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    StaticGlobal,
    Stack,
    Heap,
}

impl Region {
    pub fn label(&self) -> &'static str {
        match self {
            Region::StaticGlobal => "static-global",
            Region::Stack => "stack",
            Region::Heap => "heap",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn label(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Overflow,
    Underflow,
    None,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Overflow => "overflow",
            Direction::Underflow => "underflow",
            Direction::None => "-",
        }
    }
}

/// Which class of tool is expected to flag a testcase.
///
/// `Undetectable` cases are negative controls: the sanitizer staying quiet is
/// the expected result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Detector {
    Sanitizer,
    CompilerWarning,
    Undetectable,
}

impl Detector {
    pub fn label(&self) -> &'static str {
        match self {
            Detector::Sanitizer => "sanitizer",
            Detector::CompilerWarning => "compiler-warning",
            Detector::Undetectable => "undetectable",
        }
    }
}

/// What a simulator observed while performing its fault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Value { value: i64 },
    Bytes { bytes: Vec<u8> },
    Leaked { blocks: usize, bytes: usize },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Value { value } => write!(f, "value={value} (0x{value:x})"),
            Outcome::Bytes { bytes } => {
                write!(f, "bytes=[")?;
                for (idx, byte) in bytes.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "]")
            }
            Outcome::Leaked { blocks, bytes } => {
                write!(f, "leaked {blocks} block(s), {bytes} byte(s)")
            }
        }
    }
}

pub type Simulator = fn(&SimContext<'_>) -> Result<Outcome, HarnessError>;

#[derive(Clone, Copy)]
pub struct BugDescriptor {
    pub id: &'static str,
    pub category: Category,
    pub region: Region,
    /// `None` for categories where the access mode carries no meaning.
    pub access: Option<AccessMode>,
    pub direction: Direction,
    pub expected_detector: Detector,
    pub summary: &'static str,
    pub invoke: Simulator,
}

impl BugDescriptor {
    pub fn summary(&self) -> BugSummary {
        BugSummary {
            id: self.id,
            category: self.category,
            region: self.region,
            access: self.access,
            direction: self.direction,
            expected_detector: self.expected_detector,
            summary: self.summary,
        }
    }
}

impl fmt::Debug for BugDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BugDescriptor")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("region", &self.region)
            .field("access", &self.access)
            .field("direction", &self.direction)
            .field("expected_detector", &self.expected_detector)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a [`BugDescriptor`] for control surfaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BugSummary {
    pub id: &'static str,
    pub category: Category,
    pub region: Region,
    pub access: Option<AccessMode>,
    pub direction: Direction,
    pub expected_detector: Detector,
    pub summary: &'static str,
}

/// Collects descriptors during initialization. [`CatalogBuilder::build`]
/// consumes it, so a built [`Catalog`] can no longer be extended.
#[derive(Default)]
pub struct CatalogBuilder {
    entries: Vec<BugDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: BugDescriptor) -> Result<(), HarnessError> {
        if self.index.contains_key(descriptor.id) {
            return Err(HarnessError::DuplicateId(descriptor.id.to_string()));
        }
        self.index.insert(descriptor.id, self.entries.len());
        self.entries.push(descriptor);
        Ok(())
    }

    pub fn build(self) -> Catalog {
        Catalog {
            entries: self.entries,
            index: self.index,
        }
    }
}

/// Immutable, insertion-ordered registry of testcases.
pub struct Catalog {
    entries: Vec<BugDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Builds a catalog from whatever `register` puts into the builder.
    pub fn from_registration<F>(register: F) -> Result<Self, HarnessError>
    where
        F: FnOnce(&mut CatalogBuilder) -> Result<(), HarnessError>,
    {
        let mut builder = CatalogBuilder::new();
        register(&mut builder)?;
        Ok(builder.build())
    }

    /// Every built-in testcase, in registration order.
    pub fn with_builtin_cases() -> Result<Self, HarnessError> {
        Self::from_registration(simulators::register_builtin_cases)
    }

    pub fn lookup(&self, id: &str) -> Result<&BugDescriptor, HarnessError> {
        self.index
            .get(id)
            .map(|&slot| &self.entries[slot])
            .ok_or_else(|| HarnessError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> &[BugDescriptor] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &BugDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.id))
            .finish()
    }
}
