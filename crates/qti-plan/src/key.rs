//! Plan node keys.

use std::fmt;
use std::str::FromStr;

use qti_core::PartId;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Identifies one selected instance of one part within a plan.
///
/// Serialized as `identifier:globalIndex:instanceNumber` so keys can be
/// used as map keys in persisted session state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TestPlanNodeKey {
    identifier: String,
    global_index: usize,
    instance_number: u32,
}

impl TestPlanNodeKey {
    /// Instance numbers start at 1.
    pub fn new(
        identifier: impl Into<String>,
        global_index: usize,
        instance_number: u32,
    ) -> Result<Self, PlanError> {
        let identifier = identifier.into();
        if instance_number == 0 || identifier.is_empty() || identifier.contains(':') {
            return Err(PlanError::InvalidKey(format!(
                "{identifier}:{global_index}:{instance_number}"
            )));
        }
        Ok(Self {
            identifier,
            global_index,
            instance_number,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn global_index(&self) -> usize {
        self.global_index
    }

    pub fn instance_number(&self) -> u32 {
        self.instance_number
    }

    /// The authored part this key instantiates.
    pub fn part_id(&self) -> PartId {
        PartId(self.global_index)
    }
}

impl fmt::Display for TestPlanNodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.identifier, self.global_index, self.instance_number
        )
    }
}

impl FromStr for TestPlanNodeKey {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlanError::InvalidKey(s.to_string());
        let mut parts = s.rsplitn(3, ':');
        let instance = parts.next().ok_or_else(invalid)?;
        let index = parts.next().ok_or_else(invalid)?;
        let identifier = parts.next().ok_or_else(invalid)?;
        let index: usize = index.parse().map_err(|_| invalid())?;
        let instance: u32 = instance.parse().map_err(|_| invalid())?;
        Self::new(identifier, index, instance).map_err(|_| invalid())
    }
}

impl From<TestPlanNodeKey> for String {
    fn from(key: TestPlanNodeKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for TestPlanNodeKey {
    type Error = PlanError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
