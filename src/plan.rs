//! The structured result produced by the generation worker.
//!
//! The worker's last meaningful stdout line is a single-line JSON encoding of
//! [`PlanDocument`]. The server never parses it; decoding and validation
//! happen in the client consumer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::PlanError;

/// A recommended article or video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub title: String,
    pub link: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// One step of a learning plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    /// 1-based position within the plan; sequence defines display order.
    pub step_number: i64,
    pub title: String,
    #[serde(default)]
    pub is_complete: bool,
    pub article: Resource,
    /// Curated videos keyed by category name ("General", "Most Viewed", ...).
    #[serde(default)]
    pub videos: BTreeMap<String, Resource>,
}

/// The full generated curriculum for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub id: String,
    pub topic: String,
    pub modules: Vec<Module>,
}

impl PlanDocument {
    /// A plan is well-formed only if it has at least one module and step
    /// numbers are positive and strictly increasing, so they can be used as a
    /// selection index. Malformed plans are rejected whole, never partially.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.modules.is_empty() {
            return Err(PlanError::NoModules);
        }
        let mut previous = 0;
        for (index, module) in self.modules.iter().enumerate() {
            if module.step_number < 1 {
                return Err(PlanError::BadStepNumber {
                    index,
                    step_number: module.step_number,
                });
            }
            if module.step_number <= previous {
                return Err(PlanError::OutOfOrder { index });
            }
            previous = module.step_number;
        }
        Ok(())
    }
}
