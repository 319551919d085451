//! Validation state machine.
//!
//! One machine per validated unit (the whole node, or a named sub-entity
//! such as a character):
//!
//! ```text
//! idle --validate--> validating --+--> valid   --edit--> idle
//!                                 +--> invalid --edit--> idle
//! ```
//!
//! Entering `validating` hands out a [`ValidationTicket`]. Any edit inside
//! the unit's scope resets it to `idle` and invalidates outstanding
//! tickets, so a result that arrives after the content changed is dropped.
//! Saving is only allowed while every unit covering a dirty address is
//! `valid`.

use crate::error::{EditError, EditResult};
use formtree_model::{Address, AddressPrefix};
use formtree_types::{LocalizedText, NodePath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Status of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    #[default]
    Idle,
    Validating,
    Valid,
    Invalid,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        })
    }
}

/// Latest validation outcome of a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    #[serde(default)]
    pub reasons: Vec<LocalizedText>,
    /// Field ref (or relative path) to suggested value.
    #[serde(default)]
    pub suggested_fix: Option<BTreeMap<String, Value>>,
}

/// A verdict returned by a validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub valid: bool,
    pub reasons: Vec<LocalizedText>,
    pub suggested_fix: Option<BTreeMap<String, Value>>,
}

impl Verdict {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reasons: Vec::new(),
            suggested_fix: None,
        }
    }

    pub fn invalid(reasons: Vec<LocalizedText>) -> Self {
        Self {
            valid: false,
            reasons,
            suggested_fix: None,
        }
    }

    #[must_use]
    pub fn with_fix(mut self, fix: BTreeMap<String, Value>) -> Self {
        self.suggested_fix = Some(fix);
        self
    }

    /// Reads an invoker response.
    ///
    /// Accepts `{"valid": bool}` or `{"status": "valid" | "invalid"}`, with
    /// optional `reasons` (strings or locale maps) and `suggested_fix` /
    /// `suggestedFix`.
    pub fn from_response(response: &Value) -> EditResult<Self> {
        let malformed = |what: &str| EditError::Invoker(format!("malformed validator response: {what}"));
        let valid = match (response.get("valid"), response.get("status")) {
            (Some(Value::Bool(b)), _) => *b,
            (_, Some(Value::String(s))) if s == "valid" => true,
            (_, Some(Value::String(s))) if s == "invalid" => false,
            _ => return Err(malformed("missing `valid` or `status`")),
        };
        let reasons = match response.get("reasons") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v.clone()).map_err(|_| malformed("bad `reasons`"))?,
        };
        let suggested_fix = match response
            .get("suggested_fix")
            .or_else(|| response.get("suggestedFix"))
        {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            Some(_) => return Err(malformed("`suggested_fix` is not an object")),
        };
        Ok(Self {
            valid,
            reasons,
            suggested_fix,
        })
    }
}

/// A validated unit and the part of the node it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationUnit {
    pub key: String,
    /// Dotted scope; empty covers the whole node.
    pub scope: String,
    pub function_ref: Option<String>,
}

/// Proof that a validation run was started. Stale once the unit's content
/// changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTicket {
    unit: String,
    generation: u64,
}

impl ValidationTicket {
    pub fn unit(&self) -> &str {
        &self.unit
    }
}

#[derive(Debug, Clone)]
struct UnitState {
    unit: ValidationUnit,
    prefix: AddressPrefix,
    result: ValidationResult,
    generation: u64,
}

/// Validation state of every configured unit of a node.
#[derive(Debug, Clone, Default)]
pub struct ValidationMachine {
    units: BTreeMap<String, UnitState>,
}

impl ValidationMachine {
    /// Builds the machine. Every unit starts `idle`.
    pub fn new(node: &NodePath, units: Vec<ValidationUnit>) -> EditResult<Self> {
        let mut machine = Self::default();
        for unit in units {
            let prefix = AddressPrefix::scope(node, &unit.scope)?;
            machine.units.insert(
                unit.key.clone(),
                UnitState {
                    unit,
                    prefix,
                    result: ValidationResult::default(),
                    generation: 0,
                },
            );
        }
        Ok(machine)
    }

    /// True if at least one validator is configured.
    pub fn is_configured(&self) -> bool {
        !self.units.is_empty()
    }

    fn state(&self, key: &str) -> EditResult<&UnitState> {
        self.units
            .get(key)
            .ok_or_else(|| EditError::UnknownUnit(key.to_string()))
    }

    fn state_mut(&mut self, key: &str) -> EditResult<&mut UnitState> {
        self.units
            .get_mut(key)
            .ok_or_else(|| EditError::UnknownUnit(key.to_string()))
    }

    pub fn unit(&self, key: &str) -> EditResult<&ValidationUnit> {
        Ok(&self.state(key)?.unit)
    }

    pub fn prefix(&self, key: &str) -> EditResult<&AddressPrefix> {
        Ok(&self.state(key)?.prefix)
    }

    pub fn status(&self, key: &str) -> EditResult<ValidationStatus> {
        Ok(self.state(key)?.result.status)
    }

    pub fn result(&self, key: &str) -> EditResult<&ValidationResult> {
        Ok(&self.state(key)?.result)
    }

    /// Moves a unit to `validating`.
    pub fn begin(&mut self, key: &str) -> EditResult<ValidationTicket> {
        let state = self.state_mut(key)?;
        state.generation += 1;
        state.result = ValidationResult {
            status: ValidationStatus::Validating,
            ..ValidationResult::default()
        };
        debug!(unit = key, generation = state.generation, "validation started");
        Ok(ValidationTicket {
            unit: key.to_string(),
            generation: state.generation,
        })
    }

    /// Applies a verdict. Returns false, leaving the unit untouched, when
    /// the ticket is stale.
    pub fn complete(&mut self, ticket: &ValidationTicket, verdict: Verdict) -> EditResult<bool> {
        let state = self.state_mut(&ticket.unit)?;
        if state.generation != ticket.generation
            || state.result.status != ValidationStatus::Validating
        {
            debug!(unit = %ticket.unit, "stale validation result discarded");
            return Ok(false);
        }
        state.result = ValidationResult {
            status: if verdict.valid {
                ValidationStatus::Valid
            } else {
                ValidationStatus::Invalid
            },
            reasons: verdict.reasons,
            suggested_fix: verdict.suggested_fix,
        };
        debug!(unit = %ticket.unit, status = %state.result.status, "validation finished");
        Ok(true)
    }

    /// Returns a unit to `idle` after the validator itself failed.
    pub fn abort(&mut self, ticket: &ValidationTicket) -> EditResult<()> {
        let state = self.state_mut(&ticket.unit)?;
        if state.generation == ticket.generation
            && state.result.status == ValidationStatus::Validating
        {
            state.result = ValidationResult::default();
        }
        Ok(())
    }

    /// Resets every unit covering one of `addresses` to `idle`. Returns the
    /// keys of the units that were reset.
    pub fn content_changed<'a>(
        &mut self,
        addresses: impl IntoIterator<Item = &'a Address>,
    ) -> Vec<String> {
        let addresses: Vec<&Address> = addresses.into_iter().collect();
        let mut reset = Vec::new();
        for (key, state) in &mut self.units {
            if !addresses.iter().any(|a| state.prefix.matches(a)) {
                continue;
            }
            state.generation += 1;
            if state.result.status != ValidationStatus::Idle {
                debug!(unit = %key, from = %state.result.status, "validation reset by edit");
            }
            state.result = ValidationResult::default();
            reset.push(key.clone());
        }
        reset
    }

    /// Takes a unit's suggested fix and resets the unit to `idle`.
    ///
    /// Only an `invalid` unit carrying a fix has one to apply.
    pub fn take_suggested_fix(&mut self, key: &str) -> EditResult<BTreeMap<String, Value>> {
        let state = self.state_mut(key)?;
        if state.result.status != ValidationStatus::Invalid {
            return Ok(BTreeMap::new());
        }
        let fix = state.result.suggested_fix.take().unwrap_or_default();
        state.generation += 1;
        state.result = ValidationResult::default();
        Ok(fix)
    }

    /// Rejects a save of `dirty` unless every unit covering one of those
    /// addresses is `valid`. Units whose scope holds no dirty address do
    /// not gate.
    pub fn ensure_can_save<'a>(
        &self,
        dirty: impl IntoIterator<Item = &'a Address>,
    ) -> EditResult<()> {
        let dirty: Vec<&Address> = dirty.into_iter().collect();
        for (key, state) in &self.units {
            if !dirty.iter().any(|a| state.prefix.matches(a)) {
                continue;
            }
            if state.result.status != ValidationStatus::Valid {
                return Err(EditError::ValidationRequired {
                    unit: key.clone(),
                    status: state.result.status,
                });
            }
        }
        Ok(())
    }

    /// Keys of every unit, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }
}
