//! Sheet to statement-type assignments and their duplicate check.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use crate::models::{DetectedStatement, SheetInfo, StatementAssignment, StatementType};

/// Rejected assignment operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("sheet '{0}' is not part of the loaded file")]
    UnknownSheet(String),
    #[error("statement types assigned to more than one sheet: {}", type_list(.0))]
    Duplicates(Vec<StatementType>),
}

/// Result of checking the current assignments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Assignments with a unique-per-file type.
    pub assigned_count: usize,
    pub has_duplicates: bool,
    /// Types appearing on more than one sheet, in declaration order.
    pub duplicate_types: Vec<StatementType>,
    pub has_assignments: bool,
}

impl ValidationReport {
    /// Exit condition of the configure step.
    pub fn is_confirmable(&self) -> bool {
        self.has_assignments && !self.has_duplicates
    }
}

/// Authoritative sheet -> statement-type mapping for one uploaded file.
#[derive(Clone, Debug, Default)]
pub struct StatementAssignmentValidator {
    sheets: Vec<SheetInfo>,
    detected: Vec<DetectedStatement>,
    assignments: Vec<StatementAssignment>,
}

impl StatementAssignmentValidator {
    /// One assignment per sheet, taken from the detections.
    ///
    /// Sheet names repeating in the input keep their first occurrence so the
    /// mapping stays keyed by name. When several detections name the same
    /// sheet, the most confident one wins.
    pub fn seed(sheets: &[SheetInfo], detected: &[DetectedStatement]) -> Vec<StatementAssignment> {
        let mut seen = HashSet::new();
        sheets
            .iter()
            .filter(|s| seen.insert(s.name.as_str()))
            .map(|sheet| {
                let best = detected
                    .iter()
                    .filter(|d| d.sheet_name == sheet.name)
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
                StatementAssignment {
                    sheet_name: sheet.name.clone(),
                    assigned_type: best.map(|d| d.statement_type),
                    confidence: best.map(|d| d.confidence).unwrap_or(0.0),
                    is_manual: false,
                }
            })
            .collect()
    }

    /// Replace the inputs and reseed.
    pub fn load(&mut self, sheets: Vec<SheetInfo>, detected: Vec<DetectedStatement>) {
        self.assignments = Self::seed(&sheets, &detected);
        self.sheets = sheets;
        self.detected = detected;
    }

    /// Drop everything (workflow reset or new file selection).
    pub fn clear(&mut self) {
        self.sheets.clear();
        self.detected.clear();
        self.assignments.clear();
    }

    pub fn assignments(&self) -> &[StatementAssignment] {
        &self.assignments
    }

    pub fn sheets(&self) -> &[SheetInfo] {
        &self.sheets
    }

    /// Override one sheet's type. The detection confidence is kept as-is.
    pub fn update_assignment(
        &mut self,
        sheet_name: &str,
        new_type: Option<StatementType>,
    ) -> Result<(), AssignmentError> {
        let slot = self
            .assignments
            .iter_mut()
            .find(|a| a.sheet_name == sheet_name)
            .ok_or_else(|| AssignmentError::UnknownSheet(sheet_name.to_string()))?;
        *slot = StatementAssignment {
            sheet_name: slot.sheet_name.clone(),
            assigned_type: new_type,
            confidence: slot.confidence,
            is_manual: true,
        };
        Ok(())
    }

    /// Discard manual edits.
    pub fn reset_to_detected(&mut self) {
        self.assignments = Self::seed(&self.sheets, &self.detected);
    }

    pub fn validate(&self) -> ValidationReport {
        validate(&self.assignments)
    }

    /// Hand out the mapping; refused while any duplicate remains.
    pub fn confirm(&self) -> Result<Vec<StatementAssignment>, AssignmentError> {
        let report = self.validate();
        if report.has_duplicates {
            return Err(AssignmentError::Duplicates(report.duplicate_types));
        }
        Ok(self.assignments.clone())
    }
}

/// Count and duplicate check over the unique-per-file types.
///
/// `Other` and unassigned sheets are exempt: any number of sheets may carry them.
pub fn validate(assignments: &[StatementAssignment]) -> ValidationReport {
    let mut counts: BTreeMap<StatementType, usize> = BTreeMap::new();
    for t in assignments
        .iter()
        .filter_map(|a| a.assigned_type)
        .filter(|t| t.is_unique_per_file())
    {
        *counts.entry(t).or_default() += 1;
    }

    let assigned_count = counts.values().sum();
    let duplicate_types: Vec<StatementType> = counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(t, _)| *t)
        .collect();

    ValidationReport {
        assigned_count,
        has_duplicates: !duplicate_types.is_empty(),
        duplicate_types,
        has_assignments: assigned_count > 0,
    }
}

fn type_list(types: &[StatementType]) -> String {
    types
        .iter()
        .map(|t| t.wire_name())
        .collect::<Vec<_>>()
        .join(", ")
}
