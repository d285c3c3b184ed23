//! Funder requirement catalog.
//!
//! Maps a funder identifier to its resolved checklist: the base set every
//! loan carries plus the funder's overlay. The catalog is built once and
//! handed out as immutable `RequirementSet` values; duplicate ids between an
//! overlay and the base set are an authoring error and fail construction.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::models::{RequirementCategory, RequirementDefinition, RequirementSet};

/// Errors raised while building the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate requirement id '{id}' in overlay for funder '{funder}'")]
    DuplicateId { funder: String, id: String },
}

/// Static catalog of requirement definitions per funder.
#[derive(Debug, Clone)]
pub struct RequirementCatalog {
    base: Vec<RequirementDefinition>,
    overlays: HashMap<String, Vec<RequirementDefinition>>,
}

impl RequirementCatalog {
    /// Build the built-in catalog.
    pub fn builtin() -> Result<Self, CatalogError> {
        let mut overlays = HashMap::new();
        overlays.insert("kiavi".to_string(), kiavi_overlay());
        overlays.insert("roc360".to_string(), roc360_overlay());
        Self::new(base_requirements(), overlays)
    }

    /// Build a catalog from an explicit base set and overlays, validating
    /// that no overlay redefines a base id.
    pub fn new(
        base: Vec<RequirementDefinition>,
        overlays: HashMap<String, Vec<RequirementDefinition>>,
    ) -> Result<Self, CatalogError> {
        for (funder, defs) in &overlays {
            let mut seen: Vec<&str> = base.iter().map(|d| d.id.as_str()).collect();
            for def in defs {
                if seen.contains(&def.id.as_str()) {
                    return Err(CatalogError::DuplicateId {
                        funder: funder.clone(),
                        id: def.id.clone(),
                    });
                }
                seen.push(&def.id);
            }
        }
        Ok(Self { base, overlays })
    }

    /// Resolve the requirement set for a funder.
    ///
    /// Unknown funder ids fall back to the base set; the result is never
    /// empty.
    pub fn requirement_set(&self, funder_id: &str) -> RequirementSet {
        let mut definitions = self.base.clone();
        match self.overlays.get(funder_id) {
            Some(overlay) => definitions.extend(overlay.iter().cloned()),
            None => debug!("no overlay for funder '{}', using base set", funder_id),
        }
        RequirementSet {
            funder_id: funder_id.to_string(),
            definitions,
        }
    }

    /// Funder ids that have overlays defined.
    pub fn known_funders(&self) -> Vec<&str> {
        let mut funders: Vec<&str> = self.overlays.keys().map(|s| s.as_str()).collect();
        funders.sort();
        funders
    }

    /// Number of definitions in the base set.
    pub fn base_len(&self) -> usize {
        self.base.len()
    }
}

/// Base checklist shared by every funder.
fn base_requirements() -> Vec<RequirementDefinition> {
    use RequirementCategory::*;
    vec![
        RequirementDefinition::new("drivers_license", "Driver's License", BorrowerEntity, true),
        RequirementDefinition::new(
            "entity_docs",
            "Entity Documents",
            BorrowerEntity,
            true,
        )
        .with_description("Articles of organization, operating agreement, EIN letter"),
        RequirementDefinition::new(
            "certificate_good_standing",
            "Certificate of Good Standing",
            BorrowerEntity,
            false,
        ),
        RequirementDefinition::new("bank_statements", "Bank Statements", Financials, true)
            .with_description("Two most recent months"),
        RequirementDefinition::new("tax_returns", "Tax Returns", Financials, false),
        RequirementDefinition::new("track_record", "Track Record", Financials, false)
            .with_description("Schedule of completed projects"),
        RequirementDefinition::new("purchase_contract", "Purchase Contract", Property, true),
        RequirementDefinition::new("rehab_budget", "Rehab Budget", Property, false),
        RequirementDefinition::new("appraisal_report", "Appraisal Report", Appraisal, true),
        RequirementDefinition::new("insurance_policy", "Insurance Policy", Insurance, true)
            .with_description("Hazard policy with lender named as mortgagee"),
        RequirementDefinition::new("flood_cert", "Flood Certificate", Insurance, false),
        RequirementDefinition::new("title_report", "Title Report", Title, true),
        RequirementDefinition::new("title_commitment", "Title Commitment", Title, false),
        RequirementDefinition::new("payoff_statement", "Payoff Statement", Payoff, false),
    ]
}

/// Kiavi-specific overlay.
fn kiavi_overlay() -> Vec<RequirementDefinition> {
    use RequirementCategory::*;
    vec![
        RequirementDefinition::new(
            "kiavi_borrower_questionnaire",
            "Kiavi Borrower Questionnaire",
            LenderSpecific,
            true,
        )
        .funder_specific(),
        RequirementDefinition::new(
            "kiavi_construction_holdback",
            "Construction Holdback Worksheet",
            LenderSpecific,
            false,
        )
        .funder_specific(),
    ]
}

/// ROC360-specific overlay.
fn roc360_overlay() -> Vec<RequirementDefinition> {
    use RequirementCategory::*;
    vec![
        RequirementDefinition::new(
            "roc360_experience_form",
            "ROC360 Experience Verification Form",
            LenderSpecific,
            true,
        )
        .funder_specific(),
        RequirementDefinition::new(
            "roc360_aci_report",
            "ROC360 Appraisal Condition Report",
            LenderSpecific,
            false,
        )
        .funder_specific(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_funder_falls_back_to_base() {
        let catalog = RequirementCatalog::builtin().unwrap();
        let set = catalog.requirement_set("no-such-funder");
        assert!(!set.is_empty());
        assert_eq!(set.len(), catalog.base_len());
        assert!(set.definitions.iter().all(|d| !d.funder_specific));
    }

    #[test]
    fn test_kiavi_overlay_appended_after_base() {
        let catalog = RequirementCatalog::builtin().unwrap();
        let set = catalog.requirement_set("kiavi");
        assert!(set.len() > catalog.base_len());
        assert!(set.contains("Kiavi Borrower Questionnaire"));
        // Base entries come first, overlay entries after.
        let first_overlay = set
            .definitions
            .iter()
            .position(|d| d.funder_specific)
            .unwrap();
        assert_eq!(first_overlay, catalog.base_len());
    }

    #[test]
    fn test_duplicate_overlay_id_fails_loudly() {
        let mut overlays = HashMap::new();
        overlays.insert(
            "badfunder".to_string(),
            vec![RequirementDefinition::new(
                "title_report",
                "Shadowed Title Report",
                RequirementCategory::Title,
                true,
            )],
        );
        let err = RequirementCatalog::new(base_requirements(), overlays).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateId { ref id, .. } if id == "title_report"));
    }

    #[test]
    fn test_unique_ids_within_resolved_sets() {
        let catalog = RequirementCatalog::builtin().unwrap();
        for funder in ["kiavi", "roc360", "unknown"] {
            let set = catalog.requirement_set(funder);
            let mut ids: Vec<&str> = set.definitions.iter().map(|d| d.id.as_str()).collect();
            let before = ids.len();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), before, "duplicate id in set for {}", funder);
        }
    }
}
