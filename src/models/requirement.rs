//! Requirement checklist models.
//!
//! A loan file must satisfy an ordered checklist of named requirement slots.
//! The checklist is the base set shared by every funder plus a funder-specific
//! overlay, resolved once at loan-open time into an immutable set.

use serde::{Deserialize, Serialize};

/// Category a requirement slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    BorrowerEntity,
    Financials,
    Property,
    Appraisal,
    Insurance,
    Title,
    Payoff,
    LenderSpecific,
    Custom,
}

impl RequirementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BorrowerEntity => "borrower_entity",
            Self::Financials => "financials",
            Self::Property => "property",
            Self::Appraisal => "appraisal",
            Self::Insurance => "insurance",
            Self::Title => "title",
            Self::Payoff => "payoff",
            Self::LenderSpecific => "lender_specific",
            Self::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "borrower_entity" => Some(Self::BorrowerEntity),
            "financials" => Some(Self::Financials),
            "property" => Some(Self::Property),
            "appraisal" => Some(Self::Appraisal),
            "insurance" => Some(Self::Insurance),
            "title" => Some(Self::Title),
            "payoff" => Some(Self::Payoff),
            "lender_specific" => Some(Self::LenderSpecific),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A single checklist item a loan must satisfy.
///
/// Definitions are immutable once the catalog is loaded; per-loan custom
/// requirements are modeled separately and never written back to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementDefinition {
    /// Stable identifier, unique within a requirement set.
    pub id: String,
    /// Name shown in checklists and used as the assignment key.
    pub display_name: String,
    /// Checklist section this requirement belongs to.
    pub category: RequirementCategory,
    /// Whether the loan cannot close without this item.
    pub required: bool,
    /// True when the definition came from a funder overlay.
    pub funder_specific: bool,
    /// Optional guidance shown alongside the slot.
    #[serde(default)]
    pub description: Option<String>,
}

impl RequirementDefinition {
    pub fn new(
        id: &str,
        display_name: &str,
        category: RequirementCategory,
        required: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            category,
            required,
            funder_specific: false,
            description: None,
        }
    }

    pub fn funder_specific(mut self) -> Self {
        self.funder_specific = true;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// The resolved, ordered checklist for one funder.
///
/// Invariant: every definition id is unique within the set. The catalog
/// enforces this at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSet {
    /// Funder identifier this set was resolved for.
    pub funder_id: String,
    /// Ordered definitions: base set first, overlay after.
    pub definitions: Vec<RequirementDefinition>,
}

impl RequirementSet {
    /// Look up a definition by display name.
    pub fn get(&self, display_name: &str) -> Option<&RequirementDefinition> {
        self.definitions
            .iter()
            .find(|d| d.display_name == display_name)
    }

    /// Whether the set contains a slot with this display name.
    pub fn contains(&self, display_name: &str) -> bool {
        self.get(display_name).is_some()
    }

    /// Count of definitions marked required.
    pub fn required_count(&self) -> usize {
        self.definitions.iter().filter(|d| d.required).count()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip() {
        for cat in [
            RequirementCategory::BorrowerEntity,
            RequirementCategory::Financials,
            RequirementCategory::Property,
            RequirementCategory::Appraisal,
            RequirementCategory::Insurance,
            RequirementCategory::Title,
            RequirementCategory::Payoff,
            RequirementCategory::LenderSpecific,
            RequirementCategory::Custom,
        ] {
            assert_eq!(RequirementCategory::from_str(cat.as_str()), Some(cat));
        }
        assert_eq!(RequirementCategory::from_str("bogus"), None);
    }

    #[test]
    fn test_required_count() {
        let set = RequirementSet {
            funder_id: "base".to_string(),
            definitions: vec![
                RequirementDefinition::new("a", "A", RequirementCategory::Financials, true),
                RequirementDefinition::new("b", "B", RequirementCategory::Title, false),
                RequirementDefinition::new("c", "C", RequirementCategory::Payoff, true),
            ],
        };
        assert_eq!(set.required_count(), 2);
        assert!(set.contains("B"));
        assert!(!set.contains("D"));
    }
}
