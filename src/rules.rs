//! Decides which ways are worth indexing and from which zoom level on.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::data::osm::{OsmId, Relation, Tags};

pub const WILDCARD: &str = "*";
pub const MIN_ZOOM_TAG: &str = "min_zoom";

/// A `(key, value)` predicate. The value `*` matches any value of the key.
/// Deserializes from `["highway", "primary"]` as well as from an object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagRule {
    pub key: String,
    pub value: String,
}

impl TagRule {
    pub fn new(key: &str, value: &str) -> Self {
        TagRule {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        match tags.get(&self.key) {
            Some(value) => self.value == WILDCARD || *value == self.value,
            None => false,
        }
    }
}

/// Zoom tier → predicates. Tiers are scanned lowest zoom first and the first
/// tier with a matching predicate wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    pub tiers: BTreeMap<u8, Vec<TagRule>>,
}

impl RuleTable {
    pub fn new(tiers: BTreeMap<u8, Vec<TagRule>>) -> Self {
        RuleTable { tiers }
    }

    /// Returns the zoom tier of a way, or `None` if the way is discarded.
    pub fn match_way(&self, tags: &Tags) -> Option<u8> {
        if let Some(zoom) = tags.get(MIN_ZOOM_TAG).and_then(|value| value.trim().parse::<f64>().ok()) {
            if zoom.is_finite() {
                return Some(zoom.clamp(0.0, u8::MAX as f64) as u8);
            }
        }

        self.tiers.iter()
            .find(|(_, rules)| rules.iter().any(|rule| rule.matches(tags)))
            .map(|(zoom, _)| *zoom)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        let tier = |rules: &[(&str, &str)]| -> Vec<TagRule> {
            rules.iter().map(|(key, value)| TagRule::new(key, value)).collect()
        };

        let mut tiers = BTreeMap::new();
        tiers.insert(0, tier(&[("admin_level", "2"), ("natural", "coastline")]));
        tiers.insert(3, tier(&[("natural", "water")]));
        tiers.insert(6, tier(&[
            ("admin_level", "3"),
            ("highway", "motorway"),
            ("highway", "trunk"),
            ("railway", "rail"),
        ]));
        tiers.insert(8, tier(&[
            ("admin_level", "4"),
            ("highway", "primary"),
            ("highway", "secondary"),
            ("highway", "tertiary"),
        ]));
        tiers.insert(10, tier(&[
            ("admin_level", "5"),
            ("highway", "motorway_link"),
            ("highway", "trunk_link"),
            ("highway", "primary_link"),
            ("highway", "secondary_link"),
            ("highway", "road"),
            ("railway", "light_rail"),
            ("railway", "monorail"),
        ]));
        tiers.insert(12, tier(&[
            ("admin_level", "6"),
            ("admin_level", "7"),
            ("highway", "unclassified"),
            ("highway", "residential"),
            ("highway", "living_street"),
            ("highway", "bus_guideway"),
            ("highway", "raceway"),
        ]));
        tiers.insert(13, tier(&[("admin_level", "8"), ("highway", "highway_major_casing")]));
        tiers.insert(14, tier(&[("admin_level", "9")]));
        tiers.insert(17, tier(&[("highway", "service")]));
        RuleTable { tiers }
    }
}

/// Selects the relations whose member ways are drawn on the special layer.
/// A relation is selected if its id is listed or if all tag rules match.
/// With neither ids nor rules nothing is selected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpecialSelector {
    pub relation_ids: BTreeSet<OsmId>,
    pub tags: Vec<TagRule>,
}

impl SpecialSelector {
    pub fn selects(&self, relation: &Relation) -> bool {
        if self.relation_ids.contains(&relation.id) {
            return true;
        }
        !self.tags.is_empty() && self.tags.iter().all(|rule| rule.matches(&relation.tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_min_zoom_tag_overrides_rules() {
        let rules = RuleTable::default();
        assert_eq!(rules.match_way(&tags(&[("min_zoom", "11.7"), ("highway", "primary")])), Some(11));
        assert_eq!(rules.match_way(&tags(&[("min_zoom", "4"), ("shop", "bakery")])), Some(4));
    }

    #[test]
    fn test_unparseable_min_zoom_falls_back_to_rules() {
        let rules = RuleTable::default();
        assert_eq!(rules.match_way(&tags(&[("min_zoom", "soon"), ("highway", "primary")])), Some(8));
    }

    #[test]
    fn test_lowest_matching_tier_wins() {
        let mut tiers = BTreeMap::new();
        tiers.insert(15, vec![TagRule::new("highway", "primary")]);
        tiers.insert(8, vec![TagRule::new("highway", "primary")]);
        let rules = RuleTable::new(tiers);

        assert_eq!(rules.match_way(&tags(&[("highway", "primary")])), Some(8));
    }

    #[test]
    fn test_wildcard_matches_any_value() {
        let mut tiers = BTreeMap::new();
        tiers.insert(5, vec![TagRule::new("waterway", WILDCARD)]);
        let rules = RuleTable::new(tiers);

        assert_eq!(rules.match_way(&tags(&[("waterway", "river")])), Some(5));
        assert_eq!(rules.match_way(&tags(&[("waterway", "canal")])), Some(5));
        assert_eq!(rules.match_way(&tags(&[("highway", "river")])), None);
    }

    #[test]
    fn test_unmatched_way_is_discarded() {
        assert_eq!(RuleTable::default().match_way(&tags(&[("building", "yes")])), None);
        assert_eq!(RuleTable::default().match_way(&Tags::new()), None);
    }

    #[test]
    fn test_rule_table_from_json() {
        let rules: RuleTable = serde_json::from_str(r#"{"8": [["highway", "primary"]], "2": [{"key": "natural", "value": "*"}]}"#).unwrap();
        assert_eq!(rules.match_way(&tags(&[("highway", "primary")])), Some(8));
        assert_eq!(rules.match_way(&tags(&[("natural", "wood")])), Some(2));
    }

    #[test]
    fn test_special_selector() {
        let selector = SpecialSelector {
            relation_ids: BTreeSet::from([42]),
            tags: vec![TagRule::new("route", "bus"), TagRule::new("network", "RAT")],
        };
        let mut relation = Relation { id: 1, tags: tags(&[("route", "bus"), ("network", "RAT")]), members: vec![] };
        assert!(selector.selects(&relation));

        relation.tags = tags(&[("route", "bus")]);
        assert!(!selector.selects(&relation));

        relation.id = 42;
        assert!(selector.selects(&relation));

        assert!(!SpecialSelector::default().selects(&relation));
    }
}
