use std::collections::HashMap;

use serde::Deserialize;

pub type OsmId = i64;

/// Tag mapping as found in the extract. Iteration order is unspecified; code
/// that needs a stable order sorts the keys itself (see [`sorted_tags`]).
pub type Tags = HashMap<String, String>;

/// Tag added to ways that belong to a highlighted relation.
pub const SPECIAL_TAG: &str = "special";

pub fn sorted_tags(tags: &Tags) -> Vec<(&str, &str)> {
    let mut pairs: Vec<(&str, &str)> = tags.iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    pairs.sort_unstable();
    pairs
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coord { lat, lon }
    }
}

impl From<&Node> for Coord {
    fn from(value: &Node) -> Self {
        Coord {
            lat: value.lat,
            lon: value.lon,
        }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Node {
    pub id: OsmId,
    pub lat: f64,
    pub lon: f64,
    pub tags: Tags,
}

/// A way kept by the rule matcher. `geometry` is resolved once from
/// `node_ids` when the way is stored and is never touched afterwards.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Way {
    pub id: OsmId,
    pub node_ids: Vec<OsmId>,
    pub geometry: Vec<Coord>,
    pub tags: Tags,
    /// Lowest zoom level at which the way is drawn.
    pub zoom: u8,
}

impl Way {
    pub fn is_special(&self) -> bool {
        self.tags.contains_key(SPECIAL_TAG)
    }

    pub fn is_boundary(&self) -> bool {
        self.tags.contains_key("boundary")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

impl ElementType {
    pub fn parse(value: &str) -> Option<ElementType> {
        match value {
            "node" => Some(ElementType::Node),
            "way" => Some(ElementType::Way),
            "relation" => Some(ElementType::Relation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub member_type: ElementType,
    pub id: OsmId,
}

/// Relations are only looked at while parsing, to flag their member ways.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub id: OsmId,
    pub tags: Tags,
    pub members: Vec<Member>,
}
