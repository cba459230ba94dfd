use std::{collections::HashMap, fs::{self, File}, io::{Read, Write}, path::Path};

use log::warn;

use crate::errors::Result;

use self::osm::{Coord, Node, OsmId, Way, SPECIAL_TAG};

pub mod osm;

/// Nodes and rule-filtered ways of one extract.
///
/// Built once by the parser, then shared read-only between all renderers.
/// Ways carry their resolved geometry, so rendering never walks node ids.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
#[archive(check_bytes)]
pub struct GeometryStore {
    pub nodes: HashMap<OsmId, Node>,
    pub ways: HashMap<OsmId, Way>,
}

impl GeometryStore {
    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub fn node(&self, id: OsmId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn way(&self, id: OsmId) -> Option<&Way> {
        self.ways.get(&id)
    }

    /// Resolves node ids against the nodes seen so far, skipping unknown ids.
    /// Returns the coordinates and the number of ids that could not be found.
    pub fn resolve_geometry(&self, node_ids: &[OsmId]) -> (Vec<Coord>, usize) {
        let mut missing = 0;
        let geometry = node_ids.iter()
            .filter_map(|id| {
                let node = self.nodes.get(id);
                if node.is_none() {
                    missing += 1;
                }
                node.map(Coord::from)
            })
            .collect();
        (geometry, missing)
    }

    /// Stores a kept way, resolving its geometry first.
    pub fn insert_way(&mut self, mut way: Way) {
        let (geometry, missing) = self.resolve_geometry(&way.node_ids);
        if missing > 0 {
            warn!(way_id = way.id, missing = missing, referenced = way.node_ids.len(); "Way references missing nodes");
        }
        way.geometry = geometry;
        self.ways.insert(way.id, way);
    }

    /// Marks a stored way as special. Returns false if the way was not kept.
    pub fn flag_special(&mut self, way_id: OsmId) -> bool {
        match self.ways.get_mut(&way_id) {
            Some(way) => {
                way.tags.insert(SPECIAL_TAG.to_string(), SPECIAL_TAG.to_string());
                true
            },
            None => false,
        }
    }

    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let bytes = rkyv::to_bytes::<_, 256>(self)
            .map_err(|err| format!("Could not serialize geometry snapshot: {:?}", err))?;
        let mut output_file = File::create(path)?;
        output_file.write_all(&bytes)?;
        Ok(())
    }

    pub fn read_snapshot(path: &Path) -> Result<GeometryStore> {
        let mut input_file = File::open(path)?;
        let mut buf_vec: Vec<u8> = Vec::new();
        input_file.read_to_end(&mut buf_vec)?;

        // Archived data has to be read from an aligned buffer.
        let mut aligned = rkyv::AlignedVec::new();
        aligned.extend_from_slice(&buf_vec);

        // Validated, so a truncated or stale snapshot is an error.
        let store = rkyv::from_bytes::<GeometryStore>(&aligned)
            .map_err(|err| format!("Could not deserialize geometry snapshot: {:?}", err))?;
        Ok(store)
    }

    pub fn remove_snapshot(path: &Path) -> Result<()> {
        if path.try_exists()? {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
