use std::fs::File;
use std::io::{BufRead, BufReader};
use std::mem;
use std::path::{Path, PathBuf};

use log::info;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::UserConfig;
use crate::data::GeometryStore;
use crate::data::osm::{ElementType, Member, Node, OsmId, Relation, Tags, Way};
use crate::errors::Result;
use crate::etl::Etl;
use crate::rules::{RuleTable, SpecialSelector};

pub const ETL_NAME: &str = "parse_osm";
pub const SNAPSHOT_FILE_NAME: &str = "geometry.rkyv";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseStats {
    pub nodes: usize,
    pub ways_kept: usize,
    pub ways_discarded: usize,
    pub relations: usize,
    pub special_ways: usize,
}

enum ParserState {
    Top,
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl ParserState {
    fn tags_mut(&mut self) -> Option<&mut Tags> {
        match self {
            ParserState::Top => None,
            ParserState::Node(node) => Some(&mut node.tags),
            ParserState::Way(way) => Some(&mut way.tags),
            ParserState::Relation(relation) => Some(&mut relation.tags),
        }
    }
}

fn missing(element: &str, attribute: &str) -> String {
    format!("<{}> without '{}' attribute", element, attribute)
}

fn parse_node(element: &BytesStart) -> Result<Node> {
    let mut id: Option<OsmId> = None;
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for attribute in element.attributes() {
        let attribute = attribute?;
        match attribute.key.as_ref() {
            b"id" => id = Some(attribute.unescape_value()?.parse()?),
            b"lat" => lat = Some(attribute.unescape_value()?.parse()?),
            b"lon" => lon = Some(attribute.unescape_value()?.parse()?),
            _ => (),
        }
    }

    Ok(Node {
        id: id.ok_or_else(|| missing("node", "id"))?,
        lat: lat.ok_or_else(|| missing("node", "lat"))?,
        lon: lon.ok_or_else(|| missing("node", "lon"))?,
        tags: Tags::new(),
    })
}

fn required_attribute(element: &BytesStart, name: &str) -> Result<String> {
    match element.try_get_attribute(name)? {
        Some(attribute) => Ok(attribute.unescape_value()?.into_owned()),
        None => Err(missing(&String::from_utf8_lossy(element.name().as_ref()), name).into()),
    }
}

fn parse_id(element: &BytesStart, name: &str) -> Result<OsmId> {
    Ok(required_attribute(element, name)?.parse()?)
}

fn parse_member(element: &BytesStart) -> Result<Member> {
    let member_type = required_attribute(element, "type")?;
    Ok(Member {
        member_type: ElementType::parse(&member_type)
            .ok_or_else(|| format!("Unknown member type '{}'", member_type))?,
        id: parse_id(element, "ref")?,
    })
}

struct OsmParser<'a> {
    rules: &'a RuleTable,
    special: &'a SpecialSelector,
    store: GeometryStore,
    stats: ParseStats,
    state: ParserState,
}

impl OsmParser<'_> {
    fn start(&mut self, element: &BytesStart) -> Result<()> {
        match element.name().as_ref() {
            b"node" => self.state = ParserState::Node(parse_node(element)?),
            b"way" => {
                self.state = ParserState::Way(Way {
                    id: parse_id(element, "id")?,
                    node_ids: Vec::new(),
                    geometry: Vec::new(),
                    tags: Tags::new(),
                    zoom: 0,
                });
            },
            b"relation" => {
                self.state = ParserState::Relation(Relation {
                    id: parse_id(element, "id")?,
                    ..Relation::default()
                });
            },
            b"tag" => {
                let key = required_attribute(element, "k")?;
                let value = required_attribute(element, "v")?;
                if let Some(tags) = self.state.tags_mut() {
                    tags.insert(key, value);
                }
            },
            b"nd" => {
                if let ParserState::Way(way) = &mut self.state {
                    way.node_ids.push(parse_id(element, "ref")?);
                }
            },
            b"member" => {
                if let ParserState::Relation(relation) = &mut self.state {
                    relation.members.push(parse_member(element)?);
                }
            },
            _ => (),
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) {
        if !matches!(name, b"node" | b"way" | b"relation") {
            return;
        }
        match mem::replace(&mut self.state, ParserState::Top) {
            ParserState::Top => (),
            ParserState::Node(node) => {
                self.store.insert_node(node);
                self.stats.nodes += 1;
            },
            ParserState::Way(mut way) => match self.rules.match_way(&way.tags) {
                Some(zoom) => {
                    way.zoom = zoom;
                    self.store.insert_way(way);
                    self.stats.ways_kept += 1;
                },
                None => self.stats.ways_discarded += 1,
            },
            ParserState::Relation(relation) => {
                self.stats.relations += 1;
                if self.special.selects(&relation) {
                    for member in relation.members.iter().filter(|m| m.member_type == ElementType::Way) {
                        if self.store.flag_special(member.id) {
                            self.stats.special_ways += 1;
                        }
                    }
                }
            },
        }
    }
}

pub fn osm_reader<R: BufRead>(input: R) -> Reader<R> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    reader
}

/// Single pass over an OSM XML document. Nodes must come before the ways
/// that reference them, as in regular extracts.
pub fn read_osm<R: BufRead>(
    mut reader: Reader<R>,
    rules: &RuleTable,
    special: &SpecialSelector,
) -> Result<(GeometryStore, ParseStats)> {
    let mut parser = OsmParser {
        rules,
        special,
        store: GeometryStore::default(),
        stats: ParseStats::default(),
        state: ParserState::Top,
    };
    let mut buf = Vec::new();

    loop {
        let at = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Err(e) => return Err(crate::errors::Error::from(e).context(format!("Malformed OSM XML at byte {}", at))),
            Ok(Event::Eof) => break,
            Ok(Event::Text(_)) => return Err(format!("Didn't expect to see text in OSM file at byte {}", at).into()),
            Ok(Event::Start(e)) => {
                parser.start(&e).map_err(|err| err.context(format!("Bad element at byte {}", at)))?;
            },
            Ok(Event::Empty(e)) => {
                parser.start(&e).map_err(|err| err.context(format!("Bad element at byte {}", at)))?;
                parser.end(e.name().as_ref());
            },
            Ok(Event::End(e)) => parser.end(e.name().as_ref()),
            // Declarations, comments and the like carry nothing we need.
            Ok(_) => (),
        }
        buf.clear();
    }
    Ok((parser.store, parser.stats))
}

pub struct ParseOsmEtl<'a> {
    config: &'a UserConfig,
}

impl ParseOsmEtl<'_> {
    pub fn new(config: &UserConfig) -> ParseOsmEtl<'_> {
        ParseOsmEtl { config }
    }

    pub fn snapshot_path(dir: &Path) -> PathBuf {
        dir.join(SNAPSHOT_FILE_NAME)
    }

    fn open_reader(&self) -> Result<Reader<Box<dyn BufRead>>> {
        let path = Path::new(&self.config.data_path);
        let file = File::open(path).map_err(|err| format!("Could not open {}: {}", path.display(), err))?;
        let file_reader = BufReader::new(file);
        let input: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "xz") {
            Box::new(BufReader::new(XzDecoder::new(file_reader)))
        } else {
            Box::new(file_reader)
        };
        Ok(osm_reader(input))
    }
}

impl Etl for ParseOsmEtl<'_> {
    type Input = Reader<Box<dyn BufRead>>;
    type Output = GeometryStore;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(Self::snapshot_path(dir).try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        GeometryStore::remove_snapshot(&Self::snapshot_path(dir))
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        self.open_reader()
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let (store, stats) = read_osm(input, &self.config.rules, &self.config.special)?;
        info!(
            nodes = stats.nodes,
            ways_kept = stats.ways_kept,
            ways_discarded = stats.ways_discarded,
            relations = stats.relations,
            special_ways = stats.special_ways;
            "Parsed OSM extract"
        );
        Ok(store)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        output.write_snapshot(&Self::snapshot_path(dir))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::Write;

    use super::*;
    use crate::data::osm::Coord;
    use crate::rules::TagRule;

    const EXTRACT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="45.6" minlon="25.5" maxlat="45.7" maxlon="25.7"/>
  <node id="1" version="3" user="someone" lat="45.641" lon="25.588"/>
  <node id="2" lat="45.642" lon="25.591">
    <tag k="highway" v="traffic_signals"/>
  </node>
  <node id="3" lat="45.643" lon="25.595"/>
  <way id="10" version="2">
    <nd ref="1"/>
    <nd ref="2"/>
    <nd ref="3"/>
    <tag k="highway" v="primary"/>
    <tag k="name" v="Strada Lunga &amp; Co"/>
  </way>
  <way id="11">
    <nd ref="1"/>
    <nd ref="3"/>
    <tag k="building" v="yes"/>
  </way>
  <way id="12">
    <nd ref="3"/>
    <nd ref="99"/>
    <nd ref="1"/>
    <tag k="highway" v="footway"/>
    <tag k="min_zoom" v="15"/>
  </way>
  <relation id="100">
    <member type="way" ref="10" role="forward"/>
    <member type="way" ref="11" role=""/>
    <member type="node" ref="1"/>
    <tag k="route" v="bus"/>
  </relation>
  <relation id="101">
    <member type="way" ref="12"/>
  </relation>
</osm>
"#;

    fn parse(xml: &str, special: &SpecialSelector) -> Result<(GeometryStore, ParseStats)> {
        read_osm(osm_reader(xml.as_bytes()), &RuleTable::default(), special)
    }

    #[test]
    fn test_parse_keeps_matching_ways() {
        let (store, stats) = parse(EXTRACT, &SpecialSelector::default()).unwrap();
        assert_eq!(stats, ParseStats { nodes: 3, ways_kept: 2, ways_discarded: 1, relations: 2, special_ways: 0 });

        assert_eq!(store.node(2).unwrap().tags["highway"], "traffic_signals");
        let road = store.way(10).unwrap();
        assert_eq!(road.zoom, 8);
        assert_eq!(road.node_ids, vec![1, 2, 3]);
        assert_eq!(road.geometry[1], Coord::new(45.642, 25.591));
        assert_eq!(road.tags["name"], "Strada Lunga & Co");
        assert!(store.way(11).is_none());
    }

    #[test]
    fn test_min_zoom_and_missing_nodes() {
        let (store, _) = parse(EXTRACT, &SpecialSelector::default()).unwrap();
        let footway = store.way(12).unwrap();
        assert_eq!(footway.zoom, 15);
        assert_eq!(footway.node_ids.len(), 3);
        assert_eq!(footway.geometry, vec![Coord::new(45.643, 25.595), Coord::new(45.641, 25.588)]);
    }

    #[test]
    fn test_selected_relations_flag_their_ways() {
        let by_tags = SpecialSelector { tags: vec![TagRule::new("route", "bus")], ..SpecialSelector::default() };
        let (store, stats) = parse(EXTRACT, &by_tags).unwrap();
        assert_eq!(stats.special_ways, 1);
        assert!(store.way(10).unwrap().is_special());
        assert!(!store.way(12).unwrap().is_special());

        let by_id = SpecialSelector { relation_ids: BTreeSet::from([101]), ..SpecialSelector::default() };
        let (store, _) = parse(EXTRACT, &by_id).unwrap();
        assert!(!store.way(10).unwrap().is_special());
        assert!(store.way(12).unwrap().is_special());
    }

    #[test]
    fn test_malformed_records_are_fatal() {
        let none = SpecialSelector::default();
        for xml in [
            r#"<osm><node id="1" lon="25.5"/></osm>"#,
            r#"<osm><node id="1" lat="north" lon="25.5"/></osm>"#,
            r#"<osm><way><nd ref="1"/></way></osm>"#,
            r#"<osm><way id="1"><nd ref="x"/></way></osm>"#,
            r#"<osm><way id="1"><tag k="highway"/></way></osm>"#,
            r#"<osm><relation id="1"><member type="area" ref="2"/></relation></osm>"#,
            r#"<osm>loose text</osm>"#,
            r#"<osm><way id="1"></node></osm>"#,
        ] {
            assert!(parse(xml, &none).is_err(), "accepted {}", xml);
        }
    }

    #[test]
    fn test_reads_xz_compressed_extracts() {
        let dir = std::env::temp_dir().join(format!("osm_tiler_parse_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("extract.osm.xz");
        let mut encoder = xz::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(EXTRACT.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let config = UserConfig::for_extract(&path, &dir);
        let mut etl = ParseOsmEtl::new(&config);
        assert!(!etl.is_cached(&dir).unwrap());
        etl.process(&dir).unwrap();
        assert!(etl.is_cached(&dir).unwrap());

        let store = GeometryStore::read_snapshot(&ParseOsmEtl::snapshot_path(&dir)).unwrap();
        assert_eq!(store.ways.len(), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
