//! Vector tiles of the routing graph for debugging and visual inspection.
//!
//! Two layers: `speeds` holds one line per directed segment, `turns` one
//! point per restricted or penalised turn. Output is deterministic: features
//! follow segment (or rule) order and keys and values are interned in
//! first-use order.

pub mod mvt;

use prost::Message;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::geo::{to_mercator, MERCATOR_RADIUS_M};
use crate::graph::{GraphStore, TurnRule};
use crate::locate::Locator;
use mvt::{command, zigzag, Feature, GeomType, Layer, Tile, Value, LINE_TO, MOVE_TO};

pub const EXTENT: u32 = 4096;
/// Tile units drawn beyond each edge
const BUFFER: f64 = 64.0;
/// Lower zoom levels get a tile without layers
pub const MIN_ZOOM: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Property {
    Uint(u64),
    Double(f64),
    Bool(bool),
}

impl Property {
    fn key(self) -> (u8, u64) {
        match self {
            Property::Uint(v) => (0, v),
            Property::Double(v) => (1, v.to_bits()),
            Property::Bool(v) => (2, v as u64),
        }
    }

    fn value(self) -> Value {
        let mut value = Value::default();
        match self {
            Property::Uint(v) => value.uint_value = Some(v),
            Property::Double(v) => value.double_value = Some(v),
            Property::Bool(v) => value.bool_value = Some(v),
        }
        value
    }
}

struct LayerBuilder {
    layer: Layer,
    keys: FxHashMap<&'static str, u32>,
    values: FxHashMap<(u8, u64), u32>,
}

impl LayerBuilder {
    fn new(name: &str) -> Self {
        Self {
            layer: Layer {
                version: 2,
                name: name.to_string(),
                extent: Some(EXTENT),
                ..Layer::default()
            },
            keys: FxHashMap::default(),
            values: FxHashMap::default(),
        }
    }

    fn push(&mut self, id: u64, kind: GeomType, geometry: Vec<u32>, properties: &[(&'static str, Property)]) {
        let mut tags = Vec::with_capacity(properties.len() * 2);
        for &(key, property) in properties {
            let k = *self.keys.entry(key).or_insert_with(|| {
                self.layer.keys.push(key.to_string());
                self.layer.keys.len() as u32 - 1
            });
            let v = *self.values.entry(property.key()).or_insert_with(|| {
                self.layer.values.push(property.value());
                self.layer.values.len() as u32 - 1
            });
            tags.push(k);
            tags.push(v);
        }
        self.layer.features.push(Feature {
            id: Some(id),
            tags,
            r#type: Some(kind as i32),
            geometry,
        });
    }
}

/// Placement of one tile in Web Mercator meters
struct TileFrame {
    min_x: f64,
    max_y: f64,
    size: f64,
}

impl TileFrame {
    fn new(x: u32, y: u32, z: u32) -> Self {
        let world = 2.0 * std::f64::consts::PI * MERCATOR_RADIUS_M;
        let size = world / f64::from(1u32 << z);
        Self {
            min_x: -world / 2.0 + f64::from(x) * size,
            max_y: world / 2.0 - f64::from(y) * size,
            size,
        }
    }

    /// Projected point in tile units, y pointing down
    fn local(&self, p: [f64; 2]) -> [f64; 2] {
        let scale = f64::from(EXTENT) / self.size;
        [(p[0] - self.min_x) * scale, (self.max_y - p[1]) * scale]
    }

    /// Query box including the buffer
    fn envelope(&self) -> ([f64; 2], [f64; 2]) {
        let b = BUFFER / f64::from(EXTENT) * self.size;
        (
            [self.min_x - b, self.max_y - self.size - b],
            [self.min_x + self.size + b, self.max_y + b],
        )
    }
}

/// Liang-Barsky clip of `a`-`b` to the buffered tile square
fn clip(a: [f64; 2], b: [f64; 2]) -> Option<([f64; 2], [f64; 2])> {
    let (lo, hi) = (-BUFFER, f64::from(EXTENT) + BUFFER);
    let d = [b[0] - a[0], b[1] - a[1]];
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for axis in 0..2 {
        for (p, q) in [(-d[axis], a[axis] - lo), (d[axis], hi - a[axis])] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
            if t0 > t1 {
                return None;
            }
        }
    }
    let at = |t: f64| [a[0] + t * d[0], a[1] + t * d[1]];
    Some((at(t0), at(t1)))
}

fn round(p: [f64; 2]) -> [i32; 2] {
    [p[0].round() as i32, p[1].round() as i32]
}

/// Encode tile `z/x/y` as MVT protobuf bytes
pub fn encode(store: &GraphStore, locator: &Locator, x: u32, y: u32, z: u32) -> Vec<u8> {
    let mut tile = Tile::default();
    if z >= MIN_ZOOM {
        let frame = TileFrame::new(x, y, z);
        tile.layers.push(speeds_layer(store, locator, &frame));
        tile.layers.push(turns_layer(store, &frame));
        debug!(
            z, x, y,
            speeds = tile.layers[0].features.len(),
            turns = tile.layers[1].features.len(),
            "encoded tile"
        );
    }
    tile.encode_to_vec()
}

fn speeds_layer(store: &GraphStore, locator: &Locator, frame: &TileFrame) -> Layer {
    let mut layer = LayerBuilder::new("speeds");
    let (min, max) = frame.envelope();
    for e in locator.segments_in(min, max) {
        let edge = store.edge(e);
        let a = frame.local(to_mercator(store.node_coordinate(edge.tail)));
        let b = frame.local(to_mercator(store.node_coordinate(edge.head)));
        let Some((a, b)) = clip(a, b) else {
            continue;
        };
        let (a, b) = (round(a), round(b));
        if a == b {
            continue;
        }
        let geometry = vec![
            command(MOVE_TO, 1),
            zigzag(a[0]),
            zigzag(a[1]),
            command(LINE_TO, 1),
            zigzag(b[0] - a[0]),
            zigzag(b[1] - a[1]),
        ];
        let speed = if edge.weight == 0 {
            0
        } else {
            (edge.distance as f64 / edge.weight as f64 * 3.6).round() as u64
        };
        let seconds = edge.weight as f64 / 10.0;
        layer.push(
            u64::from(e),
            GeomType::Linestring,
            geometry,
            &[
                ("speed", Property::Uint(speed)),
                ("duration", Property::Double(seconds)),
                ("weight", Property::Double(seconds)),
                ("road_class", Property::Uint(u64::from(edge.road_class))),
                ("is_small", Property::Bool(edge.tiny)),
            ],
        );
    }
    layer.layer
}

fn turns_layer(store: &GraphStore, frame: &TileFrame) -> Layer {
    let mut layer = LayerBuilder::new("turns");
    let extent = f64::from(EXTENT);
    for (i, (from, _to, rule)) in store.turn_rules().enumerate() {
        let via = store.edge_head(from);
        let p = frame.local(to_mercator(store.node_coordinate(via)));
        if !(0.0..extent).contains(&p[0]) || !(0.0..extent).contains(&p[1]) {
            continue;
        }
        let p = round(p);
        let (cost, restricted) = match rule {
            TurnRule::Forbidden => (0.0, true),
            TurnRule::Penalty(ds) => (ds as f64 / 10.0, false),
        };
        layer.push(
            i as u64,
            GeomType::Point,
            vec![command(MOVE_TO, 1), zigzag(p[0]), zigzag(p[1])],
            &[
                ("cost", Property::Double(cost)),
                ("restricted", Property::Bool(restricted)),
            ],
        );
    }
    layer.layer
}
