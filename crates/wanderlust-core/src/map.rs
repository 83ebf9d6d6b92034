//! Map state shared between the tool dispatcher and whatever draws the map
//!
//! The whole state (view + markers) is published as a single value through a
//! `watch` channel, so a reader always gets a complete snapshot.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 19;
pub const DEFAULT_ZOOM: u8 = 2;

pub const MAP_UPDATED: &str = "Map updated";
pub const MARKER_ADDED: &str = "Marker added";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Build a coordinate, clamping latitude to [-90, 90] and longitude to [-180, 180]
    pub fn clamped(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: latitude.clamp(-90.0, 90.0),
            longitude: longitude.clamp(-180.0, 180.0),
        }
    }
}

impl Default for Coordinate {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

/// What part of the world the map is looking at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub center: Coordinate,
    pub zoom: u8,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            center: Coordinate::default(),
            zoom: DEFAULT_ZOOM,
        }
    }
}

/// A labeled pin. Never changes after it is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub location: Coordinate,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    pub view: MapView,
    pub markers: Vec<Marker>,
}

/// Observable map store. Cloning gives another handle to the same state.
#[derive(Clone)]
pub struct MapStore {
    tx: watch::Sender<MapState>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::with_state(MapState::default())
    }

    pub fn with_state(state: MapState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx }
    }

    /// Re-center and re-zoom the map in one step
    pub fn update_map(&self, longitude: f64, latitude: f64, zoom: i64) -> &'static str {
        let view = MapView {
            center: Coordinate::clamped(latitude, longitude),
            zoom: zoom.clamp(i64::from(MIN_ZOOM), i64::from(MAX_ZOOM)) as u8,
        };
        self.tx.send_modify(|state| state.view = view);
        MAP_UPDATED
    }

    pub fn add_marker(&self, longitude: f64, latitude: f64, label: &str) -> &'static str {
        let marker = Marker {
            location: Coordinate::clamped(latitude, longitude),
            label: label.to_string(),
        };
        self.tx.send_modify(|state| state.markers.push(marker));
        MARKER_ADDED
    }

    pub fn get(&self) -> MapState {
        self.tx.borrow().clone()
    }

    pub fn view(&self) -> MapView {
        self.tx.borrow().view
    }

    pub fn marker_count(&self) -> usize {
        self.tx.borrow().markers.len()
    }

    pub fn subscribe(&self) -> watch::Receiver<MapState> {
        self.tx.subscribe()
    }
}

impl Default for MapStore {
    fn default() -> Self {
        Self::new()
    }
}
