//! Map tools exposed to the assistant and the dispatcher that runs them

use crate::assistant::{ToolCall, ToolOutput};
use crate::error::ToolError;
use crate::map::MapStore;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub const UPDATE_MAP: &str = "update_map";
pub const ADD_MARKER: &str = "add_marker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapTool {
    UpdateMap,
    AddMarker,
}

impl MapTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapTool::UpdateMap => UPDATE_MAP,
            MapTool::AddMarker => ADD_MARKER,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            UPDATE_MAP => Some(MapTool::UpdateMap),
            ADD_MARKER => Some(MapTool::AddMarker),
            _ => None,
        }
    }

    pub fn all() -> [MapTool; 2] {
        [MapTool::UpdateMap, MapTool::AddMarker]
    }

    /// Function schema in the shape the assistants API expects
    pub fn definition(&self) -> Value {
        match self {
            MapTool::UpdateMap => json!({
                "type": "function",
                "function": {
                    "name": UPDATE_MAP,
                    "description": "Update map to center on a particular location",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "longitude": {
                                "type": "number",
                                "description": "Longitude of the location to center the map on"
                            },
                            "latitude": {
                                "type": "number",
                                "description": "Latitude of the location to center the map on"
                            },
                            "zoom": {
                                "type": "integer",
                                "description": "Zoom level of the map"
                            }
                        },
                        "required": ["longitude", "latitude", "zoom"]
                    }
                }
            }),
            MapTool::AddMarker => json!({
                "type": "function",
                "function": {
                    "name": ADD_MARKER,
                    "description": "Add marker to the map",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "longitude": {
                                "type": "number",
                                "description": "Longitude of the location to the marker"
                            },
                            "latitude": {
                                "type": "number",
                                "description": "Latitude of the location to the marker"
                            },
                            "label": {
                                "type": "string",
                                "description": "Text to display on the marker"
                            }
                        },
                        "required": ["longitude", "latitude", "label"]
                    }
                }
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateMapArgs {
    longitude: f64,
    latitude: f64,
    zoom: i64,
}

#[derive(Debug, Deserialize)]
struct AddMarkerArgs {
    longitude: f64,
    latitude: f64,
    label: String,
}

fn parse_args<T: DeserializeOwned>(tool: MapTool, arguments: &str) -> Result<T, ToolError> {
    serde_json::from_str(arguments).map_err(|e| ToolError::MalformedArguments {
        tool: tool.as_str().to_string(),
        reason: e.to_string(),
    })
}

fn ensure_finite(tool: MapTool, values: &[(&str, f64)]) -> Result<(), ToolError> {
    match values.iter().find(|(_, v)| !v.is_finite()) {
        Some((field, v)) => Err(ToolError::MalformedArguments {
            tool: tool.as_str().to_string(),
            reason: format!("{field} is not a finite number ({v})"),
        }),
        None => Ok(()),
    }
}

/// Fixed registry of map tools, bound to one map store
#[derive(Clone)]
pub struct ToolRegistry {
    map: MapStore,
}

impl ToolRegistry {
    pub fn new(map: MapStore) -> Self {
        Self { map }
    }

    pub fn map(&self) -> &MapStore {
        &self.map
    }

    pub fn definitions(&self) -> Vec<Value> {
        MapTool::all().iter().map(MapTool::definition).collect()
    }

    /// Run one function call. State is only touched once arguments decode cleanly.
    pub fn dispatch(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let name = call.function.name.as_str();
        let tool = MapTool::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let arguments = call.function.arguments.as_str();
        debug!(call_id = %call.id, tool = name, arguments, "Dispatching tool call");

        let output = match tool {
            MapTool::UpdateMap => {
                let args: UpdateMapArgs = parse_args(tool, arguments)?;
                ensure_finite(tool, &[("longitude", args.longitude), ("latitude", args.latitude)])?;
                self.map.update_map(args.longitude, args.latitude, args.zoom)
            }
            MapTool::AddMarker => {
                let args: AddMarkerArgs = parse_args(tool, arguments)?;
                ensure_finite(tool, &[("longitude", args.longitude), ("latitude", args.latitude)])?;
                self.map.add_marker(args.longitude, args.latitude, &args.label)
            }
        };

        Ok(ToolOutput {
            tool_call_id: call.id.clone(),
            output: output.to_string(),
        })
    }
}
