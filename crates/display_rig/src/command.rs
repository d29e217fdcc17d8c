//! Payloads understood by the table's remote-object-call endpoint.
//!
//! Every command is a `RemoteWebCommand` call on the camera rig actor. The
//! actual instruction travels as a JSON document encoded into the
//! `parameters.JSONParams` string, which is how the rig's web remote plugin
//! expects it.

use serde::{Serialize, Serializer};

pub const DEFAULT_OBJECT_PATH: &str = "/Game/CBRE_MC/PinTable/PinTable_Cesium_Mockup.PinTable_Cesium_Mockup:PersistentLevel.BP_CameraRig_C_UAID_047C16D0FB2829DF01_1089232868";
pub const DEFAULT_CANVAS_SITE: &str = "https://marketcanvas.cbre.com";
pub const REMOTE_FUNCTION_NAME: &str = "RemoteWebCommand";
pub const SHOW_PRESET_COMMAND: &str = "ShowUnrealPreset";

pub const PRESET_PROPERTY_OVERVIEW: &str = "properties_overview_map";
pub const PRESET_MEDIA: &str = "media";
pub const PRESET_INTRO: &str = "intro";

const MAP_ZOOM: u32 = 15;

const PROPERTY_STACK_SQL: &str = "SELECT PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.canvas_pid, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.canvas_primary_address, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.geom, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.floor, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.floor_height, PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES.stories, PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES.latitude, PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES.longitude, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.ed_max_height, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.total_avail_floorspace, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.block_contiguous_size, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.floors, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.spacetypename, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.occupancy, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.rentlow_s, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.renthigh_s, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.rent_type, PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.leasing_company, PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES.property_type FROM PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK LEFT JOIN PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES ON (PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.canvas_pid = PROD_CANVAS_DB.DATA.CANVAS_PROPERTIES.canvas_pid) WHERE (1 = 1) AND (PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.canvas_pid = '{pid}') ORDER BY PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.floor DESC";

/// Where commands are addressed inside the rig and which site the embedded
/// pages come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandProfile {
    pub object_path: String,
    pub canvas_site: String,
}

impl Default for CommandProfile {
    fn default() -> Self {
        Self {
            object_path: DEFAULT_OBJECT_PATH.to_string(),
            canvas_site: DEFAULT_CANVAS_SITE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObjectCall {
    pub object_path: String,
    pub function_name: String,
    pub parameters: RemoteParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteParameters {
    #[serde(rename = "JSONParams", serialize_with = "as_json_string")]
    pub command: UnrealCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnrealCommand {
    pub uecmd: String,
    pub parameters: PresetParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewMode {
    #[serde(rename = "2d")]
    TwoD,
    #[serde(rename = "3d")]
    ThreeD,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetParameters {
    #[serde(rename = "routeURL", skip_serializing_if = "Option::is_none")]
    pub route_url: Option<String>,
    pub preset_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<PresetQueries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_content: Option<PageContent>,
    pub view: ViewMode,
    #[serde(rename = "NPRMode", skip_serializing_if = "Option::is_none")]
    pub npr_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_state: Option<ViewState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresetQueries {
    #[serde(rename = "boundsSQL")]
    pub bounds_sql: String,
    #[serde(rename = "propertiesSQL")]
    pub properties_sql: String,
    #[serde(rename = "pointsSQL")]
    pub points_sql: String,
    #[serde(rename = "focusPropertySQL")]
    pub focus_property_sql: String,
    #[serde(rename = "floorsSQL")]
    pub floors_sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: u32,
    pub pitch: u32,
    pub bearing: u32,
    pub min_zoom: u32,
    pub max_zoom: u32,
}

impl ViewState {
    fn focused(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            zoom: MAP_ZOOM,
            pitch: 0,
            bearing: 0,
            min_zoom: 0,
            max_zoom: MAP_ZOOM,
        }
    }
}

impl RemoteObjectCall {
    fn show_preset(profile: &CommandProfile, parameters: PresetParameters) -> Self {
        Self {
            object_path: profile.object_path.clone(),
            function_name: REMOTE_FUNCTION_NAME.to_string(),
            parameters: RemoteParameters {
                command: UnrealCommand {
                    uecmd: SHOW_PRESET_COMMAND.to_string(),
                    parameters,
                },
            },
        }
    }

    /// 3D map overview of one property with its map and photo widgets on the
    /// side screens.
    pub fn property_overview(
        profile: &CommandProfile,
        canvas_pid: &str,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        let site = profile.canvas_site.trim_end_matches('/');
        Self::show_preset(
            profile,
            PresetParameters {
                route_url: Some(format!("{site}/v1/properties/{canvas_pid}/overview/map")),
                preset_name: PRESET_PROPERTY_OVERVIEW.to_string(),
                queries: Some(PresetQueries {
                    properties_sql: PROPERTY_STACK_SQL.replace("{pid}", canvas_pid),
                    ..PresetQueries::default()
                }),
                page_content: Some(PageContent {
                    left: Some(format!(
                        "{site}/embeddable-widget/properties/{canvas_pid}/overview/map?tvmode=on"
                    )),
                    right: Some(format!(
                        "{site}/embeddable-widget/properties/{canvas_pid}/overview/photos?tvmode=on"
                    )),
                    middle: None,
                }),
                view: ViewMode::ThreeD,
                npr_mode: Some(false),
                view_state: Some(ViewState::focused(latitude, longitude)),
            },
        )
    }

    /// Full-screen web page on the middle screen.
    pub fn media(profile: &CommandProfile, web_url: &str) -> Self {
        Self::show_preset(
            profile,
            PresetParameters {
                route_url: Some(String::new()),
                preset_name: PRESET_MEDIA.to_string(),
                queries: Some(PresetQueries::default()),
                page_content: Some(PageContent {
                    middle: Some(web_url.to_string()),
                    ..PageContent::default()
                }),
                view: ViewMode::TwoD,
                npr_mode: Some(false),
                view_state: None,
            },
        )
    }

    /// Returns the table to its flat intro scene.
    pub fn intro(profile: &CommandProfile) -> Self {
        Self::show_preset(
            profile,
            PresetParameters {
                route_url: None,
                preset_name: PRESET_INTRO.to_string(),
                queries: None,
                page_content: None,
                view: ViewMode::TwoD,
                npr_mode: None,
                view_state: None,
            },
        )
    }

    pub fn preset_name(&self) -> &str {
        &self.parameters.command.parameters.preset_name
    }
}

fn as_json_string<S>(command: &UnrealCommand, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let encoded = serde_json::to_string(command).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&encoded)
}

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;
