use serde_json::Value;

use super::*;

fn encoded_command(call: &RemoteObjectCall) -> Value {
    let json = serde_json::to_value(call).expect("serialize call");
    let inner = json["parameters"]["JSONParams"]
        .as_str()
        .expect("JSONParams is a string");
    serde_json::from_str(inner).expect("JSONParams holds json")
}

#[test]
fn property_overview_targets_rig_actor() {
    let call = RemoteObjectCall::property_overview(&CommandProfile::default(), "123", 40.0, -75.0);
    let json = serde_json::to_value(&call).expect("serialize call");
    assert_eq!(json["objectPath"], DEFAULT_OBJECT_PATH);
    assert_eq!(json["functionName"], "RemoteWebCommand");

    let command = encoded_command(&call);
    assert_eq!(command["uecmd"], "ShowUnrealPreset");
    let params = &command["parameters"];
    assert_eq!(params["presetName"], "properties_overview_map");
    assert_eq!(
        params["routeURL"],
        "https://marketcanvas.cbre.com/v1/properties/123/overview/map"
    );
    assert_eq!(params["view"], "3d");
    assert_eq!(params["NPRMode"], false);
    assert_eq!(
        params["pageContent"]["left"],
        "https://marketcanvas.cbre.com/embeddable-widget/properties/123/overview/map?tvmode=on"
    );
    assert_eq!(
        params["pageContent"]["right"],
        "https://marketcanvas.cbre.com/embeddable-widget/properties/123/overview/photos?tvmode=on"
    );
    assert_eq!(params["viewState"]["latitude"], 40.0);
    assert_eq!(params["viewState"]["longitude"], -75.0);
    assert_eq!(params["viewState"]["zoom"], 15);
    assert_eq!(params["viewState"]["maxZoom"], 15);
    assert_eq!(params["queries"]["boundsSQL"], "");
}

#[test]
fn property_query_embeds_canvas_pid() {
    let call = RemoteObjectCall::property_overview(&CommandProfile::default(), "987", 0.0, 0.0);
    let command = encoded_command(&call);
    let sql = command["parameters"]["queries"]["propertiesSQL"]
        .as_str()
        .expect("sql string");
    assert!(sql.contains("CANVAS_AVAILABLE_STACK.canvas_pid = '987'"));
    assert!(sql.ends_with("ORDER BY PROD_CANVAS_DB.DATA.CANVAS_AVAILABLE_STACK.floor DESC"));
    assert!(!sql.contains("{pid}"));
}

#[test]
fn preset_parameters_keep_field_order() {
    let call = RemoteObjectCall::property_overview(&CommandProfile::default(), "1", 1.0, 2.0);
    let raw = serde_json::to_string(&call.parameters.command).expect("serialize");
    let order = [
        "\"routeURL\"",
        "\"presetName\"",
        "\"queries\"",
        "\"pageContent\"",
        "\"view\"",
        "\"NPRMode\"",
        "\"viewState\"",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|key| raw.find(key).expect("key present"))
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn media_preset_puts_url_in_middle_panel() {
    let call = RemoteObjectCall::media(&CommandProfile::default(), "https://x.com/page");
    let params = &encoded_command(&call)["parameters"];
    assert_eq!(params["presetName"], "media");
    assert_eq!(params["routeURL"], "");
    assert_eq!(params["view"], "2d");
    assert_eq!(params["pageContent"]["middle"], "https://x.com/page");
    assert!(params["pageContent"].get("left").is_none());
    assert!(params.get("viewState").is_none());
    assert_eq!(params["queries"]["propertiesSQL"], "");
}

#[test]
fn intro_preset_is_minimal() {
    let call = RemoteObjectCall::intro(&CommandProfile::default());
    let params = &encoded_command(&call)["parameters"];
    assert_eq!(
        params,
        &serde_json::json!({ "presetName": "intro", "view": "2d" })
    );
}

#[test]
fn custom_profile_changes_object_path_and_site() {
    let profile = CommandProfile {
        object_path: "/Game/Test.Rig".to_string(),
        canvas_site: "https://canvas.test/".to_string(),
    };
    let call = RemoteObjectCall::property_overview(&profile, "5", 0.0, 0.0);
    assert_eq!(call.object_path, "/Game/Test.Rig");
    let params = &encoded_command(&call)["parameters"];
    assert_eq!(
        params["routeURL"],
        "https://canvas.test/v1/properties/5/overview/map"
    );
}
