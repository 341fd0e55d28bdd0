// Direct Mapping Tests
//
// This file contains tests for the schema-driven HL7 to JSON transformation.

use hl7json_core::model::{DynamicTypeRule, HierarchyNode, TransformConfig};
use hl7json_core::schema::Schema;
use hl7json_core::Hl7JsonTransformer;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn fixture_transformer() -> Hl7JsonTransformer {
    Hl7JsonTransformer::from_paths(
        fixture("profile.json"),
        fixture("fields.json"),
        TransformConfig::default(),
    )
    .expect("Failed to load fixture profiles")
}

fn fixture_output() -> Value {
    let message = fs::read_to_string(fixture("oru_r01.hl7")).expect("Failed to read message");
    fixture_transformer().transform_message(&message)
}

/// The single order group the fixture message nests under its patient
fn fixture_order(output: &Value) -> &Value {
    &output["PID"]["children"][0]["OBR"]
}

/// Transformer over small inline schemas
fn inline_transformer(structure: Value, fields: Value, config: TransformConfig) -> Hl7JsonTransformer {
    let structure = Schema::from_json_str(&structure.to_string()).unwrap();
    let fields = Schema::from_json_str(&fields.to_string()).unwrap();
    Hl7JsonTransformer::new(Arc::new(structure), Arc::new(fields), Arc::new(config))
}

fn composite_fields() -> Value {
    json!({
        "CWE": [
            {"name": "Identifier", "fieldNumber": 1, "dataType": "ST", "cardinality": "[0..1]"},
            {"name": "Text", "fieldNumber": 2, "dataType": "ST", "cardinality": "[0..1]"}
        ],
        "HD": [
            {"name": "Namespace ID", "fieldNumber": 1, "dataType": "IS", "cardinality": "[0..1]"},
            {"name": "Universal ID", "fieldNumber": 2, "dataType": "ST", "cardinality": "[0..1]"}
        ],
        "CX": [
            {"name": "ID Number", "fieldNumber": 1, "dataType": "ST", "cardinality": "[1..1]"},
            {"name": "Assigning Authority", "fieldNumber": 4, "dataType": "HD", "cardinality": "[0..1]"}
        ]
    })
}

/// A message root holding the given segment lines as top-level children
fn flat_message(lines: &[&str]) -> HierarchyNode {
    let mut root = HierarchyNode::root();
    root.children = lines.iter().map(|line| HierarchyNode::new(*line)).collect();
    root
}

#[test]
fn test_receiving_facility_namespace() {
    let output = fixture_output();
    assert_eq!(
        output["MSH"]["receiving_facility"]["namespace_id"],
        json!("NCIRD-VPD")
    );
}

#[test]
fn test_header_segment() {
    let output = fixture_output();
    assert_eq!(
        output["MSH"],
        json!({
            "field_separator": "|",
            "encoding_characters": "^~\\&",
            "sending_application": {
                "namespace_id": "LAB",
                "universal_id": "1.2.3",
                "universal_id_type": "ISO"
            },
            "sending_facility": {
                "namespace_id": "LABFAC",
                "universal_id": null,
                "universal_id_type": null
            },
            "receiving_application": {
                "namespace_id": "NCIRD",
                "universal_id": "2.16.840.1.114222.4.3.2.10",
                "universal_id_type": "ISO"
            },
            "receiving_facility": {
                "namespace_id": "NCIRD-VPD",
                "universal_id": "2.16.840.1.114222.4.1.144.2",
                "universal_id_type": "ISO"
            },
            "date_time_of_message": "20240102120000",
            "message_type": {
                "message_code": "ORU",
                "trigger_event": "R01",
                "message_structure": "ORU_R01"
            },
            "message_control_id": "MSG00001",
            "processing_id": "P",
            "version_id": "2.5.1",
            "message_profile_identifier": [{
                "entity_identifier": "PHLabReport-NoAck",
                "namespace_id": "ELR_Receiver",
                "universal_id": "2.16.840.1.113883.9.11",
                "universal_id_type": "ISO"
            }]
        })
    );
}

#[rstest]
#[case("MSH|^~\\&|SENDER|FAC")]
#[case("MSH|X|SENDER")]
#[case("MSH")]
#[case("MSH#$*!@#SENDER")]
fn test_header_delimiters_are_fixed(#[case] header: &str) {
    let transformer = inline_transformer(
        json!({
            "MSH": [
                {"name": "Field Separator", "fieldNumber": 1, "dataType": "ST", "cardinality": "[1..1]"},
                {"name": "Encoding Characters", "fieldNumber": 2, "dataType": "ST", "cardinality": "[1..1]"},
                {"name": "Sending Application", "fieldNumber": 3, "dataType": "HD", "cardinality": "[0..1]"}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&[header]));
    assert_eq!(output["MSH"]["field_separator"], json!("|"));
    assert_eq!(output["MSH"]["encoding_characters"], json!("^~\\&"));
}

#[test]
fn test_header_skew() {
    let transformer = inline_transformer(
        json!({
            "MSH": [
                {"name": "Sending Application", "fieldNumber": 3, "dataType": "HD", "cardinality": "[0..1]"}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&["MSH|^~\\&|SENDER^1.2"]));
    assert_eq!(
        output["MSH"]["sending_application"],
        json!({"namespace_id": "SENDER", "universal_id": "1.2"})
    );
}

#[test]
fn test_patient_segment() {
    let output = fixture_output();
    let mut patient = output["PID"].clone();
    let children = patient.as_object_mut().unwrap().remove("children").unwrap();
    assert_eq!(children.as_array().unwrap().len(), 1);

    assert_eq!(
        patient,
        json!({
            "set_id_pid": "1",
            "patient_identifier_list": [
                {
                    "id_number": "A123",
                    "assigning_authority": {
                        "namespace_id": "HOSP",
                        "universal_id": "1.2.3",
                        "universal_id_type": "ISO"
                    },
                    "identifier_type_code": "MR"
                },
                {
                    "id_number": "B456",
                    "assigning_authority": {
                        "namespace_id": "STATE",
                        "universal_id": null,
                        "universal_id_type": null
                    },
                    "identifier_type_code": "SS"
                }
            ],
            "patient_name": [
                {
                    "family_name": {"surname": "DOE", "own_surname_prefix": null},
                    "given_name": "JOHN",
                    "second_and_further_given_names_or_initials_thereof": "Q"
                },
                {
                    "family_name": {"surname": "SMITH", "own_surname_prefix": "VAN"},
                    "given_name": "JOHNNY",
                    "second_and_further_given_names_or_initials_thereof": null
                }
            ],
            "date_time_of_birth": "19700101",
            "administrative_sex": "M",
            "race": null
        })
    );
}

#[test]
fn test_children_hierarchy() {
    let output = fixture_output();

    let top: Vec<&String> = output.as_object().unwrap().keys().collect();
    assert_eq!(top, vec!["MSH", "PID"]);

    let children = fixture_order(&output)["children"].as_array().unwrap();
    assert_eq!(children.len(), 3);
    for (index, child) in children.iter().enumerate() {
        assert_eq!(
            child["OBX"]["set_id_obx"],
            json!((index + 1).to_string())
        );
    }

    assert_eq!(
        children[0]["OBX"]["children"],
        json!([{
            "NTE": {
                "set_id_nte": "1",
                "source_of_comment": "L",
                "comment": ["Confirmed by repeat testing"]
            }
        }])
    );
    assert!(children[1]["OBX"].get("children").is_none());
}

#[test]
fn test_observation_value_tracks_value_type() {
    let output = fixture_output();
    let children = fixture_order(&output)["children"].as_array().unwrap();

    assert_eq!(
        children[0]["OBX"]["observation_value"],
        json!([{
            "identifier": "260373001",
            "text": "Detected",
            "name_of_coding_system": "SCT"
        }])
    );
    assert_eq!(children[1]["OBX"]["observation_value"], json!(["38.2"]));
    assert_eq!(children[2]["OBX"]["observation_value"], json!(["1", "2", "3"]));
}

#[test]
fn test_every_order_group_survives() {
    let message = "MSH|^~\\&|LAB|LABFAC\r\
PID|1||A123\r\
OBR|1|ORD1\r\
OBX|1|ST|X||first\r\
OBR|2|ORD2\r\
OBX|1|ST|X||second";
    let output = fixture_transformer().transform_message(message);

    let orders = output["PID"]["children"].as_array().unwrap();
    assert_eq!(orders.len(), 2);
    for (order, (id, value)) in orders.iter().zip([("ORD1", "first"), ("ORD2", "second")]) {
        assert_eq!(order["OBR"]["placer_order_number"]["entity_identifier"], json!(id));
        assert_eq!(
            order["OBR"]["children"][0]["OBX"]["observation_value"],
            json!([value])
        );
    }
}

#[test]
fn test_unpopulated_slots_are_null() {
    let output = fixture_output();
    let first = &fixture_order(&output)["children"][0]["OBX"];

    assert_eq!(first["observation_sub_id"], Value::Null);
    assert_eq!(first["units"], Value::Null);
    assert_eq!(first["interpretation_codes"], Value::Null);

    let third = &fixture_order(&output)["children"][2]["OBX"];
    assert_eq!(
        third["units"],
        json!({"identifier": "mg/dL", "text": null, "name_of_coding_system": "UCUM"})
    );
    assert_eq!(third["interpretation_codes"], json!(["N", "H"]));
}

#[test]
fn test_singular_slots_never_hold_arrays() {
    let structure = Schema::from_path(fixture("profile.json")).unwrap();
    let output = fixture_output();

    fn check(structure: &Schema, code: &str, segment: &Value) {
        for field in structure.lookup(code).unwrap_or_default() {
            if !field.cardinality.is_repeating() {
                assert!(
                    !segment[field.key()].is_array(),
                    "{}.{} rendered as array",
                    code,
                    field.key()
                );
            }
        }
        if let Some(children) = segment["children"].as_array() {
            for child in children {
                for (child_code, child_segment) in child.as_object().unwrap() {
                    check(structure, child_code, child_segment);
                }
            }
        }
    }

    for (code, segment) in output.as_object().unwrap() {
        check(&structure, code, segment);
    }
}

#[test]
fn test_singular_composite_last_repetition_wins() {
    // Likely a latent defect: a singular slot keeps its last repetition
    let transformer = inline_transformer(
        json!({
            "OBX": [
                {"name": "Units", "fieldNumber": 6, "dataType": "CWE", "cardinality": "[0..1]"}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&["OBX|1|NM|X||1|A^Alpha~B^Beta"]));
    assert_eq!(output["OBX"]["units"], json!({"identifier": "B", "text": "Beta"}));

    // An unpopulated last repetition overwrites with null
    let output = transformer.transform(&flat_message(&["OBX|1|NM|X||1|A^Alpha~^"]));
    assert_eq!(output["OBX"]["units"], Value::Null);
}

#[test]
fn test_singular_primitive_keeps_first_repetition() {
    let transformer = inline_transformer(
        json!({
            "PID": [
                {"name": "Administrative Sex", "fieldNumber": 8, "dataType": "IS", "cardinality": "[0..1]"}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&["PID|1|||||||F~M"]));
    assert_eq!(output["PID"]["administrative_sex"], json!("F"));
}

#[rstest]
#[case("[0..1]", json!({"identifier": "A", "text": null}))]
#[case("[0..*]", json!([{"identifier": "A", "text": null}]))]
#[case("[0..2]", json!([{"identifier": "A", "text": null}]))]
#[case("[0..?]", json!({"identifier": "A", "text": null}))]
#[case("nonsense", json!({"identifier": "A", "text": null}))]
#[case("[0..1]é", json!({"identifier": "A", "text": null}))]
#[case("[0..*", json!({"identifier": "A", "text": null}))]
#[case("[0..2", json!({"identifier": "A", "text": null}))]
fn test_slot_shape_follows_cardinality(#[case] cardinality: &str, #[case] expected: Value) {
    let transformer = inline_transformer(
        json!({
            "ZZZ": [
                {"name": "Coded", "fieldNumber": 1, "dataType": "CWE", "cardinality": cardinality}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&["ZZZ|A"]));
    assert_eq!(output["ZZZ"]["coded"], expected);
}

#[rstest]
#[case("[0..1]")]
#[case("[0..*]")]
fn test_empty_repetitions_degenerate_to_null(#[case] cardinality: &str) {
    let transformer = inline_transformer(
        json!({
            "ZZZ": [
                {"name": "Coded", "fieldNumber": 1, "dataType": "CWE", "cardinality": cardinality},
                {"name": "Plain", "fieldNumber": 2, "dataType": "ST", "cardinality": cardinality},
                {"name": "Missing", "fieldNumber": 9, "dataType": "CWE", "cardinality": cardinality}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&["ZZZ|^~^|~"]));
    assert_eq!(
        output["ZZZ"],
        json!({"coded": null, "plain": null, "missing": null})
    );
}

#[test]
fn test_subcomponents_without_values_are_null() {
    let transformer = inline_transformer(
        json!({
            "PID": [
                {"name": "Patient Identifier List", "fieldNumber": 3, "dataType": "CX", "cardinality": "[0..*]"}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&["PID|1||A1^^^&"]));
    assert_eq!(
        output["PID"]["patient_identifier_list"],
        json!([{"id_number": "A1", "assigning_authority": null}])
    );
}

#[test]
fn test_custom_dynamic_type_rule() {
    let mut config = TransformConfig::default();
    config.dynamic_types.push(DynamicTypeRule::new("ZOB", 3, 1));

    let transformer = inline_transformer(
        json!({
            "ZOB": [
                {"name": "Kind", "fieldNumber": 1, "dataType": "ST", "cardinality": "[0..1]"},
                {"name": "Payload", "fieldNumber": 3, "dataType": "ST", "cardinality": "[0..1]"}
            ]
        }),
        composite_fields(),
        config,
    );

    let output = transformer.transform(&flat_message(&["ZOB|ST||X^Ex"]));
    assert_eq!(output["ZOB"]["payload"], json!("X^Ex"));

    let output = transformer.transform(&flat_message(&["ZOB|CWE||X^Ex"]));
    assert_eq!(
        output["ZOB"]["payload"],
        json!({"identifier": "X", "text": "Ex"})
    );
}

#[test]
fn test_missing_discriminator_decodes_as_primitive() {
    let transformer = inline_transformer(
        json!({
            "OBX": [
                {"name": "Observation Value", "fieldNumber": 5, "dataType": "CWE", "cardinality": "[0..1]"}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&flat_message(&["OBX|1||CODE||A^Alpha"]));
    assert_eq!(output["OBX"]["observation_value"], json!("A^Alpha"));
}

#[test]
fn test_unknown_segment_keeps_children() {
    let transformer = inline_transformer(json!({}), composite_fields(), TransformConfig::default());

    let mut parent = HierarchyNode::new("ZP1|a");
    parent.children.push(HierarchyNode::new("ZC1|b"));
    parent.children.push(HierarchyNode::new("ZC1|c"));
    let mut root = HierarchyNode::root();
    root.children.push(parent);

    let output = transformer.transform(&root);
    assert_eq!(
        output,
        json!({"ZP1": {"children": [{"ZC1": {}}, {"ZC1": {}}]}})
    );
}

#[test]
fn test_single_segment_root() {
    let transformer = inline_transformer(
        json!({
            "PID": [
                {"name": "Set ID", "fieldNumber": 1, "dataType": "SI", "cardinality": "[0..1]"}
            ]
        }),
        composite_fields(),
        TransformConfig::default(),
    );

    let output = transformer.transform(&HierarchyNode::new("PID|7"));
    assert_eq!(output, json!({"PID": {"set_id": "7"}}));
}

#[test]
fn test_missing_profile_fails_at_construction() {
    let result = Hl7JsonTransformer::from_paths(
        fixture("missing.json"),
        fixture("fields.json"),
        TransformConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_library_entry_point() {
    let structure = Arc::new(Schema::from_path(fixture("profile.json")).unwrap());
    let fields = Arc::new(Schema::from_path(fixture("fields.json")).unwrap());
    let message = fs::read_to_string(fixture("oru_r01.hl7")).unwrap();

    let output = hl7json_core::transform_message(&message, structure, fields);
    assert_eq!(output, fixture_output());
}
