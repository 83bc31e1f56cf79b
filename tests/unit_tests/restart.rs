use cibfe::restart::{RestartError, RestartRecord, StructureRestartData, CIBFE_METHOD_VERSION};

fn three_structures() -> RestartRecord {
    let structures = vec![
        StructureRestartData {
            translational_velocity: [1.0, -2.5, 0.0],
            rotational_velocity: [0.0, 0.0, 0.1],
        },
        StructureRestartData {
            translational_velocity: [1.0 / 3.0, 2.0f64.sqrt(), -1e-300],
            rotational_velocity: [std::f64::consts::PI, 0.0, -7.25],
        },
        StructureRestartData::default(),
    ];
    RestartRecord::new("cib_method", structures)
}

#[test]
fn json_round_trip_is_exact() {
    let record = three_structures();
    assert_eq!(record.version, CIBFE_METHOD_VERSION);
    let json = record.to_json().unwrap();
    assert_eq!(RestartRecord::from_json(&json).unwrap(), record);
}

#[test]
fn writer_round_trip_is_exact() {
    let record = three_structures();
    let mut buffer = Vec::new();
    record.write_to(&mut buffer).unwrap();
    assert_eq!(RestartRecord::read_from(buffer.as_slice()).unwrap(), record);
}

#[test]
fn version_mismatch_is_rejected() {
    let mut record = three_structures();
    record.version = CIBFE_METHOD_VERSION + 1;
    let json = record.to_json().unwrap();
    assert_eq!(
        RestartRecord::from_json(&json),
        Err(RestartError::VersionMismatch {
            found: CIBFE_METHOD_VERSION + 1,
            expected: CIBFE_METHOD_VERSION
        })
    );
}

#[test]
fn malformed_records_are_rejected() {
    assert!(matches!(
        RestartRecord::from_json("{\"object_name\": \"cib_method\"}"),
        Err(RestartError::Malformed(_))
    ));
    assert!(matches!(
        RestartRecord::read_from(&b"not json"[..]),
        Err(RestartError::Malformed(_))
    ));
}

#[test]
fn compatibility_checks() {
    let record = three_structures();
    assert_eq!(record.check_compatible("cib_method", 3), Ok(()));
    assert_eq!(
        record.check_compatible("cib_method", 2),
        Err(RestartError::StructureCountMismatch { found: 3, expected: 2 })
    );
    assert_eq!(
        record.check_compatible("other", 3),
        Err(RestartError::ObjectNameMismatch {
            found: "cib_method".to_string(),
            expected: "other".to_string()
        })
    );
}
