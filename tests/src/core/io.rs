use crate::fixtures;
use umbra_core::{Error, JsonModuleIo, ModuleIo};

#[test]
fn module_round_trips_through_the_codec() {
    let module = fixtures::trivial_module();
    let path = fixtures::temp_path("io_roundtrip.json");
    let io = JsonModuleIo::new();
    io.write(&module, &path).expect("write");
    let loaded = io.load(&path).expect("load");
    let _ = std::fs::remove_file(&path);

    // Bit-for-bit structural equality through serde.
    assert_eq!(
        serde_json::to_string(&module).unwrap(),
        serde_json::to_string(&loaded).unwrap()
    );
}

#[test]
fn missing_input_is_a_file_read_error() {
    let err = JsonModuleIo::new()
        .load(std::path::Path::new("/does/not/exist.json"))
        .unwrap_err();
    assert!(matches!(err, Error::FileRead { .. }));
}

#[test]
fn garbage_input_is_a_format_error() {
    let path = fixtures::temp_path("io_garbage.json");
    std::fs::write(&path, "not a module").unwrap();
    let err = JsonModuleIo::new().load(&path).unwrap_err();
    let _ = std::fs::remove_file(&path);
    assert!(matches!(err, Error::ModuleFormat(_)));
}
