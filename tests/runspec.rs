use std::fs;
use std::path::PathBuf;

use elk_core::logger::init_logger_debug;
use elk_core::runspec::{LinkError, Runspec, read_compiled_header, runspec};
use elk_core::serialization::Value;

fn temp_root(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "elk-core-test-{}-{name}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn dict_get(value: &Value, key: &str) -> Value {
    let Value::Dict(entries) = value else {
        panic!("expected a dict, got {value:?}");
    };
    entries
        .iter()
        .find(|(k, _)| k == &Value::from(key))
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| panic!("missing key {key}"))
}

fn string_list(value: &Value) -> Vec<String> {
    let Value::List(items) = value else {
        panic!("expected a list, got {value:?}");
    };
    items
        .iter()
        .map(|item| match item {
            Value::Str(s) => s.clone(),
            other => panic!("expected a string, got {other:?}"),
        })
        .collect()
}

#[test]
fn single_module_archive() {
    init_logger_debug();
    let root = temp_root("single");
    let main = root.join("main.elk");
    fs::write(&main, "x = 1\n").unwrap();

    let bytes = runspec(&main, &[]).unwrap();
    let (archive, end) =
        elk_core::serialization::deserialise(&bytes).unwrap();
    assert_eq!(end, bytes.len());

    assert_eq!(
        string_list(&dict_get(&archive, "modules")),
        vec!["main".to_owned()]
    );
    let files = string_list(&dict_get(&archive, "files"));
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("main.elkc"));
    assert_eq!(dict_get(&archive, "conclusion"), Value::None);

    // the compiled module landed next to the source
    let compiled = root.join("main.elkc");
    assert!(compiled.is_file());
    let header = read_compiled_header(&compiled).unwrap();
    assert_eq!(dict_get(&header, "name"), Value::from("main"));
    assert_eq!(dict_get(&header, "imports"), Value::List(vec![]));
}

#[test]
fn imported_modules_come_first() {
    init_logger_debug();
    let root = temp_root("imports");
    fs::write(root.join("util.elk"), "helper = 1\n").unwrap();
    let main = root.join("main.elk");
    fs::write(&main, "import util\ny = util\n").unwrap();

    let bytes = runspec(&main, &[root.clone()]).unwrap();
    let (archive, _) =
        elk_core::serialization::deserialise(&bytes).unwrap();
    assert_eq!(
        string_list(&dict_get(&archive, "modules")),
        vec!["util".to_owned(), "main".to_owned()]
    );
}

#[test]
fn shared_imports_are_compiled_once() {
    init_logger_debug();
    let root = temp_root("shared");
    fs::write(root.join("c.elk"), "x = 1\n").unwrap();
    fs::write(root.join("a.elk"), "import c\n").unwrap();
    fs::write(root.join("b.elk"), "import c\n").unwrap();
    let main = root.join("main.elk");
    fs::write(&main, "import a\nimport b\n").unwrap();

    let bytes = runspec(&main, &[root.clone()]).unwrap();
    let (archive, _) =
        elk_core::serialization::deserialise(&bytes).unwrap();
    assert_eq!(
        string_list(&dict_get(&archive, "modules")),
        vec![
            "c".to_owned(),
            "a".to_owned(),
            "b".to_owned(),
            "main".to_owned(),
        ]
    );
}

#[test]
fn package_entry_files_resolve() {
    init_logger_debug();
    let root = temp_root("package");
    fs::create_dir_all(root.join("pkg")).unwrap();
    fs::write(root.join("pkg/__main__.elk"), "x = 1\n").unwrap();
    let main = root.join("main.elk");
    fs::write(&main, "import pkg\n").unwrap();

    let bytes = runspec(&main, &[root.clone()]).unwrap();
    let (archive, _) =
        elk_core::serialization::deserialise(&bytes).unwrap();
    // the __main__ component is dropped from the module name
    assert_eq!(
        string_list(&dict_get(&archive, "modules")),
        vec!["pkg".to_owned(), "main".to_owned()]
    );
}

#[test]
fn dotted_imports_map_to_directories() {
    init_logger_debug();
    let root = temp_root("dotted");
    fs::create_dir_all(root.join("a")).unwrap();
    fs::write(root.join("a/b.elk"), "x = 1\n").unwrap();
    let main = root.join("main.elk");
    fs::write(&main, "import a.b\n").unwrap();

    let bytes = runspec(&main, &[root.clone()]).unwrap();
    let (archive, _) =
        elk_core::serialization::deserialise(&bytes).unwrap();
    assert_eq!(
        string_list(&dict_get(&archive, "modules")),
        vec!["a.b".to_owned(), "main".to_owned()]
    );
}

#[test]
fn missing_modules_are_reported() {
    init_logger_debug();
    let root = temp_root("missing");
    let main = root.join("main.elk");
    fs::write(&main, "import nope\n").unwrap();

    match runspec(&main, &[root.clone()]) {
        Err(LinkError::ModuleNotFound(module)) => {
            assert_eq!(module, "nope");
        }
        other => panic!("expected a missing module error, got {other:?}"),
    }
}

#[test]
fn conclusions_are_carried_in_the_archive() {
    init_logger_debug();
    let root = temp_root("conclusion");
    let main = root.join("main.elk");
    fs::write(&main, "x = 1\n").unwrap();

    let mut spec = Runspec::new(vec![root.clone()]);
    spec.add_file(&main).unwrap();
    spec.set_conclusion("assert x == 1\n").unwrap();
    let (archive, _) =
        elk_core::serialization::deserialise(&spec.to_bytes()).unwrap();
    assert!(matches!(
        dict_get(&archive, "conclusion"),
        Value::Bytes(_)
    ));

    spec.set_conclusion("").unwrap();
    let (archive, _) =
        elk_core::serialization::deserialise(&spec.to_bytes()).unwrap();
    assert_eq!(dict_get(&archive, "conclusion"), Value::None);
}

#[test]
fn compile_errors_surface_through_the_assembler() {
    init_logger_debug();
    let root = temp_root("badsource");
    let main = root.join("main.elk");
    fs::write(&main, "x = = 1\n").unwrap();

    match runspec(&main, &[root.clone()]) {
        Err(LinkError::Compile(_)) => {}
        other => panic!("expected a compile error, got {other:?}"),
    }
}
