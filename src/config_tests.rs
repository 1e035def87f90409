use super::*;
use yare::parameterized;

fn write_env(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(ENV_FILE_NAME);
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

#[parameterized(
    plain = { "KEY=value", "value" },
    single_quoted = { "KEY='a value'", "a value" },
    double_quoted = { "KEY=\"a value\"", "a value" },
    escaped_quote = { r"KEY='it\'s'", "it's" },
    exported = { "export KEY=value", "value" },
    spaced = { "  KEY = value  ", "value" },
    empty = { "KEY=", "" },
)]
fn parses_entry(line: &str, expected: &str) {
    assert_eq!(
        parse_line(line),
        Line::Entry {
            key: "KEY".to_string(),
            value: expected.to_string()
        }
    );
}

#[parameterized(
    blank = { "" },
    comment = { "# AWS_ENDPOINT=x" },
    no_equals = { "garbage" },
    no_key = { "=value" },
)]
fn keeps_other_lines(line: &str) {
    assert_eq!(parse_line(line), Line::Other(line.to_string()));
}

#[test]
fn set_replaces_and_appends() {
    let (_dir, path) = write_env("# device\nTHING_NAME='pi-1'\nPORT=8883\n");

    let mut env = EnvFile::load(&path).unwrap();
    env.set("PORT", "443");
    env.set("TOPIC", "farm/temp");
    env.save().unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "# device\nTHING_NAME='pi-1'\nPORT='443'\nTOPIC='farm/temp'\n"
    );
    let reloaded = EnvFile::load(&path).unwrap();
    assert_eq!(reloaded.get("PORT"), Some("443"));
    assert_eq!(reloaded.get("THING_NAME"), Some("pi-1"));
}

#[test]
fn quotes_survive_a_save() {
    let (_dir, path) = write_env("");
    let mut env = EnvFile::load(&path).unwrap();
    env.set("NOTE", "it's here");
    env.save().unwrap();

    assert_eq!(EnvFile::load(&path).unwrap().get("NOTE"), Some("it's here"));
}

#[test]
fn missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(ENV_FILE_NAME);

    let mut env = EnvFile::load(&path).unwrap();
    assert_eq!(env.entries().count(), 0);
    env.set("A", "1");
    env.save().unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "A='1'\n");
}

#[test]
fn finds_file_in_ancestor() {
    let (dir, path) = write_env("A=1\n");
    let nested = dir.path().join("a/b");
    std::fs::create_dir_all(&nested).unwrap();

    assert_eq!(EnvFile::find(&nested), Some(path));
}

#[test]
fn existing_variables_win() {
    let (_dir, path) = write_env("IOT_EDGE_TEST_SET=from-file\nIOT_EDGE_TEST_UNSET=from-file\n");
    std::env::set_var("IOT_EDGE_TEST_SET", "from-env");
    std::env::remove_var("IOT_EDGE_TEST_UNSET");

    EnvFile::load(&path).unwrap().apply_to_process();

    assert_eq!(std::env::var("IOT_EDGE_TEST_SET").unwrap(), "from-env");
    assert_eq!(std::env::var("IOT_EDGE_TEST_UNSET").unwrap(), "from-file");
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parses_set_pairs() {
    let pairs = parse_set_args(&args(&["--PORT", "443", "--TOPIC", "farm/temp"])).unwrap();
    assert_eq!(
        pairs,
        vec![
            ("PORT".to_string(), "443".to_string()),
            ("TOPIC".to_string(), "farm/temp".to_string())
        ]
    );
}

#[test]
fn key_without_dashes_is_rejected() {
    assert!(matches!(
        parse_set_args(&args(&["PORT", "443"])),
        Err(Error::MissingDashes(key)) if key == "PORT"
    ));
}

#[test]
fn trailing_key_is_rejected() {
    assert!(matches!(
        parse_set_args(&args(&["--PORT", "443", "--TOPIC"])),
        Err(Error::MissingValue(key)) if key == "TOPIC"
    ));
}

#[test]
fn bare_dashes_are_rejected() {
    assert!(matches!(
        parse_set_args(&args(&["--", "x"])),
        Err(Error::EmptyKey)
    ));
}
