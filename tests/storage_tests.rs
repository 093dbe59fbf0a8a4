use ac_previews::storage::{decode, encode, Storage};
use std::path::PathBuf;

fn data_file(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("values.data")
}

#[test]
fn compressed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = data_file(&dir);

    {
        let storage = Storage::new(Some(file.clone()), false);
        storage.set("plain", "value");
        storage.set("tricky", "line one\nline two\tand a tab \\ backslash");
        storage.set_int("number", -42);
        storage.set_bool("flag", true);
        storage.save_now();
    }

    let storage = Storage::new(Some(file), false);
    assert_eq!(storage.len(), 4);
    assert_eq!(storage.get("plain").as_deref(), Some("value"));
    assert_eq!(
        storage.get("tricky").as_deref(),
        Some("line one\nline two\tand a tab \\ backslash")
    );
    assert_eq!(storage.get_int("number", 0), -42);
    assert!(storage.get_bool("flag", false));
}

#[test]
fn plain_text_mode_is_human_readable_and_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let file = data_file(&dir);

    {
        let storage = Storage::new(Some(file.clone()), true);
        storage.set("key", "value");
        storage.save_now();
    }

    let raw = std::fs::read_to_string(&file).unwrap();
    assert!(raw.starts_with("version: 2"));
    assert!(raw.contains("key\tvalue"));

    let storage = Storage::new(Some(file), true);
    assert_eq!(storage.get("key").as_deref(), Some("value"));
}

#[test]
fn version_1_files_still_load() {
    use base64::Engine as _;
    let dir = tempfile::tempdir().unwrap();
    let file = data_file(&dir);

    let value = base64::engine::general_purpose::STANDARD.encode("old value");
    std::fs::write(&file, format!("version: 1\nold\t{value}")).unwrap();

    let storage = Storage::new(Some(file), false);
    assert_eq!(storage.get("old").as_deref(), Some("old value"));
}

#[test]
fn unknown_version_yields_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let file = data_file(&dir);
    std::fs::write(&file, "version: 9\nkey\tvalue").unwrap();

    let storage = Storage::new(Some(file), false);
    assert!(storage.is_empty());
}

#[test]
fn save_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let file = data_file(&dir);

    let storage = Storage::new(Some(file.clone()), false);
    storage.set("key", "value");
    storage.save_now();

    assert!(file.exists());
    assert!(!file.with_extension("tmp").exists());
}

#[test]
fn drop_flushes_pending_changes() {
    let dir = tempfile::tempdir().unwrap();
    let file = data_file(&dir);

    {
        let storage = Storage::new(Some(file.clone()), false);
        storage.set("key", "value");
        // no explicit save_now
    }

    let storage = Storage::new(Some(file), false);
    assert_eq!(storage.get("key").as_deref(), Some("value"));
}

#[test]
fn remove_and_clean_up() {
    let storage = Storage::in_memory();
    storage.set("keep", "1");
    storage.set("temp.a", "1");
    storage.set("temp.b", "2");

    storage.remove("temp.a");
    assert!(!storage.contains("temp.a"));

    storage.clean_up(|k| k.starts_with("temp."));
    assert!(!storage.contains("temp.b"));
    assert!(storage.contains("keep"));
}

#[test]
fn string_list_round_trip_with_special_characters() {
    let storage = Storage::in_memory();
    let values = ["first", "second\nwith newline", "third\twith tab"];
    storage.set_string_list("list", values);
    assert_eq!(storage.get_string_list("list"), values);
    assert!(storage.get_string_list("missing").is_empty());
}

#[test]
fn encrypted_round_trip() {
    let storage = Storage::in_memory();
    storage.set_encrypted("secret", "hunter2");
    assert_eq!(
        storage.get_encrypted("secret", None).as_deref(),
        Some("hunter2")
    );
    // stored form is not the plain text
    assert_ne!(storage.get("secret").as_deref(), Some("hunter2"));
}

#[test]
fn corrupted_encrypted_value_falls_back_to_default() {
    let storage = Storage::in_memory();
    storage.set("secret", "not really base64!!!");
    assert_eq!(
        storage.get_encrypted("secret", Some("fallback")).as_deref(),
        Some("fallback")
    );
    assert_eq!(storage.get_encrypted("missing", None), None);
}

#[test]
fn encoding_is_reversible() {
    let nasty = "a\\b\nc\td";
    assert_eq!(decode(&encode(nasty)), nasty);
}
