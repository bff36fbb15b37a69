use super::*;

#[test]
fn obfuscation_matches_stored_format() {
    // base64("abc") = "YWJj", reversed, tag length 18.
    assert_eq!(obfuscate("abc"), "jJWY|18");
    assert_eq!(reveal("jJWY|18").as_deref(), Some("abc"));
}

#[test]
fn reveal_rejects_foreign_values() {
    assert_eq!(reveal("plain-key"), None);
    assert_eq!(reveal("jJWY|17"), None);
    assert_eq!(reveal("jJWY|x"), None);
    assert_eq!(reveal("!!!|18"), None);
}

#[test]
fn reveal_inverts_obfuscate_for_unicode() {
    let key = "sk-密钥-0123456789abcdef";
    assert_eq!(reveal(&obfuscate(key)).as_deref(), Some(key));
}

#[test]
fn set_trims_and_clears() {
    let mut keys = StoredKeys::default();
    keys.set("glm", "  glm-key-123  ").unwrap();
    assert_eq!(keys.get("glm"), Some("glm-key-123"));
    keys.set("glm", "   ").unwrap();
    assert_eq!(keys.get("glm"), None);
    assert!(matches!(keys.set("openai", "x"), Err(KeystoreError::UnknownField(_))));
}

#[test]
fn save_then_load_keeps_keys_unreadable_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("keys.json");
    let mut keys = StoredKeys::default();
    keys.set("deepseek", "sk-0123456789abcdefghij").unwrap();
    keys.set("preferredRecipeProvider", "qwen").unwrap();
    save(&path, &keys).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("sk-0123456789abcdefghij"));
    assert_eq!(load(&path).unwrap(), keys);
}

#[cfg(unix)]
#[test]
fn saved_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("keys.json");
    let mut keys = StoredKeys::default();
    keys.set("glm", "glm-key-123").unwrap();
    save(&path, &keys).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);

    // An existing world-readable file is tightened on the next save.
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
    save(&path, &keys).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
}

#[test]
fn load_missing_file_is_empty_and_skips_bad_entries() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("keys.json");
    assert!(load(&path).unwrap().is_empty());

    std::fs::write(&path, format!(r#"{{"glm": "{}", "qwen": "garbage"}}"#, obfuscate("glm-key-123"))).unwrap();
    let keys = load(&path).unwrap();
    assert_eq!(keys.get("glm"), Some("glm-key-123"));
    assert_eq!(keys.get("qwen"), None);
}

#[test]
fn api_keys_json_pairs_doubao_with_endpoint() {
    let mut keys = StoredKeys::default();
    keys.set("deepseek", "sk-a").unwrap();
    keys.set("doubao", "db-key").unwrap();
    keys.set("preferredRecipeProvider", "deepseek").unwrap();
    assert_eq!(keys.api_keys_json(), serde_json::json!({ "deepseek": "sk-a" }));

    keys.set("doubaoEndpointId", "ep-1").unwrap();
    assert_eq!(keys.api_keys_json()["doubao"], serde_json::json!({ "key": "db-key", "endpointId": "ep-1" }));
}

#[test]
fn mask_and_shape_checks() {
    assert_eq!(mask("short"), "****");
    assert_eq!(mask("sk-1234567890abcdef"), "sk-1****cdef");
    assert!(looks_valid("deepseek", "sk-0123456789abcdefghij"));
    assert!(!looks_valid("deepseek", "sk-short"));
    assert!(looks_valid("gemini", "AIza0123456789012345678901234567"));
    assert!(!looks_valid("glm", "tiny"));
}
