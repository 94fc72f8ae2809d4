mod common;

use std::{io::Cursor, sync::Arc};

use depot::{
    AuthKind, ConfigFile, CredentialRecord, Error, LoadOutcome, MemorySecretStore, SecretStore,
};

use common::{HarnessBuilder, SERVER, expired_record, fresh_record, payload, small_parts};

const ALICE_KEY: &str = "https://files.example.com::alice";

fn temp_file() -> (tempfile::TempDir, ConfigFile) {
    let dir = tempfile::tempdir().unwrap();
    let file = ConfigFile::new(dir.path().join("depot").join("config.json"));
    (dir, file)
}

#[test]
fn stored_credential_round_trips_through_file_and_keyring() -> Result<(), Error> {
    let (_dir, file) = temp_file();
    let secrets = Arc::new(MemorySecretStore::new());

    let h = HarnessBuilder::new(fresh_record(), small_parts(10))
        .secrets(Arc::clone(&secrets))
        .file(file.clone())
        .build();
    h.session.store_credential()?;

    let on_disk = file.load()?.active_record().cloned().unwrap();
    assert!(!on_disk.has_secrets());
    assert!(!on_disk.skip_keyring);
    assert_eq!(on_disk.created_at_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(
        secrets.get(ALICE_KEY)?.as_deref(),
        Some("initial__//__refresh-0")
    );
    // the live record keeps its secrets
    assert_eq!(h.session.credential()?.record.id_token, "initial");

    let next = HarnessBuilder::new(on_disk, small_parts(10))
        .secrets(Arc::clone(&secrets))
        .file(file)
        .build();
    assert_eq!(next.session.load_credential()?, LoadOutcome::Loaded);
    let loaded = next.session.credential()?.record;
    assert_eq!(loaded.id_token, "initial");
    assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-0"));
    Ok(())
}

#[test]
fn refreshed_token_reaches_disk_and_keyring() -> Result<(), Error> {
    let (_dir, file) = temp_file();
    let secrets = Arc::new(MemorySecretStore::new());
    let h = HarnessBuilder::new(expired_record(), small_parts(10))
        .secrets(Arc::clone(&secrets))
        .file(file.clone())
        .build();

    h.session.upload("a.bin", Cursor::new(payload(15)), false)?;

    assert_eq!(
        secrets.get(ALICE_KEY)?.as_deref(),
        Some("token-1__//__refresh-1")
    );
    let on_disk = file.load()?.active_record().cloned().unwrap();
    assert!(on_disk.id_token.is_empty());
    assert_eq!(
        on_disk.token_expires_at,
        h.session.credential()?.record.token_expires_at
    );
    Ok(())
}

#[test]
fn missing_keyring_falls_back_to_clear_text() -> Result<(), Error> {
    let (_dir, file) = temp_file();
    let h = HarnessBuilder::new(fresh_record(), small_parts(10))
        .secrets(Arc::new(MemorySecretStore::unavailable()))
        .file(file.clone())
        .build();

    h.session.store_credential()?;

    let on_disk = file.load()?.active_record().cloned().unwrap();
    assert!(on_disk.skip_keyring);
    assert_eq!(on_disk.id_token, "initial");
    assert!(h.session.credential()?.record.skip_keyring);
    assert!(matches!(
        h.session.check_secret_store(),
        Err(Error::SecretStore { .. })
    ));

    // a clear-text record loads without touching the keyring
    let next = HarnessBuilder::new(on_disk, small_parts(10))
        .secrets(Arc::new(MemorySecretStore::unavailable()))
        .build();
    assert_eq!(next.session.load_credential()?, LoadOutcome::Loaded);
    Ok(())
}

#[test]
fn legacy_entry_is_migrated_and_config_rewritten() -> Result<(), Error> {
    let (_dir, file) = temp_file();
    let secrets = Arc::new(MemorySecretStore::new());
    secrets.set(
        "https://files.example.com::ClientCredentials",
        "client-secret__//__hunter2",
    )?;

    let record = CredentialRecord::new(SERVER, "bob", AuthKind::PersonalAccessToken);
    let h = HarnessBuilder::new(record, small_parts(10))
        .secrets(Arc::clone(&secrets))
        .file(file.clone())
        .build();

    assert_eq!(h.session.load_credential()?, LoadOutcome::Migrated);

    let live = h.session.credential()?.record;
    assert_eq!(live.auth_kind, AuthKind::ClientPassword);
    assert_eq!(live.password, "hunter2");
    assert_eq!(
        secrets.get("https://files.example.com::bob")?.as_deref(),
        Some("hunter2")
    );
    assert_eq!(
        secrets.get("https://files.example.com::ClientCredentials")?,
        None
    );

    let on_disk = file.load()?.active_record().cloned().unwrap();
    assert_eq!(on_disk.auth_kind, AuthKind::ClientPassword);
    assert!(on_disk.password.is_empty());
    Ok(())
}

#[test]
fn load_without_any_entry_fails() {
    let record = CredentialRecord::new(SERVER, "nobody", AuthKind::OAuth);
    let h = HarnessBuilder::new(record, small_parts(10)).build();
    assert!(matches!(
        h.session.load_credential(),
        Err(Error::SecretStore { .. })
    ));
}

#[test]
fn clear_removes_keyring_and_config_entries() -> Result<(), Error> {
    let (_dir, file) = temp_file();
    let secrets = Arc::new(MemorySecretStore::new());
    let h = HarnessBuilder::new(fresh_record(), small_parts(10))
        .secrets(Arc::clone(&secrets))
        .file(file.clone())
        .build();
    h.session.store_credential()?;
    assert_eq!(secrets.len(), 1);

    h.session.clear_credential()?;

    assert!(secrets.is_empty());
    assert!(file.load()?.configs.is_empty());
    let live = h.session.credential()?.record;
    assert!(!live.has_secrets());
    assert_eq!(live.token_expires_at, None);

    // clearing twice is fine
    h.session.clear_credential()?;
    Ok(())
}

#[test]
fn secret_store_self_test_passes_on_working_store() -> Result<(), Error> {
    let secrets = Arc::new(MemorySecretStore::new());
    let h = HarnessBuilder::new(fresh_record(), small_parts(10))
        .secrets(Arc::clone(&secrets))
        .build();
    h.session.check_secret_store()?;
    assert!(secrets.is_empty());
    Ok(())
}

#[test]
fn legacy_single_record_file_becomes_a_list() -> Result<(), Error> {
    let (_dir, file) = temp_file();
    std::fs::create_dir_all(file.path().parent().unwrap()).unwrap();
    std::fs::write(
        file.path(),
        r#"{"url":"https://files.example.com","user":"alice","auth_kind":"oauth","skip_verify":false}"#,
    )
    .unwrap();

    let list = file.load()?;
    assert_eq!(list.active, "alice@files.example.com");
    assert_eq!(list.active_record().unwrap().auth_kind, AuthKind::OAuth);

    let rewritten = std::fs::read_to_string(file.path()).unwrap();
    assert!(rewritten.contains("\"configs\""));
    Ok(())
}
