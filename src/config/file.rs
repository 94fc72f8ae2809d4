//! On-disk list of account records.

use std::{
    collections::BTreeMap,
    io::Write as _,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    credentials::CredentialRecord,
    error::{Error, Result},
};

const APP_DIR: &str = "depot";
const FILE_NAME: &str = "config.json";

/// Every known account, keyed by [`CredentialRecord::id`], plus the active one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigList {
    #[serde(default)]
    pub active: String,
    #[serde(default)]
    pub configs: BTreeMap<String, CredentialRecord>,
}

impl ConfigList {
    pub fn active_record(&self) -> Option<&CredentialRecord> {
        self.configs.get(&self.active)
    }

    /// Inserts or replaces the record; the first record becomes active.
    pub fn upsert(&mut self, record: CredentialRecord) {
        let id = record.id();
        if self.active.is_empty() {
            self.active = id.clone();
        }
        self.configs.insert(id, record);
    }

    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.configs.contains_key(id) {
            return Err(Error::invalid_config(format!("no configuration named {id}")));
        }
        self.active = id.to_string();
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<CredentialRecord> {
        let removed = self.configs.remove(id);
        if self.active == id {
            self.active = self.configs.keys().next().cloned().unwrap_or_default();
        }
        removed
    }
}

/// Location of the JSON config file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<platform config dir>/depot/config.json`.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::invalid_config("cannot determine the user config directory"))?;
        Ok(Self::new(dir.join(APP_DIR).join(FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the list. A missing file is an empty list; a single-record file from older
    /// releases is converted and written back as a list.
    pub fn load(&self) -> Result<ConfigList> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigList::default()),
            Err(e) => {
                return Err(Error::io(
                    format!("failed to read {}", self.path.display()),
                    e,
                ));
            }
        };
        if data.trim().is_empty() {
            return Ok(ConfigList::default());
        }

        let value: serde_json::Value = serde_json::from_str(&data).map_err(|e| {
            Error::decode(
                format!("{} is not valid JSON", self.path.display()),
                Some(Box::new(e)),
            )
        })?;

        if value.get("configs").is_some() {
            return serde_json::from_value(value).map_err(|e| {
                Error::decode("failed to parse config list", Some(Box::new(e)))
            });
        }

        let legacy: CredentialRecord = serde_json::from_value(value)
            .map_err(|e| Error::decode("failed to parse legacy config", Some(Box::new(e))))?;
        if legacy.url.is_empty() {
            return Err(Error::decode(
                format!("{} holds neither a config list nor a record", self.path.display()),
                None,
            ));
        }
        tracing::info!(
            path = %self.path.display(),
            "migrating single-record config file to a list"
        );
        let mut list = ConfigList::default();
        list.upsert(legacy);
        self.save(&list)?;
        Ok(list)
    }

    /// Writes the list as pretty JSON, readable by the owner only.
    pub fn save(&self, list: &ConfigList) -> Result<()> {
        let data = serde_json::to_vec_pretty(list)
            .map_err(|e| Error::decode("failed to serialize config list", Some(Box::new(e))))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, &data)
            .map_err(|e| Error::io(format!("failed to write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::io(format!("failed to replace {}", self.path.display()), e)
        })?;

        tracing::debug!(path = %self.path.display(), records = list.configs.len(), "config saved");
        Ok(())
    }

    /// Replaces the stored copy of `record`, keeping the rest of the list.
    pub fn save_record(&self, record: &CredentialRecord) -> Result<()> {
        let mut list = self.load()?;
        list.upsert(record.clone());
        self.save(&list)
    }

    pub fn remove_record(&self, id: &str) -> Result<Option<CredentialRecord>> {
        let mut list = self.load()?;
        let removed = list.remove(id);
        if removed.is_some() {
            self.save(&list)?;
        }
        Ok(removed)
    }
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::AuthKind;

    fn record(user: &str) -> CredentialRecord {
        CredentialRecord::new("https://files.example.com", user, AuthKind::PersonalAccessToken)
    }

    #[test]
    fn missing_file_is_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(dir.path().join("nested").join("config.json"));
        assert_eq!(file.load().unwrap(), ConfigList::default());
    }

    #[test]
    fn save_and_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(dir.path().join("depot").join("config.json"));

        file.save_record(&record("alice")).unwrap();
        file.save_record(&record("bob")).unwrap();

        let list = file.load().unwrap();
        assert_eq!(list.configs.len(), 2);
        assert_eq!(list.active, "alice@files.example.com");
        assert_eq!(list.active_record().unwrap().user, "alice");
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(dir.path().join("config.json"));
        file.save(&ConfigList::default()).unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn migrates_single_record_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"url":"https://files.example.com","user":"carol","auth_kind":"oauth","skip_keyring":false}"#,
        )
        .unwrap();

        let file = ConfigFile::new(&path);
        let list = file.load().unwrap();
        assert_eq!(list.active, "carol@files.example.com");
        assert_eq!(list.active_record().unwrap().auth_kind, AuthKind::OAuth);

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("\"configs\""));
    }

    #[test]
    fn removing_active_record_moves_active() {
        let mut list = ConfigList::default();
        list.upsert(record("alice"));
        list.upsert(record("bob"));
        list.remove("alice@files.example.com");
        assert_eq!(list.active, "bob@files.example.com");
        assert!(list.set_active("nobody").is_err());
    }
}
