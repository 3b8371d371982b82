//! Profile discovery
//!
//! Reads the section headers and the handful of keys cloudscope needs
//! (`region`, `sso_session`, `sso_start_url`) from the shared config and
//! credentials files. Credential resolution itself is left to `aws-config`.
//! [`ProfileWatcher::reload`] diffs the files against what the credential
//! manager knows and publishes the differences.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use cloudscope_core::error::{Error, Result};
use cloudscope_core::{ChangeEvent, CredentialIdentifier, CredentialManager};
use indexmap::IndexMap;

use crate::credentials::ProfileCredentialProvider;

/// Factory id of every profile credential
pub const PROFILE_FACTORY_ID: &str = "profile";

/// Malformed line in a shared config file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileParseError {
    #[error("{path}:{line}: property outside of any section")]
    PropertyOutsideSection { path: String, line: usize },
    #[error("{path}:{line}: unterminated section header '{header}'")]
    UnterminatedHeader {
        path: String,
        line: usize,
        header: String,
    },
    #[error("{path}:{line}: expected 'key = value'")]
    MalformedProperty { path: String, line: usize },
}

impl From<ProfileParseError> for Error {
    fn from(e: ProfileParseError) -> Self {
        Error::parse(e.to_string()).with_help("Fix the shared AWS config file")
    }
}

/// One profile as far as discovery is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub region: Option<String>,
    pub sso_session: Option<String>,
    pub sso_start_url: Option<String>,
    /// Every other key, for change detection
    pub properties: BTreeMap<String, String>,
}

impl Profile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            region: None,
            sso_session: None,
            sso_start_url: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn credential_id(&self) -> String {
        format!("{}:{}", PROFILE_FACTORY_ID, self.name)
    }

    pub fn is_sso(&self) -> bool {
        self.sso_session.is_some() || self.sso_start_url.is_some()
    }

    pub fn identifier(&self) -> CredentialIdentifier {
        let mut identifier =
            CredentialIdentifier::new(self.credential_id(), &self.name, PROFILE_FACTORY_ID);
        if let Some(region) = &self.region {
            identifier = identifier.with_default_region(region);
        }
        // Legacy SSO profiles have no session name; use the profile's
        if self.is_sso() {
            identifier =
                identifier.with_sso_session(self.sso_session.as_deref().unwrap_or(&self.name));
        }
        identifier
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            "region" => self.region = Some(value.to_string()),
            "sso_session" => self.sso_session = Some(value.to_string()),
            "sso_start_url" => self.sso_start_url = Some(value.to_string()),
            _ => {
                self.properties.insert(key.to_string(), value.to_string());
            }
        }
    }
}

/// Profiles plus SSO session blocks found in the files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSet {
    pub profiles: IndexMap<String, Profile>,
    pub sso_sessions: BTreeMap<String, BTreeMap<String, String>>,
}

/// Where the shared files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFileLocations {
    pub config: PathBuf,
    pub credentials: PathBuf,
}

impl ProfileFileLocations {
    /// `AWS_CONFIG_FILE` / `AWS_SHARED_CREDENTIALS_FILE`, else `~/.aws/*`
    pub fn from_env() -> Self {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_default();
        let aws_dir = home.join(".aws");
        Self {
            config: std::env::var_os("AWS_CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| aws_dir.join("config")),
            credentials: std::env::var_os("AWS_SHARED_CREDENTIALS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| aws_dir.join("credentials")),
        }
    }

    /// The same files, for `aws-config`'s profile provider
    pub fn profile_files(&self) -> ProfileFiles {
        ProfileFiles::builder()
            .with_file(ProfileFileKind::Config, &self.config)
            .with_file(ProfileFileKind::Credentials, &self.credentials)
            .build()
    }

    /// Parse both files; missing files count as empty
    pub fn load(&self) -> Result<ProfileSet> {
        let config = read_optional(&self.config)?;
        let credentials = read_optional(&self.credentials)?;
        Ok(parse_profiles(
            &self.config.display().to_string(),
            &config,
            &self.credentials.display().to_string(),
            &credentials,
        )?)
    }
}

fn read_optional(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(Error::io(format!("Failed to read file '{}': {}", path.display(), e))),
    }
}

enum Section {
    Profile(String),
    SsoSession(String),
    Ignored,
}

/// Parse the config file and the credentials file into one set.
///
/// The config file names profiles `[profile name]` (except `[default]`);
/// the credentials file uses bare `[name]`. Keys from the credentials file
/// win.
pub fn parse_profiles(
    config_path: &str,
    config: &str,
    credentials_path: &str,
    credentials: &str,
) -> std::result::Result<ProfileSet, ProfileParseError> {
    let mut set = ProfileSet::default();
    parse_file(config_path, config, true, &mut set)?;
    parse_file(credentials_path, credentials, false, &mut set)?;
    Ok(set)
}

fn parse_file(
    path: &str,
    content: &str,
    is_config: bool,
    set: &mut ProfileSet,
) -> std::result::Result<(), ProfileParseError> {
    let mut section: Option<Section> = None;

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if let Some(header) = trimmed.strip_prefix('[') {
            let name = header
                .split_once(']')
                .map(|(name, _)| name.trim())
                .ok_or_else(|| ProfileParseError::UnterminatedHeader {
                    path: path.to_string(),
                    line,
                    header: trimmed.to_string(),
                })?;
            section = Some(classify(name, is_config));
            if let Some(Section::Profile(name)) = &section {
                set.profiles
                    .entry(name.clone())
                    .or_insert_with(|| Profile::new(name));
            }
            continue;
        }

        // Indented lines continue a nested property
        if raw.starts_with(char::is_whitespace) {
            continue;
        }

        let current = section.as_ref().ok_or(ProfileParseError::PropertyOutsideSection {
            path: path.to_string(),
            line,
        })?;
        let (key, value) = strip_inline_comment(trimmed)
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, _)| !k.is_empty())
            .ok_or(ProfileParseError::MalformedProperty {
                path: path.to_string(),
                line,
            })?;

        match current {
            Section::Profile(name) => {
                if let Some(profile) = set.profiles.get_mut(name) {
                    profile.set(key, value);
                }
            }
            Section::SsoSession(name) => {
                set.sso_sessions
                    .entry(name.clone())
                    .or_default()
                    .insert(key.to_string(), value.to_string());
            }
            Section::Ignored => {}
        }
    }
    Ok(())
}

/// Drop a `#` or `;` comment that follows whitespace.
///
/// `key = a#b` keeps its value intact, as `aws-config` does.
fn strip_inline_comment(line: &str) -> &str {
    let mut previous_whitespace = false;
    for (index, c) in line.char_indices() {
        if (c == '#' || c == ';') && previous_whitespace {
            return line[..index].trim_end();
        }
        previous_whitespace = c.is_whitespace();
    }
    line
}

fn classify(header: &str, is_config: bool) -> Section {
    let mut words = header.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("default"), None, _) => Section::Profile("default".to_string()),
        (Some(name), None, _) if !is_config => Section::Profile(name.to_string()),
        (Some("profile"), Some(name), None) if is_config => Section::Profile(name.to_string()),
        (Some("sso-session"), Some(name), None) if is_config => {
            Section::SsoSession(name.to_string())
        }
        _ => Section::Ignored,
    }
}

/// What one reload changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Keeps the credential manager in sync with the shared files.
pub struct ProfileWatcher {
    credentials: Arc<CredentialManager>,
    locations: ProfileFileLocations,
    known: Mutex<ProfileSet>,
}

impl ProfileWatcher {
    pub fn new(credentials: Arc<CredentialManager>, locations: ProfileFileLocations) -> Self {
        Self {
            credentials,
            locations,
            known: Mutex::new(ProfileSet::default()),
        }
    }

    pub fn locations(&self) -> &ProfileFileLocations {
        &self.locations
    }

    /// Profiles seen by the last reload
    pub fn profiles(&self) -> Vec<Profile> {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .profiles
            .values()
            .cloned()
            .collect()
    }

    /// Re-read the files and publish every difference
    pub fn reload(&self) -> Result<ProfileChanges> {
        let current = self.locations.load()?;
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changes = ProfileChanges::default();

        for (name, profile) in &current.profiles {
            match known.profiles.get(name) {
                None => {
                    self.credentials.add(self.provider_for(profile));
                    changes.added.push(profile.credential_id());
                }
                Some(previous) if previous != profile => {
                    self.credentials.add(self.provider_for(profile));
                    changes.modified.push(profile.credential_id());
                }
                Some(_) => {}
            }
        }
        for (name, profile) in &known.profiles {
            if !current.profiles.contains_key(name) {
                self.credentials.remove(&profile.credential_id());
                changes.removed.push(profile.credential_id());
            }
        }

        for (name, session) in &current.sso_sessions {
            match known.sso_sessions.get(name) {
                None => self
                    .credentials
                    .sso_session_changed(ChangeEvent::SsoSessionAdded(name.clone())),
                Some(previous) if previous != session => self
                    .credentials
                    .sso_session_changed(ChangeEvent::SsoSessionModified(name.clone())),
                Some(_) => {}
            }
        }
        for name in known.sso_sessions.keys() {
            if !current.sso_sessions.contains_key(name) {
                self.credentials
                    .sso_session_changed(ChangeEvent::SsoSessionRemoved(name.clone()));
            }
        }

        if !changes.is_empty() {
            log::debug!(
                "Profiles reloaded: {} added, {} modified, {} removed",
                changes.added.len(),
                changes.modified.len(),
                changes.removed.len()
            );
        }
        *known = current;
        Ok(changes)
    }

    fn provider_for(&self, profile: &Profile) -> Arc<ProfileCredentialProvider> {
        Arc::new(ProfileCredentialProvider::new(
            profile.identifier(),
            &profile.name,
            Some(self.locations.profile_files()),
        ))
    }
}

impl std::fmt::Debug for ProfileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileWatcher")
            .field("locations", &self.locations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudscope_core::events::ChangeBus;
    use cloudscope_core::testing::RecordingListener;
    use cloudscope_core::CredentialProvider;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
# comment
[default]
region = us-west-2

[profile dev]
region = eu-west-1
output = json

[profile corp]
sso_session = corp
sso_account_id = 111122223333
sso_role_name = ReadOnly

[sso-session corp]
sso_start_url = https://corp.awsapps.com/start
sso_region = us-east-1

[services local]
s3 =
  endpoint_url = http://localhost:4566
"#;

    const CREDENTIALS: &str = r#"
[default]
aws_access_key_id = AKIDEXAMPLE
aws_secret_access_key = secret

[ci]
aws_access_key_id = AKIDCI
aws_secret_access_key = secret
"#;

    #[test]
    fn test_parse_profiles_merges_both_files() {
        let set = parse_profiles("config", CONFIG, "credentials", CREDENTIALS).unwrap();

        let names: Vec<_> = set.profiles.keys().cloned().collect();
        assert_eq!(names, vec!["default", "dev", "corp", "ci"]);
        assert_eq!(set.profiles["default"].region.as_deref(), Some("us-west-2"));
        assert_eq!(set.profiles["dev"].properties["output"], "json");
        assert!(set.profiles["corp"].is_sso());
        assert!(!set.profiles["ci"].is_sso());
        assert_eq!(
            set.sso_sessions["corp"]["sso_region"],
            "us-east-1".to_string()
        );
    }

    #[test]
    fn test_identifier_carries_region_and_session() {
        let set = parse_profiles("config", CONFIG, "credentials", "").unwrap();

        let dev = set.profiles["dev"].identifier();
        assert_eq!(dev.id, "profile:dev");
        assert_eq!(dev.default_region_id.as_deref(), Some("eu-west-1"));
        assert_eq!(dev.sso_session, None);

        let corp = set.profiles["corp"].identifier();
        assert_eq!(corp.sso_session.as_deref(), Some("corp"));
    }

    #[test]
    fn test_inline_comments_are_stripped() {
        let config = "[profile dev] # team account\nregion = us-west-2 # oregon\noutput = json;text\nrole_name = admin\t; ops\n";
        let set = parse_profiles("config", config, "credentials", "").unwrap();

        let dev = &set.profiles["dev"];
        assert_eq!(dev.region.as_deref(), Some("us-west-2"));
        assert_eq!(dev.properties["output"], "json;text");
        assert_eq!(dev.properties["role_name"], "admin");
        assert_eq!(dev.identifier().default_region_id.as_deref(), Some("us-west-2"));
    }

    #[test]
    fn test_bare_profile_name_in_config_is_ignored() {
        let set = parse_profiles("config", "[dev]\nregion = us-east-1\n", "credentials", "").unwrap();
        assert!(set.profiles.is_empty());
    }

    #[test]
    fn test_parse_errors_name_file_and_line() {
        let err = parse_profiles("config", "region = us-east-1\n", "credentials", "").unwrap_err();
        assert_eq!(
            err,
            ProfileParseError::PropertyOutsideSection {
                path: "config".into(),
                line: 1
            }
        );

        let err = parse_profiles("config", "[profile dev\n", "credentials", "").unwrap_err();
        assert!(err.to_string().contains("config:1: unterminated section header"));

        let err = parse_profiles("config", "", "credentials", "[ci]\nnot a property\n").unwrap_err();
        assert!(err.to_string().contains("credentials:2"));

        let core: Error = err.into();
        assert!(core.to_string().contains("Parse error"));
    }

    #[test]
    fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let locations = ProfileFileLocations {
            config: dir.path().join("config"),
            credentials: dir.path().join("credentials"),
        };
        assert_eq!(locations.load().unwrap(), ProfileSet::default());
    }

    #[test]
    fn test_reload_publishes_differences() {
        let dir = tempfile::tempdir().unwrap();
        let locations = ProfileFileLocations {
            config: dir.path().join("config"),
            credentials: dir.path().join("credentials"),
        };
        std::fs::write(&locations.config, CONFIG).unwrap();

        let bus = Arc::new(ChangeBus::new());
        let listener = Arc::new(RecordingListener::default());
        bus.subscribe(&listener);
        let credentials = Arc::new(CredentialManager::new(bus));
        let watcher = ProfileWatcher::new(credentials.clone(), locations.clone());

        let first = watcher.reload().unwrap();
        assert_eq!(first.added, vec!["profile:default", "profile:dev", "profile:corp"]);
        assert!(credentials.contains("profile:corp"));
        assert!(listener
            .events()
            .contains(&ChangeEvent::SsoSessionAdded("corp".into())));

        let edited = CONFIG
            .replace("region = eu-west-1", "region = ap-south-1")
            .replace("[profile corp]", "[profile other]")
            .replace("sso_region = us-east-1", "sso_region = eu-west-1");
        std::fs::write(&locations.config, edited).unwrap();
        let second = watcher.reload().unwrap();

        assert_eq!(second.added, vec!["profile:other"]);
        assert_eq!(second.modified, vec!["profile:dev"]);
        assert_eq!(second.removed, vec!["profile:corp"]);
        assert!(!credentials.contains("profile:corp"));
        assert_eq!(
            credentials.get("profile:dev").unwrap().identifier().default_region_id.as_deref(),
            Some("ap-south-1")
        );
        let events = listener.events();
        assert!(events.contains(&ChangeEvent::CredentialModified("profile:dev".into())));
        assert!(events.contains(&ChangeEvent::CredentialRemoved("profile:corp".into())));
        assert!(events.contains(&ChangeEvent::SsoSessionModified("corp".into())));

        assert!(watcher.reload().unwrap().is_empty());
    }
}
