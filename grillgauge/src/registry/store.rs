//! Registry persistence.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::ProbeRegistry;
use crate::domain::{ProbeAddress, ProbeIdentity, ProbeName};
use crate::{Error, Result};

pub const PROBE_MACS_KEY: &str = "PROBE_MACS";
pub const PROBE_NAMES_KEY: &str = "PROBE_NAMES";
pub const PROBE_LAST_SEEN_KEY: &str = "PROBE_LAST_SEEN";
pub const IGNORED_MACS_KEY: &str = "IGNORED_MACS";

const REGISTRY_KEYS: [&str; 4] = [
    PROBE_MACS_KEY,
    PROBE_NAMES_KEY,
    PROBE_LAST_SEEN_KEY,
    IGNORED_MACS_KEY,
];

/// Load/save boundary for [`ProbeRegistry`].
#[async_trait]
pub trait RegistryStore: Send + Sync + 'static {
    async fn load(&self) -> Result<ProbeRegistry>;

    async fn save(&self, registry: &ProbeRegistry) -> Result<()>;
}

// ========== Env file store ==========

/// Registry stored as parallel comma-separated lists in a `.env` file.
///
/// Lines that do not belong to the registry are preserved on save.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    /// Create a new store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_existing(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RegistryStore for EnvFileStore {
    async fn load(&self) -> Result<ProbeRegistry> {
        let Some(content) = self.read_existing().await? else {
            debug!("Registry file {} does not exist", self.path.display());
            return Ok(ProbeRegistry::new());
        };

        parse_registry(&content)
    }

    async fn save(&self, registry: &ProbeRegistry) -> Result<()> {
        let existing = self.read_existing().await?.unwrap_or_default();
        let content = render_registry(&existing, registry);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, content.as_bytes()))
            .await
            .map_err(|e| Error::Other(format!("registry writer task failed: {}", e)))??;

        debug!(
            "Saved registry with {} probes to {}",
            registry.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Write via a temp file in the target directory and rename over the target.
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Split a parallel list, keeping empty positions.
fn split_list(value: Option<&String>) -> Vec<&str> {
    match value.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v.split(',').map(str::trim).collect(),
        _ => Vec::new(),
    }
}

fn parse_registry(content: &str) -> Result<ProbeRegistry> {
    let mut values: HashMap<String, String> = HashMap::new();
    for item in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, value) =
            item.map_err(|e| Error::registry(format!("malformed registry file: {}", e)))?;
        if REGISTRY_KEYS.contains(&key.as_str()) {
            values.insert(key, value);
        }
    }

    let addresses = split_list(values.get(PROBE_MACS_KEY));
    let names = split_list(values.get(PROBE_NAMES_KEY));
    let last_seen = split_list(values.get(PROBE_LAST_SEEN_KEY));

    let mut registry = ProbeRegistry::new();

    for (index, raw_address) in addresses.iter().enumerate() {
        let address = match ProbeAddress::new(raw_address) {
            Ok(address) => address,
            Err(e) => {
                warn!("Skipping registry entry {}: {}", index, e);
                continue;
            }
        };

        let name = names
            .get(index)
            .and_then(|raw| ProbeName::new(raw).ok())
            .unwrap_or_else(|| fallback_name(&address));

        let seen = last_seen.get(index).filter(|raw| !raw.is_empty()).and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| warn!("Ignoring invalid last-seen for {}: {}", address, e))
                .ok()
        });

        if let Err(e) = registry.register(ProbeIdentity::new(address, name), seen) {
            warn!("Skipping duplicate registry entry: {}", e);
        }
    }

    for raw_address in split_list(values.get(IGNORED_MACS_KEY))
        .into_iter()
        .filter(|raw| !raw.is_empty())
    {
        match ProbeAddress::new(raw_address) {
            Ok(address) => {
                registry.ignore(address);
            }
            Err(e) => warn!("Skipping ignored entry: {}", e),
        }
    }

    Ok(registry)
}

/// Display name for an entry whose name is missing from the file.
fn fallback_name(address: &ProbeAddress) -> ProbeName {
    ProbeName::new(format!("grillprobeE_{}", address.short_suffix()))
        .unwrap_or_else(|_| ProbeName::numbered(0))
}

fn registry_lines(registry: &ProbeRegistry) -> [(&'static str, String); 4] {
    let join = |items: Vec<String>| items.join(",");

    [
        (
            PROBE_MACS_KEY,
            join(
                registry
                    .probes()
                    .iter()
                    .map(|p| p.identity.address.to_string())
                    .collect(),
            ),
        ),
        (
            PROBE_NAMES_KEY,
            join(
                registry
                    .probes()
                    .iter()
                    .map(|p| p.identity.name.to_string())
                    .collect(),
            ),
        ),
        (
            PROBE_LAST_SEEN_KEY,
            join(
                registry
                    .probes()
                    .iter()
                    .map(|p| {
                        p.last_seen
                            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
                            .unwrap_or_default()
                    })
                    .collect(),
            ),
        ),
        (
            IGNORED_MACS_KEY,
            join(registry.ignored().map(ToString::to_string).collect()),
        ),
    ]
}

fn line_key(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    line.split_once('=').map(|(key, _)| key.trim())
}

/// Rewrite `existing` with the registry keys replaced.
fn render_registry(existing: &str, registry: &ProbeRegistry) -> String {
    let mut output = String::new();

    for line in existing.lines() {
        if line_key(line).is_some_and(|key| REGISTRY_KEYS.contains(&key)) {
            continue;
        }
        output.push_str(line);
        output.push('\n');
    }

    for (key, value) in registry_lines(registry) {
        output.push_str(&format!("{}=\"{}\"\n", key, escape_quoted(&value)));
    }

    output
}

/// Escape a value for a double-quoted dotenv string, where `\` starts an
/// escape and `$` starts a substitution.
fn escape_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ========== Memory store ==========

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    registry: Mutex<ProbeRegistry>,
    fail_loads: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new(registry: ProbeRegistry) -> Self {
        Self {
            registry: Mutex::new(registry),
            ..Default::default()
        }
    }

    /// Make subsequent loads fail until reset.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Replace the stored registry.
    pub fn replace(&self, registry: ProbeRegistry) {
        *self.registry.lock() = registry;
    }

    pub fn current(&self) -> ProbeRegistry {
        self.registry.lock().clone()
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn load(&self) -> Result<ProbeRegistry> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::registry("registry unavailable"));
        }
        Ok(self.current())
    }

    async fn save(&self, registry: &ProbeRegistry) -> Result<()> {
        *self.registry.lock() = registry.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity(address: &str, name: &str) -> ProbeIdentity {
        ProbeIdentity::new(
            ProbeAddress::new(address).unwrap(),
            ProbeName::new(name).unwrap(),
        )
    }

    #[test]
    fn test_parse_registry() {
        let content = r#"
# grillgauge
PROBE_MACS="AA:00:00:00:00:01,AA:00:00:00:00:02"
PROBE_NAMES="Brisket,Probe2"
PROBE_LAST_SEEN="2024-05-01T12:00:00Z,"
IGNORED_MACS="BB:00:00:00:00:01"
"#;
        let registry = parse_registry(content).unwrap();

        assert_eq!(registry.len(), 2);
        let first = &registry.probes()[0];
        assert_eq!(first.identity.name.as_str(), "Brisket");
        assert_eq!(
            first.last_seen,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(registry.probes()[1].last_seen, None);
        assert!(registry.is_ignored(&ProbeAddress::new("BB:00:00:00:00:01").unwrap()));
    }

    #[test]
    fn test_parse_missing_name_uses_fallback() {
        let registry = parse_registry("PROBE_MACS=AA:BB:CC:DD:EE:FF\n").unwrap();
        assert_eq!(registry.probes()[0].identity.name.as_str(), "grillprobeE_EEFF");
    }

    #[test]
    fn test_parse_empty_content() {
        let registry = parse_registry("OTHER=1\n").unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.ignored().count(), 0);
    }

    #[test]
    fn test_render_preserves_unrelated_lines() {
        let existing =
            "# settings\nGRILLGAUGE_PORT=9000\nPROBE_MACS=\"old\"\nexport IGNORED_MACS=x\n";
        let mut registry = ProbeRegistry::new();
        registry
            .register(identity("AA:00:00:00:00:01", "Probe1"), None)
            .unwrap();

        let rendered = render_registry(existing, &registry);
        assert!(rendered.starts_with("# settings\nGRILLGAUGE_PORT=9000\n"));
        assert!(rendered.contains("PROBE_MACS=\"AA:00:00:00:00:01\"\n"));
        assert!(rendered.contains("PROBE_NAMES=\"Probe1\"\n"));
        assert!(rendered.contains("IGNORED_MACS=\"\"\n"));
        assert!(!rendered.contains("old"));
        assert!(!rendered.contains("export"));
    }

    #[tokio::test]
    async fn test_env_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        tokio::fs::write(&path, "GRILLGAUGE_PORT=9000\n").await.unwrap();

        let store = EnvFileStore::new(&path);
        let seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let mut registry = store.load().await.unwrap();
        assert!(registry.is_empty());
        registry
            .register(identity("AA:00:00:00:00:01", "Pork Shoulder"), Some(seen))
            .unwrap();
        registry.ignore(ProbeAddress::new("BB:00:00:00:00:01").unwrap());
        store.save(&registry).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded, registry);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("GRILLGAUGE_PORT=9000"));
        assert!(content.contains("PROBE_LAST_SEEN=\"2024-05-01T12:00:00Z\""));
    }

    #[test]
    fn test_escape_quoted() {
        assert_eq!(escape_quoted("Probe1,Probe2"), "Probe1,Probe2");
        assert_eq!(escape_quoted("Rib $EYE"), "Rib \\$EYE");
        assert_eq!(escape_quoted("Left\\Right"), "Left\\\\Right");
    }

    #[tokio::test]
    async fn test_env_file_round_trip_with_special_characters() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvFileStore::new(dir.path().join(".env"));

        let mut registry = ProbeRegistry::new();
        registry
            .register(identity("AA:00:00:00:00:01", "Rib $EYE"), None)
            .unwrap();
        registry
            .register(identity("AA:00:00:00:00:02", "Left\\Right"), None)
            .unwrap();
        registry
            .register(identity("AA:00:00:00:00:03", "${HOME} roast"), None)
            .unwrap();
        store.save(&registry).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded, registry);
        assert_eq!(reloaded.probes()[0].identity.name.as_str(), "Rib $EYE");
        assert_eq!(reloaded.probes()[1].identity.name.as_str(), "Left\\Right");
    }

    #[test]
    fn test_parse_non_ascii_address_without_name() {
        let registry = parse_registry("PROBE_MACS=A\u{c9}BCD\n").unwrap();
        assert_eq!(
            registry.probes()[0].identity.name.as_str(),
            "grillprobeE_\u{c9}BCD"
        );
    }

    #[tokio::test]
    async fn test_env_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvFileStore::new(dir.path().join("missing.env"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_failures() {
        let store = MemoryStore::default();
        assert!(store.load().await.is_ok());

        store.fail_loads(true);
        assert!(matches!(store.load().await, Err(Error::Registry(_))));

        store.fail_loads(false);
        store.save(&ProbeRegistry::new()).await.unwrap();
        assert_eq!(store.saves(), 1);
    }
}
