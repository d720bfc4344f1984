use serde::de::DeserializeOwned;

/// Diagnostics produced while loading a config file.
///
/// Loading is best effort: callers always get a `DapConfig` when deserialization succeeds,
/// plus the keys that were present in the input but not recognized by the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    /// Unrecognized keys, rendered as dotted TOML paths (for example `debug.start_timeout`).
    pub unknown_keys: Vec<String>,
}

impl ConfigDiagnostics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unknown_keys.is_empty()
    }

    /// Log every diagnostic at `warn`. Unknown keys never fail a load.
    pub fn log(&self) {
        for key in &self.unknown_keys {
            tracing::warn!(target: "magic.config", key = %key, "ignoring unknown config key");
        }
    }
}

pub(crate) fn deserialize_toml_with_unknown_keys<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), toml::de::Error> {
    let mut unknown = Vec::<String>::new();
    let deserializer = toml::de::Deserializer::new(text);
    let value = serde_ignored::deserialize(deserializer, |path| {
        unknown.push(normalize_serde_ignored_path(path));
    })?;
    unknown.sort();
    unknown.dedup();
    Ok((value, unknown))
}

fn normalize_serde_ignored_path(path: serde_ignored::Path) -> String {
    // `serde_ignored` renders root paths with a leading `.`.
    path.to_string().trim_start_matches('.').to_owned()
}
