use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// DataSource: the discriminator written on every row
// ---------------------------------------------------------------------------

/// Identifies the upstream an individual row was collected from. The
/// canonical set is closed; anything else is carried through opaquely so
/// operators can point the engine at bespoke stores without a code change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataSource {
    BitbucketServer,
    GitHub,
    GitLab,
    CustomEtl,
    Other(String),
}

impl DataSource {
    pub fn as_str(&self) -> &str {
        match self {
            DataSource::BitbucketServer => "insight_bitbucket_server",
            DataSource::GitHub => "insight_github",
            DataSource::GitLab => "insight_gitlab",
            DataSource::CustomEtl => "custom_etl",
            DataSource::Other(value) => value,
        }
    }

    /// Parse a discriminator string, falling back to an opaque passthrough
    /// for values outside the canonical set.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "insight_bitbucket_server" => DataSource::BitbucketServer,
            "insight_github" => DataSource::GitHub,
            "insight_gitlab" => DataSource::GitLab,
            "custom_etl" => DataSource::CustomEtl,
            other => DataSource::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DataSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(DataSource::from_str_lossy(&value))
    }
}

// ---------------------------------------------------------------------------
// Project: the unit the orchestrator walks repositories under
// ---------------------------------------------------------------------------

/// An upstream project (Bitbucket project, GitHub organization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Stable key used in identity columns (`project_key`).
    pub key: String,
    /// Display name, when the upstream provides one.
    pub name: Option<String>,
}

impl Project {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_values_round_trip() {
        for value in [
            "insight_bitbucket_server",
            "insight_github",
            "insight_gitlab",
            "custom_etl",
        ] {
            assert_eq!(DataSource::from_str_lossy(value).as_str(), value);
        }
    }

    #[test]
    fn unknown_values_pass_through() {
        let source = DataSource::from_str_lossy("dev_metrics");
        assert_eq!(source, DataSource::Other("dev_metrics".to_string()));
        assert_eq!(source.as_str(), "dev_metrics");
        assert_eq!(serde_json::to_string(&source).unwrap(), "\"dev_metrics\"");
    }
}
