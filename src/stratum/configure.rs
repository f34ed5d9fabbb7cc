use super::*;

/// `mining.configure` params. Only the version-rolling extension is honored;
/// any other extension names and config keys are accepted and ignored.
#[derive(Debug, PartialEq, Clone)]
pub struct Configure {
    pub extensions: Vec<String>,
    pub version_rolling_mask: Option<Version>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct ConfigureOptions {
    #[serde(
        rename = "version-rolling.mask",
        skip_serializing_if = "Option::is_none"
    )]
    version_rolling_mask: Option<Version>,
}

impl Serialize for Configure {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let opts = ConfigureOptions {
            version_rolling_mask: self.version_rolling_mask,
        };

        (&self.extensions, &opts).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Configure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (extensions, opts) = <(Vec<String>, ConfigureOptions)>::deserialize(deserializer)?;

        Ok(Configure {
            extensions,
            version_rolling_mask: opts.version_rolling_mask,
        })
    }
}
