use super::*;

/// Block version as 8 big-endian hex digits on the wire.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeFromStr, SerializeDisplay, Copy)]
pub struct Version(pub block::Version);

impl Version {
    /// Apply version rolling: bits covered by `mask` come from `bits`, the
    /// rest stay as-is. `mask` must already be limited to the allowed range.
    pub fn rolled(self, mask: u32, bits: Version) -> Version {
        let base = self.0.to_consensus() as u32;
        let bits = bits.0.to_consensus() as u32;
        Version::from(((base & !mask) | (bits & mask)) as i32)
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = u32::from_str_radix(s, 16)?;
        // The as conversion matches the consensus encoding
        Ok(Self(block::Version::from_consensus(n as i32)))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0.to_consensus())
    }
}

impl From<block::Version> for Version {
    fn from(v: block::Version) -> Self {
        Self(v)
    }
}

impl From<Version> for block::Version {
    fn from(v: Version) -> Self {
        v.0
    }
}

impl From<i32> for Version {
    fn from(value: i32) -> Self {
        Self(block::Version::from_consensus(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn case(version_str: &str, expected_consensus: i32) {
        let version = Version::from_str(version_str).unwrap();

        assert_eq!(version.to_string(), version_str, "Display round-trip failed");

        assert_eq!(
            version.0.to_consensus(),
            expected_consensus,
            "Consensus i32 value mismatch"
        );

        let serialized = serde_json::to_string(&version).unwrap();
        assert_eq!(
            serialized,
            format!("\"{version_str}\""),
            "Serialization mismatch"
        );

        let deserialized = serde_json::from_str::<Version>(&serialized).unwrap();
        assert_eq!(deserialized, version, "Deserialization round-trip failed");
    }

    #[test]
    fn version_bip9_signaling_default() {
        case("20000000", 0x20000000);
    }

    #[test]
    fn version_negative() {
        case("ffffffff", -1);
    }

    #[test]
    fn version_feature_bits_set() {
        case("00000001", 1);
    }

    #[test]
    fn rolling_replaces_only_masked_bits() {
        let template = Version::from(0x2000_0000);
        let mask = 0xffff_ffffu32 & VERSION_ROLLING_ALLOWED;

        let rolled = template.rolled(mask, Version::from_str("00002000").unwrap());
        assert_eq!(rolled, Version::from(0x2000_2000));

        // Bits outside the mask never change, no matter what is submitted.
        let rolled = template.rolled(mask, Version::from_str("ffffffff").unwrap());
        assert_eq!(
            rolled.0.to_consensus() as u32 & !VERSION_ROLLING_ALLOWED,
            0x2000_0000
        );
    }

    #[test]
    fn rolling_with_zero_mask_is_identity() {
        let template = Version::from(0x2000_0002);
        let rolled = template.rolled(0, Version::from_str("1fffe000").unwrap());
        assert_eq!(rolled, template);
    }
}
