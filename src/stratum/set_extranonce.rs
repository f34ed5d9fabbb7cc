use super::*;

/// `mining.set_extranonce` params: the new extranonce1 and the extranonce2
/// size the miner should iterate.
#[derive(Debug, Clone, PartialEq)]
pub struct SetExtranonce {
    pub extranonce1: Extranonce,
    pub extranonce2_size: u32,
}

impl Serialize for SetExtranonce {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.extranonce1)?;
        seq.serialize_element(&self.extranonce2_size)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SetExtranonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (extranonce1, extranonce2_size) = <(Extranonce, u32)>::deserialize(deserializer)?;
        Ok(SetExtranonce {
            extranonce1,
            extranonce2_size,
        })
    }
}
