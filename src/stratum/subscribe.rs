use super::*;

/// `mining.subscribe` takes an optional user agent and an optional resume id
/// (which we accept and ignore).
#[derive(Debug, PartialEq, Default)]
pub struct Subscribe {
    pub user_agent: Option<String>,
    pub resume_id: Option<String>,
}

impl Serialize for Subscribe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = match (&self.user_agent, &self.resume_id) {
            (None, None) => 0,
            (_, None) => 1,
            _ => 2,
        };
        let mut seq = serializer.serialize_seq(Some(len))?;
        if len >= 1 {
            seq.serialize_element(self.user_agent.as_deref().unwrap_or(""))?;
        }
        if len == 2 {
            seq.serialize_element(&self.resume_id)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Subscribe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let params = Vec::<Value>::deserialize(deserializer)?;

        if params.len() > 2 {
            return Err(de::Error::custom(
                "mining.subscribe receives no more than 2 parameters",
            ));
        }

        let as_string = |value: &Value| -> Result<String, D::Error> {
            value
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| de::Error::custom("expected string parameter"))
        };

        Ok(Subscribe {
            user_agent: params.first().map(&as_string).transpose()?,
            resume_id: match params.get(1) {
                Some(Value::Null) | None => None,
                Some(value) => Some(as_string(value)?),
            },
        })
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeResult {
    pub subscriptions: Vec<(String, String)>,
    pub extranonce1: Extranonce,
    pub extranonce2_size: u32,
}

impl Serialize for SubscribeResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.subscriptions)?;
        seq.serialize_element(&self.extranonce1)?;
        seq.serialize_element(&self.extranonce2_size)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SubscribeResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (subscriptions, extranonce1, extranonce2_size) =
            <(Vec<(String, String)>, Extranonce, u32)>::deserialize(deserializer)?;

        Ok(SubscribeResult {
            subscriptions,
            extranonce1,
            extranonce2_size,
        })
    }
}
