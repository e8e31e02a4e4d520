use serde::{Deserialize, Serialize, de::Visitor};

use crate::time::Duration;

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a string in any of the supported formats")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        let dur = v.parse::<Duration>().map_err(serde::de::Error::custom)?;
        Ok(dur)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(DurationVisitor)
    }
}

impl Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Deserialize, Serialize)]
    struct S {
        dur: Duration,
    }

    #[test]
    fn deserialize() {
        let s: S = serde_json::from_str(r#"{"dur": "15d 2m 2s"}"#).unwrap();
        assert_eq!(s.dur.as_secs(), 1_296_122);
    }

    #[test]
    fn deserialize_rejects_numbers() {
        let result = serde_json::from_str::<S>(r#"{"dur": 3600}"#);
        assert!(result.is_err());
    }

    #[test]
    fn serialize() {
        let s = S {
            dur: Duration::from_secs(5400),
        };
        assert_eq!(serde_json::to_string(&s).unwrap(), r#"{"dur":"1h30m"}"#);
    }
}
