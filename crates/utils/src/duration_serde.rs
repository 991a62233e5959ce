//! Serde adapters for durations written as plain integers in config files.

pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Intervals {
        #[serde(with = "super::millis")]
        debounce: Duration,
        #[serde(with = "super::secs")]
        export: Duration,
    }

    #[test]
    fn test_integer_durations() {
        let parsed: Intervals =
            serde_json::from_str(r#"{"debounce": 500, "export": 5}"#).unwrap();
        assert_eq!(parsed.debounce, Duration::from_millis(500));
        assert_eq!(parsed.export, Duration::from_secs(5));
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            r#"{"debounce":500,"export":5}"#
        );
    }
}
