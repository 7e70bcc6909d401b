//! Per-step execution policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the interpreter reacts once a node has exhausted its retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Propagate the failure to the parent.
    #[default]
    Default,
    /// Pause and let the operator retry, continue past, or abort.
    AskUser,
    /// End the whole run; no enclosing node may recover.
    Terminate,
}

/// Retry, timeout and escalation settings attached to every step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Policy {
    /// Extra attempts after the first failure.
    pub retry_count: u32,
    /// Per-attempt time limit.
    #[serde(default, with = "duration_millis")]
    pub timeout: Option<Duration>,
    pub error_handling: ErrorHandling,
}

impl Policy {
    pub fn with_retry(self, retry_count: u32) -> Self {
        Self { retry_count, ..self }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_error_handling(self, error_handling: ErrorHandling) -> Self {
        Self { error_handling, ..self }
    }

    /// Total attempts allowed before escalation.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_replace_single_fields() {
        let policy = Policy::default()
            .with_retry(3)
            .with_timeout(Duration::from_millis(250))
            .with_error_handling(ErrorHandling::AskUser);
        assert_eq!(policy.retry_count, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.timeout, Some(Duration::from_millis(250)));
        assert_eq!(policy.error_handling, ErrorHandling::AskUser);

        let relaxed = policy.with_retry(0);
        assert_eq!(relaxed.timeout, policy.timeout);
        assert_eq!(relaxed.max_attempts(), 1);
    }

    #[test]
    fn timeout_serializes_as_millis() {
        let policy = Policy::default().with_timeout(Duration::from_secs(2));
        let json = serde_json::to_value(policy).expect("serialize policy");
        assert_eq!(json["timeout"], 2000);
        assert_eq!(json["error_handling"], "default");
        let back: Policy = serde_json::from_value(json).expect("deserialize policy");
        assert_eq!(back, policy);
    }
}
