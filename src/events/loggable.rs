use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retention class of an audit record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Access-control changes; kept indefinitely.
    Critical,
    #[default]
    Important,
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Anything that can appear as the subject of an audit event named
/// `<entity_type>.<action>`.
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Removals and revocations are always critical.
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "revoked" | "deactivated" | "detached" => Severity::Critical,
            _ => self.severity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Thing;

    impl Loggable for Thing {
        fn entity_type() -> &'static str { "thing" }
        fn subject_id(&self) -> Uuid { Uuid::nil() }
        fn severity(&self) -> Severity { Severity::Noise }
    }

    #[test]
    fn removals_escalate_to_critical() {
        assert_eq!(Thing.severity_for_action("revoked"), Severity::Critical);
        assert_eq!(Thing.severity_for_action("created"), Severity::Noise);
        assert_eq!(Severity::Critical.as_str(), "critical");
    }
}
