use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Urgent,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

/// Upgrade nudge for a free account that has used `used` of `capacity` sends.
/// Two left is a warning, one left is urgent, none left is blocked.
pub fn get_upgrade_advisory(used: u32, capacity: u32, is_premium: bool) -> Option<Advisory> {
    if is_premium {
        return None;
    }
    if used >= capacity {
        return Some(Advisory {
            title: "Message limit reached!".to_owned(),
            message: "Upgrade to premium to continue messaging".to_owned(),
            severity: Severity::Blocked,
        });
    }
    match capacity - used {
        1 => Some(Advisory {
            title: "Last message!".to_owned(),
            message: "This is your final free message. Upgrade for unlimited!".to_owned(),
            severity: Severity::Urgent,
        }),
        2 => Some(Advisory {
            title: "Only 2 messages left!".to_owned(),
            message: "Upgrade to keep the conversation going!".to_owned(),
            severity: Severity::Warning,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn severity(used: u32, capacity: u32, premium: bool) -> Option<Severity> {
        get_upgrade_advisory(used, capacity, premium).map(|a| a.severity)
    }

    #[test]
    fn thresholds_for_capacity_five() {
        assert_eq!(severity(0, 5, false), None);
        assert_eq!(severity(2, 5, false), None);
        assert_eq!(severity(3, 5, false), Some(Severity::Warning));
        assert_eq!(severity(4, 5, false), Some(Severity::Urgent));
        assert_eq!(severity(5, 5, false), Some(Severity::Blocked));
        assert_eq!(severity(9, 5, false), Some(Severity::Blocked));
    }

    #[test]
    fn premium_never_gets_advisory() {
        for used in 0..10 {
            assert_eq!(get_upgrade_advisory(used, 5, true), None);
        }
    }

    #[test]
    fn tiny_capacities() {
        assert_eq!(severity(0, 1, false), Some(Severity::Urgent));
        assert_eq!(severity(0, 0, false), Some(Severity::Blocked));
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Urgent).unwrap(), "\"urgent\"");
    }
}
