//! MQTT topic builders and parsers for the AWS IoT Device Shadow hierarchy.
//!
//! Topic structure:
//! ```text
//! $aws/things/{thing}/shadow/update
//! $aws/things/{thing}/shadow/update/accepted
//! $aws/things/{thing}/shadow/update/rejected
//! $aws/things/{thing}/shadow/update/delta
//! $aws/things/{thing}/shadow/name/{shadow}/update
//! $aws/things/{thing}/shadow/name/{shadow}/update/accepted
//! $aws/things/{thing}/shadow/name/{shadow}/update/rejected
//! $aws/things/{thing}/shadow/name/{shadow}/update/delta
//! ```
//!
//! `shadow = None` addresses the classic (unnamed) shadow.

const PREFIX: &str = "$aws/things";

/// Topic of the alert raised by the threshold monitor.
pub const DEFAULT_WARNING_TOPIC: &str = "dht_sensor/warning";

fn shadow_root(thing: &str, shadow: Option<&str>) -> String {
    match shadow {
        Some(name) => format!("{PREFIX}/{thing}/shadow/name/{name}"),
        None => format!("{PREFIX}/{thing}/shadow"),
    }
}

// ─── Update topics ───

pub fn update(thing: &str, shadow: Option<&str>) -> String {
    format!("{}/update", shadow_root(thing, shadow))
}

pub fn update_accepted(thing: &str, shadow: Option<&str>) -> String {
    format!("{}/update/accepted", shadow_root(thing, shadow))
}

pub fn update_rejected(thing: &str, shadow: Option<&str>) -> String {
    format!("{}/update/rejected", shadow_root(thing, shadow))
}

pub fn update_delta(thing: &str, shadow: Option<&str>) -> String {
    format!("{}/update/delta", shadow_root(thing, shadow))
}

// ─── Topic parsing ───

/// Shadow operation addressed by a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowOperation {
    Update,
    UpdateAccepted,
    UpdateRejected,
    UpdateDelta,
}

/// Parsed shadow topic components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedShadowTopic {
    pub thing_name: String,
    pub shadow_name: Option<String>,
    pub operation: ShadowOperation,
}

/// Parse a shadow topic string into its components.
/// Returns `None` for anything outside the update topic family.
pub fn parse_shadow_topic(topic: &str) -> Option<ParsedShadowTopic> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() < 5 || parts[0] != "$aws" || parts[1] != "things" || parts[3] != "shadow" {
        return None;
    }

    let thing_name = parts[2].to_string();
    if thing_name.is_empty() {
        return None;
    }

    let (shadow_name, rest) = if parts[4] == "name" {
        let name = parts.get(5).filter(|n| !n.is_empty())?;
        (Some(name.to_string()), &parts[6..])
    } else {
        (None, &parts[4..])
    };

    let operation = match rest {
        ["update"] => ShadowOperation::Update,
        ["update", "accepted"] => ShadowOperation::UpdateAccepted,
        ["update", "rejected"] => ShadowOperation::UpdateRejected,
        ["update", "delta"] => ShadowOperation::UpdateDelta,
        _ => return None,
    };

    Some(ParsedShadowTopic {
        thing_name,
        shadow_name,
        operation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_shadow_topics() {
        assert_eq!(
            update("named_test", Some("controller")),
            "$aws/things/named_test/shadow/name/controller/update"
        );
        assert_eq!(
            update_accepted("named_test", Some("controller")),
            "$aws/things/named_test/shadow/name/controller/update/accepted"
        );
        assert_eq!(
            update_rejected("named_test", Some("dht_sensor")),
            "$aws/things/named_test/shadow/name/dht_sensor/update/rejected"
        );
        assert_eq!(
            update_delta("named_test", Some("controller")),
            "$aws/things/named_test/shadow/name/controller/update/delta"
        );
    }

    #[test]
    fn classic_shadow_topics() {
        assert_eq!(update("rpi-001", None), "$aws/things/rpi-001/shadow/update");
        assert_eq!(
            update_delta("rpi-001", None),
            "$aws/things/rpi-001/shadow/update/delta"
        );
    }

    #[test]
    fn parse_named_topic() {
        let parsed =
            parse_shadow_topic("$aws/things/named_test/shadow/name/controller/update/delta")
                .unwrap();
        assert_eq!(parsed.thing_name, "named_test");
        assert_eq!(parsed.shadow_name.as_deref(), Some("controller"));
        assert_eq!(parsed.operation, ShadowOperation::UpdateDelta);
    }

    #[test]
    fn parse_classic_topic() {
        let parsed = parse_shadow_topic("$aws/things/rpi-001/shadow/update/accepted").unwrap();
        assert_eq!(parsed.thing_name, "rpi-001");
        assert_eq!(parsed.shadow_name, None);
        assert_eq!(parsed.operation, ShadowOperation::UpdateAccepted);
    }

    #[test]
    fn parse_roundtrips_builders() {
        for shadow in [None, Some("dht_sensor")] {
            let parsed = parse_shadow_topic(&update_rejected("t", shadow)).unwrap();
            assert_eq!(parsed.shadow_name.as_deref(), shadow);
            assert_eq!(parsed.operation, ShadowOperation::UpdateRejected);
        }
    }

    #[test]
    fn parse_invalid_topic() {
        assert!(parse_shadow_topic("dht_sensor/warning").is_none());
        assert!(parse_shadow_topic("$aws/things/t/shadow/get/accepted").is_none());
        assert!(parse_shadow_topic("$aws/things/t/shadow/update/documents").is_none());
        assert!(parse_shadow_topic("$aws/things/t/shadow/name").is_none());
        assert!(parse_shadow_topic("$aws/things//shadow/update").is_none());
        assert!(parse_shadow_topic("").is_none());
    }
}
