//! Persisted layout migrations
//!
//! Each step rewrites a raw JSON document from one schema version to the
//! next. Steps are pure and idempotent: running one on a document that is
//! already in the target shape returns it unchanged.

use crate::error::CoreError;
use serde_json::{json, Map, Value};

/// Schema written by this build
pub const SCHEMA_VERSION: u32 = 3;

/// Bring a payload from `from` up to `SCHEMA_VERSION`
pub fn migrate(mut value: Value, from: u32) -> Result<Value, CoreError> {
    if from == 0 || from > SCHEMA_VERSION {
        return Err(CoreError::Migration {
            from,
            to: SCHEMA_VERSION,
            message: "unknown schema version".to_string(),
        });
    }

    let mut version = from;
    while version < SCHEMA_VERSION {
        value = match version {
            1 => v1_to_v2(value)?,
            _ => v2_to_v3(value)?,
        };
        version += 1;
    }
    Ok(value)
}

fn object(value: Value, from: u32) -> Result<Map<String, Value>, CoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::Migration {
            from,
            to: from + 1,
            message: format!("expected an object, found {}", type_name(&other)),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn rename(map: &mut Map<String, Value>, old: &str, new: &str) {
    if let Some(value) = map.remove(old) {
        map.entry(new.to_string()).or_insert(value);
    }
}

/// v1 stored the interval in seconds and used short field names
fn v1_to_v2(value: Value) -> Result<Value, CoreError> {
    let mut map = object(value, 1)?;

    if let Some(secs) = map.remove("polling_interval_secs") {
        let secs = secs.as_u64().ok_or_else(|| CoreError::Migration {
            from: 1,
            to: 2,
            message: "polling_interval_secs is not an integer".to_string(),
        })?;
        if secs == 0 || secs % 60 != 0 {
            return Err(CoreError::Migration {
                from: 1,
                to: 2,
                message: format!("polling interval of {}s is not whole minutes", secs),
            });
        }
        map.entry("polling_interval_minutes".to_string())
            .or_insert(json!(secs / 60));
    }
    rename(&mut map, "failure_count", "consecutive_failure_count");
    rename(&mut map, "last_success", "last_successful_fetch");

    Ok(Value::Object(map))
}

/// v3 nests services under properties and groups breaker fields
fn v2_to_v3(value: Value) -> Result<Value, CoreError> {
    let map = object(value, 2)?;
    if map.contains_key("breaker") && map.contains_key("snapshot") {
        return Ok(Value::Object(map));
    }

    let field = |name: &str| map.get(name).cloned().unwrap_or(Value::Null);

    let mut properties = Map::new();
    if let Some(services) = map.get("services").and_then(Value::as_array) {
        for service in services {
            let (Some(property_id), Some(consumer_id)) = (
                service.get("property_id").and_then(Value::as_str),
                service.get("consumer_id").and_then(Value::as_str),
            ) else {
                return Err(CoreError::Migration {
                    from: 2,
                    to: 3,
                    message: "service entry without property_id or consumer_id".to_string(),
                });
            };

            let property = properties
                .entry(property_id.to_string())
                .or_insert_with(|| {
                    json!({
                        "id": property_id,
                        "name": service.get("property_name").cloned().unwrap_or(json!(property_id)),
                        "address": "",
                        "services": {},
                    })
                });
            if let Some(slot) = property.get_mut("services").and_then(Value::as_object_mut) {
                slot.insert(
                    consumer_id.to_string(),
                    json!({
                        "kind": service.get("kind").cloned().unwrap_or(Value::Null),
                        "consumer_id": consumer_id,
                        "series": service.get("records").cloned().unwrap_or(json!([])),
                        "degraded": service.get("degraded").cloned().unwrap_or(json!(false)),
                        "last_updated": service.get("last_updated").cloned().unwrap_or(Value::Null),
                    }),
                );
            }
        }
    }

    let failures = map
        .get("consecutive_failure_count")
        .cloned()
        .unwrap_or(json!(0));

    Ok(json!({
        "polling_interval": map.get("polling_interval_minutes").cloned().unwrap_or(json!(5)),
        "breaker": {
            "state": map.get("circuit_state").cloned().unwrap_or(json!("closed")),
            "consecutive_failures": failures,
            "opened_at": field("circuit_opened_at"),
        },
        "last_successful_fetch": field("last_successful_fetch"),
        "snapshot": {
            "properties": properties,
            "last_successful_fetch": field("last_successful_fetch"),
        },
        "errors": map.get("errors").cloned().unwrap_or(json!([])),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_payload() -> Value {
        json!({
            "polling_interval_secs": 900,
            "circuit_state": "open",
            "failure_count": 6,
            "last_success": "2024-06-01T10:00:00Z",
            "services": [
                {
                    "property_id": "p1",
                    "property_name": "Home",
                    "consumer_id": "E-1",
                    "kind": "electricity",
                    "records": [{"date": "2024-05-31", "usage": 12.5, "cost": 3.4}]
                },
                {
                    "property_id": "p1",
                    "consumer_id": "G-1",
                    "kind": "gas",
                    "records": []
                }
            ],
            "errors": []
        })
    }

    #[test]
    fn test_v1_to_current() {
        let migrated = migrate(v1_payload(), 1).unwrap();

        assert_eq!(migrated["polling_interval"], json!(15));
        assert_eq!(migrated["breaker"]["state"], json!("open"));
        assert_eq!(migrated["breaker"]["consecutive_failures"], json!(6));
        assert_eq!(migrated["breaker"]["opened_at"], Value::Null);
        assert_eq!(
            migrated["last_successful_fetch"],
            json!("2024-06-01T10:00:00Z")
        );

        let home = &migrated["snapshot"]["properties"]["p1"];
        assert_eq!(home["name"], json!("Home"));
        assert_eq!(home["services"]["E-1"]["series"][0]["usage"], json!(12.5));
        assert_eq!(home["services"]["G-1"]["kind"], json!("gas"));
    }

    #[test]
    fn test_steps_are_idempotent() {
        let v2 = v1_to_v2(v1_payload()).unwrap();
        assert_eq!(v1_to_v2(v2.clone()).unwrap(), v2);

        let v3 = v2_to_v3(v2).unwrap();
        assert_eq!(v2_to_v3(v3.clone()).unwrap(), v3);
    }

    #[test]
    fn test_migration_is_deterministic() {
        assert_eq!(
            migrate(v1_payload(), 1).unwrap(),
            migrate(v1_payload(), 1).unwrap()
        );
    }

    #[test]
    fn test_current_version_untouched() {
        let doc = json!({"polling_interval": 5, "breaker": {}, "snapshot": {}});
        assert_eq!(migrate(doc.clone(), SCHEMA_VERSION).unwrap(), doc);
    }

    #[test]
    fn test_rejects_unknown_versions() {
        assert!(migrate(json!({}), 0).is_err());
        assert!(migrate(json!({}), SCHEMA_VERSION + 1).is_err());
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert!(matches!(
            migrate(json!([1, 2]), 1),
            Err(CoreError::Migration { from: 1, to: 2, .. })
        ));

        let odd_interval = json!({"polling_interval_secs": 90});
        assert!(migrate(odd_interval, 1).is_err());

        let orphan = json!({"services": [{"kind": "gas"}]});
        assert!(matches!(
            migrate(orphan, 2),
            Err(CoreError::Migration { from: 2, to: 3, .. })
        ));
    }
}
