use serde_json::{Map, Value};

use crate::snapshot::SnapshotStore;
use crate::types::{DeviceId, Event};

/// One changed leaf, addressed by a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Change {
    pub path: String,
    pub old: Value,
    pub new: Value,
}

pub(crate) fn diff_json(previous: &Value, current: &Value, path_prefix: &str, changes: &mut Vec<Change>) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Map::new()), curr_val, &path, changes)
                    }
                    None => changes.push(Change {
                        path,
                        old: Value::Null,
                        new: curr_val.clone(),
                    }),
                }
            }
        }
        (prev, curr) if prev != curr => changes.push(Change {
            path: path_prefix.to_string(),
            old: prev.clone(),
            new: curr.clone(),
        }),
        _ => {}
    }
}

/// Events describing how `next` differs from `previous`. Device order is
/// sorted by id so the output is deterministic.
pub(crate) fn diff_stores(previous: &SnapshotStore, next: &SnapshotStore) -> Vec<Event> {
    let mut events = Vec::new();

    let mut next_devices: Vec<_> = next.iter().collect();
    next_devices.sort_by(|a, b| a.id().cmp(b.id()));

    for snap in next_devices {
        let Some(prev) = previous.get(snap.id()) else {
            events.push(Event::DeviceAdded {
                device_id: snap.id().clone(),
                name: snap.display_name().to_string(),
            });
            continue;
        };
        for (param, new) in snap.params() {
            let old = prev.params().get(param);
            if old != Some(new) {
                events.push(Event::ParamChanged {
                    device_id: snap.id().clone(),
                    param: param.clone(),
                    old: old.cloned(),
                    new: new.clone(),
                });
            }
        }
    }

    let mut removed: Vec<&DeviceId> = previous
        .iter()
        .map(|s| s.id())
        .filter(|id| !next.contains(id))
        .collect();
    removed.sort();
    events.extend(removed.into_iter().map(|id| Event::DeviceRemoved { device_id: id.clone() }));

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::types::{DeviceRef, params_of};

    fn store(devices: &[(&str, i64)]) -> SnapshotStore {
        let devices = devices
            .iter()
            .map(|(id, pwr)| DeviceRef {
                endpoint_id: DeviceId::from(*id),
                friendly_name: id.to_uppercase(),
                params: params_of([("pwr", *pwr), ("temp", 240)]),
                ..Default::default()
            })
            .collect();
        SnapshotStore::from_devices(devices, Utc::now())
    }

    #[test]
    fn nested_changes_get_dotted_paths() {
        let prev = json!({"event": {"payload": {"status": 0}}});
        let curr = json!({"event": {"payload": {"status": -1, "msg": "x"}}});
        let mut changes = Vec::new();
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| c.path == "event.payload.status" && c.new == -1));
        assert!(changes.iter().any(|c| c.path == "event.payload.msg" && c.old.is_null()));
    }

    #[test]
    fn identical_values_produce_nothing() {
        let v = json!({"a": {"b": [1, 2]}});
        let mut changes = Vec::new();
        diff_json(&v, &v, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn first_refresh_adds_every_device() {
        let events = diff_stores(&SnapshotStore::default(), &store(&[("b", 1), ("a", 0)]));
        assert_eq!(
            events,
            vec![
                Event::DeviceAdded { device_id: DeviceId::from("a"), name: "A".into() },
                Event::DeviceAdded { device_id: DeviceId::from("b"), name: "B".into() },
            ]
        );
    }

    #[test]
    fn param_change_and_removal() {
        let events = diff_stores(&store(&[("a", 1), ("b", 1)]), &store(&[("a", 0)]));
        assert_eq!(
            events,
            vec![
                Event::ParamChanged {
                    device_id: DeviceId::from("a"),
                    param: "pwr".into(),
                    old: Some(json!(1)),
                    new: json!(0),
                },
                Event::DeviceRemoved { device_id: DeviceId::from("b") },
            ]
        );
    }
}
