use std::{collections::BTreeMap, sync::Mutex};

use rpc_protocol::Value;

/// Parent-side read-only mirror of the target's exposed properties
/// (spec.md §4.5). Populated from the `Ready` envelope's initial burst and
/// kept current by applying every `PropertyUpdate` the worker emits; the
/// parent never writes through it (spec.md Non-goals: "parent-to-child
/// property writes").
#[derive(Default)]
pub struct PropertyMirror {
    values: Mutex<BTreeMap<String, Value>>,
}

impl PropertyMirror {
    pub fn seed(initial: Vec<(String, Value)>) -> Self {
        Self {
            values: Mutex::new(
                initial
                    .into_iter()
                    .filter(|(name, _)| !name.starts_with('$'))
                    .collect(),
            ),
        }
    }

    /// Applies one `PropertyUpdate`, replacing any prior value for `name`.
    /// A name beginning with `$` is dropped rather than applied (spec.md
    /// §4.4 "Property mirror updates", §8 invariant 3) — defense in depth
    /// against a misbehaving or future `RpcTarget` impl that reports a
    /// lifecycle-reserved name via [`rpc_worker::RpcTarget::properties`].
    pub fn update(&self, name: String, value: Value) {
        if name.starts_with('$') {
            return;
        }
        self.values.lock().expect("mirror poisoned").insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.lock().expect("mirror poisoned").get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.values
            .lock()
            .expect("mirror poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_values_are_visible_immediately() {
        let mirror = PropertyMirror::seed(vec![("count".to_string(), Value::Int(0))]);
        assert_eq!(mirror.get("count"), Some(Value::Int(0)));
    }

    #[test]
    fn update_overwrites_the_prior_value() {
        let mirror = PropertyMirror::seed(vec![("count".to_string(), Value::Int(0))]);
        mirror.update("count".to_string(), Value::Int(1));
        assert_eq!(mirror.get("count"), Some(Value::Int(1)));
    }

    #[test]
    fn update_can_introduce_a_previously_unseen_property() {
        let mirror = PropertyMirror::default();
        mirror.update("label".to_string(), Value::Str("hi".to_string()));
        assert_eq!(mirror.get("label"), Some(Value::Str("hi".to_string())));
    }

    #[test]
    fn unknown_property_is_none() {
        let mirror = PropertyMirror::default();
        assert_eq!(mirror.get("nope"), None);
    }

    #[test]
    fn dollar_prefixed_update_is_dropped() {
        let mirror = PropertyMirror::default();
        mirror.update("$internal".to_string(), Value::Int(1));
        assert_eq!(mirror.get("$internal"), None);
    }

    #[test]
    fn dollar_prefixed_seed_entry_is_dropped() {
        let mirror = PropertyMirror::seed(vec![
            ("count".to_string(), Value::Int(0)),
            ("$hidden".to_string(), Value::Bool(true)),
        ]);
        assert_eq!(mirror.get("count"), Some(Value::Int(0)));
        assert_eq!(mirror.get("$hidden"), None);
    }
}
