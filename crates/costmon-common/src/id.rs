use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

struct Generator {
    machine_id: i32,
    node_id: i32,
    bucket: SnowflakeIdBucket,
}

impl Generator {
    fn new(machine_id: i32, node_id: i32) -> Self {
        Self {
            machine_id,
            node_id,
            bucket: SnowflakeIdBucket::new(machine_id, node_id),
        }
    }
}

static ID_GENERATOR: Mutex<Option<Generator>> = Mutex::new(None);

fn generator() -> MutexGuard<'static, Option<Generator>> {
    ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initializes the process-wide Snowflake generator.
///
/// `machine_id` and `node_id` must each be in `0..32`. Re-initializing with
/// the same pair keeps the running sequence, so repeated calls never yield
/// an id twice.
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = generator();
    if gen
        .as_ref()
        .is_some_and(|g| g.machine_id == machine_id && g.node_id == node_id)
    {
        return;
    }
    *gen = Some(Generator::new(machine_id, node_id));
}

/// Returns the next Snowflake id as a decimal string.
pub fn next_id() -> String {
    let mut gen = generator();
    let gen = gen.get_or_insert_with(|| Generator::new(1, 1));
    gen.bucket.get_id().to_string()
}

/// Returns `"{prefix}-{snowflake}"`, e.g. `alert-7181029384712`.
pub fn prefixed(prefix: &str) -> String {
    format!("{prefix}-{}", next_id())
}

pub fn next_alert_id() -> String {
    prefixed("alert")
}

pub fn next_rule_id() -> String {
    prefixed("rule")
}

pub fn next_calculation_id() -> String {
    prefixed("calc")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn next_id_is_unique_and_numeric() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(id.parse::<i64>().is_ok(), "id should be an i64: {id}");
            assert!(ids.insert(id), "duplicate id generated");
        }
    }

    #[test]
    fn prefixed_ids_carry_their_kind() {
        init(1, 1);
        assert!(next_alert_id().starts_with("alert-"));
        assert!(next_rule_id().starts_with("rule-"));
        assert!(next_calculation_id().starts_with("calc-"));
        assert_ne!(next_alert_id(), next_alert_id());
    }
}
