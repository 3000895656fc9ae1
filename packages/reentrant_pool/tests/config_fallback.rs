//! Configuration fallback warnings are process-wide state, so they are tested in their own test
//! binary with a global subscriber that counts warnings.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use reentrant_pool::{BackingMode, PoolConfig, Retention};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, registry};

struct WarningCounter {
    count: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for WarningCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn bad_values(key: &str) -> Option<String> {
    match key {
        "REENTRANT_POOL_BACKING" => Some("carrier_pigeon".to_string()),
        "REENTRANT_POOL_RETENTION" => Some("sometimes".to_string()),
        _ => None,
    }
}

#[test]
fn each_fallback_is_warned_about_once() {
    let count = Arc::new(AtomicUsize::new(0));

    tracing::subscriber::set_global_default(registry().with(WarningCounter {
        count: Arc::clone(&count),
    }))
    .unwrap();

    for _ in 0..3 {
        let config = PoolConfig::from_properties(bad_values);

        assert_eq!(config.backing(), BackingMode::Affinity);
        assert_eq!(config.retention(), Retention::WhileMemoryAvailable);
    }

    // One warning per misconfigured key, however many times the configuration is loaded.
    assert_eq!(count.load(Ordering::Relaxed), 2);
}
