//! Configures a provider from environment variables and releases idle contexts on demand.
//!
//! Try `REENTRANT_POOL_BACKING=queue REENTRANT_POOL_RETENTION=minimal` to see the effect.

use std::thread;

use reentrant_pool::{ContextProvider, MemoryPressure, PoolConfig, ScratchContext};

fn main() -> reentrant_pool::Result<()> {
    let provider = ContextProvider::<ScratchContext>::builder()
        .config(PoolConfig::from_env())
        .build();

    println!("backing: {}", provider.config().backing());
    println!("retention: {}", provider.config().retention());

    thread::scope(|scope| {
        for worker in 0..4_i32 {
            let provider = &provider;

            scope.spawn(move || {
                for step in 0..100 {
                    provider
                        .with_context(|context| {
                            context.push_crossing(step * worker);
                            context.sort_crossings();
                        })
                        .expect("scratch contexts of the default size always fit in memory");
                }
            });
        }
    });

    let report = provider.reclaim(MemoryPressure::Moderate);
    println!(
        "reclaim pass examined {} idle contexts and dropped {}",
        report.examined(),
        report.reclaimed()
    );

    let stats = provider.stats();
    println!(
        "created {}, reused {}, reclaimed {}",
        stats.created(),
        stats.reused(),
        stats.reclaimed()
    );

    Ok(())
}
