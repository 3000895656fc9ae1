//! Example from the README.

use reentrant_pool::{ContextProvider, ScratchContext};

fn main() -> reentrant_pool::Result<()> {
    let provider = ContextProvider::<ScratchContext>::new();

    let mut outer = provider.acquire()?;
    outer.push_crossing(7);
    outer.push_crossing(3);

    {
        // A nested operation on the same thread gets its own context.
        let mut inner = provider.acquire()?;
        inner.push_edge(0.5);
        assert_ne!(inner.id(), outer.id());
    }

    outer.sort_crossings();
    println!("crossings: {:?}", outer.crossings());

    Ok(())
}
