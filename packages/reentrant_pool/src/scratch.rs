use crate::{Context, ContextSizing, Result};

/// Scratch state for one rasterization pass: edge coordinates and per-scanline crossings.
///
/// Both buffers are sized to [`ContextSizing::initial_capacity`] when the context is created.
/// They grow in whole [`ContextSizing::capacity_increment`] steps when reserved past their
/// capacity, and [`reset()`][Context::reset] shrinks them back to the initial capacity so a
/// single oversized operation does not pin its memory for the lifetime of the pool.
///
/// # Example
///
/// ```
/// use reentrant_pool::{ContextProvider, ScratchContext};
///
/// let provider = ContextProvider::<ScratchContext>::new();
///
/// let mut scratch = provider.acquire()?;
/// scratch.reserve_edges(10)?;
/// scratch.push_edge(1.5);
/// assert_eq!(scratch.edges(), &[1.5]);
/// # Ok::<(), reentrant_pool::Error>(())
/// ```
#[derive(Debug)]
pub struct ScratchContext {
    sizing: ContextSizing,
    edges: Vec<f32>,
    crossings: Vec<i32>,
}

impl ScratchContext {
    /// Edge coordinates recorded so far.
    #[must_use]
    pub fn edges(&self) -> &[f32] {
        &self.edges
    }

    /// Crossings recorded so far.
    #[must_use]
    pub fn crossings(&self) -> &[i32] {
        &self.crossings
    }

    /// Appends an edge coordinate.
    ///
    /// Call [`reserve_edges()`][Self::reserve_edges] first to grow in configured increments;
    /// otherwise the buffer grows with the standard library's amortized strategy.
    pub fn push_edge(&mut self, value: f32) {
        self.edges.push(value);
    }

    /// Appends a crossing.
    pub fn push_crossing(&mut self, value: i32) {
        self.crossings.push(value);
    }

    /// Sorts the recorded crossings in ascending order.
    pub fn sort_crossings(&mut self) {
        self.crossings.sort_unstable();
    }

    /// Ensures room for `additional` more edge coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`][crate::Error::Allocation] if the buffer cannot grow.
    pub fn reserve_edges(&mut self, additional: usize) -> Result<()> {
        reserve_in_increments(&mut self.edges, additional, &self.sizing)
    }

    /// Ensures room for `additional` more crossings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`][crate::Error::Allocation] if the buffer cannot grow.
    pub fn reserve_crossings(&mut self, additional: usize) -> Result<()> {
        reserve_in_increments(&mut self.crossings, additional, &self.sizing)
    }

    /// Whether both buffers are empty, as they are right after creation or reset.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.edges.is_empty() && self.crossings.is_empty()
    }

    /// Current capacity of the edge buffer, in elements.
    #[must_use]
    pub fn edge_capacity(&self) -> usize {
        self.edges.capacity()
    }

    /// Current capacity of the crossing buffer, in elements.
    #[must_use]
    pub fn crossing_capacity(&self) -> usize {
        self.crossings.capacity()
    }
}

impl Context for ScratchContext {
    fn create(sizing: &ContextSizing) -> Result<Self> {
        let mut edges = Vec::new();
        edges.try_reserve_exact(sizing.initial_capacity())?;

        let mut crossings = Vec::new();
        crossings.try_reserve_exact(sizing.initial_capacity())?;

        Ok(Self {
            sizing: *sizing,
            edges,
            crossings,
        })
    }

    fn reset(&mut self) {
        let initial = self.sizing.initial_capacity();

        self.edges.clear();
        self.edges.shrink_to(initial);

        self.crossings.clear();
        self.crossings.shrink_to(initial);
    }
}

fn reserve_in_increments<T>(
    buffer: &mut Vec<T>,
    additional: usize,
    sizing: &ContextSizing,
) -> Result<()> {
    let required = buffer.len().saturating_add(additional);

    if required <= buffer.capacity() {
        return Ok(());
    }

    let target = sizing.grown_capacity(required);
    buffer.try_reserve_exact(target.saturating_sub(buffer.len()))?;

    Ok(())
}
