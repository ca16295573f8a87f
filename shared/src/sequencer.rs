/// Source of truth for "which tick are we on".
///
/// Id `0` stands for "no tick yet"; the first issued id is `initial + 1`.
/// Ids only ever grow, so a server that keeps one sequencer for its whole
/// session never reuses an id, even for clients that reconnect.
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    current: u64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes numbering after `initial`.
    pub fn starting_at(initial: u64) -> Self {
        Self { current: initial }
    }

    /// Issues the id of the tick being advanced. Called exactly once per tick.
    pub fn next_id(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// The most recently issued id.
    pub fn current(&self) -> u64 {
        self.current
    }
}
