/// Undo log for the side effects of one transition.
///
/// Hooks and recorders that write their own state register the inverse of
/// each write. The coordinator commits the journal when the transition is
/// stored and rolls it back, newest first, when any later stage fails.
#[must_use = "a journal must be committed or rolled back"]
#[derive(Default)]
pub struct Journal {
    undo: Vec<Box<dyn FnOnce() + Send>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the inverse of a write that has just been applied.
    pub fn on_rollback(&mut self, undo: impl FnOnce() + Send + 'static) {
        self.undo.push(Box::new(undo));
    }

    /// Takes over the undo entries of a nested journal.
    pub fn absorb(&mut self, nested: Journal) {
        self.undo.extend(nested.undo);
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Keeps every write.
    pub fn commit(self) {
        drop(self.undo);
    }

    /// Reverts every write, newest first.
    pub fn rollback(self) {
        for undo in self.undo.into_iter().rev() {
            undo();
        }
    }
}
