use log::debug;

/// Deferred gradient propagation recorded by a forward operation.
///
/// A closure owns clones of the handles of its operands and its output,
/// reads the output gradient and adds into the operand gradients.
pub type BackwardClosure = Box<dyn FnOnce()>;

/// Ordered record of backward closures.
#[derive(Default)]
pub struct Tape {
    closures: Vec<BackwardClosure>,
}

impl Tape {
    pub fn new() -> Self {
        Tape::default()
    }

    pub fn push(&mut self, closure: BackwardClosure) {
        self.closures.push(closure);
    }

    pub fn len(&self) -> usize {
        self.closures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    /// Runs every closure, most recent first, and leaves the tape empty.
    ///
    /// Each closure is dropped right after it runs, releasing the matrix
    /// handles it held.
    pub fn backward(&mut self) {
        debug!("running {} backward closures", self.closures.len());
        while let Some(closure) = self.closures.pop() {
            closure();
        }
    }

    /// Drops every closure without running it.
    pub fn clear(&mut self) {
        debug!("discarding {} backward closures", self.closures.len());
        self.closures.clear();
    }
}
