// id.rs — Dense identifiers for IR values and registered passes
//
// ValueId names an SSA value inside one function (`%N` in the text form).
// PassId is the registration index of a pass in a PassRegistry; it is only
// meaningful relative to the registry that issued it.

/// SSA value identifier, printed as `%N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Registration index of a pass. Allocated in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub u32);

impl PassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Produces monotonically increasing ids, so ids follow insertion order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_pass: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_pass(&mut self) -> PassId {
        let id = PassId(self.next_pass);
        self.next_pass += 1;
        id
    }
}
