//! Native stack accounting for the recursive parser and evaluator.
//!
//! Depth counters alone do not bound stack use: frame sizes differ between
//! build profiles by an order of magnitude. The guard compares the address of
//! a local against the one captured when the guard was armed.

/// Stack a single compile or run may consume below its entry point.
pub const STACK_BUDGET: usize = 1024 * 1024;

#[inline(never)]
fn stack_position() -> usize {
    let marker = 0u8;
    std::ptr::addr_of!(marker) as usize
}

#[derive(Debug, Clone, Copy)]
pub struct StackGuard {
    base: usize,
    budget: usize,
}

impl StackGuard {
    /// Arm at the caller's current stack position.
    pub fn arm(budget: usize) -> Self {
        Self { base: stack_position(), budget }
    }

    pub fn exhausted(&self) -> bool {
        self.base.abs_diff(stack_position()) > self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recurse(guard: &StackGuard, n: usize) -> usize {
        if guard.exhausted() {
            return n;
        }
        let pad = [n as u8; 256];
        recurse(guard, n + 1) + usize::from(pad[0] == 0xff)
    }

    #[test]
    fn deep_recursion_trips_the_guard() {
        let guard = StackGuard::arm(64 * 1024);
        assert!(!guard.exhausted());
        let reached = recurse(&guard, 0);
        assert!(reached > 0 && reached < 64 * 1024);
    }
}
