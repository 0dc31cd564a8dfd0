use std::cell::{Cell, RefCell};

use rewind_engine::{CoordinatorError, MemberState, ReplicationCoordinator, Terminator};

/// Replication coordinator whose transitions succeed unless a target state
/// was scripted to fail.
pub struct TestCoordinator {
    state: Cell<MemberState>,
    failing: RefCell<Vec<MemberState>>,
}

impl TestCoordinator {
    pub fn new(state: MemberState) -> Self {
        Self {
            state: Cell::new(state),
            failing: RefCell::new(Vec::new()),
        }
    }

    /// Transitions into `state` are refused from now on.
    pub fn fail_transition_to(self, state: MemberState) -> Self {
        self.failing.borrow_mut().push(state);
        self
    }

    pub fn state(&self) -> MemberState {
        self.state.get()
    }
}

impl ReplicationCoordinator for TestCoordinator {
    fn member_state(&self) -> MemberState {
        self.state.get()
    }

    fn set_follower_mode(&self, state: MemberState) -> Result<(), CoordinatorError> {
        if self.failing.borrow().contains(&state) {
            return Err(CoordinatorError(format!(
                "transition from {} to {} refused",
                self.state.get(),
                state
            )));
        }
        self.state.set(state);
        Ok(())
    }
}

/// Turns fatal assertions into panics carrying the message, so tests can
/// match on it with `#[should_panic(expected = ...)]`.
pub struct PanickingTerminator;

impl Terminator for PanickingTerminator {
    fn terminate(&self, code: i32, message: &str) -> ! {
        panic!("fatal assertion {code}: {message}");
    }
}
