/// Sequence number of the first probe of every session.
pub const FIRST_SEQUENCE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted(u32),
    Rejected { expected: u32, got: u32 },
    /// A probe arrived after BYE; it was not processed.
    Terminated,
}

/// Tracks which probe a session expects next. The client and the server each
/// own an independent instance per session.
#[derive(Debug, Clone)]
pub struct Sequencer {
    expected: u32,
    probe_count: u32,
    terminated: bool,
}

impl Sequencer {
    pub fn new(probe_count: u32) -> Self {
        Sequencer {
            expected: FIRST_SEQUENCE,
            probe_count,
            terminated: false,
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_complete(&self) -> bool {
        self.expected >= self.probe_count
    }

    pub fn on_probe(&mut self, sequence: u32) -> Outcome {
        if self.terminated {
            return Outcome::Terminated;
        }
        if sequence != self.expected {
            return Outcome::Rejected {
                expected: self.expected,
                got: sequence,
            };
        }
        // never advance past the negotiated count
        if self.expected < self.probe_count {
            self.expected += 1;
        }
        Outcome::Accepted(sequence)
    }

    /// BYE ends the session from any state, including before all probes ran.
    pub fn on_bye(&mut self) {
        self.terminated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_probes_are_all_accepted() {
        let mut seq = Sequencer::new(5);
        for n in 0..5 {
            assert_eq!(seq.on_probe(n), Outcome::Accepted(n));
        }
        assert_eq!(seq.expected(), 5);
        assert!(seq.is_complete());
    }

    #[test]
    fn out_of_order_probe_leaves_state_alone() {
        let mut seq = Sequencer::new(10);
        seq.on_probe(0);
        seq.on_probe(1);
        assert_eq!(
            seq.on_probe(5),
            Outcome::Rejected {
                expected: 2,
                got: 5
            }
        );
        assert_eq!(seq.expected(), 2);
        assert_eq!(seq.on_probe(2), Outcome::Accepted(2));
    }

    #[test]
    fn expected_is_capped_at_probe_count() {
        let mut seq = Sequencer::new(2);
        seq.on_probe(0);
        seq.on_probe(1);
        assert_eq!(seq.on_probe(2), Outcome::Accepted(2));
        assert_eq!(seq.expected(), 2);
    }

    #[test]
    fn bye_terminates_from_any_state() {
        let mut fresh = Sequencer::new(3);
        fresh.on_bye();
        assert!(fresh.is_terminated());
        assert_eq!(fresh.on_probe(0), Outcome::Terminated);
        assert_eq!(fresh.expected(), 0);

        let mut partial = Sequencer::new(3);
        partial.on_probe(0);
        partial.on_bye();
        assert!(partial.is_terminated());
        assert!(!partial.is_complete());
        assert_eq!(partial.on_probe(1), Outcome::Terminated);
        assert_eq!(partial.expected(), 1);
    }
}
