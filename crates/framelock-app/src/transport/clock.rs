use super::{TransportControl, TransportCycle, TransportState};

/// Per-cycle transport state machine run by a provider's real-time thread.
///
/// A roll request from Stopped reports one `Starting` cycle before `Rolling`, and
/// so does a locate while rolling, which lets renderers resynchronise on the
/// following roll-start edge. The position advances only while rolling.
pub struct TransportClock {
    control: TransportControl,
    state: TransportState,
    position: u64,
}

impl TransportClock {
    pub fn new(control: TransportControl) -> Self {
        Self {
            control,
            state: TransportState::Stopped,
            position: 0,
        }
    }

    pub fn next_cycle(&mut self, cycle_size: u32) -> TransportCycle {
        let located = match self.control.take_locate() {
            Some(target) => {
                self.position = target;
                true
            }
            None => false,
        };

        self.state = match (self.state, self.control.roll_requested()) {
            (_, false) => TransportState::Stopped,
            (TransportState::Stopped, true) => TransportState::Starting,
            (TransportState::Rolling, true) if located => TransportState::Starting,
            (TransportState::Starting | TransportState::Rolling, true) => TransportState::Rolling,
        };

        let cycle = TransportCycle {
            state: self.state,
            position: self.position,
            cycle_size,
        };
        if self.state == TransportState::Rolling {
            self.position += u64::from(cycle_size);
        }
        self.control.publish(self.state, self.position);
        cycle
    }
}
