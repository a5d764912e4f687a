//! Poll lifecycle: queue, start, vote, conclude, delete, finalize

mod clock;
mod machine;
mod manager;
mod model;

pub use clock::{Clock, ManualClock, SystemClock};
pub use machine::{
    ConcludeOutcome, CreatedOutcome, Finalized, PollPhase, PollStateMachine, StartedPoll, Winner,
};
pub use manager::{PollDeps, PollManager, PollSettings, PollSnapshot};
pub use model::{winning_index, Poll, PollAction, PollKind, PollOption, PollView, OPTIONS_PER_POLL};
