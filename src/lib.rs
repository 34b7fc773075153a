pub mod commands;
pub mod config;
pub mod connectivity;
pub mod display;
pub mod indicator;
pub mod input;
pub mod mode;
pub mod state;
pub mod tasks;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod prelude {
    pub use crate::{
        commands::*, config::*, connectivity::*, display::*, indicator::*, input::*, mode::*,
        state::*, tasks::*,
    };
}

pub use tasks::{Event, EventSender};
