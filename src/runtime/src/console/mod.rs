//! Guest serial console automation.

mod expect;
mod login;

pub use expect::Expecter;
pub use login::{LoginAutomaton, LoginOptions, LoginState, LoginTimeouts};
