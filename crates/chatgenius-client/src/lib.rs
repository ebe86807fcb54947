//! View-state core of the chat front-end.
//!
//! A [`ChatView`] owns the session gate, the channel directory and the message
//! feed, and is driven by a single task. Commands arrive through a
//! [`ViewHandle`]; backend results and live change events re-enter the same
//! loop, so view state is only ever touched by one handler at a time.

pub mod directory;
pub mod error;
pub mod feed;
pub mod session;
pub mod view;

pub use directory::{ChannelDirectory, ChannelForm, NewChannel};
pub use error::{ClientError, ValidationError};
pub use feed::{FeedPhase, LoadTicket, MessageFeed, NewMessage};
pub use session::{Screen, SessionGate};
pub use view::{ChatView, ViewHandle, ViewState};
