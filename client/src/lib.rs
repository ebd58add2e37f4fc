//! Client side of the relay.
//!
//! A [`Session`] owns at most one transport to the relay on behalf of every
//! component in an application. Components attach listeners with
//! [`Session::subscribe`] and the session handles the rest:
//!
//! * the first listener opens the transport and the last one closes it, after
//!   a short grace period,
//! * the wanted channel set is kept by the session and declared on every new
//!   transport,
//! * any close other than a normal one schedules a single reconnect,
//!   governed by a [`ReconnectPolicy`].

pub mod backoff;
pub mod error;
pub mod session;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use session::{Session, SessionConfig, SessionEvent, SessionStatus, Subscription};
pub use transport::{Connector, Frame, Transport, WebSocketConnector};
