//! Output model of the flow engine, as consumed by the session runtime.
//!
//! The engine itself (the interpreter that walks a flow definition) lives
//! elsewhere. One engine step for one contact yields a `FlowSession` snapshot
//! plus a `Sprint` carrying the ordered events that step produced.

pub mod events;
pub mod session;

pub use events::{
    ChannelRef, Event, EventPayload, FieldRef, FlowRef, GroupRef, MsgIn, MsgOut,
};
pub use session::{
    Contact, FlowRun, FlowSession, FlowType, RunResult, RunStatus, SessionStatus, Sprint, Step,
};
