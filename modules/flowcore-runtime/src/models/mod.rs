pub mod call;
pub mod contact;
pub mod contact_fire;
pub mod interrupt;
pub mod msg;
pub mod run;
pub mod session;

pub use call::{Call, CallStatus};
pub use contact::{
    clear_current_sessions, load_contact, load_current_session, update_current_sessions,
    CurrentSession,
};
pub use contact_fire::{ContactFire, SessionFireExtra};
pub use interrupt::{
    exit_batch, exit_sessions, interrupt_sessions_for_channel, interrupt_sessions_for_contacts,
    interrupt_sessions_for_flows, ExitSelector,
};
pub use msg::{Msg, MsgDirection, MsgStatus};
pub use run::FlowRun;
pub use session::{get_new_fires, insert_sessions, Session, SessionOutput};
