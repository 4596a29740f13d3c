//! Session-signing machinery: session keys (§4.B), wallet-sig acquisition
//! and the re-sign predicate (§4.C), and the orchestrator that ties them
//! together into a `SessionSigsMap` (§4.F).

pub mod key_store;
pub mod orchestrator;
pub mod wallet_sig;

pub use key_store::{get_session_key, rotate_session_key, SessionKeyPair};
pub use orchestrator::{
    get_lit_action_session_sigs, get_pkp_session_sigs, get_session_sigs, GetSessionSigsParams,
    PkpSessionSigsParams,
};
pub use wallet_sig::{needs_to_resign, AuthCallbackParams, AuthNeededCallback, SignSessionKeyCallback};
